//! Wave plan — how many tenants each rollout state enqueues.

use fleet_core::config::RolloutConfig;
use fleet_state::RolloutStatus;
use serde::{Deserialize, Serialize};

/// Percentages applied at each advance to the tenants still needing the
/// target version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WavePlan {
    pub canary_percentage: f64,
    /// wave_1 through wave_4.
    pub wave_percentages: [f64; 4],
}

impl Default for WavePlan {
    fn default() -> Self {
        Self::from_config(&RolloutConfig::default())
    }
}

impl WavePlan {
    pub fn from_config(config: &RolloutConfig) -> Self {
        Self {
            canary_percentage: config.canary_percentage,
            wave_percentages: config.wave_percentages,
        }
    }

    /// Override the canary percentage, keeping the staged waves.
    pub fn with_canary(mut self, percentage: f64) -> Self {
        self.canary_percentage = percentage;
        self
    }

    /// Percentage for a wave state; `None` for non-wave states.
    pub fn percentage_for(&self, status: RolloutStatus) -> Option<f64> {
        match status {
            RolloutStatus::Canary => Some(self.canary_percentage),
            RolloutStatus::Wave1 => Some(self.wave_percentages[0]),
            RolloutStatus::Wave2 => Some(self.wave_percentages[1]),
            RolloutStatus::Wave3 => Some(self.wave_percentages[2]),
            // The last wave always takes everyone left.
            RolloutStatus::Wave4 => Some(100.0),
            _ => None,
        }
    }

    /// Number of tenants a wave state takes from `remaining`.
    pub fn wave_size(&self, status: RolloutStatus, remaining: usize) -> usize {
        match self.percentage_for(status) {
            Some(pct) => wave_size(pct, remaining),
            None => 0,
        }
    }
}

/// `ceil(pct% of remaining)`, at least one tenant when any remain, never
/// more than `remaining`.
pub fn wave_size(percentage: f64, remaining: usize) -> usize {
    if remaining == 0 {
        return 0;
    }
    let size = (remaining as f64 * percentage / 100.0).ceil() as usize;
    size.clamp(1, remaining)
}
