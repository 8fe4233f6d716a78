//! fleet.toml configuration parser.
//!
//! Every field has a default, so an empty file (or no file) yields a
//! working configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FleetConfig {
    pub store: StoreConfig,
    pub queue: QueueConfig,
    pub rollout: RolloutConfig,
    pub sidecar: SidecarConfig,
    pub worker: WorkerConfig,
    pub api: ApiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/fleet/fleet.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueConfig {
    /// Attempts per job before it is marked permanently failed.
    pub max_attempts: u32,
    /// Jobs claimed per worker poll.
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    /// A job in `processing` longer than this is considered abandoned.
    pub stale_after_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            batch_size: 10,
            poll_interval_ms: 1000,
            stale_after_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RolloutConfig {
    /// Canary cohort size as a percentage of eligible tenants (min 1 tenant).
    pub canary_percentage: f64,
    /// Percentages for wave_1..wave_4, applied to tenants still needing the
    /// target version at advance time.
    pub wave_percentages: [f64; 4],
    /// Error rate (0.0-1.0) that halts the canary wave.
    pub canary_error_threshold: f64,
    /// Error rate (0.0-1.0) that halts staged waves.
    pub wave_error_threshold: f64,
    /// Terminal jobs required in the current wave before auto-halt evaluates.
    pub min_sample: u64,
    pub normal_priority: u32,
    pub emergency_priority: u32,
    pub control_interval_secs: u64,
    /// Whether the daemon's control loop advances rollouts on its own.
    pub auto_advance: bool,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            canary_percentage: 1.0,
            wave_percentages: [10.0, 25.0, 50.0, 100.0],
            canary_error_threshold: 0.001,
            wave_error_threshold: 0.005,
            min_sample: 10,
            normal_priority: 10,
            emergency_priority: 1000,
            control_interval_secs: 60,
            auto_advance: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SidecarConfig {
    /// Upper bound on waiting for the running agent to finish in-flight work.
    pub drain_timeout_secs: u64,
    /// Upper bound on waiting for the new agent to report healthy.
    pub health_timeout_secs: u64,
    pub health_poll_interval_ms: u64,
    /// Timeout for a single control-endpoint request.
    pub request_timeout_secs: u64,
    pub auto_rollback_on_health_failure: bool,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            drain_timeout_secs: 300,
            health_timeout_secs: 60,
            health_poll_interval_ms: 2000,
            request_timeout_secs: 30,
            auto_rollback_on_health_failure: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkerConfig {
    /// Jobs executed concurrently by one worker process.
    pub concurrency: usize,
    /// Control endpoint address; `{tenant}` is replaced with the tenant id.
    pub endpoint_template: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            endpoint_template: "http://{tenant}.fleet.internal:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApiConfig {
    pub listen: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

impl FleetConfig {
    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        let config: FleetConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        let r = &self.rollout;
        if !(0.0..=100.0).contains(&r.canary_percentage) || r.canary_percentage == 0.0 {
            return Err(CoreError::ConfigInvalid(
                "rollout.canary_percentage must be in (0, 100]".into(),
            ));
        }
        let mut prev = r.canary_percentage;
        for pct in r.wave_percentages {
            if pct < prev || pct > 100.0 {
                return Err(CoreError::ConfigInvalid(
                    "rollout.wave_percentages must be non-decreasing and at most 100".into(),
                ));
            }
            prev = pct;
        }
        if r.wave_percentages[3] != 100.0 {
            return Err(CoreError::ConfigInvalid(
                "the final wave must cover 100% of remaining tenants".into(),
            ));
        }
        for (name, t) in [
            ("canary_error_threshold", r.canary_error_threshold),
            ("wave_error_threshold", r.wave_error_threshold),
        ] {
            if !(0.0..=1.0).contains(&t) {
                return Err(CoreError::ConfigInvalid(format!("rollout.{name} must be in [0, 1]")));
            }
        }
        if r.emergency_priority <= r.normal_priority {
            return Err(CoreError::ConfigInvalid(
                "rollout.emergency_priority must exceed normal_priority".into(),
            ));
        }
        if self.queue.max_attempts == 0 {
            return Err(CoreError::ConfigInvalid("queue.max_attempts must be >= 1".into()));
        }
        if self.worker.concurrency == 0 || self.queue.batch_size == 0 {
            return Err(CoreError::ConfigInvalid(
                "worker.concurrency and queue.batch_size must be >= 1".into(),
            ));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, CoreError> {
        toml::to_string_pretty(self).map_err(|e| CoreError::ConfigInvalid(e.to_string()))
    }
}
