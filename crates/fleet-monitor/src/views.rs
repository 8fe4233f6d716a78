//! Read models returned by the monitor and served as-is by the API.

use fleet_core::Component;
use fleet_queue::{QueueStats, WaveProgress};
use fleet_registry::VersionSummary;
use fleet_rollout::HaltDecision;
use fleet_state::{RolloutId, RolloutSession, RolloutStatus, TemplateVersion, UpdateHistoryEntry};
use serde::{Deserialize, Serialize};

// ── Rollout health ──────────────────────────────────────────────

/// Health of one rollout: its queue stats joined with the auto-halt check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutHealth {
    pub rollout_id: RolloutId,
    pub component: Component,
    pub status: RolloutStatus,
    pub to_version: String,
    pub stats: QueueStats,
    pub success_rate: f64,
    pub error_rate: f64,
    /// Jobs in `processing` for longer than the stale bound.
    pub stuck_jobs: u64,
    pub halt: HaltDecision,
    /// No halt signal and nothing stuck.
    pub healthy: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutProgress {
    pub session: RolloutSession,
    pub waves: Vec<WaveProgress>,
    pub health: RolloutHealth,
}

// ── Fleet overview ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentOverview {
    pub summary: VersionSummary,
    /// Highest version any tenant runs.
    pub latest_version: Option<String>,
    /// Tenants not on `latest_version`.
    pub drifted: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetOverview {
    pub total_tenants: u64,
    pub updating: u64,
    pub failed: u64,
    pub components: Vec<ComponentOverview>,
    pub generated_at: u64,
}

// ── Dashboard ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardData {
    pub fleet: FleetOverview,
    pub active_rollouts: Vec<RolloutHealth>,
    /// Stats over every job in the queue.
    pub queue: QueueStats,
    pub current_templates: Vec<TemplateVersion>,
    pub recent_history: Vec<UpdateHistoryEntry>,
}
