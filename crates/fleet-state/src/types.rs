//! Domain types for the fleet state store.
//!
//! These are the persisted rows of the version registry, template
//! repository, rollout sessions, update queue, audit history, and
//! in-flight sidecar swaps. All types are serializable to/from JSON for
//! storage in redb tables.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use fleet_core::{Component, WorkflowKind};
use serde::{Deserialize, Serialize};

/// Unique identifier for a tenant.
pub type TenantId = String;

/// Unique identifier for a rollout session.
pub type RolloutId = String;

/// Unique identifier for a queue job.
pub type JobId = u64;

/// Current unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Current unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ── Tenant versions ───────────────────────────────────────────────

/// Per-tenant update status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Current,
    Updating,
    Failed,
    Rollback,
}

/// One row per tenant: the version it runs for every component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantVersionRow {
    pub tenant_id: TenantId,
    pub dashboard_version: Option<String>,
    pub agent_version: Option<String>,
    pub workflow_versions: BTreeMap<WorkflowKind, String>,
    pub update_status: UpdateStatus,
    pub created_at: u64,
    pub updated_at: u64,
    /// When a component version last changed.
    pub last_version_change_at: Option<u64>,
}

impl TenantVersionRow {
    pub fn new(tenant_id: &str, now: u64) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            dashboard_version: None,
            agent_version: None,
            workflow_versions: BTreeMap::new(),
            update_status: UpdateStatus::Current,
            created_at: now,
            updated_at: now,
            last_version_change_at: None,
        }
    }

    /// The recorded version of a component, if any.
    pub fn version(&self, component: Component) -> Option<&str> {
        match component {
            Component::Dashboard => self.dashboard_version.as_deref(),
            Component::Agent => self.agent_version.as_deref(),
            Component::Workflow(kind) => self.workflow_versions.get(&kind).map(String::as_str),
        }
    }

    pub fn set_version(&mut self, component: Component, version: &str) {
        let version = version.to_string();
        match component {
            Component::Dashboard => self.dashboard_version = Some(version),
            Component::Agent => self.agent_version = Some(version),
            Component::Workflow(kind) => {
                self.workflow_versions.insert(kind, version);
            }
        }
    }

    /// Whether this tenant's recorded version differs from `target`.
    pub fn drifts_from(&self, component: Component, target: &str) -> bool {
        self.version(component) != Some(target)
    }
}

// ── Templates ─────────────────────────────────────────────────────

/// An immutable, versioned golden workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TemplateVersion {
    pub workflow_name: String,
    pub version: String,
    /// Opaque workflow definition (node list + connection graph).
    pub definition: serde_json::Value,
    pub changelog: String,
    /// At most one version per workflow name is current.
    pub is_current: bool,
    /// Advisory; any number of versions may be canary.
    pub is_canary: bool,
    pub published_by: String,
    pub published_at: u64,
    pub promoted_at: Option<u64>,
}

impl TemplateVersion {
    /// Build the composite key for the templates table.
    pub fn table_key(&self) -> String {
        template_key(&self.workflow_name, &self.version)
    }
}

pub fn template_key(workflow: &str, version: &str) -> String {
    format!("{workflow}@{version}")
}

// ── Rollouts ──────────────────────────────────────────────────────

/// How a rollout is sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStrategy {
    /// Canary cohort first, then staged waves.
    Canary,
    /// Same wave sequence as canary; kept distinct for reporting.
    Staged,
    /// One full-size wave.
    Immediate,
}

/// Rollout state machine.
///
/// ```text
/// pending → canary → wave_1 → wave_2 → wave_3 → wave_4 → completed
///        ↘ paused | aborted | rolled_back (from any non-terminal state)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    Pending,
    Canary,
    #[serde(rename = "wave_1")]
    Wave1,
    #[serde(rename = "wave_2")]
    Wave2,
    #[serde(rename = "wave_3")]
    Wave3,
    #[serde(rename = "wave_4")]
    Wave4,
    Completed,
    Paused,
    Aborted,
    RolledBack,
}

impl RolloutStatus {
    /// Fixed successor table for wave progression.
    pub fn next(self) -> Option<RolloutStatus> {
        match self {
            RolloutStatus::Pending => Some(RolloutStatus::Canary),
            RolloutStatus::Canary => Some(RolloutStatus::Wave1),
            RolloutStatus::Wave1 => Some(RolloutStatus::Wave2),
            RolloutStatus::Wave2 => Some(RolloutStatus::Wave3),
            RolloutStatus::Wave3 => Some(RolloutStatus::Wave4),
            RolloutStatus::Wave4 => Some(RolloutStatus::Completed),
            RolloutStatus::Completed
            | RolloutStatus::Paused
            | RolloutStatus::Aborted
            | RolloutStatus::RolledBack => None,
        }
    }

    /// Wave number of a wave state: canary is 0, wave_N is N.
    pub fn wave_number(self) -> Option<u32> {
        match self {
            RolloutStatus::Canary => Some(0),
            RolloutStatus::Wave1 => Some(1),
            RolloutStatus::Wave2 => Some(2),
            RolloutStatus::Wave3 => Some(3),
            RolloutStatus::Wave4 => Some(4),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RolloutStatus::Completed | RolloutStatus::Aborted | RolloutStatus::RolledBack
        )
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RolloutStatus::Pending => "pending",
            RolloutStatus::Canary => "canary",
            RolloutStatus::Wave1 => "wave_1",
            RolloutStatus::Wave2 => "wave_2",
            RolloutStatus::Wave3 => "wave_3",
            RolloutStatus::Wave4 => "wave_4",
            RolloutStatus::Completed => "completed",
            RolloutStatus::Paused => "paused",
            RolloutStatus::Aborted => "aborted",
            RolloutStatus::RolledBack => "rolled_back",
        }
    }
}

impl std::fmt::Display for RolloutStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Free-form session metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RolloutMetadata {
    /// Status snapshotted by pause, restored by resume.
    pub paused_from: Option<RolloutStatus>,
    /// Set on sessions created by emergency rollback.
    pub emergency: bool,
    /// Operator-supplied reason (rollbacks, pauses).
    pub reason: Option<String>,
    /// Rollout cancelled to make room for this one.
    pub preempted_rollout: Option<RolloutId>,
    /// Wave whose error rate an operator accepted by resuming; auto-halt
    /// no longer fires for it.
    #[serde(default)]
    pub acknowledged_wave: Option<u32>,
}

/// One rollout attempt of a component to a target version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolloutSession {
    pub id: RolloutId,
    pub component: Component,
    pub from_version: Option<String>,
    pub to_version: String,
    pub strategy: RolloutStrategy,
    pub status: RolloutStatus,
    pub total_tenants: u64,
    pub updated_tenants: u64,
    pub failed_tenants: u64,
    /// Error rate (0.0-1.0) that halts staged waves.
    pub error_threshold: f64,
    /// Canary cohort size as a percentage of eligible tenants.
    pub canary_percentage: f64,
    pub initiated_by: String,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub updated_at: u64,
    pub completed_at: Option<u64>,
    pub abort_reason: Option<String>,
    pub metadata: RolloutMetadata,
}

impl RolloutSession {
    /// The wave the rollout is currently in, looking through a pause.
    pub fn current_wave(&self) -> Option<u32> {
        match self.status {
            RolloutStatus::Paused => self.metadata.paused_from.and_then(RolloutStatus::wave_number),
            s => s.wave_number(),
        }
    }
}

// ── Queue jobs ────────────────────────────────────────────────────

/// Lifecycle of a queue job.
///
/// `queued → processing → completed | queued (retry) | failed`;
/// `rolled_back` only from `queued` or `processing` via cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    RolledBack,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::RolledBack)
    }
}

/// One per (rollout, tenant) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueJob {
    pub id: JobId,
    pub rollout_id: RolloutId,
    pub tenant_id: TenantId,
    pub component: Component,
    pub from_version: Option<String>,
    pub to_version: String,
    /// Higher wins.
    pub priority: u32,
    pub status: JobStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub wave_number: u32,
    pub error_message: Option<String>,
    /// Monotonic enqueue order; reassigned when a job is re-queued.
    pub enqueue_seq: u64,
    pub queued_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub worker_id: Option<String>,
}

impl QueueJob {
    /// Build the key for the jobs table.
    pub fn table_key(&self) -> String {
        job_key(self.id)
    }

    /// Build the claim-order key for the queued index.
    pub fn queue_key(&self) -> String {
        format!("{:010}:{:020}", u32::MAX - self.priority, self.enqueue_seq)
    }

    /// Build the key for the rollout → job index.
    pub fn rollout_key(&self) -> String {
        format!("{}:{:020}", self.rollout_id, self.id)
    }
}

pub fn job_key(id: JobId) -> String {
    format!("{id:020}")
}

// ── History ───────────────────────────────────────────────────────

/// Kinds of audited state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    RolloutStarted,
    WaveAdvanced,
    RolloutPaused,
    RolloutResumed,
    RolloutAborted,
    RolloutCompleted,
    RolloutPreempted,
    EmergencyRollback,
    TenantUpdated,
    TenantUpdateFailed,
    SidecarSwapCompleted,
    SidecarRolledBack,
    TemplatePublished,
    TemplatePromoted,
}

/// Append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateHistoryEntry {
    /// Assigned by the store on append.
    pub id: u64,
    pub action: HistoryAction,
    pub rollout_id: Option<RolloutId>,
    pub tenant_id: Option<TenantId>,
    pub component: Option<Component>,
    pub from_version: Option<String>,
    pub to_version: Option<String>,
    pub initiated_by: String,
    pub affected_tenants: u64,
    pub reason: Option<String>,
    pub details: serde_json::Value,
    pub created_at: u64,
}

impl UpdateHistoryEntry {
    pub fn new(action: HistoryAction, initiated_by: &str) -> Self {
        Self {
            id: 0,
            action,
            rollout_id: None,
            tenant_id: None,
            component: None,
            from_version: None,
            to_version: None,
            initiated_by: initiated_by.to_string(),
            affected_tenants: 0,
            reason: None,
            details: serde_json::Value::Null,
            created_at: epoch_secs(),
        }
    }

    pub fn rollout(mut self, id: &str) -> Self {
        self.rollout_id = Some(id.to_string());
        self
    }

    pub fn tenant(mut self, id: &str) -> Self {
        self.tenant_id = Some(id.to_string());
        self
    }

    pub fn component(mut self, component: Component) -> Self {
        self.component = Some(component);
        self
    }

    pub fn versions(mut self, from: Option<&str>, to: &str) -> Self {
        self.from_version = from.map(str::to_string);
        self.to_version = Some(to.to_string());
        self
    }

    pub fn affected(mut self, count: u64) -> Self {
        self.affected_tenants = count;
        self
    }

    pub fn reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

// ── Sidecar swaps ─────────────────────────────────────────────────

/// Steps of the blue-green agent swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStep {
    Preparing,
    PullingImage,
    CompletingOperations,
    SavingCheckpoint,
    ReadyForSwap,
    Swapping,
    HealthChecking,
    Completed,
    Failed,
    RolledBack,
}

impl SwapStep {
    pub fn is_terminal(self) -> bool {
        matches!(self, SwapStep::Completed | SwapStep::Failed | SwapStep::RolledBack)
    }
}

/// Timestamp of entering a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: SwapStep,
    pub at_ms: u64,
}

/// Per-tenant, per-attempt record of a blue-green swap.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SidecarSwapState {
    pub tenant_id: TenantId,
    pub job_id: JobId,
    pub from_version: Option<String>,
    pub to_version: String,
    pub step: SwapStep,
    pub timeline: Vec<StepRecord>,
    pub checkpoint: Option<String>,
    pub error: Option<String>,
    pub downtime_ms: Option<u64>,
}

impl SidecarSwapState {
    pub fn new(tenant_id: &str, job_id: JobId, from: Option<&str>, to: &str, now_ms: u64) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            job_id,
            from_version: from.map(str::to_string),
            to_version: to.to_string(),
            step: SwapStep::Preparing,
            timeline: vec![StepRecord {
                step: SwapStep::Preparing,
                at_ms: now_ms,
            }],
            checkpoint: None,
            error: None,
            downtime_ms: None,
        }
    }

    /// Enter a new step, recording its timestamp.
    pub fn enter(&mut self, step: SwapStep, now_ms: u64) {
        self.step = step;
        self.timeline.push(StepRecord { step, at_ms: now_ms });
    }

    /// When the given step was (last) entered.
    pub fn entered_at(&self, step: SwapStep) -> Option<u64> {
        self.timeline.iter().rev().find(|r| r.step == step).map(|r| r.at_ms)
    }

    pub fn table_key(&self) -> String {
        format!("{}:{:020}", self.tenant_id, self.job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_successor_table_walks_every_wave() {
        let mut s = RolloutStatus::Pending;
        let mut seen = vec![s];
        while let Some(next) = s.next() {
            seen.push(next);
            s = next;
        }
        assert_eq!(
            seen,
            vec![
                RolloutStatus::Pending,
                RolloutStatus::Canary,
                RolloutStatus::Wave1,
                RolloutStatus::Wave2,
                RolloutStatus::Wave3,
                RolloutStatus::Wave4,
                RolloutStatus::Completed,
            ]
        );
    }

    #[test]
    fn side_exits_have_no_successor() {
        for s in [RolloutStatus::Paused, RolloutStatus::Aborted, RolloutStatus::RolledBack] {
            assert!(s.next().is_none());
        }
        assert!(!RolloutStatus::Paused.is_terminal());
    }

    #[test]
    fn wave_status_serializes_with_underscore() {
        let json = serde_json::to_string(&RolloutStatus::Wave3).unwrap();
        assert_eq!(json, "\"wave_3\"");
    }

    #[test]
    fn tenant_row_maps_each_component_to_its_own_field() {
        let mut row = TenantVersionRow::new("t1", 0);
        for (i, c) in Component::ALL.iter().enumerate() {
            row.set_version(*c, &format!("1.{i}.0"));
        }
        for (i, c) in Component::ALL.iter().enumerate() {
            assert_eq!(row.version(*c), Some(format!("1.{i}.0").as_str()));
        }
        assert!(row.drifts_from(Component::Agent, "9.9.9"));
        assert!(!row.drifts_from(Component::Agent, "1.1.0"));
    }

    #[test]
    fn queue_key_orders_priority_then_sequence() {
        let base = QueueJob {
            id: 1,
            rollout_id: "r".into(),
            tenant_id: "t".into(),
            component: Component::Dashboard,
            from_version: None,
            to_version: "1.0.0".into(),
            priority: 10,
            status: JobStatus::Queued,
            attempt_count: 0,
            max_attempts: 3,
            wave_number: 0,
            error_message: None,
            enqueue_seq: 5,
            queued_at: 0,
            started_at: None,
            completed_at: None,
            worker_id: None,
        };
        let urgent = QueueJob {
            priority: 1000,
            enqueue_seq: 9,
            ..base.clone()
        };
        let later = QueueJob {
            enqueue_seq: 6,
            ..base.clone()
        };
        assert!(urgent.queue_key() < base.queue_key());
        assert!(base.queue_key() < later.queue_key());
    }

    #[test]
    fn swap_timeline_records_each_step() {
        let mut swap = SidecarSwapState::new("t1", 7, Some("1.0.0"), "1.1.0", 100);
        swap.enter(SwapStep::Swapping, 250);
        swap.enter(SwapStep::HealthChecking, 300);
        assert_eq!(swap.entered_at(SwapStep::Swapping), Some(250));
        assert_eq!(swap.timeline.len(), 3);
        assert!(!swap.step.is_terminal());
    }
}
