//! Rollout engine — drives the rollout state machine.
//!
//! Every operation loads the session, checks its status, and writes the
//! transition together with its jobs, tenant status changes, and audit
//! entry in one store transaction. Calling an operation twice never
//! produces a second wave.

use std::collections::BTreeMap;

use fleet_core::config::RolloutConfig;
use fleet_core::{is_semver, Component, FleetConfig};
use fleet_queue::{cancel_in, enqueue_in, QueueStats, WaveSpec};
use fleet_registry::{needing_update_in, set_status_in};
use fleet_state::*;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::{RolloutError, RolloutResult};
use crate::strategy::WavePlan;

/// Input to [`RolloutEngine::initiate_rollout`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutRequest {
    pub component: Component,
    pub to_version: String,
    pub strategy: RolloutStrategy,
    pub initiated_by: String,
    /// Staged-wave error threshold; config default when absent.
    #[serde(default)]
    pub error_threshold: Option<f64>,
    /// Canary cohort percentage; config default when absent.
    #[serde(default)]
    pub canary_percentage: Option<f64>,
}

/// What [`RolloutEngine::advance_rollout`] did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum AdvanceOutcome {
    /// Moved to the next wave and enqueued its slice.
    Advanced {
        from: RolloutStatus,
        to: RolloutStatus,
        jobs_enqueued: u64,
    },
    /// The last wave drained; the rollout is now completed.
    Completed,
    /// The current wave still has queued or processing jobs.
    WaveInProgress { wave: u32, outstanding: u64 },
    /// Terminal or paused; nothing changed.
    Unchanged { status: RolloutStatus },
}

/// Result of an auto-halt evaluation. Advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaltDecision {
    pub halt: bool,
    pub wave: Option<u32>,
    /// Terminal jobs in the evaluated wave.
    pub sample: u64,
    pub error_rate: f64,
    pub threshold: f64,
    pub reason: String,
}

impl HaltDecision {
    fn keep_going(wave: Option<u32>, reason: impl Into<String>) -> Self {
        Self {
            halt: false,
            wave,
            sample: 0,
            error_rate: 0.0,
            threshold: 0.0,
            reason: reason.into(),
        }
    }
}

/// Service over rollout sessions.
#[derive(Clone)]
pub struct RolloutEngine {
    pub(crate) store: StateStore,
    pub(crate) config: RolloutConfig,
    pub(crate) max_attempts: u32,
    /// Parallel workers assumed by rollback ETAs.
    pub(crate) worker_count: u32,
}

impl RolloutEngine {
    pub fn new(store: StateStore, config: RolloutConfig, max_attempts: u32) -> Self {
        Self {
            store,
            config,
            max_attempts,
            worker_count: 1,
        }
    }

    pub fn from_config(store: StateStore, config: &FleetConfig) -> Self {
        Self::new(store, config.rollout.clone(), config.queue.max_attempts)
            .with_worker_count(config.worker.concurrency)
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = u32::try_from(workers).unwrap_or(u32::MAX).max(1);
        self
    }

    pub fn config(&self) -> &RolloutConfig {
        &self.config
    }

    /// Start a rollout: shuffle the eligible tenants, enqueue the first
    /// wave (the canary cohort, or everyone for `immediate`), and mark that
    /// wave `updating`.
    pub fn initiate_rollout(&self, req: RolloutRequest) -> RolloutResult<RolloutSession> {
        if !is_semver(&req.to_version) {
            return Err(RolloutError::InvalidVersion(req.to_version));
        }
        validate_overrides(&req)?;
        let canary_percentage = req
            .canary_percentage
            .unwrap_or(self.config.canary_percentage);
        let plan = WavePlan::from_config(&self.config).with_canary(canary_percentage);

        let session = self.store.write(|tx| {
            if let Some(active) = active_in(tx, req.component)? {
                return Err(RolloutError::ActiveRolloutExists {
                    component: req.component,
                    rollout_id: active.id,
                });
            }

            let mut eligible = needing_update_in(tx, req.component, &req.to_version)?;
            if eligible.is_empty() {
                return Err(RolloutError::NoEligibleTenants {
                    component: req.component,
                    version: req.to_version.clone(),
                });
            }
            eligible.shuffle(&mut rand::thread_rng());

            let status = match req.strategy {
                RolloutStrategy::Immediate => RolloutStatus::Wave4,
                RolloutStrategy::Canary | RolloutStrategy::Staged => RolloutStatus::Canary,
            };
            let take = plan.wave_size(status, eligible.len());
            let now = epoch_secs();

            let session = RolloutSession {
                id: uuid::Uuid::new_v4().to_string(),
                component: req.component,
                from_version: dominant_version(&eligible, req.component),
                to_version: req.to_version.clone(),
                strategy: req.strategy,
                status,
                total_tenants: eligible.len() as u64,
                updated_tenants: 0,
                failed_tenants: 0,
                error_threshold: req
                    .error_threshold
                    .unwrap_or(self.config.wave_error_threshold),
                canary_percentage,
                initiated_by: req.initiated_by.clone(),
                created_at: now,
                started_at: Some(now),
                updated_at: now,
                completed_at: None,
                abort_reason: None,
                metadata: RolloutMetadata::default(),
            };
            tx.put_rollout(&session)?;

            let enqueued = dispatch_wave(
                tx,
                &session,
                status,
                &eligible[..take],
                self.config.normal_priority,
                self.max_attempts,
                UpdateStatus::Updating,
            )?;
            tx.append_history(
                UpdateHistoryEntry::new(HistoryAction::RolloutStarted, &session.initiated_by)
                    .rollout(&session.id)
                    .component(session.component)
                    .versions(session.from_version.as_deref(), &session.to_version)
                    .affected(session.total_tenants)
                    .details(json!({
                        "strategy": session.strategy,
                        "status": status,
                        "first_wave": enqueued,
                    })),
            )?;
            Ok(session)
        })?;

        info!(
            rollout = %session.id,
            component = %session.component,
            to = %session.to_version,
            strategy = ?session.strategy,
            eligible = session.total_tenants,
            "rollout initiated"
        );
        Ok(session)
    }

    /// Move a rollout to its next state once the current wave has drained.
    ///
    /// The next wave is sized against the tenants that still need the
    /// target version right now. A terminal or paused rollout is left as is.
    pub fn advance_rollout(&self, rollout_id: &str) -> RolloutResult<AdvanceOutcome> {
        let outcome = self.store.write(|tx| {
            let mut session = load(tx, rollout_id)?;
            if session.status.is_terminal() || session.status == RolloutStatus::Paused {
                return Ok(AdvanceOutcome::Unchanged {
                    status: session.status,
                });
            }

            if let Some(wave) = session.status.wave_number() {
                let outstanding = tx
                    .jobs_for_rollout(rollout_id)?
                    .iter()
                    .filter(|j| j.wave_number == wave && !j.status.is_terminal())
                    .count() as u64;
                if outstanding > 0 {
                    return Ok(AdvanceOutcome::WaveInProgress { wave, outstanding });
                }
            }

            let Some(next) = session.status.next() else {
                return Ok(AdvanceOutcome::Unchanged {
                    status: session.status,
                });
            };
            let from = session.status;
            let now = epoch_secs();

            if next == RolloutStatus::Completed {
                session.status = RolloutStatus::Completed;
                session.updated_tenants = session.total_tenants;
                session.completed_at = Some(now);
                session.updated_at = now;
                tx.put_rollout(&session)?;
                tx.append_history(
                    UpdateHistoryEntry::new(HistoryAction::RolloutCompleted, "rollout-engine")
                        .rollout(&session.id)
                        .component(session.component)
                        .versions(session.from_version.as_deref(), &session.to_version)
                        .affected(session.total_tenants)
                        .details(json!({ "failed_tenants": session.failed_tenants })),
                )?;
                return Ok(AdvanceOutcome::Completed);
            }

            let mut remaining = needing_update_in(tx, session.component, &session.to_version)?;
            remaining.shuffle(&mut rand::thread_rng());
            let plan = WavePlan::from_config(&self.config).with_canary(session.canary_percentage);
            let take = plan.wave_size(next, remaining.len());

            let jobs_enqueued = dispatch_wave(
                tx,
                &session,
                next,
                &remaining[..take],
                self.config.normal_priority,
                self.max_attempts,
                UpdateStatus::Updating,
            )?;
            session.status = next;
            session.updated_at = now;
            tx.put_rollout(&session)?;
            tx.append_history(
                UpdateHistoryEntry::new(HistoryAction::WaveAdvanced, "rollout-engine")
                    .rollout(&session.id)
                    .component(session.component)
                    .versions(session.from_version.as_deref(), &session.to_version)
                    .affected(jobs_enqueued)
                    .details(json!({
                        "from": from,
                        "to": next,
                        "remaining": remaining.len(),
                    })),
            )?;
            Ok::<_, RolloutError>(AdvanceOutcome::Advanced {
                from,
                to: next,
                jobs_enqueued,
            })
        })?;

        match &outcome {
            AdvanceOutcome::Advanced { from, to, jobs_enqueued } => info!(
                rollout = %rollout_id,
                %from,
                %to,
                jobs = jobs_enqueued,
                "rollout advanced"
            ),
            AdvanceOutcome::Completed => info!(rollout = %rollout_id, "rollout completed"),
            AdvanceOutcome::WaveInProgress { wave, outstanding } => debug!(
                rollout = %rollout_id,
                wave,
                outstanding,
                "wave in progress"
            ),
            AdvanceOutcome::Unchanged { status } => {
                debug!(rollout = %rollout_id, %status, "advance skipped")
            }
        }
        Ok(outcome)
    }

    /// Whether the current wave's error rate calls for halting.
    ///
    /// Never halts on fewer than `min_sample` terminal jobs in the wave.
    /// The canary wave uses the tighter canary threshold.
    pub fn should_auto_halt(&self, rollout_id: &str) -> RolloutResult<HaltDecision> {
        let session = self.get_rollout(rollout_id)?;
        if session.status.is_terminal() {
            return Ok(HaltDecision::keep_going(None, "rollout is terminal"));
        }
        if session.metadata.emergency {
            return Ok(HaltDecision::keep_going(
                session.current_wave(),
                "emergency rollbacks are not halted",
            ));
        }
        let Some(wave) = session.current_wave() else {
            return Ok(HaltDecision::keep_going(None, "rollout has no current wave"));
        };
        if session.metadata.acknowledged_wave == Some(wave) {
            return Ok(HaltDecision::keep_going(
                Some(wave),
                format!("wave {wave} error rate acknowledged by operator"),
            ));
        }

        let jobs = self.store.list_jobs_for_rollout(rollout_id)?;
        let stats = QueueStats::from_jobs(jobs.iter().filter(|j| j.wave_number == wave));
        let threshold = if wave == 0 {
            self.config.canary_error_threshold
        } else {
            session.error_threshold
        };
        let sample = stats.terminal();

        let mut decision = HaltDecision {
            halt: false,
            wave: Some(wave),
            sample,
            error_rate: stats.error_rate,
            threshold,
            reason: String::new(),
        };
        if sample < self.config.min_sample {
            decision.reason = format!(
                "insufficient sample: {sample} of {} terminal jobs",
                self.config.min_sample
            );
        } else if stats.error_rate > threshold {
            decision.halt = true;
            decision.reason = format!(
                "error rate {:.4} exceeds threshold {threshold:.4} in wave {wave}",
                stats.error_rate
            );
            warn!(rollout = %rollout_id, wave, error_rate = stats.error_rate, threshold, "auto-halt signalled");
        } else {
            decision.reason = "error rate within threshold".into();
        }
        Ok(decision)
    }

    /// Pause a running rollout, remembering where it was.
    pub fn pause_rollout(
        &self,
        rollout_id: &str,
        paused_by: &str,
        reason: &str,
    ) -> RolloutResult<RolloutSession> {
        let session = self.store.write(|tx| {
            let mut session = load(tx, rollout_id)?;
            if session.status.is_terminal() || session.status == RolloutStatus::Paused {
                return Err(invalid(&session, "pause"));
            }
            session.metadata.paused_from = Some(session.status);
            session.metadata.reason = Some(reason.to_string());
            session.status = RolloutStatus::Paused;
            session.updated_at = epoch_secs();
            tx.put_rollout(&session)?;
            tx.append_history(
                UpdateHistoryEntry::new(HistoryAction::RolloutPaused, paused_by)
                    .rollout(&session.id)
                    .component(session.component)
                    .reason(reason),
            )?;
            Ok(session)
        })?;
        info!(rollout = %rollout_id, %reason, "rollout paused");
        Ok(session)
    }

    /// Restore the status a paused rollout had before pausing.
    pub fn resume_rollout(&self, rollout_id: &str, resumed_by: &str) -> RolloutResult<RolloutSession> {
        let session = self.store.write(|tx| {
            let mut session = load(tx, rollout_id)?;
            let restored = match (session.status, session.metadata.paused_from) {
                (RolloutStatus::Paused, Some(previous)) => previous,
                _ => return Err(invalid(&session, "resume")),
            };
            session.status = restored;
            session.metadata.paused_from = None;
            session.metadata.acknowledged_wave = restored.wave_number();
            session.updated_at = epoch_secs();
            tx.put_rollout(&session)?;
            tx.append_history(
                UpdateHistoryEntry::new(HistoryAction::RolloutResumed, resumed_by)
                    .rollout(&session.id)
                    .component(session.component)
                    .details(json!({ "status": restored })),
            )?;
            Ok(session)
        })?;
        info!(rollout = %rollout_id, status = %session.status, "rollout resumed");
        Ok(session)
    }

    /// Cancel outstanding jobs and end the rollout as `aborted`.
    pub fn abort_rollout(
        &self,
        rollout_id: &str,
        aborted_by: &str,
        reason: &str,
    ) -> RolloutResult<RolloutSession> {
        let (session, cancelled) = self.store.write(|tx| {
            let mut session = load(tx, rollout_id)?;
            if session.status.is_terminal() {
                return Err(invalid(&session, "abort"));
            }
            let cancelled = cancel_in(tx, rollout_id, reason)?;
            release_tenants(tx, &cancelled)?;

            let now = epoch_secs();
            session.status = RolloutStatus::Aborted;
            session.abort_reason = Some(reason.to_string());
            session.completed_at = Some(now);
            session.updated_at = now;
            tx.put_rollout(&session)?;
            tx.append_history(
                UpdateHistoryEntry::new(HistoryAction::RolloutAborted, aborted_by)
                    .rollout(&session.id)
                    .component(session.component)
                    .versions(session.from_version.as_deref(), &session.to_version)
                    .affected(cancelled.len() as u64)
                    .reason(reason),
            )?;
            Ok((session, cancelled.len()))
        })?;
        warn!(rollout = %rollout_id, cancelled, %reason, "rollout aborted");
        Ok(session)
    }

    pub fn get_rollout(&self, rollout_id: &str) -> RolloutResult<RolloutSession> {
        self.store
            .get_rollout(rollout_id)?
            .ok_or_else(|| RolloutError::NotFound(rollout_id.to_string()))
    }

    /// All rollouts, newest first.
    pub fn list_rollouts(&self) -> RolloutResult<Vec<RolloutSession>> {
        let mut rollouts = self.store.list_rollouts()?;
        rollouts.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(rollouts)
    }

    pub fn list_active_rollouts(&self) -> RolloutResult<Vec<RolloutSession>> {
        Ok(self
            .list_rollouts()?
            .into_iter()
            .filter(|s| s.status.is_active())
            .collect())
    }

    /// The non-terminal rollout for a component, if any.
    pub fn active_rollout_for(&self, component: Component) -> RolloutResult<Option<RolloutSession>> {
        Ok(self
            .store
            .list_rollouts()?
            .into_iter()
            .find(|s| s.component == component && s.status.is_active()))
    }
}

pub(crate) fn load(tx: &StoreTxn, rollout_id: &str) -> RolloutResult<RolloutSession> {
    tx.get_rollout(rollout_id)?
        .ok_or_else(|| RolloutError::NotFound(rollout_id.to_string()))
}


/// Canary overrides lie in (0, 100) and threshold overrides in [0, 1).
fn validate_overrides(req: &RolloutRequest) -> RolloutResult<()> {
    if let Some(pct) = req.canary_percentage {
        if !(pct > 0.0 && pct < 100.0) {
            return Err(RolloutError::InvalidRequest(format!(
                "canary_percentage must be in (0, 100), got {pct}"
            )));
        }
    }
    if let Some(threshold) = req.error_threshold {
        if !(0.0..1.0).contains(&threshold) {
            return Err(RolloutError::InvalidRequest(format!(
                "error_threshold must be in [0, 1), got {threshold}"
            )));
        }
    }
    Ok(())
}
fn invalid(session: &RolloutSession, action: &'static str) -> RolloutError {
    RolloutError::InvalidState {
        rollout_id: session.id.clone(),
        status: session.status,
        action,
    }
}

pub(crate) fn active_in(tx: &StoreTxn, component: Component) -> StateResult<Option<RolloutSession>> {
    Ok(tx
        .list_rollouts()?
        .into_iter()
        .find(|s| s.component == component && s.status.is_active()))
}

/// Enqueue one job per row for `status`'s wave and set the tenants'
/// update status. Returns the number of jobs enqueued.
pub(crate) fn dispatch_wave(
    tx: &StoreTxn,
    session: &RolloutSession,
    status: RolloutStatus,
    rows: &[TenantVersionRow],
    priority: u32,
    max_attempts: u32,
    tenant_status: UpdateStatus,
) -> StateResult<u64> {
    if rows.is_empty() {
        return Ok(0);
    }
    let tenants: Vec<(TenantId, Option<String>)> = rows
        .iter()
        .map(|r| {
            (
                r.tenant_id.clone(),
                r.version(session.component).map(str::to_string),
            )
        })
        .collect();
    let spec = WaveSpec {
        rollout_id: &session.id,
        component: session.component,
        to_version: &session.to_version,
        priority,
        wave_number: status.wave_number().unwrap_or(0),
        max_attempts,
    };
    let jobs = enqueue_in(tx, &spec, &tenants)?;
    let ids: Vec<TenantId> = tenants.into_iter().map(|(id, _)| id).collect();
    set_status_in(tx, &ids, tenant_status)?;
    Ok(jobs.len() as u64)
}

/// Return tenants whose jobs were cancelled from `updating` to `current`.
/// Their recorded versions never changed.
pub(crate) fn release_tenants(tx: &StoreTxn, cancelled: &[QueueJob]) -> StateResult<u64> {
    let mut ids = Vec::with_capacity(cancelled.len());
    for job in cancelled {
        if let Some(row) = tx.get_tenant(&job.tenant_id)? {
            if row.update_status == UpdateStatus::Updating {
                ids.push(row.tenant_id);
            }
        }
    }
    set_status_in(tx, &ids, UpdateStatus::Current)
}

/// The most common recorded version among `rows`.
pub(crate) fn dominant_version(rows: &[TenantVersionRow], component: Component) -> Option<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for row in rows {
        if let Some(v) = row.version(component) {
            *counts.entry(v).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, n)| *n)
        .map(|(v, _)| v.to_string())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use fleet_queue::UpdateQueue;
    use fleet_registry::VersionRegistry;

    pub(crate) struct Fleet {
        pub store: StateStore,
        pub engine: RolloutEngine,
        pub queue: UpdateQueue,
        pub registry: VersionRegistry,
    }

    pub(crate) fn fleet(tenants: usize, max_attempts: u32) -> Fleet {
        let store = StateStore::open_in_memory().unwrap();
        let registry = VersionRegistry::new(store.clone());
        for i in 0..tenants {
            registry
                .register_tenant(
                    &format!("t{i:04}"),
                    &[(Component::Dashboard, "1.0.0"), (Component::Agent, "1.1.0")],
                )
                .unwrap();
        }
        Fleet {
            engine: RolloutEngine::new(store.clone(), RolloutConfig::default(), max_attempts),
            queue: UpdateQueue::new(store.clone()),
            registry,
            store,
        }
    }

    fn request(strategy: RolloutStrategy) -> RolloutRequest {
        RolloutRequest {
            component: Component::Dashboard,
            to_version: "1.1.0".into(),
            strategy,
            initiated_by: "ops".into(),
            error_threshold: None,
            canary_percentage: None,
        }
    }

    /// Claim every queued job and report it, recording the new version on
    /// success the way a worker does.
    pub(crate) fn drain(f: &Fleet, succeed: bool) -> usize {
        let mut processed = 0;
        loop {
            let batch = f.queue.claim_batch(50, "test-worker").unwrap();
            if batch.is_empty() {
                return processed;
            }
            for job in batch {
                if succeed {
                    f.registry
                        .record_version_update(&job.tenant_id, job.component, &job.to_version)
                        .unwrap();
                    f.queue.report_job_success(job.id).unwrap();
                } else {
                    f.registry
                        .set_update_status(&job.tenant_id, UpdateStatus::Failed)
                        .unwrap();
                    f.queue.report_job_failure(job.id, "boom").unwrap();
                }
                processed += 1;
            }
        }
    }

    #[test]
    fn canary_starts_with_one_percent() {
        let f = fleet(250, 3);
        let session = f.engine.initiate_rollout(request(RolloutStrategy::Canary)).unwrap();
        assert_eq!(session.status, RolloutStatus::Canary);
        assert_eq!(session.total_tenants, 250);
        assert_eq!(session.from_version.as_deref(), Some("1.0.0"));

        let jobs = f.queue.list_rollout_jobs(&session.id).unwrap();
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.wave_number == 0 && j.priority == 10));
        let summary = f.registry.get_version_summary(Component::Dashboard).unwrap();
        assert_eq!(summary.updating, 3);
    }

    #[test]
    fn small_fleet_canary_is_one_tenant() {
        let f = fleet(5, 3);
        let session = f.engine.initiate_rollout(request(RolloutStrategy::Staged)).unwrap();
        assert_eq!(f.queue.list_rollout_jobs(&session.id).unwrap().len(), 1);
    }

    #[test]
    fn second_rollout_for_same_component_is_refused() {
        let f = fleet(10, 3);
        f.engine.initiate_rollout(request(RolloutStrategy::Canary)).unwrap();
        assert!(matches!(
            f.engine.initiate_rollout(request(RolloutStrategy::Canary)),
            Err(RolloutError::ActiveRolloutExists { .. })
        ));

        let mut agent = request(RolloutStrategy::Canary);
        agent.component = Component::Agent;
        agent.to_version = "1.2.0".into();
        assert!(f.engine.initiate_rollout(agent).is_ok());
    }

    #[test]
    fn nothing_to_update_is_an_error() {
        let f = fleet(3, 3);
        let mut req = request(RolloutStrategy::Canary);
        req.to_version = "1.0.0".into();
        assert!(matches!(
            f.engine.initiate_rollout(req),
            Err(RolloutError::NoEligibleTenants { .. })
        ));
        assert!(f.engine.list_rollouts().unwrap().is_empty());
    }

    #[test]
    fn advance_waits_for_the_current_wave() {
        let f = fleet(20, 3);
        let session = f.engine.initiate_rollout(request(RolloutStrategy::Canary)).unwrap();
        assert_eq!(
            f.engine.advance_rollout(&session.id).unwrap(),
            AdvanceOutcome::WaveInProgress { wave: 0, outstanding: 1 }
        );
        assert_eq!(f.queue.list_rollout_jobs(&session.id).unwrap().len(), 1);
    }

    #[test]
    fn staged_rollout_walks_every_wave_and_excludes_updated_tenants() {
        let f = fleet(100, 3);
        let session = f.engine.initiate_rollout(request(RolloutStrategy::Staged)).unwrap();
        assert_eq!(drain(&f, true), 1);

        let expected = [
            (RolloutStatus::Wave1, 10), // ceil(10% of 99)
            (RolloutStatus::Wave2, 23), // ceil(25% of 89)
            (RolloutStatus::Wave3, 33), // ceil(50% of 66)
            (RolloutStatus::Wave4, 33),
        ];
        for (status, size) in expected {
            let outcome = f.engine.advance_rollout(&session.id).unwrap();
            assert!(
                matches!(outcome, AdvanceOutcome::Advanced { to, jobs_enqueued, .. } if to == status && jobs_enqueued == size),
                "unexpected {outcome:?} for {status}"
            );
            let jobs = f.queue.list_rollout_jobs(&session.id).unwrap();
            let tenants: std::collections::HashSet<_> = jobs.iter().map(|j| &j.tenant_id).collect();
            assert_eq!(tenants.len(), jobs.len(), "a tenant was enqueued twice");
            drain(&f, true);
        }

        assert_eq!(f.engine.advance_rollout(&session.id).unwrap(), AdvanceOutcome::Completed);
        let done = f.engine.get_rollout(&session.id).unwrap();
        assert_eq!(done.status, RolloutStatus::Completed);
        assert_eq!(done.updated_tenants, 100);
        assert!(f
            .registry
            .get_tenants_needing_update(Component::Dashboard, "1.1.0")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn advancing_a_completed_rollout_is_a_no_op() {
        let f = fleet(4, 3);
        let session = f.engine.initiate_rollout(request(RolloutStrategy::Immediate)).unwrap();
        drain(&f, true);
        assert_eq!(f.engine.advance_rollout(&session.id).unwrap(), AdvanceOutcome::Completed);

        let jobs_before = f.queue.list_rollout_jobs(&session.id).unwrap().len();
        let outcome = f.engine.advance_rollout(&session.id).unwrap();
        assert_eq!(outcome, AdvanceOutcome::Unchanged { status: RolloutStatus::Completed });
        assert_eq!(f.queue.list_rollout_jobs(&session.id).unwrap().len(), jobs_before);
    }

    #[test]
    fn immediate_rollout_is_one_full_wave() {
        let f = fleet(30, 3);
        let session = f.engine.initiate_rollout(request(RolloutStrategy::Immediate)).unwrap();
        assert_eq!(session.status, RolloutStatus::Wave4);
        let jobs = f.queue.list_rollout_jobs(&session.id).unwrap();
        assert_eq!(jobs.len(), 30);
        assert!(jobs.iter().all(|j| j.wave_number == 4));
    }

    #[test]
    fn round_trip_counts_updated_tenants() {
        let f = fleet(12, 3);
        let session = f.engine.initiate_rollout(request(RolloutStrategy::Immediate)).unwrap();
        assert_eq!(drain(&f, true), 12);
        assert_eq!(f.engine.get_rollout(&session.id).unwrap().updated_tenants, 12);
    }

    #[test]
    fn auto_halt_needs_a_minimum_sample() {
        let f = fleet(40, 1);
        let session = f.engine.initiate_rollout(request(RolloutStrategy::Immediate)).unwrap();

        for _ in 0..9 {
            let job = f.queue.claim_batch(1, "w").unwrap().remove(0);
            f.queue.report_job_failure(job.id, "boom").unwrap();
        }
        let decision = f.engine.should_auto_halt(&session.id).unwrap();
        assert!(!decision.halt);
        assert_eq!(decision.sample, 9);

        let job = f.queue.claim_batch(1, "w").unwrap().remove(0);
        f.queue.report_job_failure(job.id, "boom").unwrap();
        let decision = f.engine.should_auto_halt(&session.id).unwrap();
        assert!(decision.halt);
        assert_eq!(decision.wave, Some(4));
        assert_eq!(decision.threshold, 0.005);
    }

    #[test]
    fn healthy_wave_does_not_halt() {
        let f = fleet(20, 3);
        let session = f.engine.initiate_rollout(request(RolloutStrategy::Immediate)).unwrap();
        drain(&f, true);
        let decision = f.engine.should_auto_halt(&session.id).unwrap();
        assert!(!decision.halt);
        assert_eq!(decision.sample, 20);
    }

    #[test]
    fn pause_and_resume_restore_the_wave() {
        let f = fleet(10, 3);
        let session = f.engine.initiate_rollout(request(RolloutStrategy::Canary)).unwrap();
        drain(&f, true);

        let paused = f.engine.pause_rollout(&session.id, "ops", "investigating").unwrap();
        assert_eq!(paused.status, RolloutStatus::Paused);
        assert_eq!(paused.current_wave(), Some(0));
        assert_eq!(
            f.engine.advance_rollout(&session.id).unwrap(),
            AdvanceOutcome::Unchanged { status: RolloutStatus::Paused }
        );
        assert!(f.engine.pause_rollout(&session.id, "ops", "again").is_err());

        let resumed = f.engine.resume_rollout(&session.id, "ops").unwrap();
        assert_eq!(resumed.status, RolloutStatus::Canary);
        assert!(matches!(
            f.engine.advance_rollout(&session.id).unwrap(),
            AdvanceOutcome::Advanced { to: RolloutStatus::Wave1, .. }
        ));
    }

    #[test]
    fn resume_acknowledges_the_halted_wave_only() {
        let f = fleet(40, 1);
        let session = f.engine.initiate_rollout(request(RolloutStrategy::Immediate)).unwrap();
        for _ in 0..10 {
            let job = f.queue.claim_batch(1, "w").unwrap().remove(0);
            f.queue.report_job_failure(job.id, "boom").unwrap();
        }
        let decision = f.engine.should_auto_halt(&session.id).unwrap();
        assert!(decision.halt);
        f.engine.pause_rollout(&session.id, "control-loop", &decision.reason).unwrap();

        let resumed = f.engine.resume_rollout(&session.id, "ops").unwrap();
        assert_eq!(resumed.status, RolloutStatus::Wave4);
        assert_eq!(resumed.metadata.acknowledged_wave, Some(4));
        let decision = f.engine.should_auto_halt(&session.id).unwrap();
        assert!(!decision.halt, "{decision:?}");
        assert!(decision.reason.contains("acknowledged"));

        // Resuming does not leave the rollout stuck on the wave it accepted.
        drain(&f, true);
        assert_eq!(f.engine.advance_rollout(&session.id).unwrap(), AdvanceOutcome::Completed);
    }

    #[test]
    fn later_waves_are_still_evaluated_after_a_resume() {
        let f = fleet(100, 1);
        let mut req = request(RolloutStrategy::Staged);
        req.canary_percentage = Some(10.0);
        let session = f.engine.initiate_rollout(req).unwrap();
        drain(&f, false);
        assert!(f.engine.should_auto_halt(&session.id).unwrap().halt);
        f.engine.pause_rollout(&session.id, "control-loop", "canary failing").unwrap();
        f.engine.resume_rollout(&session.id, "ops").unwrap();
        assert!(!f.engine.should_auto_halt(&session.id).unwrap().halt);

        assert!(matches!(
            f.engine.advance_rollout(&session.id).unwrap(),
            AdvanceOutcome::Advanced { to: RolloutStatus::Wave1, .. }
        ));
        drain(&f, false);
        let decision = f.engine.should_auto_halt(&session.id).unwrap();
        assert!(decision.halt, "{decision:?}");
        assert_eq!(decision.wave, Some(1));
    }

    #[test]
    fn out_of_range_overrides_are_rejected() {
        let f = fleet(50, 3);
        for pct in [0.0, 100.0, 150.0, -1.0, f64::NAN] {
            let mut req = request(RolloutStrategy::Canary);
            req.canary_percentage = Some(pct);
            assert!(
                matches!(f.engine.initiate_rollout(req), Err(RolloutError::InvalidRequest(_))),
                "canary {pct} accepted"
            );
        }
        for threshold in [1.0, 5.0, -0.1, f64::NAN] {
            let mut req = request(RolloutStrategy::Staged);
            req.error_threshold = Some(threshold);
            assert!(
                matches!(f.engine.initiate_rollout(req), Err(RolloutError::InvalidRequest(_))),
                "threshold {threshold} accepted"
            );
        }
        assert!(f.engine.list_rollouts().unwrap().is_empty());

        let mut req = request(RolloutStrategy::Canary);
        req.canary_percentage = Some(20.0);
        req.error_threshold = Some(0.05);
        let session = f.engine.initiate_rollout(req).unwrap();
        assert_eq!(session.error_threshold, 0.05);
        assert_eq!(f.queue.list_rollout_jobs(&session.id).unwrap().len(), 10);
    }

    #[test]
    fn abort_cancels_jobs_and_releases_tenants() {
        let f = fleet(10, 3);
        let session = f.engine.initiate_rollout(request(RolloutStrategy::Immediate)).unwrap();
        let claimed = f.queue.claim_batch(2, "w").unwrap();
        f.registry
            .record_version_update(&claimed[0].tenant_id, Component::Dashboard, "1.1.0")
            .unwrap();
        f.queue.report_job_success(claimed[0].id).unwrap();

        let aborted = f.engine.abort_rollout(&session.id, "ops", "bad build").unwrap();
        assert_eq!(aborted.status, RolloutStatus::Aborted);
        assert_eq!(aborted.abort_reason.as_deref(), Some("bad build"));

        let stats = f.queue.get_queue_stats(Some(&session.id)).unwrap();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.rolled_back, 9);
        let summary = f.registry.get_version_summary(Component::Dashboard).unwrap();
        assert_eq!(summary.updating, 0);
        assert!(f.engine.active_rollout_for(Component::Dashboard).unwrap().is_none());
        assert!(f.engine.abort_rollout(&session.id, "ops", "again").is_err());

        let history = f.store.list_history_for_rollout(&session.id).unwrap();
        assert_eq!(history.last().unwrap().action, HistoryAction::RolloutAborted);
        assert_eq!(history.last().unwrap().affected_tenants, 9);
    }
}
