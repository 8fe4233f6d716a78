//! Control loop — the scheduler that drives rollouts forward.
//!
//! Each tick evaluates every active rollout: an auto-halt signal pauses the
//! rollout, otherwise it is advanced (a no-op while its wave is still
//! draining). Jobs stuck in `processing` past the stale bound are
//! requeued as failed attempts.

use std::time::Duration;

use fleet_core::FleetConfig;
use fleet_queue::UpdateQueue;
use fleet_rollout::{AdvanceOutcome, RolloutEngine};
use fleet_state::{epoch_secs, RolloutStatus, StateStore};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const ACTOR: &str = "control-loop";

/// What one tick did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub evaluated: usize,
    pub advanced: usize,
    pub completed: usize,
    pub paused: usize,
    pub requeued: u64,
}

pub struct ControlLoop {
    engine: RolloutEngine,
    queue: UpdateQueue,
    interval: Duration,
    stale_after_secs: u64,
    auto_advance: bool,
}

impl ControlLoop {
    pub fn new(store: StateStore, config: &FleetConfig) -> Self {
        Self {
            engine: RolloutEngine::from_config(store.clone(), config),
            queue: UpdateQueue::new(store),
            interval: Duration::from_secs(config.rollout.control_interval_secs),
            stale_after_secs: config.queue.stale_after_secs,
            auto_advance: config.rollout.auto_advance,
        }
    }

    /// One pass over the active rollouts. A failure on one rollout is
    /// logged and does not stop the others.
    pub fn tick(&self) -> anyhow::Result<TickReport> {
        let mut report = TickReport {
            requeued: self.queue.requeue_stale(self.stale_after_secs, epoch_secs())?,
            ..Default::default()
        };
        if report.requeued > 0 {
            warn!(jobs = report.requeued, "requeued stale processing jobs");
        }

        for session in self.engine.list_active_rollouts()? {
            if session.status == RolloutStatus::Paused {
                continue;
            }
            report.evaluated += 1;

            let decision = match self.engine.should_auto_halt(&session.id) {
                Ok(d) => d,
                Err(e) => {
                    error!(rollout = %session.id, error = %e, "auto-halt evaluation failed");
                    continue;
                }
            };
            if decision.halt {
                match self.engine.pause_rollout(&session.id, ACTOR, &decision.reason) {
                    Ok(_) => {
                        warn!(
                            rollout = %session.id,
                            component = %session.component,
                            error_rate = decision.error_rate,
                            threshold = decision.threshold,
                            "rollout auto-halted"
                        );
                        report.paused += 1;
                    }
                    Err(e) => error!(rollout = %session.id, error = %e, "failed to pause rollout"),
                }
                continue;
            }

            if !self.auto_advance {
                continue;
            }
            match self.engine.advance_rollout(&session.id) {
                Ok(AdvanceOutcome::Advanced { .. }) => report.advanced += 1,
                Ok(AdvanceOutcome::Completed) => report.completed += 1,
                Ok(outcome) => debug!(rollout = %session.id, ?outcome, "rollout not advanced"),
                Err(e) => error!(rollout = %session.id, error = %e, "failed to advance rollout"),
            }
        }
        Ok(report)
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            auto_advance = self.auto_advance,
            "control loop started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    match self.tick() {
                        Ok(report) if report != TickReport::default() => {
                            info!(?report, "control loop tick")
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "control loop tick failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("control loop shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::Component;
    use fleet_registry::VersionRegistry;
    use fleet_rollout::RolloutRequest;
    use fleet_state::{RolloutStrategy, UpdateStatus};

    fn setup(tenants: usize) -> (StateStore, ControlLoop, RolloutEngine) {
        let store = StateStore::open_in_memory().unwrap();
        let registry = VersionRegistry::new(store.clone());
        for i in 0..tenants {
            registry
                .register_tenant(&format!("t{i:03}"), &[(Component::Dashboard, "1.0.0")])
                .unwrap();
        }
        let config = FleetConfig::default();
        let engine = RolloutEngine::from_config(store.clone(), &config);
        (store.clone(), ControlLoop::new(store, &config), engine)
    }

    fn start(engine: &RolloutEngine, strategy: RolloutStrategy) -> String {
        engine
            .initiate_rollout(RolloutRequest {
                component: Component::Dashboard,
                to_version: "1.1.0".into(),
                strategy,
                initiated_by: "ops".into(),
                error_threshold: None,
                canary_percentage: None,
            })
            .unwrap()
            .id
    }

    /// Claim and settle every queued job.
    fn settle(store: &StateStore, succeed: bool) {
        let queue = UpdateQueue::new(store.clone());
        let registry = VersionRegistry::new(store.clone());
        loop {
            let batch = queue.claim_batch(100, "w").unwrap();
            if batch.is_empty() {
                return;
            }
            for job in batch {
                if succeed {
                    registry
                        .record_version_update(&job.tenant_id, job.component, &job.to_version)
                        .unwrap();
                    queue.report_job_success(job.id).unwrap();
                } else {
                    registry.set_update_status(&job.tenant_id, UpdateStatus::Failed).unwrap();
                    queue.report_job_failure(job.id, "boom").unwrap();
                }
            }
        }
    }

    #[test]
    fn tick_waits_for_the_wave_then_advances() {
        let (store, control, engine) = setup(50);
        let id = start(&engine, RolloutStrategy::Staged);

        let report = control.tick().unwrap();
        assert_eq!(report.evaluated, 1);
        assert_eq!(report.advanced, 0);

        settle(&store, true);
        let report = control.tick().unwrap();
        assert_eq!(report.advanced, 1);
        assert_eq!(engine.get_rollout(&id).unwrap().status, RolloutStatus::Wave1);
    }

    #[test]
    fn tick_drives_immediate_rollout_to_completion() {
        let (store, control, engine) = setup(5);
        let id = start(&engine, RolloutStrategy::Immediate);
        settle(&store, true);
        let report = control.tick().unwrap();
        assert_eq!(report.completed, 1);
        assert_eq!(engine.get_rollout(&id).unwrap().status, RolloutStatus::Completed);
        assert_eq!(control.tick().unwrap(), TickReport::default());
    }

    #[test]
    fn failing_wave_is_paused_not_advanced() {
        let (store, control, engine) = setup(20);
        let id = start(&engine, RolloutStrategy::Immediate);
        // Retries are claimed again within the same settle pass.
        settle(&store, false);
        let report = control.tick().unwrap();
        assert_eq!(report.paused, 1);
        assert_eq!(report.advanced + report.completed, 0);
        let session = engine.get_rollout(&id).unwrap();
        assert_eq!(session.status, RolloutStatus::Paused);
        assert_eq!(session.metadata.paused_from, Some(RolloutStatus::Wave4));

        // Paused rollouts are skipped on later ticks.
        assert_eq!(control.tick().unwrap().evaluated, 0);
    }

    #[test]
    fn operator_resume_after_auto_halt_sticks() {
        let (store, control, engine) = setup(20);
        let id = start(&engine, RolloutStrategy::Immediate);
        settle(&store, false);
        assert_eq!(control.tick().unwrap().paused, 1);

        engine.resume_rollout(&id, "oncall").unwrap();
        let report = control.tick().unwrap();
        assert_eq!(report.paused, 0);
        assert_eq!(report.completed, 1);
        let session = engine.get_rollout(&id).unwrap();
        assert_eq!(session.status, RolloutStatus::Completed);
        assert_eq!(session.metadata.acknowledged_wave, Some(4));
    }
}
