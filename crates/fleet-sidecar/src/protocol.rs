//! Blue-green swap state machine.
//!
//! ```text
//! preparing → pulling_image → completing_operations → saving_checkpoint
//!   → ready_for_swap → swapping → health_checking → completed
//!                                       │
//!                                       ├─ unhealthy + auto-rollback → rolled_back
//!                                       └─ any command error         → failed
//! ```
//!
//! Each step is persisted as it is entered. Terminal states remove the
//! in-flight record and archive the full timeline into the history log.

use std::time::Duration;

use fleet_core::config::SidecarConfig;
use fleet_registry::VersionRegistry;
use fleet_state::*;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::checker::wait_until_healthy;
use crate::control::TenantControl;
use crate::error::SidecarResult;

/// Bounds on the two long waits of a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapTimeouts {
    pub drain: Duration,
    pub health: Duration,
    pub health_poll: Duration,
}

impl SwapTimeouts {
    pub fn from_config(config: &SidecarConfig) -> Self {
        Self {
            drain: Duration::from_secs(config.drain_timeout_secs),
            health: Duration::from_secs(config.health_timeout_secs),
            health_poll: Duration::from_millis(config.health_poll_interval_ms),
        }
    }
}

pub struct SidecarProtocol<C> {
    control: C,
    store: StateStore,
    registry: VersionRegistry,
    timeouts: SwapTimeouts,
    auto_rollback: bool,
}

impl<C: TenantControl> SidecarProtocol<C> {
    pub fn new(control: C, store: StateStore, config: &SidecarConfig) -> Self {
        Self {
            control,
            registry: VersionRegistry::new(store.clone()),
            store,
            timeouts: SwapTimeouts::from_config(config),
            auto_rollback: config.auto_rollback_on_health_failure,
        }
    }

    pub fn with_timeouts(mut self, timeouts: SwapTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn control(&self) -> &C {
        &self.control
    }

    /// Run the swap for one claimed agent job to a terminal state.
    ///
    /// Command failures, drain timeouts and failed health gates are
    /// outcomes, not errors: the returned state's `step` is `completed`,
    /// `failed` or `rolled_back`. `Err` means the outcome could not be
    /// recorded in the store.
    pub async fn execute(&self, job: &QueueJob) -> SidecarResult<SidecarSwapState> {
        let tenant = job.tenant_id.as_str();
        let mut state = SidecarSwapState::new(
            tenant,
            job.id,
            job.from_version.as_deref(),
            &job.to_version,
            epoch_millis(),
        );
        self.persist(&state)?;
        info!(
            %tenant,
            job = job.id,
            from = job.from_version.as_deref().unwrap_or("-"),
            to = %job.to_version,
            "sidecar swap started"
        );

        self.step(&mut state, SwapStep::PullingImage)?;
        if let Err(e) = self.control.pull_image(tenant, &job.to_version).await {
            return self.fail(state, job, format!("pull image: {e}"));
        }

        self.step(&mut state, SwapStep::CompletingOperations)?;
        let drain = self.timeouts.drain;
        match tokio::time::timeout(drain, self.control.prepare_for_update(tenant, drain)).await {
            Ok(Ok(report)) if !report.drained => warn!(
                %tenant,
                in_flight = report.in_flight,
                "agent did not fully drain, proceeding"
            ),
            Ok(Ok(_)) => debug!(%tenant, "agent drained"),
            Ok(Err(e)) => return self.fail(state, job, format!("prepare for update: {e}")),
            Err(_) => warn!(%tenant, timeout_secs = drain.as_secs(), "drain wait timed out, proceeding"),
        }

        self.step(&mut state, SwapStep::SavingCheckpoint)?;
        match self.control.save_checkpoint(tenant).await {
            Ok(location) => state.checkpoint = Some(location),
            Err(e) => return self.fail(state, job, format!("save checkpoint: {e}")),
        }

        self.step(&mut state, SwapStep::ReadyForSwap)?;
        self.step(&mut state, SwapStep::Swapping)?;
        if let Err(e) = self.control.swap_to(tenant, &job.to_version).await {
            return self.recover(state, job, format!("swap: {e}")).await;
        }

        self.step(&mut state, SwapStep::HealthChecking)?;
        let wait = wait_until_healthy(
            &self.control,
            tenant,
            self.timeouts.health,
            self.timeouts.health_poll,
        )
        .await;
        if !wait.healthy {
            let reason = format!(
                "not healthy after {} probes in {}ms (last: {:?})",
                wait.probes,
                wait.elapsed.as_millis(),
                wait.last
            );
            return self.recover(state, job, reason).await;
        }

        let now = epoch_millis();
        state.downtime_ms = state.entered_at(SwapStep::Swapping).map(|t| now.saturating_sub(t));
        state.enter(SwapStep::Completed, now);
        self.registry
            .record_version_update(tenant, job.component, &job.to_version)?;
        self.archive(&state, job, HistoryAction::SidecarSwapCompleted)?;
        info!(
            %tenant,
            version = %job.to_version,
            downtime_ms = state.downtime_ms.unwrap_or(0),
            "sidecar swap completed"
        );
        Ok(state)
    }

    /// Enter a step and persist it.
    fn step(&self, state: &mut SidecarSwapState, step: SwapStep) -> SidecarResult<()> {
        state.enter(step, epoch_millis());
        self.persist(state)?;
        debug!(tenant = %state.tenant_id, ?step, "swap step");
        Ok(())
    }

    fn persist(&self, state: &SidecarSwapState) -> SidecarResult<()> {
        self.store.write(|tx| tx.put_swap(state))?;
        Ok(())
    }

    /// After the new agent was (maybe) started: swap back if allowed.
    async fn recover(
        &self,
        mut state: SidecarSwapState,
        job: &QueueJob,
        reason: String,
    ) -> SidecarResult<SidecarSwapState> {
        if !self.auto_rollback {
            return self.fail(state, job, reason);
        }
        let Some(previous) = job.from_version.as_deref() else {
            return self.fail(state, job, format!("{reason}; no previous version to roll back to"));
        };

        warn!(tenant = %job.tenant_id, %previous, %reason, "rolling back sidecar");
        if let Err(e) = self.control.swap_to(&job.tenant_id, previous).await {
            return self.fail(state, job, format!("{reason}; rollback to {previous} failed: {e}"));
        }

        let now = epoch_millis();
        state.downtime_ms = state.entered_at(SwapStep::Swapping).map(|t| now.saturating_sub(t));
        state.error = Some(reason);
        state.enter(SwapStep::RolledBack, now);
        self.registry
            .set_update_status(&job.tenant_id, UpdateStatus::Failed)?;
        self.archive(&state, job, HistoryAction::SidecarRolledBack)?;
        Ok(state)
    }

    fn fail(
        &self,
        mut state: SidecarSwapState,
        job: &QueueJob,
        reason: String,
    ) -> SidecarResult<SidecarSwapState> {
        warn!(tenant = %job.tenant_id, step = ?state.step, %reason, "sidecar swap failed");
        state.error = Some(reason);
        state.enter(SwapStep::Failed, epoch_millis());
        self.registry
            .set_update_status(&job.tenant_id, UpdateStatus::Failed)?;
        self.archive(&state, job, HistoryAction::TenantUpdateFailed)?;
        Ok(state)
    }

    /// Drop the in-flight record and write the timeline to history.
    fn archive(
        &self,
        state: &SidecarSwapState,
        job: &QueueJob,
        action: HistoryAction,
    ) -> SidecarResult<()> {
        self.store.write(|tx| {
            tx.delete_swap(&state.tenant_id, state.job_id)?;
            let mut entry = UpdateHistoryEntry::new(action, "sidecar")
                .rollout(&job.rollout_id)
                .tenant(&state.tenant_id)
                .component(job.component)
                .versions(state.from_version.as_deref(), &state.to_version)
                .affected(1)
                .details(json!({
                    "job_id": state.job_id,
                    "final_step": state.step,
                    "timeline": state.timeline,
                    "checkpoint": state.checkpoint,
                    "downtime_ms": state.downtime_ms,
                }));
            if let Some(error) = &state.error {
                entry = entry.reason(error);
            }
            tx.append_history(entry)
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::ProbeResult;
    use crate::control::DrainReport;
    use crate::error::{ControlError, ControlResult};
    use fleet_core::Component;
    use std::sync::Mutex;

    /// In-process agent: reports unhealthy while running `broken`.
    #[derive(Default)]
    struct FakeAgent {
        running: Mutex<String>,
        broken: Option<String>,
        fail_pull: bool,
        hang_drain: bool,
        calls: Mutex<Vec<String>>,
    }

    impl FakeAgent {
        fn on(version: &str) -> Self {
            Self {
                running: Mutex::new(version.to_string()),
                ..Default::default()
            }
        }

        fn log(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn running(&self) -> String {
            self.running.lock().unwrap().clone()
        }
    }

    impl TenantControl for FakeAgent {
        async fn pull_image(&self, _: &str, version: &str) -> ControlResult<()> {
            self.log(format!("pull {version}"));
            if self.fail_pull {
                return Err(ControlError::Status {
                    path: "/update/pull".into(),
                    status: 404,
                    body: "no such image".into(),
                });
            }
            Ok(())
        }

        async fn prepare_for_update(&self, _: &str, _: Duration) -> ControlResult<DrainReport> {
            self.log("prepare".into());
            if self.hang_drain {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok(DrainReport {
                drained: true,
                in_flight: 0,
            })
        }

        async fn save_checkpoint(&self, tenant: &str) -> ControlResult<String> {
            self.log("checkpoint".into());
            Ok(format!("/var/lib/agent/{tenant}.ckpt"))
        }

        async fn swap_to(&self, _: &str, version: &str) -> ControlResult<()> {
            self.log(format!("swap {version}"));
            *self.running.lock().unwrap() = version.to_string();
            Ok(())
        }

        async fn poll_health(&self, _: &str) -> ProbeResult {
            if self.broken.as_deref() == Some(self.running().as_str()) {
                ProbeResult::Unhealthy
            } else {
                ProbeResult::Healthy
            }
        }
    }

    fn setup(agent: FakeAgent, auto_rollback: bool) -> (StateStore, SidecarProtocol<FakeAgent>, QueueJob) {
        let store = StateStore::open_in_memory().unwrap();
        let registry = VersionRegistry::new(store.clone());
        registry
            .register_tenant("t1", &[(Component::Agent, "1.1.0")])
            .unwrap();
        registry.mark_updating(&["t1".to_string()]).unwrap();

        let config = SidecarConfig {
            auto_rollback_on_health_failure: auto_rollback,
            ..Default::default()
        };
        let protocol = SidecarProtocol::new(agent, store.clone(), &config).with_timeouts(SwapTimeouts {
            drain: Duration::from_millis(50),
            health: Duration::from_millis(100),
            health_poll: Duration::from_millis(10),
        });
        let job = QueueJob {
            id: 7,
            rollout_id: "r1".into(),
            tenant_id: "t1".into(),
            component: Component::Agent,
            from_version: Some("1.1.0".into()),
            to_version: "1.2.0".into(),
            priority: 10,
            status: JobStatus::Processing,
            attempt_count: 0,
            max_attempts: 3,
            wave_number: 0,
            error_message: None,
            enqueue_seq: 1,
            queued_at: 0,
            started_at: Some(0),
            completed_at: None,
            worker_id: Some("w".into()),
        };
        (store, protocol, job)
    }

    #[tokio::test]
    async fn healthy_swap_completes_and_records_version() {
        let (store, protocol, job) = setup(FakeAgent::on("1.1.0"), true);
        let state = protocol.execute(&job).await.unwrap();

        assert_eq!(state.step, SwapStep::Completed);
        assert!(state.downtime_ms.is_some());
        assert_eq!(state.checkpoint.as_deref(), Some("/var/lib/agent/t1.ckpt"));
        let steps: Vec<SwapStep> = state.timeline.iter().map(|r| r.step).collect();
        assert_eq!(
            steps,
            vec![
                SwapStep::Preparing,
                SwapStep::PullingImage,
                SwapStep::CompletingOperations,
                SwapStep::SavingCheckpoint,
                SwapStep::ReadyForSwap,
                SwapStep::Swapping,
                SwapStep::HealthChecking,
                SwapStep::Completed,
            ]
        );

        let row = store.get_tenant("t1").unwrap().unwrap();
        assert_eq!(row.version(Component::Agent), Some("1.2.0"));
        assert_eq!(row.update_status, UpdateStatus::Current);
        assert!(store.list_swaps().unwrap().is_empty());
        let history = store.list_history(5).unwrap();
        assert!(history.iter().any(|h| h.action == HistoryAction::SidecarSwapCompleted));
    }

    #[tokio::test]
    async fn unhealthy_swap_rolls_back_to_previous_version() {
        let agent = FakeAgent {
            broken: Some("1.2.0".into()),
            ..FakeAgent::on("1.1.0")
        };
        let (store, protocol, job) = setup(agent, true);
        let state = protocol.execute(&job).await.unwrap();

        assert_eq!(state.step, SwapStep::RolledBack);
        assert!(state.error.as_deref().unwrap().contains("not healthy"));
        assert_eq!(protocol.control().running(), "1.1.0");

        let row = store.get_tenant("t1").unwrap().unwrap();
        assert_eq!(row.version(Component::Agent), Some("1.1.0"));
        assert_eq!(row.update_status, UpdateStatus::Failed);

        let history = store.list_history(5).unwrap();
        let entry = history
            .iter()
            .find(|h| h.action == HistoryAction::SidecarRolledBack)
            .unwrap();
        assert_eq!(entry.tenant_id.as_deref(), Some("t1"));
        assert!(entry.reason.is_some());
        assert!(store.list_swaps().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unhealthy_swap_without_auto_rollback_fails_in_place() {
        let agent = FakeAgent {
            broken: Some("1.2.0".into()),
            ..FakeAgent::on("1.1.0")
        };
        let (store, protocol, job) = setup(agent, false);
        let state = protocol.execute(&job).await.unwrap();

        assert_eq!(state.step, SwapStep::Failed);
        assert_eq!(protocol.control().running(), "1.2.0");
        let row = store.get_tenant("t1").unwrap().unwrap();
        assert_eq!(row.version(Component::Agent), Some("1.1.0"));
        assert_eq!(row.update_status, UpdateStatus::Failed);
    }

    #[tokio::test]
    async fn pull_failure_never_touches_the_running_agent() {
        let agent = FakeAgent {
            fail_pull: true,
            ..FakeAgent::on("1.1.0")
        };
        let (_, protocol, job) = setup(agent, true);
        let state = protocol.execute(&job).await.unwrap();

        assert_eq!(state.step, SwapStep::Failed);
        assert!(state.error.as_deref().unwrap().starts_with("pull image"));
        let calls = protocol.control().calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["pull 1.2.0"]);
    }

    #[tokio::test]
    async fn drain_timeout_proceeds_with_the_swap() {
        let agent = FakeAgent {
            hang_drain: true,
            ..FakeAgent::on("1.1.0")
        };
        let (_, protocol, job) = setup(agent, true);
        let state = protocol.execute(&job).await.unwrap();
        assert_eq!(state.step, SwapStep::Completed);
    }
}
