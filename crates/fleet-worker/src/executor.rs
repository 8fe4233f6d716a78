//! Per-component update procedures.

use fleet_core::config::SidecarConfig;
use fleet_core::Component;
use fleet_registry::VersionRegistry;
use fleet_sidecar::{wait_until_healthy, SidecarProtocol, SwapTimeouts, TenantControl};
use fleet_state::*;
use serde_json::json;
use tracing::{error, info, warn};

use crate::error::WorkerResult;

/// How one job attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed { error: String },
}

pub struct Executor<C> {
    protocol: SidecarProtocol<C>,
    store: StateStore,
    registry: VersionRegistry,
    timeouts: SwapTimeouts,
}

impl<C: TenantControl> Executor<C> {
    pub fn new(control: C, store: StateStore, config: &SidecarConfig) -> Self {
        Self {
            protocol: SidecarProtocol::new(control, store.clone(), config),
            registry: VersionRegistry::new(store.clone()),
            store,
            timeouts: SwapTimeouts::from_config(config),
        }
    }

    pub fn with_timeouts(mut self, timeouts: SwapTimeouts) -> Self {
        self.protocol = self.protocol.with_timeouts(timeouts);
        self.timeouts = timeouts;
        self
    }

    pub fn control(&self) -> &C {
        self.protocol.control()
    }

    /// Run one attempt of a claimed job. Never panics or propagates:
    /// anything unexpected becomes a `Failed` outcome.
    pub async fn execute(&self, job: &QueueJob) -> JobOutcome {
        match job.component {
            Component::Agent => match self.protocol.execute(job).await {
                Ok(state) if state.step == SwapStep::Completed => JobOutcome::Succeeded,
                Ok(state) => JobOutcome::Failed {
                    error: state
                        .error
                        .unwrap_or_else(|| format!("swap ended in {:?}", state.step)),
                },
                Err(e) => {
                    error!(job = job.id, tenant = %job.tenant_id, error = %e, "sidecar protocol error");
                    JobOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            },
            Component::Dashboard | Component::Workflow(_) => match self.direct_update(job).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(job = job.id, tenant = %job.tenant_id, error = %e, "update bookkeeping failed");
                    JobOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            },
        }
    }

    /// Pull, swap, and wait for health; no drain or checkpoint.
    async fn direct_update(&self, job: &QueueJob) -> WorkerResult<JobOutcome> {
        let control = self.protocol.control();
        let tenant = job.tenant_id.as_str();

        let failure = if let Err(e) = control.pull_image(tenant, &job.to_version).await {
            Some(format!("pull image: {e}"))
        } else if let Err(e) = control.swap_to(tenant, &job.to_version).await {
            Some(format!("swap: {e}"))
        } else {
            let wait =
                wait_until_healthy(control, tenant, self.timeouts.health, self.timeouts.health_poll)
                    .await;
            (!wait.healthy).then(|| format!("not healthy after {} probes", wait.probes))
        };

        match failure {
            None => {
                self.registry
                    .record_version_update(tenant, job.component, &job.to_version)?;
                info!(%tenant, component = %job.component, version = %job.to_version, "tenant updated");
                Ok(JobOutcome::Succeeded)
            }
            Some(error) => {
                warn!(%tenant, component = %job.component, %error, "tenant update failed");
                self.registry
                    .set_update_status(tenant, UpdateStatus::Failed)?;
                self.store
                    .write(|tx| {
                        tx.append_history(
                            UpdateHistoryEntry::new(HistoryAction::TenantUpdateFailed, "worker")
                                .rollout(&job.rollout_id)
                                .tenant(tenant)
                                .component(job.component)
                                .versions(job.from_version.as_deref(), &job.to_version)
                                .affected(1)
                                .reason(&error)
                                .details(json!({ "job_id": job.id, "attempt": job.attempt_count + 1 })),
                        )
                    })?;
                Ok(JobOutcome::Failed { error })
            }
        }
    }
}
