//! Worker loop — claim, execute, report.

use std::sync::Arc;
use std::time::Duration;

use fleet_core::config::QueueConfig;
use fleet_queue::{FailureOutcome, QueueError, UpdateQueue};
use fleet_sidecar::TenantControl;
use fleet_state::{QueueJob, StateStore};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::WorkerResult;
use crate::executor::{Executor, JobOutcome};

pub struct Worker<C> {
    id: String,
    queue: UpdateQueue,
    executor: Arc<Executor<C>>,
    batch_size: usize,
    poll_interval: Duration,
}

impl<C: TenantControl + 'static> Worker<C> {
    pub fn new(id: &str, store: StateStore, executor: Arc<Executor<C>>, config: &QueueConfig) -> Self {
        Self {
            id: id.to_string(),
            queue: UpdateQueue::new(store),
            executor,
            batch_size: config.batch_size,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn executor(&self) -> &Executor<C> {
        &self.executor
    }

    /// Claim one batch, run it to completion, and report every outcome.
    /// Returns the number of jobs processed.
    pub async fn run_once(&self) -> WorkerResult<usize> {
        let batch = self.queue.claim_batch(self.batch_size, &self.id)?;
        if batch.is_empty() {
            return Ok(0);
        }
        debug!(worker = %self.id, jobs = batch.len(), "batch claimed");

        let mut tasks = JoinSet::new();
        for job in batch {
            let executor = Arc::clone(&self.executor);
            tasks.spawn(async move {
                let outcome = executor.execute(&job).await;
                (job, outcome)
            });
        }

        let mut processed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((job, outcome)) => {
                    self.report(&job, outcome);
                    processed += 1;
                }
                // The job stays `processing` until stale recovery requeues it.
                Err(e) => error!(worker = %self.id, error = %e, "update task panicked"),
            }
        }
        Ok(processed)
    }

    /// Report an outcome. A job cancelled while it ran can no longer be
    /// reported; that is logged, not treated as an error.
    fn report(&self, job: &QueueJob, outcome: JobOutcome) {
        let result = match outcome {
            JobOutcome::Succeeded => self.queue.report_job_success(job.id).map(|_| ()),
            JobOutcome::Failed { error } => {
                self.queue
                    .report_job_failure(job.id, &error)
                    .map(|outcome| match outcome {
                        FailureOutcome::Retrying { attempt } => {
                            debug!(job = job.id, attempt, "job will be retried")
                        }
                        FailureOutcome::Failed => {
                            warn!(job = job.id, tenant = %job.tenant_id, "job failed permanently")
                        }
                    })
            }
        };
        match result {
            Ok(()) => {}
            Err(QueueError::InvalidTransition { from, .. }) => {
                info!(job = job.id, status = ?from, "job was cancelled while running")
            }
            Err(e) => error!(worker = %self.id, job = job.id, error = %e, "failed to report job"),
        }
    }

    /// Process batches until `shutdown` flips. Sleeps `poll_interval` when
    /// the queue is empty or the store is unavailable.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.id, batch_size = self.batch_size, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_once().await {
                Ok(n) if n > 0 => continue,
                Ok(_) => {}
                Err(e) => error!(worker = %self.id, error = %e, "claim failed"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!(worker = %self.id, "worker shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::config::SidecarConfig;
    use fleet_core::Component;
    use fleet_queue::WaveSpec;
    use fleet_registry::VersionRegistry;
    use fleet_sidecar::{ControlResult, DrainReport, ProbeResult, SwapTimeouts};
    use fleet_state::{JobStatus, UpdateStatus};

    /// Control endpoint where every tenant named in `unreachable` refuses
    /// connections.
    struct Fake {
        unreachable: Vec<String>,
    }

    impl TenantControl for Fake {
        async fn pull_image(&self, tenant: &str, _: &str) -> ControlResult<()> {
            if self.unreachable.iter().any(|t| t == tenant) {
                return Err(fleet_sidecar::ControlError::Connect {
                    address: tenant.to_string(),
                    reason: "connection refused".into(),
                });
            }
            Ok(())
        }
        async fn prepare_for_update(&self, _: &str, _: Duration) -> ControlResult<DrainReport> {
            Ok(DrainReport {
                drained: true,
                in_flight: 0,
            })
        }
        async fn save_checkpoint(&self, _: &str) -> ControlResult<String> {
            Ok("ckpt".into())
        }
        async fn swap_to(&self, _: &str, _: &str) -> ControlResult<()> {
            Ok(())
        }
        async fn poll_health(&self, _: &str) -> ProbeResult {
            ProbeResult::Healthy
        }
    }

    fn worker(store: &StateStore, unreachable: &[&str]) -> Worker<Fake> {
        let executor = Executor::new(
            Fake {
                unreachable: unreachable.iter().map(|s| s.to_string()).collect(),
            },
            store.clone(),
            &SidecarConfig::default(),
        )
        .with_timeouts(SwapTimeouts {
            drain: Duration::from_millis(50),
            health: Duration::from_millis(100),
            health_poll: Duration::from_millis(10),
        });
        let config = QueueConfig {
            batch_size: 4,
            poll_interval_ms: 10,
            ..Default::default()
        };
        Worker::new("w1", store.clone(), Arc::new(executor), &config)
    }

    fn seed(store: &StateStore, component: Component, tenants: &[&str], max_attempts: u32) {
        let registry = VersionRegistry::new(store.clone());
        let mut pairs = Vec::new();
        for t in tenants {
            registry
                .register_tenant(t, &[(component, "1.0.0")])
                .unwrap();
            pairs.push((t.to_string(), Some("1.0.0".to_string())));
        }
        UpdateQueue::new(store.clone())
            .enqueue_wave(
                &WaveSpec {
                    rollout_id: "r1",
                    component,
                    to_version: "1.1.0",
                    priority: 10,
                    wave_number: 0,
                    max_attempts,
                },
                &pairs,
            )
            .unwrap();
    }

    #[tokio::test]
    async fn successful_jobs_update_the_registry() {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store, Component::Dashboard, &["a", "b", "c"], 3);
        let w = worker(&store, &[]);

        assert_eq!(w.run_once().await.unwrap(), 3);
        assert_eq!(w.run_once().await.unwrap(), 0);
        for t in ["a", "b", "c"] {
            let row = store.get_tenant(t).unwrap().unwrap();
            assert_eq!(row.version(Component::Dashboard), Some("1.1.0"));
            assert_eq!(row.update_status, UpdateStatus::Current);
        }
    }

    #[tokio::test]
    async fn failures_are_retried_then_recorded() {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store, Component::Agent, &["ok", "down"], 2);
        let w = worker(&store, &["down"]);

        assert_eq!(w.run_once().await.unwrap(), 2);
        assert_eq!(w.run_once().await.unwrap(), 1);
        assert_eq!(w.run_once().await.unwrap(), 0);

        let jobs = store.list_jobs_for_rollout("r1").unwrap();
        let down = jobs.iter().find(|j| j.tenant_id == "down").unwrap();
        assert_eq!(down.status, JobStatus::Failed);
        assert_eq!(down.attempt_count, 2);
        assert!(down.error_message.as_deref().unwrap().contains("connection refused"));
        let row = store.get_tenant("down").unwrap().unwrap();
        assert_eq!(row.update_status, UpdateStatus::Failed);
        assert_eq!(row.version(Component::Agent), Some("1.0.0"));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let store = StateStore::open_in_memory().unwrap();
        seed(&store, Component::Dashboard, &["a"], 3);
        let w = worker(&store, &[]);
        let (tx, rx) = watch::channel(false);

        let handle = tokio::spawn(async move { w.run(rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        let row = store.get_tenant("a").unwrap().unwrap();
        assert_eq!(row.version(Component::Dashboard), Some("1.1.0"));
    }
}
