//! UpdateQueue — enqueue, claim, report, cancel.

use fleet_core::Component;
use fleet_state::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::stats::{wave_progress, QueueStats, WaveProgress};

/// What a wave enqueues: one job per tenant with these shared fields.
#[derive(Debug, Clone)]
pub struct WaveSpec<'a> {
    pub rollout_id: &'a str,
    pub component: Component,
    pub to_version: &'a str,
    pub priority: u32,
    pub wave_number: u32,
    pub max_attempts: u32,
}

/// Result of reporting a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum FailureOutcome {
    /// Back in `queued`; `attempt` attempts have been used.
    Retrying { attempt: u32 },
    /// Attempts exhausted; the job is permanently `failed`.
    Failed,
}

/// Insert one job per tenant inside an existing transaction.
///
/// `tenants` pairs each tenant with the version it currently runs.
pub fn enqueue_in(
    tx: &StoreTxn,
    spec: &WaveSpec<'_>,
    tenants: &[(TenantId, Option<String>)],
) -> StateResult<Vec<QueueJob>> {
    let now = epoch_secs();
    let mut jobs = Vec::with_capacity(tenants.len());
    for (tenant_id, from_version) in tenants {
        let job = tx.insert_job(QueueJob {
            id: 0,
            rollout_id: spec.rollout_id.to_string(),
            tenant_id: tenant_id.clone(),
            component: spec.component,
            from_version: from_version.clone(),
            to_version: spec.to_version.to_string(),
            priority: spec.priority,
            status: JobStatus::Queued,
            attempt_count: 0,
            max_attempts: spec.max_attempts,
            wave_number: spec.wave_number,
            error_message: None,
            enqueue_seq: 0,
            queued_at: now,
            started_at: None,
            completed_at: None,
            worker_id: None,
        })?;
        jobs.push(job);
    }
    Ok(jobs)
}

/// Move every non-terminal job of a rollout to `rolled_back` inside an
/// existing transaction. Returns the jobs changed.
pub fn cancel_in(tx: &StoreTxn, rollout_id: &str, reason: &str) -> StateResult<Vec<QueueJob>> {
    let now = epoch_secs();
    let mut cancelled = Vec::new();
    for mut job in tx.jobs_for_rollout(rollout_id)? {
        if job.status.is_terminal() {
            continue;
        }
        job.status = JobStatus::RolledBack;
        job.completed_at = Some(now);
        job.error_message = Some(reason.to_string());
        tx.put_job(&job)?;
        cancelled.push(job);
    }
    Ok(cancelled)
}

/// Durable priority queue of per-tenant update jobs.
#[derive(Clone)]
pub struct UpdateQueue {
    store: StateStore,
}

impl UpdateQueue {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Insert one job per tenant for a wave of a rollout.
    pub fn enqueue_wave(
        &self,
        spec: &WaveSpec<'_>,
        tenants: &[(TenantId, Option<String>)],
    ) -> QueueResult<Vec<QueueJob>> {
        let jobs = self.store.write(|tx| enqueue_in(tx, spec, tenants))?;
        info!(
            rollout = %spec.rollout_id,
            component = %spec.component,
            wave = spec.wave_number,
            priority = spec.priority,
            jobs = jobs.len(),
            "wave enqueued"
        );
        Ok(jobs)
    }

    /// Atomically claim up to `limit` queued jobs, highest priority first,
    /// oldest first within a priority.
    ///
    /// Selection and the flip to `processing` happen in one write
    /// transaction; a claimed job has left the claim index before any
    /// other claimer can read it.
    pub fn claim_batch(&self, limit: usize, worker_id: &str) -> QueueResult<Vec<QueueJob>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let claimed = self.store.write(|tx| {
            let now = epoch_secs();
            let mut claimed = Vec::new();
            for id in tx.claimable(limit)? {
                let Some(mut job) = tx.get_job(id)? else {
                    continue;
                };
                job.status = JobStatus::Processing;
                job.started_at = Some(now);
                job.worker_id = Some(worker_id.to_string());
                tx.put_job(&job)?;
                claimed.push(job);
            }
            Ok::<_, StateError>(claimed)
        })?;
        if !claimed.is_empty() {
            debug!(worker = %worker_id, count = claimed.len(), "jobs claimed");
        }
        Ok(claimed)
    }

    /// Mark a processing job completed and count the tenant as updated on
    /// its rollout.
    pub fn report_job_success(&self, job_id: JobId) -> QueueResult<QueueJob> {
        let job = self.store.write(|tx| {
            let mut job = processing_job(tx, job_id, JobStatus::Completed)?;
            job.status = JobStatus::Completed;
            job.completed_at = Some(epoch_secs());
            job.error_message = None;
            tx.put_job(&job)?;
            if let Some(mut session) = tx.get_rollout(&job.rollout_id)? {
                session.updated_tenants += 1;
                session.updated_at = epoch_secs();
                tx.put_rollout(&session)?;
            }
            Ok::<_, QueueError>(job)
        })?;
        debug!(job = job_id, tenant = %job.tenant_id, "job completed");
        Ok(job)
    }

    /// Record a failed attempt. Re-queues while attempts remain, otherwise
    /// marks the job permanently failed and counts it on its rollout.
    pub fn report_job_failure(&self, job_id: JobId, error: &str) -> QueueResult<FailureOutcome> {
        let (job, outcome) = self.store.write(|tx| {
            let mut job = processing_job(tx, job_id, JobStatus::Failed)?;
            let outcome = fail_attempt(tx, &mut job, error)?;
            Ok::<_, QueueError>((job, outcome))
        })?;
        match outcome {
            FailureOutcome::Retrying { attempt } => warn!(
                job = job_id,
                tenant = %job.tenant_id,
                attempt,
                max = job.max_attempts,
                %error,
                "job failed, retrying"
            ),
            FailureOutcome::Failed => warn!(
                job = job_id,
                tenant = %job.tenant_id,
                %error,
                "job failed permanently"
            ),
        }
        Ok(outcome)
    }

    /// Cancel every outstanding job of a rollout.
    pub fn cancel_rollout_jobs(&self, rollout_id: &str) -> QueueResult<u64> {
        let cancelled = self
            .store
            .write(|tx| cancel_in(tx, rollout_id, "cancelled"))?
            .len() as u64;
        info!(rollout = %rollout_id, cancelled, "rollout jobs cancelled");
        Ok(cancelled)
    }

    /// Treat jobs stuck in `processing` since before `now - older_than_secs`
    /// as a failed attempt. Returns how many were recovered.
    pub fn requeue_stale(&self, older_than_secs: u64, now: u64) -> QueueResult<u64> {
        let cutoff = now.saturating_sub(older_than_secs);
        let recovered = self.store.write(|tx| {
            let mut recovered = 0;
            for mut job in tx.list_jobs()? {
                let stale = job.status == JobStatus::Processing
                    && job.started_at.is_some_and(|t| t < cutoff);
                if stale {
                    fail_attempt(tx, &mut job, "worker did not report before deadline")?;
                    recovered += 1;
                }
            }
            Ok::<_, StateError>(recovered)
        })?;
        if recovered > 0 {
            warn!(recovered, "stale processing jobs recovered");
        }
        Ok(recovered)
    }

    pub fn get_job(&self, job_id: JobId) -> QueueResult<QueueJob> {
        self.store
            .get_job(job_id)?
            .ok_or(QueueError::JobNotFound(job_id))
    }

    pub fn list_rollout_jobs(&self, rollout_id: &str) -> QueueResult<Vec<QueueJob>> {
        Ok(self.store.list_jobs_for_rollout(rollout_id)?)
    }

    /// Stats for one rollout, or for the whole queue when `None`.
    pub fn get_queue_stats(&self, rollout_id: Option<&str>) -> QueueResult<QueueStats> {
        let jobs = match rollout_id {
            Some(id) => self.store.list_jobs_for_rollout(id)?,
            None => self.store.list_jobs()?,
        };
        Ok(QueueStats::from_jobs(&jobs))
    }

    /// Per-wave stats for a rollout, ascending by wave number.
    pub fn get_wave_progress(&self, rollout_id: &str) -> QueueResult<Vec<WaveProgress>> {
        let jobs = self.store.list_jobs_for_rollout(rollout_id)?;
        Ok(wave_progress(&jobs))
    }

    /// Stats for a single wave; empty stats if the wave has no jobs.
    pub fn get_wave_stats(&self, rollout_id: &str, wave_number: u32) -> QueueResult<QueueStats> {
        let jobs = self.store.list_jobs_for_rollout(rollout_id)?;
        Ok(QueueStats::from_jobs(
            jobs.iter().filter(|j| j.wave_number == wave_number),
        ))
    }

    /// A wave is complete when none of its jobs are queued or processing.
    pub fn is_wave_complete(&self, rollout_id: &str, wave_number: u32) -> QueueResult<bool> {
        Ok(self.get_wave_stats(rollout_id, wave_number)?.is_drained())
    }
}

/// Load a job that must currently be `processing` to move to `to`.
fn processing_job(tx: &StoreTxn, job_id: JobId, to: JobStatus) -> QueueResult<QueueJob> {
    let job = tx.get_job(job_id)?.ok_or(QueueError::JobNotFound(job_id))?;
    if job.status != JobStatus::Processing {
        return Err(QueueError::InvalidTransition {
            job: job_id,
            from: job.status,
            to,
        });
    }
    Ok(job)
}

/// Count one failed attempt on a processing job and store the result.
fn fail_attempt(tx: &StoreTxn, job: &mut QueueJob, error: &str) -> StateResult<FailureOutcome> {
    let now = epoch_secs();
    job.attempt_count += 1;
    job.error_message = Some(error.to_string());
    job.worker_id = None;

    let outcome = if job.attempt_count < job.max_attempts {
        job.status = JobStatus::Queued;
        job.started_at = None;
        job.queued_at = now;
        job.enqueue_seq = tx.next_sequence(fleet_state::txn::ENQUEUE_SEQ)?;
        FailureOutcome::Retrying {
            attempt: job.attempt_count,
        }
    } else {
        job.status = JobStatus::Failed;
        job.completed_at = Some(now);
        FailureOutcome::Failed
    };
    tx.put_job(job)?;

    if outcome == FailureOutcome::Failed {
        if let Some(mut session) = tx.get_rollout(&job.rollout_id)? {
            session.failed_tenants += 1;
            session.updated_at = now;
            tx.put_rollout(&session)?;
        }
    }
    Ok(outcome)
}
