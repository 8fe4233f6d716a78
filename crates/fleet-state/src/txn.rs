//! Typed access to a single redb write transaction.
//!
//! `StoreTxn` only ever holds one table open at a time; each method opens
//! what it needs and drops it before returning, so methods compose freely
//! inside one [`StateStore::write`](crate::StateStore::write) closure.

use redb::{ReadableTable, WriteTransaction};
use serde::Serialize;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::{decode, decode_all, decode_range, map_err, prefix_end};
use crate::tables::*;
use crate::types::*;

/// Name of the job id sequence.
const JOB_ID_SEQ: &str = "job_id";
/// Name of the enqueue-order sequence.
pub const ENQUEUE_SEQ: &str = "enqueue";
/// Name of the history id sequence.
const HISTORY_SEQ: &str = "history_id";

pub struct StoreTxn {
    txn: WriteTransaction,
}

fn encode<T: Serialize>(value: &T) -> StateResult<Vec<u8>> {
    serde_json::to_vec(value).map_err(map_err!(Serialize))
}

impl StoreTxn {
    pub(crate) fn new(txn: WriteTransaction) -> Self {
        Self { txn }
    }

    pub(crate) fn into_inner(self) -> WriteTransaction {
        self.txn
    }

    fn put_row<T: Serialize>(
        &self,
        def: redb::TableDefinition<&'static str, &'static [u8]>,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let bytes = encode(value)?;
        let mut table = self.txn.open_table(def).map_err(map_err!(Table))?;
        table.insert(key, bytes.as_slice()).map_err(map_err!(Write))?;
        Ok(())
    }

    /// Allocate the next value of a named monotonic sequence (starts at 1).
    pub fn next_sequence(&self, name: &str) -> StateResult<u64> {
        let mut table = self.txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        let current = table
            .get(name)
            .map_err(map_err!(Read))?
            .map(|g| g.value())
            .unwrap_or(0);
        let next = current + 1;
        table.insert(name, next).map_err(map_err!(Write))?;
        Ok(next)
    }

    // ── Tenants ────────────────────────────────────────────────────

    pub fn get_tenant(&self, tenant_id: &str) -> StateResult<Option<TenantVersionRow>> {
        let table = self.txn.open_table(TENANTS).map_err(map_err!(Table))?;
        decode(&table, tenant_id)
    }

    pub fn put_tenant(&self, row: &TenantVersionRow) -> StateResult<()> {
        self.put_row(TENANTS, &row.tenant_id, row)
    }

    pub fn list_tenants(&self) -> StateResult<Vec<TenantVersionRow>> {
        let table = self.txn.open_table(TENANTS).map_err(map_err!(Table))?;
        decode_all(&table)
    }

    // ── Templates ──────────────────────────────────────────────────

    pub fn get_template(&self, workflow: &str, version: &str) -> StateResult<Option<TemplateVersion>> {
        let table = self.txn.open_table(TEMPLATES).map_err(map_err!(Table))?;
        decode(&table, &template_key(workflow, version))
    }

    /// Insert a new template version; fails if the key already exists.
    pub fn insert_template(&self, template: &TemplateVersion) -> StateResult<()> {
        let key = template.table_key();
        if self.get_template(&template.workflow_name, &template.version)?.is_some() {
            return Err(StateError::AlreadyExists(key));
        }
        self.put_row(TEMPLATES, &key, template)?;
        debug!(%key, "template stored");
        Ok(())
    }

    /// Overwrite flags on an existing template version.
    pub fn put_template(&self, template: &TemplateVersion) -> StateResult<()> {
        self.put_row(TEMPLATES, &template.table_key(), template)
    }

    pub fn list_templates(&self, workflow: &str) -> StateResult<Vec<TemplateVersion>> {
        let table = self.txn.open_table(TEMPLATES).map_err(map_err!(Table))?;
        let rows: Vec<TemplateVersion> =
            decode_range(&table, &format!("{workflow}@"), &format!("{workflow}A"))?;
        Ok(rows.into_iter().filter(|t| t.workflow_name == workflow).collect())
    }

    // ── Rollouts ───────────────────────────────────────────────────

    pub fn get_rollout(&self, rollout_id: &str) -> StateResult<Option<RolloutSession>> {
        let table = self.txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        decode(&table, rollout_id)
    }

    pub fn put_rollout(&self, session: &RolloutSession) -> StateResult<()> {
        self.put_row(ROLLOUTS, &session.id, session)?;
        debug!(rollout = %session.id, status = %session.status, "rollout stored");
        Ok(())
    }

    pub fn list_rollouts(&self) -> StateResult<Vec<RolloutSession>> {
        let table = self.txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        decode_all(&table)
    }

    // ── Jobs ───────────────────────────────────────────────────────

    pub fn get_job(&self, job_id: JobId) -> StateResult<Option<QueueJob>> {
        let table = self.txn.open_table(JOBS).map_err(map_err!(Table))?;
        decode(&table, &job_key(job_id))
    }

    /// Assign an id and enqueue sequence, then store the job.
    pub fn insert_job(&self, mut job: QueueJob) -> StateResult<QueueJob> {
        job.id = self.next_sequence(JOB_ID_SEQ)?;
        job.enqueue_seq = self.next_sequence(ENQUEUE_SEQ)?;
        self.put_job(&job)?;
        Ok(job)
    }

    /// Store a job, keeping the claim and rollout indexes in step with
    /// its status.
    pub fn put_job(&self, job: &QueueJob) -> StateResult<()> {
        let previous = self.get_job(job.id)?;
        self.put_row(JOBS, &job.table_key(), job)?;

        let mut queued = self.txn.open_table(QUEUED_JOBS).map_err(map_err!(Table))?;
        if let Some(prev) = &previous {
            if prev.status == JobStatus::Queued {
                queued
                    .remove(prev.queue_key().as_str())
                    .map_err(map_err!(Write))?;
            }
        }
        if job.status == JobStatus::Queued {
            queued
                .insert(job.queue_key().as_str(), job.id)
                .map_err(map_err!(Write))?;
        }
        drop(queued);

        if previous.is_none() {
            let mut by_rollout = self.txn.open_table(ROLLOUT_JOBS).map_err(map_err!(Table))?;
            by_rollout
                .insert(job.rollout_key().as_str(), job.id)
                .map_err(map_err!(Write))?;
        }
        Ok(())
    }

    /// Ids of up to `limit` queued jobs in claim order.
    pub fn claimable(&self, limit: usize) -> StateResult<Vec<JobId>> {
        let table = self.txn.open_table(QUEUED_JOBS).map_err(map_err!(Table))?;
        let mut ids = Vec::with_capacity(limit);
        for entry in table.iter().map_err(map_err!(Read))? {
            if ids.len() >= limit {
                break;
            }
            let (_, id) = entry.map_err(map_err!(Read))?;
            ids.push(id.value());
        }
        Ok(ids)
    }

    /// All jobs owned by a rollout, in enqueue order.
    pub fn jobs_for_rollout(&self, rollout_id: &str) -> StateResult<Vec<QueueJob>> {
        let ids: Vec<JobId> = {
            let index = self.txn.open_table(ROLLOUT_JOBS).map_err(map_err!(Table))?;
            let start = format!("{rollout_id}:");
            let end = prefix_end(rollout_id);
            let mut ids = Vec::new();
            for entry in index.range(start.as_str()..end.as_str()).map_err(map_err!(Read))? {
                let (_, id) = entry.map_err(map_err!(Read))?;
                ids.push(id.value());
            }
            ids
        };
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.get_job(id)? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    pub fn list_jobs(&self) -> StateResult<Vec<QueueJob>> {
        let table = self.txn.open_table(JOBS).map_err(map_err!(Table))?;
        decode_all(&table)
    }

    // ── History ────────────────────────────────────────────────────

    /// Append an audit entry, assigning its id. Entries are never updated.
    pub fn append_history(&self, mut entry: UpdateHistoryEntry) -> StateResult<u64> {
        entry.id = self.next_sequence(HISTORY_SEQ)?;
        self.put_row(HISTORY, &format!("{:020}", entry.id), &entry)?;
        Ok(entry.id)
    }

    // ── Sidecar swaps ──────────────────────────────────────────────

    pub fn put_swap(&self, swap: &SidecarSwapState) -> StateResult<()> {
        self.put_row(SWAPS, &swap.table_key(), swap)
    }

    pub fn delete_swap(&self, tenant_id: &str, job_id: JobId) -> StateResult<bool> {
        let mut table = self.txn.open_table(SWAPS).map_err(map_err!(Table))?;
        let key = format!("{tenant_id}:{job_id:020}");
        let existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        Ok(existed)
    }
}
