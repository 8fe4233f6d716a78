//! StateStore — redb-backed state persistence for the fleet orchestrator.
//!
//! Reads run against MVCC snapshots and never block. Every mutation goes
//! through [`StateStore::write`], which hands the caller a typed
//! [`StoreTxn`] and commits only if the closure succeeds. redb admits a
//! single write transaction at a time, so each `write` closure is atomic
//! with respect to every other writer in every thread of the process.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::txn::StoreTxn;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}
pub(crate) use map_err;

/// Decode a JSON row from any readable table.
pub(crate) fn decode<T, R>(table: &R, key: &str) -> StateResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

/// Decode every row whose key falls in `[start, end)`.
pub(crate) fn decode_range<T, R>(table: &R, start: &str, end: &str) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.range(start..end).map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
    }
    Ok(results)
}

/// Decode every row of a table.
pub(crate) fn decode_all<T, R>(table: &R) -> StateResult<Vec<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut results = Vec::new();
    for entry in table.iter().map_err(map_err!(Read))? {
        let (_, value) = entry.map_err(map_err!(Read))?;
        results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
    }
    Ok(results)
}

/// Exclusive upper bound for a `{prefix}:` key scan.
pub(crate) fn prefix_end(prefix: &str) -> String {
    format!("{prefix};")
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(TENANTS).map_err(map_err!(Table))?;
        txn.open_table(TEMPLATES).map_err(map_err!(Table))?;
        txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        txn.open_table(JOBS).map_err(map_err!(Table))?;
        txn.open_table(QUEUED_JOBS).map_err(map_err!(Table))?;
        txn.open_table(ROLLOUT_JOBS).map_err(map_err!(Table))?;
        txn.open_table(HISTORY).map_err(map_err!(Table))?;
        txn.open_table(SWAPS).map_err(map_err!(Table))?;
        txn.open_table(SEQUENCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` inside a single write transaction.
    ///
    /// Commits when `f` returns `Ok`, aborts when it returns `Err`.
    pub fn write<T, E>(&self, f: impl FnOnce(&mut StoreTxn) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StateError>,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let mut tx = StoreTxn::new(txn);
        match f(&mut tx) {
            Ok(out) => {
                tx.into_inner().commit().map_err(map_err!(Transaction))?;
                Ok(out)
            }
            Err(e) => {
                let _ = tx.into_inner().abort();
                Err(e)
            }
        }
    }

    // ── Tenants ────────────────────────────────────────────────────

    pub fn get_tenant(&self, tenant_id: &str) -> StateResult<Option<TenantVersionRow>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TENANTS).map_err(map_err!(Table))?;
        decode(&table, tenant_id)
    }

    pub fn list_tenants(&self) -> StateResult<Vec<TenantVersionRow>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TENANTS).map_err(map_err!(Table))?;
        decode_all(&table)
    }

    // ── Templates ──────────────────────────────────────────────────

    pub fn get_template(&self, workflow: &str, version: &str) -> StateResult<Option<TemplateVersion>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TEMPLATES).map_err(map_err!(Table))?;
        decode(&table, &template_key(workflow, version))
    }

    /// All versions of a workflow, in key order.
    pub fn list_templates(&self, workflow: &str) -> StateResult<Vec<TemplateVersion>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TEMPLATES).map_err(map_err!(Table))?;
        let start = format!("{workflow}@");
        let end = format!("{workflow}A");
        let rows: Vec<TemplateVersion> = decode_range(&table, &start, &end)?;
        Ok(rows.into_iter().filter(|t| t.workflow_name == workflow).collect())
    }

    pub fn list_all_templates(&self) -> StateResult<Vec<TemplateVersion>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(TEMPLATES).map_err(map_err!(Table))?;
        decode_all(&table)
    }

    // ── Rollouts ───────────────────────────────────────────────────

    pub fn get_rollout(&self, rollout_id: &str) -> StateResult<Option<RolloutSession>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        decode(&table, rollout_id)
    }

    pub fn list_rollouts(&self) -> StateResult<Vec<RolloutSession>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ROLLOUTS).map_err(map_err!(Table))?;
        decode_all(&table)
    }

    // ── Jobs ───────────────────────────────────────────────────────

    pub fn get_job(&self, job_id: JobId) -> StateResult<Option<QueueJob>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        decode(&table, &job_key(job_id))
    }

    pub fn list_jobs(&self) -> StateResult<Vec<QueueJob>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(JOBS).map_err(map_err!(Table))?;
        decode_all(&table)
    }

    /// All jobs owned by a rollout, in enqueue order.
    pub fn list_jobs_for_rollout(&self, rollout_id: &str) -> StateResult<Vec<QueueJob>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let index = txn.open_table(ROLLOUT_JOBS).map_err(map_err!(Table))?;
        let jobs = txn.open_table(JOBS).map_err(map_err!(Table))?;
        let start = format!("{rollout_id}:");
        let end = prefix_end(rollout_id);
        let mut results = Vec::new();
        for entry in index.range(start.as_str()..end.as_str()).map_err(map_err!(Read))? {
            let (_, id) = entry.map_err(map_err!(Read))?;
            if let Some(job) = decode::<QueueJob, _>(&jobs, &job_key(id.value()))? {
                results.push(job);
            }
        }
        Ok(results)
    }

    /// Number of jobs currently claimable.
    pub fn queued_len(&self) -> StateResult<u64> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(QUEUED_JOBS).map_err(map_err!(Table))?;
        let mut count = 0;
        for entry in table.iter().map_err(map_err!(Read))? {
            entry.map_err(map_err!(Read))?;
            count += 1;
        }
        Ok(count)
    }

    // ── History ────────────────────────────────────────────────────

    /// The most recent `limit` entries, newest first.
    pub fn list_history(&self, limit: usize) -> StateResult<Vec<UpdateHistoryEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))?.rev() {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
            if results.len() >= limit {
                break;
            }
        }
        Ok(results)
    }

    /// Every entry recorded against a rollout, oldest first.
    pub fn list_history_for_rollout(&self, rollout_id: &str) -> StateResult<Vec<UpdateHistoryEntry>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(HISTORY).map_err(map_err!(Table))?;
        let all: Vec<UpdateHistoryEntry> = decode_all(&table)?;
        Ok(all
            .into_iter()
            .filter(|e| e.rollout_id.as_deref() == Some(rollout_id))
            .collect())
    }

    // ── Sidecar swaps ──────────────────────────────────────────────

    pub fn get_swap(&self, tenant_id: &str, job_id: JobId) -> StateResult<Option<SidecarSwapState>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SWAPS).map_err(map_err!(Table))?;
        decode(&table, &format!("{tenant_id}:{job_id:020}"))
    }

    pub fn list_swaps(&self) -> StateResult<Vec<SidecarSwapState>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SWAPS).map_err(map_err!(Table))?;
        decode_all(&table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::Component;

    fn test_job(rollout: &str, tenant: &str, priority: u32) -> QueueJob {
        QueueJob {
            id: 0,
            rollout_id: rollout.to_string(),
            tenant_id: tenant.to_string(),
            component: Component::Dashboard,
            from_version: Some("1.0.0".to_string()),
            to_version: "1.1.0".to_string(),
            priority,
            status: JobStatus::Queued,
            attempt_count: 0,
            max_attempts: 3,
            wave_number: 0,
            error_message: None,
            enqueue_seq: 0,
            queued_at: 1000,
            started_at: None,
            completed_at: None,
            worker_id: None,
        }
    }

    // ── Tenants ────────────────────────────────────────────────────

    #[test]
    fn tenant_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let mut row = TenantVersionRow::new("acme", 1000);
        row.set_version(Component::Agent, "1.2.0");

        store.write(|tx| tx.put_tenant(&row)).unwrap();
        assert_eq!(store.get_tenant("acme").unwrap(), Some(row));
        assert!(store.get_tenant("nope").unwrap().is_none());
    }

    #[test]
    fn failed_write_closure_is_rolled_back() {
        let store = StateStore::open_in_memory().unwrap();
        let result: StateResult<()> = store.write(|tx| {
            tx.put_tenant(&TenantVersionRow::new("acme", 1))?;
            Err(StateError::NotFound("forced".into()))
        });
        assert!(result.is_err());
        assert!(store.get_tenant("acme").unwrap().is_none());
    }

    // ── Jobs ───────────────────────────────────────────────────────

    #[test]
    fn inserted_jobs_get_monotonic_ids_and_index_entries() {
        let store = StateStore::open_in_memory().unwrap();
        let ids = store
            .write(|tx| {
                let a = tx.insert_job(test_job("r1", "t1", 10))?;
                let b = tx.insert_job(test_job("r1", "t2", 10))?;
                Ok::<_, StateError>(vec![a.id, b.id])
            })
            .unwrap();
        assert!(ids[0] < ids[1]);
        assert_eq!(store.queued_len().unwrap(), 2);
        assert_eq!(store.list_jobs_for_rollout("r1").unwrap().len(), 2);
        assert!(store.list_jobs_for_rollout("r10").unwrap().is_empty());
    }

    #[test]
    fn claimable_order_is_priority_then_age() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .write(|tx| {
                tx.insert_job(test_job("r1", "old-normal", 10))?;
                tx.insert_job(test_job("r1", "new-normal", 10))?;
                tx.insert_job(test_job("r2", "urgent", 1000))?;
                Ok::<_, StateError>(())
            })
            .unwrap();

        let order = store
            .write(|tx| {
                let ids = tx.claimable(10)?;
                ids.into_iter()
                    .map(|id| Ok(tx.get_job(id)?.map(|j| j.tenant_id).unwrap_or_default()))
                    .collect::<StateResult<Vec<_>>>()
            })
            .unwrap();
        assert_eq!(order, vec!["urgent", "old-normal", "new-normal"]);
    }

    #[test]
    fn leaving_queued_removes_index_entry() {
        let store = StateStore::open_in_memory().unwrap();
        let job = store.write(|tx| tx.insert_job(test_job("r1", "t1", 10))).unwrap();

        store
            .write(|tx| {
                let mut j = tx.get_job(job.id)?.ok_or(StateError::NotFound("job".into()))?;
                j.status = JobStatus::Processing;
                tx.put_job(&j)
            })
            .unwrap();
        assert_eq!(store.queued_len().unwrap(), 0);

        store
            .write(|tx| {
                let mut j = tx.get_job(job.id)?.ok_or(StateError::NotFound("job".into()))?;
                j.status = JobStatus::Queued;
                j.enqueue_seq = tx.next_sequence("enqueue")?;
                tx.put_job(&j)
            })
            .unwrap();
        assert_eq!(store.queued_len().unwrap(), 1);
    }

    // ── History ────────────────────────────────────────────────────

    #[test]
    fn history_is_returned_newest_first() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .write(|tx| {
                tx.append_history(
                    UpdateHistoryEntry::new(HistoryAction::RolloutStarted, "ops").rollout("r1"),
                )?;
                tx.append_history(
                    UpdateHistoryEntry::new(HistoryAction::WaveAdvanced, "ops").rollout("r1"),
                )?;
                tx.append_history(
                    UpdateHistoryEntry::new(HistoryAction::RolloutStarted, "ops").rollout("r2"),
                )
            })
            .unwrap();

        let recent = store.list_history(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].id > recent[1].id);

        let r1 = store.list_history_for_rollout("r1").unwrap();
        assert_eq!(r1.len(), 2);
        assert_eq!(r1[0].action, HistoryAction::RolloutStarted);
    }

    // ── Templates ──────────────────────────────────────────────────

    #[test]
    fn template_listing_does_not_leak_across_workflow_prefixes() {
        let store = StateStore::open_in_memory().unwrap();
        let mk = |name: &str, version: &str| TemplateVersion {
            workflow_name: name.to_string(),
            version: version.to_string(),
            definition: serde_json::json!({"nodes": [], "connections": {}}),
            changelog: String::new(),
            is_current: false,
            is_canary: false,
            published_by: "ops".into(),
            published_at: 0,
            promoted_at: None,
        };
        store
            .write(|tx| {
                tx.insert_template(&mk("email_1", "1.0.0"))?;
                tx.insert_template(&mk("email_1", "1.1.0"))?;
                tx.insert_template(&mk("email_10", "1.0.0"))?;
                tx.insert_template(&mk("email_1@beta", "2.0.0"))
            })
            .unwrap();
        let listed = store.list_templates("email_1").unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().all(|t| t.workflow_name == "email_1"));
        let in_txn = store.write(|tx| tx.list_templates("email_1")).unwrap();
        assert_eq!(in_txn.len(), 2);
        assert_eq!(store.list_all_templates().unwrap().len(), 4);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("fleet.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store
                .write(|tx| tx.put_tenant(&TenantVersionRow::new("acme", 1)))
                .unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        assert!(store.get_tenant("acme").unwrap().is_some());
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.list_tenants().unwrap().is_empty());
        assert!(store.list_rollouts().unwrap().is_empty());
        assert!(store.list_jobs().unwrap().is_empty());
        assert!(store.list_history(10).unwrap().is_empty());
        assert!(store.list_swaps().unwrap().is_empty());
        assert_eq!(store.queued_len().unwrap(), 0);
    }
}
