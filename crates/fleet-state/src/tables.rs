//! redb table definitions for the fleet state store.
//!
//! Row tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Numeric ids are zero-padded so lexical key order equals numeric
//! order.

use redb::TableDefinition;

/// Tenant version rows keyed by `{tenant_id}`.
pub const TENANTS: TableDefinition<&str, &[u8]> = TableDefinition::new("tenant_versions");

/// Golden templates keyed by `{workflow}@{version}`.
pub const TEMPLATES: TableDefinition<&str, &[u8]> = TableDefinition::new("template_versions");

/// Rollout sessions keyed by `{rollout_id}`.
pub const ROLLOUTS: TableDefinition<&str, &[u8]> = TableDefinition::new("rollout_sessions");

/// Queue jobs keyed by `{job_id:020}`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("queue_jobs");

/// Claim index: exactly the jobs in `queued`, keyed by
/// `{u32::MAX - priority:010}:{enqueue_seq:020}` so iteration order is
/// priority descending, then queue time ascending. Value is the job id.
pub const QUEUED_JOBS: TableDefinition<&str, u64> = TableDefinition::new("queued_jobs");

/// Rollout → job index keyed by `{rollout_id}:{job_id:020}`.
pub const ROLLOUT_JOBS: TableDefinition<&str, u64> = TableDefinition::new("rollout_jobs");

/// Append-only audit log keyed by `{entry_id:020}`.
pub const HISTORY: TableDefinition<&str, &[u8]> = TableDefinition::new("update_history");

/// In-flight sidecar swaps keyed by `{tenant_id}:{job_id:020}`.
pub const SWAPS: TableDefinition<&str, &[u8]> = TableDefinition::new("sidecar_swaps");

/// Monotonic counters keyed by sequence name.
pub const SEQUENCES: TableDefinition<&str, u64> = TableDefinition::new("sequences");
