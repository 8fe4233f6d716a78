//! fleet-state — embedded state store for the fleet update orchestrator.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for tenant versions, golden templates, rollout sessions, the
//! update job queue, the audit history, and in-flight sidecar swaps.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{workflow}@{version}`, `{rollout_id}:{job_id}`) enable
//! prefix scans for related records, and the `queued_jobs` index keeps
//! claimable jobs in claim order.
//!
//! Multi-row changes run inside [`StateStore::write`]. Because redb
//! serializes write transactions, a closure that reads the claim index,
//! flips jobs to `processing`, and commits is atomic with respect to every
//! other worker sharing the store.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across threads and async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod txn;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use txn::StoreTxn;
pub use types::*;
