//! fleet-queue — the durable update job queue.
//!
//! One job per (rollout, tenant). Workers claim batches with
//! [`UpdateQueue::claim_batch`], which selects the highest-priority, oldest
//! queued jobs and flips them to `processing` in one store transaction, so
//! two workers never receive the same job.
//!
//! # Job lifecycle
//!
//! ```text
//! queued ──claim──▶ processing ──success──▶ completed
//!    ▲                  │
//!    └──retry (< max)───┤
//!                       └──failure (= max)──▶ failed
//! queued | processing ──cancel──▶ rolled_back
//! ```

pub mod error;
pub mod queue;
pub mod stats;

pub use error::{QueueError, QueueResult};
pub use queue::{enqueue_in, cancel_in, FailureOutcome, UpdateQueue, WaveSpec};
pub use stats::{QueueStats, WaveProgress};
