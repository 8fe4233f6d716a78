//! fleet-worker — turns queued jobs into tenant updates.
//!
//! A [`Worker`] claims a batch, runs every job of the batch concurrently
//! through the [`Executor`], and reports each outcome back to the queue.
//! Workers share nothing but the store; any number can run side by side.
//!
//! Per component:
//!
//! - **agent**: the full blue-green sidecar protocol
//! - **dashboard**, **workflow:***: pull, swap, health gate

pub mod error;
pub mod executor;
pub mod worker;

pub use error::{WorkerError, WorkerResult};
pub use executor::{Executor, JobOutcome};
pub use worker::Worker;
