//! fleet-rollout — phased rollouts and the emergency rollback path.
//!
//! # Components
//!
//! - **`strategy`**: wave plan: canary and staged wave percentages, sizing
//! - **`controller`**: rollout state machine (initiate, advance, pause, resume, abort, auto-halt)
//! - **`emergency`**: out-of-band fleet-wide or single-tenant rollback at emergency priority
//!
//! The engine never waits on workers. Every operation is a single store
//! transaction meant to be called repeatedly by a control loop or operator.

pub mod controller;
pub mod emergency;
pub mod error;
pub mod strategy;

pub use controller::{AdvanceOutcome, HaltDecision, RolloutEngine, RolloutRequest};
pub use emergency::{
    estimate_rollback_duration, EmergencyRollbackRequest, EmergencyRollbackResult,
    RollbackEstimate, RollbackScope,
};
pub use error::{RolloutError, RolloutResult};
pub use strategy::WavePlan;
