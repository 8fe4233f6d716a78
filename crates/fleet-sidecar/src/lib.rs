//! fleet-sidecar — the per-tenant blue-green agent swap.
//!
//! # Architecture
//!
//! ```text
//! SidecarProtocol
//!   ├── TenantControl (pull, prepare, checkpoint, swap, health)
//!   │   └── HttpTenantControl → http://{tenant}.fleet.internal:9090/update/*
//!   ├── wait_until_healthy() → HealthWait
//!   └── SidecarSwapState persisted per step, archived to history when terminal
//! ```
//!
//! The only observable downtime is between entering `swapping` and the
//! first healthy probe. If the new agent never turns healthy the protocol
//! swaps back to the previous version before returning, so the tenant is
//! never left on a broken agent.

pub mod checker;
pub mod control;
pub mod error;
pub mod protocol;

pub use checker::{wait_until_healthy, HealthWait, ProbeResult};
pub use control::{DrainReport, HttpTenantControl, TenantControl};
pub use error::{ControlError, ControlResult, SidecarError, SidecarResult};
pub use protocol::{SidecarProtocol, SwapTimeouts};
