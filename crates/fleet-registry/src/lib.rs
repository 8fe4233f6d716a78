//! fleet-registry — the authoritative record of what each tenant runs.
//!
//! The registry owns `TenantVersionRow`. Everything else reads and writes
//! tenant versions and update status only through [`VersionRegistry`].
//!
//! Drift is computed on demand: a tenant needs an update for a component
//! when its recorded version differs from the target and it is not already
//! `updating`.

pub mod error;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use registry::{
    needing_update_in, needs_update, set_status_in, summarize, VersionRegistry, VersionSummary,
    UNKNOWN_VERSION,
};
