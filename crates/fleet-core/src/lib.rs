//! fleet-core — shared vocabulary for the fleet update orchestrator.
//!
//! - **`component`**: the component set and its canonical string form
//! - **`version`**: semver parsing and the `1.0.x` / `1.0.x - 1.2.x` / `1.3.x+` range syntax
//! - **`compat`**: the static cross-component compatibility matrix
//! - **`config`**: `fleet.toml` parsing with defaults for every knob

pub mod compat;
pub mod component;
pub mod config;
pub mod error;
pub mod version;

pub use compat::{check_compatibility, CompatibilityReport, Lifecycle};
pub use component::{Component, WorkflowKind};
pub use config::FleetConfig;
pub use error::CoreError;
pub use version::{compare_versions, is_semver, parse_version, VersionRange};
