//! fleet-templates — versioned golden workflow definitions.
//!
//! Template versions are immutable once published. Per workflow name at most
//! one version is `current`; promotion demotes the previous current and
//! promotes the target in one store transaction. Canary flags are advisory.
//!
//! [`compare_definitions`] is a structural, best-effort diff: nodes are
//! matched by name and any removal is flagged as breaking.

pub mod diff;
pub mod error;
pub mod repository;

pub use diff::{compare_definitions, validate_definition, TemplateDiff};
pub use error::{TemplateError, TemplateResult};
pub use repository::{PublishRequest, TemplateRepository};
