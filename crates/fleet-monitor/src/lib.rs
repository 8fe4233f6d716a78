//! fleet-monitor — read-side aggregation for operators.
//!
//! Joins queue statistics with the auto-halt evaluation into per-rollout
//! health records, and builds per-component version histograms for the
//! whole fleet. Nothing here writes to the store, so every query is safe
//! to poll.

pub mod error;
pub mod monitor;
pub mod views;

pub use error::{MonitorError, MonitorResult};
pub use monitor::UpdateMonitor;
pub use views::{ComponentOverview, DashboardData, FleetOverview, RolloutHealth, RolloutProgress};
