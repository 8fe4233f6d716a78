//! Health gate — polls a tenant until healthy or out of time.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::debug;

use crate::control::TenantControl;

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeResult {
    /// The health endpoint returned 2xx.
    Healthy,
    /// The health endpoint returned non-2xx.
    Unhealthy,
    /// The probe could not be executed (connection error, timeout).
    Failed,
}

/// Outcome of [`wait_until_healthy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthWait {
    pub healthy: bool,
    pub probes: u32,
    pub last: Option<ProbeResult>,
    pub elapsed: Duration,
}

/// Probe every `interval` until a probe is healthy or `timeout` elapses.
///
/// Always returns; a timeout is reported as `healthy: false`. A probe that
/// is still running when the deadline passes is abandoned.
pub async fn wait_until_healthy<C: TenantControl>(
    control: &C,
    tenant: &str,
    timeout: Duration,
    interval: Duration,
) -> HealthWait {
    let started = Instant::now();
    let deadline = started + timeout;
    let mut wait = HealthWait {
        healthy: false,
        probes: 0,
        last: None,
        elapsed: Duration::ZERO,
    };

    loop {
        let probe = tokio::time::timeout_at(deadline, control.poll_health(tenant)).await;
        let Ok(result) = probe else {
            break;
        };
        wait.probes += 1;
        wait.last = Some(result);
        if result == ProbeResult::Healthy {
            wait.healthy = true;
            break;
        }
        debug!(%tenant, probe = wait.probes, ?result, "waiting for healthy");
        if Instant::now() + interval >= deadline {
            break;
        }
        tokio::time::sleep(interval).await;
    }

    wait.elapsed = started.elapsed();
    wait
}
