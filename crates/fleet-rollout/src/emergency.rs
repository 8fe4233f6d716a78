//! Emergency rollback — revert a component at emergency priority.
//!
//! The rollback pre-empts any active rollout of the same component, then
//! runs as its own `immediate` rollout session that starts directly in the
//! full wave. It returns as soon as the jobs are enqueued; completion shows
//! up in queue statistics.

use fleet_core::{is_semver, Component};
use fleet_queue::cancel_in;
use fleet_state::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::controller::{active_in, dominant_version, dispatch_wave, release_tenants, RolloutEngine};
use crate::error::{RolloutError, RolloutResult};

/// Seconds one worker spends on one tenant once saturated.
pub const PER_TENANT_SECS: u64 = 30;
/// Fixed cost of claiming and reporting the first batch.
pub const OVERHEAD_SECS: u64 = 15;

/// Which tenants an emergency rollback targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum RollbackScope {
    /// Every tenant not on the rollback version.
    AllTenants,
    /// Same selection as `AllTenants`.
    AffectedOnly,
    SpecificTenant { tenant_id: TenantId },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyRollbackRequest {
    pub component: Component,
    pub rollback_to_version: String,
    #[serde(flatten)]
    pub scope: RollbackScope,
    pub reason: String,
    pub initiated_by: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackEstimate {
    pub tenants: u64,
    pub workers: u32,
    pub estimated_secs: u64,
    /// Unix seconds at which the rollback is expected to finish.
    pub eta: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyRollbackResult {
    pub rollout_id: RolloutId,
    pub component: Component,
    /// The version being rolled back from.
    pub from_version: Option<String>,
    pub to_version: String,
    pub affected_tenants: u64,
    pub jobs_enqueued: u64,
    pub preempted_rollout: Option<RolloutId>,
    pub cancelled_jobs: u64,
    pub estimate: RollbackEstimate,
}

/// Expected wall-clock duration of a rollback over `tenants` with
/// `workers` in parallel: one per-tenant slot per round of workers.
pub fn estimate_rollback_duration(tenants: u64, workers: u32) -> RollbackEstimate {
    let workers = workers.max(1);
    let rounds = tenants.div_ceil(u64::from(workers));
    let estimated_secs = if tenants == 0 {
        0
    } else {
        rounds * PER_TENANT_SECS + OVERHEAD_SECS
    };
    RollbackEstimate {
        tenants,
        workers,
        estimated_secs,
        eta: epoch_secs() + estimated_secs,
    }
}

impl RolloutEngine {
    pub fn execute_emergency_rollback(
        &self,
        req: EmergencyRollbackRequest,
    ) -> RolloutResult<EmergencyRollbackResult> {
        if !is_semver(&req.rollback_to_version) {
            return Err(RolloutError::InvalidVersion(req.rollback_to_version));
        }
        let component = req.component;
        let target = req.rollback_to_version.as_str();

        let result = self.store.write(|tx| -> RolloutResult<EmergencyRollbackResult> {
            let now = epoch_secs();

            // Pre-empt first: the bad rollout's cancelled tenants leave
            // `updating` and become eligible for the rollback below.
            let mut preempted_rollout = None;
            let mut cancelled_jobs = 0;
            if let Some(mut active) = active_in(tx, component)? {
                let cancelled = cancel_in(tx, &active.id, "preempted by emergency rollback")?;
                release_tenants(tx, &cancelled)?;
                active.status = RolloutStatus::RolledBack;
                active.abort_reason = Some(req.reason.clone());
                active.completed_at = Some(now);
                active.updated_at = now;
                tx.put_rollout(&active)?;
                tx.append_history(
                    UpdateHistoryEntry::new(HistoryAction::RolloutPreempted, &req.initiated_by)
                        .rollout(&active.id)
                        .component(component)
                        .versions(active.from_version.as_deref(), &active.to_version)
                        .affected(cancelled.len() as u64)
                        .reason(&req.reason),
                )?;
                cancelled_jobs = cancelled.len() as u64;
                preempted_rollout = Some(active.id);
            }

            let affected: Vec<TenantVersionRow> = match &req.scope {
                RollbackScope::AllTenants | RollbackScope::AffectedOnly => tx
                    .list_tenants()?
                    .into_iter()
                    .filter(|r| r.drifts_from(component, target))
                    .collect(),
                RollbackScope::SpecificTenant { tenant_id } => vec![
                    tx.get_tenant(tenant_id)?
                        .ok_or_else(|| RolloutError::TenantNotFound(tenant_id.clone()))?,
                ],
            };
            if affected.is_empty() {
                return Err(RolloutError::NoEligibleTenants {
                    component,
                    version: target.to_string(),
                });
            }

            let session = RolloutSession {
                id: uuid::Uuid::new_v4().to_string(),
                component,
                from_version: dominant_version(&affected, component),
                to_version: target.to_string(),
                strategy: RolloutStrategy::Immediate,
                status: RolloutStatus::Wave4,
                total_tenants: affected.len() as u64,
                updated_tenants: 0,
                failed_tenants: 0,
                error_threshold: self.config.wave_error_threshold,
                canary_percentage: 0.0,
                initiated_by: req.initiated_by.clone(),
                created_at: now,
                started_at: Some(now),
                updated_at: now,
                completed_at: None,
                abort_reason: None,
                metadata: RolloutMetadata {
                    paused_from: None,
                    emergency: true,
                    reason: Some(req.reason.clone()),
                    preempted_rollout: preempted_rollout.clone(),
                    acknowledged_wave: None,
                },
            };
            tx.put_rollout(&session)?;

            let jobs_enqueued = dispatch_wave(
                tx,
                &session,
                RolloutStatus::Wave4,
                &affected,
                self.config.emergency_priority,
                self.max_attempts,
                UpdateStatus::Rollback,
            )?;

            tx.append_history(
                UpdateHistoryEntry::new(HistoryAction::EmergencyRollback, &req.initiated_by)
                    .rollout(&session.id)
                    .component(component)
                    .versions(session.from_version.as_deref(), target)
                    .affected(session.total_tenants)
                    .reason(&req.reason)
                    .details(json!({
                        "scope": req.scope,
                        "preempted_rollout": preempted_rollout,
                        "cancelled_jobs": cancelled_jobs,
                    })),
            )?;

            Ok(EmergencyRollbackResult {
                rollout_id: session.id,
                component,
                from_version: session.from_version,
                to_version: session.to_version,
                affected_tenants: session.total_tenants,
                jobs_enqueued,
                preempted_rollout,
                cancelled_jobs,
                estimate: estimate_rollback_duration(session.total_tenants, self.worker_count),
            })
        })?;

        warn!(
            rollout = %result.rollout_id,
            %component,
            to = %result.to_version,
            affected = result.affected_tenants,
            preempted = result.preempted_rollout.as_deref().unwrap_or("-"),
            eta_secs = result.estimate.estimated_secs,
            reason = %req.reason,
            "emergency rollback enqueued"
        );
        Ok(result)
    }
}
