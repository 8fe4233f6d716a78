//! Update monitor — health records and fleet overviews.

use fleet_core::{compare_versions, Component, FleetConfig};
use fleet_queue::{stats::wave_progress, QueueStats};
use fleet_registry::{summarize, UNKNOWN_VERSION};
use fleet_rollout::RolloutEngine;
use fleet_state::{epoch_secs, JobStatus, QueueJob, RolloutSession, StateStore, TenantVersionRow, UpdateStatus};
use tracing::debug;

use crate::error::MonitorResult;
use crate::views::{ComponentOverview, DashboardData, FleetOverview, RolloutHealth, RolloutProgress};

const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Clone)]
pub struct UpdateMonitor {
    store: StateStore,
    engine: RolloutEngine,
    stale_after_secs: u64,
    history_limit: usize,
}

impl UpdateMonitor {
    pub fn new(store: StateStore, engine: RolloutEngine, stale_after_secs: u64) -> Self {
        Self {
            store,
            engine,
            stale_after_secs,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }

    pub fn from_config(store: StateStore, config: &FleetConfig) -> Self {
        let engine = RolloutEngine::from_config(store.clone(), config);
        Self::new(store, engine, config.queue.stale_after_secs)
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    /// Health, per-wave progress, and the session itself for one rollout.
    pub fn get_rollout_progress(&self, rollout_id: &str) -> MonitorResult<RolloutProgress> {
        let session = self.engine.get_rollout(rollout_id)?;
        let jobs = self.store.list_jobs_for_rollout(rollout_id)?;
        let health = self.health_of(&session, &jobs, epoch_secs())?;
        Ok(RolloutProgress {
            waves: wave_progress(&jobs),
            session,
            health,
        })
    }

    /// Health records for every rollout still in flight.
    pub fn get_active_rollout_health(&self) -> MonitorResult<Vec<RolloutHealth>> {
        let now = epoch_secs();
        let mut records = Vec::new();
        for session in self.engine.list_active_rollouts()? {
            let jobs = self.store.list_jobs_for_rollout(&session.id)?;
            records.push(self.health_of(&session, &jobs, now)?);
        }
        Ok(records)
    }

    /// Per-component version histograms with drift and failure counts.
    pub fn get_fleet_overview(&self) -> MonitorResult<FleetOverview> {
        let rows = self.store.list_tenants()?;
        Ok(overview(&rows, epoch_secs()))
    }

    pub fn get_dashboard_data(&self) -> MonitorResult<DashboardData> {
        let fleet = self.get_fleet_overview()?;
        let active_rollouts = self.get_active_rollout_health()?;
        let queue = QueueStats::from_jobs(&self.store.list_jobs()?);
        let current_templates = self
            .store
            .list_all_templates()?
            .into_iter()
            .filter(|t| t.is_current)
            .collect();
        let recent_history = self.store.list_history(self.history_limit)?;
        debug!(
            tenants = fleet.total_tenants,
            active = active_rollouts.len(),
            "dashboard data assembled"
        );
        Ok(DashboardData {
            fleet,
            active_rollouts,
            queue,
            current_templates,
            recent_history,
        })
    }

    fn health_of(
        &self,
        session: &RolloutSession,
        jobs: &[QueueJob],
        now: u64,
    ) -> MonitorResult<RolloutHealth> {
        let stats = QueueStats::from_jobs(jobs);
        let stuck_jobs = jobs
            .iter()
            .filter(|j| is_stuck(j, now, self.stale_after_secs))
            .count() as u64;
        let halt = self.engine.should_auto_halt(&session.id)?;
        Ok(RolloutHealth {
            rollout_id: session.id.clone(),
            component: session.component,
            status: session.status,
            to_version: session.to_version.clone(),
            success_rate: stats.success_rate(),
            error_rate: stats.error_rate,
            healthy: !halt.halt && stuck_jobs == 0,
            stuck_jobs,
            halt,
            stats,
        })
    }
}

fn is_stuck(job: &QueueJob, now: u64, stale_after_secs: u64) -> bool {
    job.status == JobStatus::Processing
        && job
            .started_at
            .is_some_and(|started| now.saturating_sub(started) > stale_after_secs)
}

fn overview(rows: &[TenantVersionRow], now: u64) -> FleetOverview {
    let components = Component::ALL
        .into_iter()
        .map(|component| {
            let summary = summarize(component, rows);
            let latest_version = summary
                .versions
                .keys()
                .filter(|v| v.as_str() != UNKNOWN_VERSION)
                .max_by(|a, b| compare_versions(a, b))
                .cloned();
            let on_latest = latest_version
                .as_ref()
                .and_then(|v| summary.versions.get(v))
                .copied()
                .unwrap_or(0);
            ComponentOverview {
                drifted: summary.total_tenants - on_latest,
                latest_version,
                summary,
            }
        })
        .collect();

    FleetOverview {
        total_tenants: rows.len() as u64,
        updating: count_status(rows, UpdateStatus::Updating),
        failed: count_status(rows, UpdateStatus::Failed),
        components,
        generated_at: now,
    }
}

fn count_status(rows: &[TenantVersionRow], status: UpdateStatus) -> u64 {
    rows.iter().filter(|r| r.update_status == status).count() as u64
}
