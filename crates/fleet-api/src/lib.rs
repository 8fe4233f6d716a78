//! fleet-api — operator REST API for the fleet update orchestrator.
//!
//! Every response uses the `{success, data, error}` envelope. Read routes
//! have no side effects and are safe to poll.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/dashboard` | Fleet overview, active rollout health, queue, history |
//! | GET | `/api/v1/fleet` | Per-component version histograms |
//! | GET | `/api/v1/tenants/{id}` | One tenant's versions and update status |
//! | GET | `/api/v1/compatibility` | Check a dashboard/agent/workflow triple |
//! | GET | `/api/v1/queue/stats` | Queue stats, optionally for one rollout |
//! | GET | `/api/v1/history` | Recent audit entries, optionally for one rollout |
//! | GET | `/api/v1/rollouts` | List rollouts, newest first |
//! | POST | `/api/v1/rollouts` | Initiate a rollout |
//! | GET | `/api/v1/rollouts/{id}` | Rollout session |
//! | GET | `/api/v1/rollouts/{id}/progress` | Wave progress and health |
//! | POST | `/api/v1/rollouts/{id}/advance` | Advance once the wave has drained |
//! | POST | `/api/v1/rollouts/{id}/pause` | Pause |
//! | POST | `/api/v1/rollouts/{id}/resume` | Resume |
//! | POST | `/api/v1/rollouts/{id}/abort` | Abort and cancel outstanding jobs |
//! | POST | `/api/v1/emergency-rollback` | Emergency rollback |
//! | POST | `/api/v1/templates` | Publish a template version |
//! | GET | `/api/v1/templates/{workflow}` | Versions and the current one |
//! | GET | `/api/v1/templates/{workflow}/compare` | Diff two versions |
//! | GET | `/api/v1/templates/{workflow}/{version}` | One template version |
//! | POST | `/api/v1/templates/{workflow}/{version}/promote` | Make current |
//! | POST | `/api/v1/templates/{workflow}/{version}/canary` | Flag as canary |

pub mod error;
pub mod handlers;
pub mod rollout_handlers;
pub mod template_handlers;

use axum::Router;
use axum::routing::{get, post};
use fleet_core::FleetConfig;
use fleet_monitor::UpdateMonitor;
use fleet_queue::UpdateQueue;
use fleet_registry::VersionRegistry;
use fleet_rollout::RolloutEngine;
use fleet_state::StateStore;
use fleet_templates::TemplateRepository;

pub use error::ApiError;

/// Shared state for API handlers. Every service is a cheap clone over the
/// same store.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub registry: VersionRegistry,
    pub queue: UpdateQueue,
    pub engine: RolloutEngine,
    pub templates: TemplateRepository,
    pub monitor: UpdateMonitor,
}

impl ApiState {
    pub fn new(store: StateStore, config: &FleetConfig) -> Self {
        let engine = RolloutEngine::from_config(store.clone(), config);
        Self {
            registry: VersionRegistry::new(store.clone()),
            queue: UpdateQueue::new(store.clone()),
            templates: TemplateRepository::new(store.clone()),
            monitor: UpdateMonitor::new(store.clone(), engine.clone(), config.queue.stale_after_secs),
            engine,
            store,
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/dashboard", get(handlers::dashboard))
        .route("/fleet", get(handlers::fleet_overview))
        .route("/tenants/{id}", get(handlers::get_tenant))
        .route("/compatibility", get(handlers::compatibility))
        .route("/queue/stats", get(handlers::queue_stats))
        .route("/history", get(handlers::history))
        .route(
            "/rollouts",
            get(rollout_handlers::list_rollouts).post(rollout_handlers::initiate_rollout),
        )
        .route("/rollouts/{id}", get(rollout_handlers::get_rollout))
        .route("/rollouts/{id}/progress", get(rollout_handlers::rollout_progress))
        .route("/rollouts/{id}/advance", post(rollout_handlers::advance_rollout))
        .route("/rollouts/{id}/pause", post(rollout_handlers::pause_rollout))
        .route("/rollouts/{id}/resume", post(rollout_handlers::resume_rollout))
        .route("/rollouts/{id}/abort", post(rollout_handlers::abort_rollout))
        .route("/emergency-rollback", post(rollout_handlers::emergency_rollback))
        .route("/templates", post(template_handlers::publish_template))
        .route("/templates/{workflow}", get(template_handlers::list_templates))
        .route("/templates/{workflow}/compare", get(template_handlers::compare_templates))
        .route("/templates/{workflow}/{version}", get(template_handlers::get_template))
        .route(
            "/templates/{workflow}/{version}/promote",
            post(template_handlers::promote_template),
        )
        .route(
            "/templates/{workflow}/{version}/canary",
            post(template_handlers::mark_canary),
        )
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
