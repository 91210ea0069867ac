//! API route definitions
//!
//! - /api/v1/batches - lifecycle, audit and recalculation
//! - /api/v1/tanks - tank metadata, movement monitoring, suggestions
//! - /api/v1/lab-results, /api/v1/lab-associations - lab reconciliation
//! - /api/v1/audit - full audit log

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{self, ApiState};

/// Versioned API routes, nested under `/api/v1`.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        // Batch lifecycle
        .route(
            "/batches",
            get(handlers::list_batches).post(handlers::create_batch),
        )
        .route("/batches/:id", get(handlers::get_batch))
        .route("/batches/:id/close", post(handlers::close_batch))
        .route("/batches/:id/void", post(handlers::void_batch))
        .route("/batches/:id/audit", get(handlers::batch_audit))
        // Recalculation
        .route("/batches/:id/recalculate", post(handlers::recalculate_batch))
        .route("/batches/:id/recalculation", get(handlers::pending_recalculation))
        .route(
            "/batches/:id/recalculation/report",
            get(handlers::recalculation_report),
        )
        .route(
            "/batches/:id/recalculation/approve",
            post(handlers::approve_recalculation),
        )
        .route(
            "/batches/:id/recalculation/reject",
            post(handlers::reject_recalculation),
        )
        .route(
            "/batches/:id/recalculation/rejections",
            get(handlers::recalculation_rejections),
        )
        .route("/audit", get(handlers::audit_log))
        // Tanks & movement
        .route("/tanks", get(handlers::list_tanks))
        .route("/tanks/:id", get(handlers::get_tank))
        .route("/monitoring", get(handlers::monitored_tanks))
        .route(
            "/tanks/:id/monitoring",
            post(handlers::start_monitoring).delete(handlers::stop_monitoring),
        )
        .route("/tanks/:id/movement", get(handlers::latest_movement))
        .route("/tanks/:id/movement/stream", get(handlers::movement_stream))
        .route(
            "/tanks/:id/suggestion/dismiss",
            post(handlers::dismiss_suggestion),
        )
        .route(
            "/tanks/:id/suggestion/accept",
            post(handlers::accept_suggestion),
        )
        // Lab reconciliation
        .route("/lab-results", post(handlers::associate_lab_result))
        .route("/tanks/:id/lab-associations", get(handlers::lab_associations))
        .route(
            "/lab-associations/:id",
            get(handlers::get_association).patch(handlers::update_association_status),
        )
        .with_state(state)
}

/// Unversioned health endpoint.
pub fn health_routes(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .with_state(state)
}
