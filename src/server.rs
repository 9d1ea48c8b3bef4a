use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::AppState;

/// Builds the full Axum `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Liveness / info ─────────────────────────────────────
        .route("/ping", get(handlers::health::ping))
        .route("/health", get(handlers::health::health))
        .route("/db-info", get(handlers::health::db_info))
        // ── Replication-lag trials ──────────────────────────────
        .route("/rpo-test", post(handlers::rpo::rpo_test))
        .route("/global-rpo-test", post(handlers::rpo::global_rpo_test))
        // ── Marker one-shots (manual failover drills) ───────────
        .route("/write-marker", post(handlers::rpo::write_marker))
        .route("/read-marker", get(handlers::rpo::read_marker))
        .route("/delete-marker", delete(handlers::rpo::delete_marker))
        .route("/rpo-cleanup", post(handlers::rpo::rpo_cleanup))
        // ── Write-Forwarding exercise ───────────────────────────
        .route("/db-read", get(handlers::failover::db_read))
        .route("/db-write", post(handlers::failover::db_write))
        // ── Load driver control ─────────────────────────────────
        .route("/db-load/start", post(handlers::load::start_load))
        .route("/db-load/stop", post(handlers::load::stop_load))
        .route("/db-load/status", get(handlers::load::load_status))
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
