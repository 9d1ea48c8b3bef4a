use std::sync::Arc;

use axum::extract::State;
use axum::Json;

use crate::marker;
use crate::pool::PoolRole;
use crate::probe::new_marker_id;
use crate::AppState;

use super::{db_error, AppError};

// ─── GET /db-read ────────────────────────────────────────────────

/// Light reader-side query. Deliberately cheap — these endpoints feed
/// the DNS-weighted failover drill and must not trip autoscaling.
/// Succeeds regardless of Write Forwarding state.
pub async fn db_read(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let reader = state.pools.get_pool(PoolRole::RegionalReader)?;
    sqlx::query("SELECT 1")
        .execute(&reader)
        .await
        .map_err(db_error)?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "type": "read",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

// ─── POST /db-write ──────────────────────────────────────────────

/// Light primary-side insert. With Write Forwarding off on a
/// secondary cluster this is the endpoint that surfaces the expected
/// read-only rejection (as a 503, classified at the driver boundary).
pub async fn db_write(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let primary = state.pools.get_pool(PoolRole::Primary)?;
    marker::ensure_schema(&primary).await.map_err(db_error)?;

    let marker_id = new_marker_id("failover");
    let ts = chrono::Utc::now().timestamp_millis();
    marker::write(&primary, &marker_id, ts)
        .await
        .map_err(db_error)?;

    Ok(Json(serde_json::json!({
        "status": "success",
        "type": "write",
        "marker": marker_id,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
