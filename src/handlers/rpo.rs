use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::marker::{self, SqlProbeChannel};
use crate::pool::PoolRole;
use crate::probe::{new_marker_id, TargetReader};
use crate::report::{run_trials, AggregateReport};
use crate::AppState;

use super::{db_error, require_stress_allowed, AppError};

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct TrialRequest {
    /// Trials to run; defaults differ per target (10 regional, 5
    /// cross-region) like the operator dashboard expects.
    pub iterations: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrialResponse {
    #[serde(flatten)]
    pub report: AggregateReport,
    pub writer_host: Option<String>,
    pub reader_host: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Deserialize)]
pub struct MarkerQuery {
    pub id: String,
    #[serde(default = "default_target")]
    pub target: TargetReader,
}

fn default_target() -> TargetReader {
    TargetReader::Regional
}

#[derive(Debug, Deserialize)]
pub struct CleanupRequest {
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

impl Default for CleanupRequest {
    fn default() -> Self {
        Self {
            max_age_secs: default_max_age_secs(),
        }
    }
}

/// Ten minutes, same window the external scheduler sweeps on.
fn default_max_age_secs() -> u64 {
    600
}

// ─── POST /rpo-test ──────────────────────────────────────────────

pub async fn rpo_test(
    State(state): State<Arc<AppState>>,
    req: Option<Json<TrialRequest>>,
) -> Result<Json<TrialResponse>, AppError> {
    require_stress_allowed(&state)?;
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let iterations = req.iterations.unwrap_or(10);
    run_lag_trial(&state, TargetReader::Regional, iterations)
        .await
        .map(Json)
}

// ─── POST /global-rpo-test ───────────────────────────────────────

pub async fn global_rpo_test(
    State(state): State<Arc<AppState>>,
    req: Option<Json<TrialRequest>>,
) -> Result<Json<TrialResponse>, AppError> {
    require_stress_allowed(&state)?;
    let req = req.map(|Json(r)| r).unwrap_or_default();
    let iterations = req.iterations.unwrap_or(5);
    run_lag_trial(&state, TargetReader::RemoteRegion, iterations)
        .await
        .map(Json)
}

async fn run_lag_trial(
    state: &AppState,
    target: TargetReader,
    iterations: u32,
) -> Result<TrialResponse, AppError> {
    let max = target.max_iterations();
    if iterations == 0 || iterations > max {
        return Err(AppError::BadRequest(format!(
            "iterations must be between 1 and {max}"
        )));
    }

    let primary = state.pools.get_pool(PoolRole::Primary)?;
    let reader = state.pools.get_pool(target.reader_role())?;

    marker::ensure_schema(&primary)
        .await
        .map_err(db_error)?;

    let channel = SqlProbeChannel::new(primary, reader);
    let abort = AtomicBool::new(false);
    let report = run_trials(&channel, target, iterations, &abort).await;

    Ok(TrialResponse {
        report,
        writer_host: state
            .pools
            .configured_host(PoolRole::Primary)
            .map(str::to_owned),
        reader_host: state
            .pools
            .configured_host(target.reader_role())
            .map(str::to_owned),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

// ─── POST /write-marker ──────────────────────────────────────────

/// One-shot marker write, for manually observing replication during a
/// failover drill (write here, read from the other region by id).
pub async fn write_marker(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_stress_allowed(&state)?;

    let primary = state.pools.get_pool(PoolRole::Primary)?;
    marker::ensure_schema(&primary).await.map_err(db_error)?;

    let marker_id = new_marker_id("rpo");
    let write_timestamp = chrono::Utc::now().timestamp_millis();
    marker::write(&primary, &marker_id, write_timestamp)
        .await
        .map_err(db_error)?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "markerId": marker_id,
        "writeTimestamp": write_timestamp,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

// ─── GET /read-marker ────────────────────────────────────────────

pub async fn read_marker(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MarkerQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let reader = state.pools.get_pool(query.target.reader_role())?;
    let found = marker::read(&reader, &query.id).await.map_err(db_error)?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "markerId": query.id,
        "found": found.is_some(),
        "writeTimestamp": found,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

// ─── DELETE /delete-marker ───────────────────────────────────────

pub async fn delete_marker(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MarkerQuery>,
) -> Result<Json<serde_json::Value>, AppError> {
    let primary = state.pools.get_pool(PoolRole::Primary)?;
    let deleted = marker::delete(&primary, &query.id).await.map_err(db_error)?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "markerId": query.id,
        "deleted": deleted,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}

// ─── POST /rpo-cleanup ───────────────────────────────────────────

/// Bulk safety net: reclaims markers orphaned by per-trial cleanup
/// failures (and aged load-driver rows). Invoked by an external
/// scheduler; also callable by hand after a messy drill.
pub async fn rpo_cleanup(
    State(state): State<Arc<AppState>>,
    req: Option<Json<CleanupRequest>>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_stress_allowed(&state)?;
    let req = req.map(|Json(r)| r).unwrap_or_default();

    let primary = state.pools.get_pool(PoolRole::Primary)?;
    let deleted = marker::delete_older_than(&primary, Duration::from_secs(req.max_age_secs))
        .await
        .map_err(db_error)?;

    Ok(Json(serde_json::json!({
        "status": "ok",
        "deleted": deleted,
        "maxAgeSecs": req.max_age_secs,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    })))
}
