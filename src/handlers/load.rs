use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::load::{LoadSpec, LoadStatus};
use crate::pool::PoolRole;
use crate::AppState;

use super::{require_stress_allowed, AppError};

// ─── Request / response types ────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct StartLoadRequest {
    /// Number of concurrent worker tasks generating load
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// How long the load run lasts (seconds)
    #[serde(default = "default_duration")]
    pub duration_secs: u64,

    /// Percentage of operations that are reads (0–100)
    #[serde(default = "default_read_pct")]
    pub read_pct: u8,
}

fn default_concurrency() -> u32 {
    10
}
fn default_duration() -> u64 {
    30
}
fn default_read_pct() -> u8 {
    70
}

#[derive(Debug, Serialize)]
pub struct LoadControl {
    pub running: bool,
    pub message: String,
}

// ─── POST /db-load/start ─────────────────────────────────────────

pub async fn start_load(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartLoadRequest>,
) -> Result<Json<LoadControl>, AppError> {
    require_stress_allowed(&state)?;

    // Guard: only one load run at a time
    if state.load_running.load(Ordering::SeqCst) {
        return Err(AppError::AlreadyRunning);
    }

    if req.concurrency == 0 || req.concurrency > 100 {
        return Err(AppError::BadRequest(
            "concurrency must be between 1 and 100".into(),
        ));
    }
    if req.duration_secs == 0 || req.duration_secs > 300 {
        return Err(AppError::BadRequest(
            "duration_secs must be between 1 and 300".into(),
        ));
    }
    if req.read_pct > 100 {
        return Err(AppError::BadRequest(
            "read_pct must be between 0 and 100".into(),
        ));
    }

    // Load always targets the primary; mixing it into a reader pool
    // would distort any lag trial running against that reader.
    let pool = state.pools.get_pool(PoolRole::Primary)?;

    state.load_metrics.reset();

    // Flip the flag BEFORE spawning so workers see it immediately
    state.load_running.store(true, Ordering::SeqCst);

    let msg = format!(
        "Started: {} workers × {}s, {}% reads / {}% writes",
        req.concurrency,
        req.duration_secs,
        req.read_pct,
        100u8.saturating_sub(req.read_pct),
    );

    let running = state.load_running.clone();
    let metrics = state.load_metrics.clone();
    let spec = LoadSpec {
        concurrency: req.concurrency,
        duration_secs: req.duration_secs,
        read_pct: req.read_pct,
    };

    let handle = tokio::spawn(async move {
        crate::load::run(running, metrics, pool, spec).await;
    });

    // Stash the handle so `stop` can await clean shutdown
    let mut guard = state.load_handle.lock().await;
    *guard = Some(handle);

    Ok(Json(LoadControl {
        running: true,
        message: msg,
    }))
}

// ─── POST /db-load/stop ──────────────────────────────────────────

pub async fn stop_load(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LoadControl>, AppError> {
    if !state.load_running.load(Ordering::SeqCst) {
        return Ok(Json(LoadControl {
            running: false,
            message: "No load run is in progress".into(),
        }));
    }

    // Signal all workers to stop
    state.load_running.store(false, Ordering::SeqCst);

    // Await the driver task so we know it's fully stopped
    let mut guard = state.load_handle.lock().await;
    if let Some(handle) = guard.take() {
        // Ignore JoinError — the task may have already finished
        let _ = handle.await;
    }

    Ok(Json(LoadControl {
        running: false,
        message: "Load run stopped".into(),
    }))
}

// ─── GET /db-load/status ─────────────────────────────────────────

pub async fn load_status(State(state): State<Arc<AppState>>) -> Json<LoadStatus> {
    let running = state.load_running.load(Ordering::SeqCst);
    Json(state.load_metrics.snapshot(running))
}
