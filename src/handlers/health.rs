use axum::{extract::State, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::pool::PoolRole;
use crate::AppState;

// ─── Response types ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DbStatus {
    Ok,
    Error { message: String },
    NotConfigured,
}

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub status: &'static str,
    pub service: String,
    pub env: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// "ok" when the primary answers, "degraded" otherwise. The
    /// process itself is alive either way.
    pub status: &'static str,
    pub service: String,
    pub env: String,
    pub db: DbStatus,
    pub uptime_ms: u64,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub struct RoleInfo {
    pub host: Option<String>,
    #[serde(flatten)]
    pub check: DbStatus,
}

#[derive(Debug, Serialize)]
pub struct DbInfoResponse {
    pub status: &'static str,
    pub databases: Databases,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Databases {
    pub primary: RoleInfo,
    pub regional_reader: RoleInfo,
    pub remote_reader: RoleInfo,
}

// ─── GET /ping ───────────────────────────────────────────────────

pub async fn ping(State(state): State<Arc<AppState>>) -> Json<PingResponse> {
    Json(PingResponse {
        status: "ok",
        service: state.config.service_name.clone(),
        env: state.config.app_env.clone(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

// ─── GET /health ─────────────────────────────────────────────────

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let db = check_role(&state, PoolRole::Primary).await;

    Json(HealthResponse {
        status: match db {
            DbStatus::Ok => "ok",
            _ => "degraded",
        },
        service: state.config.service_name.clone(),
        env: state.config.app_env.clone(),
        db,
        uptime_ms: state.started_at.elapsed().as_millis() as u64,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

// ─── GET /db-info ────────────────────────────────────────────────

/// Per-role endpoint summary: configured host plus a live round-trip.
/// Roles with no configuration report `not_configured` instead of an
/// error — a single-region deployment is a valid setup.
pub async fn db_info(State(state): State<Arc<AppState>>) -> Json<DbInfoResponse> {
    Json(DbInfoResponse {
        status: "ok",
        databases: Databases {
            primary: role_info(&state, PoolRole::Primary).await,
            regional_reader: role_info(&state, PoolRole::RegionalReader).await,
            remote_reader: role_info(&state, PoolRole::RemoteReader).await,
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

// ─── Helpers ─────────────────────────────────────────────────────

async fn check_role(state: &AppState, role: PoolRole) -> DbStatus {
    match state.pools.health_check(role).await {
        Ok(()) => DbStatus::Ok,
        Err(message) => DbStatus::Error { message },
    }
}

async fn role_info(state: &AppState, role: PoolRole) -> RoleInfo {
    let host = state.pools.configured_host(role).map(str::to_owned);
    let check = if host.is_some() {
        check_role(state, role).await
    } else {
        DbStatus::NotConfigured
    };
    RoleInfo { host, check }
}
