pub mod failover;
pub mod health;
pub mod load;
pub mod rpo;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::config::ConfigError;
use crate::AppState;

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    /// Stress-class endpoint hit with `ALLOW_STRESS` off.
    StressDisabled,
    AlreadyRunning,
    /// Pool-role configuration problem (missing env vars).
    Config(ConfigError),
    /// Write rejected by a read-only endpoint (Write Forwarding off).
    ReadOnly(String),
    Db(String),
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::StressDisabled => (
                StatusCode::FORBIDDEN,
                "stress endpoints disabled (set ALLOW_STRESS=true)".into(),
            ),
            Self::AlreadyRunning => {
                (StatusCode::CONFLICT, "Load run already in progress".into())
            }
            Self::Config(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            Self::ReadOnly(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("write rejected by read-only endpoint: {msg}"),
            ),
            Self::Db(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("database: {msg}"))
            }
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

/// Shared gate for endpoints that generate load or mutate test state.
pub fn require_stress_allowed(state: &AppState) -> Result<(), AppError> {
    if state.config.allow_stress {
        Ok(())
    } else {
        Err(AppError::StressDisabled)
    }
}

/// Map a driver fault onto the API error surface, keeping the
/// read-only rejection distinguishable for failover drills.
pub fn db_error(err: sqlx::Error) -> AppError {
    match crate::pool::classify_db_error(&err) {
        crate::pool::DbErrorKind::ReadOnly => AppError::ReadOnly(err.to_string()),
        _ => AppError::Db(err.to_string()),
    }
}
