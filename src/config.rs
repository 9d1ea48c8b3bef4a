use thiserror::Error;

// ─── Defaults ────────────────────────────────────────────────────

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_DB_PORT: u16 = 3306;
const DEFAULT_SERVICE_NAME: &str = "rpo-harness";
const DEFAULT_APP_ENV: &str = "dev";

// ─── Error type ──────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    /// One or more required environment variables are absent.
    /// The list names every missing variable, not just the first.
    #[error("missing env: {}", .0.join(", "))]
    MissingEnv(Vec<String>),

    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: String,
        value: String,
        reason: String,
    },
}

// ─── Top-level configuration ─────────────────────────────────────

/// Process configuration, read once at startup.
///
/// Database variables are kept raw (`Option`s) here — a box with no DB
/// configured at all must still boot and report the missing variables
/// from its health surface, so per-role validation happens when a pool
/// is actually requested (see `pool::PoolRegistry`).
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub service_name: String,
    pub app_env: String,

    /// Gates every stress-class endpoint (lag trials, load driver,
    /// cleanup). Off by default so a stray deploy can't hammer prod.
    pub allow_stress: bool,

    pub db: DbEnv,
}

/// Raw database environment shared by every pool role.
#[derive(Debug, Clone, Default)]
pub struct DbEnv {
    /// Primary (writer) endpoint host.
    pub host: Option<String>,
    /// One port for every role.
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,

    /// Same-region reader endpoint. Falls back to the primary host,
    /// which degrades the lag measurement to a self-read but keeps
    /// single-endpoint environments usable.
    pub reader_host: Option<String>,

    /// Remote-region reader endpoint. Only required when a
    /// cross-region trial or health check actually targets it.
    pub remote_reader_host: Option<String>,

    /// Issue the session read-consistency directive on connections
    /// acquired from the primary pool.
    pub read_consistency_override: bool,
}

/// Fully resolved connection parameters for one pool role.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Config {
    /// Read configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through an arbitrary key→value lookup.
    /// Tests inject plain maps here instead of mutating process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            port: parse_port(&lookup, "PORT", DEFAULT_PORT)?,
            service_name: lookup("SERVICE_NAME").unwrap_or_else(|| DEFAULT_SERVICE_NAME.into()),
            app_env: lookup("APP_ENV").unwrap_or_else(|| DEFAULT_APP_ENV.into()),
            allow_stress: parse_flag(&lookup, "ALLOW_STRESS", false)?,
            db: DbEnv {
                host: lookup("DB_HOST"),
                port: parse_port(&lookup, "DB_PORT", DEFAULT_DB_PORT)?,
                user: lookup("DB_USER"),
                password: lookup("DB_PASSWORD"),
                database: lookup("DB_NAME"),
                reader_host: lookup("DB_READER_HOST"),
                remote_reader_host: lookup("DB_REMOTE_READER_HOST"),
                read_consistency_override: parse_flag(&lookup, "DB_READ_CONSISTENCY_OVERRIDE", true)?,
            },
        })
    }
}

// ─── Parse helpers ───────────────────────────────────────────────

fn parse_port(
    lookup: impl Fn(&str) -> Option<String>,
    var: &str,
    default: u16,
) -> Result<u16, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var: var.into(),
            value: raw,
            reason: "expected a port number".into(),
        }),
    }
}

fn parse_flag(
    lookup: impl Fn(&str) -> Option<String>,
    var: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(var) {
        None => Ok(default),
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var: var.into(),
                value: raw,
                reason: "expected true or false".into(),
            }),
        },
    }
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_with_empty_env() {
        let cfg = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.db.port, 3306);
        assert_eq!(cfg.service_name, "rpo-harness");
        assert!(!cfg.allow_stress);
        assert!(cfg.db.read_consistency_override);
        assert!(cfg.db.host.is_none());
    }

    #[test]
    fn env_values_override_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("PORT", "8080"),
            ("SERVICE_NAME", "dr-drill"),
            ("ALLOW_STRESS", "true"),
            ("DB_HOST", "writer.cluster.local"),
            ("DB_READ_CONSISTENCY_OVERRIDE", "false"),
        ]))
        .unwrap();

        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.service_name, "dr-drill");
        assert!(cfg.allow_stress);
        assert_eq!(cfg.db.host.as_deref(), Some("writer.cluster.local"));
        assert!(!cfg.db.read_consistency_override);
    }

    #[test]
    fn malformed_port_is_rejected_eagerly() {
        let err = Config::from_lookup(lookup_from(&[("DB_PORT", "not-a-port")])).unwrap_err();
        match err {
            ConfigError::Invalid { var, .. } => assert_eq!(var, "DB_PORT"),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn malformed_flag_is_rejected_eagerly() {
        let err = Config::from_lookup(lookup_from(&[("ALLOW_STRESS", "yes please")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
