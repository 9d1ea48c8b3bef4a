use std::sync::OnceLock;
use std::time::Duration;

use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::{Executor, MySqlPool};
use tracing::debug;

use crate::config::{ConfigError, DbEnv, PoolSettings};

// ─── Pool tuning ─────────────────────────────────────────────────

/// Per-pool connection ceiling. Callers queue on acquire rather than fail.
const MAX_CONNECTIONS: u32 = 20;

/// Cross-region links are slow to establish; bound the wait explicitly.
const REMOTE_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Session directive forwarded to every primary-pool connection.
/// Secondaries with Write Forwarding enabled honor it; a plain primary
/// rejects the variable, which is fine — the set is best-effort.
const READ_CONSISTENCY_SQL: &str = "SET aurora_replica_read_consistency = 'SESSION'";

// ─── Roles ───────────────────────────────────────────────────────

/// Logical endpoint roles. Each gets its own lazily built pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolRole {
    /// Accepts writes; source of truth for replication.
    Primary,
    /// Same-region read replica.
    RegionalReader,
    /// Read replica in the remote region.
    RemoteReader,
}

impl PoolRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::RegionalReader => "regional-reader",
            Self::RemoteReader => "remote-reader",
        }
    }
}

// ─── Registry ────────────────────────────────────────────────────

/// Owns one MySQL pool per role, built on first request and reused for
/// the life of the process. Constructed once at startup and passed by
/// reference into everything that talks to the database.
pub struct PoolRegistry {
    env: DbEnv,
    primary: OnceLock<MySqlPool>,
    regional: OnceLock<MySqlPool>,
    remote: OnceLock<MySqlPool>,
}

impl PoolRegistry {
    pub fn new(env: DbEnv) -> Self {
        Self {
            env,
            primary: OnceLock::new(),
            regional: OnceLock::new(),
            remote: OnceLock::new(),
        }
    }

    /// The host a role would connect to, if configured. Used by the
    /// info surface; never triggers pool construction.
    pub fn configured_host(&self, role: PoolRole) -> Option<&str> {
        match role {
            PoolRole::Primary => self.env.host.as_deref(),
            PoolRole::RegionalReader => self
                .env
                .reader_host
                .as_deref()
                .or(self.env.host.as_deref()),
            PoolRole::RemoteReader => self.env.remote_reader_host.as_deref(),
        }
    }

    /// Returns the memoized pool for `role`, building it on first use.
    ///
    /// Fails synchronously with the full list of missing variables when
    /// the role is not configured — no network I/O happens here, the
    /// pool connects lazily on first acquire.
    pub fn get_pool(&self, role: PoolRole) -> Result<MySqlPool, ConfigError> {
        let slot = match role {
            PoolRole::Primary => &self.primary,
            PoolRole::RegionalReader => &self.regional,
            PoolRole::RemoteReader => &self.remote,
        };

        if let Some(pool) = slot.get() {
            return Ok(pool.clone());
        }

        // A racing second builder just drops its pool; construction is
        // idempotent and lazy, so the extra object never connected.
        let pool = self.build_pool(role)?;
        Ok(slot.get_or_init(|| pool).clone())
    }

    /// Trivial round-trip against the role's endpoint, bounded so a
    /// dead cross-region link can't hang the health surface.
    pub async fn health_check(&self, role: PoolRole) -> Result<(), String> {
        let pool = self.get_pool(role).map_err(|e| e.to_string())?;

        let ping = sqlx::query("SELECT 1").execute(&pool);
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, ping).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(err.to_string()),
            Err(_) => Err(format!(
                "health check timed out after {}s",
                HEALTH_CHECK_TIMEOUT.as_secs()
            )),
        }
    }

    fn settings_for(&self, role: PoolRole) -> Result<PoolSettings, ConfigError> {
        let env = &self.env;
        let mut missing = Vec::new();

        if role == PoolRole::RemoteReader && env.remote_reader_host.is_none() {
            missing.push("DB_REMOTE_READER_HOST".to_string());
        }
        if env.host.is_none() {
            missing.push("DB_HOST".to_string());
        }
        if env.user.is_none() {
            missing.push("DB_USER".to_string());
        }
        if env.password.is_none() {
            missing.push("DB_PASSWORD".to_string());
        }
        if env.database.is_none() {
            missing.push("DB_NAME".to_string());
        }

        let host = match role {
            PoolRole::Primary => env.host.clone(),
            PoolRole::RegionalReader => env.reader_host.clone().or_else(|| env.host.clone()),
            PoolRole::RemoteReader => env.remote_reader_host.clone(),
        };

        match (host, env.user.clone(), env.password.clone(), env.database.clone()) {
            (Some(host), Some(user), Some(password), Some(database)) if missing.is_empty() => {
                Ok(PoolSettings {
                    host,
                    port: env.port,
                    user,
                    password,
                    database,
                })
            }
            _ => Err(ConfigError::MissingEnv(missing)),
        }
    }

    fn build_pool(&self, role: PoolRole) -> Result<MySqlPool, ConfigError> {
        let settings = self.settings_for(role)?;

        let connect = MySqlConnectOptions::new()
            .host(&settings.host)
            .port(settings.port)
            .username(&settings.user)
            .password(&settings.password)
            .database(&settings.database);

        let mut options = MySqlPoolOptions::new().max_connections(MAX_CONNECTIONS);

        if role == PoolRole::RemoteReader {
            options = options.acquire_timeout(REMOTE_ACQUIRE_TIMEOUT);
        }

        if role == PoolRole::Primary && self.env.read_consistency_override {
            options = options.after_connect(|conn, _meta| {
                Box::pin(async move {
                    // Plain primaries don't know this variable.
                    if let Err(err) = conn.execute(READ_CONSISTENCY_SQL).await {
                        debug!(error = %err, "read-consistency override not applied");
                    }
                    Ok(())
                })
            });
        }

        debug!(role = role.as_str(), host = %settings.host, "pool constructed");
        Ok(options.connect_lazy_with(connect))
    }
}

// ─── Driver-error classification ─────────────────────────────────

/// Coarse classification of a driver fault, used to decide whether a
/// poll loop keeps going and to give write rejections a useful shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// The endpoint refused a write because it is read-only — the
    /// expected rejection when Write Forwarding is off on a secondary.
    ReadOnly,
    /// The pool could not produce a connection at all. Structural;
    /// retrying inside a poll loop won't help.
    PoolExhausted,
    /// Anything else. Safe to treat as "not found yet" while polling.
    Transient,
}

pub fn classify_db_error(err: &sqlx::Error) -> DbErrorKind {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => DbErrorKind::PoolExhausted,
        sqlx::Error::Database(db) => classify_db_message(db.message()),
        _ => DbErrorKind::Transient,
    }
}

/// Substring matching on driver message text. Known fragility: the
/// server's error strings are not a stable contract, which is why this
/// lives behind exactly one function. MySQL 1290 reads
/// "running with the --read-only option so it cannot execute this
/// statement"; Aurora replicas phrase it the same way.
pub fn classify_db_message(message: &str) -> DbErrorKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("read-only") || lower.contains("read only") {
        DbErrorKind::ReadOnly
    } else {
        DbErrorKind::Transient
    }
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn full_env() -> DbEnv {
        DbEnv {
            host: Some("writer.local".into()),
            port: 3306,
            user: Some("probe".into()),
            password: Some("secret".into()),
            database: Some("drills".into()),
            reader_host: Some("reader.local".into()),
            remote_reader_host: Some("reader.remote".into()),
            read_consistency_override: true,
        }
    }

    #[test]
    fn missing_vars_are_enumerated() {
        let registry = PoolRegistry::new(DbEnv {
            port: 3306,
            ..DbEnv::default()
        });

        let err = registry.get_pool(PoolRole::Primary).unwrap_err();
        let msg = err.to_string();
        for var in ["DB_HOST", "DB_USER", "DB_PASSWORD", "DB_NAME"] {
            assert!(msg.contains(var), "{msg:?} should name {var}");
        }
    }

    #[tokio::test]
    async fn remote_role_requires_its_own_host() {
        let mut env = full_env();
        env.remote_reader_host = None;
        let registry = PoolRegistry::new(env);

        let err = registry.get_pool(PoolRole::RemoteReader).unwrap_err();
        assert!(err.to_string().contains("DB_REMOTE_READER_HOST"));

        // The other roles stay usable.
        assert!(registry.get_pool(PoolRole::Primary).is_ok());
    }

    #[tokio::test]
    async fn reader_host_falls_back_to_primary() {
        let mut env = full_env();
        env.reader_host = None;
        let registry = PoolRegistry::new(env);

        assert_eq!(
            registry.configured_host(PoolRole::RegionalReader),
            Some("writer.local")
        );
        assert!(registry.get_pool(PoolRole::RegionalReader).is_ok());
    }

    #[tokio::test]
    async fn pools_are_memoized_per_role() {
        let registry = PoolRegistry::new(full_env());

        // connect_lazy never touches the network, so this is safe.
        registry.get_pool(PoolRole::Primary).unwrap();
        registry.get_pool(PoolRole::Primary).unwrap();
        assert!(registry.primary.get().is_some());
        assert!(registry.regional.get().is_none());
    }

    #[test]
    fn read_only_rejection_is_classified() {
        let kind = classify_db_message(
            "The MySQL server is running with the --read-only option so it \
             cannot execute this statement",
        );
        assert_eq!(kind, DbErrorKind::ReadOnly);

        assert_eq!(
            classify_db_message("Duplicate entry 'rpo-1' for key 'marker_id'"),
            DbErrorKind::Transient
        );
    }

    #[test]
    fn pool_exhaustion_is_structural() {
        assert_eq!(
            classify_db_error(&sqlx::Error::PoolTimedOut),
            DbErrorKind::PoolExhausted
        );
        assert_eq!(
            classify_db_error(&sqlx::Error::RowNotFound),
            DbErrorKind::Transient
        );
    }
}
