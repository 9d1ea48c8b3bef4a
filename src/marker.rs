use async_trait::async_trait;
use sqlx::MySqlPool;
use thiserror::Error;

use crate::pool::{classify_db_error, DbErrorKind};

// ─── Schema ──────────────────────────────────────────────────────

/// Marker table. `marker_id` is the correlation key between writer and
/// reader; the unique constraint makes an id collision fail loudly on
/// insert instead of silently overwriting another trial's row.
const ENSURE_SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS rpo_markers (
  id BIGINT AUTO_INCREMENT PRIMARY KEY,
  marker_id VARCHAR(64) NOT NULL UNIQUE,
  write_timestamp BIGINT NOT NULL,
  created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
  INDEX idx_marker_id (marker_id)
) ENGINE=InnoDB";

/// Idempotent and race-safe: `CREATE TABLE IF NOT EXISTS` lets any
/// number of callers bootstrap concurrently without an existence-check
/// window.
pub async fn ensure_schema(pool: &MySqlPool) -> Result<(), sqlx::Error> {
    sqlx::query(ENSURE_SCHEMA_SQL).execute(pool).await?;
    Ok(())
}

// ─── Row operations ──────────────────────────────────────────────

pub async fn write(
    pool: &MySqlPool,
    marker_id: &str,
    write_timestamp_ms: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO rpo_markers (marker_id, write_timestamp) VALUES (?, ?)")
        .bind(marker_id)
        .bind(write_timestamp_ms)
        .execute(pool)
        .await?;
    Ok(())
}

/// Point lookup by marker id — indexed, so the query itself adds only
/// single-digit milliseconds of noise to a lag sample.
pub async fn read(pool: &MySqlPool, marker_id: &str) -> Result<Option<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT write_timestamp FROM rpo_markers WHERE marker_id = ?")
        .bind(marker_id)
        .fetch_optional(pool)
        .await
}

/// Idempotent: deleting an id that is already gone reports 0 rows.
pub async fn delete(pool: &MySqlPool, marker_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM rpo_markers WHERE marker_id = ?")
        .bind(marker_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Bulk safety net for markers orphaned by failed per-trial cleanup.
/// Compares against our own `write_timestamp` column so the cutoff is
/// immune to server-side clock settings.
pub async fn delete_older_than(
    pool: &MySqlPool,
    max_age: std::time::Duration,
) -> Result<u64, sqlx::Error> {
    let cutoff_ms = chrono::Utc::now().timestamp_millis() - max_age.as_millis() as i64;
    let result = sqlx::query("DELETE FROM rpo_markers WHERE write_timestamp < ?")
        .bind(cutoff_ms)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

// ─── Errors surfaced to the prober ───────────────────────────────

#[derive(Debug, Clone, Error)]
#[error("marker write failed: {message}")]
pub struct WriteError {
    pub message: String,
}

#[derive(Debug, Clone, Error)]
#[error("marker read failed: {message}")]
pub struct ReadError {
    pub kind: DbErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Error)]
#[error("marker delete failed: {message}")]
pub struct DeleteError {
    pub message: String,
}

// ─── The seam the prober measures through ────────────────────────

/// One primary/reader endpoint pair, as seen by the lag prober. The
/// prober writes and cleans up on the primary and polls the reader;
/// it never sees a pool or a SQL statement directly, which is what
/// lets tests substitute scripted in-memory channels.
#[async_trait]
pub trait ProbeChannel: Send + Sync {
    async fn write_marker(&self, marker_id: &str, write_timestamp_ms: i64)
        -> Result<(), WriteError>;

    /// `Ok(Some(ts))` once the row has replicated to the reader.
    async fn read_marker(&self, marker_id: &str) -> Result<Option<i64>, ReadError>;

    /// Issued against the primary — the reader may be read-only.
    async fn delete_marker(&self, marker_id: &str) -> Result<(), DeleteError>;
}

/// Production channel: a primary pool plus one target reader pool.
pub struct SqlProbeChannel {
    primary: MySqlPool,
    reader: MySqlPool,
}

impl SqlProbeChannel {
    pub fn new(primary: MySqlPool, reader: MySqlPool) -> Self {
        Self { primary, reader }
    }
}

// ─── Test double ─────────────────────────────────────────────────

/// Scripted in-memory channel shared by the prober and aggregator
/// tests.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    pub struct MockChannel {
        /// How many empty reads before the marker turns visible;
        /// `None` means it never replicates.
        pub visible_after_reads: Option<u32>,
        pub fail_writes: bool,
        pub fail_deletes: bool,
        /// Errors handed out (in order) before reads behave normally.
        pub read_errors: Mutex<VecDeque<ReadError>>,
        /// Invoked on every write; lets tests flip abort flags mid-run.
        pub on_write: Option<Box<dyn Fn() + Send + Sync>>,

        pub writes: AtomicU32,
        pub reads: AtomicU32,
        pub deletes: AtomicU32,
    }

    impl MockChannel {
        pub fn visible_after(empty_reads: u32) -> Self {
            Self {
                visible_after_reads: Some(empty_reads),
                fail_writes: false,
                fail_deletes: false,
                read_errors: Mutex::new(VecDeque::new()),
                on_write: None,
                writes: AtomicU32::new(0),
                reads: AtomicU32::new(0),
                deletes: AtomicU32::new(0),
            }
        }

        pub fn never_visible() -> Self {
            Self {
                visible_after_reads: None,
                ..Self::visible_after(0)
            }
        }

        pub fn with_read_errors(self, errors: Vec<ReadError>) -> Self {
            *self.read_errors.lock().unwrap() = errors.into();
            self
        }
    }

    #[async_trait]
    impl ProbeChannel for MockChannel {
        async fn write_marker(
            &self,
            _marker_id: &str,
            _write_timestamp_ms: i64,
        ) -> Result<(), WriteError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            if let Some(hook) = &self.on_write {
                hook();
            }
            if self.fail_writes {
                return Err(WriteError {
                    message: "insert rejected".into(),
                });
            }
            Ok(())
        }

        async fn read_marker(&self, _marker_id: &str) -> Result<Option<i64>, ReadError> {
            let attempt = self.reads.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = self.read_errors.lock().unwrap().pop_front() {
                return Err(err);
            }
            match self.visible_after_reads {
                Some(after) if attempt >= after => Ok(Some(42)),
                _ => Ok(None),
            }
        }

        async fn delete_marker(&self, _marker_id: &str) -> Result<(), DeleteError> {
            self.deletes.fetch_add(1, Ordering::SeqCst);
            if self.fail_deletes {
                return Err(DeleteError {
                    message: "connection lost".into(),
                });
            }
            Ok(())
        }
    }
}

#[async_trait]
impl ProbeChannel for SqlProbeChannel {
    async fn write_marker(
        &self,
        marker_id: &str,
        write_timestamp_ms: i64,
    ) -> Result<(), WriteError> {
        write(&self.primary, marker_id, write_timestamp_ms)
            .await
            .map_err(|err| WriteError {
                message: err.to_string(),
            })
    }

    async fn read_marker(&self, marker_id: &str) -> Result<Option<i64>, ReadError> {
        read(&self.reader, marker_id).await.map_err(|err| ReadError {
            kind: classify_db_error(&err),
            message: err.to_string(),
        })
    }

    async fn delete_marker(&self, marker_id: &str) -> Result<(), DeleteError> {
        delete(&self.primary, marker_id)
            .await
            .map(|_| ())
            .map_err(|err| DeleteError {
                message: err.to_string(),
            })
    }
}
