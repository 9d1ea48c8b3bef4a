use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::marker::{ProbeChannel, ReadError, WriteError};
use crate::pool::{DbErrorKind, PoolRole};

// ─── Probe parameters ────────────────────────────────────────────

/// Bounds for one write-then-poll measurement. The two deployments of
/// interest differ only in these numbers; the algorithm is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeParams {
    /// Give up once the marker has been invisible on the reader for
    /// this long.
    pub max_wait: Duration,
    /// Sleep between read attempts. Small relative to the lags being
    /// measured (tens of ms) so polling doesn't quantize the sample,
    /// but large enough not to saturate the reader.
    pub poll_interval: Duration,
}

impl ProbeParams {
    pub const REGIONAL: Self = Self {
        max_wait: Duration::from_secs(10),
        poll_interval: Duration::from_millis(5),
    };

    /// Cross-region replication is inherently slower; a wider deadline
    /// keeps slow-but-healthy links from reading as failures.
    pub const REMOTE_REGION: Self = Self {
        max_wait: Duration::from_secs(30),
        poll_interval: Duration::from_millis(10),
    };
}

/// Which reader pool a trial run targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetReader {
    Regional,
    RemoteRegion,
}

impl TargetReader {
    pub fn params(self) -> ProbeParams {
        match self {
            Self::Regional => ProbeParams::REGIONAL,
            Self::RemoteRegion => ProbeParams::REMOTE_REGION,
        }
    }

    /// Pause between trials. Longer cross-region so one trial's
    /// still-replicating write can't land inside the next trial's
    /// poll window.
    pub fn trial_pause(self) -> Duration {
        match self {
            Self::Regional => Duration::from_millis(100),
            Self::RemoteRegion => Duration::from_millis(500),
        }
    }

    pub fn max_iterations(self) -> u32 {
        match self {
            Self::Regional => 100,
            Self::RemoteRegion => 50,
        }
    }

    pub fn reader_role(self) -> PoolRole {
        match self {
            Self::Regional => PoolRole::RegionalReader,
            Self::RemoteRegion => PoolRole::RemoteReader,
        }
    }
}

// ─── Trial outcome ───────────────────────────────────────────────

/// Why a single trial produced no lag sample. Failures are data, not
/// harness faults — the aggregator records them and keeps going.
#[derive(Debug, Clone, Error)]
pub enum TrialFailure {
    #[error("{0}")]
    Write(WriteError),

    #[error("{0}")]
    Read(ReadError),

    #[error("Replication timeout: data not replicated within {}ms", .max_wait.as_millis())]
    Timeout { max_wait: Duration },
}

// ─── Marker ids ──────────────────────────────────────────────────

/// `{prefix}-{epoch_ms}-{8 hex chars}` — a high-resolution timestamp
/// plus a random suffix makes collisions negligible even across
/// concurrent probers, and the prefix keeps trial markers and
/// load-driver markers tellable apart in the table.
pub fn new_marker_id(prefix: &str) -> String {
    let ms = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{ms}-{}", &suffix[..8])
}

// ─── The measurement ─────────────────────────────────────────────

/// One end-to-end lag sample: write a marker on the primary, poll the
/// reader until it shows up or `max_wait` elapses, clean up either way.
///
/// Elapsed time is taken from the client-observed write instant on a
/// monotonic clock — server timestamps never enter the math, so clock
/// skew between regions cannot contaminate the sample.
pub async fn measure_once<C: ProbeChannel>(
    channel: &C,
    params: ProbeParams,
) -> Result<u64, TrialFailure> {
    let marker_id = new_marker_id("rpo");
    let write_timestamp_ms = chrono::Utc::now().timestamp_millis();
    let write_instant = Instant::now();

    // A failed write leaves nothing behind: no polling, no cleanup.
    if let Err(err) = channel.write_marker(&marker_id, write_timestamp_ms).await {
        return Err(TrialFailure::Write(err));
    }

    let poll_start = Instant::now();
    let outcome = loop {
        match channel.read_marker(&marker_id).await {
            Ok(Some(_)) => {
                break Ok(write_instant.elapsed().as_millis() as u64);
            }
            Ok(None) => {}
            Err(err) if err.kind == DbErrorKind::PoolExhausted => {
                // Structural — more polling can only queue behind the
                // same exhausted pool.
                break Err(TrialFailure::Read(err));
            }
            Err(err) => {
                // Transient read hiccup: same as "not visible yet".
                debug!(%marker_id, error = %err, "transient read error while polling");
            }
        }

        if poll_start.elapsed() >= params.max_wait {
            break Err(TrialFailure::Timeout {
                max_wait: params.max_wait,
            });
        }
        tokio::time::sleep(params.poll_interval).await;
    };

    // Cleanup runs on the success and timeout paths alike, against the
    // primary (the reader may be read-only). A cleanup failure must
    // never mask the trial outcome; the bulk sweep reclaims the row.
    if let Err(err) = channel.delete_marker(&marker_id).await {
        warn!(%marker_id, error = %err, "marker cleanup failed; deferred to bulk cleanup");
    }

    outcome
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker::testing::MockChannel;
    use std::sync::atomic::Ordering;

    #[test]
    fn target_reader_isolates_parameters() {
        let regional = TargetReader::Regional.params();
        let remote = TargetReader::RemoteRegion.params();

        assert_eq!(regional.max_wait, Duration::from_millis(10_000));
        assert_eq!(regional.poll_interval, Duration::from_millis(5));
        assert_eq!(remote.max_wait, Duration::from_millis(30_000));
        assert_eq!(remote.poll_interval, Duration::from_millis(10));

        assert_eq!(TargetReader::Regional.reader_role(), PoolRole::RegionalReader);
        assert_eq!(TargetReader::RemoteRegion.reader_role(), PoolRole::RemoteReader);
    }

    #[test]
    fn marker_ids_are_unique_and_prefixed() {
        let a = new_marker_id("rpo");
        let b = new_marker_id("rpo");
        assert!(a.starts_with("rpo-"));
        assert_ne!(a, b);
        assert!(a.len() <= 64);
    }

    #[tokio::test(start_paused = true)]
    async fn immediate_visibility_yields_near_zero_sample() {
        let channel = MockChannel::visible_after(0);

        let elapsed = measure_once(&channel, ProbeParams::REGIONAL)
            .await
            .expect("marker was visible on first read");

        assert!(elapsed < 2 * ProbeParams::REGIONAL.poll_interval.as_millis() as u64);
        assert_eq!(channel.writes.load(Ordering::SeqCst), 1);
        assert_eq!(channel.reads.load(Ordering::SeqCst), 1);
        assert_eq!(channel.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_bounded_and_cleaned_up() {
        let channel = MockChannel::never_visible();
        let params = ProbeParams {
            max_wait: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        };

        let started = Instant::now();
        let err = measure_once(&channel, params).await.unwrap_err();
        let ran_for = started.elapsed();

        assert!(matches!(err, TrialFailure::Timeout { .. }));
        assert!(err.to_string().contains("50ms"), "got: {err}");
        // Bounded by max_wait plus at most one poll interval.
        assert!(ran_for <= Duration::from_millis(55), "ran for {ran_for:?}");
        assert_eq!(channel.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_never_polls_or_deletes() {
        let mut channel = MockChannel::visible_after(0);
        channel.fail_writes = true;

        let err = measure_once(&channel, ProbeParams::REGIONAL)
            .await
            .unwrap_err();

        assert!(matches!(err, TrialFailure::Write(_)));
        assert_eq!(channel.reads.load(Ordering::SeqCst), 0);
        assert_eq!(channel.deletes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_read_errors_keep_polling() {
        let channel = MockChannel::visible_after(0).with_read_errors(vec![
            ReadError {
                kind: DbErrorKind::Transient,
                message: "connection reset".into(),
            },
            ReadError {
                kind: DbErrorKind::Transient,
                message: "connection reset".into(),
            },
        ]);

        measure_once(&channel, ProbeParams::REGIONAL)
            .await
            .expect("poll loop should ride out transient errors");

        // Two errored attempts, then the one that found the marker.
        assert_eq!(channel.reads.load(Ordering::SeqCst), 3);
        assert_eq!(channel.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_exhaustion_aborts_the_trial_with_cleanup() {
        let channel = MockChannel::visible_after(0).with_read_errors(vec![ReadError {
            kind: DbErrorKind::PoolExhausted,
            message: "pool timed out".into(),
        }]);

        let err = measure_once(&channel, ProbeParams::REGIONAL)
            .await
            .unwrap_err();

        assert!(matches!(err, TrialFailure::Read(_)));
        assert_eq!(channel.deletes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_failure_does_not_mask_success() {
        let mut channel = MockChannel::visible_after(0);
        channel.fail_deletes = true;

        let result = measure_once(&channel, ProbeParams::REGIONAL).await;

        assert!(result.is_ok());
        assert_eq!(channel.deletes.load(Ordering::SeqCst), 1);
    }
}
