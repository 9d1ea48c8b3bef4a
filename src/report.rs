use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tracing::debug;

use crate::marker::ProbeChannel;
use crate::probe::{measure_once, TargetReader};

// ─── Statistics ──────────────────────────────────────────────────

/// Summary statistics over one run's successful lag samples.
///
/// Indexing conventions are fixed: samples sorted ascending, min and
/// max at the ends, median at the lower-middle element, p95 at
/// `floor(0.95 * n)` clamped to the last index, mean rounded to the
/// nearest millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LagStats {
    pub avg_lag_ms: u64,
    pub min_lag_ms: u64,
    pub max_lag_ms: u64,
    pub median_lag_ms: u64,
    pub p95_lag_ms: u64,
}

impl LagStats {
    /// Returns `None` on an empty sample set — there is no such thing
    /// as statistics over zero measurements.
    pub fn from_samples(samples: &[u64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut sorted = samples.to_vec();
        sorted.sort_unstable();
        let n = sorted.len();

        let sum: u64 = sorted.iter().sum();
        let p95_index = ((n as f64) * 0.95).floor() as usize;

        Some(Self {
            avg_lag_ms: (sum as f64 / n as f64).round() as u64,
            min_lag_ms: sorted[0],
            max_lag_ms: sorted[n - 1],
            median_lag_ms: sorted[(n - 1) / 2],
            p95_lag_ms: sorted[p95_index.min(n - 1)],
        })
    }
}

// ─── Aggregate report ────────────────────────────────────────────

/// Outcome of one aggregator run. The all-failed variant has no
/// numeric fields at all, so meaningless statistics cannot be emitted
/// by construction.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum AggregateReport {
    AllFailed(AllFailedReport),
    Measured(MeasuredReport),
}

#[derive(Debug, Clone, Serialize)]
pub struct AllFailedReport {
    pub status: &'static str,
    pub message: &'static str,
    pub iterations: u32,
    pub successful: u32,
    pub failed: u32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasuredReport {
    pub status: &'static str,
    pub iterations: u32,
    pub successful: u32,
    pub failed: u32,
    #[serde(flatten)]
    pub stats: LagStats,
    pub all_lags_ms: Vec<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

// ─── The trial loop ──────────────────────────────────────────────

/// Runs `iterations` sequential lag trials against `channel` and folds
/// the outcomes into an [`AggregateReport`].
///
/// Trials never overlap: concurrent probes against one primary/reader
/// pair would share a replication stream and contaminate each other's
/// samples. A trial failure is recorded and the loop continues. The
/// `abort` flag is sampled between trials only — an in-flight trial
/// finishes through its own timeout and cleanup.
pub async fn run_trials<C: ProbeChannel>(
    channel: &C,
    target: TargetReader,
    iterations: u32,
    abort: &AtomicBool,
) -> AggregateReport {
    let params = target.params();
    let pause = target.trial_pause();

    let mut samples: Vec<u64> = Vec::with_capacity(iterations as usize);
    let mut errors: Vec<String> = Vec::new();

    for trial in 0..iterations {
        if abort.load(Ordering::SeqCst) {
            debug!(completed = trial, "trial run aborted between trials");
            break;
        }
        if trial > 0 {
            tokio::time::sleep(pause).await;
        }

        match measure_once(channel, params).await {
            Ok(elapsed_ms) => {
                debug!(trial, elapsed_ms, "lag sample collected");
                samples.push(elapsed_ms);
            }
            Err(failure) => {
                debug!(trial, %failure, "trial failed");
                errors.push(failure.to_string());
            }
        }
    }

    match LagStats::from_samples(&samples) {
        None => AggregateReport::AllFailed(AllFailedReport {
            status: "error",
            message: "All measurements failed",
            iterations,
            successful: 0,
            failed: errors.len() as u32,
            errors,
        }),
        Some(stats) => AggregateReport::Measured(MeasuredReport {
            status: "ok",
            iterations,
            successful: samples.len() as u32,
            failed: errors.len() as u32,
            stats,
            all_lags_ms: samples,
            errors,
        }),
    }
}

// ─── Tests ───────────────────────────────────────────────────────
