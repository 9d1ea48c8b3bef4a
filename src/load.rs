use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sqlx::MySqlPool;
use tracing::{error, info};

use crate::marker;
use crate::probe::new_marker_id;

// ─── Histogram bounds: 1 μs → 60 s, 3 significant figures ───────

const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Load specification ──────────────────────────────────────────

/// One background load run. Workers hammer the primary through the
/// marker store until the deadline passes or the flag is lowered.
#[derive(Debug, Clone, Copy)]
pub struct LoadSpec {
    /// Concurrent Tokio workers.
    pub concurrency: u32,
    /// Hard stop after this long.
    pub duration_secs: u64,
    /// Percentage of operations that are reads (0–100).
    pub read_pct: u8,
}

// ─── Metrics ─────────────────────────────────────────────────────

/// Shared counters + latency histogram for the current load run.
/// Workers call `record()`, the status endpoint calls `snapshot()`.
pub struct LoadMetrics {
    total_reads: AtomicU64,
    total_writes: AtomicU64,
    total_errors: AtomicU64,
    latencies_us: Mutex<Histogram<u64>>,
    started: Mutex<Option<Instant>>,
}

/// Percentile breakdown of per-operation round-trip latency.
#[derive(Debug, Clone, Serialize)]
pub struct LatencySummary {
    pub min_us: u64,
    pub max_us: u64,
    pub mean_us: f64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadStatus {
    pub running: bool,
    pub total_reads: u64,
    pub total_writes: u64,
    pub total_errors: u64,
    pub ops_per_second: f64,
    pub elapsed_secs: f64,
    pub latency: LatencySummary,
}

impl LoadMetrics {
    pub fn new() -> Self {
        Self {
            total_reads: AtomicU64::new(0),
            total_writes: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
            latencies_us: Mutex::new(new_histogram()),
            started: Mutex::new(None),
        }
    }

    /// Wipe all data — called when a new load run starts.
    pub fn reset(&self) {
        self.total_reads.store(0, Ordering::SeqCst);
        self.total_writes.store(0, Ordering::SeqCst);
        self.total_errors.store(0, Ordering::SeqCst);
        *self.latencies_us.lock() = new_histogram();
        *self.started.lock() = Some(Instant::now());
    }

    pub fn record(&self, latency: Duration, is_read: bool, ok: bool) {
        if is_read {
            self.total_reads.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_writes.fetch_add(1, Ordering::Relaxed);
        }
        if !ok {
            self.total_errors.fetch_add(1, Ordering::Relaxed);
        }
        let us = (latency.as_micros() as u64).max(1);
        let _ = self.latencies_us.lock().record(us);
    }

    pub fn snapshot(&self, running: bool) -> LoadStatus {
        let reads = self.total_reads.load(Ordering::Relaxed);
        let writes = self.total_writes.load(Ordering::Relaxed);
        let elapsed_secs = self
            .started
            .lock()
            .as_ref()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);

        let ops_per_second = if elapsed_secs > 0.0 {
            (reads + writes) as f64 / elapsed_secs
        } else {
            0.0
        };

        LoadStatus {
            running,
            total_reads: reads,
            total_writes: writes,
            total_errors: self.total_errors.load(Ordering::Relaxed),
            ops_per_second,
            elapsed_secs,
            latency: LatencySummary::from_histogram(&self.latencies_us.lock()),
        }
    }
}

fn new_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
        .expect("histogram creation")
}

impl LatencySummary {
    fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.len() == 0 {
            return Self::empty();
        }
        Self {
            min_us: hist.min(),
            max_us: hist.max(),
            mean_us: hist.mean(),
            p50_us: hist.value_at_percentile(50.0),
            p95_us: hist.value_at_percentile(95.0),
            p99_us: hist.value_at_percentile(99.0),
            count: hist.len(),
        }
    }

    fn empty() -> Self {
        Self {
            min_us: 0,
            max_us: 0,
            mean_us: 0.0,
            p50_us: 0,
            p95_us: 0,
            p99_us: 0,
            count: 0,
        }
    }
}

// ─── Driver entry point ──────────────────────────────────────────

/// Spawns `concurrency` workers that generate read/write traffic
/// through the marker store until the deadline or until `running` is
/// lowered. Lowers the flag itself on the way out so status flips to
/// idle without a stop call.
pub async fn run(
    running: Arc<AtomicBool>,
    metrics: Arc<LoadMetrics>,
    pool: MySqlPool,
    spec: LoadSpec,
) {
    if let Err(err) = marker::ensure_schema(&pool).await {
        error!(error = %err, "load driver could not bootstrap the marker table");
        running.store(false, Ordering::SeqCst);
        return;
    }

    info!(
        concurrency = spec.concurrency,
        duration_secs = spec.duration_secs,
        read_pct = spec.read_pct,
        "load run started"
    );

    let deadline = Instant::now() + Duration::from_secs(spec.duration_secs);
    let mut handles = Vec::with_capacity(spec.concurrency as usize);

    for worker_id in 0..spec.concurrency {
        let running = running.clone();
        let metrics = metrics.clone();
        let pool = pool.clone();
        let read_pct = spec.read_pct;

        handles.push(tokio::spawn(async move {
            worker(worker_id, running, metrics, pool, deadline, read_pct).await;
        }));
    }

    for handle in handles {
        let _ = handle.await;
    }

    running.store(false, Ordering::SeqCst);
    info!("load run finished");
}

// ─── Worker loop ─────────────────────────────────────────────────

async fn worker(
    id: u32,
    running: Arc<AtomicBool>,
    metrics: Arc<LoadMetrics>,
    pool: MySqlPool,
    deadline: Instant,
    read_pct: u8,
) {
    // Each worker gets its own deterministic RNG seeded uniquely.
    let mut rng = StdRng::seed_from_u64(1000 + id as u64);

    // Reads target this worker's most recent write so the point lookup
    // exercises the same index the prober depends on.
    let mut last_marker: Option<String> = None;

    while running.load(Ordering::Relaxed) && Instant::now() < deadline {
        let is_read = rng.gen_range(0u8..100) < read_pct;
        let t0 = Instant::now();

        let ok = if is_read {
            do_read(&pool, last_marker.as_deref()).await
        } else {
            match do_write(&pool).await {
                Ok(marker_id) => {
                    last_marker = Some(marker_id);
                    true
                }
                Err(_) => false,
            }
        };

        metrics.record(t0.elapsed(), is_read, ok);
    }
}

async fn do_read(pool: &MySqlPool, last_marker: Option<&str>) -> bool {
    match last_marker {
        Some(marker_id) => marker::read(pool, marker_id).await.is_ok(),
        // Nothing written yet — fall back to a bare ping.
        None => sqlx::query("SELECT 1").execute(pool).await.is_ok(),
    }
}

async fn do_write(pool: &MySqlPool) -> Result<String, sqlx::Error> {
    let marker_id = new_marker_id("load");
    let ts = chrono::Utc::now().timestamp_millis();
    marker::write(pool, &marker_id, ts).await?;
    Ok(marker_id)
}

// ─── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_and_percentiles_track_recorded_ops() {
        let metrics = LoadMetrics::new();
        metrics.reset();

        metrics.record(Duration::from_micros(100), true, true);
        metrics.record(Duration::from_micros(200), true, true);
        metrics.record(Duration::from_micros(5_000), false, false);

        let status = metrics.snapshot(true);
        assert!(status.running);
        assert_eq!(status.total_reads, 2);
        assert_eq!(status.total_writes, 1);
        assert_eq!(status.total_errors, 1);
        assert_eq!(status.latency.count, 3);
        assert!(status.latency.min_us <= status.latency.p50_us);
        assert!(status.latency.p50_us <= status.latency.p95_us);
        assert!(status.latency.p95_us <= status.latency.max_us);
    }

    #[test]
    fn empty_metrics_produce_a_zeroed_summary() {
        let metrics = LoadMetrics::new();
        let status = metrics.snapshot(false);
        assert!(!status.running);
        assert_eq!(status.latency.count, 0);
        assert_eq!(status.ops_per_second, 0.0);
    }

    #[test]
    fn reset_wipes_previous_run() {
        let metrics = LoadMetrics::new();
        metrics.reset();
        metrics.record(Duration::from_micros(50), true, true);
        metrics.reset();

        let status = metrics.snapshot(false);
        assert_eq!(status.total_reads, 0);
        assert_eq!(status.latency.count, 0);
    }

    #[test]
    fn sub_microsecond_latencies_clamp_into_histogram_range() {
        let metrics = LoadMetrics::new();
        metrics.reset();
        metrics.record(Duration::from_nanos(10), true, true);

        let status = metrics.snapshot(false);
        assert_eq!(status.latency.count, 1);
        assert!(status.latency.min_us >= 1);
    }
}
