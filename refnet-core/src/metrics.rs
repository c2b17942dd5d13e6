//! Runtime metrics and instrumentation for the analytics engine.
//!
//! All engine subsystems emit `tracing` spans; this module adds lightweight
//! counters and a batch timing monitor that can be queried at runtime or
//! exported for operations dashboards.
//!
//! Design: lock-free `AtomicU64` counters in the hot path; the timing ring
//! buffer uses `parking_lot::Mutex` for rare reads (dashboard export).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

// ---------------------------------------------------------------------------
// Global Counters (lock-free)
// ---------------------------------------------------------------------------

/// Atomic counters for high-frequency engine events.
/// Incremented during imports and aggregations, read on dashboard export.
pub struct EngineCounters {
    /// Import rows resolved to an event.
    pub rows_resolved: AtomicU64,
    /// Import rows rejected with a warning.
    pub rows_missed: AtomicU64,
    /// Period bundles built.
    pub bundles_built: AtomicU64,
    /// Multi-period aggregations run.
    pub aggregations_run: AtomicU64,
    /// Malformed cached bundles skipped during aggregation.
    pub malformed_bundles_skipped: AtomicU64,
    /// Invariant violations raised at the builder boundary.
    pub invariant_violations: AtomicU64,
    /// Bundles written to the cache store.
    pub bundles_saved: AtomicU64,
    /// Bundles read from the cache store.
    pub bundles_loaded: AtomicU64,
}

impl EngineCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            rows_resolved: AtomicU64::new(0),
            rows_missed: AtomicU64::new(0),
            bundles_built: AtomicU64::new(0),
            aggregations_run: AtomicU64::new(0),
            malformed_bundles_skipped: AtomicU64::new(0),
            invariant_violations: AtomicU64::new(0),
            bundles_saved: AtomicU64::new(0),
            bundles_loaded: AtomicU64::new(0),
        }
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            rows_resolved: self.rows_resolved.load(Ordering::Relaxed),
            rows_missed: self.rows_missed.load(Ordering::Relaxed),
            bundles_built: self.bundles_built.load(Ordering::Relaxed),
            aggregations_run: self.aggregations_run.load(Ordering::Relaxed),
            malformed_bundles_skipped: self.malformed_bundles_skipped.load(Ordering::Relaxed),
            invariant_violations: self.invariant_violations.load(Ordering::Relaxed),
            bundles_saved: self.bundles_saved.load(Ordering::Relaxed),
            bundles_loaded: self.bundles_loaded.load(Ordering::Relaxed),
        }
    }
}

impl Default for EngineCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone)]
pub struct CounterSnapshot {
    /// Import rows resolved.
    pub rows_resolved: u64,
    /// Import rows rejected.
    pub rows_missed: u64,
    /// Period bundles built.
    pub bundles_built: u64,
    /// Aggregations run.
    pub aggregations_run: u64,
    /// Malformed bundles skipped.
    pub malformed_bundles_skipped: u64,
    /// Invariant violations raised.
    pub invariant_violations: u64,
    /// Bundles written to the store.
    pub bundles_saved: u64,
    /// Bundles read from the store.
    pub bundles_loaded: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP refnet_rows_resolved_total Import rows resolved to events\n\
             # TYPE refnet_rows_resolved_total counter\n\
             refnet_rows_resolved_total {}\n\
             # HELP refnet_rows_missed_total Import rows rejected with a warning\n\
             # TYPE refnet_rows_missed_total counter\n\
             refnet_rows_missed_total {}\n\
             # HELP refnet_bundles_built_total Period bundles built\n\
             # TYPE refnet_bundles_built_total counter\n\
             refnet_bundles_built_total {}\n\
             # HELP refnet_aggregations_run_total Multi-period aggregations run\n\
             # TYPE refnet_aggregations_run_total counter\n\
             refnet_aggregations_run_total {}\n\
             # HELP refnet_malformed_bundles_skipped_total Malformed cached bundles skipped\n\
             # TYPE refnet_malformed_bundles_skipped_total counter\n\
             refnet_malformed_bundles_skipped_total {}\n\
             # HELP refnet_invariant_violations_total Invariant violations raised\n\
             # TYPE refnet_invariant_violations_total counter\n\
             refnet_invariant_violations_total {}\n\
             # HELP refnet_bundles_saved_total Bundles written to the cache store\n\
             # TYPE refnet_bundles_saved_total counter\n\
             refnet_bundles_saved_total {}\n\
             # HELP refnet_bundles_loaded_total Bundles read from the cache store\n\
             # TYPE refnet_bundles_loaded_total counter\n\
             refnet_bundles_loaded_total {}\n",
            self.rows_resolved,
            self.rows_missed,
            self.bundles_built,
            self.aggregations_run,
            self.malformed_bundles_skipped,
            self.invariant_violations,
            self.bundles_saved,
            self.bundles_loaded,
        )
    }
}

// ---------------------------------------------------------------------------
// Batch Timing Monitor
// ---------------------------------------------------------------------------

/// Tracks wall-clock time per import/aggregation batch.
///
/// Usage:
/// ```rust,no_run
/// # use refnet_core::metrics::BatchTimingMonitor;
/// let monitor = BatchTimingMonitor::new(250.0); // 250ms slow-batch threshold
/// let _guard = monitor.begin_batch();
/// // ... resolve rows, build matrices ...
/// drop(_guard);
/// assert!(monitor.last_batch_ms() >= 0.0);
/// ```
pub struct BatchTimingMonitor {
    /// Milliseconds above which a batch is considered slow.
    threshold_ms: f64,
    /// Timing history (last N batches).
    history: Mutex<BatchHistory>,
}

/// Internal batch timing data.
struct BatchHistory {
    /// Ring buffer of recent batch timings (milliseconds).
    timings: Vec<f64>,
    /// Next write index.
    write_idx: usize,
    /// Number of batches recorded.
    count: u64,
    /// Whether the last batch exceeded the threshold.
    last_slow: bool,
}

impl BatchTimingMonitor {
    /// Create a new monitor with the given slow-batch threshold (ms).
    #[must_use]
    pub fn new(threshold_ms: f64) -> Self {
        Self {
            threshold_ms,
            history: Mutex::new(BatchHistory {
                timings: vec![0.0; 128], // Track last 128 batches
                write_idx: 0,
                count: 0,
                last_slow: false,
            }),
        }
    }

    /// Begin timing a batch. Returns a guard that records elapsed time on drop.
    pub fn begin_batch(&self) -> BatchGuard<'_> {
        BatchGuard {
            monitor: self,
            start: Instant::now(),
        }
    }

    /// Record a batch timing manually (milliseconds).
    pub fn record(&self, ms: f64) {
        let mut h = self.history.lock();
        let idx = h.write_idx;
        let len = h.timings.len();
        h.timings[idx] = ms;
        h.write_idx = (idx + 1) % len;
        h.count += 1;
        h.last_slow = ms > self.threshold_ms;
    }

    /// Get the last batch's timing (milliseconds).
    #[must_use]
    pub fn last_batch_ms(&self) -> f64 {
        let h = self.history.lock();
        if h.count == 0 {
            return 0.0;
        }
        let idx = if h.write_idx == 0 {
            h.timings.len() - 1
        } else {
            h.write_idx - 1
        };
        h.timings[idx]
    }

    /// Whether the last batch exceeded the threshold.
    #[must_use]
    pub fn is_slow(&self) -> bool {
        self.history.lock().last_slow
    }

    /// Get P50, P95, P99 timings from the history buffer (milliseconds).
    #[must_use]
    pub fn percentiles(&self) -> BatchPercentiles {
        let h = self.history.lock();
        let n = usize::try_from(h.count).unwrap_or(usize::MAX).min(h.timings.len());
        if n == 0 {
            return BatchPercentiles {
                p50: 0.0,
                p95: 0.0,
                p99: 0.0,
                max: 0.0,
                slow_ratio: 0.0,
            };
        }

        let mut sorted: Vec<f64> = h.timings[..n].to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let p50 = sorted[n / 2];
        let p95 = sorted[(n as f64 * 0.95) as usize];
        let p99 = sorted[(n as f64 * 0.99) as usize];
        let max = sorted[n - 1];
        let slow_count = sorted.iter().filter(|&&t| t > self.threshold_ms).count();

        BatchPercentiles {
            p50,
            p95,
            p99,
            max,
            slow_ratio: slow_count as f64 / n as f64,
        }
    }

    /// Total number of batches recorded.
    #[must_use]
    pub fn batch_count(&self) -> u64 {
        self.history.lock().count
    }

    /// The configured slow-batch threshold in milliseconds.
    #[must_use]
    pub fn threshold_ms(&self) -> f64 {
        self.threshold_ms
    }
}

/// RAII guard that records elapsed time when dropped.
pub struct BatchGuard<'a> {
    monitor: &'a BatchTimingMonitor,
    start: Instant,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.monitor.record(ms);
    }
}

/// Percentile statistics for batch timings.
#[derive(Debug, Clone)]
pub struct BatchPercentiles {
    /// 50th percentile (median) in milliseconds.
    pub p50: f64,
    /// 95th percentile in milliseconds.
    pub p95: f64,
    /// 99th percentile in milliseconds.
    pub p99: f64,
    /// Maximum observed timing.
    pub max: f64,
    /// Ratio of batches that exceeded the threshold (0.0–1.0).
    pub slow_ratio: f64,
}

impl BatchPercentiles {
    /// Format as a human-readable summary.
    #[must_use]
    pub fn summary(&self, threshold_ms: f64) -> String {
        format!(
            "P50={:.2}ms  P95={:.2}ms  P99={:.2}ms  Max={:.2}ms  Threshold={threshold_ms:.1}ms  \
             Slow={:.1}%",
            self.p50,
            self.p95,
            self.p99,
            self.max,
            self.slow_ratio * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Tracing Span Names
// ---------------------------------------------------------------------------

/// Span names used with `tracing::span!` across the engine.
pub mod spans {
    /// Top-level per-import-batch span.
    pub const IMPORT_BATCH: &str = "refnet::import";
    /// Name resolution span.
    pub const RESOLVE: &str = "refnet::resolve";
    /// Period matrix build span.
    pub const MATRIX_BUILD: &str = "refnet::matrix::build";
    /// Multi-period aggregation span.
    pub const AGGREGATE: &str = "refnet::aggregate";
    /// Tier classification span.
    pub const CLASSIFY: &str = "refnet::classify";
    /// Cache store save.
    pub const STORE_SAVE: &str = "refnet::store::save";
    /// Cache store load.
    pub const STORE_LOAD: &str = "refnet::store::load";
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
