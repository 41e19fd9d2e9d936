//! Metrics collection for executor monitoring.

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Executor metrics collector
#[derive(Debug)]
pub struct Metrics {
    // Submission counters
    tasks_submitted: AtomicU64,
    tasks_rejected: AtomicU64,

    // Outcome counters, recorded by workers
    tasks_completed: AtomicU64,
    tasks_failed: AtomicU64,
    tasks_panicked: AtomicU64,
    tasks_cancelled: AtomicU64,
    results_discarded: AtomicU64,

    busy_time_ns: AtomicU64,

    // Task run time; None only if the histogram could not be allocated
    run_time_histogram: Option<RwLock<Histogram<u64>>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        let histogram = Histogram::new(3).ok().map(RwLock::new);

        Self {
            tasks_submitted: AtomicU64::new(0),
            tasks_rejected: AtomicU64::new(0),
            tasks_completed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            tasks_panicked: AtomicU64::new(0),
            tasks_cancelled: AtomicU64::new(0),
            results_discarded: AtomicU64::new(0),
            busy_time_ns: AtomicU64::new(0),
            run_time_histogram: histogram,
            start_time: Instant::now(),
        }
    }

    pub fn record_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A submission refused because the executor was shutting down.
    pub fn record_rejected(&self) {
        self.tasks_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long a task ran, whatever its outcome.
    pub fn record_run_time(&self, duration_ns: u64) {
        self.busy_time_ns.fetch_add(duration_ns, Ordering::Relaxed);

        if let Some(histogram) = &self.run_time_histogram {
            if let Some(mut hist) = histogram.try_write() {
                hist.saturating_record(duration_ns);
            }
        }
    }

    pub fn record_completed(&self) {
        self.tasks_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A panic is also a failure; both counters move.
    pub fn record_panic(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
        self.tasks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self) {
        self.tasks_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    /// The task finished after its future had already been resolved.
    pub fn record_discarded(&self) {
        self.results_discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (avg, p50, p99, max) = match &self.run_time_histogram {
            Some(histogram) => {
                let hist = histogram.read();
                if hist.len() > 0 {
                    (
                        hist.mean() as u64,
                        hist.value_at_quantile(0.50),
                        hist.value_at_quantile(0.99),
                        hist.max(),
                    )
                } else {
                    (0, 0, 0, 0)
                }
            }
            None => (0, 0, 0, 0),
        };

        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_rejected: self.tasks_rejected.load(Ordering::Relaxed),
            tasks_completed: self.tasks_completed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            tasks_cancelled: self.tasks_cancelled.load(Ordering::Relaxed),
            results_discarded: self.results_discarded.load(Ordering::Relaxed),
            busy_time_ns: self.busy_time_ns.load(Ordering::Relaxed),
            avg_run_time_ns: avg,
            p50_run_time_ns: p50,
            p99_run_time_ns: p99,
            max_run_time_ns: max,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub uptime: Duration,
    pub tasks_submitted: u64,
    pub tasks_rejected: u64,
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    pub tasks_panicked: u64,
    pub tasks_cancelled: u64,
    pub results_discarded: u64,
    pub busy_time_ns: u64,
    pub avg_run_time_ns: u64,
    pub p50_run_time_ns: u64,
    pub p99_run_time_ns: u64,
    pub max_run_time_ns: u64,
}

impl MetricsSnapshot {
    /// Accepted tasks whose futures reached a terminal outcome.
    pub fn tasks_finished(&self) -> u64 {
        self.tasks_completed + self.tasks_failed + self.tasks_cancelled
    }

    pub fn tasks_per_second(&self) -> f64 {
        let seconds = self.uptime.as_secs_f64();
        if seconds == 0.0 {
            return 0.0;
        }
        self.tasks_finished() as f64 / seconds
    }
}
