use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Counters for a controller session.
///
/// Shared between the controller task and the fetcher; every counter is
/// updated with relaxed atomics.
#[derive(Debug, Default)]
pub struct ControllerMetrics {
    // Fetches
    pub fetches_total: AtomicU64,
    pub fetch_bytes_total: AtomicU64,
    /// Sum of fetch latencies in milliseconds
    pub fetch_latency_sum_ms: AtomicU64,
    pub fetch_errors: AtomicU64,
    /// Repeated attempts after transient failures
    pub fetch_retries: AtomicU64,
    pub fetches_cancelled: AtomicU64,

    // Queue and sink
    pub buffers_enqueued: AtomicU64,
    pub buffers_appended: AtomicU64,
    pub append_failures: AtomicU64,
    /// Buffers dropped because their generation was superseded
    pub stale_dropped: AtomicU64,

    // Scheduling
    pub prefetches: AtomicU64,
    pub seek_recoveries: AtomicU64,
    pub switches: AtomicU64,
    pub sink_reinits: AtomicU64,
}

/// Point-in-time copy of [`ControllerMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub fetches_total: u64,
    pub fetch_bytes_total: u64,
    pub fetch_latency_sum_ms: u64,
    pub fetch_errors: u64,
    pub fetch_retries: u64,
    pub fetches_cancelled: u64,
    pub buffers_enqueued: u64,
    pub buffers_appended: u64,
    pub append_failures: u64,
    pub stale_dropped: u64,
    pub prefetches: u64,
    pub seek_recoveries: u64,
    pub switches: u64,
    pub sink_reinits: u64,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful fetch
    pub fn record_fetch(&self, bytes: u64, latency_ms: u64) {
        self.fetches_total.fetch_add(1, Ordering::Relaxed);
        self.fetch_bytes_total.fetch_add(bytes, Ordering::Relaxed);
        self.fetch_latency_sum_ms
            .fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_retry(&self) {
        self.fetch_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fetch_cancelled(&self) {
        self.fetches_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.buffers_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_appended(&self) {
        self.buffers_appended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_append_failure(&self) {
        self.append_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_dropped(&self, count: u64) {
        self.stale_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_prefetch(&self) {
        self.prefetches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_seek_recovery(&self) {
        self.seek_recoveries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_switch(&self) {
        self.switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sink_reinit(&self) {
        self.sink_reinits.fetch_add(1, Ordering::Relaxed);
    }

    /// Average fetch latency in milliseconds, `None` before the first fetch.
    pub fn average_fetch_latency_ms(&self) -> Option<f64> {
        let total = self.fetches_total.load(Ordering::Relaxed);
        if total == 0 {
            return None;
        }
        let sum = self.fetch_latency_sum_ms.load(Ordering::Relaxed);
        Some(sum as f64 / total as f64)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            fetches_total: self.fetches_total.load(Ordering::Relaxed),
            fetch_bytes_total: self.fetch_bytes_total.load(Ordering::Relaxed),
            fetch_latency_sum_ms: self.fetch_latency_sum_ms.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            fetch_retries: self.fetch_retries.load(Ordering::Relaxed),
            fetches_cancelled: self.fetches_cancelled.load(Ordering::Relaxed),
            buffers_enqueued: self.buffers_enqueued.load(Ordering::Relaxed),
            buffers_appended: self.buffers_appended.load(Ordering::Relaxed),
            append_failures: self.append_failures.load(Ordering::Relaxed),
            stale_dropped: self.stale_dropped.load(Ordering::Relaxed),
            prefetches: self.prefetches.load(Ordering::Relaxed),
            seek_recoveries: self.seek_recoveries.load(Ordering::Relaxed),
            switches: self.switches.load(Ordering::Relaxed),
            sink_reinits: self.sink_reinits.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        let avg_latency = self
            .average_fetch_latency_ms()
            .map(|l| format!("{l:.2}ms"))
            .unwrap_or_else(|| "N/A".to_string());

        info!(
            fetches = s.fetches_total,
            fetch_bytes = s.fetch_bytes_total,
            fetch_errors = s.fetch_errors,
            fetch_retries = s.fetch_retries,
            fetches_cancelled = s.fetches_cancelled,
            avg_latency = %avg_latency,
            enqueued = s.buffers_enqueued,
            appended = s.buffers_appended,
            append_failures = s.append_failures,
            stale_dropped = s.stale_dropped,
            prefetches = s.prefetches,
            seek_recoveries = s.seek_recoveries,
            switches = s.switches,
            sink_reinits = s.sink_reinits,
            "Segment buffer session summary"
        );
    }
}
