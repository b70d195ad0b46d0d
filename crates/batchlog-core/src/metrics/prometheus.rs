//! Prometheus metrics export.

use crate::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries in milliseconds for flush duration.
/// Converts to seconds: [0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
const FLUSH_DURATION_BUCKETS_MS: [u64; 8] = [50, 100, 250, 500, 1000, 2500, 5000, 10000];

/// Default metric name prefix.
pub const DEFAULT_PREFIX: &str = "batchlog";

/// Flush failure categories for labeled metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Destination could not be provisioned
    Provisioning,
    /// Batch upload failed
    Transfer,
    /// Flush task cancelled or panicked
    Aborted,
    /// Anything else
    Other,
}

impl FailureKind {
    /// All kinds, in export order.
    pub const ALL: [FailureKind; 4] = [
        FailureKind::Provisioning,
        FailureKind::Transfer,
        FailureKind::Aborted,
        FailureKind::Other,
    ];

    /// Get the label value for Prometheus export.
    pub fn as_label(&self) -> &'static str {
        match self {
            FailureKind::Provisioning => "provisioning",
            FailureKind::Transfer => "transfer",
            FailureKind::Aborted => "aborted",
            FailureKind::Other => "other",
        }
    }

    fn index(&self) -> usize {
        match self {
            FailureKind::Provisioning => 0,
            FailureKind::Transfer => 1,
            FailureKind::Aborted => 2,
            FailureKind::Other => 3,
        }
    }
}

impl From<&Error> for FailureKind {
    fn from(err: &Error) -> Self {
        match err.kind() {
            "provisioning" => FailureKind::Provisioning,
            "transfer" => FailureKind::Transfer,
            "aborted" => FailureKind::Aborted,
            _ => FailureKind::Other,
        }
    }
}

/// Cache metrics with counters, gauges, and a flush duration histogram.
pub struct CacheMetrics {
    // === COUNTERS ===
    events_added_total: AtomicU64,
    /// Events refused because the cache was closed
    events_rejected_total: AtomicU64,
    batches_cut_total: AtomicU64,
    /// Successful flush cycles
    flushes_total: AtomicU64,
    events_published_total: AtomicU64,
    flush_failures: [AtomicU64; 4],

    // === GAUGES ===
    buffer_event_count: AtomicU64,
    flushes_in_flight: AtomicU64,

    // === HISTOGRAM: flush_duration_seconds ===
    flush_duration_sum_ms: AtomicU64,
    flush_duration_count: AtomicU64,
    /// Cumulative buckets plus +Inf
    flush_duration_buckets: [AtomicU64; 9],
}

impl CacheMetrics {
    /// Create new metrics.
    pub fn new() -> Self {
        Self {
            events_added_total: AtomicU64::new(0),
            events_rejected_total: AtomicU64::new(0),
            batches_cut_total: AtomicU64::new(0),
            flushes_total: AtomicU64::new(0),
            events_published_total: AtomicU64::new(0),
            flush_failures: Default::default(),
            buffer_event_count: AtomicU64::new(0),
            flushes_in_flight: AtomicU64::new(0),
            flush_duration_sum_ms: AtomicU64::new(0),
            flush_duration_count: AtomicU64::new(0),
            flush_duration_buckets: Default::default(),
        }
    }

    // === COUNTER RECORDING ===

    /// Record an event accepted into the live buffer.
    pub fn record_event_added(&self) {
        self.events_added_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an event refused by a closed cache.
    pub fn record_event_rejected(&self) {
        self.events_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cut.
    pub fn record_batch_cut(&self) {
        self.batches_cut_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful flush with duration histogram.
    pub fn record_flush(&self, events: usize, duration: Duration) {
        self.flushes_total.fetch_add(1, Ordering::Relaxed);
        self.events_published_total
            .fetch_add(events as u64, Ordering::Relaxed);
        self.observe_duration(duration);
    }

    /// Record a failed flush.
    pub fn record_flush_failure(&self, kind: FailureKind, duration: Duration) {
        self.flush_failures[kind.index()].fetch_add(1, Ordering::Relaxed);
        self.observe_duration(duration);
    }

    fn observe_duration(&self, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;
        self.flush_duration_sum_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.flush_duration_count.fetch_add(1, Ordering::Relaxed);

        // Buckets are cumulative (le = less than or equal)
        for (i, &bucket_ms) in FLUSH_DURATION_BUCKETS_MS.iter().enumerate() {
            if duration_ms <= bucket_ms {
                self.flush_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.flush_duration_buckets[FLUSH_DURATION_BUCKETS_MS.len()]
            .fetch_add(1, Ordering::Relaxed);
    }

    // === GAUGE UPDATES ===

    /// Update the live buffer event count.
    pub fn set_buffer_event_count(&self, count: usize) {
        self.buffer_event_count
            .store(count as u64, Ordering::Relaxed);
    }

    /// Update the number of flushes in flight.
    pub fn set_flushes_in_flight(&self, count: usize) {
        self.flushes_in_flight.store(count as u64, Ordering::Relaxed);
    }

    // === GETTERS ===

    pub fn events_added_total(&self) -> u64 {
        self.events_added_total.load(Ordering::Relaxed)
    }

    pub fn events_rejected_total(&self) -> u64 {
        self.events_rejected_total.load(Ordering::Relaxed)
    }

    pub fn batches_cut_total(&self) -> u64 {
        self.batches_cut_total.load(Ordering::Relaxed)
    }

    pub fn flushes_total(&self) -> u64 {
        self.flushes_total.load(Ordering::Relaxed)
    }

    pub fn events_published_total(&self) -> u64 {
        self.events_published_total.load(Ordering::Relaxed)
    }

    /// Failed flushes of one kind.
    pub fn flush_failures(&self, kind: FailureKind) -> u64 {
        self.flush_failures[kind.index()].load(Ordering::Relaxed)
    }

    /// Failed flushes of every kind.
    pub fn flush_failures_total(&self) -> u64 {
        FailureKind::ALL
            .iter()
            .map(|kind| self.flush_failures(*kind))
            .sum()
    }

    pub fn buffer_event_count(&self) -> u64 {
        self.buffer_event_count.load(Ordering::Relaxed)
    }

    pub fn flushes_in_flight(&self) -> u64 {
        self.flushes_in_flight.load(Ordering::Relaxed)
    }

    /// Get flush duration histogram data for Prometheus export.
    pub fn flush_duration_histogram(&self) -> FlushDurationHistogram {
        let mut buckets = [(0.0, 0); 8];
        for (i, &bucket_ms) in FLUSH_DURATION_BUCKETS_MS.iter().enumerate() {
            buckets[i] = (
                bucket_ms as f64 / 1000.0,
                self.flush_duration_buckets[i].load(Ordering::Relaxed),
            );
        }

        FlushDurationHistogram {
            sum_seconds: self.flush_duration_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.flush_duration_count.load(Ordering::Relaxed),
            buckets,
            inf_bucket: self.flush_duration_buckets[FLUSH_DURATION_BUCKETS_MS.len()]
                .load(Ordering::Relaxed),
        }
    }

    /// Export all metrics in Prometheus text format.
    ///
    /// # Example
    /// ```
    /// use batchlog_core::metrics::CacheMetrics;
    ///
    /// let metrics = CacheMetrics::new();
    /// metrics.record_event_added();
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("batchlog_events_added_total 1"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        self.export_prometheus_text_with_prefix(DEFAULT_PREFIX)
    }

    /// Export metrics in Prometheus text format with custom prefix.
    pub fn export_prometheus_text_with_prefix(&self, prefix: &str) -> String {
        let mut output = String::with_capacity(4096);

        // === COUNTERS ===

        push_single(
            &mut output,
            prefix,
            "events_added_total",
            "Events accepted into the live buffer",
            "counter",
            self.events_added_total(),
        );
        push_single(
            &mut output,
            prefix,
            "events_rejected_total",
            "Events rejected because the cache was closed",
            "counter",
            self.events_rejected_total(),
        );
        push_single(
            &mut output,
            prefix,
            "batches_cut_total",
            "Batches cut from the live buffer",
            "counter",
            self.batches_cut_total(),
        );
        push_single(
            &mut output,
            prefix,
            "flushes_total",
            "Flush cycles completed successfully",
            "counter",
            self.flushes_total(),
        );
        push_single(
            &mut output,
            prefix,
            "events_published_total",
            "Events handed to the sink by successful flushes",
            "counter",
            self.events_published_total(),
        );

        output.push_str(&format!(
            "# HELP {}_flush_failures_total Failed flush cycles by kind\n",
            prefix
        ));
        output.push_str(&format!("# TYPE {}_flush_failures_total counter\n", prefix));
        for kind in FailureKind::ALL {
            output.push_str(&format!(
                "{}_flush_failures_total{{kind=\"{}\"}} {}\n",
                prefix,
                kind.as_label(),
                self.flush_failures(kind)
            ));
        }
        output.push('\n');

        // === GAUGES ===

        push_single(
            &mut output,
            prefix,
            "buffer_event_count",
            "Events currently in the live buffer",
            "gauge",
            self.buffer_event_count(),
        );
        push_single(
            &mut output,
            prefix,
            "flushes_in_flight",
            "Flush cycles scheduled but not yet settled",
            "gauge",
            self.flushes_in_flight(),
        );

        // === HISTOGRAM ===

        let hist = self.flush_duration_histogram();

        output.push_str(&format!(
            "# HELP {}_flush_duration_seconds Duration of flush cycles\n",
            prefix
        ));
        output.push_str(&format!(
            "# TYPE {}_flush_duration_seconds histogram\n",
            prefix
        ));
        for (le, count) in &hist.buckets {
            output.push_str(&format!(
                "{}_flush_duration_seconds_bucket{{le=\"{}\"}} {}\n",
                prefix, le, count
            ));
        }
        output.push_str(&format!(
            "{}_flush_duration_seconds_bucket{{le=\"+Inf\"}} {}\n",
            prefix, hist.inf_bucket
        ));
        output.push_str(&format!(
            "{}_flush_duration_seconds_sum {}\n",
            prefix, hist.sum_seconds
        ));
        output.push_str(&format!(
            "{}_flush_duration_seconds_count {}\n",
            prefix, hist.count
        ));

        output
    }
}

fn push_single(output: &mut String, prefix: &str, name: &str, help: &str, kind: &str, value: u64) {
    output.push_str(&format!("# HELP {}_{} {}\n", prefix, name, help));
    output.push_str(&format!("# TYPE {}_{} {}\n", prefix, name, kind));
    output.push_str(&format!("{}_{} {}\n", prefix, name, value));
    output.push('\n');
}

impl Default for CacheMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Flush duration histogram data for export.
#[derive(Debug, Clone)]
pub struct FlushDurationHistogram {
    /// Sum of all observations in seconds
    pub sum_seconds: f64,
    /// Total count of observations
    pub count: u64,
    /// Bucket counts: (le_boundary_seconds, count)
    pub buckets: [(f64, u64); 8],
    /// +Inf bucket count
    pub inf_bucket: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;

    #[test]
    fn test_counters() {
        let metrics = CacheMetrics::new();

        metrics.record_event_added();
        metrics.record_event_added();
        metrics.record_event_rejected();
        metrics.record_batch_cut();
        assert_eq!(metrics.events_added_total(), 2);
        assert_eq!(metrics.events_rejected_total(), 1);
        assert_eq!(metrics.batches_cut_total(), 1);

        metrics.record_flush(10, Duration::from_millis(20));
        metrics.record_flush(5, Duration::from_millis(20));
        assert_eq!(metrics.flushes_total(), 2);
        assert_eq!(metrics.events_published_total(), 15);
    }

    #[test]
    fn test_gauges() {
        let metrics = CacheMetrics::new();
        metrics.set_buffer_event_count(42);
        metrics.set_flushes_in_flight(3);
        assert_eq!(metrics.buffer_event_count(), 42);
        assert_eq!(metrics.flushes_in_flight(), 3);

        metrics.set_buffer_event_count(0);
        assert_eq!(metrics.buffer_event_count(), 0);
    }

    #[test]
    fn test_failures_by_kind() {
        let metrics = CacheMetrics::new();
        metrics.record_flush_failure(FailureKind::Transfer, Duration::from_millis(10));
        metrics.record_flush_failure(FailureKind::Transfer, Duration::from_millis(10));
        metrics.record_flush_failure(FailureKind::Provisioning, Duration::from_millis(10));

        assert_eq!(metrics.flush_failures(FailureKind::Transfer), 2);
        assert_eq!(metrics.flush_failures(FailureKind::Provisioning), 1);
        assert_eq!(metrics.flush_failures(FailureKind::Aborted), 0);
        assert_eq!(metrics.flush_failures_total(), 3);
        // Failures are not successful flushes
        assert_eq!(metrics.flushes_total(), 0);
        assert_eq!(metrics.flush_duration_histogram().count, 3);
    }

    #[test]
    fn test_failure_kind_from_error() {
        let err: Error = SinkError::Transfer {
            key: "k".into(),
            message: "m".into(),
        }
        .into();
        assert_eq!(FailureKind::from(&err), FailureKind::Transfer);
        assert_eq!(
            FailureKind::from(&Error::FlushAborted("x".into())),
            FailureKind::Aborted
        );
        assert_eq!(FailureKind::from(&Error::CacheClosed), FailureKind::Other);
    }

    #[test]
    fn test_histogram_buckets() {
        let metrics = CacheMetrics::new();

        metrics.record_flush(1, Duration::from_millis(30));
        metrics.record_flush(1, Duration::from_millis(300));
        metrics.record_flush(1, Duration::from_secs(20));

        let hist = metrics.flush_duration_histogram();
        assert_eq!(hist.count, 3);
        assert_eq!(hist.buckets[0], (0.05, 1));
        assert_eq!(hist.buckets[3], (0.5, 2));
        assert_eq!(hist.buckets[7], (10.0, 2));
        assert_eq!(hist.inf_bucket, 3);
        assert!((hist.sum_seconds - 20.33).abs() < 1e-9);
    }

    #[test]
    fn test_prometheus_text_export() {
        let metrics = CacheMetrics::new();
        metrics.record_event_added();
        metrics.record_flush(1, Duration::from_millis(10));
        metrics.record_flush_failure(FailureKind::Aborted, Duration::from_millis(10));

        let text = metrics.export_prometheus_text();
        assert!(text.contains("# TYPE batchlog_events_added_total counter"));
        assert!(text.contains("batchlog_events_added_total 1"));
        assert!(text.contains("batchlog_flushes_total 1"));
        assert!(text.contains("batchlog_flush_failures_total{kind=\"aborted\"} 1"));
        assert!(text.contains("batchlog_flush_failures_total{kind=\"transfer\"} 0"));
        assert!(text.contains("# TYPE batchlog_buffer_event_count gauge"));
        assert!(text.contains("batchlog_flush_duration_seconds_bucket{le=\"+Inf\"} 2"));
        assert!(text.contains("batchlog_flush_duration_seconds_count 2"));
    }

    #[test]
    fn test_prometheus_text_export_with_prefix() {
        let metrics = CacheMetrics::new();
        let text = metrics.export_prometheus_text_with_prefix("web");
        assert!(text.contains("web_events_added_total 0"));
        assert!(!text.contains("batchlog_"));
    }

    #[test]
    fn test_prometheus_text_format_validity() {
        let text = CacheMetrics::new().export_prometheus_text();
        for line in text.lines().filter(|l| !l.is_empty()) {
            if line.starts_with('#') {
                assert!(line.starts_with("# HELP ") || line.starts_with("# TYPE "));
            } else {
                let value = line.rsplit(' ').next().unwrap();
                assert!(value.parse::<f64>().is_ok(), "bad sample line: {}", line);
            }
        }
    }
}
