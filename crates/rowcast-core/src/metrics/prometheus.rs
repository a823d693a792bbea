//! Prometheus metrics export.

use crate::dispatch::DeliveryOutcome;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries in milliseconds for delivery duration.
/// Converts to seconds: [0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0]
const DELIVERY_DURATION_BUCKETS_MS: [u64; 7] = [10, 50, 100, 250, 500, 1000, 5000];

/// Error types for labeled metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// A single row could not be read
    RowRead,
    /// Connection or query failures
    Source,
    /// Row could not be encoded
    Serialization,
    /// Anything else that ended a run
    Other,
}

impl ErrorType {
    /// Get the label value for Prometheus export.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorType::RowRead => "row_read",
            ErrorType::Source => "source",
            ErrorType::Serialization => "serialization",
            ErrorType::Other => "other",
        }
    }

    const ALL: [ErrorType; 4] = [
        ErrorType::RowRead,
        ErrorType::Source,
        ErrorType::Serialization,
        ErrorType::Other,
    ];
}

/// Publisher metrics. Counters are only ever written by the run loop and
/// the delivery tasks; nothing reads them back to make decisions.
pub struct PublishMetrics {
    // === COUNTERS ===
    rows_read_total: AtomicU64,
    envelopes_built_total: AtomicU64,
    delivery_attempts_total: AtomicU64,
    delivered_total: AtomicU64,
    undelivered_total: AtomicU64,
    rejected_total: AtomicU64,

    errors_total: AtomicU64,
    errors_row_read: AtomicU64,
    errors_source: AtomicU64,
    errors_serialization: AtomicU64,
    errors_other: AtomicU64,

    // === GAUGES ===
    /// 1 while a run is in progress
    run_active: AtomicU64,

    // === HISTOGRAM: delivery_duration_seconds ===
    delivery_duration_sum_ms: AtomicU64,
    delivery_duration_count: AtomicU64,
    /// Buckets: [0.01s, 0.05s, 0.1s, 0.25s, 0.5s, 1.0s, 5.0s, +Inf]
    delivery_duration_buckets: [AtomicU64; 8],
}

impl PublishMetrics {
    pub fn new() -> Self {
        Self {
            rows_read_total: AtomicU64::new(0),
            envelopes_built_total: AtomicU64::new(0),
            delivery_attempts_total: AtomicU64::new(0),
            delivered_total: AtomicU64::new(0),
            undelivered_total: AtomicU64::new(0),
            rejected_total: AtomicU64::new(0),
            errors_total: AtomicU64::new(0),
            errors_row_read: AtomicU64::new(0),
            errors_source: AtomicU64::new(0),
            errors_serialization: AtomicU64::new(0),
            errors_other: AtomicU64::new(0),
            run_active: AtomicU64::new(0),
            delivery_duration_sum_ms: AtomicU64::new(0),
            delivery_duration_count: AtomicU64::new(0),
            delivery_duration_buckets: Default::default(),
        }
    }

    // === COUNTER RECORDING ===

    pub fn record_row(&self) {
        self.rows_read_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_envelope(&self) {
        self.envelopes_built_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.delivery_attempts_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an error with a specific type label.
    pub fn record_error(&self, error_type: ErrorType) {
        self.errors_total.fetch_add(1, Ordering::Relaxed);
        self.error_counter(error_type).fetch_add(1, Ordering::Relaxed);
    }

    /// Record the terminal outcome of one envelope and how long it took.
    pub fn record_outcome(&self, outcome: &DeliveryOutcome, duration: Duration) {
        match outcome {
            DeliveryOutcome::Delivered => &self.delivered_total,
            DeliveryOutcome::Undelivered { .. } => &self.undelivered_total,
            DeliveryOutcome::Rejected { .. } => &self.rejected_total,
        }
        .fetch_add(1, Ordering::Relaxed);

        let duration_ms = duration.as_millis() as u64;
        self.delivery_duration_sum_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.delivery_duration_count.fetch_add(1, Ordering::Relaxed);

        // Prometheus buckets are cumulative (le = less than or equal)
        for (i, &bucket_ms) in DELIVERY_DURATION_BUCKETS_MS.iter().enumerate() {
            if duration_ms <= bucket_ms {
                self.delivery_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.delivery_duration_buckets[7].fetch_add(1, Ordering::Relaxed);
    }

    // === GAUGE UPDATES ===

    pub fn set_run_active(&self, active: bool) {
        self.run_active.store(u64::from(active), Ordering::Relaxed);
    }

    // === GETTERS ===

    pub fn rows_read_total(&self) -> u64 {
        self.rows_read_total.load(Ordering::Relaxed)
    }

    pub fn envelopes_built_total(&self) -> u64 {
        self.envelopes_built_total.load(Ordering::Relaxed)
    }

    pub fn delivery_attempts_total(&self) -> u64 {
        self.delivery_attempts_total.load(Ordering::Relaxed)
    }

    pub fn delivered_total(&self) -> u64 {
        self.delivered_total.load(Ordering::Relaxed)
    }

    pub fn undelivered_total(&self) -> u64 {
        self.undelivered_total.load(Ordering::Relaxed)
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected_total.load(Ordering::Relaxed)
    }

    pub fn errors_total(&self) -> u64 {
        self.errors_total.load(Ordering::Relaxed)
    }

    pub fn errors_by_type(&self, error_type: ErrorType) -> u64 {
        self.error_counter(error_type).load(Ordering::Relaxed)
    }

    pub fn run_active(&self) -> bool {
        self.run_active.load(Ordering::Relaxed) == 1
    }

    /// Get delivery duration histogram data for Prometheus export.
    pub fn delivery_duration_histogram(&self) -> DeliveryDurationHistogram {
        let mut buckets = [(0.0, 0); 7];
        for (i, &bucket_ms) in DELIVERY_DURATION_BUCKETS_MS.iter().enumerate() {
            buckets[i] = (
                bucket_ms as f64 / 1000.0,
                self.delivery_duration_buckets[i].load(Ordering::Relaxed),
            );
        }
        DeliveryDurationHistogram {
            sum_seconds: self.delivery_duration_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.delivery_duration_count.load(Ordering::Relaxed),
            buckets,
            inf_bucket: self.delivery_duration_buckets[7].load(Ordering::Relaxed),
        }
    }

    fn error_counter(&self, error_type: ErrorType) -> &AtomicU64 {
        match error_type {
            ErrorType::RowRead => &self.errors_row_read,
            ErrorType::Source => &self.errors_source,
            ErrorType::Serialization => &self.errors_serialization,
            ErrorType::Other => &self.errors_other,
        }
    }

    /// Export all metrics in Prometheus text format.
    ///
    /// ```
    /// use rowcast_core::metrics::PublishMetrics;
    ///
    /// let metrics = PublishMetrics::new();
    /// metrics.record_row();
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("rowcast_rows_read_total 1"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        self.export_prometheus_text_with_prefix("rowcast")
    }

    /// Export metrics in Prometheus text format with a custom name prefix.
    pub fn export_prometheus_text_with_prefix(&self, prefix: &str) -> String {
        let mut output = String::with_capacity(2048);

        // === COUNTERS ===

        let counters = [
            ("rows_read_total", "Rows pulled from the source", self.rows_read_total()),
            ("envelopes_built_total", "Event envelopes constructed", self.envelopes_built_total()),
            ("delivery_attempts_total", "HTTP delivery attempts", self.delivery_attempts_total()),
            ("delivered_total", "Envelopes acknowledged by the sink", self.delivered_total()),
            ("undelivered_total", "Envelopes never acknowledged", self.undelivered_total()),
            ("rejected_total", "Envelopes declined by the sink", self.rejected_total()),
            ("errors_total", "Total errors encountered", self.errors_total()),
        ];
        for (name, help, value) in counters {
            push_metric(&mut output, prefix, name, help, "counter", value);
        }

        let _ = writeln!(output, "# HELP {}_errors Errors by type", prefix);
        let _ = writeln!(output, "# TYPE {}_errors counter", prefix);
        for error_type in ErrorType::ALL {
            let _ = writeln!(
                output,
                "{}_errors{{type=\"{}\"}} {}",
                prefix,
                error_type.as_label(),
                self.errors_by_type(error_type)
            );
        }
        output.push('\n');

        // === GAUGES ===

        push_metric(
            &mut output,
            prefix,
            "run_active",
            "Whether a publish run is in progress",
            "gauge",
            u64::from(self.run_active()),
        );

        // === HISTOGRAM: delivery_duration_seconds ===

        let hist = self.delivery_duration_histogram();
        let _ = writeln!(
            output,
            "# HELP {}_delivery_duration_seconds Time from first attempt to terminal outcome",
            prefix
        );
        let _ = writeln!(output, "# TYPE {}_delivery_duration_seconds histogram", prefix);
        for (le, count) in &hist.buckets {
            let _ = writeln!(
                output,
                "{}_delivery_duration_seconds_bucket{{le=\"{}\"}} {}",
                prefix, le, count
            );
        }
        let _ = writeln!(
            output,
            "{}_delivery_duration_seconds_bucket{{le=\"+Inf\"}} {}",
            prefix, hist.inf_bucket
        );
        let _ = writeln!(
            output,
            "{}_delivery_duration_seconds_sum {}",
            prefix, hist.sum_seconds
        );
        let _ = writeln!(
            output,
            "{}_delivery_duration_seconds_count {}",
            prefix, hist.count
        );

        output
    }
}

fn push_metric(output: &mut String, prefix: &str, name: &str, help: &str, kind: &str, value: u64) {
    let _ = writeln!(output, "# HELP {}_{} {}", prefix, name, help);
    let _ = writeln!(output, "# TYPE {}_{} {}", prefix, name, kind);
    let _ = writeln!(output, "{}_{} {}", prefix, name, value);
    output.push('\n');
}

impl Default for PublishMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Delivery duration histogram data for export.
#[derive(Debug, Clone)]
pub struct DeliveryDurationHistogram {
    /// Sum of all observations in seconds
    pub sum_seconds: f64,
    /// Total count of observations
    pub count: u64,
    /// Bucket counts: (le_boundary_seconds, count)
    pub buckets: [(f64, u64); 7],
    /// +Inf bucket count
    pub inf_bucket: u64,
}
