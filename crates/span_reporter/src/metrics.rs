//! Reporter metrics
//!
//! The reporter emits two instruments through an injected [`MetricsSink`]:
//!
//! | Name | Kind | Meaning |
//! |------|------|---------|
//! | [`SPANS_DROPPED`] | counter | spans that will never reach the destination |
//! | [`SPANS_BULK_SIZE`] | histogram | number of spans drained per flush |
//!
//! Two sinks are provided. [`ReporterMetrics`] keeps the values in process
//! (plain atomics, useful for tests and dashboards), and [`MetricsFacade`]
//! forwards to whatever global recorder is installed for the `metrics` crate.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counter of spans rejected by the queue, discarded while the destination
/// was unavailable, lost with a failed request, or refused per item.
pub const SPANS_DROPPED: &str = "spans_dropped";

/// Histogram of batch sizes drained by the flusher.
pub const SPANS_BULK_SIZE: &str = "spans_bulk_size";

/// Destination for reporter instruments.
///
/// Shared between producers and the flusher, so implementations must be
/// cheap and non-blocking.
pub trait MetricsSink: Send + Sync {
    /// Adds `value` to the counter `name`.
    fn increment_counter(&self, name: &'static str, value: u64);

    /// Records one observation in the histogram `name`.
    fn record_histogram(&self, name: &'static str, value: f64);
}

/// In-process metrics sink (atomics only).
///
/// Histogram observations are summarized as count / sum / max, which is all
/// the reporter itself needs to expose.
#[derive(Debug, Default)]
pub struct ReporterMetrics {
    spans_dropped: AtomicU64,
    bulks_recorded: AtomicU64,
    bulk_spans_total: AtomicU64,
    bulk_size_max: AtomicU64,
}

// Relaxed everywhere: these are statistics and guard no other data.
impl ReporterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spans_dropped(&self) -> u64 {
        self.spans_dropped.load(Ordering::Relaxed)
    }

    /// Number of batches recorded in the bulk-size histogram.
    pub fn bulks_recorded(&self) -> u64 {
        self.bulks_recorded.load(Ordering::Relaxed)
    }

    /// Sum of all recorded batch sizes.
    pub fn bulk_spans_total(&self) -> u64 {
        self.bulk_spans_total.load(Ordering::Relaxed)
    }

    pub fn bulk_size_max(&self) -> u64 {
        self.bulk_size_max.load(Ordering::Relaxed)
    }

    /// Average batch size, `None` before the first flush.
    pub fn mean_bulk_size(&self) -> Option<f64> {
        let count = self.bulks_recorded();
        if count == 0 {
            None
        } else {
            Some(self.bulk_spans_total() as f64 / count as f64)
        }
    }
}

impl MetricsSink for ReporterMetrics {
    fn increment_counter(&self, name: &'static str, value: u64) {
        if name == SPANS_DROPPED {
            self.spans_dropped.fetch_add(value, Ordering::Relaxed);
        }
    }

    fn record_histogram(&self, name: &'static str, value: f64) {
        if name == SPANS_BULK_SIZE {
            let value = value as u64;
            self.bulks_recorded.fetch_add(1, Ordering::Relaxed);
            self.bulk_spans_total.fetch_add(value, Ordering::Relaxed);
            self.bulk_size_max.fetch_max(value, Ordering::Relaxed);
        }
    }
}

/// Sink that forwards to the global `metrics` recorder.
///
/// Without an installed recorder every call is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsFacade;

impl MetricsSink for MetricsFacade {
    fn increment_counter(&self, name: &'static str, value: u64) {
        ::metrics::counter!(name, value);
    }

    fn record_histogram(&self, name: &'static str, value: f64) {
        ::metrics::histogram!(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_metrics_tracks_drops_and_bulk_sizes() {
        let metrics = ReporterMetrics::new();
        assert_eq!(metrics.mean_bulk_size(), None);

        metrics.increment_counter(SPANS_DROPPED, 3);
        metrics.increment_counter(SPANS_DROPPED, 2);
        metrics.record_histogram(SPANS_BULK_SIZE, 4.0);
        metrics.record_histogram(SPANS_BULK_SIZE, 2.0);

        assert_eq!(metrics.spans_dropped(), 5);
        assert_eq!(metrics.bulks_recorded(), 2);
        assert_eq!(metrics.bulk_spans_total(), 6);
        assert_eq!(metrics.bulk_size_max(), 4);
        assert_eq!(metrics.mean_bulk_size(), Some(3.0));
    }

    #[test]
    fn test_reporter_metrics_ignores_unknown_names() {
        let metrics = ReporterMetrics::new();
        metrics.increment_counter("something_else", 7);
        metrics.record_histogram("something_else", 7.0);

        assert_eq!(metrics.spans_dropped(), 0);
        assert_eq!(metrics.bulks_recorded(), 0);
    }

    #[test]
    fn test_facade_without_recorder_is_noop() {
        let facade = MetricsFacade;
        facade.increment_counter(SPANS_DROPPED, 1);
        facade.record_histogram(SPANS_BULK_SIZE, 10.0);
    }
}
