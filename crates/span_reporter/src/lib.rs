//! Span Reporter
//!
//! A bounded, batching span reporter. Application threads and tasks hand
//! over finished spans one at a time; a single background task ships them to
//! a document store's bulk endpoint in batches.
//!
//! Flushes happen on three triggers:
//!
//! 1. periodically, every `flush_delay_ms`;
//! 2. as soon as the queue holds more than `max_batch_size` spans, with the
//!    flush repeating back-to-back while a full batch remains;
//! 3. inline, after every report, when `async_mode` is off.
//!
//! Producers never block in async mode. When the queue is full the span is
//! dropped and counted rather than buffered: delivery is best-effort and
//! failed bulk requests are never retried.
//!
//! ```rust,ignore
//! use span_reporter::{ReporterConfig, Span, SpanKind, SpanReporter};
//!
//! let reporter = SpanReporter::builder(ReporterConfig::from_env()?).build()?;
//! reporter.report(&Span::new(trace_id, span_id, "GET /orders", SpanKind::Server)).await;
//! reporter.shutdown().await;
//! ```

pub mod config;
pub mod metrics;
pub mod probe;
pub mod queue;
pub mod reporter;
pub mod scheduler;
pub mod span;
pub mod transport;
pub mod uploader;

// Re-export main types
pub use config::{ConfigError, ReporterConfig};
pub use crate::metrics::{
    MetricsFacade, MetricsSink, ReporterMetrics, SPANS_BULK_SIZE, SPANS_DROPPED,
};
pub use probe::{
    AvailabilityFlag, AvailabilityProbe, CircuitBreakerConfig, CircuitBreakerProbe, CircuitState,
};
pub use queue::{BoundedSpanQueue, SpanJob};
pub use reporter::{SpanReporter, SpanReporterBuilder, SPAN_LOG_TARGET};
pub use scheduler::FlushScheduler;
pub use span::{Span, SpanKind, SpanStatus, TagValue};
pub use transport::{
    parse_bulk_response, BulkRequest, BulkResponse, BulkTransport, BulkTransportBoxed,
    HttpBulkTransport, TransportError, CONTENT_TYPE_NDJSON,
};
pub use uploader::{BulkTarget, BulkUploader};
