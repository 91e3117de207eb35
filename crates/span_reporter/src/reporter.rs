//! Span Reporter - the producer-facing facade
//!
//! Producers hand over finished spans with [`SpanReporter::report`] (async) or
//! [`SpanReporter::submit`] (plain threads). Either call serializes the span
//! into a [`SpanJob`], offers it to the bounded queue and, once the queue
//! holds more than `max_batch_size` spans, asks the scheduler for an
//! immediate flush. Nothing here ever returns an error or panics into the
//! caller: full queues, bad spans and unreachable destinations all end up in
//! the [`SPANS_DROPPED`] counter.
//!
//! # Modes
//!
//! | `async_mode` | `log_only_mode` | `report` behaviour |
//! |---|---|---|
//! | `true` | `false` | enqueue and return |
//! | `false` | `false` | enqueue, then run one flush before returning |
//! | any | `true` | write the bulk record to the log, no queue, no network |

use crate::config::{ConfigError, ReporterConfig};
use crate::metrics::{MetricsFacade, MetricsSink, SPANS_DROPPED};
use crate::probe::{AvailabilityFlag, AvailabilityProbe};
use crate::queue::{BoundedSpanQueue, SpanJob};
use crate::scheduler::FlushScheduler;
use crate::transport::{BulkTransport, BulkTransportBoxed, HttpBulkTransport};
use crate::uploader::{BulkTarget, BulkUploader};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

/// `tracing` target used by log-only mode.
pub const SPAN_LOG_TARGET: &str = "span_reporter::spans";

/// Builder for [`SpanReporter`]
pub struct SpanReporterBuilder {
    config: ReporterConfig,
    transport: Option<Arc<dyn BulkTransportBoxed>>,
    probe: Option<Arc<dyn AvailabilityProbe>>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl SpanReporterBuilder {
    pub fn new(config: ReporterConfig) -> Self {
        Self {
            config,
            transport: None,
            probe: None,
            metrics: None,
        }
    }

    /// Transport for bulk requests. Defaults to [`HttpBulkTransport`].
    pub fn with_transport<T: BulkTransport + 'static>(mut self, transport: T) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Like [`with_transport`](Self::with_transport) for a transport that is
    /// shared with other code.
    pub fn with_shared_transport(mut self, transport: Arc<dyn BulkTransportBoxed>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Liveness probe. Defaults to an [`AvailabilityFlag`] that is always up.
    pub fn with_probe(mut self, probe: Arc<dyn AvailabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Metrics sink. Defaults to [`MetricsFacade`].
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Validates the config and starts the flush task.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn build(self) -> Result<SpanReporter, ConfigError> {
        let config = self.config;
        config.validate()?;

        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(HttpBulkTransport::new()));
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(AvailabilityFlag::default()));
        let metrics = self.metrics.unwrap_or_else(|| Arc::new(MetricsFacade));

        let queue = Arc::new(BoundedSpanQueue::new(config.max_queue_size));
        let target = BulkTarget::new(config.url.clone(), config.index_prefix.clone());
        let uploader = BulkUploader::new(
            Arc::clone(&queue),
            transport,
            Arc::clone(&probe),
            Arc::clone(&metrics),
            target.clone(),
            config.max_batch_size,
            config.export_timeout(),
        );
        let scheduler = FlushScheduler::start(uploader, config.flush_delay());

        tracing::debug!(
            flush_delay_ms = config.flush_delay_ms,
            max_batch_size = config.max_batch_size,
            max_queue_size = config.max_queue_size,
            async_mode = config.async_mode,
            log_only_mode = config.log_only_mode,
            "span reporter started"
        );

        Ok(SpanReporter {
            config,
            queue,
            scheduler,
            probe,
            metrics,
            target,
        })
    }
}

/// Bounded, batching span reporter.
pub struct SpanReporter {
    config: ReporterConfig,
    queue: Arc<BoundedSpanQueue>,
    scheduler: FlushScheduler,
    probe: Arc<dyn AvailabilityProbe>,
    metrics: Arc<dyn MetricsSink>,
    target: BulkTarget,
}

impl SpanReporter {
    pub fn builder(config: ReporterConfig) -> SpanReporterBuilder {
        SpanReporterBuilder::new(config)
    }

    /// Reports one finished span.
    ///
    /// In async mode this never waits. In synchronous mode it returns after
    /// one flush cycle, which includes the network round trip.
    pub async fn report<S: Serialize + Sync + ?Sized>(&self, span: &S) {
        if self.config.log_only_mode {
            self.log_span(span);
            return;
        }

        self.enqueue(span);
        if !self.config.async_mode {
            self.scheduler.run_inline().await;
        }
    }

    /// Non-async variant of [`report`](Self::report) that always behaves
    /// like async mode. Usable from threads outside the runtime.
    ///
    /// Returns `false` if the span was dropped.
    pub fn submit<S: Serialize + ?Sized>(&self, span: &S) -> bool {
        if self.config.log_only_mode {
            self.log_span(span);
            return true;
        }
        self.enqueue(span)
    }

    /// Whether producing spans is worthwhile right now.
    pub fn is_active(&self) -> bool {
        self.config.log_only_mode || self.probe.is_available()
    }

    /// Spans waiting for a flush.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn config(&self) -> &ReporterConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &FlushScheduler {
        &self.scheduler
    }

    /// Stops periodic and triggered flushing. A flush that is already
    /// running completes; queued spans are not flushed.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        tracing::debug!(queued = self.queue.len(), "span reporter shut down");
    }

    fn enqueue<S: Serialize + ?Sized>(&self, span: &S) -> bool {
        let job = match SpanJob::from_span(span) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize span, dropping it");
                self.metrics.increment_counter(SPANS_DROPPED, 1);
                return false;
            }
        };

        let accepted = self.queue.offer(job);
        if !accepted {
            tracing::trace!(capacity = self.queue.capacity(), "span queue full, dropping span");
            self.metrics.increment_counter(SPANS_DROPPED, 1);
        }

        if self.queue.len() > self.config.max_batch_size {
            self.scheduler.trigger_now();
        }
        accepted
    }

    fn log_span<S: Serialize + ?Sized>(&self, span: &S) {
        match serde_json::to_string(span) {
            Ok(doc) => {
                let index = self.target.index_name(Utc::now());
                tracing::info!(
                    target: SPAN_LOG_TARGET,
                    "{{\"index\":{{\"_index\":\"{index}\"}}}}\n{doc}"
                );
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize span for logging"),
        }
    }
}

impl std::fmt::Debug for SpanReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpanReporter")
            .field("config", &self.config)
            .field("queue_len", &self.queue.len())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
