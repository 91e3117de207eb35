//! Bulk Uploader - one flush cycle
//!
//! [`BulkUploader::flush_once`] drains up to `max_batch_size` jobs from the
//! queue, concatenates them into one bulk body and performs exactly one send.
//! Nothing is retried: spans lost to an unavailable destination, a failed
//! request or a per-item rejection are counted in [`SPANS_DROPPED`] and
//! forgotten.
//!
//! The batch list and the body buffer are scratch space owned by the
//! uploader and reused across cycles. The scheduler keeps the uploader behind
//! an async mutex, so only one cycle ever touches them.

use crate::metrics::{MetricsSink, SPANS_BULK_SIZE, SPANS_DROPPED};
use crate::probe::AvailabilityProbe;
use crate::queue::{BoundedSpanQueue, SpanJob};
use crate::transport::{BulkRequest, BulkTransportBoxed, TransportError, CONTENT_TYPE_NDJSON};
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use reqwest::Method;
use std::sync::Arc;
use std::time::Duration;

/// Date-partitioned write target.
///
/// The index name is derived from the flush time, not the enqueue time, so a
/// batch flushed just after midnight lands in the new day's index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkTarget {
    base_url: String,
    index_prefix: String,
}

impl BulkTarget {
    pub fn new(base_url: impl Into<String>, index_prefix: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            index_prefix: index_prefix.into(),
        }
    }

    /// `<prefix>-YYYY.MM.DD` for the UTC day of `at`.
    pub fn index_name(&self, at: DateTime<Utc>) -> String {
        format!("{}-{}", self.index_prefix, at.format("%Y.%m.%d"))
    }

    /// `<base_url>/<index>/_bulk`
    pub fn bulk_url(&self, at: DateTime<Utc>) -> String {
        format!("{}/{}/_bulk", self.base_url, self.index_name(at))
    }
}

/// Drains batches from the queue and ships them in one request each.
pub struct BulkUploader {
    queue: Arc<BoundedSpanQueue>,
    transport: Arc<dyn BulkTransportBoxed>,
    probe: Arc<dyn AvailabilityProbe>,
    metrics: Arc<dyn MetricsSink>,
    target: BulkTarget,
    max_batch_size: usize,
    export_timeout: Duration,
    /// Scratch: jobs of the current cycle
    batch: Vec<SpanJob>,
    /// Scratch: bulk body of the current cycle
    body: BytesMut,
}

impl BulkUploader {
    pub fn new(
        queue: Arc<BoundedSpanQueue>,
        transport: Arc<dyn BulkTransportBoxed>,
        probe: Arc<dyn AvailabilityProbe>,
        metrics: Arc<dyn MetricsSink>,
        target: BulkTarget,
        max_batch_size: usize,
        export_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            transport,
            probe,
            metrics,
            target,
            max_batch_size,
            export_timeout,
            batch: Vec::with_capacity(max_batch_size),
            body: BytesMut::new(),
        }
    }

    /// Runs one drain-and-send cycle.
    ///
    /// Returns `true` when at least `max_batch_size` spans are still queued
    /// afterwards, i.e. another cycle should run right away.
    ///
    /// If a previous call was cancelled mid-send, its batch is counted as
    /// dropped here before anything new is drained.
    pub async fn flush_once(&mut self) -> bool {
        self.discard_interrupted();

        let remaining = self.queue.drain_up_to(self.max_batch_size, &mut self.batch);
        if self.batch.is_empty() {
            return false;
        }
        debug_assert!(self.batch.len() <= self.max_batch_size);

        let batch_size = self.batch.len();
        tracing::debug!(batch_size, remaining, "flushing span batch");
        self.metrics
            .record_histogram(SPANS_BULK_SIZE, batch_size as f64);

        self.send_batch(Utc::now()).await;
        self.batch.clear();

        remaining >= self.max_batch_size
    }

    fn discard_interrupted(&mut self) {
        if !self.batch.is_empty() {
            let lost = self.batch.len() as u64;
            tracing::debug!(lost, "previous flush was cancelled, dropping its batch");
            self.metrics.increment_counter(SPANS_DROPPED, lost);
            self.batch.clear();
        }
        self.body.clear();
    }

    async fn send_batch(&mut self, now: DateTime<Utc>) {
        let batch_size = self.batch.len() as u64;

        if !self.probe.is_available() {
            tracing::debug!(batch_size, "destination unavailable, discarding batch");
            self.metrics.increment_counter(SPANS_DROPPED, batch_size);
            return;
        }

        for job in &self.batch {
            job.write_to(&mut self.body);
        }
        let request = BulkRequest {
            method: Method::POST,
            url: self.target.bulk_url(now),
            content_type: CONTENT_TYPE_NDJSON,
            body: self.body.split().freeze(),
        };

        let outcome = tokio::time::timeout(self.export_timeout, self.transport.send_boxed(request))
            .await
            .unwrap_or(Err(TransportError::Timeout));

        match outcome {
            Ok(response) => {
                self.probe.on_send_success();
                if response.failed_items > 0 {
                    tracing::debug!(
                        failed_items = response.failed_items,
                        batch_size,
                        "destination rejected part of the bulk request"
                    );
                    self.metrics
                        .increment_counter(SPANS_DROPPED, response.failed_items as u64);
                }
            }
            Err(e) => {
                self.probe.on_send_failure();
                tracing::warn!(
                    error = %e,
                    batch_size,
                    transport = self.transport.name(),
                    "bulk request failed, dropping batch"
                );
                self.metrics.increment_counter(SPANS_DROPPED, batch_size);
            }
        }
    }
}

impl std::fmt::Debug for BulkUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkUploader")
            .field("target", &self.target)
            .field("max_batch_size", &self.max_batch_size)
            .field("export_timeout", &self.export_timeout)
            .field("transport", &self.transport.name())
            .finish_non_exhaustive()
    }
}
