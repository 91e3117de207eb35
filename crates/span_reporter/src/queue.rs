//! Bounded Span Queue
//!
//! A FIFO of pre-serialized bulk records with a hard capacity. Producers call
//! [`BoundedSpanQueue::offer`] from any thread; it never waits for space. When
//! the queue is full the record is rejected and the caller accounts for the
//! drop, which keeps this module free of any metrics concerns.
//!
//! The single flusher removes records in bulk with
//! [`BoundedSpanQueue::drain_up_to`], which moves up to `n` records from the
//! head under one lock acquisition and reports how many are left behind.

use bytes::{BufMut, Bytes, BytesMut};
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Action line prepended to every document in a bulk body.
pub const INDEX_ACTION: &[u8] = b"{\"index\":{}}\n";

// =============================================================================
// SPAN JOB
// =============================================================================

/// One span, already encoded as a bulk record (action line + document line).
///
/// Serialization happens eagerly when the job is created so the queue never
/// holds references into live span state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpanJob {
    record: Bytes,
}

impl SpanJob {
    /// Encodes `span` as `{"index":{}}\n<json>\n`.
    pub fn from_span<S: Serialize + ?Sized>(span: &S) -> Result<Self, serde_json::Error> {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_slice(INDEX_ACTION);

        let mut writer = buf.writer();
        serde_json::to_writer(&mut writer, span)?;
        let mut buf = writer.into_inner();
        buf.put_u8(b'\n');

        Ok(Self {
            record: buf.freeze(),
        })
    }

    /// Wraps an already encoded bulk record.
    pub fn from_record(record: impl Into<Bytes>) -> Self {
        Self {
            record: record.into(),
        }
    }

    /// Appends the record to a bulk body.
    #[inline]
    pub fn write_to(&self, body: &mut BytesMut) {
        body.extend_from_slice(&self.record);
    }

    /// Raw record bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.record
    }

}

// =============================================================================
// QUEUE
// =============================================================================

/// Thread-safe bounded FIFO of [`SpanJob`]s with drop-on-full semantics.
///
/// `len` mirrors the deque length and is only written while the lock is held,
/// so readers get a value that was exact at some recent point. It is used for
/// threshold checks on the producer path, which only need an estimate.
#[derive(Debug)]
pub struct BoundedSpanQueue {
    jobs: Mutex<VecDeque<SpanJob>>,
    len: CachePadded<AtomicUsize>,
    capacity: usize,
}

impl BoundedSpanQueue {
    /// Creates a queue holding at most `capacity` jobs.
    pub fn new(capacity: usize) -> Self {
        Self {
            jobs: Mutex::new(VecDeque::with_capacity(capacity)),
            len: CachePadded::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    /// Appends `job` unless the queue is full.
    ///
    /// Returns `false` when the job was rejected; the job is dropped.
    #[must_use = "a rejected offer must be counted as a dropped span"]
    pub fn offer(&self, job: SpanJob) -> bool {
        let mut jobs = self.jobs.lock();
        if jobs.len() >= self.capacity {
            return false;
        }
        jobs.push_back(job);
        self.len.store(jobs.len(), Ordering::Release);

        debug_assert!(jobs.len() <= self.capacity, "queue exceeded its capacity");
        true
    }

    /// Moves at most `max` jobs from the head of the queue into `batch`,
    /// preserving insertion order.
    ///
    /// Returns the number of jobs still queued after the drain.
    pub fn drain_up_to(&self, max: usize, batch: &mut Vec<SpanJob>) -> usize {
        let mut jobs = self.jobs.lock();
        let take = max.min(jobs.len());
        batch.extend(jobs.drain(..take));

        let remaining = jobs.len();
        self.len.store(remaining, Ordering::Release);
        remaining
    }

    /// Current depth. Lock-free; may be stale under concurrent offers/drains.
    #[inline]
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    /// `true` when no job is waiting. Same staleness as [`len`](Self::len).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of jobs the queue accepts.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    fn job(n: usize) -> SpanJob {
        SpanJob::from_record(format!("{n}\n"))
    }

    #[test]
    fn test_span_job_encodes_bulk_record() {
        let job = SpanJob::from_span(&json!({"name": "GET /", "duration_ms": 12})).unwrap();
        let text = std::str::from_utf8(job.as_bytes()).unwrap();

        let mut lines = text.split_terminator('\n');
        assert_eq!(lines.next(), Some("{\"index\":{}}"));
        let doc: serde_json::Value = serde_json::from_str(lines.next().unwrap()).unwrap();
        assert_eq!(doc["name"], "GET /");
        assert_eq!(lines.next(), None);
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_offer_rejects_when_full() {
        let queue = BoundedSpanQueue::new(3);
        for i in 0..3 {
            assert!(queue.offer(job(i)));
        }
        assert!(!queue.offer(job(3)));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_drain_preserves_fifo_and_reports_remaining() {
        let queue = BoundedSpanQueue::new(10);
        for i in 0..5 {
            assert!(queue.offer(job(i)));
        }

        let mut batch = Vec::new();
        let remaining = queue.drain_up_to(2, &mut batch);
        assert_eq!(remaining, 3);
        assert_eq!(batch, vec![job(0), job(1)]);

        batch.clear();
        let remaining = queue.drain_up_to(10, &mut batch);
        assert_eq!(remaining, 0);
        assert_eq!(batch, vec![job(2), job(3), job(4)]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_drain_empty_queue() {
        let queue = BoundedSpanQueue::new(4);
        let mut batch = Vec::new();
        assert_eq!(queue.drain_up_to(4, &mut batch), 0);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_concurrent_offers_never_exceed_capacity() {
        let queue = Arc::new(BoundedSpanQueue::new(100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || (0..50).filter(|i| queue.offer(job(*i))).count())
            })
            .collect();

        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(accepted, 100);
        assert_eq!(queue.len(), 100);
    }
}
