//! Flush Scheduler
//!
//! Owns the single background task that runs flush cycles. A cycle starts on
//! one of two events:
//!
//! - the periodic timer (fixed delay, first tick one delay after start), or
//! - an out-of-band trigger from [`FlushScheduler::trigger_now`], issued by
//!   producers once the queue grows past `max_batch_size`.
//!
//! A cycle calls [`BulkUploader::flush_once`] until it reports that less than
//! a full batch is left, so a backlog drains back-to-back instead of one
//! batch per timer tick.
//!
//! ```text
//!            tick / trigger
//!   ┌──────┐ ─────────────► ┌─────────┐ ──┐ flush_once() == true
//!   │ Idle │                │ Running │ ◄─┘
//!   └──────┘ ◄───────────── └─────────┘
//!            flush_once() == false
//! ```
//!
//! # Trigger dedup
//!
//! Many producers cross the threshold at about the same moment. Only one of
//! them may schedule a run: the pending flag is read optimistically without a
//! lock (the common "already pending" path), then re-checked and set under a
//! mutex that guards nothing but that flag. The flag is cleared when the
//! triggered run starts.
//!
//! # Exclusivity
//!
//! The uploader lives behind a `tokio::sync::Mutex`. The background task and
//! synchronous-mode callers ([`FlushScheduler::run_inline`]) both take it, so
//! at most one cycle executes at any time.

use crate::uploader::BulkUploader;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// State shared between the scheduler handle, producers and the flush task.
#[derive(Debug, Default)]
struct SchedulerShared {
    trigger_pending: AtomicBool,
    /// Guards transitions of `trigger_pending` only.
    trigger_lock: Mutex<()>,
    trigger: Notify,
    closed: AtomicBool,
    triggers_scheduled: AtomicU64,
    cycles_completed: AtomicU64,
}

impl SchedulerShared {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn clear_pending(&self) {
        let _guard = self.trigger_lock.lock();
        self.trigger_pending.store(false, Ordering::Release);
    }
}

/// Runs flush cycles on a timer and on demand, one at a time.
pub struct FlushScheduler {
    shared: Arc<SchedulerShared>,
    uploader: Arc<tokio::sync::Mutex<BulkUploader>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FlushScheduler {
    /// Spawns the flush task on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn start(uploader: BulkUploader, flush_delay: Duration) -> Self {
        let uploader = Arc::new(tokio::sync::Mutex::new(uploader));
        let shared = Arc::new(SchedulerShared::default());
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(run_flush_loop(
            Arc::clone(&shared),
            Arc::clone(&uploader),
            flush_delay,
            shutdown_rx,
        ));

        Self {
            shared,
            uploader,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        }
    }

    /// Schedules an immediate flush cycle unless one is already pending.
    ///
    /// Returns `true` only for the call that actually scheduled the run.
    /// Never blocks on I/O; safe to call from any thread.
    pub fn trigger_now(&self) -> bool {
        if self.shared.is_closed() || self.shared.trigger_pending.load(Ordering::Acquire) {
            return false;
        }

        let _guard = self.shared.trigger_lock.lock();
        if self.shared.is_closed() || self.shared.trigger_pending.load(Ordering::Acquire) {
            return false;
        }
        self.shared.trigger_pending.store(true, Ordering::Release);
        self.shared.trigger.notify_one();
        self.shared.triggers_scheduled.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Runs one flush on the caller's task, waiting for any cycle already in
    /// progress to finish first. Leftover backlog is handed to the background
    /// task via [`trigger_now`](Self::trigger_now).
    pub async fn run_inline(&self) {
        if self.shared.is_closed() {
            return;
        }
        let more = {
            let mut uploader = self.uploader.lock().await;
            if self.shared.is_closed() {
                return;
            }
            uploader.flush_once().await
        };
        if more {
            self.trigger_now();
        }
    }

    /// `true` while an out-of-band run is scheduled but not yet started.
    pub fn is_trigger_pending(&self) -> bool {
        self.shared.trigger_pending.load(Ordering::Acquire)
    }

    /// `true` while a flush (background or inline) is executing.
    pub fn is_running(&self) -> bool {
        self.uploader.try_lock().is_err()
    }

    /// Number of out-of-band runs scheduled so far.
    pub fn triggers_scheduled(&self) -> u64 {
        self.shared.triggers_scheduled.load(Ordering::Relaxed)
    }

    /// Number of background cycles (timer or trigger) completed so far.
    pub fn cycles_completed(&self) -> u64 {
        self.shared.cycles_completed.load(Ordering::Relaxed)
    }

    /// `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shared.is_closed()
    }

    /// Stops the timer and waits for an in-flight cycle to finish.
    ///
    /// No cycle starts after this has been called. Calling it again is a
    /// no-op.
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::Release);

        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "flush task terminated abnormally");
            }
        }
    }
}

impl std::fmt::Debug for FlushScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushScheduler")
            .field("trigger_pending", &self.is_trigger_pending())
            .field("shut_down", &self.is_shut_down())
            .field("cycles_completed", &self.cycles_completed())
            .finish_non_exhaustive()
    }
}

async fn run_flush_loop(
    shared: Arc<SchedulerShared>,
    uploader: Arc<tokio::sync::Mutex<BulkUploader>>,
    flush_delay: Duration,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut ticker = time::interval_at(Instant::now() + flush_delay, flush_delay);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            // Also fires when the scheduler handle is dropped.
            _ = &mut shutdown_rx => break,

            () = shared.trigger.notified() => shared.clear_pending(),

            _ = ticker.tick() => {}
        }

        let mut uploader = uploader.lock().await;
        if shared.is_closed() {
            break;
        }
        while uploader.flush_once().await {
            if shared.is_closed() {
                break;
            }
        }
        drop(uploader);
        shared.cycles_completed.fetch_add(1, Ordering::Relaxed);
    }

    tracing::debug!("flush task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ReporterMetrics;
    use crate::probe::AvailabilityFlag;
    use crate::queue::{BoundedSpanQueue, SpanJob};
    use crate::transport::RecordingTransport;
    use crate::uploader::BulkTarget;
    use std::thread;

    fn setup(
        max_batch_size: usize,
        flush_delay: Duration,
    ) -> (Arc<BoundedSpanQueue>, Arc<RecordingTransport>, FlushScheduler) {
        let queue = Arc::new(BoundedSpanQueue::new(100));
        let transport = Arc::new(RecordingTransport::new());
        let uploader = BulkUploader::new(
            Arc::clone(&queue),
            transport.clone(),
            Arc::new(AvailabilityFlag::default()),
            Arc::new(ReporterMetrics::new()),
            BulkTarget::new("http://es:9200", "spans"),
            max_batch_size,
            Duration::from_secs(5),
        );
        (queue, transport, FlushScheduler::start(uploader, flush_delay))
    }

    fn fill(queue: &BoundedSpanQueue, n: usize) {
        for i in 0..n {
            assert!(queue.offer(SpanJob::from_record(format!("{{\"index\":{{}}}}\n{i}\n"))));
        }
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn test_concurrent_triggers_schedule_once() {
        let (queue, transport, scheduler) = setup(2, Duration::from_secs(3600));
        let scheduler = Arc::new(scheduler);
        fill(&queue, 3);

        // The flush task can't run while this thread blocks on the joins,
        // so every thread races against the same pending flag.
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let scheduler = Arc::clone(&scheduler);
                thread::spawn(move || scheduler.trigger_now())
            })
            .collect();
        let scheduled = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|scheduled| *scheduled)
            .count();

        assert_eq!(scheduled, 1);
        assert!(scheduler.is_trigger_pending());

        time::sleep(Duration::from_millis(10)).await;
        assert!(!scheduler.is_trigger_pending());
        assert_eq!(scheduler.triggers_scheduled(), 1);
        assert_eq!(scheduler.cycles_completed(), 1);
        assert_eq!(transport.batch_sizes(), vec![2]);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_requeues_while_backlog_remains() {
        let (queue, transport, scheduler) = setup(2, Duration::from_secs(3600));
        fill(&queue, 7);

        assert!(scheduler.trigger_now());
        time::sleep(Duration::from_millis(10)).await;

        // 7 -> 5 -> 3 -> 1: three batches in one cycle, the last span waits
        assert_eq!(transport.batch_sizes(), vec![2, 2, 2]);
        assert_eq!(scheduler.cycles_completed(), 1);
        assert_eq!(queue.len(), 1);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_flushes_periodically() {
        let (queue, transport, scheduler) = setup(10, Duration::from_millis(1000));
        fill(&queue, 1);

        time::sleep(Duration::from_millis(999)).await;
        assert!(transport.batch_sizes().is_empty());

        time::sleep(Duration::from_millis(2)).await;
        assert_eq!(transport.batch_sizes(), vec![1]);

        fill(&queue, 2);
        time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(transport.batch_sizes(), vec![1, 2]);

        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_timer_and_triggers() {
        let (queue, transport, scheduler) = setup(2, Duration::from_millis(100));
        scheduler.shutdown().await;
        assert!(scheduler.is_shut_down());

        fill(&queue, 5);
        assert!(!scheduler.trigger_now());
        scheduler.run_inline().await;
        time::sleep(Duration::from_secs(1)).await;

        assert!(transport.requests().is_empty());
        assert_eq!(queue.len(), 5);

        // idempotent
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_inline_hands_backlog_to_background_task() {
        let (queue, transport, scheduler) = setup(2, Duration::from_secs(3600));
        fill(&queue, 5);

        scheduler.run_inline().await;
        assert_eq!(transport.batch_sizes(), vec![2]);
        assert!(scheduler.is_trigger_pending());

        time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.batch_sizes(), vec![2, 2]);
        assert_eq!(queue.len(), 1);

        scheduler.shutdown().await;
    }
}
