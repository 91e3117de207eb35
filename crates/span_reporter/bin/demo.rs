//! # Span Reporter Demo
//!
//! Runs the reporter end to end against an in-process bulk endpoint.
//!
//! - a simulated destination with configurable latency, request failures and
//!   per-item rejections
//! - several producer tasks emitting parent/child spans with HTTP and DB tags
//! - a [`CircuitBreakerProbe`] that stops sending while the destination fails
//! - live queue depth and the final drop / bulk-size statistics
//!
//! ## Running
//!
//! ```bash
//! # Quick mode (4 producers, 250 spans each)
//! cargo run -p span_reporter --bin demo --release -- --quick
//!
//! # Full mode (8 producers, 2000 spans each)
//! cargo run -p span_reporter --bin demo --release
//!
//! # Write bulk records to the log instead of sending them
//! RUST_LOG=span_reporter::spans=info cargo run -p span_reporter --bin demo -- --quick --log-only
//! ```
//!
//! Destination settings (`SPAN_REPORTER_URL`, `SPAN_REPORTER_EXPORT_TIMEOUT_MS`,
//! ...) are read from the environment; batch size, queue size and flush delay
//! are fixed by the demo.

use rand::Rng;
use span_reporter::{
    BulkRequest, BulkResponse, BulkTransport, CircuitBreakerConfig, CircuitBreakerProbe,
    ReporterConfig, ReporterMetrics, Span, SpanKind, SpanReporter, SpanStatus, TransportError,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// =============================================================================
// SIMULATED DESTINATION
// =============================================================================

/// In-process bulk endpoint that fails now and then.
struct SimulatedBackend {
    /// Probability that a whole request fails (0.0 - 1.0)
    request_failure_rate: f64,
    /// Probability that a single item is rejected (0.0 - 1.0)
    item_failure_rate: f64,
    latency: Duration,
    requests: AtomicU64,
    failed_requests: AtomicU64,
    documents: AtomicU64,
}

impl SimulatedBackend {
    fn new(request_failure_rate: f64, item_failure_rate: f64, latency: Duration) -> Self {
        Self {
            request_failure_rate,
            item_failure_rate,
            latency,
            requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            documents: AtomicU64::new(0),
        }
    }
}

impl BulkTransport for SimulatedBackend {
    async fn send(&self, request: BulkRequest) -> Result<BulkResponse, TransportError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        tokio::time::sleep(self.latency).await;

        let items = request.body.iter().filter(|b| **b == b'\n').count() / 2;
        let (request_failed, failed_items) = {
            let mut rng = rand::thread_rng();
            let request_failed = rng.gen_bool(self.request_failure_rate);
            let failed_items = (0..items)
                .filter(|_| rng.gen_bool(self.item_failure_rate))
                .count();
            (request_failed, failed_items)
        };

        if request_failed {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
            return Err(TransportError::Status { status: 503 });
        }
        self.documents
            .fetch_add((items - failed_items) as u64, Ordering::Relaxed);
        Ok(BulkResponse {
            items,
            failed_items,
        })
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

// =============================================================================
// MAIN
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("span_reporter=info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let quick = args.iter().any(|a| a == "--quick");
    let log_only = args.iter().any(|a| a == "--log-only");

    let num_producers: u64 = if quick { 4 } else { 8 };
    let spans_per_producer: u64 = if quick { 250 } else { 2_000 };

    let config = ReporterConfig::from_env()?
        .with_max_batch_size(200)
        .with_max_queue_size(2_000)
        .with_flush_delay(Duration::from_millis(250))
        .with_log_only_mode(log_only);

    println!("Demo configuration:");
    println!("   Producers:          {}", num_producers);
    println!("   Spans per producer: {}", spans_per_producer);
    println!("   Batch size:         {}", config.max_batch_size);
    println!("   Queue capacity:     {}", config.max_queue_size);
    println!("   Flush delay:        {:?}", config.flush_delay());
    println!("   Log-only:           {}", config.log_only_mode);
    println!();

    let backend = Arc::new(SimulatedBackend::new(0.05, 0.01, Duration::from_millis(20)));
    let probe = Arc::new(CircuitBreakerProbe::new(CircuitBreakerConfig {
        failure_threshold: 3,
        reset_timeout: Duration::from_secs(1),
        success_threshold: 1,
    }));
    let metrics = Arc::new(ReporterMetrics::new());

    let reporter = Arc::new(
        SpanReporter::builder(config)
            .with_shared_transport(backend.clone())
            .with_probe(probe.clone())
            .with_metrics(metrics.clone())
            .build()?,
    );

    // -------------------------------------------------------------------------
    // Producers
    // -------------------------------------------------------------------------
    let started = Instant::now();
    let handles: Vec<_> = (0..num_producers)
        .map(|producer_id| {
            let reporter = Arc::clone(&reporter);
            tokio::spawn(run_producer(reporter, producer_id, spans_per_producer))
        })
        .collect();

    let monitor = {
        let reporter = Arc::clone(&reporter);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(200));
            loop {
                ticker.tick().await;
                println!(
                    "   queue={:>5}  active={}",
                    reporter.queue_len(),
                    reporter.is_active()
                );
            }
        })
    };

    for handle in handles {
        handle.await?;
    }
    let generation_time = started.elapsed();

    // Let the timer pick up what is left below the batch threshold.
    tokio::time::sleep(Duration::from_millis(500)).await;
    monitor.abort();
    reporter.shutdown().await;

    // -------------------------------------------------------------------------
    // Results
    // -------------------------------------------------------------------------
    let submitted = num_producers * spans_per_producer;
    println!();
    println!("+------------------------------------------+");
    println!("|           SPAN REPORTER RESULTS          |");
    println!("+------------------------------------------+");
    println!("| Generation time:       {:>14.2?}    |", generation_time);
    println!("| Spans reported:        {:>14}    |", submitted);
    println!("| Spans dropped:         {:>14}    |", metrics.spans_dropped());
    println!("| Spans still queued:    {:>14}    |", reporter.queue_len());
    println!("| Bulk requests:         {:>14}    |", metrics.bulks_recorded());
    println!(
        "| Mean bulk size:        {:>14.1}    |",
        metrics.mean_bulk_size().unwrap_or(0.0)
    );
    println!("| Max bulk size:         {:>14}    |", metrics.bulk_size_max());
    println!("+------------------------------------------+");
    println!("| Backend requests:      {:>14}    |", backend.requests.load(Ordering::Relaxed));
    println!(
        "| Backend failures:      {:>14}    |",
        backend.failed_requests.load(Ordering::Relaxed)
    );
    println!(
        "| Documents stored:      {:>14}    |",
        backend.documents.load(Ordering::Relaxed)
    );
    println!("| Circuit opened:        {:>14}    |", probe.times_opened());
    println!("+------------------------------------------+");

    Ok(())
}

// =============================================================================
// PRODUCER
// =============================================================================

const OPERATIONS: &[(&str, SpanKind)] = &[
    ("GET /api/orders", SpanKind::Server),
    ("POST /api/checkout", SpanKind::Server),
    ("SELECT orders", SpanKind::Client),
    ("publish order.created", SpanKind::Producer),
];

/// Emits traces of one server span with a database child each.
async fn run_producer(reporter: Arc<SpanReporter>, producer_id: u64, spans: u64) {
    for seq in 0..spans / 2 {
        let trace_id = (u128::from(producer_id) << 64) | u128::from(seq);
        let root_id = (producer_id << 32) | (seq * 2);
        let (name, kind) = OPERATIONS[(seq as usize) % OPERATIONS.len()];

        let mut root = Span::new(trace_id, root_id, name, kind)
            .with_tag("service.name", "checkout")
            .with_tag("producer", producer_id as i64);
        let mut child = Span::new(trace_id, root_id + 1, "SELECT orders", SpanKind::Client)
            .with_parent(root_id)
            .with_tag("db.system", "postgresql");

        tokio::time::sleep(Duration::from_micros(200)).await;
        let failed = rand::thread_rng().gen_bool(0.1);
        child.finish(SpanStatus::Ok);
        if failed {
            root.set_tag("error", true);
            root.set_tag("http.status_code", 500_i64);
            root.finish(SpanStatus::Error);
        } else {
            root.set_tag("http.status_code", 200_i64);
            root.finish(SpanStatus::Ok);
        }

        reporter.report(&child).await;
        reporter.report(&root).await;
    }
}
