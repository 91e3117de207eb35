use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use span_reporter::{
    AvailabilityFlag, BoundedSpanQueue, BulkRequest, BulkResponse, BulkTransport, ReporterConfig,
    ReporterMetrics, Span, SpanJob, SpanKind, SpanReporter, TransportError,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const SPANS_PER_PRODUCER: u64 = 10_000;

/// Accepts everything without doing I/O.
struct NullTransport;

impl BulkTransport for NullTransport {
    async fn send(&self, request: BulkRequest) -> Result<BulkResponse, TransportError> {
        black_box(&request.body);
        Ok(BulkResponse::default())
    }

    fn name(&self) -> &str {
        "null"
    }
}

fn sample_span(seq: u64) -> Span {
    Span::new(0xfeed, seq, "GET /orders/{id}", SpanKind::Server)
        .with_tag("http.method", "GET")
        .with_tag("http.status_code", 200_i64)
}

fn bench_encode(c: &mut Criterion) {
    let span = sample_span(1);
    c.bench_function("span_job_from_span", |b| {
        b.iter(|| SpanJob::from_span(black_box(&span)))
    });
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");
    let job = SpanJob::from_span(&sample_span(1)).unwrap();

    for batch in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(batch as u64));
        group.bench_with_input(BenchmarkId::new("offer_drain", batch), &batch, |b, &batch| {
            let queue = BoundedSpanQueue::new(batch);
            let mut drained = Vec::with_capacity(batch);
            b.iter(|| {
                for _ in 0..batch {
                    let _ = queue.offer(job.clone());
                }
                drained.clear();
                queue.drain_up_to(batch, &mut drained)
            });
        });
    }

    group.finish();
}

fn bench_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit");
    let runtime = tokio::runtime::Runtime::new().unwrap();

    for producers in [1u64, 4] {
        group.throughput(Throughput::Elements(producers * SPANS_PER_PRODUCER));
        group.bench_with_input(
            BenchmarkId::new("producers", producers),
            &producers,
            |b, &producers| {
                let reporter = {
                    let _guard = runtime.enter();
                    let config = ReporterConfig::default()
                        .with_max_batch_size(500)
                        .with_max_queue_size(50_000)
                        .with_flush_delay(Duration::from_millis(100));
                    Arc::new(
                        SpanReporter::builder(config)
                            .with_transport(NullTransport)
                            .with_probe(Arc::new(AvailabilityFlag::default()))
                            .with_metrics(Arc::new(ReporterMetrics::new()))
                            .build()
                            .unwrap(),
                    )
                };

                b.iter(|| {
                    let handles: Vec<_> = (0..producers)
                        .map(|producer_id| {
                            let reporter = Arc::clone(&reporter);
                            thread::spawn(move || {
                                for seq in 0..SPANS_PER_PRODUCER {
                                    black_box(reporter.submit(&sample_span(producer_id << 32 | seq)));
                                }
                            })
                        })
                        .collect();
                    for handle in handles {
                        handle.join().unwrap();
                    }
                });

                runtime.block_on(reporter.shutdown());
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_encode, bench_queue, bench_submit);
criterion_main!(benches);
