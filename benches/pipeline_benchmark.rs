//! Pipeline benchmarks.
//!
//! Measures throughput of the bounded dual-lane queue, envelope
//! construction, canonical serialization, and a full build+enqueue+drain
//! round trip through `Logger`.
//! Run with: cargo bench

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use flowlog::config::FlowlogConfig;
use flowlog::envelope::{Envelope, EnvelopeBuilder};
use flowlog::level::LEVEL_REGISTRY;
use flowlog::logger::{LogCall, LoggerBuilder};
use flowlog::pipeline::serialize::CanonicalJsonSerializer;
use flowlog::pipeline::Serializer;
use flowlog::queue::{BackpressurePolicy, DualQueue};
use flowlog::sink::{Sink, WriteOutcome};
use flowlog::value::Value;
use tokio::runtime::Runtime;

struct NullSink;

#[async_trait]
impl Sink for NullSink {
    fn name(&self) -> &str {
        "null"
    }
    async fn write(&self, _event: &Envelope) -> WriteOutcome {
        WriteOutcome::Ok
    }
}

fn sample_envelope(i: u64) -> Envelope {
    let info = LEVEL_REGISTRY.get("INFO").unwrap();
    EnvelopeBuilder::new(info, "benchmark event", "bench")
        .field("sequence", Value::Int(i as i64))
        .field("payload", Value::String("x".repeat(64)))
        .build()
}

/// Benchmark dual-lane queue enqueue/dequeue throughput at different
/// base capacities.
fn bench_queue_throughput(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("queue_throughput");
    group.throughput(Throughput::Elements(1000));

    for capacity in [100, 1000, 10_000].iter() {
        group.bench_with_input(format!("capacity_{capacity}"), capacity, |b, &capacity| {
            b.iter(|| {
                rt.block_on(async {
                    let queue = Arc::new(DualQueue::new(capacity, 1.0));
                    for i in 0..1000u64 {
                        queue.enqueue(sample_envelope(i), BackpressurePolicy::DropOnFull).await;
                    }
                    let batch = queue.dequeue_batch(1000, Duration::from_millis(50)).await;
                    black_box(batch.events.len())
                })
            })
        });
    }

    group.finish();
}

/// Benchmark building an envelope from bound context plus call-site fields.
fn bench_envelope_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("envelope_build");
    group.bench_function("build", |b| {
        b.iter(|| black_box(sample_envelope(black_box(42))))
    });
    group.finish();
}

/// Benchmark canonical JSON serialization of a built envelope.
fn bench_canonical_serialize(c: &mut Criterion) {
    let serializer = CanonicalJsonSerializer;
    let envelope = sample_envelope(7);

    let mut group = c.benchmark_group("canonical_serialize");
    group.bench_function("serialize", |b| {
        b.iter(|| black_box(serializer.serialize(black_box(&envelope)).unwrap()))
    });
    group.finish();
}

/// Benchmark the full facade: build, enqueue, drain through a no-op sink,
/// at different worker counts.
fn bench_logger_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("logger_round_trip");
    group.sample_size(10);
    group.measurement_time(Duration::from_secs(5));

    for workers in [1, 2, 4].iter() {
        group.throughput(Throughput::Elements(500));
        group.bench_with_input(format!("{workers}_workers"), workers, |b, &workers| {
            b.iter(|| {
                rt.block_on(async {
                    let config = FlowlogConfig::builder()
                        .max_queue_size(2000)
                        .worker_count(workers)
                        .build()
                        .unwrap();
                    let logger = LoggerBuilder::new("bench", config)
                        .sink(Arc::new(NullSink), None)
                        .build()
                        .unwrap();
                    logger.start().await;

                    let info = LEVEL_REGISTRY.get("INFO").unwrap();
                    for i in 0..500u64 {
                        let call = LogCall::new().field("i", Value::Int(i as i64));
                        logger.log(info.clone(), "bench event", call).await;
                    }

                    let result = logger.drain(Duration::from_secs(5)).await;
                    black_box(result.messages_drained)
                })
            })
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_queue_throughput,
    bench_envelope_build,
    bench_canonical_serialize,
    bench_logger_round_trip,
);

criterion_main!(benches);
