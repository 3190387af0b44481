//! Hot-Path Benchmarks - Decode, Accept, Store
//!
//! Benchmarks the per-message work: binary and JSON frame decoding,
//! dedup/gap acceptance in the session, and circular buffer appends.
//!
//! Run with: cargo bench --bench codec_bench

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use tickstream::domain::codec::{decode, encode_binary_frame};
use tickstream::domain::feed_state::FeedSession;
use tickstream::domain::sample::{FrameKind, Payload, RawMessage, Sample};
use tickstream::domain::series_store::{SeriesStore, StoreLimits};

fn samples(n: u64) -> Vec<Sample> {
    (1..=n)
        .map(|seq| Sample {
            seq,
            series_id: format!("SYM{}", seq % 8),
            series_seq: Some(seq / 8 + 1),
            t_ms: 1_700_000_000_000 + seq as i64,
            payload: Payload::Ohlc {
                open: 100.0,
                high: 101.0,
                low: 99.5,
                close: 100.5,
            },
        })
        .collect()
}

/// Binary vs JSON decoding of the same batch.
fn bench_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode");
    for n in [16u64, 256, 4096] {
        let batch = samples(n);
        let binary = RawMessage::Binary(encode_binary_frame(FrameKind::Live, &batch));
        let text = RawMessage::Text(
            serde_json::json!({"type": "live", "samples": batch}).to_string(),
        );

        group.throughput(Throughput::Elements(n));
        group.bench_with_input(BenchmarkId::new("binary", n), &binary, |b, raw| {
            b.iter(|| decode(black_box(raw)));
        });
        group.bench_with_input(BenchmarkId::new("json", n), &text, |b, raw| {
            b.iter(|| decode(black_box(raw)));
        });
    }
    group.finish();
}

/// Full message path: decode + dedup + registry update.
fn bench_session(c: &mut Criterion) {
    let raw = RawMessage::Binary(encode_binary_frame(FrameKind::Live, &samples(1024)));

    c.bench_function("session_handle_1024", |b| {
        b.iter(|| {
            let mut session = FeedSession::new(0);
            session.connect();
            session.handle_message(black_box(&raw), 0)
        });
    });
}

/// Store append with the global budget forcing trims.
fn bench_store(c: &mut Criterion) {
    let batch = samples(4096);

    c.bench_function("store_append_4096_trimmed", |b| {
        b.iter(|| {
            let mut store = SeriesStore::new(StoreLimits {
                series_capacity: 1_024,
                global_point_budget: 2_048,
                trim_ratio: 0.1,
            });
            store.append_batch(black_box(&batch))
        });
    });
}

criterion_group!(benches, bench_decode, bench_session, bench_store);
criterion_main!(benches);
