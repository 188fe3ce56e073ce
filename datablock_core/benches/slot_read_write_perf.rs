//! Read/write performance benchmarks

use bytemuck::{Pod, Zeroable};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use datablock_core::consumer::Consumer;
use datablock_core::segment::{CreationConfig, Segment};
use datablock_core::writer::Writer;
use std::time::Duration;

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Default)]
struct Payload1K {
    bytes: [u8; 1024],
}

/// Benchmark write operations at a few common payload sizes.
fn bench_write_operations(c: &mut Criterion) {
    let config = CreationConfig::new(64, 64, 4096);
    let segment = Segment::create("bench_write_small", &config).unwrap();
    let writer = Writer::new(segment.regions());

    c.bench_function("write_commit_64_bytes", |b| {
        b.iter(|| {
            let mut tx = writer.begin_write(Duration::from_millis(10)).unwrap();
            tx.write(black_box(&[0xAAu8; 64]));
            black_box(tx.commit().unwrap());
        });
    });

    let config_1k = CreationConfig::new(64, 1024, 4096);
    let segment_1k = Segment::create("bench_write_1k", &config_1k).unwrap();
    let writer_1k = Writer::new(segment_1k.regions());

    c.bench_function("write_commit_1k_bytes", |b| {
        b.iter(|| {
            let mut tx = writer_1k.begin_write(Duration::from_millis(10)).unwrap();
            tx.write(black_box(&Payload1K {
                bytes: [0xAAu8; 1024],
            }));
            black_box(tx.commit().unwrap());
        });
    });
}

/// Benchmark the consumer side once a segment already has committed
/// slots to read.
fn bench_read_operations(c: &mut Criterion) {
    let config = CreationConfig::new(64, 64, 4096);
    let segment = Segment::create("bench_read_small", &config).unwrap();
    let writer = Writer::new(segment.regions());
    let mut consumer = Consumer::attach(segment.regions());

    c.bench_function("consume_release_64_bytes", |b| {
        b.iter(|| {
            let mut tx = writer.begin_write(Duration::from_millis(10)).unwrap();
            tx.write(&[0xAAu8; 64]);
            tx.commit().unwrap();

            let view = black_box(consumer.consume(Duration::from_millis(10)).unwrap());
            black_box(view.bytes().len());
            consumer.release(view).unwrap();
        });
    });
}

/// Sub-microsecond round-trip validation for the happy path.
fn bench_write_read_roundtrip(c: &mut Criterion) {
    let config = CreationConfig::new(64, 64, 4096);
    let segment = Segment::create("bench_roundtrip", &config).unwrap();
    let writer = Writer::new(segment.regions());
    let mut consumer = Consumer::attach(segment.regions());

    c.bench_function("roundtrip_64_bytes", |b| {
        b.iter(|| {
            let mut tx = writer.begin_write(Duration::from_millis(10)).unwrap();
            tx.write(black_box(&[0xAAu8; 64]));
            black_box(tx.commit().unwrap());

            let view = black_box(consumer.consume(Duration::from_millis(10)).unwrap());
            black_box(view.bytes().len());
            consumer.release(view).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_write_operations,
    bench_read_operations,
    bench_write_read_roundtrip,
);
criterion_main!(benches);
