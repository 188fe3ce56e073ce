//! Concurrent access performance benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use datablock_core::consumer::Consumer;
use datablock_core::segment::{AttachedSegment, CreationConfig, Segment};
use datablock_core::writer::Writer;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

/// Benchmark multiple concurrent readers draining the same ring.
fn bench_concurrent_readers(c: &mut Criterion) {
    let config = CreationConfig::new(256, 64, 4096);
    let segment = Segment::create("bench_concurrent", &config).unwrap();
    let writer = Writer::new(segment.regions());

    c.bench_function("concurrent_10_readers", |b| {
        b.iter(|| {
            for _ in 0..32 {
                let mut tx = writer.begin_write(Duration::from_millis(10)).unwrap();
                tx.write(&[0xAAu8; 64]);
                tx.commit().unwrap();
            }

            let barrier = Arc::new(Barrier::new(11));
            let mut handles = Vec::new();
            for _ in 0..10 {
                let attached = AttachedSegment::attach("bench_concurrent", 0, None, None).unwrap();
                let barrier_clone = barrier.clone();
                handles.push(thread::spawn(move || {
                    let mut consumer = Consumer::attach(attached.regions());
                    barrier_clone.wait();
                    for _ in 0..10 {
                        if let Ok(view) = consumer.consume(Duration::from_millis(10)) {
                            black_box(view.bytes().len());
                            let _ = consumer.release(view);
                        }
                    }
                }));
            }
            barrier.wait();
            for handle in handles {
                handle.join().unwrap();
            }
        });
    });
}

/// Benchmark reader throughput while a writer is continuously cycling
/// the ring under it.
fn bench_reader_write_contention(c: &mut Criterion) {
    c.bench_function("reader_under_write_pressure", |b| {
        b.iter(|| {
            let barrier_created = Arc::new(Barrier::new(2));
            let barrier_start = Arc::new(Barrier::new(2));

            let bc_writer = barrier_created.clone();
            let bs_writer = barrier_start.clone();
            let bc_reader = barrier_created.clone();
            let bs_reader = barrier_start.clone();

            let writer_handle = thread::spawn(move || {
                let config = CreationConfig::new(8, 512, 4096);
                let segment = loop {
                    match Segment::create("bench_contention_w", &config) {
                        Ok(s) => break s,
                        Err(_) => thread::sleep(Duration::from_micros(10)),
                    }
                };
                let writer = Writer::new(segment.regions());
                bc_writer.wait();
                bs_writer.wait();

                for _ in 0..50 {
                    if let Ok(mut tx) = writer.begin_write(Duration::from_millis(10)) {
                        tx.write(&[0xAAu8; 512]);
                        let _ = tx.commit();
                    }
                    thread::yield_now();
                }
            });

            let reader_handle = thread::spawn(move || {
                bc_reader.wait();
                let attached = loop {
                    match AttachedSegment::attach("bench_contention_w", 0, None, None) {
                        Ok(a) => break a,
                        Err(_) => thread::yield_now(),
                    }
                };
                let mut consumer = Consumer::attach(attached.regions());
                bs_reader.wait();

                for _ in 0..100 {
                    if let Ok(view) = consumer.consume(Duration::from_millis(1)) {
                        black_box(view.bytes().len());
                        let _ = consumer.release(view);
                    }
                    thread::yield_now();
                }
            });

            writer_handle.join().unwrap();
            reader_handle.join().unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_concurrent_readers,
    bench_reader_write_contention,
);
criterion_main!(benches);
