//! High-throughput market-data style broadcast with multiple consumers
//! racing a single `LatestOnly` producer.

use bytemuck::{Pod, Zeroable};
use datablock_core::consumer::Consumer;
use datablock_core::header::ConsumerSyncPolicy;
use datablock_core::segment::{AttachedSegment, CreationConfig, Segment};
use datablock_core::writer::Writer;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable, Default)]
struct MarketTick {
    symbol_id: u32,
    price: f64,
    volume: u64,
    sequence: u64,
}

struct ThroughputMetrics {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
}

impl ThroughputMetrics {
    fn new() -> Self {
        Self {
            messages_sent: AtomicU64::new(0),
            messages_received: AtomicU64::new(0),
        }
    }
}

fn main() -> datablock_core::DataBlockResult<()> {
    println!("DataBlock - High-Throughput Streaming Example");
    println!("==============================================");

    let metrics = Arc::new(ThroughputMetrics::new());
    let stop_flag = Arc::new(AtomicBool::new(false));
    let start = Instant::now();

    let mut config = CreationConfig::new(64, std::mem::size_of::<MarketTick>() as u32, 4096);
    config.consumer_sync_policy = ConsumerSyncPolicy::LatestOnly;
    let segment = Segment::create("market_feed", &config)?;

    let producer_metrics = metrics.clone();
    let producer_stop = stop_flag.clone();
    let producer_handle = thread::spawn(move || {
        let writer = Writer::new(segment.regions());
        let mut sequence = 0u64;
        let mut price = 150.0f64;

        while !producer_stop.load(Ordering::Relaxed) {
            price += (sequence as f64 * 0.001).sin() * 0.1;
            let tick = MarketTick {
                symbol_id: (sequence % 5) as u32,
                price,
                volume: 1000 + (sequence % 5000),
                sequence,
            };

            if let Ok(mut tx) = writer.begin_write(Duration::from_micros(50)) {
                tx.write(&tick);
                if tx.commit().is_ok() {
                    producer_metrics.messages_sent.fetch_add(1, Ordering::Relaxed);
                    sequence += 1;
                }
            }
            thread::sleep(Duration::from_micros(10));
        }
        println!("Producer: completed {sequence} updates");
        segment
    });

    thread::sleep(Duration::from_millis(50));

    let num_consumers = 4;
    let mut consumer_handles = Vec::new();
    for consumer_id in 0..num_consumers {
        let consumer_metrics = metrics.clone();
        let consumer_stop = stop_flag.clone();
        consumer_handles.push(thread::spawn(move || {
            let attached = AttachedSegment::attach("market_feed", 0, None, None).unwrap();
            let mut consumer = Consumer::attach(attached.regions());
            let mut last_sequence = 0u64;

            while !consumer_stop.load(Ordering::Relaxed) {
                if let Ok(view) = consumer.consume(Duration::from_millis(5)) {
                    let tick: MarketTick = view.read();
                    let _ = consumer.release(view);
                    if tick.sequence != last_sequence {
                        consumer_metrics.messages_received.fetch_add(1, Ordering::Relaxed);
                        last_sequence = tick.sequence;
                    }
                }
                thread::yield_now();
            }
            println!("Consumer {consumer_id}: last observed sequence {last_sequence}");
        }));
    }

    thread::sleep(Duration::from_secs(2));
    stop_flag.store(true, Ordering::Relaxed);

    let segment = producer_handle.join().unwrap();
    for handle in consumer_handles {
        handle.join().unwrap();
    }
    drop(segment);

    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "Sent {} messages ({:.0}/s), received {} ({:.0}/s)",
        metrics.messages_sent.load(Ordering::Relaxed),
        metrics.messages_sent.load(Ordering::Relaxed) as f64 / elapsed,
        metrics.messages_received.load(Ordering::Relaxed),
        metrics.messages_received.load(Ordering::Relaxed) as f64 / elapsed,
    );
    println!("High-throughput streaming example completed!");
    Ok(())
}
