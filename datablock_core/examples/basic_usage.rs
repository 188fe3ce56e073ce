//! Basic producer/consumer usage example.
//! Demonstrates the simplest single-writer, single-reader pattern.

use bytemuck::{Pod, Zeroable};
use datablock_core::consumer::Consumer;
use datablock_core::segment::{AttachedSegment, CreationConfig, Segment};
use datablock_core::writer::Writer;
use std::thread;
use std::time::Duration;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable, Default)]
struct SensorData {
    temperature: f32,
    humidity: f32,
    timestamp_ms: u64,
}

fn producer() -> datablock_core::DataBlockResult<()> {
    println!("Producer: starting...");

    let config = CreationConfig::new(16, std::mem::size_of::<SensorData>() as u32, 4096);
    let segment = Segment::create("sensor_data", &config)?;
    let writer = Writer::new(segment.regions());

    for i in 0..100u64 {
        let sample = SensorData {
            temperature: 20.0 + i as f32 * 0.1,
            humidity: 50.0 + i as f32 * 0.2,
            timestamp_ms: i,
        };

        let mut tx = writer.begin_write(Duration::from_millis(100))?;
        tx.write(&sample);
        tx.commit()?;

        if i % 10 == 0 {
            println!("Producer: wrote #{i}: temp={:.1}", sample.temperature);
        }

        thread::sleep(Duration::from_millis(20));
    }

    // Keep the segment (and its name) alive until the consumer finishes.
    thread::sleep(Duration::from_millis(500));
    Ok(())
}

fn consumer() -> datablock_core::DataBlockResult<()> {
    println!("Consumer: starting...");
    thread::sleep(Duration::from_millis(100));

    let attached = loop {
        match AttachedSegment::attach("sensor_data", 0, None, None) {
            Ok(a) => break a,
            Err(_) => thread::sleep(Duration::from_millis(10)),
        }
    };
    let mut consumer = Consumer::attach(attached.regions());

    for i in 0..50u64 {
        match consumer.consume(Duration::from_millis(200)) {
            Ok(view) => {
                let sample: SensorData = view.read();
                if i % 10 == 0 {
                    println!("Consumer: read #{i}: temp={:.1}", sample.temperature);
                }
                consumer.release(view)?;
            }
            Err(e) => println!("Consumer: read error: {e}"),
        }
    }

    Ok(())
}

fn main() -> datablock_core::DataBlockResult<()> {
    println!("DataBlock - Basic Usage Example");
    println!("================================");

    let producer_handle = thread::spawn(|| {
        if let Err(e) = producer() {
            eprintln!("Producer error: {e}");
        }
    });
    let consumer_handle = thread::spawn(|| {
        if let Err(e) = consumer() {
            eprintln!("Consumer error: {e}");
        }
    });

    producer_handle.join().unwrap();
    consumer_handle.join().unwrap();

    println!("Basic usage example completed!");
    Ok(())
}
