//! Periodic health monitor for a running segment: sweeps for zombie
//! writers and stale consumers, and validates header/layout integrity.

use datablock_core::diagnostics;
use datablock_core::segment::{CreationConfig, Segment};
use std::thread;
use std::time::Duration;

fn main() -> datablock_core::DataBlockResult<()> {
    println!("DataBlock - Segment Monitor");
    println!("===========================");

    let config = CreationConfig::new(8, 64, 4096);
    let segment = Segment::create("monitored_segment", &config)?;
    let regions = segment.regions();

    for tick in 0..10 {
        match diagnostics::validate_integrity(regions) {
            Ok(()) => println!("[{tick}] integrity ok"),
            Err(e) => println!("[{tick}] integrity check failed: {e}"),
        }

        let report = diagnostics::sweep(
            regions,
            regions.runtime_state().reclaim_grace(),
            Duration::from_secs(10),
        )?;

        if !report.reclaimed_slots.is_empty() {
            println!(
                "[{tick}] reclaimed {} zombie slot(s): {:?}",
                report.reclaimed_slots.len(),
                report.reclaimed_slots
            );
        }
        if !report.reaped_consumers.is_empty() {
            println!(
                "[{tick}] reaped {} stale consumer(s): {:?}",
                report.reaped_consumers.len(),
                report.reaped_consumers
            );
        }

        println!(
            "[{tick}] live consumers: {}",
            diagnostics::has_live_consumers(regions)
        );

        thread::sleep(Duration::from_millis(500));
    }

    println!("Monitor finished.");
    Ok(())
}
