// src/main.rs
//
// Offline replay driver: feeds a recorded detection stream (JSON lines)
// through the parking tracker and prints the lifecycle events a live
// deployment would send to its backend.
//
// Usage: parklot-monitor <config.yaml> <detections.jsonl> [summary.json]

use anyhow::{Context, Result};
use parklot_monitor::tracker::ParkingTracker;
use parklot_monitor::types::{MonitorConfig, VehicleDetection};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use tracing::{info, warn};

/// One line of the replay input.
#[derive(Debug, Deserialize)]
struct FrameRecord {
    frame_idx: u64,
    #[serde(default)]
    detections: Vec<VehicleDetection>,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <config.yaml> <detections.jsonl> [summary.json]", args[0]);
        std::process::exit(2);
    }

    let monitor_config = MonitorConfig::load(&args[1])?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&monitor_config.logging.level)),
        )
        .init();

    info!("Loaded config from {} ({} zones)", args[1], monitor_config.zones.len());

    let mut tracker = ParkingTracker::new(&monitor_config);

    let file = File::open(&args[2]).with_context(|| format!("opening detections {}", args[2]))?;
    let reader = BufReader::new(file);

    let mut last_frame_idx: u64 = 0;
    let mut frames_processed: u64 = 0;

    for (line_no, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {} of {}", line_no + 1, args[2]))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: FrameRecord = serde_json::from_str(&line)
            .with_context(|| format!("parsing line {} of {}", line_no + 1, args[2]))?;

        if frames_processed > 0 && record.frame_idx <= last_frame_idx {
            warn!(
                "Non-increasing frame index {} after {}, skipping line {}",
                record.frame_idx,
                last_frame_idx,
                line_no + 1
            );
            continue;
        }

        let alerts = tracker.update(&record.detections, record.frame_idx, None);
        for alert in alerts {
            warn!("{alert}");
        }

        for event in tracker.drain_events() {
            // a live worker would POST this; the replay prints it
            println!("{}", serde_json::to_string(&event)?);
        }

        last_frame_idx = record.frame_idx;
        frames_processed += 1;
    }

    tracker.finalize_all_sessions(last_frame_idx);
    for event in tracker.drain_events() {
        println!("{}", serde_json::to_string(&event)?);
    }

    let summary = tracker.summary(last_frame_idx);
    info!(
        "Replay done: {} frames, {} sessions, avg {:.2} min",
        frames_processed,
        summary.total_parking_sessions_recorded,
        summary.average_parking_duration_minutes
    );
    if let Some(out) = args.get(3) {
        summary.save(out)?;
    }

    Ok(())
}
