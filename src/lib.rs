//! Per-camera parking occupancy core.
//!
//! Consumes frame-level vehicle detections (already tracked and ID'd
//! upstream) and maintains parking session state: stillness-debounced
//! confirmation, overstay violations, zone-exit and movement grace
//! periods, identity-theft protection for parked tracks, and an
//! outbound queue of lifecycle events for a reporting backend.
//!
//! The crate does no detection, no video decoding and no network I/O.
//! Callers drive [`ParkingTracker::update`] once per processed frame and
//! drain events between ticks; an optional [`SnapshotSource`] supplies
//! violation evidence images.

pub mod config;
pub mod geometry;
pub mod ledger;
pub mod snapshot;
pub mod stillness;
pub mod tracker;
pub mod types;

pub use ledger::{ParkingEvent, ParkingSummary, SessionLedger, SessionOutcome, SessionRecord};
pub use snapshot::SnapshotSource;
pub use tracker::{CarStatus, ParkingTracker, Track};
pub use types::{
    MonitorConfig, TrackStatus, TrackingPolicy, VehicleDetection, Zone,
};
