// src/ledger.rs
//
// Session ledger and outbound event queue. The tracker appends here;
// the camera worker drains the queue and forwards events to the
// reporting backend. Delivery, retry and backoff live with the caller —
// the ledger only guarantees events stay queued until drained.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// Why (or in what state) a session left the ledger's books.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    LeftZone,
    Moved,
    MovedAfterGrace,
    Disappeared,
    Shutdown,
    /// Still open at summary time, within the limit
    ParkedActive,
    /// Still open at summary time, past the limit
    ViolationActive,
}

/// Immutable snapshot written when a parking session closes (or synthesized
/// for still-open sessions at summary time).
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub session_id: u64,
    pub car_id: i64,
    pub start_frame: u64,
    pub end_frame: u64,
    pub duration_frames: u64,
    pub duration_s: f64,
    pub duration_min: f64,
    pub final_status: SessionOutcome,
}

/// Outbound lifecycle event for the reporting backend.
///
/// Non-violating sessions are reported once, on completion. Violating
/// sessions are reported twice — a creation event when the violation fires
/// (so operators see it live) and an update keyed by the backend record id
/// when the car leaves. Hence the asymmetric shapes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum ParkingEvent {
    ParkingViolationStarted {
        car_id: i64,
        entry_time: DateTime<Utc>,
        duration_minutes: f64,
        is_violation: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_base64: Option<String>,
        current_park: usize,
        total_parking_sessions: u64,
    },
    ParkingSessionCompleted {
        car_id: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        entry_time: Option<DateTime<Utc>>,
        exit_time: DateTime<Utc>,
        duration_minutes: f64,
        is_violation: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        image_base64: Option<String>,
        current_park: usize,
        total_parking_sessions: u64,
    },
    ParkingViolationEnded {
        db_record_id: i64,
        exit_time: DateTime<Utc>,
        duration_minutes: f64,
    },
}

impl ParkingEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ParkingViolationStarted { .. } => "parking_violation_started",
            Self::ParkingSessionCompleted { .. } => "parking_session_completed",
            Self::ParkingViolationEnded { .. } => "parking_violation_ended",
        }
    }
}

/// JSON-serializable end-of-run summary.
#[derive(Debug, Clone, Serialize)]
pub struct ParkingSummary {
    pub total_parking_sessions_recorded: usize,
    pub average_parking_duration_minutes: f64,
    pub all_sessions_details: Vec<SessionRecord>,
}

impl ParkingSummary {
    pub fn from_records(records: Vec<SessionRecord>) -> Self {
        let total = records.len();
        let total_duration_s: f64 = records.iter().map(|r| r.duration_s).sum();
        let avg_s = if total > 0 {
            total_duration_s / total as f64
        } else {
            0.0
        };
        Self {
            total_parking_sessions_recorded: total,
            average_parking_duration_minutes: avg_s / 60.0,
            all_sessions_details: records,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing summary {}", path.display()))?;
        info!("Parking session summary saved to {}", path.display());
        Ok(())
    }
}

/// Accumulates closed session records and queues lifecycle events.
/// Also the sole allocator of session ids, which are strictly increasing
/// and never reused.
#[derive(Debug, Default)]
pub struct SessionLedger {
    records: Vec<SessionRecord>,
    events: VecDeque<ParkingEvent>,
    sessions_started: u64,
}

impl SessionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next session id.
    pub fn begin_session(&mut self) -> u64 {
        self.sessions_started += 1;
        self.sessions_started
    }

    /// Total sessions ever started on this instance.
    pub fn total_sessions(&self) -> u64 {
        self.sessions_started
    }

    pub fn record(&mut self, record: SessionRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[SessionRecord] {
        &self.records
    }

    pub fn publish(&mut self, event: ParkingEvent) {
        debug!("Enqueued {} event", event.event_type());
        self.events.push_back(event);
    }

    /// Get-and-clear: hands every pending event to the caller for delivery.
    pub fn drain(&mut self) -> Vec<ParkingEvent> {
        self.events.drain(..).collect()
    }

    pub fn pending_count(&self) -> usize {
        self.events.len()
    }

    /// Camera restart path: drop records and pending events. Session ids
    /// keep counting up so ids stay unique across the instance lifetime.
    pub fn reset(&mut self) {
        self.records.clear();
        self.events.clear();
    }
}

/// Two-decimal rounding for reported durations.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session_id: u64, duration_s: f64) -> SessionRecord {
        SessionRecord {
            session_id,
            car_id: 1,
            start_frame: 0,
            end_frame: (duration_s * 10.0) as u64,
            duration_frames: (duration_s * 10.0) as u64,
            duration_s,
            duration_min: duration_s / 60.0,
            final_status: SessionOutcome::LeftZone,
        }
    }

    #[test]
    fn test_session_ids_strictly_increasing() {
        let mut ledger = SessionLedger::new();
        let a = ledger.begin_session();
        let b = ledger.begin_session();
        let c = ledger.begin_session();
        assert!(a < b && b < c);
        assert_eq!(ledger.total_sessions(), 3);
    }

    #[test]
    fn test_reset_keeps_id_counter() {
        let mut ledger = SessionLedger::new();
        ledger.begin_session();
        ledger.record(record(1, 60.0));
        ledger.reset();
        assert!(ledger.records().is_empty());
        assert_eq!(ledger.begin_session(), 2);
    }

    #[test]
    fn test_drain_clears_queue() {
        let mut ledger = SessionLedger::new();
        ledger.publish(ParkingEvent::ParkingViolationEnded {
            db_record_id: 7,
            exit_time: Utc::now(),
            duration_minutes: 12.5,
        });
        assert_eq!(ledger.pending_count(), 1);
        let events = ledger.drain();
        assert_eq!(events.len(), 1);
        assert_eq!(ledger.pending_count(), 0);
        assert!(ledger.drain().is_empty());
    }

    #[test]
    fn test_summary_average() {
        let summary = ParkingSummary::from_records(vec![record(1, 60.0), record(2, 180.0)]);
        assert_eq!(summary.total_parking_sessions_recorded, 2);
        assert!((summary.average_parking_duration_minutes - 2.0).abs() < 1e-9);

        let empty = ParkingSummary::from_records(Vec::new());
        assert_eq!(empty.average_parking_duration_minutes, 0.0);
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = ParkingEvent::ParkingViolationEnded {
            db_record_id: 42,
            exit_time: Utc::now(),
            duration_minutes: 61.25,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "parking_violation_ended");
        assert_eq!(json["db_record_id"], 42);
        assert!(json.get("car_id").is_none());

        let event = ParkingEvent::ParkingSessionCompleted {
            car_id: 3,
            entry_time: Some(Utc::now()),
            exit_time: Utc::now(),
            duration_minutes: 5.0,
            is_violation: false,
            image_base64: None,
            current_park: 2,
            total_parking_sessions: 9,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event_type"], "parking_session_completed");
        assert_eq!(json["current_park"], 2);
        assert!(json.get("image_base64").is_none());
    }

    #[test]
    fn test_round2() {
        assert_eq!(round2(1.005), 1.0);
        assert_eq!(round2(2.678), 2.68);
    }
}
