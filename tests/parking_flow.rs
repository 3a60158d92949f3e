// End-to-end flow over a synthetic detection stream: a car drives in,
// parks, overstays into a violation (with evidence snapshot), and finally
// leaves the scene. Mirrors what a live camera worker drives per tick.

use anyhow::Result;
use parklot_monitor::snapshot::SnapshotSource;
use parklot_monitor::tracker::ParkingTracker;
use parklot_monitor::types::{MonitorConfig, VehicleDetection};
use parklot_monitor::{ParkingEvent, SessionOutcome};

struct FakeCamera;

impl SnapshotSource for FakeCamera {
    fn resolution(&self) -> (u32, u32) {
        (1280, 720)
    }

    fn capture(&self, _bbox: [i32; 4]) -> Result<Vec<u8>> {
        Ok(vec![0xFF, 0xD8, 0xFF, 0xE0])
    }
}

fn flow_config() -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.zones = vec![vec![[0.0, 0.0], [400.0, 0.0], [400.0, 400.0], [0.0, 400.0]]];
    config.video.fps = 10.0;
    config.parking.movement_threshold_px = 5.0;
    config.parking.movement_frame_window = 5;
    config.parking.parking_time_threshold_seconds = 3.0; // 30 frames
    config.parking.grace_period_frames_exit = 3;
    config.parking.parked_car_timeout_seconds = 2.0;
    config.parking.lost_track_timeout_seconds = 0.5;
    // bench-style shortened limit: 0.1 min = 6 s = 60 frames
    config.debug.enabled = true;
    config.debug.mock_violation_minutes = 0.1;
    config
}

/// Center x = x + 30, y = 200; inside the zone for x_center < 400.
fn car(id: i64, x_center: f32) -> VehicleDetection {
    VehicleDetection {
        id,
        bbox: [x_center - 30.0, 180.0, x_center + 30.0, 220.0],
        class_id: 2,
    }
}

/// Drives in at 20 px/frame for frames 0..=9, then sits at x=250.
fn scripted_detection(frame: u64) -> VehicleDetection {
    if frame < 10 {
        car(1, 50.0 + 20.0 * frame as f32)
    } else {
        car(1, 250.0)
    }
}

#[test]
fn full_violation_flow_with_snapshot() {
    let camera = FakeCamera;
    let mut tracker = ParkingTracker::new(&flow_config());
    let mut alerts = Vec::new();

    // stillness window fills at frame 14, confirmation 30 frames later
    for f in 0..=43 {
        alerts.extend(tracker.update(&[scripted_detection(f)], f, Some(&camera)));
        assert!(!tracker.track(1).map(|t| t.is_parking).unwrap_or(false));
    }
    tracker.update(&[scripted_detection(44)], 44, Some(&camera));
    {
        let track = tracker.track(1).unwrap();
        assert!(track.is_parking);
        assert_eq!(track.parking_start_frame_idx, Some(14));
        assert_eq!(track.parking_session_id, Some(1));
    }
    assert_eq!(tracker.current_parking_ids(), vec![1]);
    assert!(tracker.drain_events().is_empty(), "confirmation emits no event");

    // 6 s limit from frame 14: first violating frame is 75
    for f in 45..=74 {
        alerts.extend(tracker.update(&[scripted_detection(f)], f, Some(&camera)));
    }
    assert!(alerts.is_empty());
    for f in 75..=80 {
        alerts.extend(tracker.update(&[scripted_detection(f)], f, Some(&camera)));
    }
    assert_eq!(alerts.len(), 1, "violation alert fires exactly once");

    let events = tracker.drain_events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        ParkingEvent::ParkingViolationStarted {
            car_id,
            is_violation,
            image_base64,
            current_park,
            total_parking_sessions,
            ..
        } => {
            assert_eq!(*car_id, 1);
            assert!(is_violation);
            assert!(image_base64.is_some(), "snapshot source was available");
            assert_eq!(*current_park, 1);
            assert_eq!(*total_parking_sessions, 1);
        }
        other => panic!("expected violation start, got {:?}", other),
    }

    // car vanishes; parked timeout is 2 s past frame 80
    let mut f = 81;
    while tracker.track(1).is_some() {
        tracker.update(&[], f, Some(&camera));
        f += 1;
        assert!(f < 200, "parked track must eventually be dropped");
    }

    let events = tracker.drain_events();
    assert_eq!(events.len(), 1);
    match &events[0] {
        ParkingEvent::ParkingSessionCompleted {
            car_id,
            is_violation,
            image_base64,
            current_park,
            total_parking_sessions,
            ..
        } => {
            assert_eq!(*car_id, 1);
            assert!(is_violation, "violation flag survives to completion");
            assert!(image_base64.is_some());
            assert_eq!(*current_park, 0);
            assert_eq!(*total_parking_sessions, 1);
        }
        other => panic!("expected completion, got {:?}", other),
    }

    let summary = tracker.summary(f);
    assert_eq!(summary.total_parking_sessions_recorded, 1);
    assert_eq!(
        summary.all_sessions_details[0].final_status,
        SessionOutcome::Disappeared
    );
}

#[test]
fn acknowledged_violation_ends_as_backend_update() {
    let mut tracker = ParkingTracker::new(&flow_config());

    for f in 0..=80 {
        tracker.update(&[scripted_detection(f)], f, None);
    }
    let events = tracker.drain_events();
    assert_eq!(events.len(), 1);
    assert!(matches!(
        events[0],
        ParkingEvent::ParkingViolationStarted { image_base64: None, .. }
    ));

    // backend acknowledged the violation record
    tracker.set_db_record_id(1, 4242);

    for f in 81..=160 {
        tracker.update(&[], f, None);
    }
    let events = tracker.drain_events();
    assert_eq!(events.len(), 1, "no duplicate creation event");
    match &events[0] {
        ParkingEvent::ParkingViolationEnded { db_record_id, .. } => {
            assert_eq!(*db_record_id, 4242)
        }
        other => panic!("expected backend update, got {:?}", other),
    }
}

#[test]
fn id_swap_mid_park_keeps_one_session() {
    let mut tracker = ParkingTracker::new(&flow_config());

    for f in 0..=44 {
        tracker.update(&[scripted_detection(f)], f, None);
    }
    assert!(tracker.track(1).unwrap().is_parking);

    // upstream tracker re-labels the same physical car from frame 45 on
    for f in 45..=60 {
        tracker.update(&[car(77, 250.0)], f, None);
    }
    assert!(tracker.track(77).is_none(), "new label folded into old track");
    let track = tracker.track(1).unwrap();
    assert!(track.is_parking);
    assert_eq!(track.parking_session_id, Some(1));

    // the whole run still ends with a single session
    tracker.finalize_all_sessions(61);
    let summary = tracker.summary(61);
    assert_eq!(summary.total_parking_sessions_recorded, 1);
    assert_eq!(
        summary.all_sessions_details[0].final_status,
        SessionOutcome::Shutdown
    );
}
