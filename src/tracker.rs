// src/tracker.rs
//
// Per-camera parking session state machine. Turns noisy, ID-unstable
// frame-level detections into confirmed parking sessions with debouncing,
// grace periods and identity-theft protection.
//
// Lifecycle:
//   NEW_DETECTION → {MOVING_IN_ZONE, OUT_OF_ZONE, CONFIRMING_PARK}
//     → PARKED → {VIOLATION}
//     → session end (left zone / moved / disappeared / shutdown)
//
// One instance per camera, driven by a single sequential worker. The
// update tick performs no I/O; lifecycle events are queued on the ledger
// and drained by the caller.

use crate::geometry::{bbox_center, euclidean_distance, iou, point_in_any_zone};
use crate::ledger::{
    round2, ParkingEvent, ParkingSummary, SessionLedger, SessionOutcome, SessionRecord,
};
use crate::snapshot::{capture_violation_snapshot, SnapshotSource};
use crate::stillness::is_still;
use crate::types::{
    normalize_vehicle_class, CenterSample, MonitorConfig, TrackStatus, TrackingPolicy,
    VehicleDetection, Zone,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

// ============================================================================
// TRACK STATE
// ============================================================================

/// The evolving state record for one physically tracked vehicle, keyed by
/// the externally assigned track ID.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: i64,
    pub current_bbox: [f32; 4],
    /// Sliding window of recent centers, capacity = movement frame window
    pub center_history: VecDeque<CenterSample>,
    pub last_seen_frame_idx: u64,
    pub is_still: bool,
    pub status: TrackStatus,
    /// True exactly while a session is open on this track
    pub is_parking: bool,
    pub still_start_frame_idx: Option<u64>,
    pub parking_start_frame_idx: Option<u64>,
    /// Back-dated by the stillness streak, not the confirmation instant
    pub parking_start_time: Option<DateTime<Utc>>,
    pub parking_session_id: Option<u64>,
    pub frames_outside_zone_count: u32,
    pub moved_grace_frames: u32,
    /// Set at confirmation and on re-association of a parked track;
    /// grants the moved-while-parked grace window under the defensive policy
    pub lock_in_parking: bool,
    pub class_id: u32,
    /// Backend record id, fed back by the caller once the violation start
    /// event is acknowledged
    pub db_record_id: Option<i64>,
    /// Sticky — a session never reverts out of violation
    pub is_violation_final: bool,
    pub violation_image_base64: Option<String>,
}

impl Track {
    fn new(det: &VehicleDetection, frame_idx: u64, window: usize) -> Self {
        let (cx, cy) = det.center();
        let mut center_history = VecDeque::with_capacity(window);
        center_history.push_back(CenterSample {
            x: cx,
            y: cy,
            frame_idx,
        });
        Self {
            id: det.id,
            current_bbox: det.bbox,
            center_history,
            last_seen_frame_idx: frame_idx,
            is_still: false,
            status: TrackStatus::NewDetection,
            is_parking: false,
            still_start_frame_idx: None,
            parking_start_frame_idx: None,
            parking_start_time: None,
            parking_session_id: None,
            frames_outside_zone_count: 0,
            moved_grace_frames: 0,
            lock_in_parking: false,
            class_id: normalize_vehicle_class(det.class_id),
            db_record_id: None,
            is_violation_final: false,
            violation_image_base64: None,
        }
    }

    /// Last known center — newest history sample, falling back to the bbox.
    pub fn last_center(&self) -> (f32, f32) {
        self.center_history
            .back()
            .map(|s| (s.x, s.y))
            .unwrap_or_else(|| bbox_center(&self.current_bbox))
    }

    fn apply_detection(&mut self, det: &VehicleDetection, frame_idx: u64, window: usize) {
        self.current_bbox = det.bbox;
        self.last_seen_frame_idx = frame_idx;
        self.class_id = normalize_vehicle_class(det.class_id);
        while self.center_history.len() >= window.max(1) {
            self.center_history.pop_front();
        }
        let (cx, cy) = det.center();
        self.center_history.push_back(CenterSample {
            x: cx,
            y: cy,
            frame_idx,
        });
    }
}

/// Overlay-facing view of one track's state.
#[derive(Debug, Clone)]
pub struct CarStatus {
    pub label: &'static str,
    /// "MMm SSs" while a session is open, empty otherwise
    pub time_parked: String,
}

struct LostCandidate {
    id: i64,
    center: (f32, f32),
    bbox: [f32; 4],
    is_parked: bool,
    matched: bool,
}

// ============================================================================
// TRACKER
// ============================================================================

pub struct ParkingTracker {
    zones: Vec<Zone>,
    fps: f64,
    policy: TrackingPolicy,
    movement_threshold_px: f32,
    movement_frame_window: usize,
    parking_confirm_frames: u64,
    /// 2x the movement threshold — beyond this a known-ID jump is treated
    /// as an upstream identity error, not motion
    id_switch_threshold_px: f32,
    grace_period_frames_exit: u32,
    stillness_grace_period_frames: u32,
    parked_car_timeout_seconds: f64,
    lost_track_timeout_seconds: f64,
    parking_time_limit_seconds: f64,
    reid_iou_threshold: f32,
    parked_iou_lock_threshold: f32,
    reid_frame_window: u64,
    processing: (u32, u32),
    tracks: HashMap<i64, Track>,
    ledger: SessionLedger,
}

impl ParkingTracker {
    pub fn new(config: &MonitorConfig) -> Self {
        let fps = if config.video.fps > 0.0 {
            config.video.fps
        } else {
            warn!("Invalid fps {} in config, falling back to 10", config.video.fps);
            10.0
        };

        let parking_confirm_frames =
            (config.parking.parking_time_threshold_seconds * fps) as u64;
        info!(
            "Parking confirmation time set to {}s ({} frames)",
            config.parking.parking_time_threshold_seconds, parking_confirm_frames
        );

        let id_switch_threshold_px = config.parking.movement_threshold_px * 2.0;
        info!(
            "ID switch teleport threshold set to {:.2}px",
            id_switch_threshold_px
        );

        let parking_time_limit_seconds = if config.debug.enabled {
            warn!("DEBUG MODE ENABLED — using shortened mock time limits");
            let mock = config.debug.mock_violation_minutes * 60.0;
            info!("Violation time limit set to {}s (mock)", mock);
            mock
        } else {
            config.parking.parking_time_limit_minutes * 60.0
        };

        let reid_frame_window = config
            .reid
            .reid_frame_window
            .unwrap_or((fps * 2.0) as u64);

        Self {
            zones: config.zones.clone(),
            fps,
            policy: config.parking.policy,
            movement_threshold_px: config.parking.movement_threshold_px,
            movement_frame_window: config.parking.movement_frame_window.max(1),
            parking_confirm_frames,
            id_switch_threshold_px,
            grace_period_frames_exit: config.parking.grace_period_frames_exit,
            stillness_grace_period_frames: config.reid.stillness_grace_period_frames,
            parked_car_timeout_seconds: config.parking.parked_car_timeout_seconds,
            lost_track_timeout_seconds: config.parking.lost_track_timeout_seconds,
            parking_time_limit_seconds,
            reid_iou_threshold: config.reid.reid_iou_threshold,
            parked_iou_lock_threshold: config.reid.parked_iou_lock_threshold,
            reid_frame_window,
            processing: (config.video.processing_width, config.video.processing_height),
            tracks: HashMap::new(),
            ledger: SessionLedger::new(),
        }
    }

    /// Process one frame of detections. Returns human-readable alert lines
    /// for logging; lifecycle events land on the ledger queue.
    ///
    /// `current_frame_idx` must be strictly increasing per instance.
    pub fn update(
        &mut self,
        detections: &[VehicleDetection],
        current_frame_idx: u64,
        snapshot: Option<&dyn SnapshotSource>,
    ) -> Vec<String> {
        let mut detected_ids: HashSet<i64> = detections.iter().map(|d| d.id).collect();
        let mut alerts: Vec<String> = Vec::new();
        let mut unknown: Vec<&VehicleDetection> = Vec::new();

        // ────────────────────────────────────────────────────────────────
        // 1) Known-ID updates, guarded against identity theft
        // ────────────────────────────────────────────────────────────────
        for det in detections {
            match self.tracks.get_mut(&det.id) {
                Some(track) => {
                    if track.is_parking {
                        let moved = euclidean_distance(det.center(), track.last_center());
                        if moved > self.id_switch_threshold_px {
                            // Probable tracker ID swap onto a parked car —
                            // discard the update whole, keep the old position.
                            warn!(
                                "Potential ID switch for parked car {} ({:.2}px jump), ignoring update",
                                det.id, moved
                            );
                            continue;
                        }
                    }
                    track.apply_detection(det, current_frame_idx, self.movement_frame_window);
                }
                None => unknown.push(det),
            }
        }

        // ────────────────────────────────────────────────────────────────
        // 2) Unknown IDs: re-associate against the lost pool, or create
        // ────────────────────────────────────────────────────────────────
        match self.policy {
            TrackingPolicy::Simple => {
                for det in &unknown {
                    debug!("Created new track {} (simple policy)", det.id);
                    self.tracks.insert(
                        det.id,
                        Track::new(det, current_frame_idx, self.movement_frame_window),
                    );
                }
            }
            TrackingPolicy::Defensive => {
                self.reassociate_or_create(&unknown, current_frame_idx, &mut detected_ids);
            }
        }

        // ────────────────────────────────────────────────────────────────
        // 3) Status pass over a snapshot of the key set
        // ────────────────────────────────────────────────────────────────
        let mut ids_to_remove: Vec<i64> = Vec::new();
        let track_ids: Vec<i64> = self.tracks.keys().copied().collect();

        for track_id in track_ids {
            if !detected_ids.contains(&track_id) {
                let (is_parked, seconds_disappeared) = match self.tracks.get(&track_id) {
                    Some(track) => (
                        track.is_parking,
                        current_frame_idx.saturating_sub(track.last_seen_frame_idx) as f64
                            / self.fps,
                    ),
                    None => continue,
                };
                let timeout = if is_parked {
                    self.parked_car_timeout_seconds
                } else {
                    self.lost_track_timeout_seconds
                };
                if seconds_disappeared > timeout {
                    info!(
                        "Removing track {} (disappeared {:.2}s)",
                        track_id, seconds_disappeared
                    );
                    if is_parked {
                        self.end_session(track_id, current_frame_idx, SessionOutcome::Disappeared);
                    }
                    ids_to_remove.push(track_id);
                }
                // below timeout: keep in memory for re-association
                continue;
            }

            let mut end_reason: Option<SessionOutcome> = None;
            let parked_now = self.tracks.values().filter(|t| t.is_parking).count();

            if let Some(track) = self.tracks.get_mut(&track_id) {
                let center = track.last_center();
                let in_zone = point_in_any_zone(center, &self.zones);
                let still = is_still(
                    &track.center_history,
                    self.movement_frame_window,
                    self.movement_threshold_px,
                );
                track.is_still = still;

                if !track.is_parking {
                    if in_zone && still {
                        match track.still_start_frame_idx {
                            None => {
                                track.still_start_frame_idx = Some(current_frame_idx);
                                track.status = TrackStatus::ConfirmingPark;
                            }
                            Some(still_start) => {
                                track.status = TrackStatus::ConfirmingPark;
                                let frames_still = current_frame_idx - still_start;
                                if frames_still >= self.parking_confirm_frames {
                                    let session_id = self.ledger.begin_session();
                                    let streak_ms =
                                        (frames_still as f64 / self.fps * 1000.0) as i64;
                                    track.is_parking = true;
                                    track.parking_start_frame_idx = Some(still_start);
                                    track.parking_start_time =
                                        Some(Utc::now() - Duration::milliseconds(streak_ms));
                                    track.parking_session_id = Some(session_id);
                                    track.status = TrackStatus::Parked;
                                    track.lock_in_parking = true;
                                    track.moved_grace_frames = 0;
                                    track.frames_outside_zone_count = 0;
                                    info!(
                                        "[{}] Car {} confirmed parked (session {})",
                                        current_frame_idx, track_id, session_id
                                    );
                                }
                            }
                        }
                    } else {
                        track.still_start_frame_idx = None;
                        track.status = if in_zone {
                            TrackStatus::MovingInZone
                        } else {
                            TrackStatus::OutOfZone
                        };
                    }
                } else if !in_zone {
                    track.frames_outside_zone_count += 1;
                    if track.frames_outside_zone_count >= self.grace_period_frames_exit {
                        end_reason = Some(SessionOutcome::LeftZone);
                    } else {
                        track.status = TrackStatus::OutOfZoneGracePeriod;
                    }
                } else {
                    track.frames_outside_zone_count = 0;
                    if !still {
                        if self.policy == TrackingPolicy::Defensive && track.lock_in_parking {
                            track.moved_grace_frames += 1;
                            if track.moved_grace_frames >= self.stillness_grace_period_frames {
                                info!(
                                    "Parked car {} kept moving past grace, ending session",
                                    track_id
                                );
                                end_reason = Some(SessionOutcome::MovedAfterGrace);
                            }
                        } else {
                            info!("Car {} moved while parked, ending session", track_id);
                            end_reason = Some(SessionOutcome::Moved);
                        }
                    } else {
                        track.moved_grace_frames = 0;
                        // back inside and still: leave any grace sub-state,
                        // violation stickiness wins over plain Parked
                        track.status = if track.is_violation_final {
                            TrackStatus::Violation
                        } else {
                            TrackStatus::Parked
                        };

                        if let Some(start_frame) = track.parking_start_frame_idx {
                            let duration_s =
                                current_frame_idx.saturating_sub(start_frame) as f64 / self.fps;
                            if duration_s > self.parking_time_limit_seconds
                                && !track.is_violation_final
                            {
                                track.status = TrackStatus::Violation;
                                track.is_violation_final = true;
                                alerts.push(format!(
                                    "VIOLATION: Car ID {} parked over {:.2} minutes",
                                    track_id,
                                    self.parking_time_limit_seconds / 60.0
                                ));

                                let image_base64 = snapshot.and_then(|source| {
                                    capture_violation_snapshot(
                                        source,
                                        &track.current_bbox,
                                        self.processing,
                                    )
                                });
                                track.violation_image_base64 = image_base64.clone();

                                let entry_time = track.parking_start_time.unwrap_or_else(Utc::now);
                                let elapsed_min = (Utc::now() - entry_time).num_milliseconds()
                                    as f64
                                    / 60_000.0;
                                let total_sessions = self.ledger.total_sessions();
                                self.ledger.publish(ParkingEvent::ParkingViolationStarted {
                                    car_id: track_id,
                                    entry_time,
                                    duration_minutes: round2(elapsed_min),
                                    is_violation: true,
                                    image_base64,
                                    current_park: parked_now,
                                    total_parking_sessions: total_sessions,
                                });
                                info!(
                                    "[{}] Violation started for car {} (session {:?})",
                                    current_frame_idx, track_id, track.parking_session_id
                                );
                            }
                        }
                    }
                }
            }

            if let Some(reason) = end_reason {
                self.end_session(track_id, current_frame_idx, reason);
            }
        }

        for id in ids_to_remove {
            self.tracks.remove(&id);
        }

        alerts
    }

    /// Hybrid re-association: before creating a track for an unknown ID,
    /// try to adopt a recently lost track. Parked candidates demand a strict
    /// IoU lock so a passing car cannot steal a parked identity.
    fn reassociate_or_create(
        &mut self,
        candidates: &[&VehicleDetection],
        current_frame_idx: u64,
        detected_ids: &mut HashSet<i64>,
    ) {
        let mut lost_pool: Vec<LostCandidate> = Vec::new();
        for (&id, track) in &self.tracks {
            if detected_ids.contains(&id) {
                continue;
            }
            let frames_disappeared = current_frame_idx.saturating_sub(track.last_seen_frame_idx);
            let seconds_disappeared = frames_disappeared as f64 / self.fps;
            let timeout = if track.is_parking {
                self.parked_car_timeout_seconds
            } else {
                self.lost_track_timeout_seconds
            };
            if seconds_disappeared > timeout {
                continue;
            }
            if !track.is_parking && frames_disappeared > self.reid_frame_window {
                continue;
            }
            lost_pool.push(LostCandidate {
                id,
                center: track.last_center(),
                bbox: track.current_bbox,
                is_parked: track.is_parking,
                matched: false,
            });
        }

        for det in candidates {
            let new_center = det.center();
            let denom = self.id_switch_threshold_px.max(1.0);
            let mut best: Option<(usize, f32)> = None;

            for (idx, lost) in lost_pool.iter().enumerate() {
                if lost.matched {
                    continue;
                }
                let dist = euclidean_distance(new_center, lost.center);
                let overlap = iou(&det.bbox, &lost.bbox);

                let score = if lost.is_parked {
                    if overlap >= self.parked_iou_lock_threshold
                        && dist < self.id_switch_threshold_px
                    {
                        overlap * 2.0 - (dist / denom) * 0.5
                    } else {
                        -1.0
                    }
                } else if dist < self.id_switch_threshold_px && overlap >= self.reid_iou_threshold {
                    overlap - (dist / denom) * 0.2
                } else {
                    -1.0
                };

                if score > best.map(|(_, s)| s).unwrap_or(-1.0) {
                    best = Some((idx, score));
                }
            }

            match best {
                Some((idx, score)) if score > 0.0 => {
                    lost_pool[idx].matched = true;
                    let old_id = lost_pool[idx].id;
                    debug!(
                        "Re-associating temp ID {} -> lost track {} (score={:.3})",
                        det.id, old_id, score
                    );
                    if let Some(track) = self.tracks.get_mut(&old_id) {
                        track.apply_detection(det, current_frame_idx, self.movement_frame_window);
                        if track.is_parking {
                            track.lock_in_parking = true;
                            track.frames_outside_zone_count = 0;
                        }
                    }
                    // all future processing refers to the original ID
                    detected_ids.remove(&det.id);
                    detected_ids.insert(old_id);
                }
                _ => {
                    debug!("Created new track {} (no re-association candidate)", det.id);
                    self.tracks.insert(
                        det.id,
                        Track::new(det, current_frame_idx, self.movement_frame_window),
                    );
                }
            }
        }
    }

    /// Shared session teardown: appends the ledger record, emits the
    /// appropriate terminal event, resets the track's parking fields.
    ///
    /// A session whose violation start was acknowledged (db_record_id set)
    /// gets an update-shaped event; everything else gets the full creation
    /// event with the aggregate counters.
    fn end_session(&mut self, track_id: i64, end_frame: u64, reason: SessionOutcome) {
        let current_park = self
            .tracks
            .iter()
            .filter(|(&id, t)| id != track_id && t.is_parking)
            .count();
        let total_sessions = self.ledger.total_sessions();

        let Some(track) = self.tracks.get_mut(&track_id) else {
            return;
        };
        if !track.is_parking {
            return;
        }
        let (Some(start_frame), Some(session_id)) =
            (track.parking_start_frame_idx, track.parking_session_id)
        else {
            return;
        };

        let duration_frames = end_frame.saturating_sub(start_frame);
        let duration_s = duration_frames as f64 / self.fps;
        let duration_min = duration_s / 60.0;

        match track.db_record_id {
            Some(db_record_id) => {
                self.ledger.publish(ParkingEvent::ParkingViolationEnded {
                    db_record_id,
                    exit_time: Utc::now(),
                    duration_minutes: round2(duration_min),
                });
                info!(
                    "[{:?}] Car {} session {} ended (backend record {})",
                    reason, track_id, session_id, db_record_id
                );
            }
            None => {
                self.ledger.publish(ParkingEvent::ParkingSessionCompleted {
                    car_id: track_id,
                    entry_time: track.parking_start_time,
                    exit_time: Utc::now(),
                    duration_minutes: round2(duration_min),
                    is_violation: track.is_violation_final,
                    image_base64: track.violation_image_base64.clone(),
                    current_park,
                    total_parking_sessions: total_sessions,
                });
                info!("[{:?}] Car {} session {} ended", reason, track_id, session_id);
            }
        }

        self.ledger.record(SessionRecord {
            session_id,
            car_id: track_id,
            start_frame,
            end_frame,
            duration_frames,
            duration_s,
            duration_min,
            final_status: reason,
        });

        // back to a clean non-parking state; a later session on this ID
        // starts from scratch
        track.is_parking = false;
        track.parking_start_frame_idx = None;
        track.parking_start_time = None;
        track.parking_session_id = None;
        track.status = TrackStatus::OutOfZone;
        track.frames_outside_zone_count = 0;
        track.moved_grace_frames = 0;
        track.still_start_frame_idx = None;
        track.lock_in_parking = false;
        track.is_violation_final = false;
        track.violation_image_base64 = None;
        track.db_record_id = None;
    }

    /// End-of-stream sweep: force-close every open session, then clear all
    /// track state.
    pub fn finalize_all_sessions(&mut self, final_frame_idx: u64) {
        info!(
            "Finalizing all active parking sessions at frame {}",
            final_frame_idx
        );
        let open_ids: Vec<i64> = self
            .tracks
            .iter()
            .filter(|(_, t)| t.is_parking)
            .map(|(&id, _)| id)
            .collect();
        for id in open_ids {
            self.end_session(id, final_frame_idx, SessionOutcome::Shutdown);
        }
        self.tracks.clear();
    }

    /// Store the reporting backend's record id for a track, so the eventual
    /// session end is sent as an update rather than a duplicate creation.
    pub fn set_db_record_id(&mut self, track_id: i64, db_id: i64) {
        match self.tracks.get_mut(&track_id) {
            Some(track) => {
                track.db_record_id = Some(db_id);
                info!("Stored backend record {} for car {}", db_id, track_id);
            }
            None => warn!("set_db_record_id: unknown track {}", track_id),
        }
    }

    /// Hand pending lifecycle events to the caller for delivery.
    pub fn drain_events(&mut self) -> Vec<ParkingEvent> {
        self.ledger.drain()
    }

    pub fn pending_event_count(&self) -> usize {
        self.ledger.pending_count()
    }

    /// Total sessions ever confirmed on this instance.
    pub fn parking_count(&self) -> u64 {
        self.ledger.total_sessions()
    }

    /// IDs of cars with an open session right now.
    pub fn current_parking_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self
            .tracks
            .iter()
            .filter(|(_, t)| t.is_parking)
            .map(|(&id, _)| id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn track(&self, track_id: i64) -> Option<&Track> {
        self.tracks.get(&track_id)
    }

    /// Overlay helper: status label plus elapsed parked time.
    pub fn car_status(&self, track_id: i64, current_frame_idx: u64) -> CarStatus {
        match self.tracks.get(&track_id) {
            None => CarStatus {
                label: "OUT_OF_SCENE",
                time_parked: String::new(),
            },
            Some(track) => {
                let time_parked = match (track.is_parking, track.parking_start_frame_idx) {
                    (true, Some(start)) => {
                        let secs = (current_frame_idx.saturating_sub(start) as f64 / self.fps)
                            as u64;
                        format!("{:02}m {:02}s", secs / 60, secs % 60)
                    }
                    _ => String::new(),
                };
                CarStatus {
                    label: track.status.as_str(),
                    time_parked,
                }
            }
        }
    }

    /// End-of-run summary: closed records plus still-open sessions
    /// classified by whether they are past the limit right now.
    pub fn summary(&self, total_frames: u64) -> ParkingSummary {
        let mut records: Vec<SessionRecord> = self.ledger.records().to_vec();
        for (&id, track) in &self.tracks {
            if !track.is_parking {
                continue;
            }
            let (Some(start_frame), Some(session_id)) =
                (track.parking_start_frame_idx, track.parking_session_id)
            else {
                continue;
            };
            let duration_frames = total_frames.saturating_sub(start_frame);
            let duration_s = duration_frames as f64 / self.fps;
            let final_status = if duration_s > self.parking_time_limit_seconds {
                SessionOutcome::ViolationActive
            } else {
                SessionOutcome::ParkedActive
            };
            records.push(SessionRecord {
                session_id,
                car_id: id,
                start_frame,
                end_frame: total_frames,
                duration_frames,
                duration_s,
                duration_min: duration_s / 60.0,
                final_status,
            });
        }
        records.sort_by_key(|r| r.session_id);
        ParkingSummary::from_records(records)
    }

    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    /// Camera restart path: drop all track state, records and queued events.
    pub fn reset(&mut self) {
        info!("Resetting parking tracker state");
        self.tracks.clear();
        self.ledger.reset();
    }
}

// ============================================================================
// TESTS
// ============================================================================
