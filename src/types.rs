use serde::{Deserialize, Serialize};

/// One parking area polygon in camera-plane pixel coordinates.
/// A deployment holds several; "in zone" means inside any of them.
pub type Zone = Vec<[f32; 2]>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub zones: Vec<Zone>,
    pub video: VideoConfig,
    pub parking: ParkingConfig,
    pub reid: ReidConfig,
    pub debug: DebugConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub fps: f64,
    /// Resolution the detector runs at. Bboxes arrive in these coordinates.
    pub processing_width: u32,
    pub processing_height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParkingConfig {
    /// Max pixel deviation from the window mean for a track to count as still
    pub movement_threshold_px: f32,
    /// Sliding-window length (frames) for the stillness test
    pub movement_frame_window: usize,
    /// Continuous still-in-zone seconds before a track is confirmed parked
    pub parking_time_threshold_seconds: f64,
    /// Parked duration beyond which a session becomes a violation
    pub parking_time_limit_minutes: f64,
    /// Consecutive frames outside every zone before a parked session ends
    pub grace_period_frames_exit: u32,
    /// How long a parked car may vanish before its session is force-ended
    pub parked_car_timeout_seconds: f64,
    /// How long a non-parked track may vanish before it is dropped
    pub lost_track_timeout_seconds: f64,
    /// Unknown-ID handling. The two source deployments diverged here;
    /// a deployment picks exactly one, never a blend.
    pub policy: TrackingPolicy,
}

/// How unrecognized track IDs and moved-while-parked jitter are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingPolicy {
    /// Every unknown ID is a brand-new track; a parked car that moves
    /// ends its session on the first moving frame.
    Simple,
    /// Unknown IDs are matched against recently lost tracks before a new
    /// track is created, and parked cars get a movement grace window.
    Defensive,
}

/// Thresholds for the defensive re-association policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReidConfig {
    /// Minimum IoU to adopt a lost non-parked track
    pub reid_iou_threshold: f32,
    /// Minimum IoU to adopt a lost *parked* track (strict, avoids stealing)
    pub parked_iou_lock_threshold: f32,
    /// Non-parked lost tracks older than this many frames are not considered.
    /// Defaults to two seconds worth of frames when unset.
    pub reid_frame_window: Option<u64>,
    /// Frames a locked-in parked car may move before its session ends
    pub stillness_grace_period_frames: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
    /// Shortened violation limit for bench runs, in minutes
    pub mock_violation_minutes: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            zones: Vec::new(),
            video: VideoConfig::default(),
            parking: ParkingConfig::default(),
            reid: ReidConfig::default(),
            debug: DebugConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            fps: 10.0,
            processing_width: 1280,
            processing_height: 720,
        }
    }
}

impl Default for ParkingConfig {
    fn default() -> Self {
        Self {
            movement_threshold_px: 5.0,
            movement_frame_window: 10,
            parking_time_threshold_seconds: 3.0,
            parking_time_limit_minutes: 10.0,
            grace_period_frames_exit: 5,
            parked_car_timeout_seconds: 300.0,
            lost_track_timeout_seconds: 5.0,
            policy: TrackingPolicy::Defensive,
        }
    }
}

impl Default for ReidConfig {
    fn default() -> Self {
        Self {
            reid_iou_threshold: 0.30,
            parked_iou_lock_threshold: 0.40,
            reid_frame_window: None,
            stillness_grace_period_frames: 15,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mock_violation_minutes: 1.0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// One detector/tracker output for the current frame — the tick input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleDetection {
    /// Externally assigned track ID, unique among the frame's detections
    pub id: i64,
    /// [x1, y1, x2, y2] in processing-resolution pixels
    pub bbox: [f32; 4],
    /// COCO class (2=car, 7=truck)
    pub class_id: u32,
}

impl VehicleDetection {
    pub fn center(&self) -> (f32, f32) {
        (
            (self.bbox[0] + self.bbox[2]) * 0.5,
            (self.bbox[1] + self.bbox[3]) * 0.5,
        )
    }
}

/// One entry of a track's bounded center history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CenterSample {
    pub x: f32,
    pub y: f32,
    pub frame_idx: u64,
}

/// Lifecycle state of a tracked vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TrackStatus {
    NewDetection,
    MovingInZone,
    OutOfZone,
    ConfirmingPark,
    Parked,
    /// Parked but currently outside every zone, within the exit grace window.
    /// The session stays open while in this sub-state.
    OutOfZoneGracePeriod,
    /// Sticky — once entered, a session never reverts to plain Parked.
    Violation,
}

impl TrackStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewDetection => "NEW_DETECTION",
            Self::MovingInZone => "MOVING_IN_ZONE",
            Self::OutOfZone => "OUT_OF_ZONE",
            Self::ConfirmingPark => "CONFIRMING_PARK",
            Self::Parked => "PARKED",
            Self::OutOfZoneGracePeriod => "OUT_OF_ZONE_GRACE_PERIOD",
            Self::Violation => "VIOLATION",
        }
    }
}

/// Trucks are reported as cars downstream.
pub fn normalize_vehicle_class(class_id: u32) -> u32 {
    if class_id == 7 {
        2
    } else {
        class_id
    }
}
