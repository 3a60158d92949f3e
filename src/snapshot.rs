// src/snapshot.rs
//
// Violation snapshot plumbing. The tracker decides *when* a snapshot is
// wanted; cropping and JPEG encoding belong to the caller behind the
// SnapshotSource trait. A failed capture is logged and the violation is
// still reported without an image — never a tick failure.

use anyhow::Result;
use base64::Engine;
use tracing::warn;

/// Capability handed in by the caller when a full-resolution frame is
/// available for the current tick.
pub trait SnapshotSource {
    /// Source-frame resolution (width, height) in pixels.
    fn resolution(&self) -> (u32, u32);

    /// Crop the region (source-resolution pixel coordinates) and encode
    /// it as JPEG bytes.
    fn capture(&self, bbox: [i32; 4]) -> Result<Vec<u8>>;
}

/// Crops smaller than this are noise, not evidence.
const MIN_CROP_WIDTH: i32 = 20;
const MIN_CROP_HEIGHT: i32 = 20;

/// Map a processing-resolution bbox back to source-resolution pixels,
/// clamped to the frame. Returns None when the clamped crop is degenerate
/// or below the minimum evidence size.
///
/// A bbox that already exceeds the processing dimensions is assumed to be
/// in source coordinates and is only clamped.
pub fn scale_bbox_to_source(
    bbox: &[f32; 4],
    processing: (u32, u32),
    source: (u32, u32),
) -> Option<[i32; 4]> {
    let (proc_w, proc_h) = (processing.0 as f32, processing.1 as f32);
    let (src_w, src_h) = (source.0 as i32, source.1 as i32);

    let (x1, y1, x2, y2) = if bbox[2] <= proc_w && bbox[3] <= proc_h {
        let scale_x = src_w as f32 / proc_w.max(1.0);
        let scale_y = src_h as f32 / proc_h.max(1.0);
        (
            (bbox[0] * scale_x) as i32,
            (bbox[1] * scale_y) as i32,
            (bbox[2] * scale_x) as i32,
            (bbox[3] * scale_y) as i32,
        )
    } else {
        (bbox[0] as i32, bbox[1] as i32, bbox[2] as i32, bbox[3] as i32)
    };

    let x1 = x1.clamp(0, src_w - 1);
    let x2 = x2.clamp(0, src_w);
    let y1 = y1.clamp(0, src_h - 1);
    let y2 = y2.clamp(0, src_h);

    if x2 <= x1 || y2 <= y1 || x2 - x1 < MIN_CROP_WIDTH || y2 - y1 < MIN_CROP_HEIGHT {
        return None;
    }

    Some([x1, y1, x2, y2])
}

/// Request a crop of the violating vehicle and package it as base64 JPEG.
/// Any failure degrades to None.
pub fn capture_violation_snapshot(
    source: &dyn SnapshotSource,
    bbox: &[f32; 4],
    processing: (u32, u32),
) -> Option<String> {
    let scaled = match scale_bbox_to_source(bbox, processing, source.resolution()) {
        Some(scaled) => scaled,
        None => {
            warn!(
                "Violation crop too small or out of frame, skipping image (bbox=[{:.0},{:.0},{:.0},{:.0}])",
                bbox[0], bbox[1], bbox[2], bbox[3]
            );
            return None;
        }
    };

    match source.capture(scaled) {
        Ok(jpeg) => Some(base64::engine::general_purpose::STANDARD.encode(jpeg)),
        Err(e) => {
            warn!("Violation snapshot capture failed: {e:#}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FakeSource {
        resolution: (u32, u32),
        fail: bool,
    }

    impl SnapshotSource for FakeSource {
        fn resolution(&self) -> (u32, u32) {
            self.resolution
        }

        fn capture(&self, bbox: [i32; 4]) -> Result<Vec<u8>> {
            if self.fail {
                return Err(anyhow!("encode failed"));
            }
            Ok(vec![bbox[0] as u8, bbox[1] as u8])
        }
    }

    #[test]
    fn test_scale_up_from_processing_resolution() {
        // 640x360 processing, 1280x720 source: exact 2x
        let scaled =
            scale_bbox_to_source(&[100.0, 50.0, 200.0, 150.0], (640, 360), (1280, 720)).unwrap();
        assert_eq!(scaled, [200, 100, 400, 300]);
    }

    #[test]
    fn test_bbox_already_in_source_coords_is_only_clamped() {
        let scaled =
            scale_bbox_to_source(&[900.0, 500.0, 1400.0, 800.0], (640, 360), (1280, 720)).unwrap();
        assert_eq!(scaled, [900, 500, 1280, 720]);
    }

    #[test]
    fn test_tiny_crop_rejected() {
        assert!(scale_bbox_to_source(&[10.0, 10.0, 15.0, 40.0], (640, 360), (640, 360)).is_none());
        assert!(scale_bbox_to_source(&[10.0, 10.0, 40.0, 15.0], (640, 360), (640, 360)).is_none());
    }

    #[test]
    fn test_fully_out_of_frame_rejected() {
        assert!(
            scale_bbox_to_source(&[-200.0, -200.0, -50.0, -50.0], (640, 360), (640, 360)).is_none()
        );
    }

    #[test]
    fn test_capture_returns_base64() {
        let source = FakeSource {
            resolution: (1280, 720),
            fail: false,
        };
        let image = capture_violation_snapshot(&source, &[100.0, 50.0, 200.0, 150.0], (640, 360));
        assert!(image.is_some());
        // round-trips through base64
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(image.unwrap())
            .unwrap();
        assert_eq!(decoded.len(), 2);
    }

    #[test]
    fn test_capture_failure_degrades_to_none() {
        let source = FakeSource {
            resolution: (1280, 720),
            fail: true,
        };
        assert!(
            capture_violation_snapshot(&source, &[100.0, 50.0, 200.0, 150.0], (640, 360)).is_none()
        );
    }
}
