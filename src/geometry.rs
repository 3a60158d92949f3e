// src/geometry.rs
//
// Pure pixel-plane helpers shared by the tracker: bbox arithmetic,
// IoU, and the zone membership test.

use crate::types::Zone;

/// Arithmetic midpoint of an [x1, y1, x2, y2] box.
pub fn bbox_center(bbox: &[f32; 4]) -> (f32, f32) {
    ((bbox[0] + bbox[2]) * 0.5, (bbox[1] + bbox[3]) * 0.5)
}

pub fn euclidean_distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

/// Intersection-over-union of two [x1, y1, x2, y2] boxes. 0.0 when disjoint.
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = a[2].min(b[2]);
    let y2 = a[3].min(b[3]);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    if inter <= 0.0 {
        return 0.0;
    }

    let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
    let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
    let union = area_a + area_b - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}

/// Ray-casting point-in-polygon test.
///
/// Convention: a point exactly on a polygon edge counts as inside. Parked
/// cars sit still for thousands of frames, so a center resting on a zone
/// border must not flip membership between ticks.
pub fn point_in_polygon(point: (f32, f32), polygon: &[[f32; 2]]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let (px, py) = point;
    let mut inside = false;
    let mut j = polygon.len() - 1;

    for i in 0..polygon.len() {
        let (xi, yi) = (polygon[i][0], polygon[i][1]);
        let (xj, yj) = (polygon[j][0], polygon[j][1]);

        if point_on_segment(point, (xi, yi), (xj, yj)) {
            return true;
        }

        if (yi > py) != (yj > py) {
            let x_cross = (xj - xi) * (py - yi) / (yj - yi) + xi;
            if px < x_cross {
                inside = !inside;
            }
        }
        j = i;
    }

    inside
}

/// True if the point lies inside at least one zone (union semantics).
pub fn point_in_any_zone(point: (f32, f32), zones: &[Zone]) -> bool {
    zones.iter().any(|zone| point_in_polygon(point, zone))
}

fn point_on_segment(p: (f32, f32), a: (f32, f32), b: (f32, f32)) -> bool {
    const EPS: f32 = 1e-4;
    let cross = (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0);
    if cross.abs() > EPS * euclidean_distance(a, b).max(1.0) {
        return false;
    }
    p.0 >= a.0.min(b.0) - EPS
        && p.0 <= a.0.max(b.0) + EPS
        && p.1 >= a.1.min(b.1) - EPS
        && p.1 <= a.1.max(b.1) + EPS
}
