//! Geometry helpers shared by hit testing, erasing and selection transform.

use kurbo::{Affine, Point, Rect};

/// Closed-interval rectangle intersection. Touching edges count as
/// intersecting so that items sitting exactly on a tile seam are picked up by
/// both sides of the seam.
pub fn rects_intersect(a: Rect, b: Rect) -> bool {
    a.x0 <= b.x1 && b.x0 <= a.x1 && a.y0 <= b.y1 && b.y0 <= a.y1
}

/// Axis-aligned bounds of `rect` rotated by `rotation` radians about its
/// center.
pub fn rotated_rect_bounds(rect: Rect, rotation: f64) -> Rect {
    if rotation == 0.0 {
        return rect;
    }
    let transform = Affine::rotate_about(rotation, rect.center());
    bounds_of_points(rect_corners(rect).map(|corner| transform * corner))
        .expect("four corners always produce bounds")
}

pub fn rect_corners(rect: Rect) -> [Point; 4] {
    [
        Point::new(rect.x0, rect.y0),
        Point::new(rect.x1, rect.y0),
        Point::new(rect.x1, rect.y1),
        Point::new(rect.x0, rect.y1),
    ]
}

pub fn bounds_of_points(points: impl IntoIterator<Item = Point>) -> Option<Rect> {
    let mut bounds: Option<Rect> = None;
    for point in points {
        let point_rect = Rect::new(point.x, point.y, point.x, point.y);
        bounds = Some(match bounds {
            Some(current) => current.union(point_rect),
            None => point_rect,
        });
    }
    bounds
}

pub fn point_segment_distance(point: Point, start: Point, end: Point) -> f64 {
    let segment = end - start;
    let length_squared = segment.hypot2();
    if length_squared == 0.0 {
        return point.distance(start);
    }
    let t = ((point - start).dot(segment) / length_squared).clamp(0.0, 1.0);
    point.distance(start + segment * t)
}

pub fn point_polyline_distance(point: Point, polyline: &[Point]) -> f64 {
    match polyline {
        [] => f64::INFINITY,
        [only] => point.distance(*only),
        _ => polyline
            .windows(2)
            .map(|pair| point_segment_distance(point, pair[0], pair[1]))
            .fold(f64::INFINITY, f64::min),
    }
}

fn orientation(a: Point, b: Point, c: Point) -> f64 {
    (b - a).cross(c - a)
}

fn on_segment(a: Point, b: Point, c: Point) -> bool {
    c.x >= a.x.min(b.x) && c.x <= a.x.max(b.x) && c.y >= a.y.min(b.y) && c.y <= a.y.max(b.y)
}

pub fn segments_intersect(a0: Point, a1: Point, b0: Point, b1: Point) -> bool {
    let o1 = orientation(a0, a1, b0);
    let o2 = orientation(a0, a1, b1);
    let o3 = orientation(b0, b1, a0);
    let o4 = orientation(b0, b1, a1);

    if (o1 > 0.0) != (o2 > 0.0) && (o3 > 0.0) != (o4 > 0.0) && o1 != 0.0 && o2 != 0.0 {
        return true;
    }
    // Collinear cases.
    (o1 == 0.0 && on_segment(a0, a1, b0))
        || (o2 == 0.0 && on_segment(a0, a1, b1))
        || (o3 == 0.0 && on_segment(b0, b1, a0))
        || (o4 == 0.0 && on_segment(b0, b1, a1))
}

pub fn segment_segment_distance(a0: Point, a1: Point, b0: Point, b1: Point) -> f64 {
    if segments_intersect(a0, a1, b0, b1) {
        return 0.0;
    }
    point_segment_distance(a0, b0, b1)
        .min(point_segment_distance(a1, b0, b1))
        .min(point_segment_distance(b0, a0, a1))
        .min(point_segment_distance(b1, a0, a1))
}

/// True when any segment of `path` passes within `tolerance` of any segment
/// of `polyline`.
pub fn path_crosses_polyline(path: &[Point], polyline: &[Point], tolerance: f64) -> bool {
    if path.is_empty() || polyline.is_empty() {
        return false;
    }
    let path_segments = segments_or_point(path);
    let polyline_segments = segments_or_point(polyline);
    for &(a0, a1) in &path_segments {
        for &(b0, b1) in &polyline_segments {
            if segment_segment_distance(a0, a1, b0, b1) <= tolerance {
                return true;
            }
        }
    }
    false
}

/// True when any segment of `path` passes within `tolerance` of `rect`.
pub fn path_crosses_rect(path: &[Point], rect: Rect, tolerance: f64) -> bool {
    let inflated = rect.inflate(tolerance, tolerance);
    for (start, end) in segments_or_point(path) {
        if inflated.contains(start) || inflated.contains(end) {
            return true;
        }
        let corners = rect_corners(inflated);
        for side in 0..4 {
            if segments_intersect(start, end, corners[side], corners[(side + 1) % 4]) {
                return true;
            }
        }
    }
    false
}

/// Even-odd ray cast. The polygon is treated as closed; points on the
/// boundary are not guaranteed either way, which is acceptable for the
/// strict-containment lasso rule.
pub fn polygon_contains_point(polygon: &[Point], point: Point) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut previous = polygon[polygon.len() - 1];
    for &current in polygon {
        let crosses_ray = (current.y > point.y) != (previous.y > point.y);
        if crosses_ray {
            let intersect_x = previous.x
                + (point.y - previous.y) / (current.y - previous.y) * (current.x - previous.x);
            if point.x < intersect_x {
                inside = !inside;
            }
        }
        previous = current;
    }
    inside
}

pub fn polygon_contains_all(polygon: &[Point], points: impl IntoIterator<Item = Point>) -> bool {
    points
        .into_iter()
        .all(|point| polygon_contains_point(polygon, point))
}

/// Rotation angle and uniform scale factor of a similarity transform.
/// Shear components are ignored; selection transforms are composed only from
/// translation, rotation and uniform scale.
pub fn similarity_parts(transform: Affine) -> (f64, f64) {
    let [a, b, _, _, _, _] = transform.as_coeffs();
    (b.atan2(a), (a * a + b * b).sqrt())
}

fn segments_or_point(points: &[Point]) -> Vec<(Point, Point)> {
    if points.len() == 1 {
        vec![(points[0], points[0])]
    } else {
        points.windows(2).map(|pair| (pair[0], pair[1])).collect()
    }
}
