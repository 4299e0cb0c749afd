use kurbo::{Affine, Point, Rect};
use serde::{Deserialize, Serialize};

use crate::geom;
use crate::{BoundsError, Color, ImageHandle, validate_bounds};

/// Monotonically-increasing identity of an item. Doubles as the paint order
/// within a z bucket.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ItemOrder(pub u64);

/// Paint-order bucket. Buckets are painted lowest first, so highlighter ink
/// always sits under normal ink.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ZBucket {
    Highlighter,
    Normal,
    Top,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrokeStyle {
    Pen,
    Marker,
    Highlighter,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputPoint {
    pub x: f64,
    pub y: f64,
    pub pressure: f32,
    pub timestamp_ms: u64,
}

impl InputPoint {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrokeData {
    pub color: Color,
    pub width: f64,
    pub style: StrokeStyle,
    pub points: Vec<InputPoint>,
}

impl StrokeData {
    pub fn polyline(&self) -> Vec<Point> {
        self.points.iter().map(InputPoint::position).collect()
    }

    fn computed_bounds(&self) -> Option<Rect> {
        let half_width = self.width / 2.0;
        geom::bounds_of_points(self.points.iter().map(InputPoint::position))
            .map(|bounds| bounds.inflate(half_width, half_width))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageData {
    pub source: ImageHandle,
    pub rect: Rect,
    pub rotation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextData {
    pub text: String,
    pub font_size: f64,
    pub color: Color,
    pub rect: Rect,
    pub rotation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ItemPayload {
    Stroke(StrokeData),
    Image(ImageData),
    Text(TextData),
}

impl ItemPayload {
    /// World-space bounds enclosing everything the payload paints, inflated
    /// by the stroke half-width for strokes.
    pub fn computed_bounds(&self) -> Option<Rect> {
        match self {
            ItemPayload::Stroke(stroke) => stroke.computed_bounds(),
            ItemPayload::Image(image) => Some(geom::rotated_rect_bounds(image.rect, image.rotation)),
            ItemPayload::Text(text) => Some(geom::rotated_rect_bounds(text.rect, text.rotation)),
        }
    }

    /// Applies a similarity transform to the payload geometry. Stroke widths
    /// scale by the transform's uniform scale factor.
    pub fn transformed(&self, transform: Affine) -> Self {
        let (rotation_delta, scale) = geom::similarity_parts(transform);
        match self {
            ItemPayload::Stroke(stroke) => ItemPayload::Stroke(StrokeData {
                color: stroke.color,
                width: stroke.width * scale,
                style: stroke.style,
                points: stroke
                    .points
                    .iter()
                    .map(|point| {
                        let moved = transform * point.position();
                        InputPoint {
                            x: moved.x,
                            y: moved.y,
                            pressure: point.pressure,
                            timestamp_ms: point.timestamp_ms,
                        }
                    })
                    .collect(),
            }),
            ItemPayload::Image(image) => ItemPayload::Image(ImageData {
                source: image.source,
                rect: transformed_rect(image.rect, transform, scale),
                rotation: image.rotation + rotation_delta,
            }),
            ItemPayload::Text(text) => ItemPayload::Text(TextData {
                text: text.text.clone(),
                font_size: text.font_size * scale,
                color: text.color,
                rect: transformed_rect(text.rect, transform, scale),
                rotation: text.rotation + rotation_delta,
            }),
        }
    }

    pub fn translated(&self, dx: f64, dy: f64) -> Self {
        self.transformed(Affine::translate((dx, dy)))
    }
}

fn transformed_rect(rect: Rect, transform: Affine, scale: f64) -> Rect {
    let center = transform * rect.center();
    let half_width = rect.width() * scale / 2.0;
    let half_height = rect.height() * scale / 2.0;
    Rect::new(
        center.x - half_width,
        center.y - half_height,
        center.x + half_width,
        center.y + half_height,
    )
}

/// A drawable unit of canvas content. Items are immutable once constructed;
/// every mutation of the canvas produces new items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub order: ItemOrder,
    pub z_bucket: ZBucket,
    pub bounds: Rect,
    pub payload: ItemPayload,
}

impl Item {
    pub fn new(order: ItemOrder, z_bucket: ZBucket, payload: ItemPayload) -> Result<Self, BoundsError> {
        let bounds = payload.computed_bounds().ok_or(BoundsError::InvalidBounds)?;
        validate_bounds(bounds)?;
        Ok(Self {
            order,
            z_bucket,
            bounds,
            payload,
        })
    }

    /// Paint-order key: bucket first, then creation order.
    pub fn paint_key(&self) -> (ZBucket, ItemOrder) {
        (self.z_bucket, self.order)
    }

    /// Minimum distance from `point` to the item's painted geometry, for hit
    /// testing. Strokes measure against the polyline minus the half-width;
    /// images and text measure against their bounds.
    pub fn hit_distance(&self, point: Point) -> f64 {
        match &self.payload {
            ItemPayload::Stroke(stroke) => {
                let polyline = stroke.polyline();
                (geom::point_polyline_distance(point, &polyline) - stroke.width / 2.0).max(0.0)
            }
            ItemPayload::Image(_) | ItemPayload::Text(_) => {
                if self.bounds.contains(point) {
                    0.0
                } else {
                    let clamped = Point::new(
                        point.x.clamp(self.bounds.x0, self.bounds.x1),
                        point.y.clamp(self.bounds.y0, self.bounds.y1),
                    );
                    point.distance(clamped)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stroke_payload(points: &[(f64, f64)], width: f64) -> ItemPayload {
        ItemPayload::Stroke(StrokeData {
            color: Color::BLACK,
            width,
            style: StrokeStyle::Pen,
            points: points
                .iter()
                .enumerate()
                .map(|(index, &(x, y))| InputPoint {
                    x,
                    y,
                    pressure: 0.5,
                    timestamp_ms: index as u64,
                })
                .collect(),
        })
    }

    #[test]
    fn stroke_bounds_are_inflated_by_half_width() {
        let item = Item::new(
            ItemOrder(1),
            ZBucket::Normal,
            stroke_payload(&[(10.0, 10.0), (20.0, 10.0)], 4.0),
        )
        .expect("valid stroke");
        assert_eq!(item.bounds, Rect::new(8.0, 8.0, 22.0, 12.0));
    }

    #[test]
    fn empty_stroke_is_invalid() {
        let result = Item::new(ItemOrder(1), ZBucket::Normal, stroke_payload(&[], 4.0));
        assert_eq!(result.unwrap_err(), BoundsError::InvalidBounds);
    }

    #[test]
    fn translation_moves_points_and_bounds_without_touching_width() {
        let item = Item::new(
            ItemOrder(1),
            ZBucket::Normal,
            stroke_payload(&[(0.0, 0.0), (10.0, 0.0)], 2.0),
        )
        .expect("valid stroke");
        let moved = Item::new(
            ItemOrder(2),
            item.z_bucket,
            item.payload.translated(100.0, 0.0),
        )
        .expect("valid translated stroke");

        assert_eq!(moved.bounds, Rect::new(99.0, -1.0, 111.0, 1.0));
        match &moved.payload {
            ItemPayload::Stroke(stroke) => assert_eq!(stroke.width, 2.0),
            _ => panic!("expected stroke payload"),
        }
    }

    #[test]
    fn uniform_scale_scales_stroke_width() {
        let item = Item::new(
            ItemOrder(1),
            ZBucket::Normal,
            stroke_payload(&[(0.0, 0.0), (10.0, 0.0)], 2.0),
        )
        .expect("valid stroke");
        let scaled = item.payload.transformed(Affine::scale(3.0));
        match scaled {
            ItemPayload::Stroke(stroke) => assert!((stroke.width - 6.0).abs() < 1e-12),
            _ => panic!("expected stroke payload"),
        }
    }

    #[test]
    fn hit_distance_accounts_for_stroke_width() {
        let item = Item::new(
            ItemOrder(1),
            ZBucket::Normal,
            stroke_payload(&[(0.0, 0.0), (10.0, 0.0)], 4.0),
        )
        .expect("valid stroke");
        assert_eq!(item.hit_distance(Point::new(5.0, 1.0)), 0.0);
        assert!((item.hit_distance(Point::new(5.0, 5.0)) - 3.0).abs() < 1e-12);
    }
}
