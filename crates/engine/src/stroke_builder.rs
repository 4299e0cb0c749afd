//! Builds committed strokes from raw pen input.
//!
//! Raw pointer samples arrive at whatever rate the input layer delivers
//! them; the builder resamples them at a uniform world-space spacing with no
//! smoothing, interpolating position, pressure and timestamp along each
//! input segment. The result is the `StrokeData` the controller commits.

use model::{Color, InputPoint, StrokeData, StrokeStyle};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrokeBuilderConfig {
    /// Distance between emitted points, in world units.
    pub spacing: f64,
}

impl Default for StrokeBuilderConfig {
    fn default() -> Self {
        Self { spacing: 1.0 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StrokeInputError {
    #[error("stroke spacing must be finite and positive")]
    InvalidSpacing,
    #[error("input fed outside an active stroke")]
    NotStarted,
    #[error("input timestamps must be monotonic")]
    NonMonotonicTimestamp,
    #[error("input coordinates must be finite")]
    NonFiniteInput,
}

#[derive(Debug, Default)]
pub struct StrokeBuilder {
    active: Option<ActiveStroke>,
}

#[derive(Debug)]
struct ActiveStroke {
    color: Color,
    width: f64,
    style: StrokeStyle,
    spacing: f64,
    points: Vec<InputPoint>,
    last_input: Option<InputPoint>,
    distance_since_last_point: f64,
}

impl StrokeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Starts a stroke. A still-active stroke is discarded; the input layer
    /// decides when a stroke ends, not the builder.
    pub fn begin(
        &mut self,
        color: Color,
        width: f64,
        style: StrokeStyle,
        config: StrokeBuilderConfig,
    ) -> Result<(), StrokeInputError> {
        if !config.spacing.is_finite() || config.spacing <= 0.0 {
            return Err(StrokeInputError::InvalidSpacing);
        }
        self.active = Some(ActiveStroke {
            color,
            width,
            style,
            spacing: config.spacing,
            points: Vec::new(),
            last_input: None,
            distance_since_last_point: 0.0,
        });
        Ok(())
    }

    pub fn feed(
        &mut self,
        x: f64,
        y: f64,
        pressure: f32,
        timestamp_ms: u64,
    ) -> Result<(), StrokeInputError> {
        let stroke = self.active.as_mut().ok_or(StrokeInputError::NotStarted)?;
        if !x.is_finite() || !y.is_finite() {
            return Err(StrokeInputError::NonFiniteInput);
        }
        let current = InputPoint {
            x,
            y,
            pressure,
            timestamp_ms,
        };

        let Some(previous) = stroke.last_input else {
            stroke.points.push(current);
            stroke.last_input = Some(current);
            stroke.distance_since_last_point = 0.0;
            return Ok(());
        };
        if current.timestamp_ms < previous.timestamp_ms {
            return Err(StrokeInputError::NonMonotonicTimestamp);
        }

        let mut segment_start = previous;
        let mut segment_length = point_distance(segment_start, current);
        while stroke.distance_since_last_point + segment_length >= stroke.spacing {
            let distance_to_next = stroke.spacing - stroke.distance_since_last_point;
            let interpolation_t = if segment_length == 0.0 {
                0.0
            } else {
                distance_to_next / segment_length
            };

            let next_point = lerp_point(segment_start, current, interpolation_t);
            stroke.points.push(next_point);
            stroke.distance_since_last_point = 0.0;
            segment_start = next_point;
            segment_length = point_distance(segment_start, current);
        }

        stroke.distance_since_last_point += segment_length;
        stroke.last_input = Some(current);
        Ok(())
    }

    /// Ends the stroke and hands back its data, or `None` when nothing was
    /// fed. The final input position is always included so the stroke ends
    /// exactly under the pen.
    pub fn finish(&mut self) -> Option<StrokeData> {
        let mut stroke = self.active.take()?;
        if let Some(last) = stroke.last_input {
            if stroke.points.last() != Some(&last) {
                stroke.points.push(last);
            }
        }
        if stroke.points.is_empty() {
            return None;
        }
        Some(StrokeData {
            color: stroke.color,
            width: stroke.width,
            style: stroke.style,
            points: stroke.points,
        })
    }

    pub fn cancel(&mut self) {
        self.active = None;
    }
}

fn point_distance(from: InputPoint, to: InputPoint) -> f64 {
    let delta_x = to.x - from.x;
    let delta_y = to.y - from.y;
    (delta_x * delta_x + delta_y * delta_y).sqrt()
}

fn lerp_point(start: InputPoint, end: InputPoint, t: f64) -> InputPoint {
    let timestamp_delta = end.timestamp_ms.saturating_sub(start.timestamp_ms);
    InputPoint {
        x: start.x + (end.x - start.x) * t,
        y: start.y + (end.y - start.y) * t,
        pressure: start.pressure + (end.pressure - start.pressure) * t as f32,
        timestamp_ms: start.timestamp_ms + ((timestamp_delta as f64) * t).round() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pen_builder(spacing: f64) -> StrokeBuilder {
        let mut builder = StrokeBuilder::new();
        builder
            .begin(
                Color::BLACK,
                2.0,
                StrokeStyle::Pen,
                StrokeBuilderConfig { spacing },
            )
            .expect("begin stroke");
        builder
    }

    fn xs(stroke: &StrokeData) -> Vec<f64> {
        stroke.points.iter().map(|point| point.x).collect()
    }

    #[test]
    fn emits_first_point_and_uniform_resamples() {
        let mut builder = pen_builder(3.0);
        builder.feed(0.0, 0.0, 1.0, 0).expect("first input");
        builder.feed(10.0, 0.0, 1.0, 10).expect("second input");

        let stroke = builder.finish().expect("stroke produced");
        assert_eq!(xs(&stroke), vec![0.0, 3.0, 6.0, 9.0, 10.0]);
    }

    #[test]
    fn resampling_keeps_spacing_across_multiple_segments() {
        let mut builder = pen_builder(3.0);
        builder.feed(0.0, 0.0, 1.0, 0).expect("first input");
        builder.feed(5.0, 0.0, 1.0, 10).expect("second input");
        builder.feed(10.0, 0.0, 1.0, 20).expect("third input");

        let stroke = builder.finish().expect("stroke produced");
        assert_eq!(xs(&stroke), vec![0.0, 3.0, 6.0, 9.0, 10.0]);
    }

    #[test]
    fn pressure_interpolates_between_inputs() {
        let mut builder = pen_builder(5.0);
        builder.feed(0.0, 0.0, 0.0, 0).expect("first input");
        builder.feed(10.0, 0.0, 1.0, 10).expect("second input");

        let stroke = builder.finish().expect("stroke produced");
        let midway = stroke.points[1];
        assert_eq!(midway.x, 5.0);
        assert!((midway.pressure - 0.5).abs() < 1e-6);
    }

    #[test]
    fn begin_rejects_non_positive_spacing() {
        let mut builder = StrokeBuilder::new();
        let error = builder
            .begin(
                Color::BLACK,
                2.0,
                StrokeStyle::Pen,
                StrokeBuilderConfig { spacing: 0.0 },
            )
            .expect_err("invalid spacing should fail");
        assert_eq!(error, StrokeInputError::InvalidSpacing);
    }

    #[test]
    fn feed_outside_a_stroke_fails() {
        let mut builder = StrokeBuilder::new();
        let error = builder.feed(0.0, 0.0, 1.0, 0).expect_err("not started");
        assert_eq!(error, StrokeInputError::NotStarted);
    }

    #[test]
    fn rejects_non_monotonic_timestamp_input() {
        let mut builder = pen_builder(2.0);
        builder.feed(0.0, 0.0, 1.0, 10).expect("first input");
        let error = builder
            .feed(1.0, 0.0, 1.0, 9)
            .expect_err("non-monotonic timestamp should fail");
        assert_eq!(error, StrokeInputError::NonMonotonicTimestamp);
    }

    #[test]
    fn a_tap_produces_a_single_point_stroke() {
        let mut builder = pen_builder(3.0);
        builder.feed(4.0, 4.0, 0.8, 0).expect("tap input");
        let stroke = builder.finish().expect("stroke produced");
        assert_eq!(stroke.points.len(), 1);
    }

    #[test]
    fn cancel_discards_the_stroke() {
        let mut builder = pen_builder(3.0);
        builder.feed(0.0, 0.0, 1.0, 0).expect("input");
        builder.cancel();
        assert!(builder.finish().is_none());
        assert!(!builder.is_active());
    }
}
