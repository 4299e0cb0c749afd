//! Viewport state owned by the consumer.
//!
//! Maps between screen and world coordinates: `screen = world * zoom +
//! offset`. The controller consults the shared form for page-navigation
//! arithmetic; it never mutates the viewport itself.

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewTransform {
    zoom: f64,
    offset_x: f64,
    offset_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewTransformError {
    InvalidZoom,
    InvalidViewport,
    NonFiniteValue,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
        }
    }
}

impl ViewTransform {
    pub fn zoom(&self) -> f64 {
        self.zoom
    }

    pub fn offset_x(&self) -> f64 {
        self.offset_x
    }

    pub fn offset_y(&self) -> f64 {
        self.offset_y
    }

    pub fn set_zoom(&mut self, zoom: f64) -> Result<(), ViewTransformError> {
        if !zoom.is_finite() || zoom <= 0.0 {
            return Err(ViewTransformError::InvalidZoom);
        }
        self.zoom = zoom;
        Ok(())
    }

    /// Zooms by `zoom_factor` while keeping the screen point
    /// `(anchor_x, anchor_y)` fixed over the same world position.
    pub fn zoom_about_point(
        &mut self,
        zoom_factor: f64,
        anchor_x: f64,
        anchor_y: f64,
    ) -> Result<(), ViewTransformError> {
        if !zoom_factor.is_finite() || zoom_factor <= 0.0 {
            return Err(ViewTransformError::InvalidZoom);
        }
        if !anchor_x.is_finite() || !anchor_y.is_finite() {
            return Err(ViewTransformError::NonFiniteValue);
        }

        let next_zoom = checked_mul(self.zoom, zoom_factor)?;
        if next_zoom <= 0.0 {
            return Err(ViewTransformError::InvalidZoom);
        }

        let keep_anchor_scale = checked_add(1.0, -zoom_factor)?;
        self.offset_x = checked_add(
            checked_mul(self.offset_x, zoom_factor)?,
            checked_mul(anchor_x, keep_anchor_scale)?,
        )?;
        self.offset_y = checked_add(
            checked_mul(self.offset_y, zoom_factor)?,
            checked_mul(anchor_y, keep_anchor_scale)?,
        )?;
        self.zoom = next_zoom;
        Ok(())
    }

    pub fn pan_by(&mut self, delta_x: f64, delta_y: f64) -> Result<(), ViewTransformError> {
        self.offset_x = checked_add(self.offset_x, delta_x)?;
        self.offset_y = checked_add(self.offset_y, delta_y)?;
        Ok(())
    }

    /// Places the world point `(world_x, world_y)` at the screen origin.
    pub fn scroll_to(&mut self, world_x: f64, world_y: f64) -> Result<(), ViewTransformError> {
        if !world_x.is_finite() || !world_y.is_finite() {
            return Err(ViewTransformError::NonFiniteValue);
        }
        self.offset_x = -world_x * self.zoom;
        self.offset_y = -world_y * self.zoom;
        Ok(())
    }

    /// World position currently at the screen origin.
    pub fn viewport_offset(&self) -> (f64, f64) {
        (-self.offset_x / self.zoom, -self.offset_y / self.zoom)
    }

    pub fn world_to_screen(&self, world_x: f64, world_y: f64) -> (f64, f64) {
        (
            world_x * self.zoom + self.offset_x,
            world_y * self.zoom + self.offset_y,
        )
    }

    pub fn screen_to_world(
        &self,
        screen_x: f64,
        screen_y: f64,
    ) -> Result<(f64, f64), ViewTransformError> {
        if !screen_x.is_finite() || !screen_y.is_finite() {
            return Err(ViewTransformError::NonFiniteValue);
        }
        let world_x = (screen_x - self.offset_x) / self.zoom;
        let world_y = (screen_y - self.offset_y) / self.zoom;
        if !world_x.is_finite() || !world_y.is_finite() {
            return Err(ViewTransformError::NonFiniteValue);
        }
        Ok((world_x, world_y))
    }

    /// World rectangle covered by a viewport of the given pixel size, as
    /// `(x0, y0, x1, y1)`.
    pub fn visible_world_rect(
        &self,
        viewport_width: f64,
        viewport_height: f64,
    ) -> Result<(f64, f64, f64, f64), ViewTransformError> {
        if !viewport_width.is_finite()
            || !viewport_height.is_finite()
            || viewport_width <= 0.0
            || viewport_height <= 0.0
        {
            return Err(ViewTransformError::InvalidViewport);
        }
        let (x0, y0) = self.screen_to_world(0.0, 0.0)?;
        let (x1, y1) = self.screen_to_world(viewport_width, viewport_height)?;
        Ok((x0, y0, x1, y1))
    }
}

/// A view transform shareable with the controller thread. The consumer owns
/// the mutations; the controller only reads (and scrolls on page jumps).
#[derive(Debug, Clone, Default)]
pub struct SharedViewTransform {
    inner: Arc<Mutex<ViewTransform>>,
}

impl SharedViewTransform {
    pub fn new(transform: ViewTransform) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transform)),
        }
    }

    pub fn get(&self) -> ViewTransform {
        *self.inner.lock().expect("view transform lock poisoned")
    }

    pub fn update(
        &self,
        mutate: impl FnOnce(&mut ViewTransform) -> Result<(), ViewTransformError>,
    ) -> Result<(), ViewTransformError> {
        let mut transform = self.inner.lock().expect("view transform lock poisoned");
        mutate(&mut transform)
    }

    pub fn scroll_to(&self, world_x: f64, world_y: f64) -> Result<(), ViewTransformError> {
        self.update(|transform| transform.scroll_to(world_x, world_y))
    }

    pub fn viewport_offset(&self) -> (f64, f64) {
        self.get().viewport_offset()
    }
}

fn checked_add(current: f64, delta: f64) -> Result<f64, ViewTransformError> {
    if !delta.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    let next = current + delta;
    if !next.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    Ok(next)
}

fn checked_mul(left: f64, right: f64) -> Result<f64, ViewTransformError> {
    if !left.is_finite() || !right.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    let next = left * right;
    if !next.is_finite() {
        return Err(ViewTransformError::NonFiniteValue);
    }
    Ok(next)
}
