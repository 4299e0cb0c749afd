//! Shared canvas data types.
//!
//! This crate defines the item model, the world-coordinate constants and the
//! canvas configuration consumed by every crate above it. It must not depend
//! on other workspace crates.

pub mod geom;
mod item;

pub use item::{
    ImageData, InputPoint, Item, ItemOrder, ItemPayload, StrokeData, StrokeStyle, TextData,
    ZBucket,
};

use std::sync::Arc;

use kurbo::Rect;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Half-extent of the symmetric world square. Items whose bounds leave this
/// square are rejected.
pub const WORLD_BOUND: f64 = 50_000.0;

/// Gap between consecutive pages in `CanvasKind::FixedPages`, in world units.
pub const PAGE_SPACING: f64 = 24.0;

pub fn world_rect() -> Rect {
    Rect::new(-WORLD_BOUND, -WORLD_BOUND, WORLD_BOUND, WORLD_BOUND)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BoundsError {
    #[error("item bounds exceed the world bound")]
    OutOfWorld,
    #[error("item bounds are non-finite or empty")]
    InvalidBounds,
}

/// Validates that `bounds` is finite, non-empty and inside the world square.
pub fn validate_bounds(bounds: Rect) -> Result<(), BoundsError> {
    let coords = [bounds.x0, bounds.y0, bounds.x1, bounds.y1];
    if coords.iter().any(|coord| !coord.is_finite()) {
        return Err(BoundsError::InvalidBounds);
    }
    if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
        return Err(BoundsError::InvalidBounds);
    }
    if bounds.x0 < -WORLD_BOUND
        || bounds.y0 < -WORLD_BOUND
        || bounds.x1 > WORLD_BOUND
        || bounds.y1 > WORLD_BOUND
    {
        return Err(BoundsError::OutOfWorld);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Color {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

impl Color {
    pub const BLACK: Self = Self::opaque(0, 0, 0);
    pub const WHITE: Self = Self::opaque(255, 255, 255);

    pub const fn opaque(red: u8, green: u8, blue: u8) -> Self {
        Self {
            red,
            green,
            blue,
            alpha: 255,
        }
    }

    pub const fn with_alpha(self, alpha: u8) -> Self {
        Self { alpha, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CanvasKind {
    Infinite,
    FixedPages { page_width: f64, page_height: f64 },
}

impl CanvasKind {
    pub fn page_height(&self) -> Option<f64> {
        match self {
            CanvasKind::Infinite => None,
            CanvasKind::FixedPages { page_height, .. } => Some(*page_height),
        }
    }
}

/// Parameters shared by all patterned background styles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PatternSpec {
    pub spacing: f64,
    /// Dot radius or line thickness, depending on the style.
    pub weight: f64,
    pub color: Color,
    /// Inset from the page edges inside which the pattern is drawn.
    pub padding: f64,
    /// Center the pattern horizontally on the page instead of anchoring it at
    /// the padded left edge.
    pub centered: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Background {
    Blank,
    Dots(PatternSpec),
    Lines(PatternSpec),
    Grid(PatternSpec),
}

slotmap::new_key_type! {
    pub struct ImageHandle;
}

/// Decoded image pixels, RGBA8, row-major.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageBitmap {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl ImageBitmap {
    pub fn byte_size(&self) -> usize {
        self.rgba.len()
    }
}

/// Resolves image handles to decoded pixels. Implemented by the document's
/// image registry; consumed by the renderer so it stays free of document
/// dependencies.
pub trait ImageSource {
    fn image_bitmap(&self, handle: ImageHandle) -> Option<Arc<ImageBitmap>>;
}

/// An image source with no images, for callers that only draw strokes.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoImages;

impl ImageSource for NoImages {
    fn image_bitmap(&self, _handle: ImageHandle) -> Option<Arc<ImageBitmap>> {
        None
    }
}
