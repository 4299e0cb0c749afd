//! Level-of-detail tile pyramid over the canvas document.
//!
//! Tiles are 512x512 premultiplied-RGBA pixel buffers keyed by
//! `(level, x, y)`. Level 0 is 1:1 with world units; every level up halves
//! the resolution, so a tile at level `l` covers `512 * 2^l` world units.

mod cache;
mod manager;
mod notify;
mod worker;

#[cfg(test)]
mod tests;

pub use cache::{CacheBudget, CacheEntry, TileCache};
pub use manager::{RenderQuality, TileManager, TileManagerConfig, ViewParams};
pub use notify::{FrameNotifier, FrameTicker, frame_channel};

use kurbo::{Affine, Point, Rect};
use static_assertions::{const_assert, const_assert_eq};

pub const TILE_SIZE: u32 = 512;
/// 32-bit pixels, one tile ~= 1 MiB.
pub const TILE_BYTES: usize = TILE_SIZE as usize * TILE_SIZE as usize * 4;

pub const MIN_LEVEL: i32 = -10;
pub const MAX_LEVEL: i32 = 10;

/// Switch to a coarser level slightly before the exact power-of-two zoom.
pub const LOD_BIAS: f64 = 0.5;

const_assert!(TILE_SIZE.is_power_of_two());
const_assert_eq!(TILE_BYTES, 1 << 20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub level: i32,
    pub x: i32,
    pub y: i32,
}

impl TileKey {
    pub fn new(level: i32, x: i32, y: i32) -> Self {
        Self { level, x, y }
    }

    pub fn world_rect(self) -> Rect {
        let size = tile_world_size(self.level);
        let origin_x = self.x as f64 * size;
        let origin_y = self.y as f64 * size;
        Rect::new(origin_x, origin_y, origin_x + size, origin_y + size)
    }

    pub fn parent(self) -> Option<Self> {
        if self.level >= MAX_LEVEL {
            return None;
        }
        Some(Self {
            level: self.level + 1,
            x: self.x.div_euclid(2),
            y: self.y.div_euclid(2),
        })
    }

    pub fn children(self) -> Option<[Self; 4]> {
        if self.level <= MIN_LEVEL {
            return None;
        }
        let level = self.level - 1;
        let x = self.x * 2;
        let y = self.y * 2;
        Some([
            Self { level, x, y },
            Self { level, x: x + 1, y },
            Self { level, x, y: y + 1 },
            Self { level, x: x + 1, y: y + 1 },
        ])
    }

    /// Maps world coordinates into this tile's pixel space.
    pub fn world_to_tile_pixels(self) -> Affine {
        let scale = pixels_per_world_unit(self.level);
        let rect = self.world_rect();
        Affine::scale(scale) * Affine::translate((-rect.x0, -rect.y0))
    }

    /// Maps this tile's pixel space back into world coordinates.
    pub fn tile_pixels_to_world(self) -> Affine {
        let rect = self.world_rect();
        Affine::translate((rect.x0, rect.y0)) * Affine::scale(2f64.powi(self.level))
    }

    pub fn containing(level: i32, point: Point) -> Self {
        let size = tile_world_size(level);
        Self {
            level,
            x: (point.x / size).floor() as i32,
            y: (point.y / size).floor() as i32,
        }
    }
}

pub fn tile_world_size(level: i32) -> f64 {
    TILE_SIZE as f64 * 2f64.powi(level)
}

/// Tile pixels per world unit: 1 at level 0, halving each level up.
pub fn pixels_per_world_unit(level: i32) -> f64 {
    2f64.powi(-level)
}

/// Level selected for a view scale. Round-half-up with the LOD bias, so the
/// coarser level wins half a step early; clamped to the supported range.
pub fn level_for_zoom(zoom: f64) -> i32 {
    if !zoom.is_finite() || zoom <= 0.0 {
        return MAX_LEVEL;
    }
    let exact = -zoom.log2() + LOD_BIAS;
    (exact.floor() as i32).clamp(MIN_LEVEL, MAX_LEVEL)
}

/// Tile keys covering `world_rect` at `level`, row-major. Negative
/// coordinates floor toward negative infinity.
pub fn keys_covering(level: i32, world_rect: Rect) -> Vec<TileKey> {
    if world_rect.width() <= 0.0 || world_rect.height() <= 0.0 {
        return Vec::new();
    }
    let size = tile_world_size(level);
    let x0 = (world_rect.x0 / size).floor() as i32;
    let x1 = (world_rect.x1 / size).floor() as i32;
    let y0 = (world_rect.y0 / size).floor() as i32;
    let y1 = (world_rect.y1 / size).floor() as i32;

    let mut keys = Vec::with_capacity(((x1 - x0 + 1) * (y1 - y0 + 1)) as usize);
    for y in y0..=y1 {
        for x in x0..=x1 {
            keys.push(TileKey::new(level, x, y));
        }
    }
    keys
}

/// The 8-connected ring of keys around a key range, for neighbour
/// pre-caching.
pub fn ring_around(keys: &[TileKey]) -> Vec<TileKey> {
    let Some(first) = keys.first() else {
        return Vec::new();
    };
    let level = first.level;
    let (mut x0, mut x1, mut y0, mut y1) = (first.x, first.x, first.y, first.y);
    for key in keys {
        x0 = x0.min(key.x);
        x1 = x1.max(key.x);
        y0 = y0.min(key.y);
        y1 = y1.max(key.y);
    }

    let mut ring = Vec::new();
    for x in (x0 - 1)..=(x1 + 1) {
        ring.push(TileKey::new(level, x, y0 - 1));
        ring.push(TileKey::new(level, x, y1 + 1));
    }
    for y in y0..=y1 {
        ring.push(TileKey::new(level, x0 - 1, y));
        ring.push(TileKey::new(level, x1 + 1, y));
    }
    ring
}
