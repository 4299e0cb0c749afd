//! Byte-budgeted LRU store of tile pixel buffers.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use lru::LruCache;
use tiny_skia::Pixmap;

use crate::TileKey;

/// Budget split across the pixel caches. The totals are explicit because a
/// library cannot observe "the heap"; the consumer passes what it is willing
/// to spend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheBudget {
    pub total_bytes: usize,
    /// Share of `total_bytes` available to tile pixels.
    pub tile_fraction: f64,
    /// Share reserved for the document's decoded-image registry.
    pub image_fraction: f64,
    pub hard_ceiling_bytes: usize,
}

impl Default for CacheBudget {
    fn default() -> Self {
        Self {
            total_bytes: 512 * 1024 * 1024,
            tile_fraction: 0.65,
            image_fraction: 0.25,
            hard_ceiling_bytes: 1024 * 1024 * 1024,
        }
    }
}

impl CacheBudget {
    pub fn tile_budget_bytes(&self) -> usize {
        ((self.total_bytes as f64 * self.tile_fraction) as usize).min(self.hard_ceiling_bytes)
    }

    pub fn image_budget_bytes(&self) -> usize {
        ((self.total_bytes as f64 * self.image_fraction) as usize).min(self.hard_ceiling_bytes)
    }

    /// Above this watermark neighbour pre-caching stops.
    pub fn high_water_bytes(&self) -> usize {
        (self.tile_budget_bytes() as f64 * 0.9) as usize
    }
}

#[derive(Debug)]
pub struct CacheEntry {
    pub pixels: Pixmap,
    /// Stale-install guard: a finished generation whose starting model
    /// version is below this value is dropped instead of installed.
    pub version: u64,
    /// Set by invalidate/refresh; the entry stays renderable until the
    /// replacement installs (double buffering).
    pub dirty: bool,
    /// Present on placeholder tiles cached after a generation failure.
    pub error_until: Option<Instant>,
    pub byte_size: usize,
}

impl CacheEntry {
    pub fn fresh(pixels: Pixmap, version: u64) -> Self {
        let byte_size = pixels.data().len();
        Self {
            pixels,
            version,
            dirty: false,
            error_until: None,
            byte_size,
        }
    }

    pub fn error(pixels: Pixmap, version: u64, ttl: Duration) -> Self {
        let byte_size = pixels.data().len();
        Self {
            pixels,
            version,
            dirty: false,
            error_until: Some(Instant::now() + ttl),
            byte_size,
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_until.is_some()
    }

    pub fn error_expired(&self, now: Instant) -> bool {
        matches!(self.error_until, Some(until) if now >= until)
    }
}

/// Caps how many failure placeholders may live in the cache at once, so a
/// persistently-failing region cannot displace real tiles.
pub const MAX_ERROR_ENTRIES: usize = 100;

pub struct TileCache {
    entries: LruCache<TileKey, CacheEntry>,
    generating: HashSet<TileKey>,
    bytes: usize,
    error_entries: usize,
    budget: CacheBudget,
}

impl TileCache {
    pub fn new(budget: CacheBudget) -> Self {
        Self {
            entries: LruCache::unbounded(),
            generating: HashSet::new(),
            bytes: 0,
            error_entries: 0,
            budget,
        }
    }

    pub fn budget(&self) -> CacheBudget {
        self.budget
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Recency-updating lookup: drawing a tile marks it most recently used.
    pub fn get(&mut self, key: TileKey) -> Option<&CacheEntry> {
        self.entries.get(&key).map(|entry| &*entry)
    }

    /// Recency-neutral lookup, for version checks and fallback probing.
    pub fn peek(&self, key: TileKey) -> Option<&CacheEntry> {
        self.entries.peek(&key)
    }

    /// Recency-neutral mutable lookup, for in-place pixel updates.
    pub fn peek_mut(&mut self, key: TileKey) -> Option<&mut CacheEntry> {
        self.entries.peek_mut(&key)
    }

    pub fn put(&mut self, key: TileKey, entry: CacheEntry) {
        if entry.is_error() {
            self.error_entries += 1;
        }
        self.bytes += entry.byte_size;
        if let Some(previous) = self.entries.put(key, entry) {
            self.bytes -= previous.byte_size;
            if previous.is_error() {
                self.error_entries -= 1;
            }
        }
    }

    pub fn remove(&mut self, key: TileKey) -> Option<CacheEntry> {
        let entry = self.entries.pop(&key)?;
        self.bytes -= entry.byte_size;
        if entry.is_error() {
            self.error_entries -= 1;
        }
        Some(entry)
    }

    pub fn can_cache_error_tile(&self) -> bool {
        self.error_entries < MAX_ERROR_ENTRIES
    }

    /// Evicts least-recently-drawn entries until the byte budget is met.
    /// `pinned` keys (the visible viewport) survive this pass; they are
    /// re-filed as most recent.
    pub fn evict_until(&mut self, budget_bytes: usize, pinned: &HashSet<TileKey>) -> usize {
        let mut evicted = 0;
        let mut kept: Vec<(TileKey, CacheEntry)> = Vec::new();
        while self.bytes > budget_bytes {
            let Some((key, entry)) = self.entries.pop_lru() else {
                break;
            };
            if pinned.contains(&key) {
                // Held aside until the pass ends, so the pop loop terminates
                // even when everything left is pinned.
                kept.push((key, entry));
                continue;
            }
            self.bytes -= entry.byte_size;
            if entry.is_error() {
                self.error_entries -= 1;
            }
            evicted += 1;
        }
        for (key, entry) in kept {
            self.entries.put(key, entry);
        }
        if evicted > 0 {
            tracing::debug!(evicted, bytes = self.bytes, "tile cache eviction pass");
        }
        evicted
    }

    pub fn mark_generating(&mut self, key: TileKey) -> bool {
        self.generating.insert(key)
    }

    pub fn unmark_generating(&mut self, key: TileKey) {
        self.generating.remove(&key);
    }

    pub fn is_generating(&self, key: TileKey) -> bool {
        self.generating.contains(&key)
    }

    pub fn generating_count(&self) -> usize {
        self.generating.len()
    }

    /// Keys of cached tiles whose world rect intersects `world_rect`.
    pub fn keys_intersecting(&self, world_rect: kurbo::Rect) -> Vec<TileKey> {
        self.entries
            .iter()
            .map(|(key, _)| *key)
            .filter(|key| model::geom::rects_intersect(key.world_rect(), world_rect))
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.generating.clear();
        self.bytes = 0;
        self.error_entries = 0;
    }
}
