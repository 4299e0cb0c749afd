//! Tile scheduling, fallback composition and in-place updates.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, unbounded};
use document::Document;
use kurbo::{Affine, Point, Rect};
use model::Item;
use tiny_skia::{FilterQuality, IntRect, Pixmap, PixmapPaint};

use crate::cache::{CacheEntry, TileCache};
use crate::notify::{FrameNotifier, FrameTicker, frame_channel};
use crate::worker::{GenerationJob, worker_loop};
use crate::{CacheBudget, TILE_SIZE, TileKey, keys_covering, level_for_zoom, ring_around};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileManagerConfig {
    /// Generation worker threads. Zero is allowed (nothing generates), which
    /// keeps cache-only behaviour deterministic for tests.
    pub workers: usize,
    pub budget: CacheBudget,
    /// Minimum spacing between consumer frame-ready deliveries.
    pub notify_interval: Duration,
    pub precache_neighbours: bool,
    /// How long a failure placeholder stays cached before the region is
    /// retried.
    pub error_tile_ttl: Duration,
}

impl Default for TileManagerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(std::num::NonZeroUsize::get)
                .unwrap_or(4),
            budget: CacheBudget::default(),
            notify_interval: Duration::from_millis(33),
            precache_neighbours: true,
            error_tile_ttl: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderQuality {
    /// Nearest-neighbour blits while panning/zooming.
    Interactive,
    Best,
}

/// The consumer's view: `screen = world * zoom + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewParams {
    pub zoom: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

impl ViewParams {
    pub fn world_to_screen(&self) -> Affine {
        Affine::translate((self.offset_x, self.offset_y)) * Affine::scale(self.zoom)
    }

    pub fn visible_world_rect(&self, viewport_width: u32, viewport_height: u32) -> Rect {
        let origin = Point::new(-self.offset_x / self.zoom, -self.offset_y / self.zoom);
        Rect::new(
            origin.x,
            origin.y,
            origin.x + f64::from(viewport_width) / self.zoom,
            origin.y + f64::from(viewport_height) / self.zoom,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Priority {
    /// Eraser commits and other must-refresh work.
    Refresh,
    /// Visible tiles missing from the cache.
    Visible,
    /// Invalidated tiles and neighbour pre-caching.
    Idle,
}

pub(crate) struct ManagerShared {
    pub(crate) document: Arc<Document>,
    pub(crate) cache: Mutex<TileCache>,
    /// Bumped by `clear`; tasks started under an older epoch drop their
    /// result on completion.
    pub(crate) epoch: AtomicU64,
    pub(crate) cancelled: AtomicBool,
    pub(crate) interacting: AtomicBool,
    /// Keys blitted by the most recent render pass; pinned for one eviction
    /// pass.
    pub(crate) visible: Mutex<HashSet<TileKey>>,
    pub(crate) notifier: FrameNotifier,
    pub(crate) config: TileManagerConfig,
}

impl ManagerShared {
    pub(crate) fn lock_cache(&self) -> MutexGuard<'_, TileCache> {
        self.cache.lock().expect("tile cache lock poisoned")
    }
}

pub struct TileManager {
    shared: Arc<ManagerShared>,
    refresh_queue: Option<Sender<GenerationJob>>,
    visible_queue: Option<Sender<GenerationJob>>,
    idle_queue: Option<Sender<GenerationJob>>,
    workers: Vec<std::thread::JoinHandle<()>>,
}

impl TileManager {
    /// Builds the manager and its worker pool. The returned ticker is the
    /// consumer's end of the coalesced frame-ready token.
    pub fn new(document: Arc<Document>, config: TileManagerConfig) -> (Self, FrameTicker) {
        let (notifier, ticker) = frame_channel(config.notify_interval);
        let shared = Arc::new(ManagerShared {
            document,
            cache: Mutex::new(TileCache::new(config.budget)),
            epoch: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            interacting: AtomicBool::new(false),
            visible: Mutex::new(HashSet::new()),
            notifier,
            config,
        });

        let (refresh_sender, refresh_receiver) = unbounded();
        let (visible_sender, visible_receiver) = unbounded();
        let (idle_sender, idle_receiver) = unbounded();

        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let shared = shared.clone();
            let refresh_receiver = refresh_receiver.clone();
            let visible_receiver = visible_receiver.clone();
            let idle_receiver = idle_receiver.clone();
            let handle = std::thread::Builder::new()
                .name(format!("tile-worker-{index}"))
                .spawn(move || {
                    worker_loop(shared, refresh_receiver, visible_receiver, idle_receiver)
                })
                .expect("failed to spawn tile worker");
            workers.push(handle);
        }

        (
            Self {
                shared,
                refresh_queue: Some(refresh_sender),
                visible_queue: Some(visible_sender),
                idle_queue: Some(idle_sender),
                workers,
            },
            ticker,
        )
    }

    /// Draws every tile covering the viewport into `target`: cached tiles
    /// blit directly, missing tiles are composed from cached ancestors or
    /// children, and generation is scheduled for whatever was missing. The
    /// cache lock is taken per tile, so workers are never blocked for longer
    /// than a single-tile blit.
    pub fn render(&self, target: &mut Pixmap, view: ViewParams, quality: RenderQuality) {
        let visible_world = view.visible_world_rect(target.width(), target.height());
        let level = level_for_zoom(view.zoom);
        let keys = keys_covering(level, visible_world);
        {
            let mut visible = self.shared.visible.lock().expect("visible set lock poisoned");
            visible.clear();
            visible.extend(keys.iter().copied());
        }

        let filter = match quality {
            RenderQuality::Interactive => FilterQuality::Nearest,
            RenderQuality::Best => FilterQuality::Bilinear,
        };
        let now = Instant::now();
        let mut to_generate = Vec::new();
        for &key in &keys {
            let mut cache = self.shared.lock_cache();
            if cache.peek(key).is_some_and(|entry| entry.error_expired(now)) {
                cache.remove(key);
            }
            match cache.get(key) {
                Some(entry) => {
                    let dirty = entry.dirty;
                    blit_entry(target, entry, key, &view, filter);
                    if dirty {
                        // Re-arm in case the regeneration scheduled at
                        // invalidate time was dropped as stale.
                        to_generate.push((key, Priority::Idle));
                    }
                }
                None => {
                    draw_fallback(&mut cache, target, key, &view, filter);
                    to_generate.push((key, Priority::Visible));
                }
            }
        }

        for (key, priority) in to_generate {
            self.schedule(key, priority);
        }
        self.maybe_precache(&keys);
    }

    /// Paints `item` onto every cached tile it intersects, bumping their
    /// versions so an in-flight generation that predates the item cannot
    /// overwrite it. Never touches the worker pool.
    pub fn update_with_item(&self, item: &Item) {
        let version = self.shared.document.model_version();
        let mut cache = self.shared.lock_cache();
        for key in cache.keys_intersecting(item.bounds) {
            let Some(entry) = cache.peek_mut(key) else {
                continue;
            };
            if entry.is_error() {
                continue;
            }
            if let Err(error) = renderer::draw_item(
                &mut entry.pixels,
                key.world_to_tile_pixels(),
                item,
                &*self.shared.document,
                false,
            ) {
                tracing::warn!(?key, %error, "in-place tile update failed");
                continue;
            }
            entry.version = version;
        }
        drop(cache);
        self.shared.notifier.notify();
    }

    /// Writes transparent pixels along the eraser path into every cached
    /// tile it touches. Used by the standard eraser; the document is not
    /// consulted and regenerated tiles will restore the pixels.
    pub fn update_with_erasure(&self, path: &[Point], width: f64) {
        let Some(path_bounds) = model::geom::bounds_of_points(path.iter().copied()) else {
            return;
        };
        let affected = path_bounds.inflate(width / 2.0, width / 2.0);
        let version = self.shared.document.model_version();
        let mut cache = self.shared.lock_cache();
        for key in cache.keys_intersecting(affected) {
            let Some(entry) = cache.peek_mut(key) else {
                continue;
            };
            if entry.is_error() {
                continue;
            }
            if let Err(error) =
                renderer::clear_along_path(&mut entry.pixels, key.world_to_tile_pixels(), path, width)
            {
                tracing::warn!(?key, %error, "in-place tile erasure failed");
                continue;
            }
            entry.version = version;
        }
        drop(cache);
        self.shared.notifier.notify();
    }

    /// Marks cached tiles intersecting `rect` dirty and queues their
    /// regeneration at idle priority. Dirty tiles stay renderable until the
    /// replacement installs.
    pub fn invalidate(&self, rect: Rect) {
        self.mark_dirty_and_schedule(rect, Priority::Idle);
    }

    /// Like `invalidate`, but regeneration jumps the queue. Used after
    /// eraser commits.
    pub fn refresh(&self, rect: Rect) {
        self.mark_dirty_and_schedule(rect, Priority::Refresh);
    }

    /// Drops every cached tile and disowns in-flight generations via the
    /// epoch bump.
    pub fn clear(&self) {
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        self.shared.lock_cache().clear();
        self.shared.notifier.notify();
    }

    pub fn set_interacting(&self, interacting: bool) {
        self.shared.interacting.store(interacting, Ordering::SeqCst);
    }

    /// Consumer poke: requests a frame-ready token without any cache change.
    pub fn request_frame(&self) {
        self.shared.notifier.notify();
    }

    /// Cancels all in-flight work, joins the workers and drops the cache.
    /// Dropping the manager does the same; `destroy` just makes the point
    /// explicit at call sites.
    pub fn destroy(mut self) {
        self.shutdown();
    }

    pub fn cache_bytes(&self) -> usize {
        self.shared.lock_cache().bytes()
    }

    pub fn cached_tiles(&self) -> usize {
        self.shared.lock_cache().len()
    }

    pub fn pending_generations(&self) -> usize {
        self.shared.lock_cache().generating_count()
    }

    fn mark_dirty_and_schedule(&self, rect: Rect, priority: Priority) {
        let keys = {
            let mut cache = self.shared.lock_cache();
            let keys = cache.keys_intersecting(rect);
            for &key in &keys {
                if let Some(entry) = cache.peek_mut(key) {
                    entry.dirty = true;
                }
            }
            keys
        };
        for key in keys {
            self.schedule(key, priority);
        }
    }

    fn schedule(&self, key: TileKey, priority: Priority) {
        if self.shared.cancelled.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut cache = self.shared.lock_cache();
            if cache.is_generating(key) {
                return;
            }
            cache.mark_generating(key);
        }
        let queue = match priority {
            Priority::Refresh => &self.refresh_queue,
            Priority::Visible => &self.visible_queue,
            Priority::Idle => &self.idle_queue,
        };
        let job = GenerationJob {
            key,
            epoch: self.shared.epoch.load(Ordering::SeqCst),
        };
        let sent = queue
            .as_ref()
            .is_some_and(|sender| sender.send(job).is_ok());
        if !sent {
            self.shared.lock_cache().unmark_generating(key);
        }
    }

    fn maybe_precache(&self, visible_keys: &[TileKey]) {
        if !self.shared.config.precache_neighbours || visible_keys.is_empty() {
            return;
        }
        let (bytes, high_water) = {
            let cache = self.shared.lock_cache();
            (cache.bytes(), cache.budget().high_water_bytes())
        };
        if bytes >= high_water {
            return;
        }
        for key in ring_around(visible_keys) {
            let already_there = {
                let cache = self.shared.lock_cache();
                cache.peek(key).is_some() || cache.is_generating(key)
            };
            if !already_there {
                self.schedule(key, Priority::Idle);
            }
        }
    }

    fn shutdown(&mut self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        self.shared.epoch.fetch_add(1, Ordering::SeqCst);
        // Dropping the senders wakes any worker blocked on an empty queue.
        self.refresh_queue.take();
        self.visible_queue.take();
        self.idle_queue.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.shared.lock_cache().clear();
    }

    #[cfg(test)]
    pub(crate) fn shared_for_tests(&self) -> &ManagerShared {
        &self.shared
    }

    #[cfg(test)]
    pub(crate) fn install_for_tests(&self, key: TileKey, pixels: Pixmap, version: u64) {
        self.shared
            .lock_cache()
            .put(key, CacheEntry::fresh(pixels, version));
    }

    #[cfg(test)]
    pub(crate) fn entry_version(&self, key: TileKey) -> Option<u64> {
        self.shared.lock_cache().peek(key).map(|entry| entry.version)
    }

    #[cfg(test)]
    pub(crate) fn contains_tile(&self, key: TileKey) -> bool {
        self.shared.lock_cache().peek(key).is_some()
    }
}

impl Drop for TileManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn blit_entry(
    target: &mut Pixmap,
    entry: &CacheEntry,
    key: TileKey,
    view: &ViewParams,
    filter: FilterQuality,
) {
    blit_pixmap_over_world_rect(target, &entry.pixels, key.world_rect(), view, filter);
}

/// Stretches `source` over `world_rect` on the target. Handles the 1x1
/// error placeholder and ancestor sub-regions alike by deriving the scale
/// from the source dimensions.
fn blit_pixmap_over_world_rect(
    target: &mut Pixmap,
    source: &Pixmap,
    world_rect: Rect,
    view: &ViewParams,
    filter: FilterQuality,
) {
    if source.width() == 0 || source.height() == 0 {
        return;
    }
    let pixels_to_world = Affine::translate((world_rect.x0, world_rect.y0))
        * Affine::scale_non_uniform(
            world_rect.width() / f64::from(source.width()),
            world_rect.height() / f64::from(source.height()),
        );
    let transform = view.world_to_screen() * pixels_to_world;
    let paint = PixmapPaint {
        quality: filter,
        ..PixmapPaint::default()
    };
    target.draw_pixmap(
        0,
        0,
        source.as_ref(),
        &paint,
        renderer::affine_to_transform(transform),
        None,
    );
}

/// Fallback composition for a missing tile: the nearest cached ancestor's
/// sub-region wins; failing that, any cached children one level down are
/// composited. Returns whether anything was drawn.
fn draw_fallback(
    cache: &mut TileCache,
    target: &mut Pixmap,
    key: TileKey,
    view: &ViewParams,
    filter: FilterQuality,
) -> bool {
    let mut ancestor = key.parent();
    while let Some(candidate) = ancestor {
        let usable = cache
            .peek(candidate)
            .is_some_and(|entry| !entry.is_error() && entry.pixels.width() == TILE_SIZE);
        if usable {
            let levels_up = (candidate.level - key.level) as u32;
            let sub_size = TILE_SIZE >> levels_up;
            if sub_size == 0 {
                break;
            }
            let stride = 1i32 << levels_up;
            let sub_x = (key.x - candidate.x * stride) * sub_size as i32;
            let sub_y = (key.y - candidate.y * stride) * sub_size as i32;
            let sub_rect = IntRect::from_xywh(sub_x, sub_y, sub_size, sub_size)
                .expect("sub-region within the ancestor tile");
            let entry = cache.get(candidate).expect("peeked entry present");
            if let Some(sub_pixels) = entry.pixels.clone_rect(sub_rect) {
                blit_pixmap_over_world_rect(target, &sub_pixels, key.world_rect(), view, filter);
                return true;
            }
        }
        ancestor = candidate.parent();
    }

    let mut drew = false;
    if let Some(children) = key.children() {
        for child in children {
            let usable = cache
                .peek(child)
                .is_some_and(|entry| !entry.is_error());
            if usable {
                let entry = cache.get(child).expect("peeked entry present");
                blit_entry(target, entry, child, view, filter);
                drew = true;
            }
        }
    }
    drew
}
