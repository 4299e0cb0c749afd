//! Generation worker pool.
//!
//! Workers drain three queues in priority order and paint tiles from a
//! document snapshot query. Panics and render errors are caught at this
//! boundary: the region gets a short-lived placeholder tile instead of
//! thrashing the pool.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crossbeam_channel::{Receiver, TryRecvError};
use renderer::RenderError;
use tiny_skia::Pixmap;

use crate::cache::CacheEntry;
use crate::manager::ManagerShared;
use crate::{TILE_SIZE, TileKey};

pub(crate) struct GenerationJob {
    pub(crate) key: TileKey,
    /// Epoch at enqueue time; a `clear` in between disowns the job.
    pub(crate) epoch: u64,
}

pub(crate) fn worker_loop(
    shared: Arc<ManagerShared>,
    refresh: Receiver<GenerationJob>,
    visible: Receiver<GenerationJob>,
    idle: Receiver<GenerationJob>,
) {
    loop {
        if shared.cancelled.load(Ordering::SeqCst) {
            return;
        }

        let mut disconnected = 0;
        let mut ran = false;
        for receiver in [&refresh, &visible, &idle] {
            match receiver.try_recv() {
                Ok(job) => {
                    run_generation(&shared, job);
                    ran = true;
                    break;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => disconnected += 1,
            }
        }
        if ran {
            continue;
        }
        if disconnected == 3 {
            return;
        }

        // All queues empty: block until any of them has work. The next loop
        // iteration re-applies the priority order.
        crossbeam_channel::select! {
            recv(refresh) -> message => {
                if let Ok(job) = message {
                    run_generation(&shared, job);
                }
            }
            recv(visible) -> message => {
                if let Ok(job) = message {
                    run_generation(&shared, job);
                }
            }
            recv(idle) -> message => {
                if let Ok(job) = message {
                    run_generation(&shared, job);
                }
            }
        }
    }
}

pub(crate) fn run_generation(shared: &ManagerShared, job: GenerationJob) {
    if shared.cancelled.load(Ordering::SeqCst)
        || job.epoch != shared.epoch.load(Ordering::SeqCst)
    {
        shared.lock_cache().unmark_generating(job.key);
        return;
    }

    let started_version = shared.document.model_version();
    let outcome = catch_unwind(AssertUnwindSafe(|| paint_tile(shared, job.key)));

    let mut cache = shared.lock_cache();
    cache.unmark_generating(job.key);
    if shared.cancelled.load(Ordering::SeqCst)
        || job.epoch != shared.epoch.load(Ordering::SeqCst)
    {
        return;
    }

    match outcome {
        Ok(Ok(Some(pixels))) => {
            if let Some(existing) = cache.peek(job.key) {
                if existing.version > started_version {
                    tracing::warn!(key = ?job.key, "dropping stale tile generation");
                    return;
                }
            }
            cache.put(job.key, CacheEntry::fresh(pixels, started_version));
            if !shared.interacting.load(Ordering::SeqCst) {
                let pinned = shared
                    .visible
                    .lock()
                    .expect("visible set lock poisoned")
                    .clone();
                let budget = cache.budget().tile_budget_bytes();
                cache.evict_until(budget, &pinned);
            }
            drop(cache);
            shared.notifier.notify();
        }
        Ok(Ok(None)) => {
            // Cancelled mid-paint; destroy is waiting on us.
        }
        Ok(Err(error)) => {
            tracing::error!(key = ?job.key, %error, "tile generation failed");
            install_error_tile(&mut cache, shared, job.key, started_version);
            drop(cache);
            shared.notifier.notify();
        }
        Err(_panic) => {
            tracing::error!(key = ?job.key, "tile generation panicked");
            install_error_tile(&mut cache, shared, job.key, started_version);
            drop(cache);
            shared.notifier.notify();
        }
    }
}

fn paint_tile(shared: &ManagerShared, key: TileKey) -> Result<Option<Pixmap>, RenderError> {
    let world_rect = key.world_rect();
    let items = shared.document.query_items(world_rect);

    let Some(mut pixels) = Pixmap::new(TILE_SIZE, TILE_SIZE) else {
        return Err(RenderError::InvalidGeometry);
    };
    let world_to_pixels = key.world_to_tile_pixels();
    renderer::draw_background(
        &mut pixels,
        world_to_pixels,
        &shared.document.background(),
        &shared.document.canvas_kind(),
        world_rect,
    );
    for item in &items {
        // Destroy must return within one item's render time.
        if shared.cancelled.load(Ordering::Relaxed) {
            return Ok(None);
        }
        renderer::draw_item(&mut pixels, world_to_pixels, item, &*shared.document, false)?;
    }
    Ok(Some(pixels))
}

fn install_error_tile(
    cache: &mut crate::cache::TileCache,
    shared: &ManagerShared,
    key: TileKey,
    version: u64,
) {
    if !cache.can_cache_error_tile() {
        return;
    }
    cache.put(
        key,
        CacheEntry::error(error_pixels(), version, shared.config.error_tile_ttl),
    );
}

/// One red-tinted pixel, stretched over the tile rect at draw time.
fn error_pixels() -> Pixmap {
    let mut pixels = Pixmap::new(1, 1).expect("1x1 pixmap");
    pixels.fill(tiny_skia::Color::from_rgba8(255, 64, 64, 160));
    pixels
}
