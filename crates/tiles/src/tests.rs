use std::sync::Arc;
use std::time::{Duration, Instant};

use document::Document;
use kurbo::{Point, Rect};
use model::{Background, CanvasKind, Color, InputPoint, ItemPayload, StrokeData, StrokeStyle, ZBucket};
use tiny_skia::Pixmap;

use crate::manager::{RenderQuality, TileManager, TileManagerConfig, ViewParams};
use crate::worker::{GenerationJob, run_generation};
use crate::{
    CacheBudget, CacheEntry, MAX_LEVEL, MIN_LEVEL, TILE_SIZE, TileCache, TileKey, keys_covering,
    level_for_zoom, tile_world_size,
};

fn stroke_payload(points: &[(f64, f64)], width: f64) -> ItemPayload {
    ItemPayload::Stroke(StrokeData {
        color: Color::BLACK,
        width,
        style: StrokeStyle::Pen,
        points: points
            .iter()
            .map(|&(x, y)| InputPoint {
                x,
                y,
                pressure: 1.0,
                timestamp_ms: 0,
            })
            .collect(),
    })
}

fn test_document() -> Arc<Document> {
    Arc::new(Document::new(CanvasKind::Infinite, Background::Blank))
}

fn test_config(workers: usize) -> TileManagerConfig {
    TileManagerConfig {
        workers,
        budget: CacheBudget::default(),
        notify_interval: Duration::ZERO,
        precache_neighbours: false,
        error_tile_ttl: Duration::from_secs(1),
    }
}

fn solid_tile(color: tiny_skia::Color) -> Pixmap {
    let mut pixels = Pixmap::new(TILE_SIZE, TILE_SIZE).expect("tile pixmap");
    pixels.fill(color);
    pixels
}

fn default_view() -> ViewParams {
    ViewParams {
        zoom: 1.0,
        offset_x: 0.0,
        offset_y: 0.0,
    }
}

fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

mod key_math {
    use super::*;

    #[test]
    fn level_zero_is_selected_at_unit_zoom() {
        assert_eq!(level_for_zoom(1.0), 0);
    }

    #[test]
    fn quarter_zoom_selects_level_two() {
        assert_eq!(level_for_zoom(0.25), 2);
    }

    #[test]
    fn bias_switches_to_the_coarser_level_half_a_step_early() {
        assert_eq!(level_for_zoom(0.5), 1);
        assert_eq!(level_for_zoom(0.36), 1);
        assert_eq!(level_for_zoom(0.34), 2);
    }

    #[test]
    fn zoomed_in_views_select_negative_levels() {
        assert_eq!(level_for_zoom(4.0), -2);
    }

    #[test]
    fn level_clamps_to_the_supported_range() {
        assert_eq!(level_for_zoom(1e-12), MAX_LEVEL);
        assert_eq!(level_for_zoom(1e12), MIN_LEVEL);
    }

    #[test]
    fn viewport_straddling_the_origin_requests_both_sides() {
        let keys = keys_covering(0, Rect::new(-1.0, 0.0, 1.0, 1.0));
        let xs: Vec<i32> = keys.iter().map(|key| key.x).collect();
        assert_eq!(xs, vec![-1, 0]);
    }

    #[test]
    fn negative_coordinates_floor_toward_negative_infinity() {
        let key = TileKey::containing(0, Point::new(-1.0, -1.0));
        assert_eq!((key.x, key.y), (-1, -1));
    }

    #[test]
    fn parent_of_negative_two_is_negative_one() {
        let parent = TileKey::new(0, -2, 0).parent().expect("has parent");
        assert_eq!(parent, TileKey::new(1, -1, 0));
    }

    #[test]
    fn children_cover_the_parent_rect_exactly() {
        let key = TileKey::new(1, -1, 2);
        let children = key.children().expect("has children");
        let union = children
            .iter()
            .map(|child| child.world_rect())
            .reduce(|left, right| left.union(right))
            .expect("four rects");
        assert_eq!(union, key.world_rect());
    }

    #[test]
    fn world_size_doubles_per_level() {
        assert_eq!(tile_world_size(0), 512.0);
        assert_eq!(tile_world_size(1), 1024.0);
        assert_eq!(tile_world_size(-1), 256.0);
    }

    #[test]
    fn world_rect_of_negative_key_sits_left_of_the_origin() {
        assert_eq!(
            TileKey::new(0, -1, 0).world_rect(),
            Rect::new(-512.0, 0.0, 0.0, 512.0)
        );
    }
}

mod cache {
    use super::*;
    use std::collections::HashSet;

    fn small_budget(total: usize) -> CacheBudget {
        CacheBudget {
            total_bytes: total,
            tile_fraction: 1.0,
            image_fraction: 0.0,
            hard_ceiling_bytes: usize::MAX,
        }
    }

    fn entry() -> CacheEntry {
        CacheEntry::fresh(solid_tile(tiny_skia::Color::WHITE), 1)
    }

    #[test]
    fn put_and_replace_keep_byte_accounting_consistent() {
        let mut cache = TileCache::new(small_budget(16 * crate::TILE_BYTES));
        cache.put(TileKey::new(0, 0, 0), entry());
        cache.put(TileKey::new(0, 1, 0), entry());
        assert_eq!(cache.bytes(), 2 * crate::TILE_BYTES);

        cache.put(TileKey::new(0, 0, 0), entry());
        assert_eq!(cache.bytes(), 2 * crate::TILE_BYTES);

        cache.remove(TileKey::new(0, 1, 0));
        assert_eq!(cache.bytes(), crate::TILE_BYTES);
    }

    #[test]
    fn eviction_drops_least_recently_drawn_first() {
        let mut cache = TileCache::new(small_budget(4 * crate::TILE_BYTES));
        for x in 0..4 {
            cache.put(TileKey::new(0, x, 0), entry());
        }
        // Draw tile 0 so tile 1 becomes the oldest.
        cache.get(TileKey::new(0, 0, 0));

        cache.evict_until(3 * crate::TILE_BYTES, &HashSet::new());
        assert!(cache.peek(TileKey::new(0, 1, 0)).is_none());
        assert!(cache.peek(TileKey::new(0, 0, 0)).is_some());
    }

    #[test]
    fn pinned_keys_survive_one_eviction_pass() {
        let mut cache = TileCache::new(small_budget(4 * crate::TILE_BYTES));
        for x in 0..4 {
            cache.put(TileKey::new(0, x, 0), entry());
        }
        let pinned: HashSet<TileKey> = [TileKey::new(0, 0, 0), TileKey::new(0, 1, 0)]
            .into_iter()
            .collect();

        cache.evict_until(2 * crate::TILE_BYTES, &pinned);
        assert!(cache.peek(TileKey::new(0, 0, 0)).is_some());
        assert!(cache.peek(TileKey::new(0, 1, 0)).is_some());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn eviction_stops_when_everything_left_is_pinned() {
        let mut cache = TileCache::new(small_budget(2 * crate::TILE_BYTES));
        let pinned: HashSet<TileKey> = (0..3).map(|x| TileKey::new(0, x, 0)).collect();
        for x in 0..3 {
            cache.put(TileKey::new(0, x, 0), entry());
        }
        cache.evict_until(0, &pinned);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn error_entries_are_capped() {
        let mut cache = TileCache::new(small_budget(usize::MAX));
        for x in 0..crate::cache::MAX_ERROR_ENTRIES as i32 {
            assert!(cache.can_cache_error_tile());
            let mut pixels = Pixmap::new(1, 1).expect("pixmap");
            pixels.fill(tiny_skia::Color::from_rgba8(255, 0, 0, 255));
            cache.put(
                TileKey::new(0, x, 0),
                CacheEntry::error(pixels, 0, Duration::from_secs(1)),
            );
        }
        assert!(!cache.can_cache_error_tile());

        cache.remove(TileKey::new(0, 0, 0));
        assert!(cache.can_cache_error_tile());
    }

    #[test]
    fn generating_set_tracks_marks() {
        let mut cache = TileCache::new(small_budget(usize::MAX));
        let key = TileKey::new(2, -3, 5);
        assert!(cache.mark_generating(key));
        assert!(!cache.mark_generating(key));
        assert!(cache.is_generating(key));
        cache.unmark_generating(key);
        assert!(!cache.is_generating(key));
    }
}

mod generation {
    use super::*;

    #[test]
    fn visible_tiles_generate_and_show_document_strokes() {
        let document = test_document();
        document
            .add_item(ZBucket::Normal, stroke_payload(&[(10.0, 10.0), (100.0, 10.0)], 8.0))
            .expect("valid stroke");

        let (manager, mut ticker) = TileManager::new(document, test_config(2));
        let mut target = Pixmap::new(128, 128).expect("target");
        manager.render(&mut target, default_view(), RenderQuality::Best);

        assert!(ticker.wait_timeout(Duration::from_secs(5)), "no frame arrived");
        assert!(wait_until(|| manager.pending_generations() == 0, Duration::from_secs(5)));

        let mut target = Pixmap::new(128, 128).expect("target");
        manager.render(&mut target, default_view(), RenderQuality::Best);
        let on_stroke = target.pixel(50, 10).expect("in bounds");
        let off_stroke = target.pixel(50, 100).expect("in bounds");
        assert!(on_stroke.red() < 128, "stroke pixel should be dark");
        assert_eq!(off_stroke.red(), 255, "background should be white");
    }

    #[test]
    fn in_place_update_is_synchronous_and_never_calls_the_pool() {
        let document = test_document();
        let (manager, mut ticker) = TileManager::new(document.clone(), test_config(2));

        let mut target = Pixmap::new(128, 128).expect("target");
        manager.render(&mut target, default_view(), RenderQuality::Best);
        assert!(ticker.wait_timeout(Duration::from_secs(5)));
        assert!(wait_until(|| manager.pending_generations() == 0, Duration::from_secs(5)));

        let item = document
            .add_item(ZBucket::Normal, stroke_payload(&[(20.0, 60.0), (110.0, 60.0)], 8.0))
            .expect("valid stroke");
        manager.update_with_item(&item);
        assert_eq!(manager.pending_generations(), 0);

        let mut target = Pixmap::new(128, 128).expect("target");
        manager.render(&mut target, default_view(), RenderQuality::Best);
        assert!(target.pixel(60, 60).expect("in bounds").red() < 128);
    }

    #[test]
    fn pixel_erasure_clears_in_place_and_regeneration_restores() {
        let document = test_document();
        document
            .add_item(ZBucket::Normal, stroke_payload(&[(10.0, 40.0), (120.0, 40.0)], 10.0))
            .expect("valid stroke");
        let (manager, mut ticker) = TileManager::new(document, test_config(2));

        let mut target = Pixmap::new(128, 128).expect("target");
        manager.render(&mut target, default_view(), RenderQuality::Best);
        assert!(ticker.wait_timeout(Duration::from_secs(5)));
        assert!(wait_until(|| manager.pending_generations() == 0, Duration::from_secs(5)));

        let path = [Point::new(0.0, 40.0), Point::new(128.0, 40.0)];
        manager.update_with_erasure(&path, 20.0);

        let mut target = Pixmap::new(128, 128).expect("target");
        manager.render(&mut target, default_view(), RenderQuality::Best);
        assert_eq!(
            target.pixel(60, 40).expect("in bounds").alpha(),
            0,
            "erased pixels are transparent"
        );

        // The document was never touched, so a forced regeneration brings
        // the stroke back.
        manager.refresh(Rect::new(0.0, 0.0, 128.0, 128.0));
        assert!(wait_until(|| manager.pending_generations() == 0, Duration::from_secs(5)));
        let mut target = Pixmap::new(128, 128).expect("target");
        manager.render(&mut target, default_view(), RenderQuality::Best);
        assert!(target.pixel(60, 40).expect("in bounds").red() < 128);
    }

    #[test]
    fn parallel_generation_completes_every_requested_tile() {
        let document = test_document();
        let (manager, _ticker) = TileManager::new(document, test_config(4));

        let mut target = Pixmap::new(2048, 2048).expect("target");
        manager.render(&mut target, default_view(), RenderQuality::Best);

        assert!(
            wait_until(
                || manager.cached_tiles() >= 16 && manager.pending_generations() == 0,
                Duration::from_secs(10)
            ),
            "expected a 4x4 tile grid to finish generating"
        );
    }

    #[test]
    fn destroy_cancels_outstanding_work_and_returns() {
        let document = test_document();
        let (manager, _ticker) = TileManager::new(document, test_config(2));
        let mut target = Pixmap::new(1024, 1024).expect("target");
        manager.render(&mut target, default_view(), RenderQuality::Best);
        manager.destroy();
    }
}

mod fallback {
    use super::*;

    #[test]
    fn missing_tile_blits_the_matching_ancestor_sub_region() {
        let document = test_document();
        let (manager, _ticker) = TileManager::new(document, test_config(0));
        manager.install_for_tests(
            TileKey::new(1, -1, 0),
            solid_tile(tiny_skia::Color::from_rgba8(0, 0, 255, 255)),
            1,
        );

        // Viewport over tile (-2, 0) at level 0, whose parent is (-1, 0).
        let view = ViewParams {
            zoom: 1.0,
            offset_x: 1024.0,
            offset_y: 0.0,
        };
        let mut target = Pixmap::new(64, 64).expect("target");
        manager.render(&mut target, view, RenderQuality::Best);

        let pixel = target.pixel(10, 10).expect("in bounds");
        assert_eq!(pixel.blue(), 255, "ancestor content should show through");
    }

    #[test]
    fn quarter_zoom_requests_level_two_and_falls_back_to_a_level_three_tile() {
        let document = test_document();
        let (manager, _ticker) = TileManager::new(document, test_config(0));
        manager.install_for_tests(
            TileKey::new(3, 0, 0),
            solid_tile(tiny_skia::Color::from_rgba8(255, 0, 255, 255)),
            1,
        );

        let view = ViewParams {
            zoom: 0.25,
            offset_x: 0.0,
            offset_y: 0.0,
        };
        let mut target = Pixmap::new(64, 64).expect("target");
        manager.render(&mut target, view, RenderQuality::Best);

        // The level-2 tile is missing; its parent at level 3 fills in before
        // any generation could complete (there are no workers at all here).
        let pixel = target.pixel(10, 10).expect("in bounds");
        assert_eq!((pixel.red(), pixel.blue()), (255, 255));
        assert!(!manager.contains_tile(TileKey::new(2, 0, 0)));
    }

    #[test]
    fn missing_tile_composites_cached_children_when_no_ancestor_exists() {
        let document = test_document();
        let (manager, _ticker) = TileManager::new(document, test_config(0));
        manager.install_for_tests(
            TileKey::new(0, 0, 0),
            solid_tile(tiny_skia::Color::from_rgba8(0, 255, 0, 255)),
            1,
        );

        // Level 1 is selected at half zoom; tile (0, 0, level 1) is missing
        // but its child (0, 0, level 0) is cached.
        let view = ViewParams {
            zoom: 0.5,
            offset_x: 0.0,
            offset_y: 0.0,
        };
        let mut target = Pixmap::new(64, 64).expect("target");
        manager.render(&mut target, view, RenderQuality::Best);

        let pixel = target.pixel(10, 10).expect("in bounds");
        assert_eq!(pixel.green(), 255, "child content should show through");
    }

    #[test]
    fn invalidated_tiles_stay_renderable_until_replaced() {
        let document = test_document();
        let (manager, _ticker) = TileManager::new(document, test_config(0));
        let key = TileKey::new(0, 0, 0);
        manager.install_for_tests(key, solid_tile(tiny_skia::Color::from_rgba8(255, 0, 0, 255)), 1);

        manager.invalidate(Rect::new(0.0, 0.0, 100.0, 100.0));

        let mut target = Pixmap::new(64, 64).expect("target");
        manager.render(&mut target, default_view(), RenderQuality::Best);
        assert_eq!(
            target.pixel(10, 10).expect("in bounds").red(),
            255,
            "dirty tile still blits while regeneration is pending"
        );
    }
}

mod versioning {
    use super::*;

    #[test]
    fn stale_generation_does_not_overwrite_newer_tile_pixels() {
        let document = test_document();
        document
            .add_item(ZBucket::Normal, stroke_payload(&[(10.0, 10.0), (100.0, 10.0)], 8.0))
            .expect("valid stroke");

        let (manager, _ticker) = TileManager::new(document, test_config(0));
        let key = TileKey::new(0, 0, 0);
        let yellow = tiny_skia::Color::from_rgba8(255, 255, 0, 255);
        manager.install_for_tests(key, solid_tile(yellow), 999);

        // Simulates a generation whose starting model version (1) is older
        // than the cached entry's version: the install must be dropped.
        run_generation(
            manager.shared_for_tests(),
            GenerationJob { key, epoch: 0 },
        );
        assert_eq!(manager.entry_version(key), Some(999));
    }

    #[test]
    fn generation_replaces_entries_with_older_versions() {
        let document = test_document();
        document
            .add_item(ZBucket::Normal, stroke_payload(&[(10.0, 10.0), (100.0, 10.0)], 8.0))
            .expect("valid stroke");

        let (manager, _ticker) = TileManager::new(document.clone(), test_config(0));
        let key = TileKey::new(0, 0, 0);
        manager.install_for_tests(key, solid_tile(tiny_skia::Color::WHITE), 0);

        run_generation(
            manager.shared_for_tests(),
            GenerationJob { key, epoch: 0 },
        );
        assert_eq!(manager.entry_version(key), Some(document.model_version()));
    }

    #[test]
    fn clear_disowns_generations_started_under_the_old_epoch() {
        let document = test_document();
        let (manager, _ticker) = TileManager::new(document, test_config(0));
        let key = TileKey::new(0, 0, 0);

        let stale_job = GenerationJob { key, epoch: 0 };
        manager.clear(); // bumps the epoch
        run_generation(manager.shared_for_tests(), stale_job);
        assert!(!manager.contains_tile(key));
    }
}
