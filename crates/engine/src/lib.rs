//! Controller facade over the document, tile manager and selection.
//!
//! This is the narrow API the input layer and toolbars drive. Methods that
//! mutate the document do so synchronously on the caller's thread under the
//! document's write lock; visible changes schedule the matching tile update
//! before returning, so a frame rendered right after a commit always shows
//! the change (through in-place pixels or refresh scheduling).

pub mod clipboard;
mod selection;
mod stroke_builder;

pub use selection::{Imposter, SelectionManager};
pub use stroke_builder::{StrokeBuilder, StrokeBuilderConfig, StrokeInputError};

use std::sync::Arc;

use document::{Document, EraserKind, Snapshot, SnapshotError};
use kurbo::{Affine, Point, Rect};
use model::{BoundsError, Item, ItemOrder, ItemPayload, PAGE_SPACING, StrokeData, ZBucket};
use tiles::{FrameTicker, RenderQuality, TileManager, TileManagerConfig, ViewParams};
use tiny_skia::{Pixmap, PixmapPaint};

/// The viewport collaborator. The controller consults it for page-navigation
/// arithmetic and scrolls it on page jumps; it never mutates the view
/// otherwise.
pub trait Viewport: Send + Sync {
    fn scroll_to(&self, world_x: f64, world_y: f64);
    fn viewport_offset(&self) -> (f64, f64);
}

impl Viewport for view::SharedViewTransform {
    fn scroll_to(&self, world_x: f64, world_y: f64) {
        if let Err(error) = view::SharedViewTransform::scroll_to(self, world_x, world_y) {
            tracing::warn!(?error, "viewport rejected scroll target");
        }
    }

    fn viewport_offset(&self) -> (f64, f64) {
        view::SharedViewTransform::viewport_offset(self)
    }
}

type ContentChangedCallback = Box<dyn Fn() + Send + Sync>;
type MinimapDirtyCallback = Box<dyn Fn(Rect) + Send + Sync>;

pub struct CanvasController {
    document: Arc<Document>,
    tiles: TileManager,
    selection: SelectionManager,
    viewport: Arc<dyn Viewport>,
    on_content_changed: Option<ContentChangedCallback>,
    on_minimap_dirty: Option<MinimapDirtyCallback>,
}

impl CanvasController {
    /// Builds the controller and its tile pipeline. The returned ticker is
    /// the consumer's frame-ready signal.
    pub fn new(
        document: Arc<Document>,
        viewport: Arc<dyn Viewport>,
        config: TileManagerConfig,
    ) -> (Self, FrameTicker) {
        let (tiles, ticker) = TileManager::new(document.clone(), config);
        (
            Self {
                selection: SelectionManager::new(document.clone()),
                document,
                tiles,
                viewport,
                on_content_changed: None,
                on_minimap_dirty: None,
            },
            ticker,
        )
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.document
    }

    pub fn tiles(&self) -> &TileManager {
        &self.tiles
    }

    /// Single persistence sink: invoked on the caller thread after every
    /// visible mutation.
    pub fn set_on_content_changed(&mut self, callback: ContentChangedCallback) {
        self.on_content_changed = Some(callback);
    }

    pub fn set_on_minimap_dirty(&mut self, callback: MinimapDirtyCallback) {
        self.on_minimap_dirty = Some(callback);
    }

    /// Commits a finished pen stroke. The cached tiles it crosses are
    /// updated in place on this thread; the worker pool is not involved, so
    /// the very next render observes the stroke.
    pub fn commit_stroke(
        &mut self,
        z_bucket: ZBucket,
        stroke: StrokeData,
    ) -> Result<Arc<Item>, BoundsError> {
        self.commit_item(z_bucket, ItemPayload::Stroke(stroke))
    }

    /// Same contract as `commit_stroke` for image and text items.
    pub fn commit_item(
        &mut self,
        z_bucket: ZBucket,
        payload: ItemPayload,
    ) -> Result<Arc<Item>, BoundsError> {
        let item = self.document.add_item(z_bucket, payload)?;
        self.tiles.update_with_item(&item);
        self.content_changed(item.bounds);
        Ok(item)
    }

    /// Live eraser feedback. Only the standard (pixel) eraser previews by
    /// mutating tile pixels; the item erasers select on commit.
    pub fn preview_eraser(
        &mut self,
        path: &[Point],
        width: f64,
        kind: EraserKind,
    ) -> Option<Rect> {
        match kind {
            EraserKind::Standard => {
                self.tiles.update_with_erasure(path, width);
                self.document.erase(path, width, EraserKind::Standard)
            }
            EraserKind::Stroke | EraserKind::Lasso => None,
        }
    }

    pub fn commit_eraser(
        &mut self,
        path: &[Point],
        width: f64,
        kind: EraserKind,
    ) -> Option<Rect> {
        let affected = self.document.erase(path, width, kind)?;
        match kind {
            EraserKind::Standard => {
                // Ephemeral by design: pixels are cleared in place and the
                // document stays untouched, so regeneration restores them.
                self.tiles.update_with_erasure(path, width);
            }
            EraserKind::Stroke | EraserKind::Lasso => {
                self.tiles.refresh(affected);
            }
        }
        self.content_changed(affected);
        Some(affected)
    }

    pub fn start_batch(&mut self) {
        self.document.start_batch();
    }

    pub fn end_batch(&mut self) {
        self.document.end_batch();
    }

    pub fn undo(&mut self) -> Option<Rect> {
        let affected = self.document.undo()?;
        self.tiles.refresh(affected);
        self.content_changed(affected);
        Some(affected)
    }

    pub fn redo(&mut self) -> Option<Rect> {
        let affected = self.document.redo()?;
        self.tiles.refresh(affected);
        self.content_changed(affected);
        Some(affected)
    }

    pub fn select(&mut self, orders: &[ItemOrder]) {
        self.selection.select(orders);
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn selection(&self) -> &SelectionManager {
        &self.selection
    }

    pub fn translate_selection(&mut self, delta_x: f64, delta_y: f64) {
        self.selection.translate(delta_x, delta_y);
        self.tiles.request_frame();
    }

    pub fn apply_selection_transform(&mut self, transform: Affine) {
        self.selection.apply_transform(transform);
        self.tiles.request_frame();
    }

    pub fn start_move(&mut self) {
        if let Some(lifted) = self.selection.start_move() {
            self.tiles.refresh(lifted);
        }
    }

    pub fn commit_move(&mut self) -> Option<Vec<Arc<Item>>> {
        let (affected, new_items) = self.selection.commit_move()?;
        self.tiles.refresh(affected);
        self.content_changed(affected);
        Some(new_items)
    }

    pub fn cancel_move(&mut self) {
        if let Some(restored) = self.selection.cancel_move() {
            self.tiles.refresh(restored);
        }
    }

    pub fn delete_selection(&mut self) {
        if let Some(removed) = self.selection.delete_selected() {
            self.tiles.refresh(removed);
            self.content_changed(removed);
        }
    }

    pub fn copy_selection(&mut self) {
        clipboard::copy_items(self.selection.selected());
    }

    pub fn paste(&mut self, x: f64, y: f64) -> Vec<Arc<Item>> {
        let pasted = clipboard::paste_at(&self.document, x, y);
        if let Some(affected) = pasted
            .iter()
            .map(|item| item.bounds)
            .reduce(|left, right| left.union(right))
        {
            self.tiles.refresh(affected);
            self.content_changed(affected);
        }
        pasted
    }

    /// Zero-based page under the viewport origin, in fixed-page mode.
    pub fn current_page(&self) -> Option<u64> {
        let stride = self.page_stride()?;
        let (_, offset_y) = self.viewport.viewport_offset();
        Some((offset_y / stride).floor().max(0.0) as u64)
    }

    /// Pages reachable by navigation: every page down to the lowest item,
    /// and at least the page currently in view.
    pub fn total_pages(&self) -> Option<u64> {
        let stride = self.page_stride()?;
        let content_pages = match self.document.content_bounds() {
            Some(bounds) => (bounds.y1.max(0.0) / stride).floor() as u64 + 1,
            None => 1,
        };
        let current = self.current_page().unwrap_or(0);
        Some(content_pages.max(current + 1))
    }

    pub fn jump_to_page(&self, page: u64) {
        let Some(stride) = self.page_stride() else {
            return;
        };
        self.viewport.scroll_to(0.0, page as f64 * stride);
    }

    pub fn next_page(&self) {
        if let Some(current) = self.current_page() {
            self.jump_to_page(current + 1);
        }
    }

    pub fn prev_page(&self) {
        if let Some(current) = self.current_page() {
            self.jump_to_page(current.saturating_sub(1));
        }
    }

    /// Draws the frame: tiles first, then the selection imposter while a
    /// move is in flight.
    pub fn render(&mut self, target: &mut Pixmap, view: ViewParams, quality: RenderQuality) {
        self.tiles.render(target, view, quality);

        if !self.selection.is_lifted() {
            return;
        }
        let Some(imposter) = self.selection.poll_imposter() else {
            return;
        };
        let world_rect = imposter.world_rect;
        let pixels_to_world = Affine::translate((world_rect.x0, world_rect.y0))
            * Affine::scale_non_uniform(
                world_rect.width() / f64::from(imposter.pixels.width()),
                world_rect.height() / f64::from(imposter.pixels.height()),
            );
        let transform = view.world_to_screen() * self.selection.transform() * pixels_to_world;
        target.draw_pixmap(
            0,
            0,
            imposter.pixels.as_ref(),
            &PixmapPaint::default(),
            renderer::affine_to_transform(transform),
            None,
        );
    }

    /// Consumer poke: emit a frame-ready token without any content change.
    pub fn invalidate_view(&self) {
        self.tiles.request_frame();
    }

    /// Paints the minimap overview: every item, scaled to fit the target.
    /// Driven by the consumer whenever `minimap_dirty` fired.
    pub fn render_minimap(&self, target: &mut Pixmap) {
        let world_rect = match self.document.content_bounds() {
            Some(bounds) => bounds.inflate(bounds.width().max(64.0) * 0.05, bounds.height().max(64.0) * 0.05),
            None => Rect::new(0.0, 0.0, 1024.0, 1024.0),
        };
        let items = self.document.query_items(world_rect);
        renderer::draw_overview(target, &items, world_rect, &*self.document);
    }

    /// Re-layouts the canvas. The whole tile pyramid is invalidated because
    /// page chrome and backgrounds are painted into the tiles.
    pub fn update_layout(&mut self, canvas_kind: model::CanvasKind, background: model::Background) {
        self.document.set_canvas_kind(canvas_kind);
        self.document.set_background(background);
        self.tiles.clear();
        self.content_changed(model::world_rect());
    }

    pub fn set_interacting(&self, interacting: bool) {
        self.tiles.set_interacting(interacting);
    }

    pub fn snapshot(&self) -> Snapshot {
        self.document.snapshot()
    }

    pub fn apply_snapshot(&mut self, snapshot: Snapshot) -> Result<(), SnapshotError> {
        self.document.apply(snapshot)?;
        self.selection.clear();
        self.tiles.clear();
        self.content_changed(model::world_rect());
        Ok(())
    }

    /// Tears down the tile pipeline, cancelling and joining every worker
    /// before returning. The document outlives the controller only through
    /// the `Arc`s the caller holds.
    pub fn destroy(self) {
        self.tiles.destroy();
    }

    fn page_stride(&self) -> Option<f64> {
        self.document
            .canvas_kind()
            .page_height()
            .map(|page_height| page_height + PAGE_SPACING)
    }

    fn content_changed(&self, region: Rect) {
        if let Some(callback) = &self.on_content_changed {
            callback();
        }
        if let Some(callback) = &self.on_minimap_dirty {
            callback(region);
        }
    }
}
