//! Transient transform of a subset of items.
//!
//! The selection owns copies of item handles plus one affine transform; it
//! never aliases the document's storage. A move "lifts" the items out of the
//! document (batched, so lift + reinsert form one undo step) and stands in
//! with a pre-rendered imposter bitmap until the move commits.

use std::sync::Arc;

use crossbeam_channel::{Receiver, TryRecvError, bounded};
use document::Document;
use kurbo::{Affine, Rect};
use model::{Item, ItemOrder, geom};
use tiny_skia::Pixmap;

/// Imposters never allocate beyond this edge length; larger selections are
/// rendered at reduced scale and stretched at draw time.
const IMPOSTER_MAX_DIM: u32 = 4096;

#[derive(Debug)]
pub struct Imposter {
    pub pixels: Pixmap,
    /// World rect the imposter covers at identity transform.
    pub world_rect: Rect,
}

enum ImposterState {
    None,
    Pending(Receiver<Option<Imposter>>),
    Ready(Arc<Imposter>),
}

pub struct SelectionManager {
    document: Arc<Document>,
    selected: Vec<Arc<Item>>,
    bounds: Option<Rect>,
    transform: Affine,
    lifted: bool,
    imposter: ImposterState,
}

impl SelectionManager {
    pub fn new(document: Arc<Document>) -> Self {
        Self {
            document,
            selected: Vec::new(),
            bounds: None,
            transform: Affine::IDENTITY,
            lifted: false,
            imposter: ImposterState::None,
        }
    }

    /// Records the handle set and snapshots its union bounds. An in-flight
    /// move is cancelled first.
    pub fn select(&mut self, orders: &[ItemOrder]) {
        if self.lifted {
            let _ = self.cancel_move();
        }
        self.selected = orders
            .iter()
            .filter_map(|&order| self.document.item(order))
            .collect();
        self.bounds = self
            .selected
            .iter()
            .map(|item| item.bounds)
            .reduce(|left, right| left.union(right));
        self.transform = Affine::IDENTITY;
        self.imposter = ImposterState::None;
    }

    pub fn clear(&mut self) {
        if self.lifted {
            let _ = self.cancel_move();
        }
        self.selected.clear();
        self.bounds = None;
        self.transform = Affine::IDENTITY;
        self.imposter = ImposterState::None;
    }

    pub fn selected(&self) -> &[Arc<Item>] {
        &self.selected
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn is_lifted(&self) -> bool {
        self.lifted
    }

    pub fn transform(&self) -> Affine {
        self.transform
    }

    pub fn bounds(&self) -> Option<Rect> {
        self.bounds
    }

    /// Selection bounds with the current transform applied.
    pub fn transformed_bounds(&self) -> Option<Rect> {
        let bounds = self.bounds?;
        geom::bounds_of_points(
            geom::rect_corners(bounds)
                .map(|corner| self.transform * corner),
        )
    }

    /// Composes a translation into the transform. The document is untouched;
    /// only the imposter placement changes.
    pub fn translate(&mut self, delta_x: f64, delta_y: f64) {
        self.transform = Affine::translate((delta_x, delta_y)) * self.transform;
    }

    pub fn apply_transform(&mut self, transform: Affine) {
        self.transform = transform * self.transform;
    }

    /// Lifts the selected items out of the document so cached tiles visually
    /// lose them, and starts rendering the imposter on a worker. The batch
    /// opened here stays open until `commit_move` or `cancel_move` closes
    /// it. Returns the lifted area for tile refresh.
    pub fn start_move(&mut self) -> Option<Rect> {
        if self.lifted || self.selected.is_empty() {
            return None;
        }
        let bounds = self.bounds?;

        self.document.start_batch();
        let orders: Vec<ItemOrder> = self.selected.iter().map(|item| item.order).collect();
        self.document.delete_items(&orders);
        self.lifted = true;
        self.spawn_imposter(bounds);
        Some(bounds)
    }

    /// Applies the transform to every lifted item's geometry and reinserts
    /// them with new orders, closing the batch: lift plus reinsert undo as
    /// one step. Returns the affected area and the new items.
    pub fn commit_move(&mut self) -> Option<(Rect, Vec<Arc<Item>>)> {
        if !self.lifted {
            return None;
        }
        let old_bounds = self.bounds?;

        let mut new_items = Vec::new();
        for item in &self.selected {
            let payload = item.payload.transformed(self.transform);
            match self.document.add_item(item.z_bucket, payload) {
                Ok(new_item) => new_items.push(new_item),
                Err(error) => {
                    tracing::warn!(%error, "transformed item rejected, restoring it in place");
                    if let Ok(restored) =
                        self.document.add_item(item.z_bucket, item.payload.clone())
                    {
                        new_items.push(restored);
                    }
                }
            }
        }
        self.document.end_batch();

        let new_bounds = new_items
            .iter()
            .map(|item| item.bounds)
            .reduce(|left, right| left.union(right));
        let affected = old_bounds.union(new_bounds.unwrap_or(old_bounds));

        self.selected = new_items.clone();
        self.bounds = new_bounds;
        self.transform = Affine::IDENTITY;
        self.lifted = false;
        self.imposter = ImposterState::None;
        Some((affected, new_items))
    }

    /// Abandons a move: the open batch (holding only the lift deletions) is
    /// closed and undone, restoring the items with their original orders.
    pub fn cancel_move(&mut self) -> Option<Rect> {
        if !self.lifted {
            self.transform = Affine::IDENTITY;
            return None;
        }
        self.document.end_batch();
        let restored = self.document.undo();

        self.transform = Affine::IDENTITY;
        self.lifted = false;
        self.imposter = ImposterState::None;
        restored
    }

    /// Removes the selected items as one batch. During a lift the open batch
    /// already holds the deletions, so closing it is the whole job.
    pub fn delete_selected(&mut self) -> Option<Rect> {
        if self.selected.is_empty() {
            return None;
        }
        let bounds = self.bounds;
        if self.lifted {
            self.document.end_batch();
            self.lifted = false;
        } else {
            let orders: Vec<ItemOrder> = self.selected.iter().map(|item| item.order).collect();
            self.document.delete_items(&orders);
        }
        self.selected.clear();
        self.bounds = None;
        self.transform = Affine::IDENTITY;
        self.imposter = ImposterState::None;
        bounds
    }

    /// Non-blocking: hands out the imposter once the worker delivered it.
    pub fn poll_imposter(&mut self) -> Option<Arc<Imposter>> {
        if let ImposterState::Pending(receiver) = &self.imposter {
            match receiver.try_recv() {
                Ok(Some(imposter)) => self.imposter = ImposterState::Ready(Arc::new(imposter)),
                Ok(None) | Err(TryRecvError::Disconnected) => {
                    self.imposter = ImposterState::None;
                }
                Err(TryRecvError::Empty) => {}
            }
        }
        match &self.imposter {
            ImposterState::Ready(imposter) => Some(imposter.clone()),
            _ => None,
        }
    }

    fn spawn_imposter(&mut self, bounds: Rect) {
        let (sender, receiver) = bounded(1);
        let items = self.selected.clone();
        let document = self.document.clone();
        std::thread::Builder::new()
            .name("selection-imposter".to_string())
            .spawn(move || {
                let imposter = render_imposter(&items, bounds, &*document);
                let _ = sender.send(imposter);
            })
            .expect("failed to spawn imposter thread");
        self.imposter = ImposterState::Pending(receiver);
    }
}

/// Rasterizes the selection at identity transform over its own bounds.
fn render_imposter(items: &[Arc<Item>], bounds: Rect, images: &Document) -> Option<Imposter> {
    let scale = (f64::from(IMPOSTER_MAX_DIM) / bounds.width().max(bounds.height())).min(1.0);
    let width = ((bounds.width() * scale).ceil() as u32).max(1);
    let height = ((bounds.height() * scale).ceil() as u32).max(1);
    let mut pixels = Pixmap::new(width, height)?;

    let world_to_pixels = Affine::scale(scale) * Affine::translate((-bounds.x0, -bounds.y0));
    for item in items {
        if let Err(error) = renderer::draw_item(&mut pixels, world_to_pixels, item, images, false)
        {
            tracing::warn!(%error, "imposter skipped an unpaintable item");
        }
    }
    Some(Imposter {
        pixels,
        world_rect: bounds,
    })
}
