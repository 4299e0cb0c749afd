//! Thread-safe canvas document.
//!
//! Owns the items, the spatial index, the image registry and the undo
//! history. All public operations take the internal RW lock; change events
//! are delivered only after the write lock is released, so observers never
//! run under the document lock.

mod history;
mod quadtree;
mod snapshot;

pub use quadtree::QuadTree;
pub use snapshot::{SNAPSHOT_FORMAT_TAG, Snapshot, SnapshotError, SnapshotImage};

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use kurbo::{Point, Rect};
use model::geom;
use model::{
    Background, BoundsError, CanvasKind, ImageBitmap, ImageHandle, ImageSource, Item, ItemOrder,
    ItemPayload, ZBucket, validate_bounds,
};
use slotmap::SlotMap;
use thiserror::Error;

use history::{Batch, History, MutationRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EraserKind {
    /// Pixel eraser: clears cached tile pixels along the path but never
    /// mutates the document. Regenerated tiles restore the erased pixels.
    Standard,
    /// Removes whole items whose geometry crosses the eraser path.
    Stroke,
    /// Removes items fully contained in the closed eraser polygon.
    Lasso,
}

#[derive(Debug, Clone)]
pub enum DocumentEvent {
    ItemsAdded(Vec<Arc<Item>>),
    ItemsRemoved(Vec<Arc<Item>>),
    BackgroundChanged(Background),
    PageConfigChanged(CanvasKind),
}

/// Observers receive owned event values and must not re-enter the document
/// from the delivery thread while a mutation of their own is in flight;
/// deferring to an own queue is the safe pattern.
pub trait DocumentObserver: Send + Sync {
    fn on_event(&self, event: DocumentEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReplaceError {
    #[error(transparent)]
    Bounds(#[from] BoundsError),
    #[error("item to replace is not present")]
    NotFound,
}

/// Initial quadtree extent. The tree grows on demand; this only sets the
/// starting granularity around the origin.
const INITIAL_INDEX_EXTENT: f64 = 1024.0;

struct DocumentInner {
    items: BTreeMap<ItemOrder, Arc<Item>>,
    index: QuadTree,
    images: SlotMap<ImageHandle, Arc<ImageBitmap>>,
    image_bytes: usize,
    canvas_kind: CanvasKind,
    background: Background,
    next_order: u64,
    history: History,
    batch_depth: u32,
    open_batch: Batch,
}

pub struct Document {
    inner: RwLock<DocumentInner>,
    observers: Mutex<Vec<Arc<dyn DocumentObserver>>>,
    model_version: AtomicU64,
}

impl Document {
    pub fn new(canvas_kind: CanvasKind, background: Background) -> Self {
        Self {
            inner: RwLock::new(DocumentInner {
                items: BTreeMap::new(),
                index: QuadTree::new(initial_index_bounds()),
                images: SlotMap::with_key(),
                image_bytes: 0,
                canvas_kind,
                background,
                next_order: 1,
                history: History::default(),
                batch_depth: 0,
                open_batch: Batch::default(),
            }),
            observers: Mutex::new(Vec::new()),
            model_version: AtomicU64::new(0),
        }
    }

    /// Bumped on every committed mutation; readable without the lock so tile
    /// generation can stamp tasks cheaply.
    pub fn model_version(&self) -> u64 {
        self.model_version.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self, observer: Arc<dyn DocumentObserver>) {
        self.observers
            .lock()
            .expect("observer list lock poisoned")
            .push(observer);
    }

    pub fn add_item(
        &self,
        z_bucket: ZBucket,
        payload: ItemPayload,
    ) -> Result<Arc<Item>, BoundsError> {
        self.mutate(|inner, events| {
            let bounds = payload
                .computed_bounds()
                .ok_or(BoundsError::InvalidBounds)?;
            validate_bounds(bounds)?;

            let item = Arc::new(Item {
                order: inner.alloc_order(),
                z_bucket,
                bounds,
                payload,
            });
            inner.insert_item(item.clone());
            inner.record(MutationRecord::Added { item: item.clone() });
            events.push(DocumentEvent::ItemsAdded(vec![item.clone()]));
            Ok(item)
        })
    }

    /// Removes the listed items. Orders that are not present are silently
    /// skipped. Returns the removed items.
    pub fn delete_items(&self, orders: &[ItemOrder]) -> Vec<Arc<Item>> {
        self.mutate(|inner, events| {
            let mut removed = Vec::new();
            for &order in orders {
                if let Some(item) = inner.take_item(order) {
                    inner.record(MutationRecord::Removed { item: item.clone() });
                    removed.push(item);
                }
            }
            if !removed.is_empty() {
                events.push(DocumentEvent::ItemsRemoved(removed.clone()));
            }
            removed
        })
    }

    /// Replaces an item's payload in place, keeping its order and z bucket.
    pub fn replace_item(
        &self,
        order: ItemOrder,
        payload: ItemPayload,
    ) -> Result<Arc<Item>, ReplaceError> {
        self.mutate(|inner, events| {
            let before = inner
                .items
                .get(&order)
                .cloned()
                .ok_or(ReplaceError::NotFound)?;
            let bounds = payload
                .computed_bounds()
                .ok_or(BoundsError::InvalidBounds)
                .map_err(ReplaceError::from)?;
            validate_bounds(bounds).map_err(ReplaceError::from)?;

            let after = Arc::new(Item {
                order,
                z_bucket: before.z_bucket,
                bounds,
                payload,
            });
            inner
                .take_item(order)
                .expect("item present moments ago under the write lock");
            inner.insert_item(after.clone());
            inner.record(MutationRecord::Replaced {
                before: before.clone(),
                after: after.clone(),
            });
            events.push(DocumentEvent::ItemsRemoved(vec![before]));
            events.push(DocumentEvent::ItemsAdded(vec![after.clone()]));
            Ok(after)
        })
    }

    /// Clones the listed items at a translation offset, assigning new orders,
    /// as one batch. Items whose translated bounds would leave the world are
    /// skipped.
    pub fn duplicate_items(
        &self,
        orders: &[ItemOrder],
        offset_x: f64,
        offset_y: f64,
    ) -> Vec<Arc<Item>> {
        self.mutate(|inner, events| {
            let mut added = Vec::new();
            for &order in orders {
                let Some(source) = inner.items.get(&order).cloned() else {
                    continue;
                };
                let payload = source.payload.translated(offset_x, offset_y);
                let Some(bounds) = payload.computed_bounds() else {
                    continue;
                };
                if validate_bounds(bounds).is_err() {
                    continue;
                }
                let item = Arc::new(Item {
                    order: inner.alloc_order(),
                    z_bucket: source.z_bucket,
                    bounds,
                    payload,
                });
                inner.insert_item(item.clone());
                inner.record(MutationRecord::Added { item: item.clone() });
                added.push(item);
            }
            if !added.is_empty() {
                events.push(DocumentEvent::ItemsAdded(added.clone()));
            }
            added
        })
    }

    /// Erases along `path`. Returns the union bounds of the affected area, or
    /// `None` when nothing was affected. Only `Stroke` and `Lasso` mutate the
    /// document; see [`EraserKind::Standard`].
    pub fn erase(&self, path: &[Point], eraser_width: f64, kind: EraserKind) -> Option<Rect> {
        let path_bounds = geom::bounds_of_points(path.iter().copied())?;
        match kind {
            EraserKind::Standard => {
                Some(path_bounds.inflate(eraser_width / 2.0, eraser_width / 2.0))
            }
            EraserKind::Stroke => self.mutate(|inner, events| {
                let query = path_bounds.inflate(eraser_width, eraser_width);
                let doomed = inner.collect_items(query, |item| match &item.payload {
                    ItemPayload::Stroke(stroke) => {
                        geom::path_crosses_polyline(path, &stroke.polyline(), eraser_width)
                    }
                    ItemPayload::Image(_) | ItemPayload::Text(_) => {
                        geom::path_crosses_rect(path, item.bounds, eraser_width)
                    }
                });
                inner.remove_collected(doomed, events)
            }),
            EraserKind::Lasso => self.mutate(|inner, events| {
                let doomed = inner.collect_items(path_bounds, |item| match &item.payload {
                    ItemPayload::Stroke(stroke) => {
                        geom::polygon_contains_all(path, stroke.polyline())
                    }
                    ItemPayload::Image(_) | ItemPayload::Text(_) => {
                        geom::polygon_contains_all(path, geom::rect_corners(item.bounds))
                    }
                });
                inner.remove_collected(doomed, events)
            }),
        }
    }

    /// Snapshot of the items intersecting `query`, sorted by
    /// `(z_bucket, order)` ascending.
    pub fn query_items(&self, query: Rect) -> Vec<Arc<Item>> {
        let inner = self.read();
        let mut orders = Vec::new();
        inner.index.retrieve(&mut orders, query);
        let mut result: Vec<Arc<Item>> = orders
            .into_iter()
            .filter_map(|order| inner.items.get(&order).cloned())
            .collect();
        result.sort_by_key(|item| item.paint_key());
        result
    }

    pub fn item(&self, order: ItemOrder) -> Option<Arc<Item>> {
        self.read().items.get(&order).cloned()
    }

    /// Topmost item whose painted geometry lies within `slop` of the point.
    pub fn hit_test(&self, x: f64, y: f64, slop: f64) -> Option<Arc<Item>> {
        let point = Point::new(x, y);
        let query = Rect::new(x - slop, y - slop, x + slop, y + slop);
        let mut candidates = self.query_items(query);
        candidates.reverse();
        candidates
            .into_iter()
            .find(|item| item.hit_distance(point) <= slop)
    }

    /// Opens a mutation batch. Batches nest; only the outermost close commits
    /// one undo entry.
    pub fn start_batch(&self) {
        let mut inner = self.write();
        inner.batch_depth += 1;
    }

    /// Closes a batch. Calling without a matching `start_batch` is a
    /// programming error and panics.
    pub fn end_batch(&self) {
        let mut inner = self.write();
        assert!(inner.batch_depth > 0, "end_batch without start_batch");
        inner.batch_depth -= 1;
        if inner.batch_depth == 0 {
            let batch = std::mem::take(&mut inner.open_batch);
            inner.history.commit(batch);
        }
    }

    /// Undoes the most recent batch. Returns the union bounds of everything
    /// that changed, for cache refresh.
    pub fn undo(&self) -> Option<Rect> {
        self.replay(|inner| inner.history.pop_undo(), true)
    }

    pub fn redo(&self) -> Option<Rect> {
        self.replay(|inner| inner.history.pop_redo(), false)
    }

    pub fn undo_depth(&self) -> usize {
        self.read().history.undo_depth()
    }

    pub fn redo_depth(&self) -> usize {
        self.read().history.redo_depth()
    }

    pub fn canvas_kind(&self) -> CanvasKind {
        self.read().canvas_kind
    }

    pub fn background(&self) -> Background {
        self.read().background
    }

    pub fn set_background(&self, background: Background) {
        self.mutate(|inner, events| {
            if inner.background != background {
                inner.background = background;
                events.push(DocumentEvent::BackgroundChanged(background));
            }
        });
    }

    pub fn set_canvas_kind(&self, canvas_kind: CanvasKind) {
        self.mutate(|inner, events| {
            if inner.canvas_kind != canvas_kind {
                inner.canvas_kind = canvas_kind;
                events.push(DocumentEvent::PageConfigChanged(canvas_kind));
            }
        });
    }

    pub fn item_count(&self) -> usize {
        self.read().items.len()
    }

    /// Union bounds of all items, or `None` for an empty document.
    pub fn content_bounds(&self) -> Option<Rect> {
        let inner = self.read();
        inner
            .items
            .values()
            .map(|item| item.bounds)
            .reduce(|left, right| left.union(right))
    }

    pub fn insert_image(&self, bitmap: ImageBitmap) -> ImageHandle {
        let mut inner = self.write();
        inner.image_bytes += bitmap.byte_size();
        inner.images.insert(Arc::new(bitmap))
    }

    /// Bytes held by the decoded-image registry, for cache budget accounting.
    pub fn image_bytes(&self) -> usize {
        self.read().image_bytes
    }

    pub fn snapshot(&self) -> Snapshot {
        let inner = self.read();
        Snapshot {
            format_tag: SNAPSHOT_FORMAT_TAG,
            canvas_kind: inner.canvas_kind,
            background: inner.background,
            images: inner
                .images
                .iter()
                .map(|(handle, bitmap)| SnapshotImage {
                    handle,
                    bitmap: (**bitmap).clone(),
                })
                .collect(),
            items: inner.items.values().map(|item| (**item).clone()).collect(),
        }
    }

    /// Replaces the document contents atomically. The snapshot's image
    /// handles are re-allocated in the fresh registry and item payloads are
    /// remapped accordingly. History is cleared; no events are emitted — the
    /// caller triggered the apply and owns the follow-up (tile cache clear).
    pub fn apply(&self, snapshot: Snapshot) -> Result<(), SnapshotError> {
        snapshot.check_format()?;

        let mut inner = self.write();
        assert_eq!(inner.batch_depth, 0, "apply inside an open batch");

        let mut images = SlotMap::with_key();
        let mut image_bytes = 0;
        let mut handle_map: HashMap<ImageHandle, ImageHandle> = HashMap::new();
        for snapshot_image in snapshot.images {
            image_bytes += snapshot_image.bitmap.byte_size();
            let new_handle = images.insert(Arc::new(snapshot_image.bitmap));
            handle_map.insert(snapshot_image.handle, new_handle);
        }

        let mut items = BTreeMap::new();
        let mut index = QuadTree::new(initial_index_bounds());
        let mut next_order = 1;
        for mut item in snapshot.items {
            if let ItemPayload::Image(image) = &mut item.payload {
                if let Some(new_handle) = handle_map.get(&image.source) {
                    image.source = *new_handle;
                }
            }
            next_order = next_order.max(item.order.0 + 1);
            index.insert(item.order, item.bounds);
            items.insert(item.order, Arc::new(item));
        }

        inner.items = items;
        inner.index = index;
        inner.images = images;
        inner.image_bytes = image_bytes;
        inner.canvas_kind = snapshot.canvas_kind;
        inner.background = snapshot.background;
        inner.next_order = next_order;
        inner.history.clear();
        inner.open_batch = Batch::default();
        drop(inner);

        self.model_version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DocumentInner> {
        self.inner.read().expect("document read lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DocumentInner> {
        self.inner.write().expect("document write lock poisoned")
    }

    /// Runs a mutation under the write lock. Outside an explicit batch the
    /// whole call forms one implicit batch. Events are dispatched after the
    /// lock is released; the model version bumps only when events were
    /// produced, so failed or no-op calls leave the version untouched.
    fn mutate<R>(
        &self,
        operate: impl FnOnce(&mut DocumentInner, &mut Vec<DocumentEvent>) -> R,
    ) -> R {
        let (result, events) = {
            let mut inner = self.write();
            let implicit_batch = inner.batch_depth == 0;
            let mut events = Vec::new();
            let result = operate(&mut inner, &mut events);
            if implicit_batch {
                let batch = std::mem::take(&mut inner.open_batch);
                inner.history.commit(batch);
            }
            (result, events)
        };
        if !events.is_empty() {
            self.model_version.fetch_add(1, Ordering::SeqCst);
        }
        self.dispatch(events);
        result
    }

    fn replay(
        &self,
        pop: impl FnOnce(&mut DocumentInner) -> Option<Batch>,
        inverse: bool,
    ) -> Option<Rect> {
        let (affected, events) = {
            let mut inner = self.write();
            assert_eq!(
                inner.batch_depth, 0,
                "undo/redo inside an open batch"
            );
            let Some(batch) = pop(&mut inner) else {
                return None;
            };

            let mut removed = Vec::new();
            let mut added = Vec::new();
            let mut affected: Option<Rect> = None;
            let mut apply_record = |inner: &mut DocumentInner, record: &MutationRecord| {
                let (take, put) = match record {
                    MutationRecord::Added { item } => {
                        if inverse {
                            (Some(item.clone()), None)
                        } else {
                            (None, Some(item.clone()))
                        }
                    }
                    MutationRecord::Removed { item } => {
                        if inverse {
                            (None, Some(item.clone()))
                        } else {
                            (Some(item.clone()), None)
                        }
                    }
                    MutationRecord::Replaced { before, after } => {
                        if inverse {
                            (Some(after.clone()), Some(before.clone()))
                        } else {
                            (Some(before.clone()), Some(after.clone()))
                        }
                    }
                };
                if let Some(item) = take {
                    inner
                        .take_item(item.order)
                        .expect("history replay target missing from the document");
                    affected = union_into(affected, item.bounds);
                    removed.push(item);
                }
                if let Some(item) = put {
                    affected = union_into(affected, item.bounds);
                    inner.insert_item(item.clone());
                    added.push(item);
                }
            };

            if inverse {
                for record in batch.records.iter().rev() {
                    apply_record(&mut inner, record);
                }
                inner.history.push_redo(batch);
            } else {
                for record in batch.records.iter() {
                    apply_record(&mut inner, record);
                }
                inner.history.push_undo(batch);
            }

            let mut events = Vec::new();
            if !removed.is_empty() {
                events.push(DocumentEvent::ItemsRemoved(removed));
            }
            if !added.is_empty() {
                events.push(DocumentEvent::ItemsAdded(added));
            }
            (affected, events)
        };

        if !events.is_empty() {
            self.model_version.fetch_add(1, Ordering::SeqCst);
        }
        self.dispatch(events);
        affected
    }

    fn dispatch(&self, events: Vec<DocumentEvent>) {
        if events.is_empty() {
            return;
        }
        let observers = self
            .observers
            .lock()
            .expect("observer list lock poisoned")
            .clone();
        for event in events {
            for observer in &observers {
                observer.on_event(event.clone());
            }
        }
    }
}

impl ImageSource for Document {
    fn image_bitmap(&self, handle: ImageHandle) -> Option<Arc<ImageBitmap>> {
        self.read().images.get(handle).cloned()
    }
}

impl DocumentInner {
    fn alloc_order(&mut self) -> ItemOrder {
        let order = ItemOrder(self.next_order);
        self.next_order = self
            .next_order
            .checked_add(1)
            .expect("item order space exhausted");
        order
    }

    /// Inserts into both stores. An item exists in the document iff its order
    /// is in the index.
    fn insert_item(&mut self, item: Arc<Item>) {
        self.index.insert(item.order, item.bounds);
        let previous = self.items.insert(item.order, item);
        debug_assert!(previous.is_none(), "duplicate item order inserted");
    }

    fn take_item(&mut self, order: ItemOrder) -> Option<Arc<Item>> {
        let item = self.items.remove(&order)?;
        let removed = self.index.remove(order, item.bounds);
        debug_assert!(removed, "item present in map but missing from the index");
        Some(item)
    }

    fn record(&mut self, record: MutationRecord) {
        self.open_batch.records.push(record);
    }

    fn collect_items(
        &self,
        query: Rect,
        mut matches: impl FnMut(&Item) -> bool,
    ) -> Vec<Arc<Item>> {
        let mut orders = Vec::new();
        self.index.retrieve(&mut orders, query);
        orders
            .into_iter()
            .filter_map(|order| self.items.get(&order).cloned())
            .filter(|item| matches(item))
            .collect()
    }

    fn remove_collected(
        &mut self,
        doomed: Vec<Arc<Item>>,
        events: &mut Vec<DocumentEvent>,
    ) -> Option<Rect> {
        if doomed.is_empty() {
            return None;
        }
        let mut affected: Option<Rect> = None;
        let mut removed = Vec::new();
        for item in doomed {
            self.take_item(item.order)
                .expect("collected item present under the same write lock");
            affected = union_into(affected, item.bounds);
            self.record(MutationRecord::Removed { item: item.clone() });
            removed.push(item);
        }
        events.push(DocumentEvent::ItemsRemoved(removed));
        affected
    }
}

fn initial_index_bounds() -> Rect {
    Rect::new(
        -INITIAL_INDEX_EXTENT,
        -INITIAL_INDEX_EXTENT,
        INITIAL_INDEX_EXTENT,
        INITIAL_INDEX_EXTENT,
    )
}

fn union_into(current: Option<Rect>, bounds: Rect) -> Option<Rect> {
    Some(match current {
        Some(rect) => rect.union(bounds),
        None => bounds,
    })
}
