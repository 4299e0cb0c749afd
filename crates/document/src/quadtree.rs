//! Growable quadtree over item bounds.
//!
//! Entries straddling a node's midlines stay at that node, and insert and
//! remove share one descent test, so an entry is always found along the same
//! path it was stored on. When bounds fall outside the root, the root grows:
//! the old root becomes one quadrant of a doubled root.

use kurbo::Rect;
use model::ItemOrder;
use model::geom::rects_intersect;
use smallvec::SmallVec;

/// Items a node may hold before it splits.
const NODE_CAPACITY: usize = 16;
/// Maximum depth below the current root; deeper nodes stop splitting.
const MAX_DEPTH: u8 = 8;

#[derive(Debug, Clone, Copy)]
struct Entry {
    order: ItemOrder,
    bounds: Rect,
}

#[derive(Debug)]
struct Node {
    bounds: Rect,
    items: SmallVec<[Entry; NODE_CAPACITY]>,
    children: Option<Box<[Node; 4]>>,
}

#[derive(Debug)]
pub struct QuadTree {
    root: Node,
    len: usize,
}

impl QuadTree {
    pub fn new(initial_bounds: Rect) -> Self {
        assert!(
            initial_bounds.width() > 0.0 && initial_bounds.height() > 0.0,
            "quadtree initial bounds must be non-empty"
        );
        Self {
            root: Node::leaf(initial_bounds),
            len: 0,
        }
    }

    /// Inserts an entry, growing the root as needed. Bounds validity is the
    /// caller's contract; the tree accepts any finite rectangle.
    pub fn insert(&mut self, order: ItemOrder, bounds: Rect) {
        while !rect_contains(self.root.bounds, bounds) {
            self.grow_towards(bounds);
        }
        self.root.insert(Entry { order, bounds }, 0);
        self.len += 1;
    }

    /// Removes the entry inserted with exactly these bounds. Returns whether
    /// it was found.
    pub fn remove(&mut self, order: ItemOrder, bounds: Rect) -> bool {
        let removed = self.root.remove(order, bounds);
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Pushes every entry whose bounds intersect `query` into `into`. Each
    /// entry is stored exactly once, so no duplicates are produced.
    pub fn retrieve(&self, into: &mut Vec<ItemOrder>, query: Rect) {
        self.root.retrieve(into, query);
    }

    pub fn get_bounds(&self) -> Rect {
        self.root.bounds
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Doubles the root extent away from the quadrant the new bounds need,
    /// keeping the old root as one exact quadrant of the new root.
    fn grow_towards(&mut self, bounds: Rect) {
        let old = self.root.bounds;
        let width = old.width();
        let height = old.height();

        let grow_west = bounds.x0 < old.x0;
        let grow_north = bounds.y0 < old.y0;
        let new_bounds = Rect::new(
            if grow_west { old.x0 - width } else { old.x0 },
            if grow_north { old.y0 - height } else { old.y0 },
            if grow_west { old.x1 } else { old.x1 + width },
            if grow_north { old.y1 } else { old.y1 + height },
        );

        let old_root = std::mem::replace(&mut self.root, Node::leaf(new_bounds));
        let mut children = Node::empty_children(new_bounds);
        let old_quadrant = quadrant_for(new_bounds, old.center())
            .expect("old root center lies strictly inside one quadrant of the grown root");
        children[old_quadrant] = old_root;
        self.root.children = Some(Box::new(children));
    }
}

impl Node {
    fn leaf(bounds: Rect) -> Self {
        Self {
            bounds,
            items: SmallVec::new(),
            children: None,
        }
    }

    fn empty_children(bounds: Rect) -> [Node; 4] {
        quadrant_bounds(bounds).map(Node::leaf)
    }

    fn insert(&mut self, entry: Entry, depth: u8) {
        if let Some(children) = &mut self.children {
            if let Some(quadrant) = fitting_quadrant(self.bounds, entry.bounds) {
                children[quadrant].insert(entry, depth + 1);
                return;
            }
            self.items.push(entry);
            return;
        }

        self.items.push(entry);
        if self.items.len() > NODE_CAPACITY && depth < MAX_DEPTH {
            self.split(depth);
        }
    }

    fn split(&mut self, depth: u8) {
        debug_assert!(self.children.is_none(), "splitting an already-split node");
        let mut children = Node::empty_children(self.bounds);
        let mut keep = SmallVec::new();
        for entry in self.items.drain(..) {
            match fitting_quadrant(self.bounds, entry.bounds) {
                Some(quadrant) => children[quadrant].insert(entry, depth + 1),
                None => keep.push(entry),
            }
        }
        self.items = keep;
        self.children = Some(Box::new(children));
    }

    fn remove(&mut self, order: ItemOrder, bounds: Rect) -> bool {
        if let Some(children) = &mut self.children {
            if let Some(quadrant) = fitting_quadrant(self.bounds, bounds) {
                let removed = children[quadrant].remove(order, bounds);
                if removed && children.iter().all(Node::is_empty_leafward) {
                    self.children = None;
                }
                return removed;
            }
        }

        let before = self.items.len();
        self.items.retain(|entry| entry.order != order);
        before != self.items.len()
    }

    fn is_empty_leafward(&self) -> bool {
        self.items.is_empty() && self.children.is_none()
    }

    fn retrieve(&self, into: &mut Vec<ItemOrder>, query: Rect) {
        for entry in &self.items {
            if rects_intersect(entry.bounds, query) {
                into.push(entry.order);
            }
        }
        if let Some(children) = &self.children {
            for child in children.iter() {
                if rects_intersect(child.bounds, query) {
                    child.retrieve(into, query);
                }
            }
        }
    }
}

fn rect_contains(container: Rect, rect: Rect) -> bool {
    rect.x0 >= container.x0
        && rect.y0 >= container.y0
        && rect.x1 <= container.x1
        && rect.y1 <= container.y1
}

/// The shared descent test. Returns the quadrant fully containing `rect`, or
/// `None` when the rect straddles a midline and must stay at this node.
fn fitting_quadrant(node_bounds: Rect, rect: Rect) -> Option<usize> {
    let center = node_bounds.center();
    let west = rect.x1 <= center.x;
    let east = rect.x0 >= center.x;
    let north = rect.y1 <= center.y;
    let south = rect.y0 >= center.y;
    match (west, east, north, south) {
        (true, _, true, _) => Some(0),
        (_, true, true, _) => Some(1),
        (true, _, _, true) => Some(2),
        (_, true, _, true) => Some(3),
        _ => None,
    }
}

fn quadrant_for(node_bounds: Rect, point: kurbo::Point) -> Option<usize> {
    let center = node_bounds.center();
    if point.x == center.x || point.y == center.y {
        return None;
    }
    let east = point.x > center.x;
    let south = point.y > center.y;
    Some(match (east, south) {
        (false, false) => 0,
        (true, false) => 1,
        (false, true) => 2,
        (true, true) => 3,
    })
}

fn quadrant_bounds(bounds: Rect) -> [Rect; 4] {
    let center = bounds.center();
    [
        Rect::new(bounds.x0, bounds.y0, center.x, center.y),
        Rect::new(center.x, bounds.y0, bounds.x1, center.y),
        Rect::new(bounds.x0, center.y, center.x, bounds.y1),
        Rect::new(center.x, center.y, bounds.x1, bounds.y1),
    ]
}
