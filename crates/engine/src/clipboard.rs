//! Process-wide clipboard.
//!
//! The single piece of global state in the core: an owned list of item
//! payloads behind a mutex. It never holds references into a document —
//! image payloads carry only their registry key, which simply fails to
//! resolve (and is skipped at draw time) when pasted into a document that
//! does not know it.

use std::sync::{Arc, Mutex};

use document::Document;
use kurbo::Point;
use model::{Item, ItemPayload, ZBucket};

#[derive(Debug, Clone)]
struct ClipboardItem {
    z_bucket: ZBucket,
    payload: ItemPayload,
}

static CLIPBOARD: Mutex<Vec<ClipboardItem>> = Mutex::new(Vec::new());

/// Replaces the clipboard contents with copies of the items' geometric
/// payloads.
pub fn copy_items(items: &[Arc<Item>]) {
    let contents: Vec<ClipboardItem> = items
        .iter()
        .map(|item| ClipboardItem {
            z_bucket: item.z_bucket,
            payload: item.payload.clone(),
        })
        .collect();
    *CLIPBOARD.lock().expect("clipboard lock poisoned") = contents;
}

pub fn is_empty() -> bool {
    CLIPBOARD.lock().expect("clipboard lock poisoned").is_empty()
}

/// Pastes the clipboard into `document` as one batch, translated so the
/// paste point lands on the copied set's centroid. Returns the new items.
pub fn paste_at(document: &Document, x: f64, y: f64) -> Vec<Arc<Item>> {
    let contents = CLIPBOARD.lock().expect("clipboard lock poisoned").clone();
    if contents.is_empty() {
        return Vec::new();
    }

    let centroid = contents
        .iter()
        .filter_map(|entry| entry.payload.computed_bounds())
        .reduce(|left, right| left.union(right))
        .map(|bounds| bounds.center())
        .unwrap_or(Point::ZERO);
    let offset_x = x - centroid.x;
    let offset_y = y - centroid.y;

    document.start_batch();
    let mut pasted = Vec::new();
    for entry in contents {
        let payload = entry.payload.translated(offset_x, offset_y);
        match document.add_item(entry.z_bucket, payload) {
            Ok(item) => pasted.push(item),
            Err(error) => {
                tracing::warn!(%error, "pasted item rejected");
            }
        }
    }
    document.end_batch();
    pasted
}
