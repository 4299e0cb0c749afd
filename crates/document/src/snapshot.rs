//! Persistence snapshot of a document.
//!
//! The on-disk format belongs to the surrounding application; this type only
//! guarantees structural round-tripping and carries an explicit format tag so
//! `apply` can reject snapshots written by an unknown newer format.

use model::{Background, CanvasKind, ImageBitmap, ImageHandle, Item};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SNAPSHOT_FORMAT_TAG: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("unrecognised snapshot format tag {found}, expected {expected}")]
    VersionMismatch { found: u32, expected: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotImage {
    pub handle: ImageHandle,
    pub bitmap: ImageBitmap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub format_tag: u32,
    pub canvas_kind: CanvasKind,
    pub background: Background,
    pub images: Vec<SnapshotImage>,
    /// All items in ascending order; orders are preserved across apply.
    pub items: Vec<Item>,
}

impl Snapshot {
    pub(crate) fn check_format(&self) -> Result<(), SnapshotError> {
        if self.format_tag != SNAPSHOT_FORMAT_TAG {
            return Err(SnapshotError::VersionMismatch {
                found: self.format_tag,
                expected: SNAPSHOT_FORMAT_TAG,
            });
        }
        Ok(())
    }
}
