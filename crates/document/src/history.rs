//! Undo/redo bookkeeping. The document applies inverse records; this module
//! only stores them.

use std::sync::Arc;

use model::Item;

#[derive(Debug, Clone)]
pub(crate) enum MutationRecord {
    Added { item: Arc<Item> },
    Removed { item: Arc<Item> },
    Replaced { before: Arc<Item>, after: Arc<Item> },
}

/// One atomic undo unit: every elementary mutation recorded between an
/// outermost batch open and close.
#[derive(Debug, Default)]
pub(crate) struct Batch {
    pub(crate) records: Vec<MutationRecord>,
}

impl Batch {
    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Default)]
pub(crate) struct History {
    undo_stack: Vec<Batch>,
    redo_stack: Vec<Batch>,
}

impl History {
    /// Commits a freshly-recorded batch. Anything redoable is invalidated by
    /// new work.
    pub(crate) fn commit(&mut self, batch: Batch) {
        if batch.is_empty() {
            return;
        }
        self.undo_stack.push(batch);
        self.redo_stack.clear();
    }

    pub(crate) fn pop_undo(&mut self) -> Option<Batch> {
        self.undo_stack.pop()
    }

    pub(crate) fn pop_redo(&mut self) -> Option<Batch> {
        self.redo_stack.pop()
    }

    /// Re-files a batch popped by `pop_undo` after its inverse was applied.
    pub(crate) fn push_redo(&mut self, batch: Batch) {
        self.redo_stack.push(batch);
    }

    /// Re-files a batch popped by `pop_redo` after it was re-applied. Does
    /// not clear the redo stack.
    pub(crate) fn push_undo(&mut self, batch: Batch) {
        self.undo_stack.push(batch);
    }

    pub(crate) fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    pub(crate) fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub(crate) fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }
}
