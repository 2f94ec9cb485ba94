//! Paged cursors held between a `query` and its `queryCursorNext` calls.
//!
//! A cursor keeps the sanitized statement and how many rows were already
//! delivered. Each page re-steps the statement past the consumed rows, so no
//! engine handle outlives the task that created it. The cost is quadratic in
//! the result size: draining N rows in pages of K steps about N²/(2K) rows in
//! total, so large results want large pages. Identities are assigned
//! monotonically per database and never reused, so a stale identity is
//! always reported as not found instead of resolving to another cursor.

use std::collections::BTreeMap;

use crate::command::SqlCommand;

pub type CursorId = i64;

#[derive(Debug, Clone)]
pub struct Cursor {
    pub id: CursorId,
    pub command: SqlCommand,
    pub page_size: usize,
    /// Rows already handed to the caller.
    pub position: usize,
}

#[derive(Debug, Default)]
pub struct CursorArena {
    last_id: CursorId,
    cursors: BTreeMap<CursorId, Cursor>,
}

impl CursorArena {
    pub fn register(&mut self, command: SqlCommand, page_size: usize, position: usize) -> CursorId {
        self.last_id += 1;
        let id = self.last_id;
        self.cursors.insert(
            id,
            Cursor {
                id,
                command,
                page_size,
                position,
            },
        );
        id
    }

    pub fn get(&self, id: CursorId) -> Option<&Cursor> {
        self.cursors.get(&id)
    }

    pub fn advance(&mut self, id: CursorId, delivered: usize) {
        if let Some(cursor) = self.cursors.get_mut(&id) {
            cursor.position += delivered;
        }
    }

    pub fn release(&mut self, id: CursorId) -> Option<Cursor> {
        self.cursors.remove(&id)
    }

    /// Drop every cursor; returns how many were still open.
    pub fn clear(&mut self) -> usize {
        let count = self.cursors.len();
        self.cursors.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }
}
