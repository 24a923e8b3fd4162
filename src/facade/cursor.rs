use crate::codec::IdTuple;
use crate::core::{MapRow, Result};
use crate::facade::IdMapStore;

#[derive(Debug, Clone)]
enum CursorState {
    NotStarted,
    /// Before the first row after `seq`.
    Resumed { seq: u64 },
    Positioned { seq: u64, row: MapRow },
    Exhausted,
}

/// Walks the map table in table order.
///
/// The cursor holds no lock between steps: every advance looks up the next
/// row after the current position, so rows removed behind or ahead of the
/// cursor are simply never seen.
pub struct MapCursor<'a> {
    store: &'a IdMapStore,
    state: CursorState,
}

impl<'a> MapCursor<'a> {
    pub(crate) fn new(store: &'a IdMapStore) -> Self {
        Self {
            store,
            state: CursorState::NotStarted,
        }
    }

    /// A cursor positioned just after the row at table position `seq`,
    /// whether or not that row still exists.
    pub(crate) fn resume_after(store: &'a IdMapStore, seq: u64) -> Self {
        Self {
            store,
            state: CursorState::Resumed { seq },
        }
    }

    /// Table position of the row under the cursor.
    pub(crate) fn position(&self) -> Option<u64> {
        match &self.state {
            CursorState::Positioned { seq, .. } => Some(*seq),
            _ => None,
        }
    }

    /// Move to the next row. Returns `false` once the cursor is exhausted;
    /// further calls keep returning `false`.
    pub fn advance(&mut self) -> Result<bool> {
        let after = match &self.state {
            CursorState::NotStarted => None,
            CursorState::Resumed { seq } => Some(*seq),
            CursorState::Positioned { seq, .. } => Some(*seq),
            CursorState::Exhausted => return Ok(false),
        };

        self.state = match self.store.row_after(after)? {
            Some((seq, row)) => CursorState::Positioned { seq, row },
            None => CursorState::Exhausted,
        };
        Ok(matches!(self.state, CursorState::Positioned { .. }))
    }

    /// Row under the cursor as of the last advance.
    pub fn current(&self) -> Option<&MapRow> {
        match &self.state {
            CursorState::Positioned { row, .. } => Some(row),
            _ => None,
        }
    }

    pub fn current_source(&self) -> Option<&IdTuple> {
        self.current().map(|row| &row.source)
    }

    pub fn current_destination(&self) -> Option<&IdTuple> {
        self.current().and_then(|row| row.destination.as_ref())
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, CursorState::Exhausted)
    }

    /// Back to before the first row.
    pub fn rewind(&mut self) {
        self.state = CursorState::NotStarted;
    }
}

impl Iterator for MapCursor<'_> {
    type Item = Result<MapRow>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(true) => self.current().cloned().map(Ok),
            Ok(false) => None,
            Err(err) => Some(Err(err)),
        }
    }
}
