use crate::core::MapRow;
use crate::storage::messages::MessageTable;
use crate::storage::persistence::WalEntry;
use crate::storage::table::MapTable;
use serde::{Deserialize, Serialize};

/// Both logical tables of one migration's id map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapState {
    pub map: MapTable,
    pub messages: MessageTable,
}

/// What applying a single WAL entry did.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// Map rows removed by the entry.
    pub removed: Vec<MapRow>,
    /// Rows (or messages) whose state changed.
    pub changed: usize,
}

impl MapState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one mutation. Live writes and WAL replay both go through here,
    /// so recovery reproduces exactly what the running store did.
    pub fn apply(&mut self, entry: &WalEntry) -> ApplyOutcome {
        let mut outcome = ApplyOutcome::default();
        match entry {
            WalEntry::SaveMapping { row } => {
                self.map.upsert(row.clone());
                outcome.changed = 1;
            }
            WalEntry::SetStatus { source, status } => {
                if self.map.set_status(&source.key(), *status) {
                    outcome.changed = 1;
                }
            }
            WalEntry::TransitionAll { from, to } => {
                outcome.changed = self.map.transition_all(*from, *to);
            }
            WalEntry::DeleteMapping { source } => {
                if let Some(row) = self.map.remove(&source.key()) {
                    outcome.removed.push(row);
                }
                outcome.changed = self.messages.remove_for_source(source);
            }
            WalEntry::DeleteMessages { source } => {
                outcome.changed = self.messages.remove_for_source(source);
            }
            WalEntry::DeleteDestination { destination } => {
                let removed = self.map.remove_by_destination(&destination.key());
                for row in &removed {
                    outcome.changed += self.messages.remove_for_source(&row.source);
                }
                outcome.removed = removed;
            }
            WalEntry::AppendMessage { entry } => {
                self.messages.append(entry.clone());
                outcome.changed = 1;
            }
            WalEntry::ClearMessages => {
                outcome.changed = self.messages.count();
                self.messages.clear();
            }
        }
        outcome
    }

    /// Rebuild indexes after the state was deserialized.
    pub fn reindex(&mut self) {
        self.map.reindex();
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.messages.clear();
    }
}
