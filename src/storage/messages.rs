use crate::codec::IdTuple;
use crate::core::{MessageEntry, MessageLevel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Append-only message log. Entries are keyed by an auto-increment id so
/// scans come back in append order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageTable {
    entries: BTreeMap<u64, MessageEntry>,
    next_id: u64,
}

impl MessageTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id the next appended entry will receive.
    pub fn peek_next_id(&self) -> u64 {
        self.next_id
    }

    pub fn append(&mut self, entry: MessageEntry) {
        self.next_id = self.next_id.max(entry.id + 1);
        self.entries.insert(entry.id, entry);
    }

    /// First entry after `after` matching the filters.
    pub fn next_matching(
        &self,
        after: Option<u64>,
        source_prefix: Option<&IdTuple>,
        level: Option<MessageLevel>,
    ) -> Option<&MessageEntry> {
        let start = after.map(|id| id + 1).unwrap_or(0);
        self.entries
            .range(start..)
            .map(|(_, entry)| entry)
            .find(|entry| {
                source_prefix.is_none_or(|prefix| entry.source.starts_with(prefix))
                    && level.is_none_or(|level| entry.level == level)
            })
    }

    pub fn remove_for_source(&mut self, source: &IdTuple) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| &entry.source != source);
        before - self.entries.len()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Drop every entry. Ids keep increasing so old iterators never pick up
    /// entries appended after the clear under a reused id.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::IdValue;

    fn entry(id: u64, src: i64, level: MessageLevel) -> MessageEntry {
        MessageEntry {
            id,
            source: IdTuple::new(vec![IdValue::Integer(src)]),
            message: format!("message {}", id),
            level,
        }
    }

    #[test]
    fn test_append_and_filter() {
        let mut table = MessageTable::new();
        table.append(entry(0, 1, MessageLevel::Error));
        table.append(entry(1, 2, MessageLevel::Warning));
        table.append(entry(2, 1, MessageLevel::Warning));

        let src = IdTuple::new(vec![IdValue::Integer(1)]);
        let first = table.next_matching(None, Some(&src), None).unwrap();
        assert_eq!(first.id, 0);
        let second = table.next_matching(Some(first.id), Some(&src), None).unwrap();
        assert_eq!(second.id, 2);
        assert!(table.next_matching(Some(2), Some(&src), None).is_none());

        let warning = table.next_matching(None, None, Some(MessageLevel::Warning)).unwrap();
        assert_eq!(warning.id, 1);
    }

    #[test]
    fn test_remove_for_source_and_clear_keep_ids_monotonic() {
        let mut table = MessageTable::new();
        table.append(entry(0, 1, MessageLevel::Error));
        table.append(entry(1, 1, MessageLevel::Error));
        assert_eq!(table.remove_for_source(&IdTuple::new(vec![IdValue::Integer(1)])), 2);
        table.clear();
        assert_eq!(table.count(), 0);
        assert_eq!(table.peek_next_id(), 2);
    }
}
