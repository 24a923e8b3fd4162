use crate::codec::IdTuple;
use crate::core::{MessageEntry, MessageLevel, Result};
use crate::facade::IdMapStore;

/// Lazy, filtered walk over the message log in append order.
pub struct MessageIter<'a> {
    store: &'a IdMapStore,
    source: Option<IdTuple>,
    level: Option<MessageLevel>,
    last_id: Option<u64>,
    done: bool,
}

impl<'a> MessageIter<'a> {
    pub(crate) fn new(store: &'a IdMapStore, source: Option<IdTuple>, level: Option<MessageLevel>) -> Self {
        Self {
            store,
            source,
            level,
            last_id: None,
            done: false,
        }
    }
}

impl Iterator for MessageIter<'_> {
    type Item = Result<MessageEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.store.message_after(self.last_id, self.source.as_ref(), self.level) {
            Ok(Some(entry)) => {
                self.last_id = Some(entry.id);
                Some(Ok(entry))
            }
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
