use crate::codec::IdTuple;
use crate::core::MapRow;

/// Receives notifications about map table writes.
///
/// Subscribers run synchronously on the writing thread, after the write has
/// been made durable and applied. Both hooks default to doing nothing.
pub trait MapEventSubscriber: Send + Sync {
    /// A row was inserted or overwritten.
    fn on_map_save(&self, _migration_id: &str, _row: &MapRow) {}

    /// The row for `source` was removed from the map.
    fn on_map_delete(&self, _migration_id: &str, _source: &IdTuple) {}
}
