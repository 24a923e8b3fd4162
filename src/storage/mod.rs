pub mod messages;
pub mod persistence;
pub mod state;
pub mod table;

pub use messages::MessageTable;
pub use persistence::{DurabilityMode, MapSnapshot, PersistenceManager, SnapshotManager, WalEntry, WalManager};
pub use state::{ApplyOutcome, MapState};
pub use table::MapTable;
