// ============================================================================
// migrate_idmap Library
// ============================================================================

pub mod codec;
pub mod config;
pub mod core;
pub mod events;
pub mod facade;
pub mod rollback;
pub mod storage;

// Re-export main types for convenience
pub use codec::{IdColumn, IdInput, IdKey, IdSchema, IdTuple};
pub use config::IdMapConfig;
pub use core::{
    IdMapError, IdType, IdValue, MapRow, MessageEntry, MessageLevel, Result, RollbackAction,
    SourceRow, Status,
};
pub use events::MapEventSubscriber;
pub use facade::{IdMapStore, MapCursor, MessageIter};
pub use rollback::{
    DestinationDeleter, FailedRowPolicy, RollbackCoordinator, RollbackFailure, RollbackReport,
};
pub use storage::DurabilityMode;
