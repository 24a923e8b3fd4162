pub mod error;
pub mod row;
pub mod types;
pub mod value;

pub use error::{IdMapError, Result};
pub use row::SourceRow;
pub use types::{MapRow, MessageEntry, MessageLevel, RollbackAction, Status};
pub use value::{IdType, IdValue};
