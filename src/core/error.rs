use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdMapError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Row not found for source id {0}")]
    RowNotFound(String),

    #[error("Storage I/O error: {0}")]
    StorageIo(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, IdMapError>;

impl<T> From<std::sync::PoisonError<T>> for IdMapError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for IdMapError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageIo(err.to_string())
    }
}
