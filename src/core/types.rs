use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::codec::IdTuple;

/// Processing status of a source row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Imported = 0,
    NeedsUpdate = 1,
    Ignored = 2,
    Failed = 3,
}

impl Status {
    pub fn code(&self) -> u8 {
        *self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Imported),
            1 => Some(Self::NeedsUpdate),
            2 => Some(Self::Ignored),
            3 => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Imported => write!(f, "IMPORTED"),
            Self::NeedsUpdate => write!(f, "NEEDS_UPDATE"),
            Self::Ignored => write!(f, "IGNORED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// What a rollback does with the destination record of a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RollbackAction {
    #[default]
    Delete = 0,
    Preserve = 1,
}

impl RollbackAction {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

/// Severity of a migration message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum MessageLevel {
    #[default]
    Error = 1,
    Warning = 2,
    Notice = 3,
    Informational = 4,
}

impl MessageLevel {
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Notice => write!(f, "notice"),
            Self::Informational => write!(f, "informational"),
        }
    }
}

/// One row of the map table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapRow {
    pub source: IdTuple,
    /// `None` for rows that never produced a destination record.
    pub destination: Option<IdTuple>,
    pub status: Status,
    pub rollback_action: RollbackAction,
    /// Checksum of the source record at the time it was last saved.
    pub hash: Option<String>,
    pub source_ids_hash: String,
    pub last_imported: DateTime<Utc>,
}

impl MapRow {
    pub fn new(
        source: IdTuple,
        destination: Option<IdTuple>,
        status: Status,
        rollback_action: RollbackAction,
        hash: Option<String>,
    ) -> Self {
        let source_ids_hash = source.key().digest();
        Self {
            source,
            destination,
            status,
            rollback_action,
            hash,
            source_ids_hash,
            last_imported: Utc::now(),
        }
    }
}

/// One entry of the message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEntry {
    /// Monotonic id giving the append order.
    pub id: u64,
    pub source: IdTuple,
    pub message: String,
    pub level: MessageLevel,
}
