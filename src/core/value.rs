use std::fmt;
use serde::{Deserialize, Serialize};
use crate::core::{IdMapError, Result};

/// A single scalar component of a source or destination id tuple.
///
/// Equality is type-preserving: `Integer(5)` and `Text("5")` are different
/// values. Columns declared as [`IdType::Text`] coerce integers before they
/// reach this type, which is the only way the two can meet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IdValue {
    Integer(i64),
    Text(String),
}

impl IdValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Integer(_) => "INTEGER",
            Self::Text(_) => "TEXT",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Integer(_) => None,
        }
    }

    /// Convert a JSON value of id column `column` into an id value. Only
    /// integers in the `i64` range and strings can take part in an
    /// identifier.
    pub fn from_json(column: &str, value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Self::Integer(i))
                } else if n.is_u64() {
                    Err(IdMapError::InvalidIdentifier(format!(
                        "id column '{}' holds {}, out of range for a 64-bit integer id",
                        column, n
                    )))
                } else {
                    Err(IdMapError::InvalidIdentifier(format!(
                        "id column '{}' holds {}, not an integer",
                        column, n
                    )))
                }
            }
            other => Err(IdMapError::InvalidIdentifier(format!(
                "id column '{}' holds a non-scalar value: {}",
                column, other
            ))),
        }
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{}", i),
            Self::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for IdValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<i32> for IdValue {
    fn from(i: i32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<u32> for IdValue {
    fn from(i: u32) -> Self {
        Self::Integer(i64::from(i))
    }
}

impl From<String> for IdValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for IdValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Declared type of an id column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdType {
    Integer,
    Text,
    /// Untyped: values keep whatever type the caller supplied.
    #[default]
    Any,
}

impl IdType {
    /// Bring a supplied value in line with the column type.
    pub fn coerce(&self, column: &str, value: IdValue) -> Result<IdValue> {
        match (self, value) {
            (Self::Any, v) => Ok(v),
            (Self::Integer, v @ IdValue::Integer(_)) => Ok(v),
            (Self::Integer, IdValue::Text(s)) => Err(IdMapError::InvalidIdentifier(format!(
                "Column '{}' expects type INTEGER, got TEXT '{}'",
                column, s
            ))),
            (Self::Text, v @ IdValue::Text(_)) => Ok(v),
            (Self::Text, IdValue::Integer(i)) => Ok(IdValue::Text(i.to_string())),
        }
    }
}

impl fmt::Display for IdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer => write!(f, "INTEGER"),
            Self::Text => write!(f, "TEXT"),
            Self::Any => write!(f, "ANY"),
        }
    }
}
