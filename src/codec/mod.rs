//! Identifier codec
//!
//! Source and destination records are identified by ordered tuples of
//! scalar values. Callers hand them in either positionally or keyed by
//! column name; everything past this module only ever sees the normalized
//! [`IdTuple`] and its [`IdKey`].

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use crate::core::{IdMapError, IdType, IdValue, Result};

// ============================================================================
// Columns and schema
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub id_type: IdType,
}

impl IdColumn {
    pub fn new(name: impl Into<String>, id_type: IdType) -> Self {
        Self {
            name: name.into(),
            id_type,
        }
    }

    pub fn untyped(name: impl Into<String>) -> Self {
        Self::new(name, IdType::Any)
    }
}

/// Ordered id columns of one side (source or destination) of a migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdSchema {
    columns: Vec<IdColumn>,
}

impl IdSchema {
    pub fn new(columns: Vec<IdColumn>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[IdColumn] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    /// Normalize a complete id tuple.
    ///
    /// Positional input must have exactly one value per column. Named input
    /// must carry every column; names outside the schema are ignored, since
    /// callers typically pass a whole source record.
    pub fn normalize(&self, input: &IdInput) -> Result<IdTuple> {
        match input {
            IdInput::List(values) => {
                if values.len() != self.columns.len() {
                    return Err(IdMapError::InvalidIdentifier(format!(
                        "wrong length: expected {} id values ({}), got {}",
                        self.columns.len(),
                        self.column_names(),
                        values.len()
                    )));
                }
                self.coerce_positional(values)
            }
            IdInput::Named(pairs) => {
                let mut out = Vec::with_capacity(self.columns.len());
                for column in &self.columns {
                    let value = lookup_named(pairs, &column.name).ok_or_else(|| {
                        IdMapError::InvalidIdentifier(format!(
                            "missing id column '{}'",
                            column.name
                        ))
                    })?;
                    out.push(column.id_type.coerce(&column.name, value.clone())?);
                }
                Ok(IdTuple(out))
            }
        }
    }

    /// Normalize a leading subset of the id columns.
    ///
    /// Positional input may hold between one and `len()` values. Named input
    /// must name a contiguous prefix of the columns and nothing else.
    pub fn normalize_prefix(&self, input: &IdInput) -> Result<IdTuple> {
        match input {
            IdInput::List(values) => {
                if values.is_empty() || values.len() > self.columns.len() {
                    return Err(IdMapError::InvalidIdentifier(format!(
                        "wrong length: expected 1 to {} id values ({}), got {}",
                        self.columns.len(),
                        self.column_names(),
                        values.len()
                    )));
                }
                self.coerce_positional(values)
            }
            IdInput::Named(pairs) => {
                for (name, _) in pairs {
                    if self.find_column_index(name).is_none() {
                        return Err(IdMapError::InvalidIdentifier(format!(
                            "unknown id column '{}'",
                            name
                        )));
                    }
                }

                let mut out = Vec::new();
                for column in &self.columns {
                    match lookup_named(pairs, &column.name) {
                        Some(value) => out.push(column.id_type.coerce(&column.name, value.clone())?),
                        None => break,
                    }
                }

                if out.is_empty() {
                    return Err(IdMapError::InvalidIdentifier(format!(
                        "no leading id column given, expected '{}'",
                        self.columns.first().map(|c| c.name.as_str()).unwrap_or_default()
                    )));
                }
                let distinct = pairs
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .collect::<std::collections::HashSet<_>>()
                    .len();
                if distinct != out.len() {
                    return Err(IdMapError::InvalidIdentifier(format!(
                        "id columns given do not form a prefix of ({})",
                        self.column_names()
                    )));
                }
                Ok(IdTuple(out))
            }
        }
    }

    fn coerce_positional(&self, values: &[IdValue]) -> Result<IdTuple> {
        self.columns
            .iter()
            .zip(values.iter())
            .map(|(column, value)| column.id_type.coerce(&column.name, value.clone()))
            .collect::<Result<Vec<_>>>()
            .map(IdTuple)
    }

    fn column_names(&self) -> String {
        self.columns
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn lookup_named<'a>(pairs: &'a [(String, IdValue)], name: &str) -> Option<&'a IdValue> {
    pairs.iter().find(|(n, _)| n == name).map(|(_, v)| v)
}

// ============================================================================
// Input
// ============================================================================

/// Id tuple as supplied by a caller, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum IdInput {
    List(Vec<IdValue>),
    Named(Vec<(String, IdValue)>),
}

impl IdInput {
    /// No values at all. Accepted as a destination for rows that never
    /// produced one (failed or ignored rows).
    pub fn empty() -> Self {
        Self::List(Vec::new())
    }

    pub fn list<V: Into<IdValue>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }

    pub fn named<K: Into<String>, V: Into<IdValue>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        Self::Named(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::List(values) => values.is_empty(),
            Self::Named(pairs) => pairs.is_empty(),
        }
    }
}

impl From<Vec<IdValue>> for IdInput {
    fn from(values: Vec<IdValue>) -> Self {
        Self::List(values)
    }
}

impl From<IdValue> for IdInput {
    fn from(value: IdValue) -> Self {
        Self::List(vec![value])
    }
}

impl From<i64> for IdInput {
    fn from(value: i64) -> Self {
        Self::List(vec![IdValue::Integer(value)])
    }
}

impl From<i32> for IdInput {
    fn from(value: i32) -> Self {
        Self::List(vec![IdValue::from(value)])
    }
}

impl From<&str> for IdInput {
    fn from(value: &str) -> Self {
        Self::List(vec![IdValue::from(value)])
    }
}

impl From<String> for IdInput {
    fn from(value: String) -> Self {
        Self::List(vec![IdValue::Text(value)])
    }
}

impl From<IdTuple> for IdInput {
    fn from(tuple: IdTuple) -> Self {
        Self::List(tuple.0)
    }
}

impl From<&IdTuple> for IdInput {
    fn from(tuple: &IdTuple) -> Self {
        Self::List(tuple.0.clone())
    }
}

impl From<BTreeMap<String, IdValue>> for IdInput {
    fn from(map: BTreeMap<String, IdValue>) -> Self {
        Self::Named(map.into_iter().collect())
    }
}

impl From<HashMap<String, IdValue>> for IdInput {
    fn from(map: HashMap<String, IdValue>) -> Self {
        Self::Named(map.into_iter().collect())
    }
}

// ============================================================================
// Normalized tuple and key
// ============================================================================

/// Normalized, schema-ordered id values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdTuple(Vec<IdValue>);

impl IdTuple {
    pub fn new(values: Vec<IdValue>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[IdValue] {
        &self.0
    }

    pub fn into_values(self) -> Vec<IdValue> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&IdValue> {
        self.0.get(index)
    }

    pub fn starts_with(&self, prefix: &IdTuple) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn key(&self) -> IdKey {
        IdKey::of(&self.0)
    }
}

impl From<Vec<IdValue>> for IdTuple {
    fn from(values: Vec<IdValue>) -> Self {
        Self(values)
    }
}

impl fmt::Display for IdTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", value)?;
        }
        write!(f, ")")
    }
}

/// Stable lookup key for an id tuple.
///
/// Every component is written as a type tag, its byte length and its bytes
/// (`i1:5`, `s3:abc`), so two keys are equal exactly when the tuples are
/// element-wise equal including type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdKey(String);

impl IdKey {
    pub fn of(values: &[IdValue]) -> Self {
        let mut out = String::new();
        for value in values {
            match value {
                IdValue::Integer(i) => {
                    let digits = i.to_string();
                    out.push_str(&format!("i{}:{}", digits.len(), digits));
                }
                IdValue::Text(s) => {
                    out.push_str(&format!("s{}:{}", s.len(), s));
                }
            }
        }
        Self(out)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-256 hex digest of the key, the fixed-width form kept alongside
    /// persisted rows.
    pub fn digest(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl fmt::Display for IdKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
