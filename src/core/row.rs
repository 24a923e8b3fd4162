use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};
use crate::codec::{IdInput, IdSchema, IdTuple};
use crate::core::{IdValue, MapRow, Result};

/// A source record as handed over by the extraction side of a migration.
///
/// The id map only reads the id columns out of it and keeps a checksum of
/// the whole record so a later run can tell whether the source changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRow {
    fields: Map<String, JsonValue>,
    hash: Option<String>,
}

impl SourceRow {
    pub fn new(fields: Map<String, JsonValue>) -> Self {
        Self { fields, hash: None }
    }

    pub fn get(&self, name: &str) -> Option<&JsonValue> {
        self.fields.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<JsonValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn fields(&self) -> &Map<String, JsonValue> {
        &self.fields
    }

    /// Extract the source id tuple using the configured id columns.
    pub fn source_id_values(&self, schema: &IdSchema) -> Result<IdTuple> {
        let mut pairs = Vec::with_capacity(schema.len());
        for column in schema.columns() {
            if let Some(value) = self.fields.get(&column.name) {
                pairs.push((column.name.clone(), IdValue::from_json(&column.name, value)?));
            }
        }
        schema.normalize(&IdInput::Named(pairs))
    }

    /// Recompute the checksum of the source fields.
    pub fn rehash(&mut self) -> &str {
        // serde_json's default map is ordered by key, so the encoding is stable.
        let encoded = JsonValue::Object(self.fields.clone()).to_string();
        self.hash.insert(hex::encode(Sha256::digest(encoded.as_bytes()))).as_str()
    }

    pub fn hash(&self) -> Option<&str> {
        self.hash.as_deref()
    }

    /// Whether the source record differs from what was saved for `existing`.
    pub fn changed(&self, existing: &MapRow) -> bool {
        self.hash.as_deref() != existing.hash.as_deref()
    }
}

impl From<Map<String, JsonValue>> for SourceRow {
    fn from(fields: Map<String, JsonValue>) -> Self {
        Self::new(fields)
    }
}
