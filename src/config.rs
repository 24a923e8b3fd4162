use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use crate::codec::{IdColumn, IdSchema};
use crate::core::{IdMapError, IdType, Result};
use crate::storage::DurabilityMode;

lazy_static! {
    static ref MIGRATION_ID: Regex = Regex::new(r"^[A-Za-z0-9_:\-]+$").expect("static regex");
    static ref COLUMN_NAME: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex");
}

fn default_checkpoint_threshold() -> usize {
    1000
}

/// Id map configuration
///
/// One configuration per migration: the migration's name and the id columns
/// on either side, plus where (and how durably) the map is kept.
#[derive(Debug, Clone, Deserialize)]
pub struct IdMapConfig {
    /// Migration id, e.g. `d7_node` or `d7_node:article`
    pub migration_id: String,

    /// Source id columns, in key order
    pub source_ids: Vec<IdColumn>,

    /// Destination id columns, in key order
    pub destination_ids: Vec<IdColumn>,

    /// Directory holding the WAL and snapshot; in-memory only when unset
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    /// WAL durability
    #[serde(default)]
    pub durability: DurabilityMode,

    /// WAL records between automatic snapshots
    #[serde(default = "default_checkpoint_threshold")]
    pub checkpoint_threshold: usize,
}

impl IdMapConfig {
    /// Create a new configuration with no id columns yet
    pub fn new(migration_id: &str) -> Self {
        Self {
            migration_id: migration_id.to_string(),
            source_ids: Vec::new(),
            destination_ids: Vec::new(),
            data_dir: None,
            durability: DurabilityMode::default(),
            checkpoint_threshold: default_checkpoint_threshold(),
        }
    }

    /// Append a source id column
    pub fn source_id(mut self, name: &str, id_type: IdType) -> Self {
        self.source_ids.push(IdColumn::new(name, id_type));
        self
    }

    /// Append a destination id column
    pub fn destination_id(mut self, name: &str, id_type: IdType) -> Self {
        self.destination_ids.push(IdColumn::new(name, id_type));
        self
    }

    /// Keep the map on disk under `dir`
    pub fn data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Set WAL durability
    pub fn durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    /// Set the number of WAL records between snapshots
    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold;
        self
    }

    /// Parse from a JSON document
    ///
    /// ```
    /// # use migrate_idmap::IdMapConfig;
    /// let config = IdMapConfig::from_json_str(r#"{
    ///     "migration_id": "d7_user",
    ///     "source_ids": [{"name": "uid", "type": "integer"}],
    ///     "destination_ids": [{"name": "uid", "type": "integer"}]
    /// }"#).unwrap();
    /// assert_eq!(config.source_ids.len(), 1);
    /// ```
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| IdMapError::Config(format!("Invalid id map configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            IdMapError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn source_schema(&self) -> IdSchema {
        IdSchema::new(self.source_ids.clone())
    }

    pub fn destination_schema(&self) -> IdSchema {
        IdSchema::new(self.destination_ids.clone())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !MIGRATION_ID.is_match(&self.migration_id) {
            return Err(IdMapError::Config(format!(
                "Invalid migration id '{}'",
                self.migration_id
            )));
        }

        validate_columns("source", &self.source_ids)?;
        validate_columns("destination", &self.destination_ids)?;

        if self.checkpoint_threshold == 0 {
            return Err(IdMapError::Config("checkpoint_threshold must be > 0".to_string()));
        }

        Ok(())
    }
}

fn validate_columns(side: &str, columns: &[IdColumn]) -> Result<()> {
    if columns.is_empty() {
        return Err(IdMapError::Config(format!("At least one {} id column is required", side)));
    }
    let mut seen = HashSet::new();
    for column in columns {
        if !COLUMN_NAME.is_match(&column.name) {
            return Err(IdMapError::Config(format!(
                "Invalid {} id column name '{}'",
                side, column.name
            )));
        }
        if !seen.insert(column.name.as_str()) {
            return Err(IdMapError::Config(format!(
                "Duplicate {} id column '{}'",
                side, column.name
            )));
        }
    }
    Ok(())
}
