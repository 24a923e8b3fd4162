use crate::codec::{IdInput, IdSchema, IdTuple};
use crate::config::IdMapConfig;
use crate::core::{
    IdMapError, IdType, MapRow, MessageEntry, MessageLevel, Result, RollbackAction, SourceRow,
    Status,
};
use crate::events::MapEventSubscriber;
use crate::facade::cursor::MapCursor;
use crate::facade::messages::MessageIter;
use crate::storage::{ApplyOutcome, DurabilityMode, MapState, PersistenceManager, WalEntry};
use log::{debug, info, warn};
use std::sync::{Arc, Mutex, RwLock};

/// Id map of one migration
///
/// Tracks which destination record every source record became, in what
/// state it was left, and what a rollback should do with it. Messages
/// raised while processing a source row are logged next to the map.
///
/// All operations are synchronous. Writes are serialized through an
/// internal lock; with a `data_dir` configured each write is appended to
/// the WAL as a single record before it becomes visible.
///
/// # Examples
///
/// ```
/// use migrate_idmap::{IdInput, IdMapConfig, IdMapStore, IdType, RollbackAction, Status};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = IdMapConfig::new("d7_node")
///     .source_id("nid", IdType::Integer)
///     .destination_id("id", IdType::Text);
/// let map = IdMapStore::open(config)?;
///
/// map.save_id_mapping(
///     IdInput::named([("nid", 5)]),
///     IdInput::named([("id", "n-5")]),
///     Status::Imported,
///     RollbackAction::Delete,
/// )?;
///
/// assert_eq!(map.imported_count()?, 1);
/// assert_eq!(map.lookup_source_id("n-5")?.map(|s| s.to_string()), Some("(5)".to_string()));
/// # Ok(())
/// # }
/// ```
pub struct IdMapStore {
    config: IdMapConfig,
    source_schema: IdSchema,
    destination_schema: IdSchema,
    state: RwLock<MapState>,
    persistence: Option<Mutex<PersistenceManager>>,
    subscribers: RwLock<Vec<Arc<dyn MapEventSubscriber>>>,
}

impl IdMapStore {
    /// Open the id map described by `config`, recovering any state left on
    /// disk by a previous run.
    pub fn open(config: IdMapConfig) -> Result<Self> {
        config.validate()?;

        let mut state = MapState::new();
        let persistence = match &config.data_dir {
            Some(dir) if config.durability != DurabilityMode::None => {
                let mut manager =
                    PersistenceManager::new(dir, &config.migration_id, config.durability)?;
                manager.wal_mut().set_checkpoint_threshold(config.checkpoint_threshold);
                if let Some(recovered) = manager.recover()? {
                    info!(
                        "Recovered id map '{}': {} rows, {} messages",
                        config.migration_id,
                        recovered.map.row_count(),
                        recovered.messages.count()
                    );
                    state = recovered;
                }
                Some(Mutex::new(manager))
            }
            _ => None,
        };

        debug!(
            "Opened id map '{}' ({})",
            config.migration_id,
            if persistence.is_some() { "durable" } else { "in-memory" }
        );

        Ok(Self {
            source_schema: config.source_schema(),
            destination_schema: config.destination_schema(),
            config,
            state: RwLock::new(state),
            persistence,
            subscribers: RwLock::new(Vec::new()),
        })
    }

    pub fn migration_id(&self) -> &str {
        &self.config.migration_id
    }

    pub fn config(&self) -> &IdMapConfig {
        &self.config
    }

    pub fn source_schema(&self) -> &IdSchema {
        &self.source_schema
    }

    pub fn destination_schema(&self) -> &IdSchema {
        &self.destination_schema
    }

    pub fn is_persistent(&self) -> bool {
        self.persistence.is_some()
    }

    /// Register a subscriber for map save / delete notifications.
    pub fn subscribe(&self, subscriber: Arc<dyn MapEventSubscriber>) -> Result<()> {
        self.subscribers.write()?.push(subscriber);
        Ok(())
    }

    // ========================================================================
    // Mapping store
    // ========================================================================

    /// Insert or overwrite the mapping for `source`.
    ///
    /// An empty `destination` records a row that produced no destination
    /// record (typically `Failed` or `Ignored`). Every call overwrites the
    /// destination, status and rollback action of an existing row.
    pub fn save_id_mapping(
        &self,
        source: impl Into<IdInput>,
        destination: impl Into<IdInput>,
        status: Status,
        rollback_action: RollbackAction,
    ) -> Result<()> {
        let source = self.source_schema.normalize(&source.into())?;
        let destination = self.normalize_destination(destination.into())?;
        self.save_row(MapRow::new(source, destination, status, rollback_action, None))
    }

    /// Like [`save_id_mapping`](Self::save_id_mapping), keyed by the id
    /// columns of `row` and recording its checksum.
    pub fn save_row_mapping(
        &self,
        row: &SourceRow,
        destination: impl Into<IdInput>,
        status: Status,
        rollback_action: RollbackAction,
    ) -> Result<()> {
        let source = row.source_id_values(&self.source_schema)?;
        let destination = self.normalize_destination(destination.into())?;
        let hash = row.hash().map(str::to_string);
        self.save_row(MapRow::new(source, destination, status, rollback_action, hash))
    }

    fn save_row(&self, row: MapRow) -> Result<()> {
        let entry = WalEntry::SaveMapping { row };
        self.write_with(|_| Ok(Some(entry.clone())))?;
        if let WalEntry::SaveMapping { row } = &entry {
            self.notify_save(row)?;
        }
        Ok(())
    }

    /// Flag one row for re-processing.
    pub fn set_update(&self, source: impl Into<IdInput>) -> Result<()> {
        let source = self.source_schema.normalize(&source.into())?;
        self.write_with(|state| {
            if !state.map.contains(&source.key()) {
                return Err(IdMapError::RowNotFound(source.to_string()));
            }
            Ok(Some(WalEntry::SetStatus {
                source: source.clone(),
                status: Status::NeedsUpdate,
            }))
        })?;
        debug!("Flagged {} for update in '{}'", source, self.migration_id());
        Ok(())
    }

    /// Flag every imported row for re-processing. Failed and ignored rows
    /// keep their status. Returns the number of rows flagged.
    pub fn prepare_update(&self) -> Result<usize> {
        let outcome = self.write_with(|_| {
            Ok(Some(WalEntry::TransitionAll {
                from: Status::Imported,
                to: Status::NeedsUpdate,
            }))
        })?;
        info!("Flagged {} rows for update in '{}'", outcome.changed, self.migration_id());
        Ok(outcome.changed)
    }

    pub fn get_row_by_source(&self, source: impl Into<IdInput>) -> Result<Option<MapRow>> {
        let source = self.source_schema.normalize(&source.into())?;
        let state = self.state.read()?;
        Ok(state.map.get(&source.key()).cloned())
    }

    /// All rows currently pointing at `destination`.
    pub fn get_row_by_destination(&self, destination: impl Into<IdInput>) -> Result<Vec<MapRow>> {
        let destination = self.destination_schema.normalize(&destination.into())?;
        let state = self.state.read()?;
        Ok(state
            .map
            .find_by_destination(&destination.key())
            .into_iter()
            .cloned()
            .collect())
    }

    /// Up to `count` rows flagged for update, oldest first.
    pub fn get_rows_needing_update(&self, count: usize) -> Result<Vec<MapRow>> {
        let state = self.state.read()?;
        Ok(state
            .map
            .with_status(Status::NeedsUpdate, count)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Destination ids of every row whose source id starts with `source`.
    /// `source` may name the full id or any leading subset of its columns.
    pub fn lookup_destination_ids(&self, source: impl Into<IdInput>) -> Result<Vec<IdTuple>> {
        let prefix = self.source_schema.normalize_prefix(&source.into())?;
        let state = self.state.read()?;
        Ok(state
            .map
            .find_by_source_prefix(&prefix)
            .into_iter()
            .filter_map(|row| row.destination.clone())
            .collect())
    }

    /// First result of [`lookup_destination_ids`](Self::lookup_destination_ids).
    pub fn lookup_destination_id(&self, source: impl Into<IdInput>) -> Result<Option<IdTuple>> {
        Ok(self.lookup_destination_ids(source)?.into_iter().next())
    }

    pub fn lookup_source_id(&self, destination: impl Into<IdInput>) -> Result<Option<IdTuple>> {
        let destination = self.destination_schema.normalize(&destination.into())?;
        let state = self.state.read()?;
        Ok(state
            .map
            .find_by_destination(&destination.key())
            .first()
            .map(|row| row.source.clone()))
    }

    /// Highest destination id recorded so far. Only defined for a single
    /// integer destination column.
    pub fn highest_destination_id(&self) -> Result<Option<i64>> {
        let columns = self.destination_schema.columns();
        if columns.len() != 1 || columns[0].id_type != IdType::Integer {
            return Err(IdMapError::InvalidIdentifier(format!(
                "highest id needs a single INTEGER destination column in '{}'",
                self.migration_id()
            )));
        }
        let state = self.state.read()?;
        Ok(state
            .map
            .rows()
            .filter_map(|row| row.destination.as_ref())
            .filter_map(|dest| dest.get(0).and_then(|v| v.as_i64()))
            .max())
    }

    pub fn processed_count(&self) -> Result<usize> {
        Ok(self.state.read()?.map.row_count())
    }

    pub fn imported_count(&self) -> Result<usize> {
        self.count_status(Status::Imported)
    }

    pub fn update_count(&self) -> Result<usize> {
        self.count_status(Status::NeedsUpdate)
    }

    pub fn error_count(&self) -> Result<usize> {
        self.count_status(Status::Failed)
    }

    pub fn ignored_count(&self) -> Result<usize> {
        self.count_status(Status::Ignored)
    }

    fn count_status(&self, status: Status) -> Result<usize> {
        Ok(self.state.read()?.map.count_status(status))
    }

    /// Remove the row for `source` together with its messages, or only its
    /// messages when `messages_only` is set.
    pub fn delete(&self, source: impl Into<IdInput>, messages_only: bool) -> Result<()> {
        let source = self.source_schema.normalize(&source.into())?;
        let outcome = self.write_with(|_| {
            Ok(Some(if messages_only {
                WalEntry::DeleteMessages { source: source.clone() }
            } else {
                WalEntry::DeleteMapping { source: source.clone() }
            }))
        })?;
        self.notify_delete(&outcome)
    }

    /// Remove every row pointing at `destination`, with their messages.
    pub fn delete_destination(&self, destination: impl Into<IdInput>) -> Result<()> {
        let destination = self.destination_schema.normalize(&destination.into())?;
        let outcome = self.write_with(|state| {
            if state.map.find_by_destination(&destination.key()).is_empty() {
                return Ok(None);
            }
            Ok(Some(WalEntry::DeleteDestination { destination: destination.clone() }))
        })?;
        self.notify_delete(&outcome)
    }

    /// Drop all rows, all messages and every file of this id map.
    pub fn destroy(&self) -> Result<()> {
        let mut state = self.state.write()?;
        if let Some(persistence) = &self.persistence {
            persistence.lock()?.destroy()?;
        }
        state.clear();
        info!("Destroyed id map '{}'", self.migration_id());
        Ok(())
    }

    // ========================================================================
    // Message log
    // ========================================================================

    /// Append a message for `source`. Earlier messages are kept.
    pub fn save_message(
        &self,
        source: impl Into<IdInput>,
        message: impl Into<String>,
        level: MessageLevel,
    ) -> Result<()> {
        let source = self.source_schema.normalize(&source.into())?;
        let message = message.into();
        self.write_with(|state| {
            Ok(Some(WalEntry::AppendMessage {
                entry: MessageEntry {
                    id: state.messages.peek_next_id(),
                    source: source.clone(),
                    message: message.clone(),
                    level,
                },
            }))
        })?;
        Ok(())
    }

    /// Lazily iterate messages, optionally only those of sources starting
    /// with `source` and only those of `level`. Every call starts over.
    pub fn get_message_iterator(
        &self,
        source: Option<IdInput>,
        level: Option<MessageLevel>,
    ) -> Result<MessageIter<'_>> {
        let prefix = match source {
            Some(input) if !input.is_empty() => Some(self.source_schema.normalize_prefix(&input)?),
            _ => None,
        };
        Ok(MessageIter::new(self, prefix, level))
    }

    pub fn message_count(&self) -> Result<usize> {
        Ok(self.state.read()?.messages.count())
    }

    /// Drop every message; map rows are untouched.
    pub fn clear_messages(&self) -> Result<()> {
        self.write_with(|state| {
            Ok((state.messages.count() > 0).then_some(WalEntry::ClearMessages))
        })?;
        Ok(())
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// A fresh cursor positioned before the first row.
    pub fn cursor(&self) -> MapCursor<'_> {
        MapCursor::new(self)
    }

    pub(crate) fn row_after(&self, after: Option<u64>) -> Result<Option<(u64, MapRow)>> {
        let state = self.state.read()?;
        Ok(state.map.next_after(after).map(|(seq, row)| (seq, row.clone())))
    }

    pub(crate) fn message_after(
        &self,
        after: Option<u64>,
        source: Option<&IdTuple>,
        level: Option<MessageLevel>,
    ) -> Result<Option<MessageEntry>> {
        let state = self.state.read()?;
        Ok(state.messages.next_matching(after, source, level).cloned())
    }

    // ========================================================================
    // Durability
    // ========================================================================

    /// Write a snapshot now and truncate the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        let state = self.state.read()?;
        if let Some(persistence) = &self.persistence {
            persistence.lock()?.checkpoint(&state)?;
        }
        Ok(())
    }

    /// Build a WAL entry against the current state, log it and apply it,
    /// all under the write lock. `build` returning `None` means there is
    /// nothing to write.
    fn write_with<F>(&self, build: F) -> Result<ApplyOutcome>
    where
        F: FnOnce(&MapState) -> Result<Option<WalEntry>>,
    {
        let mut state = self.state.write()?;
        let Some(entry) = build(&state)? else {
            return Ok(ApplyOutcome::default());
        };

        let Some(persistence) = &self.persistence else {
            return Ok(state.apply(&entry));
        };

        let mut persistence = persistence.lock()?;
        persistence.log(&entry)?;
        let outcome = state.apply(&entry);
        if persistence.needs_checkpoint()
            && let Err(err) = persistence.checkpoint(&state)
        {
            // The entry is already in the WAL; a failed snapshot only
            // delays truncation.
            warn!("Checkpoint of id map '{}' failed: {}", self.migration_id(), err);
        }
        Ok(outcome)
    }

    fn normalize_destination(&self, destination: IdInput) -> Result<Option<IdTuple>> {
        if destination.is_empty() {
            return Ok(None);
        }
        self.destination_schema.normalize(&destination).map(Some)
    }

    fn notify_save(&self, row: &MapRow) -> Result<()> {
        for subscriber in self.subscribers.read()?.iter() {
            subscriber.on_map_save(self.migration_id(), row);
        }
        Ok(())
    }

    fn notify_delete(&self, outcome: &ApplyOutcome) -> Result<()> {
        if outcome.removed.is_empty() {
            return Ok(());
        }
        let subscribers = self.subscribers.read()?;
        for row in &outcome.removed {
            for subscriber in subscribers.iter() {
                subscriber.on_map_delete(self.migration_id(), &row.source);
            }
        }
        Ok(())
    }
}
