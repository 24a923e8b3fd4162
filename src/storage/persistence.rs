//! Write-ahead log and snapshots for durable id maps

use crate::codec::IdTuple;
use crate::core::{IdMapError, MapRow, MessageEntry, Result, Status};
use crate::storage::state::MapState;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

// ============================================================================
// WAL Entry Types
// ============================================================================

/// One mutation of the id map. Each public write operation produces exactly
/// one entry, so a record is either fully in the log or not at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalEntry {
    SaveMapping { row: MapRow },
    SetStatus { source: IdTuple, status: Status },
    TransitionAll { from: Status, to: Status },
    DeleteMapping { source: IdTuple },
    DeleteMessages { source: IdTuple },
    DeleteDestination { destination: IdTuple },
    AppendMessage { entry: MessageEntry },
    ClearMessages,
}

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct MapSnapshot {
    pub version: u32,
    pub migration_id: String,
    pub state: MapState,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: DateTime<Utc>,
    pub row_count: usize,
    pub message_count: usize,
}

impl MapSnapshot {
    pub fn new(migration_id: impl Into<String>, state: MapState) -> Self {
        let row_count = state.map.row_count();
        let message_count = state.messages.count();
        Self {
            version: 1,
            migration_id: migration_id.into(),
            state,
            metadata: SnapshotMetadata {
                created_at: Utc::now(),
                row_count,
                message_count,
            },
        }
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DurabilityMode {
    /// fsync after every appended record.
    Sync,
    /// Flush to the OS after every record, no fsync.
    #[default]
    Async,
    /// Nothing is written to disk.
    None,
}

// ============================================================================
// WAL Manager
// ============================================================================

pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<BufWriter<File>>,
    durability_mode: DurabilityMode,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
    #[cfg(test)]
    fail_next_flush: bool,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        if let Some(parent) = wal_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                IdMapError::StorageIo(format!("Failed to create WAL directory: {}", e))
            })?;
        }

        Ok(Self {
            wal_path,
            wal_file: None,
            durability_mode,
            entries_since_checkpoint: 0,
            checkpoint_threshold: 1000,
            #[cfg(test)]
            fail_next_flush: false,
        })
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        if self.wal_file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.wal_path)
                .map_err(|e| IdMapError::StorageIo(format!("Failed to open WAL file: {}", e)))?;
            self.wal_file = Some(BufWriter::new(file));
        }
        self.wal_file
            .as_mut()
            .ok_or_else(|| IdMapError::StorageIo("WAL file not initialized".to_string()))
    }

    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let serialized = rmp_serde::to_vec(entry).map_err(|e| {
            IdMapError::StorageIo(format!("Failed to serialize WAL entry: {}", e))
        })?;
        let len = serialized.len() as u32;
        let sync = self.durability_mode == DurabilityMode::Sync;

        // Length prefix and payload go out in one buffer so a partial write
        // can only ever leave a torn tail.
        let mut record = Vec::with_capacity(4 + serialized.len());
        record.extend_from_slice(&len.to_le_bytes());
        record.extend_from_slice(&serialized);

        let committed = self
            .writer()?
            .get_ref()
            .metadata()
            .map_err(|e| IdMapError::StorageIo(format!("Failed to stat WAL: {}", e)))?
            .len();
        if let Err(e) = self.write_record(&record, sync) {
            // A record the caller sees as failed must never be replayed.
            if let Err(discard_err) = self.discard_from(committed) {
                warn!(
                    "Could not cut WAL {} back after a failed append: {}",
                    self.wal_path.display(),
                    discard_err
                );
            }
            return Err(IdMapError::StorageIo(format!("Failed to write WAL: {}", e)));
        }
        self.entries_since_checkpoint += 1;
        Ok(())
    }

    fn write_record(&mut self, record: &[u8], sync: bool) -> io::Result<()> {
        #[cfg(test)]
        let inject_failure = std::mem::take(&mut self.fail_next_flush);

        let file = self
            .wal_file
            .as_mut()
            .ok_or_else(|| io::Error::other("WAL file not open"))?;
        file.write_all(record)?;
        #[cfg(test)]
        if inject_failure {
            return Err(io::Error::other("injected flush failure"));
        }
        file.flush()?;
        if sync {
            file.get_mut().sync_all()?;
        }
        Ok(())
    }

    /// Throw away whatever a failed append left buffered or on disk, so
    /// the file ends at `len` again. The next append reopens the file.
    fn discard_from(&mut self, len: u64) -> Result<()> {
        let Some(writer) = self.wal_file.take() else {
            return Ok(());
        };
        let (file, _unwritten) = writer.into_parts();
        file.set_len(len)
            .map_err(|e| IdMapError::StorageIo(format!("Failed to truncate WAL: {}", e)))
    }

    pub fn read_all(&self) -> Result<Vec<WalEntry>> {
        if !self.wal_path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(&self.wal_path).map_err(|e| {
            IdMapError::StorageIo(format!("Failed to open WAL for reading: {}", e))
        })?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(IdMapError::StorageIo(format!(
                        "Failed to read WAL entry length: {}",
                        e
                    )));
                }
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    warn!(
                        "Ignoring torn record at the end of WAL {} ({} entries recovered)",
                        self.wal_path.display(),
                        entries.len()
                    );
                    break;
                }
                Err(e) => {
                    return Err(IdMapError::StorageIo(format!(
                        "Failed to read WAL entry data: {}",
                        e
                    )));
                }
            }
            let entry: WalEntry = rmp_serde::from_slice(&data).map_err(|e| {
                IdMapError::StorageIo(format!("Failed to deserialize WAL entry: {}", e))
            })?;
            entries.push(entry);
        }
        Ok(entries)
    }

    pub fn clear(&mut self) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.wal_file = None;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.wal_path)
            .map_err(|e| IdMapError::StorageIo(format!("Failed to truncate WAL: {}", e)))?;
        self.wal_file = Some(BufWriter::new(file));
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    /// Remove the WAL file. The next append creates a fresh one.
    pub fn delete(&mut self) -> Result<()> {
        self.wal_file = None;
        self.entries_since_checkpoint = 0;
        if self.wal_path.exists() {
            fs::remove_file(&self.wal_path)
                .map_err(|e| IdMapError::StorageIo(format!("Failed to delete WAL: {}", e)))?;
        }
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold;
    }

    pub fn path(&self) -> &Path {
        &self.wal_path
    }
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    pub fn save(&self, snapshot: &MapSnapshot) -> Result<()> {
        let dir = self
            .snapshot_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&dir).map_err(|e| {
            IdMapError::StorageIo(format!("Failed to create snapshot directory: {}", e))
        })?;

        let serialized = rmp_serde::to_vec(snapshot).map_err(|e| {
            IdMapError::StorageIo(format!("Failed to serialize snapshot: {}", e))
        })?;
        let mut temp = NamedTempFile::new_in(&dir)
            .map_err(|e| IdMapError::StorageIo(format!("Failed to create temp file: {}", e)))?;
        temp.write_all(&serialized)
            .map_err(|e| IdMapError::StorageIo(format!("Failed to write snapshot: {}", e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| IdMapError::StorageIo(format!("Failed to sync snapshot: {}", e)))?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| IdMapError::StorageIo(format!("Failed to rename snapshot: {}", e)))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<MapSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)
            .map_err(|e| IdMapError::StorageIo(format!("Failed to open snapshot: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| IdMapError::StorageIo(format!("Failed to read snapshot: {}", e)))?;
        let snapshot: MapSnapshot = rmp_serde::from_slice(&data).map_err(|e| {
            IdMapError::StorageIo(format!("Failed to deserialize snapshot: {}", e))
        })?;
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }

    pub fn delete(&self) -> Result<()> {
        if self.snapshot_path.exists() {
            fs::remove_file(&self.snapshot_path)
                .map_err(|e| IdMapError::StorageIo(format!("Failed to delete snapshot: {}", e)))?;
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.snapshot_path
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

pub struct PersistenceManager {
    migration_id: String,
    wal: WalManager,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(
        data_dir: P,
        migration_id: &str,
        durability_mode: DurabilityMode,
    ) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let stem = file_stem(migration_id);
        let wal = WalManager::new(data_dir.join(format!("{}.wal", stem)), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(format!("{}.snapshot", stem)));
        Ok(Self {
            migration_id: migration_id.to_string(),
            wal,
            snapshot,
            durability_mode,
        })
    }

    pub fn log(&mut self, entry: &WalEntry) -> Result<()> {
        self.wal.append(entry)
    }

    pub fn checkpoint(&mut self, state: &MapState) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let snapshot = MapSnapshot::new(self.migration_id.clone(), state.clone());
        self.snapshot.save(&snapshot)?;
        self.wal.clear()?;
        debug!(
            "Checkpointed id map '{}': {} rows, {} messages",
            self.migration_id, snapshot.metadata.row_count, snapshot.metadata.message_count
        );
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    pub fn recover(&self) -> Result<Option<MapState>> {
        let snapshot = self.snapshot.load()?;
        let wal_entries = self.wal.read_all()?;
        if snapshot.is_none() && wal_entries.is_empty() {
            return Ok(None);
        }

        let mut state = match snapshot {
            Some(snapshot) => {
                if snapshot.migration_id != self.migration_id {
                    return Err(IdMapError::StorageIo(format!(
                        "Snapshot {} belongs to migration '{}', not '{}'",
                        self.snapshot.path().display(),
                        snapshot.migration_id,
                        self.migration_id
                    )));
                }
                let mut state = snapshot.state;
                state.reindex();
                state
            }
            None => MapState::new(),
        };

        for entry in &wal_entries {
            state.apply(entry);
        }
        Ok(Some(state))
    }

    /// Remove every file belonging to this id map.
    /// The snapshot goes first: a failure then leaves the WAL, and with it
    /// every record since the last checkpoint, in place.
    pub fn destroy(&mut self) -> Result<()> {
        self.snapshot.delete()?;
        self.wal.delete()
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }

    pub fn wal_mut(&mut self) -> &mut WalManager {
        &mut self.wal
    }

    pub fn snapshot(&self) -> &SnapshotManager {
        &self.snapshot
    }

    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }
}

/// File name stem for a migration id; `:` separates derivative ids and is
/// not portable in file names.
pub fn file_stem(migration_id: &str) -> String {
    format!("migrate_map_{}", migration_id.replace(':', "__"))
}
