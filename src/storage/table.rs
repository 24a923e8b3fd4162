use crate::codec::{IdKey, IdTuple};
use crate::core::{MapRow, Status};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// The map table: source id -> destination id, status and rollback action.
///
/// Rows live in a `BTreeMap` keyed by an insertion sequence number, which
/// gives every scan a stable order. Rewriting an existing source id keeps
/// its original position.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapTable {
    rows: BTreeMap<u64, MapRow>,
    next_seq: u64,
    #[serde(skip)]
    by_source: HashMap<IdKey, u64>,
    #[serde(skip)]
    by_destination: HashMap<IdKey, BTreeSet<u64>>,
}

impl MapTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the lookup indexes after deserialization.
    pub fn reindex(&mut self) {
        self.by_source.clear();
        self.by_destination.clear();
        for (seq, row) in &self.rows {
            self.by_source.insert(row.source.key(), *seq);
            if let Some(dest) = &row.destination {
                self.by_destination.entry(dest.key()).or_default().insert(*seq);
            }
        }
    }

    /// Insert or overwrite the row for `row.source`. Returns the sequence
    /// number the row lives under.
    pub fn upsert(&mut self, row: MapRow) -> u64 {
        let source_key = row.source.key();
        let seq = match self.by_source.get(&source_key).copied() {
            Some(seq) => {
                let old_dest = self
                    .rows
                    .get(&seq)
                    .and_then(|old| old.destination.as_ref().map(IdTuple::key));
                if let Some(dest) = old_dest {
                    self.unindex_destination(&dest, seq);
                }
                seq
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.by_source.insert(source_key, seq);
                seq
            }
        };

        if let Some(dest) = &row.destination {
            self.by_destination.entry(dest.key()).or_default().insert(seq);
        }
        self.rows.insert(seq, row);
        seq
    }

    pub fn get(&self, source: &IdKey) -> Option<&MapRow> {
        self.by_source.get(source).and_then(|seq| self.rows.get(seq))
    }

    pub fn contains(&self, source: &IdKey) -> bool {
        self.by_source.contains_key(source)
    }

    pub fn find_by_destination(&self, destination: &IdKey) -> Vec<&MapRow> {
        self.by_destination
            .get(destination)
            .map(|seqs| seqs.iter().filter_map(|seq| self.rows.get(seq)).collect())
            .unwrap_or_default()
    }

    /// Rows whose source tuple starts with `prefix`, in table order.
    pub fn find_by_source_prefix(&self, prefix: &IdTuple) -> Vec<&MapRow> {
        self.rows
            .values()
            .filter(|row| row.source.starts_with(prefix))
            .collect()
    }

    pub fn set_status(&mut self, source: &IdKey, status: Status) -> bool {
        match self.by_source.get(source).and_then(|seq| self.rows.get_mut(seq)) {
            Some(row) => {
                row.status = status;
                true
            }
            None => false,
        }
    }

    /// Move every row in status `from` to status `to`. Returns the number of
    /// rows changed.
    pub fn transition_all(&mut self, from: Status, to: Status) -> usize {
        let mut changed = 0;
        for row in self.rows.values_mut() {
            if row.status == from {
                row.status = to;
                changed += 1;
            }
        }
        changed
    }

    pub fn with_status(&self, status: Status, limit: usize) -> Vec<&MapRow> {
        self.rows
            .values()
            .filter(|row| row.status == status)
            .take(limit)
            .collect()
    }

    pub fn remove(&mut self, source: &IdKey) -> Option<MapRow> {
        let seq = self.by_source.remove(source)?;
        let row = self.rows.remove(&seq)?;
        if let Some(dest) = &row.destination {
            self.unindex_destination(&dest.key(), seq);
        }
        Some(row)
    }

    pub fn remove_by_destination(&mut self, destination: &IdKey) -> Vec<MapRow> {
        let seqs = self.by_destination.remove(destination).unwrap_or_default();
        let mut removed = Vec::with_capacity(seqs.len());
        for seq in seqs {
            if let Some(row) = self.rows.remove(&seq) {
                self.by_source.remove(&row.source.key());
                removed.push(row);
            }
        }
        removed
    }

    /// First row positioned strictly after `after` (or the first row when
    /// `after` is `None`).
    pub fn next_after(&self, after: Option<u64>) -> Option<(u64, &MapRow)> {
        let next = match after {
            Some(seq) => self.rows.range(seq + 1..).next(),
            None => self.rows.iter().next(),
        };
        next.map(|(seq, row)| (*seq, row))
    }

    pub fn count_status(&self, status: Status) -> usize {
        self.rows.values().filter(|row| row.status == status).count()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = &MapRow> {
        self.rows.values()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.by_source.clear();
        self.by_destination.clear();
    }

    fn unindex_destination(&mut self, destination: &IdKey, seq: u64) {
        if let Some(seqs) = self.by_destination.get_mut(destination) {
            seqs.remove(&seq);
            if seqs.is_empty() {
                self.by_destination.remove(destination);
            }
        }
    }
}
