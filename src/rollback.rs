//! Rollback coordination
//!
//! Walks the id map and undoes what a migration wrote: destination records
//! of rows flagged [`RollbackAction::Delete`] are removed through an
//! injected [`DestinationDeleter`], rows flagged
//! [`RollbackAction::Preserve`] only lose their map entry.
//!
//! A failing destination delete never stops the sweep. Failures are
//! collected into the [`RollbackReport`]; only structural errors of the id
//! map itself (bad prefix, storage failure) abort.

use crate::codec::{IdInput, IdTuple};
use crate::core::{MapRow, Result, RollbackAction};
use crate::facade::{IdMapStore, MapCursor};
use std::cell::Cell;
use tracing::{Level, event, info_span};

/// Removes a destination record on behalf of a rollback.
pub trait DestinationDeleter {
    fn delete_destination_entity(&mut self, destination: &IdTuple) -> anyhow::Result<()>;
}

impl<F> DestinationDeleter for F
where
    F: FnMut(&IdTuple) -> anyhow::Result<()>,
{
    fn delete_destination_entity(&mut self, destination: &IdTuple) -> anyhow::Result<()> {
        self(destination)
    }
}

/// What happens to a map row whose destination delete failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailedRowPolicy {
    /// Leave the row in the map so a later rollback can retry it.
    #[default]
    Keep,
    /// Remove the row anyway.
    Remove,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackFailure {
    pub source: IdTuple,
    pub destination: IdTuple,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RollbackReport {
    /// Rows visited.
    pub processed: usize,
    /// Destination records deleted.
    pub deleted: usize,
    /// Rows removed from the map while their destination record was kept.
    pub preserved: usize,
    /// Map rows removed, whatever happened to the destination.
    pub rows_removed: usize,
    pub failures: Vec<RollbackFailure>,
}

impl RollbackReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Rolls back the rows of one id map.
///
/// Each call to [`rollback`](Self::rollback) continues after the last row
/// the previous call visited, so a coordinator with a [`limit`](Self::limit)
/// can be driven in bounded batches until a batch visits nothing. Rows kept
/// after a failed delete are not revisited until [`rewind`](Self::rewind).
pub struct RollbackCoordinator<'a> {
    store: &'a IdMapStore,
    source_prefix: Option<IdInput>,
    limit: Option<usize>,
    failed_rows: FailedRowPolicy,
    resume_after: Cell<Option<u64>>,
}

impl<'a> RollbackCoordinator<'a> {
    pub fn new(store: &'a IdMapStore) -> Self {
        Self {
            store,
            source_prefix: None,
            limit: None,
            failed_rows: FailedRowPolicy::default(),
            resume_after: Cell::new(None),
        }
    }

    /// Only roll back rows whose source id starts with `prefix`.
    pub fn source_prefix(mut self, prefix: impl Into<IdInput>) -> Self {
        self.source_prefix = Some(prefix.into());
        self
    }

    /// Visit at most `limit` rows per call.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn failed_rows(mut self, policy: FailedRowPolicy) -> Self {
        self.failed_rows = policy;
        self
    }

    /// Start the next sweep from the first row again.
    pub fn rewind(&self) {
        self.resume_after.set(None);
    }

    pub fn rollback<D>(&self, deleter: &mut D) -> Result<RollbackReport>
    where
        D: DestinationDeleter + ?Sized,
    {
        let prefix = match &self.source_prefix {
            Some(input) => Some(self.store.source_schema().normalize_prefix(input)?),
            None => None,
        };

        let span = info_span!("rollback", migration = %self.store.migration_id());
        let _enter = span.enter();

        let mut report = RollbackReport::default();
        let mut cursor = match self.resume_after.get() {
            Some(seq) => MapCursor::resume_after(self.store, seq),
            None => self.store.cursor(),
        };
        while !self.limit.is_some_and(|limit| report.processed >= limit) && cursor.advance()? {
            let (Some(seq), Some(row)) = (cursor.position(), cursor.current().cloned()) else {
                break;
            };
            self.resume_after.set(Some(seq));
            if let Some(prefix) = &prefix
                && !row.source.starts_with(prefix)
            {
                continue;
            }

            report.processed += 1;
            self.rollback_row(row, deleter, &mut report)?;
        }

        event!(
            Level::INFO,
            processed = report.processed,
            deleted = report.deleted,
            preserved = report.preserved,
            failed = report.failures.len(),
            "rollback finished"
        );
        Ok(report)
    }

    fn rollback_row<D>(
        &self,
        row: MapRow,
        deleter: &mut D,
        report: &mut RollbackReport,
    ) -> Result<()>
    where
        D: DestinationDeleter + ?Sized,
    {
        let Some(destination) = row.destination else {
            // Nothing was written for this row.
            self.store.delete(&row.source, false)?;
            report.rows_removed += 1;
            return Ok(());
        };

        match row.rollback_action {
            RollbackAction::Preserve => {
                self.store.delete(&row.source, false)?;
                report.preserved += 1;
                report.rows_removed += 1;
            }
            RollbackAction::Delete => match deleter.delete_destination_entity(&destination) {
                Ok(()) => {
                    self.store.delete(&row.source, false)?;
                    report.deleted += 1;
                    report.rows_removed += 1;
                    event!(
                        Level::DEBUG,
                        source = %row.source,
                        destination = %destination,
                        "destination deleted"
                    );
                }
                Err(err) => {
                    event!(
                        Level::WARN,
                        source = %row.source,
                        destination = %destination,
                        error = %err,
                        "destination delete failed"
                    );
                    if self.failed_rows == FailedRowPolicy::Remove {
                        self.store.delete(&row.source, false)?;
                        report.rows_removed += 1;
                    }
                    report.failures.push(RollbackFailure {
                        source: row.source,
                        destination,
                        error: format!("{:#}", err),
                    });
                }
            },
        }
        Ok(())
    }
}
