//! Core model in Raft: RaftLog Definition
//!
//! The log is an append-only, gapless sequence of entries starting at index 1.
//! A compacted prefix is represented by the snapshot log id: it stays queryable
//! through [`RaftLog::term_at`] so that consistency checks keep working at the
//! compaction boundary.

use std::ops::RangeInclusive;

#[cfg(test)]
use mockall::automock;
use tracing::trace;

use crate::proto::Entry;
use crate::proto::LogId;
use crate::Result;

#[cfg_attr(test, automock)]
pub trait RaftLog: Send + Sync + 'static {
    /// Reads one entry. Checksums are verified on every read.
    fn entry(
        &self,
        index: u64,
    ) -> Result<Option<Entry>>;

    /// Entries inside `range`. Missing or compacted indices are skipped.
    fn get_entries_range(
        &self,
        range: RangeInclusive<u64>,
    ) -> Result<Vec<Entry>>;

    /// First index still stored, 0 when no entry is stored
    fn first_entry_id(&self) -> u64;

    /// Last index of the log, counting the compacted prefix
    fn last_entry_id(&self) -> u64;

    /// `(term, index)` of the last entry, or of the snapshot boundary when all
    /// entries have been compacted. `(0, 0)` for an empty log.
    fn last_log_id(&self) -> LogId;

    fn snapshot_log_id(&self) -> Option<LogId>;

    /// `Some(0)` for index 0, the snapshot term at the snapshot index, `None`
    /// for compacted or unknown indices. Unreadable entries are errors.
    fn term_at(
        &self,
        index: u64,
    ) -> Result<Option<u64>>;

    fn first_index_for_term(
        &self,
        term: u64,
    ) -> Result<Option<u64>>;

    fn last_index_for_term(
        &self,
        term: u64,
    ) -> Result<Option<u64>>;

    /// Appends durably and returns the new last index.
    ///
    /// The first entry must carry `last_entry_id() + 1` and indices must be
    /// consecutive, otherwise `StorageError::LogGap` is returned.
    fn append(
        &self,
        entries: Vec<Entry>,
    ) -> Result<u64>;

    /// Removes `from_index` and everything after it. Idempotent.
    ///
    /// Refuses to remove any index at or below [`RaftLog::committed_index`].
    fn truncate_suffix(
        &self,
        from_index: u64,
    ) -> Result<()>;

    /// Removes every entry up to and including `through.index` and records
    /// `through` as the snapshot log id.
    fn truncate_prefix(
        &self,
        through: LogId,
    ) -> Result<()>;

    /// Aligns the log with a snapshot received from the leader.
    ///
    /// The suffix after `last_included` survives only if the local entry at
    /// `last_included.index` has the same term; otherwise the log is emptied.
    fn install_snapshot(
        &self,
        last_included: LogId,
    ) -> Result<()>;

    /// Raises the commit floor used by [`RaftLog::truncate_suffix`].
    fn mark_committed(
        &self,
        index: u64,
    ) -> Result<()>;

    fn committed_index(&self) -> u64;

    /// Durability barrier
    fn flush(&self) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Follower side of AppendEntries once `prev_log_index` has been matched.
    ///
    /// Entries already present with the same term are skipped, the first
    /// conflicting entry truncates the local suffix, and the remaining
    /// entries are appended. Returns the index of the last entry covered by
    /// `new_entries` (or `prev_log_index` when it is empty).
    fn filter_out_conflicts_and_append(
        &self,
        prev_log_index: u64,
        new_entries: Vec<Entry>,
    ) -> Result<u64> {
        let compacted_through = self.snapshot_log_id().map(|id| id.index).unwrap_or(0);
        let mut last_new_index = prev_log_index;
        let mut to_append: Vec<Entry> = Vec::new();

        for entry in new_entries {
            last_new_index = entry.index;

            if !to_append.is_empty() {
                to_append.push(entry);
                continue;
            }

            if entry.index <= compacted_through {
                continue;
            }

            match self.term_at(entry.index)? {
                Some(term) if term == entry.term => {
                    trace!("entry {} already present", entry.index);
                }
                Some(_) => {
                    self.truncate_suffix(entry.index)?;
                    to_append.push(entry);
                }
                None => to_append.push(entry),
            }
        }

        if !to_append.is_empty() {
            self.append(to_append)?;
        }

        Ok(last_new_index)
    }
}
