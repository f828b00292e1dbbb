use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::RwLock;
use tracing::trace;

use crate::proto::Entry;
use crate::proto::LogId;
use crate::RaftLog;
use crate::Result;
use crate::StorageError;

#[derive(Debug, Default)]
struct Inner {
    entries: BTreeMap<u64, Entry>,
    snapshot_log_id: Option<LogId>,
}

/// In-memory Raft log. Every mutation holds the write lock for its whole
/// duration.
#[derive(Debug, Default)]
pub struct MemRaftLog {
    inner: RwLock<Inner>,
    commit_index: AtomicU64,
}

impl MemRaftLog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Inner {
    fn last_log_id(&self) -> LogId {
        self.entries
            .values()
            .next_back()
            .map(|e| e.log_id())
            .or(self.snapshot_log_id)
            .unwrap_or_default()
    }
}

impl RaftLog for MemRaftLog {
    fn entry(
        &self,
        index: u64,
    ) -> Result<Option<Entry>> {
        let inner = self.inner.read();
        match inner.entries.get(&index) {
            Some(entry) if !entry.verify_checksum() => Err(StorageError::DataCorruption {
                location: format!("mem_raft_log[{}]", index),
            }
            .into()),
            entry => Ok(entry.cloned()),
        }
    }

    fn get_entries_range(
        &self,
        range: RangeInclusive<u64>,
    ) -> Result<Vec<Entry>> {
        if range.start() > range.end() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read();
        Ok(inner.entries.range(range).map(|(_, e)| e.clone()).collect())
    }

    fn first_entry_id(&self) -> u64 {
        self.inner.read().entries.keys().next().copied().unwrap_or(0)
    }

    fn last_entry_id(&self) -> u64 {
        self.inner.read().last_log_id().index
    }

    fn last_log_id(&self) -> LogId {
        self.inner.read().last_log_id()
    }

    fn snapshot_log_id(&self) -> Option<LogId> {
        self.inner.read().snapshot_log_id
    }

    fn term_at(
        &self,
        index: u64,
    ) -> Result<Option<u64>> {
        if index == 0 {
            return Ok(Some(0));
        }
        let inner = self.inner.read();
        Ok(match inner.snapshot_log_id {
            Some(snapshot) if snapshot.index == index => Some(snapshot.term),
            _ => inner.entries.get(&index).map(|e| e.term),
        })
    }

    fn first_index_for_term(
        &self,
        term: u64,
    ) -> Result<Option<u64>> {
        let inner = self.inner.read();
        Ok(inner.entries.values().find(|e| e.term == term).map(|e| e.index))
    }

    fn last_index_for_term(
        &self,
        term: u64,
    ) -> Result<Option<u64>> {
        let inner = self.inner.read();
        Ok(inner
            .entries
            .values()
            .rev()
            .find(|e| e.term == term)
            .map(|e| e.index)
            .or_else(|| inner.snapshot_log_id.filter(|s| s.term == term).map(|s| s.index)))
    }

    fn append(
        &self,
        entries: Vec<Entry>,
    ) -> Result<u64> {
        let mut inner = self.inner.write();
        let mut expected = inner.last_log_id().index + 1;

        for entry in &entries {
            if entry.index != expected {
                return Err(StorageError::LogGap {
                    expected,
                    actual: entry.index,
                }
                .into());
            }
            expected += 1;
        }
        for entry in entries {
            inner.entries.insert(entry.index, entry);
        }

        trace!("mem log appended up to {}", expected - 1);
        Ok(expected - 1)
    }

    fn truncate_suffix(
        &self,
        from_index: u64,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        let commit_index = self.committed_index();
        if from_index <= commit_index {
            return Err(StorageError::TruncateCommitted {
                index: from_index,
                commit_index,
            }
            .into());
        }
        let removed = inner.entries.split_off(&from_index);
        trace!("mem log truncated {} entries from {}", removed.len(), from_index);
        Ok(())
    }

    fn truncate_prefix(
        &self,
        through: LogId,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if inner.snapshot_log_id.map(|s| s.index >= through.index).unwrap_or(false) {
            return Ok(());
        }
        inner.entries = inner.entries.split_off(&(through.index + 1));
        inner.snapshot_log_id = Some(through);
        self.commit_index.fetch_max(through.index, Ordering::SeqCst);
        Ok(())
    }

    fn install_snapshot(
        &self,
        last_included: LogId,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if inner
            .snapshot_log_id
            .map(|s| s.index >= last_included.index)
            .unwrap_or(false)
        {
            return Ok(());
        }

        let keep_suffix = inner
            .entries
            .get(&last_included.index)
            .map(|e| e.term == last_included.term)
            .unwrap_or(false);
        if keep_suffix {
            inner.entries = inner.entries.split_off(&(last_included.index + 1));
        } else {
            inner.entries.clear();
        }
        inner.snapshot_log_id = Some(last_included);
        self.commit_index.fetch_max(last_included.index, Ordering::SeqCst);
        Ok(())
    }

    fn mark_committed(
        &self,
        index: u64,
    ) -> Result<()> {
        self.commit_index.fetch_max(index, Ordering::SeqCst);
        Ok(())
    }

    fn committed_index(&self) -> u64 {
        self.commit_index.load(Ordering::SeqCst)
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn len(&self) -> usize {
        self.inner.read().entries.len()
    }
}
