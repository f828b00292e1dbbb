use std::ops::RangeInclusive;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use sled::transaction::ConflictableTransactionError;
use sled::transaction::TransactionError;
use sled::Batch;
use sled::IVec;
use sled::Transactional;
use tracing::debug;
use tracing::error;
use tracing::trace;

use crate::constants::RAFT_LOG_META_KEY_SNAPSHOT_LOG_ID;
use crate::constants::RAFT_LOG_META_TREE;
use crate::constants::RAFT_LOG_TREE;
use crate::convert::safe_kv;
use crate::convert::safe_vk;
use crate::proto::Entry;
use crate::proto::LogId;
use crate::RaftLog;
use crate::Result;
use crate::StorageError;

/// Raft log stored in a sled tree.
///
/// Keys are big-endian indices so that sled's byte ordering is index
/// ordering. Values are bincode encoded [`Entry`] records carrying their own
/// crc32 checksum.
pub struct SledRaftLog {
    node_id: u32,
    tree: sled::Tree,
    meta_tree: sled::Tree,
    snapshot_log_id: RwLock<Option<LogId>>,
    // Id of the last stored entry, verified when the log is opened and kept
    // in step with every write.
    last_stored: RwLock<Option<LogId>>,
    commit_index: AtomicU64,
    // Serializes append and truncation. Readers go straight to sled and see
    // each batch atomically.
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for SledRaftLog {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledRaftLog")
            .field("node_id", &self.node_id)
            .field("tree_len", &self.tree.len())
            .field("snapshot_log_id", &*self.snapshot_log_id.read())
            .field("last_stored", &*self.last_stored.read())
            .finish()
    }
}

impl RaftLog for SledRaftLog {
    fn entry(
        &self,
        index: u64,
    ) -> Result<Option<Entry>> {
        match self.tree.get(safe_kv(index))? {
            Some(value) => Ok(Some(Self::decode(index, &value)?)),
            None => Ok(None),
        }
    }

    fn get_entries_range(
        &self,
        range: RangeInclusive<u64>,
    ) -> Result<Vec<Entry>> {
        let (start, end) = range.into_inner();
        let mut entries = Vec::new();
        if start > end {
            return Ok(entries);
        }

        for item in self.tree.range(safe_kv(start)..=safe_kv(end)) {
            let (key, value) = item?;
            let index = safe_vk(&key)?;
            entries.push(Self::decode(index, &value)?);
        }
        Ok(entries)
    }

    fn first_entry_id(&self) -> u64 {
        match self.tree.first() {
            Ok(Some((key, _))) => safe_vk(&key).unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                error!("first_entry_id failed: {:?}", e);
                0
            }
        }
    }

    fn last_entry_id(&self) -> u64 {
        self.last_stored
            .read()
            .or(*self.snapshot_log_id.read())
            .map(|id| id.index)
            .unwrap_or(0)
    }

    fn last_log_id(&self) -> LogId {
        self.last_stored
            .read()
            .or(*self.snapshot_log_id.read())
            .unwrap_or_default()
    }

    fn snapshot_log_id(&self) -> Option<LogId> {
        *self.snapshot_log_id.read()
    }

    fn term_at(
        &self,
        index: u64,
    ) -> Result<Option<u64>> {
        if index == 0 {
            return Ok(Some(0));
        }
        if let Some(snapshot) = *self.snapshot_log_id.read() {
            if snapshot.index == index {
                return Ok(Some(snapshot.term));
            }
        }
        Ok(self.entry(index)?.map(|e| e.term))
    }

    fn first_index_for_term(
        &self,
        term: u64,
    ) -> Result<Option<u64>> {
        for item in self.tree.iter() {
            let (key, value) = item?;
            let entry = Self::decode(safe_vk(&key)?, &value)?;

            if entry.term == term {
                return Ok(Some(entry.index));
            }
            if entry.term > term {
                return Ok(None);
            }
        }
        Ok(None)
    }

    fn last_index_for_term(
        &self,
        term: u64,
    ) -> Result<Option<u64>> {
        for item in self.tree.iter().rev() {
            let (key, value) = item?;
            let entry = Self::decode(safe_vk(&key)?, &value)?;

            if entry.term == term {
                return Ok(Some(entry.index));
            }
            if entry.term < term {
                return Ok(None);
            }
        }

        Ok(self
            .snapshot_log_id
            .read()
            .filter(|snapshot| snapshot.term == term)
            .map(|snapshot| snapshot.index))
    }

    fn append(
        &self,
        entries: Vec<Entry>,
    ) -> Result<u64> {
        let _guard = self.write_lock.lock();

        let mut expected = self.last_entry_id() + 1;
        if entries.is_empty() {
            return Ok(expected - 1);
        }

        let mut batch = Batch::default();
        for entry in &entries {
            if entry.index != expected {
                return Err(StorageError::LogGap {
                    expected,
                    actual: entry.index,
                }
                .into());
            }
            batch.insert(safe_kv(entry.index).to_vec(), bincode::serialize(entry)?);
            expected += 1;
        }

        self.tree.apply_batch(batch)?;
        self.tree.flush()?;
        if let Some(last) = entries.last() {
            *self.last_stored.write() = Some(last.log_id());
        }

        trace!("[{}] appended {} entries, last index {}", self.node_id, entries.len(), expected - 1);
        Ok(expected - 1)
    }

    fn truncate_suffix(
        &self,
        from_index: u64,
    ) -> Result<()> {
        let _guard = self.write_lock.lock();

        let commit_index = self.committed_index();
        if from_index <= commit_index {
            return Err(StorageError::TruncateCommitted {
                index: from_index,
                commit_index,
            }
            .into());
        }

        let mut batch = Batch::default();
        let mut removed = 0;
        for item in self.tree.range(safe_kv(from_index)..) {
            let (key, _) = item?;
            batch.remove(key);
            removed += 1;
        }

        if removed > 0 {
            self.tree.apply_batch(batch)?;
            self.tree.flush()?;
            *self.last_stored.write() = Self::read_last_stored(&self.tree)?;
        }
        debug!("[{}] truncated {} entries from index {}", self.node_id, removed, from_index);
        Ok(())
    }

    fn truncate_prefix(
        &self,
        through: LogId,
    ) -> Result<()> {
        let _guard = self.write_lock.lock();

        if let Some(current) = *self.snapshot_log_id.read() {
            if current.index >= through.index {
                return Ok(());
            }
        }

        let keys = self.keys_through(through.index)?;
        self.remove_and_save_snapshot_log_id(keys, through)?;
        self.commit_index.fetch_max(through.index, Ordering::SeqCst);

        debug!("[{}] compacted log through {}", self.node_id, through);
        Ok(())
    }

    fn install_snapshot(
        &self,
        last_included: LogId,
    ) -> Result<()> {
        let _guard = self.write_lock.lock();

        if let Some(current) = *self.snapshot_log_id.read() {
            if current.index >= last_included.index {
                return Ok(());
            }
        }

        let keep_suffix = matches!(
            self.entry(last_included.index),
            Ok(Some(ref e)) if e.term == last_included.term
        );

        let keys = if keep_suffix {
            self.keys_through(last_included.index)?
        } else {
            self.tree.iter().keys().collect::<std::result::Result<Vec<_>, _>>()?
        };
        self.remove_and_save_snapshot_log_id(keys, last_included)?;
        if !keep_suffix {
            *self.last_stored.write() = None;
        }
        self.commit_index.fetch_max(last_included.index, Ordering::SeqCst);

        debug!(
            "[{}] installed snapshot {} (suffix kept: {})",
            self.node_id, last_included, keep_suffix
        );
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
        let bytes = self.tree.flush()?;
        trace!("[{}] flushed raft log, bytes: {}", self.node_id, bytes);
        Ok(())
    }

    fn len(&self) -> usize {
        self.tree.len()
    }
}

impl SledRaftLog {
    /// `commit_index` is the last commit index persisted by the state storage.
    pub fn new(
        node_id: u32,
        db: Arc<sled::Db>,
        commit_index: u64,
    ) -> Result<Self> {
        let tree = db.open_tree(RAFT_LOG_TREE)?;
        let meta_tree = db.open_tree(RAFT_LOG_META_TREE)?;

        let snapshot_log_id = match meta_tree.get(RAFT_LOG_META_KEY_SNAPSHOT_LOG_ID)? {
            Some(value) => Some(bincode::deserialize::<LogId>(&value)?),
            None => None,
        };
        let commit_floor = commit_index.max(snapshot_log_id.map(|id| id.index).unwrap_or(0));
        // A tail that cannot be decoded fails the open
        let last_stored = Self::read_last_stored(&tree)?;

        Ok(Self {
            node_id,
            tree,
            meta_tree,
            snapshot_log_id: RwLock::new(snapshot_log_id),
            last_stored: RwLock::new(last_stored),
            commit_index: AtomicU64::new(commit_floor),
            write_lock: Mutex::new(()),
        })
    }

    fn decode(
        index: u64,
        value: &IVec,
    ) -> Result<Entry> {
        let entry: Entry = bincode::deserialize(value)?;
        if entry.index != index || !entry.verify_checksum() {
            error!("checksum mismatch on raft_log[{}]", index);
            return Err(StorageError::DataCorruption {
                location: format!("raft_log[{}]", index),
            }
            .into());
        }
        Ok(entry)
    }

    fn read_last_stored(tree: &sled::Tree) -> Result<Option<LogId>> {
        match tree.last()? {
            Some((key, value)) => Ok(Some(Self::decode(safe_vk(&key)?, &value)?.log_id())),
            None => Ok(None),
        }
    }

    fn keys_through(
        &self,
        index: u64,
    ) -> Result<Vec<IVec>> {
        let keys = self
            .tree
            .range(..=safe_kv(index))
            .keys()
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    /// Removes `keys` and records `log_id` as the snapshot boundary in one
    /// transaction over both trees.
    fn remove_and_save_snapshot_log_id(
        &self,
        keys: Vec<IVec>,
        log_id: LogId,
    ) -> Result<()> {
        let value = bincode::serialize(&log_id)?;
        (&self.tree, &self.meta_tree)
            .transaction(|(tree, meta_tree)| {
                for key in &keys {
                    tree.remove(key.clone())?;
                }
                meta_tree.insert(RAFT_LOG_META_KEY_SNAPSHOT_LOG_ID, value.clone())?;
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e: TransactionError<()>| {
                error!("[{}] snapshot boundary {} not saved: {:?}", self.node_id, log_id, e);
                StorageError::DbError(format!("{:?}", e))
            })?;
        self.tree.flush()?;
        self.meta_tree.flush()?;

        *self.snapshot_log_id.write() = Some(log_id);
        let mut last_stored = self.last_stored.write();
        if last_stored.map(|last| last.index <= log_id.index).unwrap_or(false) {
            *last_stored = None;
        }
        Ok(())
    }
}
