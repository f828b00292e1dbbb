use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::constants::STATE_STORAGE_COMMIT_INDEX_KEY;
use crate::constants::STATE_STORAGE_HARD_STATE_KEY;
use crate::constants::STATE_STORAGE_LAST_APPLIED_KEY;
use crate::constants::STATE_STORAGE_MEMBERSHIP_KEY;
use crate::constants::STATE_STORAGE_SNAPSHOT_KEY;
use crate::constants::STATE_STORAGE_TREE;
use crate::proto::ClusterConfiguration;
use crate::HardState;
use crate::Result;
use crate::Snapshot;
use crate::StateStorage;

/// Persistent Raft metadata in a dedicated sled tree.
///
/// Every write is flushed before returning.
#[derive(Clone)]
pub struct SledStateStorage {
    tree: Arc<sled::Tree>,
}

impl std::fmt::Debug for SledStateStorage {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledStateStorage")
            .field("tree_len", &self.tree.len())
            .finish()
    }
}

impl StateStorage for SledStateStorage {
    fn load_hard_state(&self) -> Result<Option<HardState>> {
        let hard_state = self.load::<HardState>(STATE_STORAGE_HARD_STATE_KEY)?;
        if let Some(h) = &hard_state {
            info!(
                "load_hard_state: current_term={}, voted_for={:?}",
                h.current_term, h.voted_for
            );
        }
        Ok(hard_state)
    }

    fn save_hard_state(
        &self,
        hard_state: HardState,
    ) -> Result<()> {
        self.save(STATE_STORAGE_HARD_STATE_KEY, &hard_state)?;
        debug!("persisted hard state: {:?}", hard_state);
        Ok(())
    }

    fn load_commit_index(&self) -> Result<u64> {
        Ok(self.load::<u64>(STATE_STORAGE_COMMIT_INDEX_KEY)?.unwrap_or(0))
    }

    fn save_commit_index(
        &self,
        commit_index: u64,
    ) -> Result<()> {
        self.save(STATE_STORAGE_COMMIT_INDEX_KEY, &commit_index)
    }

    fn load_last_applied(&self) -> Result<u64> {
        Ok(self.load::<u64>(STATE_STORAGE_LAST_APPLIED_KEY)?.unwrap_or(0))
    }

    fn save_last_applied(
        &self,
        last_applied: u64,
    ) -> Result<()> {
        self.save(STATE_STORAGE_LAST_APPLIED_KEY, &last_applied)
    }

    fn load_membership(&self) -> Result<Option<ClusterConfiguration>> {
        self.load::<ClusterConfiguration>(STATE_STORAGE_MEMBERSHIP_KEY)
    }

    fn save_membership(
        &self,
        configuration: &ClusterConfiguration,
    ) -> Result<()> {
        self.save(STATE_STORAGE_MEMBERSHIP_KEY, configuration)
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        self.load::<Snapshot>(STATE_STORAGE_SNAPSHOT_KEY)
    }

    fn save_snapshot(
        &self,
        snapshot: &Snapshot,
    ) -> Result<()> {
        self.save(STATE_STORAGE_SNAPSHOT_KEY, snapshot)?;
        debug!("persisted snapshot {}", snapshot.last_included);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        match self.tree.flush() {
            Ok(bytes) => {
                debug!("Successfully flushed state storage, bytes flushed: {}", bytes);
                Ok(())
            }
            Err(e) => {
                error!("Failed to flush state storage: {}", e);
                Err(e.into())
            }
        }
    }
}

impl SledStateStorage {
    pub fn new(db: Arc<sled::Db>) -> Result<Self> {
        let tree = db.open_tree(STATE_STORAGE_TREE)?;
        Ok(SledStateStorage { tree: Arc::new(tree) })
    }

    fn load<V: DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<V>> {
        match self.tree.get(key)? {
            Some(ivec) => Ok(Some(bincode::deserialize::<V>(&ivec)?)),
            None => Ok(None),
        }
    }

    fn save<V: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &V,
    ) -> Result<()> {
        self.tree.insert(key, bincode::serialize(value)?)?;
        self.flush()
    }
}
