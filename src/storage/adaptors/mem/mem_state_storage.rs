use parking_lot::RwLock;

use crate::proto::ClusterConfiguration;
use crate::HardState;
use crate::Result;
use crate::Snapshot;
use crate::StateStorage;

#[derive(Debug, Default)]
struct Inner {
    hard_state: Option<HardState>,
    commit_index: u64,
    last_applied: u64,
    membership: Option<ClusterConfiguration>,
    snapshot: Option<Snapshot>,
}

/// Volatile [`StateStorage`], for tests and embedded single process clusters.
#[derive(Debug, Default)]
pub struct MemStateStorage {
    inner: RwLock<Inner>,
}

impl MemStateStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStorage for MemStateStorage {
    fn load_hard_state(&self) -> Result<Option<HardState>> {
        Ok(self.inner.read().hard_state)
    }

    fn save_hard_state(
        &self,
        hard_state: HardState,
    ) -> Result<()> {
        self.inner.write().hard_state = Some(hard_state);
        Ok(())
    }

    fn load_commit_index(&self) -> Result<u64> {
        Ok(self.inner.read().commit_index)
    }

    fn save_commit_index(
        &self,
        commit_index: u64,
    ) -> Result<()> {
        self.inner.write().commit_index = commit_index;
        Ok(())
    }

    fn load_last_applied(&self) -> Result<u64> {
        Ok(self.inner.read().last_applied)
    }

    fn save_last_applied(
        &self,
        last_applied: u64,
    ) -> Result<()> {
        self.inner.write().last_applied = last_applied;
        Ok(())
    }

    fn load_membership(&self) -> Result<Option<ClusterConfiguration>> {
        Ok(self.inner.read().membership.clone())
    }

    fn save_membership(
        &self,
        configuration: &ClusterConfiguration,
    ) -> Result<()> {
        self.inner.write().membership = Some(configuration.clone());
        Ok(())
    }

    fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        Ok(self.inner.read().snapshot.clone())
    }

    fn save_snapshot(
        &self,
        snapshot: &Snapshot,
    ) -> Result<()> {
        self.inner.write().snapshot = Some(snapshot.clone());
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
