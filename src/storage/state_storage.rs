//! Core model in Raft: StateStorage Definition, persistent state: e.g. current_term
//!
//! Term and vote always travel together in one [`HardState`] record, so a crash
//! can never persist a term bump without the matching vote reset.

#[cfg(test)]
use mockall::automock;

use crate::proto::ClusterConfiguration;
use crate::HardState;
use crate::Result;
use crate::Snapshot;

#[cfg_attr(test, automock)]
pub trait StateStorage: Send + Sync + 'static {
    /// When node restarts, check if there is stored state from disk
    fn load_hard_state(&self) -> Result<Option<HardState>>;

    /// Persists term and vote as one record and flushes before returning
    fn save_hard_state(
        &self,
        hard_state: HardState,
    ) -> Result<()>;

    fn load_commit_index(&self) -> Result<u64>;

    fn save_commit_index(
        &self,
        commit_index: u64,
    ) -> Result<()>;

    fn load_last_applied(&self) -> Result<u64>;

    fn save_last_applied(
        &self,
        last_applied: u64,
    ) -> Result<()>;

    fn load_membership(&self) -> Result<Option<ClusterConfiguration>>;

    fn save_membership(
        &self,
        configuration: &ClusterConfiguration,
    ) -> Result<()>;

    /// Latest state machine snapshot the log was compacted against.
    fn load_snapshot(&self) -> Result<Option<Snapshot>>;

    /// Must be durable before the log prefix it covers is removed.
    fn save_snapshot(
        &self,
        snapshot: &Snapshot,
    ) -> Result<()>;

    /// Synchronously flushes all dirty IO buffers and calls fsync.
    fn flush(&self) -> Result<()>;

    fn load_term(&self) -> Result<u64> {
        Ok(self.load_hard_state()?.map(|h| h.current_term).unwrap_or(0))
    }

    /// Saving a different term clears the vote in the same write.
    fn save_term(
        &self,
        term: u64,
    ) -> Result<()> {
        let mut hard_state = self.load_hard_state()?.unwrap_or_default();
        if hard_state.current_term != term {
            hard_state.voted_for = None;
        }
        hard_state.current_term = term;
        self.save_hard_state(hard_state)
    }

    fn load_vote(&self) -> Result<Option<u32>> {
        Ok(self.load_hard_state()?.and_then(|h| h.voted_for))
    }

    fn save_vote(
        &self,
        voted_for: Option<u32>,
    ) -> Result<()> {
        let mut hard_state = self.load_hard_state()?.unwrap_or_default();
        hard_state.voted_for = voted_for;
        self.save_hard_state(hard_state)
    }
}
