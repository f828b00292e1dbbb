//! Application state machine driven by committed entries.

#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::proto::Entry;
use crate::proto::LogId;
use crate::Result;

/// Point-in-time image of the state machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Last entry whose effect is contained in `data`
    pub last_included: LogId,
    pub data: Vec<u8>,
}

#[cfg_attr(test, automock)]
pub trait StateMachine: Send + Sync + 'static {
    /// Applies one committed entry. Entries arrive strictly in index order;
    /// noop and config entries only advance `last_applied`.
    fn apply(
        &self,
        entry: &Entry,
    ) -> Result<()>;

    fn last_applied(&self) -> LogId;

    /// Durability of the snapshot is the state machine's responsibility.
    fn snapshot(&self) -> Result<Snapshot>;

    /// Replaces the whole state with `snapshot`.
    fn restore(
        &self,
        snapshot: Snapshot,
    ) -> Result<()>;

    fn flush(&self) -> Result<()>;
}
