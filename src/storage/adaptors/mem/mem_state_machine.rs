use parking_lot::RwLock;
use tracing::debug;
use tracing::trace;

use crate::proto::Entry;
use crate::proto::EntryPayload;
use crate::proto::LogId;
use crate::Result;
use crate::Snapshot;
use crate::StateMachine;
use crate::StorageError;

#[derive(Debug, Default)]
struct Inner {
    // (index, command) in apply order
    commands: Vec<(u64, Vec<u8>)>,
    last_applied: LogId,
}

/// State machine that records every applied command.
///
/// State is volatile: after a restart it is rebuilt by re-applying the
/// committed log.
#[derive(Debug, Default)]
pub struct MemStateMachine {
    node_id: u32,
    inner: RwLock<Inner>,
}

impl MemStateMachine {
    pub fn new(node_id: u32) -> Self {
        Self {
            node_id,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Commands applied so far, in apply order.
    pub fn applied_commands(&self) -> Vec<(u64, Vec<u8>)> {
        self.inner.read().commands.clone()
    }
}

impl StateMachine for MemStateMachine {
    fn apply(
        &self,
        entry: &Entry,
    ) -> Result<()> {
        let mut inner = self.inner.write();
        if entry.index <= inner.last_applied.index {
            trace!("[{}] entry {} already applied", self.node_id, entry.index);
            return Ok(());
        }
        if entry.index != inner.last_applied.index + 1 {
            return Err(StorageError::StateMachineError(format!(
                "out of order apply: last applied {}, got {}",
                inner.last_applied.index, entry.index
            ))
            .into());
        }

        if let EntryPayload::Command(command) = &entry.payload {
            inner.commands.push((entry.index, command.clone()));
        }
        inner.last_applied = entry.log_id();
        Ok(())
    }

    fn last_applied(&self) -> LogId {
        self.inner.read().last_applied
    }

    fn snapshot(&self) -> Result<Snapshot> {
        let inner = self.inner.read();
        Ok(Snapshot {
            last_included: inner.last_applied,
            data: bincode::serialize(&inner.commands)?,
        })
    }

    fn restore(
        &self,
        snapshot: Snapshot,
    ) -> Result<()> {
        let commands: Vec<(u64, Vec<u8>)> = bincode::deserialize(&snapshot.data)?;
        let mut inner = self.inner.write();
        inner.commands = commands;
        inner.last_applied = snapshot.last_included;
        debug!("[{}] restored state machine at {}", self.node_id, snapshot.last_included);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}
