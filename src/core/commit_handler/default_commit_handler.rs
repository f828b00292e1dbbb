use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ApplyCommand;
use crate::alias::ROF;
use crate::alias::SMOF;
use crate::proto::LogId;
use crate::RaftLog;
use crate::Result;
use crate::Snapshot;
use crate::StateMachine;
use crate::StorageError;
use crate::TypeConfig;

/// Applies committed entries to the state machine, strictly in index order.
///
/// Runs as its own task so that a slow state machine never blocks the
/// consensus loop. Progress is published through a watch channel.
pub(crate) struct DefaultCommitHandler<T>
where T: TypeConfig
{
    node_id: u32,
    state_machine: Arc<SMOF<T>>,
    raft_log: Arc<ROF<T>>,
    apply_rx: Option<mpsc::UnboundedReceiver<ApplyCommand>>,
    applied_tx: watch::Sender<LogId>,
    batch_size: u64,
    // Highest commit index received so far
    commit_index: u64,
    shutdown_signal: watch::Receiver<()>,
}

impl<T> DefaultCommitHandler<T>
where T: TypeConfig
{
    pub(crate) fn new(
        node_id: u32,
        state_machine: Arc<SMOF<T>>,
        raft_log: Arc<ROF<T>>,
        apply_rx: mpsc::UnboundedReceiver<ApplyCommand>,
        applied_tx: watch::Sender<LogId>,
        batch_size: u64,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            node_id,
            state_machine,
            raft_log,
            apply_rx: Some(apply_rx),
            applied_tx,
            batch_size: batch_size.max(1),
            commit_index: 0,
            shutdown_signal,
        }
    }

    pub(crate) async fn run(&mut self) -> Result<()> {
        let mut apply_rx = match self.apply_rx.take() {
            Some(rx) => rx,
            None => {
                warn!("[{}] commit handler already running", self.node_id);
                return Ok(());
            }
        };
        let mut shutdown_signal = self.shutdown_signal.clone();

        loop {
            tokio::select! {
                biased;
                // P0: shutdown received;
                _ = shutdown_signal.changed() => {
                    info!("[{}] commit handler shutdown signal received.", self.node_id);
                    return Ok(());
                }

                command = apply_rx.recv() => {
                    match command {
                        Some(command) => self.handle_command(command),
                        None => {
                            debug!("[{}] apply channel closed", self.node_id);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    fn handle_command(
        &mut self,
        command: ApplyCommand,
    ) {
        match command {
            ApplyCommand::Apply(commit_index) => {
                self.commit_index = self.commit_index.max(commit_index);
                if let Err(e) = self.apply_up_to(self.commit_index) {
                    error!("[{}] apply up to {} failed: {:?}", self.node_id, self.commit_index, e);
                }
            }
            ApplyCommand::Restore(snapshot, resp_tx) => {
                let result = self.restore(snapshot);
                if resp_tx.send(result).is_err() {
                    warn!("[{}] restore requester is gone", self.node_id);
                }
            }
        }
    }

    /// Applies entries `(last_applied, commit_index]` in batches of
    /// `batch_size`, publishing progress after every batch.
    pub(crate) fn apply_up_to(
        &self,
        commit_index: u64,
    ) -> Result<LogId> {
        let mut last_applied = self.state_machine.last_applied();

        while last_applied.index < commit_index {
            let start = last_applied.index + 1;
            let end = commit_index.min(last_applied.index + self.batch_size);
            let entries = self.raft_log.get_entries_range(start..=end)?;

            match entries.first() {
                Some(first) if first.index == start => {}
                _ => {
                    let compacted = self.raft_log.snapshot_log_id().map(|id| id.index).unwrap_or(0);
                    return Err(StorageError::StateMachineError(format!(
                        "entry {} is not in the log (compacted through {}), state machine cannot catch up",
                        start, compacted
                    ))
                    .into());
                }
            }

            for entry in &entries {
                self.state_machine.apply(entry)?;
                last_applied = entry.log_id();
            }
            trace!("[{}] applied entries {}..={}", self.node_id, start, last_applied.index);
            self.applied_tx.send_replace(last_applied);

            if entries.len() as u64 != end - start + 1 {
                return Err(StorageError::StateMachineError(format!(
                    "gap in the log after index {}",
                    last_applied.index
                ))
                .into());
            }
        }

        Ok(last_applied)
    }

    fn restore(
        &self,
        snapshot: Snapshot,
    ) -> Result<()> {
        let last_included = snapshot.last_included;
        if last_included.index <= self.state_machine.last_applied().index {
            debug!(
                "[{}] snapshot {} is not newer than applied state, skipped",
                self.node_id, last_included
            );
            return Ok(());
        }

        self.state_machine.restore(snapshot)?;
        self.state_machine.flush()?;
        self.applied_tx.send_replace(last_included);
        info!("[{}] state machine restored from snapshot {}", self.node_id, last_included);
        Ok(())
    }
}
