use std::fmt::Debug;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::HardState;
use super::RaftRole;
use super::RoleKind;
use super::SharedState;
use crate::metrics::COMMIT_INDEX;
use crate::metrics::STORAGE_FAILURES;
use crate::proto::LogId;
use crate::ConsensusError;
use crate::Error;
use crate::NetworkError;
use crate::RaftContext;
use crate::RaftEvent;
use crate::RaftLog;
use crate::Result;
use crate::RoleEvent;
use crate::StateMachine;
use crate::StateStorage;
use crate::StateTransitionError;
use crate::StorageError;
use crate::TypeConfig;

/// Behaviour shared by every role. Each role focuses on its own protocol
/// logic, the helpers below keep persistence and commit bookkeeping uniform.
#[async_trait::async_trait]
pub(crate) trait RaftRoleState: Send + Sync + 'static {
    type T: TypeConfig;

    //--- For sharing state behaviors
    fn shared_state(&self) -> &SharedState;
    fn shared_state_mut(&mut self) -> &mut SharedState;

    fn role(&self) -> RoleKind;

    fn node_id(&self) -> u32 {
        self.shared_state().node_id
    }

    fn current_term(&self) -> u64 {
        self.shared_state().current_term()
    }

    fn voted_for(&self) -> Option<u32> {
        self.shared_state().voted_for()
    }

    fn commit_index(&self) -> u64 {
        self.shared_state().commit_index
    }

    fn is_degraded(&self) -> bool {
        self.shared_state().is_degraded()
    }

    fn become_leader(&self) -> Result<RaftRole<Self::T>> {
        warn!("[{}] become_leader Illegal. I am {}", self.node_id(), self.role());
        Err(StateTransitionError::InvalidTransition.into())
    }
    fn become_candidate(&self) -> Result<RaftRole<Self::T>> {
        warn!("[{}] become_candidate Illegal. I am {}", self.node_id(), self.role());
        Err(StateTransitionError::InvalidTransition.into())
    }
    fn become_follower(&self) -> Result<RaftRole<Self::T>> {
        warn!("[{}] become_follower Illegal. I am {}", self.node_id(), self.role());
        Err(StateTransitionError::InvalidTransition.into())
    }

    /// Fails requests waiting for commit. Only the leader holds any.
    fn abort_pending_requests(
        &mut self,
        _leader_id: Option<u32>,
        _leader_address: Option<String>,
    ) {
    }

    //--- Timer related ---
    fn next_deadline(&self) -> Instant;
    fn is_timer_expired(&self) -> bool;
    fn reset_timer(&mut self);

    async fn tick(
        &mut self,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
        ctx: &RaftContext<Self::T>,
    ) -> Result<()>;

    async fn handle_raft_event(
        &mut self,
        raft_event: RaftEvent,
        ctx: &RaftContext<Self::T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()>;

    //--- Persistence helpers

    /// Writes term and vote as one durable record, then adopts them.
    ///
    /// Memory is left untouched when the write fails.
    fn persist_hard_state(
        &mut self,
        hard_state: HardState,
        ctx: &RaftContext<Self::T>,
    ) -> Result<()> {
        if let Err(e) = ctx.state_storage().save_hard_state(hard_state) {
            error!("[{}] save_hard_state({:?}) failed: {:?}", self.node_id(), hard_state, e);
            self.record_storage_failure();
            return Err(e);
        }
        self.record_storage_success();
        self.shared_state_mut().hard_state = hard_state;
        Ok(())
    }

    /// Adopts a higher term observed in a message, clearing the vote.
    fn step_to_term(
        &mut self,
        term: u64,
        ctx: &RaftContext<Self::T>,
    ) -> Result<()> {
        if term <= self.current_term() {
            return Ok(());
        }
        debug!("[{}] term {} -> {}", self.node_id(), self.current_term(), term);
        self.persist_hard_state(
            HardState {
                current_term: term,
                voted_for: None,
            },
            ctx,
        )
    }

    /// Steps down on a higher term found in a response. The role change is
    /// requested even when the new term could not be persisted.
    fn step_down_to_term(
        &mut self,
        term: u64,
        ctx: &RaftContext<Self::T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        let persisted = self.step_to_term(term, ctx);
        send_role_event(role_tx, RoleEvent::BecomeFollower(None))?;
        persisted
    }

    fn record_storage_failure(&mut self) {
        let node_id = self.node_id();
        STORAGE_FAILURES.with_label_values(&[&node_id.to_string()]).inc();

        let shared_state = self.shared_state_mut();
        shared_state.storage_failures = shared_state.storage_failures.saturating_add(1);
        if shared_state.storage_failures == shared_state.max_storage_failures {
            error!(
                "[{}] {} consecutive storage failures, node is degraded",
                node_id, shared_state.storage_failures
            );
        }
    }

    fn record_storage_success(&mut self) {
        let node_id = self.node_id();
        let shared_state = self.shared_state_mut();
        if shared_state.storage_failures > 0 {
            if shared_state.is_degraded() {
                info!("[{}] storage recovered, leaving degraded mode", node_id);
            }
            shared_state.storage_failures = 0;
        }
    }

    /// Raises the commit index and hands the new entries to the apply task.
    ///
    /// Never moves backward. A configuration entry at or below the new commit
    /// index becomes the active configuration.
    fn update_commit_index_with_signal(
        &mut self,
        new_commit_index: u64,
        ctx: &RaftContext<Self::T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        if new_commit_index <= self.commit_index() {
            return Ok(());
        }
        debug!("[{}] update_commit_index to: {}", self.node_id(), new_commit_index);
        self.shared_state_mut().commit_index = new_commit_index;
        ctx.raft_log().mark_committed(new_commit_index)?;

        if let Err(e) = ctx.state_storage().save_commit_index(new_commit_index) {
            warn!("[{}] save_commit_index({}) failed: {:?}", self.node_id(), new_commit_index, e);
        }
        if let Some(configuration) = ctx.membership().commit_up_to(new_commit_index) {
            if let Err(e) = ctx.state_storage().save_membership(&configuration) {
                warn!("[{}] save_membership failed: {:?}", self.node_id(), e);
            }
        }
        COMMIT_INDEX
            .with_label_values(&[&self.node_id().to_string()])
            .set(new_commit_index as i64);

        send_role_event(role_tx, RoleEvent::NotifyNewCommitIndex { new_commit_index })
    }

    /// Discards the log prefix already captured by the state machine.
    fn compact_log(
        &self,
        ctx: &RaftContext<Self::T>,
    ) -> Result<LogId> {
        let snapshot = ctx.state_machine().snapshot()?;
        let through = snapshot.last_included;
        if through.index > self.commit_index() {
            return Err(StorageError::StateMachineError(format!(
                "state machine at {} is ahead of commit index {}",
                through,
                self.commit_index()
            ))
            .into());
        }
        if through.index == 0 {
            return Ok(through);
        }

        ctx.state_machine().flush()?;
        ctx.state_storage().save_snapshot(&snapshot)?;
        ctx.raft_log().truncate_prefix(through)?;
        info!("[{}] log compacted through {}", self.node_id(), through);
        Ok(through)
    }

    fn not_leader_error(
        &self,
        ctx: &RaftContext<Self::T>,
    ) -> Error {
        ConsensusError::NotLeader {
            leader_id: ctx.membership().current_leader(),
            leader_address: ctx.membership().leader_address(),
        }
        .into()
    }
}

/// Answers a request whose sender may already be gone.
pub(crate) fn send_reply<R: Debug + Send>(
    resp_tx: oneshot::Sender<R>,
    response: R,
) -> Result<()> {
    resp_tx.send(response).map_err(|e| {
        let error_str = format!("{:?}", e);
        debug!("reply dropped, requester is gone: {}", error_str);
        NetworkError::SingalSendFailed(error_str).into()
    })
}

pub(crate) fn send_role_event(
    role_tx: &mpsc::UnboundedSender<RoleEvent>,
    event: RoleEvent,
) -> Result<()> {
    role_tx.send(event).map_err(|e| {
        let error_str = format!("{:?}", e);
        error!("Failed to send: {}", error_str);
        NetworkError::SingalSendFailed(error_str).into()
    })
}
