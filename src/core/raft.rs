use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::sleep_until;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::ApplyCommand;
use super::FollowerState;
use super::NodeStatus;
use super::RaftContext;
use super::RaftEvent;
use super::RaftRole;
use super::RoleEvent;
#[cfg(test)]
use super::RoleKind;
use crate::proto::LogId;
use crate::NetworkError;
use crate::RaftLog;
use crate::Result;
use crate::StateMachine;
use crate::StateStorage;
use crate::TypeConfig;

/// The consensus loop of one node.
///
/// Owns the current role and processes, in priority order: shutdown, role
/// transitions requested by the role itself, timer ticks, then inbound RPCs,
/// client requests and results of outbound peer tasks.
pub(crate) struct Raft<T>
where T: TypeConfig
{
    pub(crate) node_id: u32,
    pub(crate) role: RaftRole<T>,
    pub(crate) ctx: RaftContext<T>,

    // Network & client events
    pub(crate) event_tx: mpsc::Sender<RaftEvent>,
    event_rx: mpsc::Receiver<RaftEvent>,

    // Role transitions
    pub(crate) role_tx: mpsc::UnboundedSender<RoleEvent>,
    role_rx: mpsc::UnboundedReceiver<RoleEvent>,

    // Progress of the apply task
    applied_rx: watch::Receiver<LogId>,
    last_persisted_applied: u64,

    status_tx: watch::Sender<NodeStatus>,

    // Shutdown signal
    shutdown_signal: watch::Receiver<()>,

    // For unit test
    #[cfg(test)]
    test_role_transition_listener: Vec<mpsc::UnboundedSender<RoleKind>>,
}

impl<T> Raft<T>
where T: TypeConfig
{
    /// Restores term, vote and commit index and starts as follower.
    pub(crate) fn new(
        ctx: RaftContext<T>,
        event_tx: mpsc::Sender<RaftEvent>,
        event_rx: mpsc::Receiver<RaftEvent>,
        applied_rx: watch::Receiver<LogId>,
        shutdown_signal: watch::Receiver<()>,
    ) -> Result<Self> {
        let node_id = ctx.node_id;
        let hard_state = ctx.state_storage().load_hard_state()?.unwrap_or_default();
        let commit_index = ctx.raft_log().committed_index();
        let last_persisted_applied = ctx.state_storage().load_last_applied()?;
        info!(
            "[{}] starting as follower: {:?}, commit_index: {}",
            node_id, hard_state, commit_index
        );

        let role = RaftRole::Follower(Box::new(FollowerState::new(
            node_id,
            hard_state,
            commit_index,
            ctx.node_config(),
        )));
        let (role_tx, role_rx) = mpsc::unbounded_channel();

        let mut raft = Raft {
            node_id,
            role,
            ctx,
            event_tx,
            event_rx,
            role_tx,
            role_rx,
            applied_rx,
            last_persisted_applied,
            status_tx: watch::channel(NodeStatus::default()).0,
            shutdown_signal,
            #[cfg(test)]
            test_role_transition_listener: Vec::new(),
        };
        let status = raft.status();
        raft.status_tx.send_replace(status);
        Ok(raft)
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<NodeStatus> {
        self.status_tx.subscribe()
    }

    pub(crate) async fn run(&mut self) -> Result<()> {
        if self.role.is_timer_expired() {
            self.role.reset_timer();
        }

        loop {
            // Each role resets its own deadline when it ticks
            let tick = sleep_until(self.role.next_deadline());

            tokio::select! {
                biased;
                // P0: shutdown received
                _ = self.shutdown_signal.changed() => {
                    warn!("[Raft:{}] shutdown signal received.", self.node_id);
                    return Ok(());
                }

                // P1: role transitions requested while handling the previous event
                Some(role_event) = self.role_rx.recv() => {
                    debug!("[{}] receive role event: {:?}", self.node_id, role_event);
                    if let Err(e) = self.handle_role_event(role_event).await {
                        error!("[{}] handle_role_event: {:?}", self.node_id, e);
                    }
                }

                // P2: heartbeat or election timeout
                _ = tick => {
                    trace!("[{}] receive tick", self.node_id);
                    if let Err(e) = self.role.tick(&self.role_tx, &self.ctx).await {
                        error!("[{}] tick failed: {:?}", self.node_id, e);
                    }
                }

                // P3: everything else
                Some(raft_event) = self.event_rx.recv() => {
                    trace!("[{}] receive raft event: {:?}", self.node_id, raft_event);
                    if let Err(e) = self.role.handle_raft_event(raft_event, &self.ctx, &self.role_tx).await {
                        debug!("[{}] handle_raft_event: {:?}", self.node_id, e);
                    }
                }

                // P4: apply progress, only refreshes the published status
                Ok(()) = self.applied_rx.changed() => {
                    trace!("[{}] applied: {}", self.node_id, *self.applied_rx.borrow());
                }
            }

            self.sync_status();
        }
    }

    /// `handle_role_event` is responsible for role transitions and for
    /// forwarding commit progress to the apply task.
    pub(crate) async fn handle_role_event(
        &mut self,
        role_event: RoleEvent,
    ) -> Result<()> {
        match role_event {
            RoleEvent::BecomeFollower(leader_id) => {
                let leader_address = leader_id
                    .and_then(|id| self.ctx.membership().member(id))
                    .map(|m| m.address);
                self.role.abort_pending_requests(leader_id, leader_address);

                if !self.role.is_follower() {
                    self.role = self.role.become_follower()?;

                    #[cfg(test)]
                    self.notify_role_transition();
                }
                self.ctx.membership().set_current_leader(leader_id);
            }

            RoleEvent::BecomeCandidate => {
                self.role = self.role.become_candidate()?;

                #[cfg(test)]
                self.notify_role_transition();

                // Campaign right away instead of waiting for another timeout
                self.role.tick(&self.role_tx, &self.ctx).await?;
            }

            RoleEvent::BecomeLeader => {
                self.role = self.role.become_leader()?;

                #[cfg(test)]
                self.notify_role_transition();

                if let RaftRole::Leader(leader) = &mut self.role {
                    leader.init_leadership(&self.ctx, &self.role_tx).await?;
                }
            }

            RoleEvent::NotifyNewCommitIndex { new_commit_index } => {
                debug!("[{}] notify new commit index: {}", self.node_id, new_commit_index);
                self.ctx
                    .apply_tx()
                    .send(ApplyCommand::Apply(new_commit_index))
                    .map_err(|e| {
                        let error_str = format!("{:?}", e);
                        error!("Failed to send: {}", error_str);
                        NetworkError::SingalSendFailed(error_str)
                    })?;
            }

            RoleEvent::ReprocessEvent(raft_event) => {
                debug!("[{}] replay raft event as {}", self.node_id, self.role.kind());
                self.role
                    .handle_raft_event(*raft_event, &self.ctx, &self.role_tx)
                    .await?;
            }
        };

        Ok(())
    }

    pub(crate) fn status(&self) -> NodeStatus {
        let shared_state = self.role.shared_state();
        NodeStatus {
            node_id: self.node_id,
            role: self.role.kind(),
            current_term: shared_state.current_term(),
            voted_for: shared_state.voted_for(),
            commit_index: shared_state.commit_index,
            last_applied: *self.applied_rx.borrow(),
            last_log_id: self.ctx.raft_log().last_log_id(),
            leader_id: self.ctx.membership().current_leader(),
            epoch: self.ctx.membership().epoch(),
            degraded: shared_state.is_degraded(),
        }
    }

    /// Persists apply progress and publishes the status if anything changed.
    fn sync_status(&mut self) {
        let last_applied = self.applied_rx.borrow().index;
        if last_applied > self.last_persisted_applied {
            match self.ctx.state_storage().save_last_applied(last_applied) {
                Ok(()) => self.last_persisted_applied = last_applied,
                Err(e) => warn!("[{}] save_last_applied({}) failed: {:?}", self.node_id, last_applied, e),
            }
        }

        let status = self.status();
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });
    }

    #[cfg(test)]
    pub(crate) fn register_role_transition_listener(
        &mut self,
        tx: mpsc::UnboundedSender<RoleKind>,
    ) {
        self.test_role_transition_listener.push(tx);
    }

    #[cfg(test)]
    fn notify_role_transition(&self) {
        let new_role = self.role.kind();
        for tx in &self.test_role_transition_listener {
            tx.send(new_role).expect("should succeed");
        }
    }
}

impl<T> Drop for Raft<T>
where T: TypeConfig
{
    fn drop(&mut self) {
        info!("[{}] Raft been dropped.", self.node_id);

        if let Err(e) = self.ctx.raft_log().flush() {
            error!("Flush raft log failed: {:?}", e);
        }

        if let Err(e) = self.ctx.state_storage().flush() {
            error!("Flush state storage failed: {:?}", e);
        }

        if let Err(e) = self.ctx.state_machine().flush() {
            error!("Flush state machine failed: {:?}", e);
        }
    }
}
