use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::role_state::send_reply;
use super::role_state::send_role_event;
use super::role_state::RaftRoleState;
use super::CandidateState;
use super::HardState;
use super::LeaderState;
use super::RaftRole;
use super::RoleKind;
use super::SharedState;
use crate::proto::AppendEntriesRequest;
use crate::proto::AppendEntriesResponse;
use crate::proto::InstallSnapshotRequest;
use crate::proto::InstallSnapshotResponse;
use crate::proto::VoteRequest;
use crate::proto::VoteResponse;
use crate::ApplyCommand;
use crate::ElectionTimer;
use crate::NetworkError;
use crate::RaftContext;
use crate::RaftEvent;
use crate::RaftLog;
use crate::RaftNodeConfig;
use crate::Result;
use crate::RoleEvent;
use crate::Snapshot;
use crate::StateStorage;
use crate::TypeConfig;

/// Follower node's state in Raft consensus.
///
/// Answers leader heartbeats and log replication, grants votes, and becomes
/// a candidate when the election timer fires without hearing from a leader.
pub(crate) struct FollowerState<T: TypeConfig> {
    pub(crate) shared_state: SharedState,

    // -- Cluster Configuration --
    pub(super) node_config: Arc<RaftNodeConfig>,

    // -- Election Timing --
    pub(super) timer: ElectionTimer,

    _marker: PhantomData<T>,
}

#[async_trait::async_trait]
impl<T: TypeConfig> RaftRoleState for FollowerState<T> {
    type T = T;

    fn shared_state(&self) -> &SharedState {
        &self.shared_state
    }

    fn shared_state_mut(&mut self) -> &mut SharedState {
        &mut self.shared_state
    }

    fn role(&self) -> RoleKind {
        RoleKind::Follower
    }

    fn become_candidate(&self) -> Result<RaftRole<T>> {
        info!(
            "[{}<{}>] >>> switch to Candidate now.",
            self.node_id(),
            self.current_term()
        );
        Ok(RaftRole::Candidate(Box::new(self.into())))
    }

    fn is_timer_expired(&self) -> bool {
        self.timer.is_expired()
    }

    fn reset_timer(&mut self) {
        self.timer.reset()
    }

    fn next_deadline(&self) -> Instant {
        self.timer.next_deadline()
    }

    /// Election timeout: no valid leader contact for a whole timeout.
    async fn tick(
        &mut self,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
        ctx: &RaftContext<T>,
    ) -> Result<()> {
        self.reset_timer();

        if self.is_degraded() {
            self.check_storage(ctx);
            return Ok(());
        }

        if !ctx.membership().is_voter(self.node_id()) {
            trace!("[{}] not a voter, stay follower", self.node_id());
            return Ok(());
        }

        debug!("[{}] election timeout, start campaign", self.node_id());
        send_role_event(role_tx, RoleEvent::BecomeCandidate)
    }

    async fn handle_raft_event(
        &mut self,
        raft_event: RaftEvent,
        ctx: &RaftContext<T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        match raft_event {
            RaftEvent::ReceiveVoteRequest(vote_request, resp_tx) => {
                let response = self.handle_vote_request(&vote_request, ctx);
                send_reply(resp_tx, response)?;
            }

            RaftEvent::AppendEntries(append_request, resp_tx) => {
                self.handle_append_entries(append_request, resp_tx, ctx, role_tx)?;
            }

            RaftEvent::InstallSnapshot(request, resp_tx) => {
                self.handle_install_snapshot(request, resp_tx, ctx, role_tx).await?;
            }

            RaftEvent::ClientPropose(_, resp_tx) => {
                send_reply(resp_tx, Err(self.not_leader_error(ctx)))?;
            }

            RaftEvent::ChangeMembership(_, resp_tx) => {
                send_reply(resp_tx, Err(self.not_leader_error(ctx)))?;
            }

            RaftEvent::CompactLog(resp_tx) => {
                send_reply(resp_tx, self.compact_log(ctx))?;
            }

            RaftEvent::VoteResponseReceived { term, peer_id, .. }
            | RaftEvent::AppendResponseReceived { term, peer_id, .. }
            | RaftEvent::SnapshotResponseReceived { term, peer_id, .. } => {
                trace!(
                    "[{}] ignore response of {} sent in term {}",
                    self.node_id(),
                    peer_id,
                    term
                );
            }
        }
        Ok(())
    }
}

impl<T: TypeConfig> FollowerState<T> {
    pub(crate) fn new(
        node_id: u32,
        hard_state: HardState,
        commit_index: u64,
        node_config: Arc<RaftNodeConfig>,
    ) -> Self {
        let election = &node_config.raft.election;
        let timer = ElectionTimer::new((election.election_timeout_min, election.election_timeout_max));
        let max_storage_failures = node_config.raft.max_consecutive_storage_failures;
        Self {
            shared_state: SharedState::new(node_id, hard_state, commit_index, max_storage_failures),
            node_config,
            timer,
            _marker: PhantomData,
        }
    }

    /// Vote arbitration. A vote is only granted once term and vote are durable.
    pub(super) fn handle_vote_request(
        &mut self,
        request: &VoteRequest,
        ctx: &RaftContext<T>,
    ) -> VoteResponse {
        let last_log_id = ctx.raft_log().last_log_id();

        if self.is_degraded() {
            warn!("[{}] degraded, refusing vote for {}", self.node_id(), request.candidate_id);
            return VoteResponse {
                term: self.current_term(),
                vote_granted: false,
                last_log_index: last_log_id.index,
                last_log_term: last_log_id.term,
            };
        }

        let update = ctx.election_handler().handle_vote_request(
            request,
            self.current_term(),
            self.voted_for(),
            last_log_id,
        );

        let mut hard_state = self.shared_state.hard_state;
        if let Some(term) = update.term_update {
            hard_state.current_term = term;
            hard_state.voted_for = None;
        }
        if let Some(candidate_id) = update.new_voted_for {
            hard_state.voted_for = Some(candidate_id);
        }

        let persisted = hard_state == self.shared_state.hard_state || self.persist_hard_state(hard_state, ctx).is_ok();
        if persisted && update.term_update.is_some() {
            ctx.membership().set_current_leader(None);
        }

        let vote_granted = persisted && update.new_voted_for.is_some();
        if vote_granted {
            debug!(
                "[{}] voted for {} in term {}",
                self.node_id(),
                request.candidate_id,
                self.current_term()
            );
            self.reset_timer();
        }

        VoteResponse {
            term: self.current_term(),
            vote_granted,
            last_log_index: last_log_id.index,
            last_log_term: last_log_id.term,
        }
    }

    pub(super) fn handle_append_entries(
        &mut self,
        request: AppendEntriesRequest,
        resp_tx: oneshot::Sender<AppendEntriesResponse>,
        ctx: &RaftContext<T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        let my_id = self.node_id();

        if request.term < self.current_term() {
            debug!(
                "[{}] stale append from {} (term {} < {})",
                my_id,
                request.leader_id,
                request.term,
                self.current_term()
            );
            return send_reply(resp_tx, AppendEntriesResponse::rejected(my_id, self.current_term()));
        }

        if self.is_degraded() {
            warn!("[{}] degraded, rejecting append from {}", my_id, request.leader_id);
            return send_reply(resp_tx, AppendEntriesResponse::rejected(my_id, self.current_term()));
        }

        if let Err(e) = self.step_to_term(request.term, ctx) {
            send_reply(resp_tx, AppendEntriesResponse::rejected(my_id, self.current_term()))?;
            return Err(e);
        }
        self.reset_timer();
        ctx.membership().set_current_leader(Some(request.leader_id));

        let carries_config = request.entries.iter().any(|e| e.payload.is_config());
        let result = ctx.replication_handler().handle_append_entries(
            request,
            self.current_term(),
            self.commit_index(),
            ctx.raft_log(),
        );

        let updates = match result {
            Ok(updates) => updates,
            Err(e) => {
                if e.is_storage_error() {
                    self.record_storage_failure();
                }
                send_reply(resp_tx, AppendEntriesResponse::rejected(my_id, self.current_term()))?;
                return Err(e);
            }
        };

        if updates.response.is_success() {
            self.record_storage_success();
        }

        let new_commit_index = updates.commit_index_update.unwrap_or(self.commit_index());
        if carries_config || ctx.membership().has_pending_change() {
            // New entries may bring configurations, a truncation may drop one
            if let Some(configuration) = ctx.membership().recover_from_log(ctx.raft_log().as_ref(), new_commit_index)? {
                if let Err(e) = ctx.state_storage().save_membership(&configuration) {
                    warn!("[{}] save_membership failed: {:?}", my_id, e);
                }
            }
        }

        if let Some(commit_index) = updates.commit_index_update {
            self.update_commit_index_with_signal(commit_index, ctx, role_tx)?;
        }

        send_reply(resp_tx, updates.response)
    }

    pub(super) async fn handle_install_snapshot(
        &mut self,
        request: InstallSnapshotRequest,
        resp_tx: oneshot::Sender<InstallSnapshotResponse>,
        ctx: &RaftContext<T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        let my_id = self.node_id();
        let reject = |term: u64| InstallSnapshotResponse {
            node_id: my_id,
            term,
            success: false,
        };

        if request.term < self.current_term() || self.is_degraded() {
            return send_reply(resp_tx, reject(self.current_term()));
        }
        if let Err(e) = self.step_to_term(request.term, ctx) {
            send_reply(resp_tx, reject(self.current_term()))?;
            return Err(e);
        }
        self.reset_timer();
        ctx.membership().set_current_leader(Some(request.leader_id));

        let last_included = request.last_included;
        if last_included.index > self.commit_index() {
            if let Err(e) = self.install_snapshot(request, ctx, role_tx).await {
                warn!("[{}] install snapshot {} failed: {:?}", my_id, last_included, e);
                if e.is_storage_error() {
                    self.record_storage_failure();
                }
                send_reply(resp_tx, reject(self.current_term()))?;
                return Err(e);
            }
        } else {
            debug!("[{}] snapshot {} already covered by commit index", my_id, last_included);
        }

        send_reply(
            resp_tx,
            InstallSnapshotResponse {
                node_id: my_id,
                term: self.current_term(),
                success: true,
            },
        )
    }

    async fn install_snapshot(
        &mut self,
        request: InstallSnapshotRequest,
        ctx: &RaftContext<T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        let last_included = request.last_included;
        info!("[{}] installing snapshot {} from {}", self.node_id(), last_included, request.leader_id);

        let snapshot = Snapshot {
            last_included,
            data: request.data,
        };
        ctx.state_storage().save_snapshot(&snapshot)?;

        // Restores go through the apply task so they stay ordered with applies
        let (restore_tx, restore_rx) = oneshot::channel();
        ctx.apply_tx()
            .send(ApplyCommand::Restore(snapshot, restore_tx))
            .map_err(|e| NetworkError::SingalSendFailed(format!("{:?}", e)))?;
        restore_rx
            .await
            .map_err(|e| NetworkError::SingalReceiveFailed(e.to_string()))??;

        ctx.raft_log().install_snapshot(last_included)?;

        ctx.membership().install(request.configuration);
        ctx.membership()
            .recover_from_log(ctx.raft_log().as_ref(), last_included.index)?;
        ctx.state_storage().save_membership(&ctx.membership().active())?;

        self.update_commit_index_with_signal(last_included.index, ctx, role_tx)
    }

    /// Tries a durability barrier on both stores, a success ends degraded mode.
    fn check_storage(
        &mut self,
        ctx: &RaftContext<T>,
    ) {
        match ctx.raft_log().flush().and_then(|_| ctx.state_storage().flush()) {
            Ok(()) => self.record_storage_success(),
            Err(e) => warn!("[{}] storage check failed: {:?}", self.node_id(), e),
        }
    }
}

impl<T: TypeConfig> From<&CandidateState<T>> for FollowerState<T> {
    fn from(candidate_state: &CandidateState<T>) -> Self {
        Self::from_shared_state(candidate_state.shared_state.clone(), candidate_state.node_config.clone())
    }
}

impl<T: TypeConfig> From<&LeaderState<T>> for FollowerState<T> {
    fn from(leader_state: &LeaderState<T>) -> Self {
        Self::from_shared_state(leader_state.shared_state.clone(), leader_state.node_config.clone())
    }
}

impl<T: TypeConfig> FollowerState<T> {
    fn from_shared_state(
        shared_state: SharedState,
        node_config: Arc<RaftNodeConfig>,
    ) -> Self {
        let election = &node_config.raft.election;
        let timer = ElectionTimer::new((election.election_timeout_min, election.election_timeout_max));
        Self {
            shared_state,
            node_config,
            timer,
            _marker: PhantomData,
        }
    }
}

impl<T: TypeConfig> Debug for FollowerState<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("FollowerState")
            .field("shared_state", &self.shared_state)
            .finish()
    }
}
