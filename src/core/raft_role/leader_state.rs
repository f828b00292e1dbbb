use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::trace;
use tracing::warn;

use super::role_state::send_reply;
use super::role_state::send_role_event;
use super::role_state::RaftRoleState;
use super::CandidateState;
use super::RaftRole;
use super::RoleKind;
use super::SharedState;
use crate::if_higher_term_found;
use crate::metrics::LEADER_ELECTED;
use crate::metrics::REPLICATION_FAILURES;
use crate::proto::AppendEntriesResponse;
use crate::proto::AppendOutcome;
use crate::proto::Entry;
use crate::proto::EntryPayload;
use crate::proto::InstallSnapshotRequest;
use crate::proto::InstallSnapshotResponse;
use crate::proto::LogId;
use crate::proto::MembershipChange;
use crate::proto::VoteResponse;
use crate::ConsensusError;
use crate::MembershipError;
use crate::PeerProgress;
use crate::RaftContext;
use crate::RaftEvent;
use crate::RaftLog;
use crate::RaftNodeConfig;
use crate::ReplicationHandler;
use crate::ReplicationTimer;
use crate::Result;
use crate::RoleEvent;
use crate::StateMachine;
use crate::StateStorage;
use crate::StorageError;
use crate::TypeConfig;

/// Leader node's state in Raft consensus.
///
/// Owns one [`PeerProgress`] per replication target and the client requests
/// waiting for their entry to commit.
pub(crate) struct LeaderState<T: TypeConfig> {
    pub(crate) shared_state: SharedState,

    // -- Cluster Configuration --
    pub(super) node_config: Arc<RaftNodeConfig>,

    // -- Heartbeat Timing --
    pub(super) timer: ReplicationTimer,

    // -- Replication Progress --
    pub(super) peers: HashMap<u32, PeerProgress>,

    /// Index of the no-op appended when this term's leadership started.
    /// Membership changes wait until it is committed.
    pub(super) noop_index: u64,

    // -- Client Requests --
    pub(super) pending_requests: BTreeMap<u64, oneshot::Sender<Result<u64>>>,

    /// Parent of every outbound replication task of this term
    pub(super) cancel: CancellationToken,

    _marker: PhantomData<T>,
}

#[async_trait::async_trait]
impl<T: TypeConfig> RaftRoleState for LeaderState<T> {
    type T = T;

    fn shared_state(&self) -> &SharedState {
        &self.shared_state
    }

    fn shared_state_mut(&mut self) -> &mut SharedState {
        &mut self.shared_state
    }

    fn role(&self) -> RoleKind {
        RoleKind::Leader
    }

    fn become_follower(&self) -> Result<RaftRole<T>> {
        info!(
            "[{}<{}>] >>> switch to Follower now.",
            self.node_id(),
            self.current_term()
        );
        Ok(RaftRole::Follower(Box::new(self.into())))
    }

    fn abort_pending_requests(
        &mut self,
        leader_id: Option<u32>,
        leader_address: Option<String>,
    ) {
        self.cancel.cancel();
        if self.pending_requests.is_empty() {
            return;
        }
        debug!(
            "[{}] abort {} pending requests, new leader: {:?}",
            self.node_id(),
            self.pending_requests.len(),
            leader_id
        );
        for (_, resp_tx) in std::mem::take(&mut self.pending_requests) {
            let _ = resp_tx.send(Err(ConsensusError::NotLeader {
                leader_id,
                leader_address: leader_address.clone(),
            }
            .into()));
        }
    }

    fn reset_timer(&mut self) {
        self.timer.reset()
    }

    fn is_timer_expired(&self) -> bool {
        self.timer.is_expired()
    }

    fn next_deadline(&self) -> Instant {
        self.timer.next_deadline()
    }

    /// Heartbeat: replicates to every peer that has no request in flight.
    async fn tick(
        &mut self,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
        ctx: &RaftContext<T>,
    ) -> Result<()> {
        self.reset_timer();

        if self.is_degraded() {
            warn!("[{}] storage degraded, stepping down", self.node_id());
            return send_role_event(role_tx, RoleEvent::BecomeFollower(None));
        }

        self.sync_peers(ctx);
        self.replicate_to_all(ctx);
        Ok(())
    }

    async fn handle_raft_event(
        &mut self,
        raft_event: RaftEvent,
        ctx: &RaftContext<T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        let my_term = self.current_term();

        match raft_event {
            RaftEvent::ReceiveVoteRequest(vote_request, resp_tx) => {
                if vote_request.term > my_term {
                    self.step_down_and_reprocess(
                        None,
                        RaftEvent::ReceiveVoteRequest(vote_request, resp_tx),
                        role_tx,
                    )?;
                } else {
                    let last_log_id = ctx.raft_log().last_log_id();
                    send_reply(
                        resp_tx,
                        VoteResponse {
                            term: my_term,
                            vote_granted: false,
                            last_log_index: last_log_id.index,
                            last_log_term: last_log_id.term,
                        },
                    )?;
                }
            }

            RaftEvent::AppendEntries(append_request, resp_tx) => {
                if append_request.term > my_term {
                    let leader_id = append_request.leader_id;
                    self.step_down_and_reprocess(
                        Some(leader_id),
                        RaftEvent::AppendEntries(append_request, resp_tx),
                        role_tx,
                    )?;
                } else {
                    if append_request.term == my_term {
                        error!(
                            "[{}] node {} claims leadership of my term {}",
                            self.node_id(),
                            append_request.leader_id,
                            my_term
                        );
                    }
                    send_reply(resp_tx, AppendEntriesResponse::rejected(self.node_id(), my_term))?;
                }
            }

            RaftEvent::InstallSnapshot(request, resp_tx) => {
                if request.term > my_term {
                    let leader_id = request.leader_id;
                    self.step_down_and_reprocess(Some(leader_id), RaftEvent::InstallSnapshot(request, resp_tx), role_tx)?;
                } else {
                    send_reply(
                        resp_tx,
                        InstallSnapshotResponse {
                            node_id: self.node_id(),
                            term: my_term,
                            success: false,
                        },
                    )?;
                }
            }

            RaftEvent::ClientPropose(command, resp_tx) => {
                self.handle_client_propose(command, resp_tx, ctx, role_tx)?;
            }

            RaftEvent::ChangeMembership(change, resp_tx) => {
                self.handle_change_membership(change, resp_tx, ctx, role_tx)?;
            }

            RaftEvent::CompactLog(resp_tx) => {
                send_reply(resp_tx, self.compact_log(ctx))?;
            }

            RaftEvent::VoteResponseReceived { term, peer_id, .. } => {
                trace!("[{}] late vote response of {} for term {}", self.node_id(), peer_id, term);
            }

            RaftEvent::AppendResponseReceived { term, peer_id, result } => {
                if term != my_term {
                    trace!("[{}] stale append response of {} for term {}", self.node_id(), peer_id, term);
                    return Ok(());
                }
                match result {
                    Ok(response) => self.handle_append_response(peer_id, response, ctx, role_tx)?,
                    Err(e) => self.on_peer_failure(peer_id, format!("{:?}", e)),
                }
            }

            RaftEvent::SnapshotResponseReceived {
                term,
                peer_id,
                last_included,
                result,
            } => {
                if term != my_term {
                    trace!("[{}] stale snapshot response of {} for term {}", self.node_id(), peer_id, term);
                    return Ok(());
                }
                match result {
                    Ok(response) => self.handle_snapshot_response(peer_id, last_included, response, ctx, role_tx)?,
                    Err(e) => self.on_peer_failure(peer_id, format!("{:?}", e)),
                }
            }
        }
        Ok(())
    }
}

impl<T: TypeConfig> LeaderState<T> {
    /// Runs once right after winning the election.
    ///
    /// Appends a no-op of the new term so that entries of earlier terms can be
    /// committed, then starts replicating.
    pub(crate) async fn init_leadership(
        &mut self,
        ctx: &RaftContext<T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        let my_id = self.node_id();
        ctx.membership().set_current_leader(Some(my_id));
        LEADER_ELECTED.with_label_values(&[&my_id.to_string()]).inc();

        if let Some(configuration) = ctx
            .membership()
            .recover_from_log(ctx.raft_log().as_ref(), self.commit_index())?
        {
            if let Err(e) = ctx.state_storage().save_membership(&configuration) {
                warn!("[{}] save_membership failed: {:?}", my_id, e);
            }
        }

        // Peers start optimistic: next_index right after the log we won with
        self.sync_peers(ctx);

        let noop_index = ctx.raft_log().last_entry_id() + 1;
        if let Err(e) = ctx
            .raft_log()
            .append(vec![Entry::new(noop_index, self.current_term(), EntryPayload::Noop)])
        {
            error!("[{}] failed to append no-op: {:?}", my_id, e);
            self.record_storage_failure();
            send_role_event(role_tx, RoleEvent::BecomeFollower(None))?;
            return Err(e);
        }
        self.noop_index = noop_index;
        info!(
            "[{}] leader of term {}, no-op at {}",
            my_id,
            self.current_term(),
            noop_index
        );

        self.try_advance_commit(ctx, role_tx)?;
        self.replicate_to_all(ctx);
        self.reset_timer();
        Ok(())
    }

    fn handle_client_propose(
        &mut self,
        command: Vec<u8>,
        resp_tx: oneshot::Sender<Result<u64>>,
        ctx: &RaftContext<T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        if self.is_degraded() {
            return send_reply(
                resp_tx,
                Err(StorageError::Degraded {
                    failures: self.shared_state.storage_failures,
                }
                .into()),
            );
        }

        let index = match self.append_local(EntryPayload::command(command), ctx) {
            Ok(index) => index,
            Err(e) => return send_reply(resp_tx, Err(e)),
        };
        trace!("[{}] proposal appended at {}", self.node_id(), index);

        self.pending_requests.insert(index, resp_tx);
        self.try_advance_commit(ctx, role_tx)?;
        self.replicate_to_all(ctx);
        Ok(())
    }

    fn handle_change_membership(
        &mut self,
        change: MembershipChange,
        resp_tx: oneshot::Sender<Result<u64>>,
        ctx: &RaftContext<T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        if self.commit_index() < self.noop_index {
            return send_reply(
                resp_tx,
                Err(MembershipError::NotReady {
                    term: self.current_term(),
                }
                .into()),
            );
        }
        if self.is_degraded() {
            return send_reply(
                resp_tx,
                Err(StorageError::Degraded {
                    failures: self.shared_state.storage_failures,
                }
                .into()),
            );
        }

        let epoch = ctx.raft_log().last_entry_id() + 1;
        let configuration = match ctx.membership().propose_change(&change, epoch) {
            Ok(configuration) => configuration,
            Err(e) => {
                debug!("[{}] membership change {:?} refused: {:?}", self.node_id(), change, e);
                return send_reply(resp_tx, Err(e));
            }
        };

        let index = match self.append_local(EntryPayload::Config(configuration.clone()), ctx) {
            Ok(index) => index,
            Err(e) => return send_reply(resp_tx, Err(e)),
        };
        info!("[{}] membership change {:?} appended at {}", self.node_id(), change, index);

        ctx.membership().stage(configuration);
        self.sync_peers(ctx);
        self.pending_requests.insert(index, resp_tx);
        self.try_advance_commit(ctx, role_tx)?;
        self.replicate_to_all(ctx);
        Ok(())
    }

    fn append_local(
        &mut self,
        payload: EntryPayload,
        ctx: &RaftContext<T>,
    ) -> Result<u64> {
        let index = ctx.raft_log().last_entry_id() + 1;
        match ctx
            .raft_log()
            .append(vec![Entry::new(index, self.current_term(), payload)])
        {
            Ok(_) => {
                self.record_storage_success();
                Ok(index)
            }
            Err(e) => {
                error!("[{}] append at {} failed: {:?}", self.node_id(), index, e);
                self.record_storage_failure();
                Err(e)
            }
        }
    }

    pub(super) fn handle_append_response(
        &mut self,
        peer_id: u32,
        response: AppendEntriesResponse,
        ctx: &RaftContext<T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        if if_higher_term_found(self.current_term(), response.term) {
            info!("[{}] higher term {} from {}, stepping down", self.node_id(), response.term, peer_id);
            return self.step_down_to_term(response.term, ctx, role_tx);
        }

        let last_index = ctx.raft_log().last_entry_id();
        let resend = {
            let progress = match self.peers.get_mut(&peer_id) {
                Some(progress) => progress,
                None => {
                    trace!("[{}] response from removed peer {}", self.shared_state.node_id, peer_id);
                    return Ok(());
                }
            };
            progress.in_flight = false;

            match response.outcome {
                AppendOutcome::Success { match_index } => {
                    progress.record_success(match_index);
                    progress.next_index <= last_index
                }
                AppendOutcome::Conflict {
                    conflict_term,
                    conflict_index,
                } => {
                    progress.next_index = ReplicationHandler::<T>::next_index_after_conflict(
                        progress,
                        conflict_term,
                        conflict_index,
                        ctx.raft_log(),
                    );
                    debug!("[{}] peer {} conflict, next_index = {}", response.node_id, peer_id, progress.next_index);
                    true
                }
                AppendOutcome::Rejected => {
                    progress.record_failure();
                    false
                }
            }
        };

        self.try_advance_commit(ctx, role_tx)?;
        if resend {
            self.replicate_to(peer_id, ctx)?;
        }
        Ok(())
    }

    pub(super) fn handle_snapshot_response(
        &mut self,
        peer_id: u32,
        last_included: LogId,
        response: InstallSnapshotResponse,
        ctx: &RaftContext<T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        if if_higher_term_found(self.current_term(), response.term) {
            return self.step_down_to_term(response.term, ctx, role_tx);
        }

        let Some(progress) = self.peers.get_mut(&peer_id) else {
            return Ok(());
        };
        progress.in_flight = false;
        if !response.success {
            progress.record_failure();
            return Ok(());
        }
        progress.record_success(last_included.index);
        debug!("[{}] peer {} installed snapshot {}", self.shared_state.node_id, peer_id, last_included);

        self.try_advance_commit(ctx, role_tx)?;
        self.replicate_to(peer_id, ctx)
    }

    fn on_peer_failure(
        &mut self,
        peer_id: u32,
        reason: String,
    ) {
        let my_id = self.node_id();
        if let Some(progress) = self.peers.get_mut(&peer_id) {
            progress.in_flight = false;
            progress.record_failure();
            debug!(
                "[{}] replication to {} failed ({} in a row): {}",
                my_id, peer_id, progress.consecutive_failures, reason
            );
        }
        REPLICATION_FAILURES
            .with_label_values(&[&my_id.to_string(), &peer_id.to_string()])
            .inc();
    }

    /// Commits the highest index stored on a majority of active voters, then
    /// answers the requests it covers.
    pub(super) fn try_advance_commit(
        &mut self,
        ctx: &RaftContext<T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        let my_id = self.node_id();
        let last_index = ctx.raft_log().last_entry_id();
        let voter_match_indexes: Vec<u64> = ctx
            .membership()
            .voter_ids()
            .iter()
            .map(|id| {
                if *id == my_id {
                    last_index
                } else {
                    self.peers.get(id).map(|p| p.match_index).unwrap_or(0)
                }
            })
            .collect();

        let Some(new_commit_index) = ReplicationHandler::<T>::calculate_majority_matched_index(
            self.current_term(),
            self.commit_index(),
            voter_match_indexes,
            ctx.raft_log(),
        ) else {
            return Ok(());
        };

        self.update_commit_index_with_signal(new_commit_index, ctx, role_tx)?;
        self.resolve_pending_requests();

        if !ctx.membership().is_voter(my_id) {
            info!("[{}] no longer a voter, stepping down", my_id);
            return send_role_event(role_tx, RoleEvent::BecomeFollower(None));
        }
        self.sync_peers(ctx);
        Ok(())
    }

    fn resolve_pending_requests(&mut self) {
        let commit_index = self.commit_index();
        let waiting = self.pending_requests.split_off(&(commit_index + 1));
        let committed = std::mem::replace(&mut self.pending_requests, waiting);
        for (index, resp_tx) in committed {
            if resp_tx.send(Ok(index)).is_err() {
                trace!("[{}] requester of {} is gone", self.node_id(), index);
            }
        }
    }

    /// Aligns peer progress with the replication targets of the active and
    /// pending configurations.
    pub(super) fn sync_peers(
        &mut self,
        ctx: &RaftContext<T>,
    ) {
        let last_index = ctx.raft_log().last_entry_id();
        let targets = ctx.membership().replication_targets();

        self.peers.retain(|id, _| targets.iter().any(|m| m.id == *id));
        for member in targets {
            self.peers.entry(member.id).or_insert_with(|| {
                debug!("[{}] start replicating to {}", ctx.node_id, member.id);
                PeerProgress::new(last_index)
            });
        }
    }

    fn replicate_to_all(
        &mut self,
        ctx: &RaftContext<T>,
    ) {
        let peer_ids: Vec<u32> = self.peers.keys().copied().collect();
        for peer_id in peer_ids {
            if let Err(e) = self.replicate_to(peer_id, ctx) {
                warn!("[{}] replicate to {} failed: {:?}", self.node_id(), peer_id, e);
            }
        }
    }

    /// Sends the next batch to `peer_id`, or a snapshot when the entries it
    /// needs are compacted.
    pub(super) fn replicate_to(
        &mut self,
        peer_id: u32,
        ctx: &RaftContext<T>,
    ) -> Result<()> {
        let Some(peer) = ctx.membership().member(peer_id) else {
            return Ok(());
        };
        let current_term = self.current_term();
        let commit_index = self.commit_index();
        let node_config = self.node_config.clone();
        let cancel = self.cancel.child_token();

        let Some(progress) = self.peers.get_mut(&peer_id) else {
            return Ok(());
        };
        if progress.in_flight {
            return Ok(());
        }

        let request = ctx.replication_handler().build_append_request(
            current_term,
            commit_index,
            progress,
            node_config.raft.replication.append_entries_max_entries_per_replication,
            ctx.raft_log(),
        )?;

        match request {
            Some(request) => {
                trace!(
                    "[{}] append to {}: prev={} entries={}",
                    ctx.node_id,
                    peer_id,
                    request.prev_log_index,
                    request.entries.len()
                );
                progress.in_flight = true;
                ctx.replication_handler().spawn_append_entries(
                    peer,
                    request,
                    ctx.transport(),
                    node_config.retry.append_entries,
                    cancel,
                );
            }
            None => {
                let snapshot = ctx.state_machine().snapshot()?;
                let compacted = ctx.raft_log().snapshot_log_id().map(|id| id.index).unwrap_or(0);
                if snapshot.last_included.index < compacted {
                    return Err(StorageError::StateMachineError(format!(
                        "state machine snapshot {} is behind compacted log {}",
                        snapshot.last_included, compacted
                    ))
                    .into());
                }
                info!(
                    "[{}] peer {} needs entries before {}, sending snapshot {}",
                    ctx.node_id, peer_id, progress.next_index, snapshot.last_included
                );
                progress.in_flight = true;
                ctx.replication_handler().spawn_install_snapshot(
                    peer,
                    InstallSnapshotRequest {
                        term: current_term,
                        leader_id: ctx.node_id,
                        last_included: snapshot.last_included,
                        configuration: ctx.membership().active(),
                        data: snapshot.data,
                    },
                    ctx.transport(),
                    node_config.retry.install_snapshot,
                    cancel,
                );
            }
        }
        Ok(())
    }

    fn step_down_and_reprocess(
        &self,
        leader_id: Option<u32>,
        raft_event: RaftEvent,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        debug!("[{}] higher term observed, stepping down", self.node_id());
        send_role_event(role_tx, RoleEvent::BecomeFollower(leader_id))?;
        send_role_event(role_tx, RoleEvent::ReprocessEvent(Box::new(raft_event)))
    }
}

impl<T: TypeConfig> From<&CandidateState<T>> for LeaderState<T> {
    fn from(candidate: &CandidateState<T>) -> Self {
        Self {
            shared_state: candidate.shared_state.clone(),
            timer: ReplicationTimer::new(candidate.node_config.raft.replication.rpc_append_entries_clock_in_ms),
            node_config: candidate.node_config.clone(),
            peers: HashMap::new(),
            noop_index: 0,
            pending_requests: BTreeMap::new(),
            cancel: CancellationToken::new(),
            _marker: PhantomData,
        }
    }
}

impl<T: TypeConfig> Drop for LeaderState<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl<T: TypeConfig> Debug for LeaderState<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LeaderState")
            .field("shared_state", &self.shared_state)
            .field("peers", &self.peers)
            .field("noop_index", &self.noop_index)
            .field("pending_requests", &self.pending_requests.keys().collect::<Vec<_>>())
            .finish()
    }
}
