use std::collections::HashSet;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::trace;

use super::role_state::send_reply;
use super::role_state::send_role_event;
use super::role_state::RaftRoleState;
use super::FollowerState;
use super::HardState;
use super::RaftRole;
use super::RoleKind;
use super::SharedState;
use crate::if_higher_term_found;
use crate::metrics::ELECTIONS_STARTED;
use crate::proto::AppendEntriesResponse;
use crate::proto::InstallSnapshotResponse;
use crate::proto::VoteResponse;
use crate::ElectionTimer;
use crate::RaftContext;
use crate::RaftEvent;
use crate::RaftLog;
use crate::RaftNodeConfig;
use crate::Result;
use crate::RoleEvent;
use crate::TypeConfig;

/// Candidate node's state: campaigning for leadership of `current_term`.
pub(crate) struct CandidateState<T: TypeConfig> {
    pub(crate) shared_state: SharedState,

    pub(super) node_config: Arc<RaftNodeConfig>,

    pub(super) timer: ElectionTimer,

    /// Voters that granted their vote in the current term, self included
    pub(super) votes: HashSet<u32>,

    _marker: PhantomData<T>,
}

#[async_trait::async_trait]
impl<T: TypeConfig> RaftRoleState for CandidateState<T> {
    type T = T;

    fn shared_state(&self) -> &SharedState {
        &self.shared_state
    }

    fn shared_state_mut(&mut self) -> &mut SharedState {
        &mut self.shared_state
    }

    fn role(&self) -> RoleKind {
        RoleKind::Candidate
    }

    fn become_leader(&self) -> Result<RaftRole<T>> {
        info!(
            "[{}<{}>] >>> switch to Leader now.",
            self.node_id(),
            self.current_term()
        );
        Ok(RaftRole::Leader(Box::new(self.into())))
    }

    fn become_follower(&self) -> Result<RaftRole<T>> {
        info!(
            "[{}<{}>] >>> switch to Follower now.",
            self.node_id(),
            self.current_term()
        );
        Ok(RaftRole::Follower(Box::new(self.into())))
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

    /// Starts a new election round: term + 1, vote for self, request votes.
    async fn tick(
        &mut self,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
        ctx: &RaftContext<T>,
    ) -> Result<()> {
        self.reset_timer();
        let my_id = self.node_id();

        if self.is_degraded() || !ctx.membership().is_voter(my_id) {
            debug!("[{}] can not campaign, back to follower", my_id);
            return send_role_event(role_tx, RoleEvent::BecomeFollower(None));
        }

        let new_term = self.current_term() + 1;
        if let Err(e) = self.persist_hard_state(
            HardState {
                current_term: new_term,
                voted_for: Some(my_id),
            },
            ctx,
        ) {
            send_role_event(role_tx, RoleEvent::BecomeFollower(None))?;
            return Err(e);
        }
        ctx.membership().set_current_leader(None);
        self.votes.clear();
        self.votes.insert(my_id);
        ELECTIONS_STARTED.with_label_values(&[&my_id.to_string()]).inc();
        info!("[{}] start election for term {}", my_id, new_term);

        if ctx.membership().is_quorum(&self.votes) {
            return send_role_event(role_tx, RoleEvent::BecomeLeader);
        }

        ctx.election_handler().broadcast_vote_requests(
            new_term,
            ctx.membership().voting_peers(),
            ctx.raft_log().last_log_id(),
            ctx.transport(),
            ctx.node_config.retry.election,
        );
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
            RaftEvent::VoteResponseReceived { term, peer_id, result } => {
                if term != my_term {
                    trace!("[{}] stale vote response of {} for term {}", self.node_id(), peer_id, term);
                    return Ok(());
                }
                let response = match result {
                    Ok(response) => response,
                    Err(e) => {
                        debug!("[{}] vote request to {} failed: {:?}", self.node_id(), peer_id, e);
                        return Ok(());
                    }
                };
                self.handle_vote_response(peer_id, response, ctx, role_tx)?;
            }

            RaftEvent::ReceiveVoteRequest(vote_request, resp_tx) => {
                if vote_request.term > my_term {
                    debug!(
                        "[{}] higher term {} from candidate {}, step down",
                        self.node_id(),
                        vote_request.term,
                        vote_request.candidate_id
                    );
                    self.step_down_and_reprocess(
                        None,
                        RaftEvent::ReceiveVoteRequest(vote_request, resp_tx),
                        role_tx,
                    )?;
                } else {
                    // Already voted for myself in this term
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
                if append_request.term >= my_term {
                    let leader_id = append_request.leader_id;
                    self.step_down_and_reprocess(
                        Some(leader_id),
                        RaftEvent::AppendEntries(append_request, resp_tx),
                        role_tx,
                    )?;
                } else {
                    send_reply(resp_tx, AppendEntriesResponse::rejected(self.node_id(), my_term))?;
                }
            }

            RaftEvent::InstallSnapshot(request, resp_tx) => {
                if request.term >= my_term {
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

            RaftEvent::ClientPropose(_, resp_tx) => {
                send_reply(resp_tx, Err(self.not_leader_error(ctx)))?;
            }

            RaftEvent::ChangeMembership(_, resp_tx) => {
                send_reply(resp_tx, Err(self.not_leader_error(ctx)))?;
            }

            RaftEvent::CompactLog(resp_tx) => {
                send_reply(resp_tx, self.compact_log(ctx))?;
            }

            RaftEvent::AppendResponseReceived { term, peer_id, .. }
            | RaftEvent::SnapshotResponseReceived { term, peer_id, .. } => {
                trace!(
                    "[{}] ignore replication response of {} sent in term {}",
                    self.node_id(),
                    peer_id,
                    term
                );
            }
        }
        Ok(())
    }
}

impl<T: TypeConfig> CandidateState<T> {
    pub(super) fn handle_vote_response(
        &mut self,
        peer_id: u32,
        response: VoteResponse,
        ctx: &RaftContext<T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        if if_higher_term_found(self.current_term(), response.term) {
            info!(
                "[{}] higher term {} found in vote response of {}",
                self.node_id(),
                response.term,
                peer_id
            );
            return self.step_down_to_term(response.term, ctx, role_tx);
        }

        if !response.vote_granted {
            debug!("[{}] vote denied by {}", self.node_id(), peer_id);
            return Ok(());
        }

        // A second quorum never re-sends BecomeLeader
        let had_quorum = ctx.membership().is_quorum(&self.votes);
        self.votes.insert(peer_id);
        debug!("[{}] votes received: {:?}", self.node_id(), self.votes);
        if !had_quorum && ctx.membership().is_quorum(&self.votes) {
            return send_role_event(role_tx, RoleEvent::BecomeLeader);
        }
        Ok(())
    }

    fn step_down_and_reprocess(
        &self,
        leader_id: Option<u32>,
        raft_event: RaftEvent,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        send_role_event(role_tx, RoleEvent::BecomeFollower(leader_id))?;
        send_role_event(role_tx, RoleEvent::ReprocessEvent(Box::new(raft_event)))
    }
}

impl<T: TypeConfig> From<&FollowerState<T>> for CandidateState<T> {
    fn from(follower: &FollowerState<T>) -> Self {
        let election = &follower.node_config.raft.election;
        Self {
            shared_state: follower.shared_state.clone(),
            node_config: follower.node_config.clone(),
            timer: ElectionTimer::new((election.election_timeout_min, election.election_timeout_max)),
            votes: HashSet::new(),
            _marker: PhantomData,
        }
    }
}

impl<T: TypeConfig> Debug for CandidateState<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("CandidateState")
            .field("shared_state", &self.shared_state)
            .field("votes", &self.votes)
            .finish()
    }
}
