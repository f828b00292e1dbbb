use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::StateUpdate;
use crate::alias::TROF;
use crate::is_target_log_more_recent;
use crate::network::task_with_timeout_and_exponential_backoff;
use crate::proto::LogId;
use crate::proto::NodeMeta;
use crate::proto::VoteRequest;
use crate::BackoffPolicy;
use crate::RaftEvent;
use crate::Transport;
use crate::TypeConfig;

pub(crate) struct ElectionHandler<T: TypeConfig> {
    pub(crate) my_id: u32,
    pub(crate) event_tx: mpsc::Sender<RaftEvent>, //cloned from Raft
    _phantom: PhantomData<T>,
}

impl<T> ElectionHandler<T>
where T: TypeConfig
{
    pub(crate) fn new(
        my_id: u32,
        event_tx: mpsc::Sender<RaftEvent>,
    ) -> Self {
        Self {
            my_id,
            event_tx,
            _phantom: PhantomData,
        }
    }

    /// Sends one RequestVote per voting peer without waiting for answers.
    ///
    /// Every peer gets its own task so a slow or dead peer never delays the
    /// others. Results come back as [`RaftEvent::VoteResponseReceived`].
    pub(crate) fn broadcast_vote_requests(
        &self,
        term: u64,
        voting_peers: Vec<NodeMeta>,
        last_log_id: LogId,
        transport: &Arc<TROF<T>>,
        policy: BackoffPolicy,
    ) {
        if voting_peers.is_empty() {
            debug!("[{}] no voting peer for term {}", self.my_id, term);
            return;
        }
        debug!(
            "[{}] requesting votes for term {} from {:?}",
            self.my_id,
            term,
            voting_peers.iter().map(|p| p.id).collect::<Vec<_>>()
        );

        let request = VoteRequest {
            term,
            candidate_id: self.my_id,
            last_log_index: last_log_id.index,
            last_log_term: last_log_id.term,
        };

        for peer in voting_peers {
            let transport = transport.clone();
            let event_tx = self.event_tx.clone();
            let request = request.clone();

            tokio::spawn(async move {
                let peer_id = peer.id;
                let result = task_with_timeout_and_exponential_backoff(
                    || transport.send_vote_request(peer.clone(), request.clone()),
                    policy,
                )
                .await;

                if event_tx
                    .send(RaftEvent::VoteResponseReceived { term, peer_id, result })
                    .await
                    .is_err()
                {
                    trace!("consensus loop stopped, dropping vote response of {}", peer_id);
                }
            });
        }
    }

    /// Decides a RequestVote against the voter's persistent state.
    pub(crate) fn handle_vote_request(
        &self,
        request: &VoteRequest,
        current_term: u64,
        voted_for: Option<u32>,
        last_log_id: LogId,
    ) -> StateUpdate {
        debug!("VoteRequest::Received: {:?}", request);

        let mut update = StateUpdate::default();
        let mut effective_vote = voted_for;
        if request.term > current_term {
            update.term_update = Some(request.term);
            effective_vote = None;
        }

        if self.check_vote_request_is_legal(request, current_term, last_log_id, effective_vote) {
            update.new_voted_for = Some(request.candidate_id);
        }
        update
    }

    /// Criterias to check:
    /// - request term is not stale
    /// - votedFor is null or candidateId
    /// - candidate's log is at least as up-to-date as receiver's log
    pub(crate) fn check_vote_request_is_legal(
        &self,
        request: &VoteRequest,
        current_term: u64,
        last_log_id: LogId,
        voted_for: Option<u32>,
    ) -> bool {
        if current_term > request.term {
            debug!("current_term({}) > request.term({})", current_term, request.term);
            return false;
        }

        if let Some(candidate) = voted_for {
            if candidate != request.candidate_id {
                debug!(
                    "[{}] already voted for {} in term {}",
                    self.my_id, candidate, current_term
                );
                return false;
            }
        }

        if !is_target_log_more_recent(
            last_log_id.index,
            last_log_id.term,
            request.last_log_index,
            request.last_log_term,
        ) {
            warn!(
                "[{}] candidate {} log ({}, {}) is behind mine {}",
                self.my_id, request.candidate_id, request.last_log_term, request.last_log_index, last_log_id
            );
            return false;
        }

        true
    }
}
