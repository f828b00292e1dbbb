use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::AppendResponseWithUpdates;
use super::PeerProgress;
use crate::alias::ROF;
use crate::alias::TROF;
use crate::network::task_with_timeout_and_exponential_backoff;
use crate::proto::AppendEntriesRequest;
use crate::proto::AppendEntriesResponse;
use crate::proto::InstallSnapshotRequest;
use crate::proto::NodeMeta;
use crate::BackoffPolicy;
use crate::RaftEvent;
use crate::RaftLog;
use crate::ReplicationError;
use crate::Result;
use crate::Transport;
use crate::TypeConfig;

pub(crate) struct ReplicationHandler<T: TypeConfig> {
    pub(crate) my_id: u32,
    pub(crate) event_tx: mpsc::Sender<RaftEvent>, //cloned from Raft
    _phantom: PhantomData<T>,
}

impl<T> ReplicationHandler<T>
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

    /// Handles an AppendEntries request whose term has already been accepted
    /// by the caller (request term >= current term).
    ///
    /// Performs the log matching check at `prev_log_index`, appends the new
    /// entries (truncating a conflicting suffix first) and computes the new
    /// commit index. Never touches term, vote or role.
    pub(crate) fn handle_append_entries(
        &self,
        request: AppendEntriesRequest,
        current_term: u64,
        commit_index: u64,
        raft_log: &Arc<ROF<T>>,
    ) -> Result<AppendResponseWithUpdates> {
        trace!(
            "[F-{}] << append from {}: prev=({}, {}), {} entries, leader_commit={}",
            self.my_id,
            request.leader_id,
            request.prev_log_term,
            request.prev_log_index,
            request.entries.len(),
            request.leader_commit
        );

        let prev_log_index = request.prev_log_index;
        let last_index = raft_log.last_entry_id();

        if prev_log_index > last_index {
            debug!(
                "[F-{}] log too short: prev_log_index {} > last index {}",
                self.my_id, prev_log_index, last_index
            );
            return Ok(self.conflict(current_term, None, last_index + 1));
        }

        match raft_log.term_at(prev_log_index)? {
            Some(term) if term == request.prev_log_term => {}
            Some(term) => {
                let conflict_index = raft_log.first_index_for_term(term)?.unwrap_or(prev_log_index);
                debug!(
                    "[F-{}] term mismatch at {}: local {}, leader {}. conflict_index={}",
                    self.my_id, prev_log_index, term, request.prev_log_term, conflict_index
                );
                return Ok(self.conflict(current_term, Some(term), conflict_index));
            }
            None => {
                // Below the compaction boundary everything is committed and
                // therefore matches the leader.
                let compacted = raft_log
                    .snapshot_log_id()
                    .map(|id| prev_log_index < id.index)
                    .unwrap_or(false);
                if !compacted {
                    warn!("[F-{}] term of entry {} is unreadable", self.my_id, prev_log_index);
                    return Err(ReplicationError::EntryUnavailable { index: prev_log_index }.into());
                }
            }
        }

        let leader_commit = request.leader_commit;
        let last_new_index = raft_log.filter_out_conflicts_and_append(prev_log_index, request.entries)?;

        let commit_index_update = Self::if_update_commit_index_as_follower(commit_index, last_new_index, leader_commit);
        if let Some(new_commit_index) = commit_index_update {
            debug!("[F-{}] new commit index received: {}", self.my_id, new_commit_index);
        }

        Ok(AppendResponseWithUpdates {
            response: AppendEntriesResponse::success(self.my_id, current_term, last_new_index),
            commit_index_update,
        })
    }

    /// commit = min(leader_commit, last new entry index), only moving forward
    pub(crate) fn if_update_commit_index_as_follower(
        my_commit_index: u64,
        last_new_index: u64,
        leader_commit_index: u64,
    ) -> Option<u64> {
        if leader_commit_index > my_commit_index {
            let new_commit_index = leader_commit_index.min(last_new_index);
            if new_commit_index > my_commit_index {
                return Some(new_commit_index);
            }
        }
        None
    }

    /// Builds the next AppendEntries for a peer.
    ///
    /// Returns `None` when the entry before `next_index` has been compacted,
    /// in which case the peer needs a snapshot.
    pub(crate) fn build_append_request(
        &self,
        current_term: u64,
        commit_index: u64,
        progress: &PeerProgress,
        max_entries: u64,
        raft_log: &Arc<ROF<T>>,
    ) -> Result<Option<AppendEntriesRequest>> {
        let prev_log_index = progress.next_index.saturating_sub(1);
        if let Some(snapshot) = raft_log.snapshot_log_id() {
            if prev_log_index < snapshot.index {
                return Ok(None);
            }
        }
        let prev_log_term = match raft_log.term_at(prev_log_index)? {
            Some(term) => term,
            None => return Ok(None),
        };

        let last_index = raft_log.last_entry_id();
        let entries = if progress.next_index <= last_index {
            let end = last_index.min(progress.next_index + max_entries - 1);
            raft_log.get_entries_range(progress.next_index..=end)?
        } else {
            Vec::new()
        };

        if let Some(first) = entries.first() {
            if first.index != progress.next_index {
                return Err(ReplicationError::EntryUnavailable {
                    index: progress.next_index,
                }
                .into());
            }
        }

        Ok(Some(AppendEntriesRequest {
            term: current_term,
            leader_id: self.my_id,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: commit_index,
        }))
    }

    /// Sends one AppendEntries in the background.
    ///
    /// The outcome is reported as [`RaftEvent::AppendResponseReceived`] unless
    /// `cancel` fires first.
    pub(crate) fn spawn_append_entries(
        &self,
        peer: NodeMeta,
        request: AppendEntriesRequest,
        transport: &Arc<TROF<T>>,
        policy: BackoffPolicy,
        cancel: CancellationToken,
    ) {
        let transport = transport.clone();
        let event_tx = self.event_tx.clone();
        let term = request.term;

        tokio::spawn(async move {
            let peer_id = peer.id;
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    trace!("append to {} cancelled", peer_id);
                    return;
                }
                result = task_with_timeout_and_exponential_backoff(
                    || transport.send_append_entries(peer.clone(), request.clone()),
                    policy,
                ) => result,
            };

            if event_tx
                .send(RaftEvent::AppendResponseReceived { term, peer_id, result })
                .await
                .is_err()
            {
                trace!("consensus loop stopped, dropping append response of {}", peer_id);
            }
        });
    }

    pub(crate) fn spawn_install_snapshot(
        &self,
        peer: NodeMeta,
        request: InstallSnapshotRequest,
        transport: &Arc<TROF<T>>,
        policy: BackoffPolicy,
        cancel: CancellationToken,
    ) {
        let transport = transport.clone();
        let event_tx = self.event_tx.clone();
        let term = request.term;
        let last_included = request.last_included;

        tokio::spawn(async move {
            let peer_id = peer.id;
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    trace!("snapshot to {} cancelled", peer_id);
                    return;
                }
                result = task_with_timeout_and_exponential_backoff(
                    || transport.send_install_snapshot(peer.clone(), request.clone()),
                    policy,
                ) => result,
            };

            if event_tx
                .send(RaftEvent::SnapshotResponseReceived {
                    term,
                    peer_id,
                    last_included,
                    result,
                })
                .await
                .is_err()
            {
                trace!("consensus loop stopped, dropping snapshot response of {}", peer_id);
            }
        });
    }

    /// New `next_index` after a conflict reply.
    ///
    /// Jumps over a whole term instead of stepping back one entry at a time:
    /// if the leader holds `conflict_term`, resume right after its last entry
    /// of that term, otherwise resume at the follower's `conflict_index`.
    /// Always moves backward, never below `match_index + 1`.
    pub(crate) fn next_index_after_conflict(
        progress: &PeerProgress,
        conflict_term: Option<u64>,
        conflict_index: u64,
        raft_log: &Arc<ROF<T>>,
    ) -> u64 {
        let hinted = match conflict_term {
            Some(term) => match raft_log.last_index_for_term(term) {
                Ok(Some(index)) => index + 1,
                Ok(None) => conflict_index,
                Err(e) => {
                    warn!("last_index_for_term({}) failed, backing off to {}: {:?}", term, conflict_index, e);
                    conflict_index
                }
            },
            None => conflict_index,
        };

        hinted
            .min(progress.next_index.saturating_sub(1))
            .max(progress.match_index + 1)
            .max(1)
    }

    /// Highest index replicated on a majority of voters whose entry belongs
    /// to `current_term` (Raft paper 5.4.2).
    ///
    /// `voter_match_indexes` holds one match index per voter, the leader's own
    /// last index included when the leader votes.
    pub(crate) fn calculate_majority_matched_index(
        current_term: u64,
        commit_index: u64,
        mut voter_match_indexes: Vec<u64>,
        raft_log: &Arc<ROF<T>>,
    ) -> Option<u64> {
        if voter_match_indexes.is_empty() {
            return None;
        }
        voter_match_indexes.sort_unstable_by(|a, b| b.cmp(a));
        let majority_index = voter_match_indexes[voter_match_indexes.len() / 2];

        if majority_index <= commit_index {
            return None;
        }
        match raft_log.term_at(majority_index) {
            Ok(Some(term)) if term == current_term => Some(majority_index),
            Err(e) => {
                warn!("term of majority index {} unreadable, commit held: {:?}", majority_index, e);
                None
            }
            Ok(other) => {
                trace!(
                    "majority index {} has term {:?}, current term {}",
                    majority_index,
                    other,
                    current_term
                );
                None
            }
        }
    }

    fn conflict(
        &self,
        current_term: u64,
        conflict_term: Option<u64>,
        conflict_index: u64,
    ) -> AppendResponseWithUpdates {
        AppendResponseWithUpdates {
            response: AppendEntriesResponse::conflict(self.my_id, current_term, conflict_term, conflict_index),
            commit_index_update: None,
        }
    }
}
