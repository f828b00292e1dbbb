mod replication_handler;

pub(crate) use replication_handler::*;


use tokio::time::Instant;

use crate::proto::AppendEntriesResponse;

/// Result of a follower processing one AppendEntries request.
#[derive(Debug)]
pub(crate) struct AppendResponseWithUpdates {
    pub(crate) response: AppendEntriesResponse,
    // Commit index to be updated
    pub(crate) commit_index_update: Option<u64>,
}

/// Leader-side replication bookkeeping of one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PeerProgress {
    /// Next log index to send
    pub(crate) next_index: u64,
    /// Highest index known to be replicated on the peer
    pub(crate) match_index: u64,
    /// One request at a time per peer
    pub(crate) in_flight: bool,
    pub(crate) consecutive_failures: u32,
    pub(crate) last_contact: Option<Instant>,
}

impl PeerProgress {
    pub(crate) fn new(leader_last_index: u64) -> Self {
        Self {
            next_index: leader_last_index + 1,
            match_index: 0,
            in_flight: false,
            consecutive_failures: 0,
            last_contact: None,
        }
    }

    pub(crate) fn record_success(
        &mut self,
        match_index: u64,
    ) {
        self.match_index = self.match_index.max(match_index);
        self.next_index = self.next_index.max(self.match_index + 1);
        self.consecutive_failures = 0;
        self.last_contact = Some(Instant::now());
    }

    pub(crate) fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}
