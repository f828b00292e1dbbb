use serde::Deserialize;
use serde::Serialize;

use super::ClusterConfiguration;
use super::Entry;
use super::LogId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    pub term: u64,
    pub leader_id: u32,
    pub prev_log_index: u64,
    pub prev_log_term: u64,
    /// Empty for heartbeats
    pub entries: Vec<Entry>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppendOutcome {
    /// Log matched; `match_index` is the index of the last entry covered by the request
    Success { match_index: u64 },
    /// `prev_log_index`/`prev_log_term` did not match.
    ///
    /// `conflict_term` is `None` when the follower log is too short, then
    /// `conflict_index` is its last index + 1. Otherwise `conflict_index` is the
    /// first local index holding `conflict_term`.
    Conflict {
        conflict_term: Option<u64>,
        conflict_index: u64,
    },
    /// Stale leader term, or the follower could not persist the entries
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub node_id: u32,
    pub term: u64,
    pub outcome: AppendOutcome,
}

impl AppendEntriesResponse {
    pub fn success(
        node_id: u32,
        term: u64,
        match_index: u64,
    ) -> Self {
        Self {
            node_id,
            term,
            outcome: AppendOutcome::Success { match_index },
        }
    }

    pub fn conflict(
        node_id: u32,
        term: u64,
        conflict_term: Option<u64>,
        conflict_index: u64,
    ) -> Self {
        Self {
            node_id,
            term,
            outcome: AppendOutcome::Conflict {
                conflict_term,
                conflict_index,
            },
        }
    }

    pub fn rejected(
        node_id: u32,
        term: u64,
    ) -> Self {
        Self {
            node_id,
            term,
            outcome: AppendOutcome::Rejected,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, AppendOutcome::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    pub term: u64,
    pub leader_id: u32,
    pub last_included: LogId,
    /// Configuration active when the snapshot was taken
    pub configuration: ClusterConfiguration,
    /// State machine snapshot bytes
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    pub node_id: u32,
    pub term: u64,
    pub success: bool,
}
