mod candidate_state;
mod follower_state;
mod leader_state;
mod role_state;

pub(crate) use candidate_state::*;
pub(crate) use follower_state::*;
pub(crate) use leader_state::*;
pub(crate) use role_state::*;

#[cfg(test)]
mod candidate_state_test;

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::trace;

use super::RaftContext;
use super::RaftEvent;
use super::RoleEvent;
use crate::proto::LogId;
use crate::Result;
use crate::TypeConfig;

/// Persistent state on all servers. Updated on stable storage before
/// responding to RPCs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardState {
    /// Latest term server has seen (initialized to 0 on first boot, increases
    /// monotonically)
    pub current_term: u64,
    /// Candidate that received vote in current term (or null if none)
    pub voted_for: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleKind {
    #[default]
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for RoleKind {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            RoleKind::Follower => "Follower",
            RoleKind::Candidate => "Candidate",
            RoleKind::Leader => "Leader",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of one node, published after every consensus loop
/// iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeStatus {
    pub node_id: u32,
    pub role: RoleKind,
    pub current_term: u64,
    pub voted_for: Option<u32>,
    pub commit_index: u64,
    pub last_applied: LogId,
    pub last_log_id: LogId,
    pub leader_id: Option<u32>,
    /// Epoch of the active cluster configuration
    pub epoch: u64,
    /// Node refuses votes and replication after repeated storage failures
    pub degraded: bool,
}

/// State every role carries across transitions.
#[derive(Clone, Debug)]
pub struct SharedState {
    pub node_id: u32,

    pub hard_state: HardState,
    /// Volatile state on all servers:
    /// index of highest log entry known to be committed (initialized to 0,
    /// increases monotonically)
    pub commit_index: u64,

    /// Consecutive failed storage writes
    pub storage_failures: u32,
    pub max_storage_failures: u32,
}

impl SharedState {
    pub fn new(
        node_id: u32,
        hard_state: HardState,
        commit_index: u64,
        max_storage_failures: u32,
    ) -> Self {
        Self {
            node_id,
            hard_state,
            commit_index,
            storage_failures: 0,
            max_storage_failures,
        }
    }

    pub fn current_term(&self) -> u64 {
        self.hard_state.current_term
    }

    pub fn voted_for(&self) -> Option<u32> {
        self.hard_state.voted_for
    }

    pub fn is_degraded(&self) -> bool {
        self.storage_failures >= self.max_storage_failures
    }
}

pub(crate) enum RaftRole<T: TypeConfig> {
    Follower(Box<FollowerState<T>>),
    Candidate(Box<CandidateState<T>>),
    Leader(Box<LeaderState<T>>),
}

impl<T: TypeConfig> RaftRole<T> {
    pub(crate) fn state(&self) -> &dyn RaftRoleState<T = T> {
        match self {
            RaftRole::Follower(state) => state.as_ref(),
            RaftRole::Candidate(state) => state.as_ref(),
            RaftRole::Leader(state) => state.as_ref(),
        }
    }

    pub(crate) fn state_mut(&mut self) -> &mut dyn RaftRoleState<T = T> {
        match self {
            RaftRole::Follower(state) => state.as_mut(),
            RaftRole::Candidate(state) => state.as_mut(),
            RaftRole::Leader(state) => state.as_mut(),
        }
    }

    pub(crate) fn kind(&self) -> RoleKind {
        self.state().role()
    }

    pub(crate) fn is_timer_expired(&self) -> bool {
        self.state().is_timer_expired()
    }

    pub(crate) fn reset_timer(&mut self) {
        self.state_mut().reset_timer()
    }

    pub(crate) fn next_deadline(&self) -> Instant {
        self.state().next_deadline()
    }

    pub(crate) fn become_leader(&self) -> Result<RaftRole<T>> {
        self.state().become_leader()
    }

    pub(crate) fn become_candidate(&self) -> Result<RaftRole<T>> {
        self.state().become_candidate()
    }

    pub(crate) fn become_follower(&self) -> Result<RaftRole<T>> {
        self.state().become_follower()
    }

    pub(crate) fn is_follower(&self) -> bool {
        matches!(self, RaftRole::Follower(_))
    }

    pub(crate) fn is_leader(&self) -> bool {
        matches!(self, RaftRole::Leader(_))
    }

    pub(crate) fn shared_state(&self) -> &SharedState {
        self.state().shared_state()
    }

    pub(crate) fn current_term(&self) -> u64 {
        self.state().current_term()
    }

    pub(crate) fn commit_index(&self) -> u64 {
        self.state().commit_index()
    }

    pub(crate) fn abort_pending_requests(
        &mut self,
        leader_id: Option<u32>,
        leader_address: Option<String>,
    ) {
        self.state_mut().abort_pending_requests(leader_id, leader_address)
    }

    pub(crate) async fn tick(
        &mut self,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
        ctx: &RaftContext<T>,
    ) -> Result<()> {
        trace!("raft_role:tick");
        self.state_mut().tick(role_tx, ctx).await
    }

    pub(crate) async fn handle_raft_event(
        &mut self,
        raft_event: RaftEvent,
        ctx: &RaftContext<T>,
        role_tx: &mpsc::UnboundedSender<RoleEvent>,
    ) -> Result<()> {
        self.state_mut().handle_raft_event(raft_event, ctx, role_tx).await
    }
}
