mod commit_handler;
mod election;
mod event;
mod raft;
mod raft_context;
mod raft_role;
mod replication;
mod timer;

pub(crate) use commit_handler::*;
pub(crate) use election::*;
pub(crate) use event::*;
pub(crate) use raft::*;
pub(crate) use raft_context::*;
pub use raft_role::HardState;
pub use raft_role::NodeStatus;
pub use raft_role::RoleKind;
pub use raft_role::SharedState;
pub(crate) use raft_role::*;
pub(crate) use replication::*;
pub(crate) use timer::*;


/// During any peer communication, a response carrying a bigger term means
/// this node is stale and must step down to follower with the bigger term.
///
/// e.g. AppendEntries response, VoteResponse
/// @return: true - found higher term;
pub(crate) fn if_higher_term_found(
    my_current_term: u64,
    term: u64,
) -> bool {
    if my_current_term < term {
        tracing::debug!("my_current_term: {} < term: {}", my_current_term, term);
        return true;
    }
    false
}

/// Raft paper: 5.4.1 Election restriction
///
/// Raft determines which of two logs is more up-to-date by comparing the index and term of the last
/// entries in the logs. If the logs have last entries with different terms, then the log with the
/// later term is more up-to-date. If the logs end with the same term, then whichever log is longer
/// is more up-to-date.
pub(crate) fn is_target_log_more_recent(
    my_last_log_index: u64,
    my_last_log_term: u64,
    target_last_log_index: u64,
    target_last_log_term: u64,
) -> bool {
    (target_last_log_term > my_last_log_term)
        || (target_last_log_term == my_last_log_term && target_last_log_index >= my_last_log_index)
}
