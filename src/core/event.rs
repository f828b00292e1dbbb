use tokio::sync::oneshot;

use crate::proto::AppendEntriesRequest;
use crate::proto::AppendEntriesResponse;
use crate::proto::InstallSnapshotRequest;
use crate::proto::InstallSnapshotResponse;
use crate::proto::LogId;
use crate::proto::MembershipChange;
use crate::proto::VoteRequest;
use crate::proto::VoteResponse;
use crate::Result;

/// Requests a role makes to the consensus loop. Processed before the next
/// timer tick.
#[derive(Debug)]
pub(crate) enum RoleEvent {
    BecomeFollower(Option<u32>), // BecomeFollower(Option<leader_id>)
    BecomeCandidate,
    BecomeLeader,

    NotifyNewCommitIndex { new_commit_index: u64 },
    ReprocessEvent(Box<RaftEvent>), //Replay the raft event when step down as another role
}

/// Everything the consensus loop reacts to besides timers.
#[derive(Debug)]
pub(crate) enum RaftEvent {
    // Inbound peer RPCs
    ReceiveVoteRequest(VoteRequest, oneshot::Sender<VoteResponse>),
    AppendEntries(AppendEntriesRequest, oneshot::Sender<AppendEntriesResponse>),
    InstallSnapshot(InstallSnapshotRequest, oneshot::Sender<InstallSnapshotResponse>),

    // Client and admin requests
    ClientPropose(Vec<u8>, oneshot::Sender<Result<u64>>),
    ChangeMembership(MembershipChange, oneshot::Sender<Result<u64>>),
    CompactLog(oneshot::Sender<Result<LogId>>),

    // Results of outbound peer tasks. `term` is the term the request was sent in.
    VoteResponseReceived {
        term: u64,
        peer_id: u32,
        result: Result<VoteResponse>,
    },
    AppendResponseReceived {
        term: u64,
        peer_id: u32,
        result: Result<AppendEntriesResponse>,
    },
    SnapshotResponseReceived {
        term: u64,
        peer_id: u32,
        last_included: LogId,
        result: Result<InstallSnapshotResponse>,
    },
}
