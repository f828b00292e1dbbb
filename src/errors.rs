//! Raft Consensus Error Hierarchy
//!
//! Errors are grouped by protocol layer. Only client-facing operations
//! (`propose`, `change_membership`, `compact_log`) surface them to callers;
//! everything else is logged and handled inside the consensus loop.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Infrastructure-level failures (network, storage, serialization)
    #[error(transparent)]
    System(#[from] SystemError),

    /// Cluster configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Raft consensus protocol violations and failures
    #[error(transparent)]
    Consensus(#[from] ConsensusError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    /// Illegal Raft node state transitions
    #[error(transparent)]
    StateTransition(#[from] StateTransitionError),

    /// Leader election failures (Section 5.2 Raft paper)
    #[error(transparent)]
    Election(#[from] ElectionError),

    /// Log replication failures (Section 5.3 Raft paper)
    #[error(transparent)]
    Replication(#[from] ReplicationError),

    /// Cluster membership change failures (Section 6 Raft paper)
    #[error(transparent)]
    Membership(#[from] MembershipError),

    /// Request must be sent to the leader. Carries the last known leader, if any.
    #[error("Not leader (known leader: {leader_id:?} at {leader_address:?})")]
    NotLeader {
        leader_id: Option<u32>,
        leader_address: Option<String>,
    },

    /// Role permission conflict error
    #[error("Operation requires {required_role} role but current role is {current_role}")]
    RoleViolation {
        current_role: &'static str,
        required_role: &'static str,
        context: String,
    },
}

#[derive(Debug, thiserror::Error)]
#[doc(hidden)]
pub enum StateTransitionError {
    #[error("Not enough votes to transition to leader.")]
    NotEnoughVotes,

    #[error("Invalid state transition.")]
    InvalidTransition,
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    /// Peer communication timeout
    #[error("Connection timeout to {node_id} after {duration:?}")]
    Timeout { node_id: u32, duration: Duration },

    /// Peer cannot be reached (partitioned, crashed or not registered)
    #[error("Node {node_id} unreachable")]
    PeerUnreachable { node_id: u32 },

    /// Persistent connection failures
    #[error("Socket connect to {address} failed: {source}")]
    ConnectError {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Socket level read/write failures
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Retry policy exhaustion
    #[error("Retry timeout after {0:?}")]
    RetryTimeoutError(Duration),

    /// Peer closed the connection before answering
    #[error("Connection to {address} closed by peer")]
    ConnectionClosed { address: String },

    /// Peer answered with an error or a response of the wrong kind
    #[error("Unexpected response from peer: {0}")]
    UnexpectedResponse(String),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    #[error("{0}")]
    TaskBackoffFailed(String),

    #[error("{0}")]
    SingalSendFailed(String),

    #[error("{0}")]
    SingalReceiveFailed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Disk I/O failures during log/state operations
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Serialization failures for persisted data
    #[error(transparent)]
    BincodeError(#[from] bincode::Error),

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    /// Checksum validation failures
    #[error("Data corruption detected at {location}")]
    DataCorruption { location: String },

    /// Append does not continue the log
    #[error("Log gap: expected index {expected}, got {actual}")]
    LogGap { expected: u64, actual: u64 },

    /// Attempt to remove an entry that is already known to be committed
    #[error("Refusing to truncate from index {index}: entries up to {commit_index} are committed")]
    TruncateCommitted { index: u64, commit_index: u64 },

    /// Node stopped accepting writes after repeated storage failures
    #[error("Storage degraded after {failures} consecutive failures")]
    Degraded { failures: u32 },

    /// State machine application errors
    #[error("State Machine error: {0}")]
    StateMachineError(String),

    /// Error type for value conversion operations
    #[error("Value convert failed")]
    Convert(#[from] ConvertError),
}

/// Error type for value conversion operations
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// This occurs when the input byte slice length doesn't match the required 8 bytes.
    #[error("invalid byte length: expected 8 bytes, received {0} bytes")]
    InvalidLength(usize),
}

#[derive(Debug, thiserror::Error)]
pub enum SystemError {
    // Network layer
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    // Storage layer
    #[error("Storage operation failed: {0}")]
    Storage(#[from] StorageError),

    //Serialization
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    // Basic node operations
    #[error("Node failed to start: {0}")]
    NodeStartFailed(String),

    #[error("Node is shutting down")]
    ServerUnavailable,
}

// Serialization is classified separately (across protocol layers and system layers)
#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("Bincode serialization failed: {0}")]
    Bincode(#[from] bincode::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ElectionError {
    /// Stale term detection (Section 5.1 Raft paper)
    #[error("Found higher term(={0}) during election process")]
    HigherTerm(u64),

    /// Quorum not achieved (Section 5.2 Raft paper)
    #[error("Quorum not reached (required: {required}, succeed: {succeed})")]
    QuorumFailure { required: usize, succeed: usize },

    /// Non-voting or removed members never campaign
    #[error("Node {node_id} is not a voting member")]
    NotVoter { node_id: u32 },
}

#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    /// Stale leader detected during AppendEntries RPC
    #[error("Found higher term(={0}) during replication process")]
    HigherTerm(u64),

    /// Follower refused the request at the same term
    #[error("Node {node_id} rejected replication")]
    Rejected { node_id: u32 },

    /// Missing peer configuration in leader state
    #[error("No peer metadata for node {node_id}")]
    NoPeerFound { node_id: u32 },

    /// Log position needed to build a request is missing locally
    #[error("Log entry {index} unavailable for replication")]
    EntryUnavailable { index: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    /// A configuration entry is still waiting for commit
    #[error("Membership change already in progress (pending epoch {pending_epoch})")]
    ChangeInProgress { pending_epoch: u64 },

    /// Change is inconsistent with the active configuration
    #[error("Invalid membership change: {0}")]
    InvalidChange(String),

    /// Leader has not committed an entry in its own term yet
    #[error("Leader has not committed an entry in term {term} yet")]
    NotReady { term: u64 },

    /// Missing node metadata in configuration
    #[error("Metadata missing for node {node_id} in cluster config")]
    NoMetadataFoundForNode { node_id: u32 },
}

// ============== Conversion Implementations ============== //
impl From<NetworkError> for Error {
    fn from(e: NetworkError) -> Self {
        Error::System(SystemError::Network(e))
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        Error::System(SystemError::Storage(e))
    }
}

impl From<ConvertError> for Error {
    fn from(e: ConvertError) -> Self {
        Error::System(SystemError::Storage(StorageError::Convert(e)))
    }
}

impl From<SerializationError> for Error {
    fn from(e: SerializationError) -> Self {
        Error::System(SystemError::Serialization(e))
    }
}

impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::DbError(e.to_string())
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        StorageError::from(e).into()
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        StorageError::BincodeError(e).into()
    }
}

impl From<StateTransitionError> for Error {
    fn from(e: StateTransitionError) -> Self {
        Error::Consensus(ConsensusError::StateTransition(e))
    }
}

impl From<ElectionError> for Error {
    fn from(e: ElectionError) -> Self {
        Error::Consensus(ConsensusError::Election(e))
    }
}

impl From<ReplicationError> for Error {
    fn from(e: ReplicationError) -> Self {
        Error::Consensus(ConsensusError::Replication(e))
    }
}

impl From<MembershipError> for Error {
    fn from(e: MembershipError) -> Self {
        Error::Consensus(ConsensusError::Membership(e))
    }
}

impl Error {
    /// Returns true for `ConsensusError::NotLeader`
    pub fn is_not_leader(&self) -> bool {
        matches!(self, Error::Consensus(ConsensusError::NotLeader { .. }))
    }

    /// Returns true when the failure originated in the storage layer
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::System(SystemError::Storage(_)))
    }
}
