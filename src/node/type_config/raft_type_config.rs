use crate::LocalTransport;
use crate::MemRaftLog;
use crate::MemStateMachine;
use crate::MemStateStorage;
use crate::SledRaftLog;
use crate::SledStateStorage;
use crate::TcpTransport;
use crate::TypeConfig;

/// Durable node: sled storage, TCP between peers.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct RaftTypeConfig;

impl TypeConfig for RaftTypeConfig {
    type R = SledRaftLog;

    type TR = TcpTransport;

    type SM = MemStateMachine;

    type SS = SledStateStorage;
}

/// Everything in memory, peers wired through a [`crate::LocalNetwork`].
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct MemTypeConfig;

impl TypeConfig for MemTypeConfig {
    type R = MemRaftLog;

    type TR = LocalTransport;

    type SM = MemStateMachine;

    type SS = MemStateStorage;
}
