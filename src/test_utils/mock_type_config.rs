use crate::LocalTransport;
use crate::MemRaftLog;
use crate::MemStateMachine;
use crate::MockStateStorage;
use crate::TypeConfig;

/// In-memory node whose state storage is a mock, used to inject
/// persistence failures.
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct MockTypeConfig;

impl TypeConfig for MockTypeConfig {
    type R = MemRaftLog;

    type TR = LocalTransport;

    type SM = MemStateMachine;

    type SS = MockStateStorage;
}
