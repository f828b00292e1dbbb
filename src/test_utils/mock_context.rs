use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::sync::watch;

use super::node_config;
use crate::alias::SSOF;
use crate::proto::ClusterConfiguration;
use crate::ApplyCommand;
use crate::ElectionHandler;
use crate::LocalNetwork;
use crate::MemRaftLog;
use crate::MemStateMachine;
use crate::MemStateStorage;
use crate::MemTypeConfig;
use crate::Node;
use crate::NodeBuilder;
use crate::RaftContext;
use crate::RaftCoreHandlers;
use crate::RaftEvent;
use crate::RaftMembership;
use crate::RaftStorageHandles;
use crate::ReplicationHandler;
use crate::TypeConfig;

/// A [`RaftContext`] plus the receiving ends a role would otherwise hand to
/// the consensus loop and the apply task.
pub(crate) struct MockContext<T: TypeConfig> {
    pub(crate) ctx: RaftContext<T>,
    pub(crate) event_tx: mpsc::Sender<RaftEvent>,
    pub(crate) event_rx: mpsc::Receiver<RaftEvent>,
    pub(crate) apply_rx: mpsc::UnboundedReceiver<ApplyCommand>,
}

/// Context of `node_id` with in-memory storage, attached to `network`.
pub(crate) fn mock_raft_context(
    node_id: u32,
    configuration: ClusterConfiguration,
    network: &LocalNetwork,
) -> MockContext<MemTypeConfig> {
    build_context::<MemTypeConfig>(
        node_id,
        configuration,
        network,
        MemStateStorage::new(),
    )
}

pub(crate) fn build_context<T>(
    node_id: u32,
    configuration: ClusterConfiguration,
    network: &LocalNetwork,
    state_storage: SSOF<T>,
) -> MockContext<T>
where
    T: TypeConfig<R = MemRaftLog, SM = MemStateMachine, TR = crate::LocalTransport>,
{
    let (event_tx, event_rx) = mpsc::channel(1024);
    let (apply_tx, apply_rx) = mpsc::unbounded_channel();
    let node_config = Arc::new(node_config(node_id, &configuration));

    let ctx = RaftContext {
        node_id,
        storage: RaftStorageHandles {
            raft_log: Arc::new(MemRaftLog::new()),
            state_machine: Arc::new(MemStateMachine::new(node_id)),
            state_storage: Arc::new(state_storage),
        },
        transport: Arc::new(network.transport(node_id)),
        membership: Arc::new(RaftMembership::new(node_id, configuration)),
        handlers: RaftCoreHandlers {
            election_handler: ElectionHandler::new(node_id, event_tx.clone()),
            replication_handler: ReplicationHandler::new(node_id, event_tx.clone()),
        },
        apply_tx,
        node_config,
    };

    MockContext {
        ctx,
        event_tx,
        event_rx,
        apply_rx,
    }
}

/// In-memory [`Node`] of `node_id` registered on `network`. The state
/// machine is handed back so tests can inspect what was applied.
pub(crate) fn mock_node(
    node_id: u32,
    configuration: &ClusterConfiguration,
    network: &LocalNetwork,
    shutdown_signal: watch::Receiver<()>,
) -> (Arc<Node<MemTypeConfig>>, Arc<MemStateMachine>) {
    let state_machine = Arc::new(MemStateMachine::new(node_id));
    let node = NodeBuilder::<MemTypeConfig>::new(node_config(node_id, configuration), shutdown_signal)
        .raft_log(MemRaftLog::new())
        .state_storage(MemStateStorage::new())
        .state_machine(state_machine.clone())
        .transport(network.transport(node_id))
        .build()
        .expect("build node")
        .ready()
        .expect("node ready");
    network.register(node.rpc_handler());
    (node, state_machine)
}
