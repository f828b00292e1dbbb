use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::Instant;
use walraft::proto::ClusterConfiguration;
use walraft::proto::Entry;
use walraft::proto::EntryPayload;
use walraft::proto::NodeMeta;
use walraft::BackoffPolicy;
use walraft::HardState;
use walraft::LocalNetwork;
use walraft::MemRaftLog;
use walraft::MemStateMachine;
use walraft::MemStateStorage;
use walraft::MemTypeConfig;
use walraft::Node;
use walraft::NodeBuilder;
use walraft::NodeStatus;
use walraft::RaftLog;
use walraft::RaftNodeConfig;
use walraft::RoleKind;
use walraft::StateStorage;

/// Election timeout range of the node that should time out first
pub const ELECTION_FAST: (u64, u64) = (150, 200);
/// Election timeout range of nodes that should wait for a leader
pub const ELECTION_SLOW: (u64, u64) = (1500, 1800);

pub const WAIT: Duration = Duration::from_secs(5);

pub fn node_address(node_id: u32) -> String {
    format!("127.0.0.1:{}", 9080 + node_id)
}

pub fn voters(ids: &[u32]) -> ClusterConfiguration {
    ClusterConfiguration::new(
        0,
        ids.iter().map(|id| NodeMeta::voter(*id, node_address(*id))).collect(),
    )
}

pub fn node_config(
    node_id: u32,
    configuration: &ClusterConfiguration,
    election: (u64, u64),
) -> RaftNodeConfig {
    let mut config = RaftNodeConfig::default();
    config.cluster.node_id = node_id;
    config.cluster.initial_cluster = configuration.members.clone();
    config.raft.election.election_timeout_min = election.0;
    config.raft.election.election_timeout_max = election.1;
    config.raft.replication.rpc_append_entries_clock_in_ms = 50;
    config.raft.client_request_timeout_in_ms = 3000;

    let policy = BackoffPolicy {
        max_retries: 0,
        timeout_ms: 100,
        base_delay_ms: 10,
        max_delay_ms: 50,
    };
    config.retry.append_entries = policy;
    config.retry.election = policy;
    config.retry.install_snapshot = policy;
    config
}

/// Command entry whose payload names its own position, e.g. `t3-10`
pub fn command(
    index: u64,
    term: u64,
) -> Entry {
    Entry::new(
        index,
        term,
        EntryPayload::Command(format!("t{}-{}", term, index).into_bytes()),
    )
}

pub fn commands(
    range: RangeInclusive<u64>,
    term: u64,
) -> Vec<Entry> {
    range.map(|index| command(index, term)).collect()
}

/// What a node finds on "disk" when it starts
#[derive(Debug, Clone)]
pub struct NodeSeed {
    pub hard_state: Option<HardState>,
    pub entries: Vec<Entry>,
    pub election: (u64, u64),
}

impl NodeSeed {
    pub fn fresh(election: (u64, u64)) -> Self {
        Self {
            hard_state: None,
            entries: Vec::new(),
            election,
        }
    }

    pub fn with_term(
        mut self,
        current_term: u64,
        voted_for: Option<u32>,
    ) -> Self {
        self.hard_state = Some(HardState {
            current_term,
            voted_for,
        });
        self
    }

    pub fn with_entries(
        mut self,
        entries: Vec<Entry>,
    ) -> Self {
        self.entries.extend(entries);
        self
    }
}

pub struct TestNode {
    pub node: Arc<Node<MemTypeConfig>>,
    pub state_machine: Arc<MemStateMachine>,
    shutdown_tx: watch::Sender<()>,
    handle: JoinHandle<walraft::Result<()>>,
}

/// In-process cluster over a [`LocalNetwork`]
pub struct TestCluster {
    pub network: LocalNetwork,
    pub configuration: ClusterConfiguration,
    pub nodes: BTreeMap<u32, TestNode>,
}

impl TestCluster {
    pub fn new(ids: &[u32]) -> Self {
        Self {
            network: LocalNetwork::new(),
            configuration: voters(ids),
            nodes: BTreeMap::new(),
        }
    }

    /// Starts every member of the bootstrap configuration, `first` with a
    /// short election timeout and the others with a long one.
    pub fn start_with_first(
        ids: &[u32],
        first: u32,
    ) -> Self {
        let mut cluster = Self::new(ids);
        for id in ids {
            let election = if *id == first { ELECTION_FAST } else { ELECTION_SLOW };
            cluster.start_node(*id, NodeSeed::fresh(election));
        }
        cluster
    }

    pub fn start_node(
        &mut self,
        node_id: u32,
        seed: NodeSeed,
    ) {
        let raft_log = MemRaftLog::new();
        if !seed.entries.is_empty() {
            raft_log.append(seed.entries).expect("seed log");
        }
        let state_storage = MemStateStorage::new();
        if let Some(hard_state) = seed.hard_state {
            state_storage.save_hard_state(hard_state).expect("seed hard state");
        }

        let state_machine = Arc::new(MemStateMachine::new(node_id));
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let node = NodeBuilder::<MemTypeConfig>::new(
            node_config(node_id, &self.configuration, seed.election),
            shutdown_rx,
        )
        .raft_log(raft_log)
        .state_storage(state_storage)
        .state_machine(state_machine.clone())
        .transport(self.network.transport(node_id))
        .build()
        .expect("build node")
        .ready()
        .expect("node ready");
        self.network.register(node.rpc_handler());

        let runner = node.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        self.nodes.insert(
            node_id,
            TestNode {
                node,
                state_machine,
                shutdown_tx,
                handle,
            },
        );
    }

    pub fn node(
        &self,
        node_id: u32,
    ) -> &Arc<Node<MemTypeConfig>> {
        &self.nodes.get(&node_id).expect("node is running").node
    }

    pub fn state_machine(
        &self,
        node_id: u32,
    ) -> &Arc<MemStateMachine> {
        &self.nodes.get(&node_id).expect("node is running").state_machine
    }

    pub fn status(
        &self,
        node_id: u32,
    ) -> NodeStatus {
        self.node(node_id).status()
    }

    /// Waits until one of `among` is leader and returns it. When several
    /// claim leadership the one with the highest term wins.
    pub async fn wait_for_leader(
        &self,
        among: &[u32],
    ) -> u32 {
        let deadline = Instant::now() + WAIT;
        loop {
            let leader = among
                .iter()
                .map(|id| self.status(*id))
                .filter(|s| s.role == RoleKind::Leader)
                .max_by_key(|s| s.current_term);
            if let Some(status) = leader {
                return status.node_id;
            }
            assert!(Instant::now() < deadline, "no leader elected among {:?}", among);
            sleep(Duration::from_millis(10)).await;
        }
    }

    pub async fn wait_for_status(
        &self,
        node_id: u32,
        predicate: impl Fn(&NodeStatus) -> bool,
    ) -> NodeStatus {
        let mut status_rx = self.node(node_id).subscribe_status();
        let status = tokio::time::timeout(WAIT, status_rx.wait_for(|s| predicate(s)))
            .await
            .unwrap_or_else(|_| panic!("node {} did not reach the expected status", node_id))
            .expect("status channel open")
            .clone();
        status
    }

    /// Stops the consensus loop of `node_id` and removes it from the network
    pub async fn stop_node(
        &mut self,
        node_id: u32,
    ) {
        if let Some(test_node) = self.nodes.remove(&node_id) {
            self.network.unregister(node_id);
            let _ = test_node.shutdown_tx.send(());
            let _ = test_node.handle.await;
        }
    }

    pub async fn shutdown(mut self) {
        let ids: Vec<u32> = self.nodes.keys().copied().collect();
        for id in ids {
            self.stop_node(id).await;
        }
    }
}
