use std::sync::Once;

use tracing_subscriber::EnvFilter;

use crate::proto::ClusterConfiguration;
use crate::proto::NodeMeta;
use crate::BackoffPolicy;
use crate::RaftNodeConfig;

static INIT_LOGGER: Once = Once::new();

/// Routes `tracing` output to the test harness, filtered by `RUST_LOG`.
pub fn enable_logger() {
    INIT_LOGGER.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn node_address(node_id: u32) -> String {
    format!("127.0.0.1:{}", 9080 + node_id)
}

/// Bootstrap configuration where every id is a voter
pub fn voters(ids: &[u32]) -> ClusterConfiguration {
    ClusterConfiguration::new(
        0,
        ids.iter().map(|id| NodeMeta::voter(*id, node_address(*id))).collect(),
    )
}

/// Node config with short timers, suitable for paused-clock tests
pub fn node_config(
    node_id: u32,
    initial_cluster: &ClusterConfiguration,
) -> RaftNodeConfig {
    let mut config = RaftNodeConfig::default();
    config.cluster.node_id = node_id;
    config.cluster.initial_cluster = initial_cluster.members.clone();
    config.raft.election.election_timeout_min = 150;
    config.raft.election.election_timeout_max = 300;
    config.raft.replication.rpc_append_entries_clock_in_ms = 50;
    config.raft.replication.append_entries_max_entries_per_replication = 16;
    config.raft.max_consecutive_storage_failures = 2;

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
