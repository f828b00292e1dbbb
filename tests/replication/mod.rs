use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing_test::traced_test;
use walraft::proto::LogId;
use walraft::proto::NodeMeta;
use walraft::ConsensusError;
use walraft::Error;
use walraft::MemStateMachine;
use walraft::NodeBuilder;
use walraft::RaftTypeConfig;
use walraft::RoleKind;
use walraft::StateMachine;

use crate::common::commands;
use crate::common::node_address;
use crate::common::node_config;
use crate::common::NodeSeed;
use crate::common::TestCluster;
use crate::common::ELECTION_FAST;
use crate::common::ELECTION_SLOW;
use crate::common::WAIT;

/// # Case: commit index only covers what a majority stored
///
/// ## Setup:
/// - node 1 leads term 3, entries 1..=6 are committed on all nodes
/// - leader's messages to 2 and 3 are dropped, then entry 7 is proposed
///
/// ## Criterias:
/// 1. leader holds 7 in its log but commit index stays at 6
/// 2. once node 2 is reachable again, 7 commits and the proposal resolves
#[tokio::test]
#[traced_test]
async fn test_commit_waits_for_majority_acknowledgement() {
    let mut cluster = TestCluster::new(&[1, 2, 3]);
    cluster.start_node(1, NodeSeed::fresh(ELECTION_FAST).with_term(2, None));
    cluster.start_node(2, NodeSeed::fresh(ELECTION_SLOW).with_term(2, None));
    cluster.start_node(3, NodeSeed::fresh(ELECTION_SLOW).with_term(2, None));
    assert_eq!(cluster.wait_for_leader(&[1, 2, 3]).await, 1);

    let leader = cluster.node(1).clone();
    // index 1 is the no-op of term 3
    for index in 2..=6u64 {
        assert_eq!(leader.propose(format!("cmd-{}", index).into_bytes()).await.unwrap(), index);
    }
    for id in [2, 3] {
        cluster.wait_for_status(id, |s| s.commit_index == 6).await;
    }

    cluster.network.block_link(1, 2);
    cluster.network.block_link(1, 3);
    let proposer = leader.clone();
    let pending = tokio::spawn(async move { proposer.propose(b"cmd-7".to_vec()).await });

    cluster.wait_for_status(1, |s| s.last_log_id.index == 7).await;
    sleep(Duration::from_millis(200)).await;
    let status = cluster.status(1);
    assert_eq!(status.last_log_id, LogId::new(3, 7));
    assert_eq!(status.commit_index, 6);
    assert!(!pending.is_finished());

    cluster.network.heal(2);
    assert_eq!(pending.await.unwrap().unwrap(), 7);
    let status = cluster.wait_for_status(1, |s| s.commit_index == 7).await;
    assert_eq!(status.role, RoleKind::Leader);
    // node 3 still holds only what it received before the drop
    assert_eq!(cluster.status(3).last_log_id.index, 6);

    cluster.shutdown().await;
}

/// # Case: follower suffix from an old term is replaced
///
/// ## Setup:
/// - node 1 and 3: entries 1..=9 of term 1 and 10..=12 of term 3
/// - node 2: entries 1..=9 of term 1 and 10..=11 of term 2
///
/// ## Criterias:
/// 1. node 1 wins term 4 and appends its no-op at 13
/// 2. node 2 drops its term-2 entries from index 10 on and ends with the
///    leader's log
#[tokio::test]
#[traced_test]
async fn test_conflicting_follower_suffix_is_truncated() {
    let mut leader_log = commands(1..=9, 1);
    leader_log.extend(commands(10..=12, 3));
    let mut stale_log = commands(1..=9, 1);
    stale_log.extend(commands(10..=11, 2));

    let mut cluster = TestCluster::new(&[1, 2, 3]);
    cluster.start_node(
        1,
        NodeSeed::fresh(ELECTION_FAST)
            .with_term(3, None)
            .with_entries(leader_log.clone()),
    );
    cluster.start_node(
        2,
        NodeSeed::fresh(ELECTION_SLOW)
            .with_term(2, None)
            .with_entries(stale_log),
    );
    cluster.start_node(
        3,
        NodeSeed::fresh(ELECTION_SLOW)
            .with_term(3, None)
            .with_entries(leader_log),
    );
    assert_eq!(cluster.wait_for_leader(&[1, 2, 3]).await, 1);

    let status = cluster.wait_for_status(2, |s| s.last_applied.index == 13).await;
    assert_eq!(status.last_log_id, LogId::new(4, 13));
    assert_eq!(status.current_term, 4);

    let applied = cluster.state_machine(2).applied_commands();
    let tail: Vec<(u64, Vec<u8>)> = applied.into_iter().filter(|(index, _)| *index >= 10).collect();
    assert_eq!(
        tail,
        vec![
            (10, b"t3-10".to_vec()),
            (11, b"t3-11".to_vec()),
            (12, b"t3-12".to_vec()),
        ]
    );

    cluster.shutdown().await;
}

/// # Case: a follower behind the compacted prefix catches up from a snapshot
///
/// ## Setup:
/// - node 1 leads, messages to node 3 are dropped
/// - entries 2..=6 are committed by nodes 1 and 2, then node 1 compacts
///   its log through 6
///
/// ## Criterias:
/// 1. once reachable, node 3 installs the snapshot and applies all 5 commands
/// 2. later entries replicate to node 3 after the snapshot boundary
#[tokio::test]
#[traced_test]
async fn test_lagging_follower_installs_snapshot() {
    let cluster = TestCluster::start_with_first(&[1, 2, 3], 1);
    assert_eq!(cluster.wait_for_leader(&[1, 2, 3]).await, 1);
    let leader = cluster.node(1).clone();

    cluster.network.block_link(1, 3);
    for index in 2..=6u64 {
        assert_eq!(leader.propose(format!("cmd-{}", index).into_bytes()).await.unwrap(), index);
    }
    cluster.wait_for_status(1, |s| s.last_applied.index == 6).await;
    let through = leader.compact_log().await.unwrap();
    assert_eq!(through.index, 6);
    assert!(cluster.status(3).last_applied.index < 6);

    cluster.network.heal(3);
    let status = cluster.wait_for_status(3, |s| s.last_applied.index == 6).await;
    assert_eq!(status.commit_index, 6);
    assert_eq!(status.last_log_id, through);
    let applied = cluster.state_machine(3).applied_commands();
    assert_eq!(applied.len(), 5);
    assert_eq!(applied.last(), Some(&(6, b"cmd-6".to_vec())));

    assert_eq!(leader.propose(b"cmd-7".to_vec()).await.unwrap(), 7);
    cluster.wait_for_status(3, |s| s.last_applied.index == 7).await;
    assert_eq!(
        cluster.state_machine(3).applied_commands().last(),
        Some(&(7, b"cmd-7".to_vec()))
    );

    cluster.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn test_follower_answers_with_leader_hint() {
    let cluster = TestCluster::start_with_first(&[1, 2, 3], 1);
    assert_eq!(cluster.wait_for_leader(&[1, 2, 3]).await, 1);
    cluster.wait_for_status(2, |s| s.leader_id == Some(1)).await;

    let e = cluster.node(2).propose(b"x".to_vec()).await.unwrap_err();
    match e {
        Error::Consensus(ConsensusError::NotLeader {
            leader_id,
            leader_address,
        }) => {
            assert_eq!(leader_id, Some(1));
            assert_eq!(leader_address, Some(node_address(1)));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    cluster.shutdown().await;
}

/// # Case: leader crash
///
/// ## Criterias:
/// 1. the remaining majority elects a leader of a higher term
/// 2. committed entries survive and new ones commit
/// 3. the old leader steps down and catches up once reachable
#[tokio::test]
#[traced_test]
async fn test_leader_failover_keeps_committed_entries() {
    let cluster = TestCluster::start_with_first(&[1, 2, 3], 1);
    assert_eq!(cluster.wait_for_leader(&[1, 2, 3]).await, 1);
    let old_term = cluster.status(1).current_term;

    assert_eq!(cluster.node(1).propose(b"a".to_vec()).await.unwrap(), 2);
    for id in [2, 3] {
        cluster.wait_for_status(id, |s| s.last_applied.index == 2).await;
    }

    cluster.network.isolate(1);
    let new_leader = cluster.wait_for_leader(&[2, 3]).await;
    let new_term = cluster.status(new_leader).current_term;
    assert!(new_term > old_term);

    // no-op of the new term takes index 3
    assert_eq!(cluster.node(new_leader).propose(b"b".to_vec()).await.unwrap(), 4);
    assert_eq!(cluster.status(1).commit_index, 2);

    cluster.network.heal(1);
    let status = cluster
        .wait_for_status(1, |s| s.role == RoleKind::Follower && s.last_applied.index == 4)
        .await;
    assert_eq!(status.current_term, new_term);
    assert_eq!(status.leader_id, Some(new_leader));
    assert_eq!(
        cluster.state_machine(1).applied_commands(),
        vec![(2, b"a".to_vec()), (4, b"b".to_vec())]
    );

    cluster.shutdown().await;
}

/// # Case: three nodes talking over TCP with sled storage
#[tokio::test]
#[traced_test]
async fn test_tcp_cluster_replicates_to_every_node() {
    const PORT_BASE: u32 = 30180;
    let dir = tempfile::tempdir().unwrap();
    let configuration = walraft::proto::ClusterConfiguration::new(
        0,
        (1..=3)
            .map(|id| NodeMeta::voter(id, format!("127.0.0.1:{}", PORT_BASE + id)))
            .collect(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let mut nodes = Vec::new();
    for id in 1..=3u32 {
        let election = if id == 1 { ELECTION_FAST } else { ELECTION_SLOW };
        let mut config = node_config(id, &configuration, election);
        config.cluster.listen_address = format!("127.0.0.1:{}", PORT_BASE + id).parse().unwrap();
        config.cluster.db_root_dir = dir.path().to_path_buf();

        let state_machine = Arc::new(MemStateMachine::new(id));
        let node = NodeBuilder::<RaftTypeConfig>::new(config, shutdown_rx.clone())
            .state_machine(state_machine.clone())
            .with_default_components()
            .unwrap()
            .build()
            .unwrap()
            .start_rpc_server()
            .await
            .unwrap()
            .ready()
            .unwrap();
        let runner = node.clone();
        tokio::spawn(async move { runner.run().await });
        nodes.push((node, state_machine));
    }

    let leader = nodes[0].0.clone();
    let mut status_rx = leader.subscribe_status();
    tokio::time::timeout(WAIT, status_rx.wait_for(|s| s.role == RoleKind::Leader))
        .await
        .expect("leader elected in time")
        .unwrap();
    assert_eq!(leader.propose(b"over-tcp".to_vec()).await.unwrap(), 2);

    for (_, state_machine) in &nodes {
        tokio::time::timeout(WAIT, async {
            while state_machine.last_applied().index < 2 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("every node applies the entry");
        assert_eq!(state_machine.applied_commands(), vec![(2, b"over-tcp".to_vec())]);
    }

    shutdown_tx.send(()).unwrap();
}
