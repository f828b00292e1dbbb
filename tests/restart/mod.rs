use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing_test::traced_test;
use walraft::proto::LogId;
use walraft::MemStateMachine;
use walraft::Node;
use walraft::NodeBuilder;
use walraft::RaftNodeConfig;
use walraft::RaftTypeConfig;
use walraft::RoleKind;
use walraft::StateMachine;

use crate::common::node_config;
use crate::common::voters;
use crate::common::ELECTION_FAST;
use crate::common::WAIT;

fn start_sled_node(
    config: RaftNodeConfig,
    shutdown_rx: watch::Receiver<()>,
) -> (Arc<Node<RaftTypeConfig>>, Arc<MemStateMachine>) {
    let state_machine = Arc::new(MemStateMachine::new(config.cluster.node_id));
    let node = NodeBuilder::<RaftTypeConfig>::new(config, shutdown_rx)
        .state_machine(state_machine.clone())
        .with_default_components()
        .expect("open sled storage")
        .build()
        .expect("build node")
        .ready()
        .expect("node ready");
    (node, state_machine)
}

async fn wait_for_leader(node: &Node<RaftTypeConfig>) {
    let mut status_rx = node.subscribe_status();
    tokio::time::timeout(WAIT, status_rx.wait_for(|s| s.role == RoleKind::Leader))
        .await
        .expect("leader elected in time")
        .expect("status channel open");
}

/// # Case: a node restarted on the same sled directory
///
/// ## Criterias:
/// 1. term, vote, commit index and log are read back
/// 2. the in-memory state machine is rebuilt by replaying committed entries
/// 3. the node wins a new term and keeps appending after its old log
#[tokio::test]
#[traced_test]
async fn test_sled_node_recovers_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = node_config(1, &voters(&[1]), ELECTION_FAST);
    config.cluster.db_root_dir = dir.path().to_path_buf();

    let first_term = {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let (node, _) = start_sled_node(config.clone(), shutdown_rx);
        let runner = node.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        wait_for_leader(&node).await;
        for (i, command) in ["a", "b", "c"].iter().enumerate() {
            let index = node.propose(command.as_bytes().to_vec()).await.unwrap();
            assert_eq!(index, i as u64 + 2);
        }
        let term = node.status().current_term;

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        drop(node);
        // let the apply task release its handle on the database
        sleep(Duration::from_millis(200)).await;
        term
    };

    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let (node, state_machine) = start_sled_node(config, shutdown_rx);

    let status = node.status();
    assert_eq!(status.current_term, first_term);
    assert_eq!(status.voted_for, Some(1));
    assert_eq!(status.commit_index, 4);
    assert_eq!(status.last_log_id, LogId::new(first_term, 4));

    tokio::time::timeout(WAIT, async {
        while state_machine.last_applied().index < 4 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("state machine replays the log");
    assert_eq!(
        state_machine.applied_commands(),
        vec![(2, b"a".to_vec()), (3, b"b".to_vec()), (4, b"c".to_vec())]
    );

    let runner = node.clone();
    tokio::spawn(async move { runner.run().await });
    wait_for_leader(&node).await;
    assert!(node.status().current_term > first_term);
    // no-op of the new term takes index 5
    assert_eq!(node.propose(b"d".to_vec()).await.unwrap(), 6);
}

/// # Case: a compacted node restarted on the same sled directory
///
/// ## Setup:
/// 1. three commands are proposed and applied, then the log is compacted
/// 2. the node restarts with a fresh in-memory state machine
///
/// ## Criterias:
/// 1. the state machine is restored from the persisted snapshot
/// 2. the log still reports the compaction boundary as its last id
/// 3. new proposals are applied after the restored state
#[tokio::test]
#[traced_test]
async fn test_compacted_node_restores_snapshot_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = node_config(1, &voters(&[1]), ELECTION_FAST);
    config.cluster.db_root_dir = dir.path().to_path_buf();

    let (first_term, through) = {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let (node, state_machine) = start_sled_node(config.clone(), shutdown_rx);
        let runner = node.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        wait_for_leader(&node).await;
        for command in ["a", "b", "c"] {
            node.propose(command.as_bytes().to_vec()).await.unwrap();
        }
        tokio::time::timeout(WAIT, async {
            while state_machine.last_applied().index < 4 {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("commands applied");

        let through = node.compact_log().await.unwrap();
        assert_eq!(through.index, 4);
        let term = node.status().current_term;

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap().unwrap();
        drop(node);
        sleep(Duration::from_millis(200)).await;
        (term, through)
    };

    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let (node, state_machine) = start_sled_node(config, shutdown_rx);

    assert_eq!(state_machine.last_applied(), through);
    assert_eq!(
        state_machine.applied_commands(),
        vec![(2, b"a".to_vec()), (3, b"b".to_vec()), (4, b"c".to_vec())]
    );
    let status = node.status();
    assert_eq!(status.commit_index, 4);
    assert_eq!(status.last_log_id, LogId::new(first_term, 4));

    let runner = node.clone();
    tokio::spawn(async move { runner.run().await });
    wait_for_leader(&node).await;
    assert_eq!(node.propose(b"d".to_vec()).await.unwrap(), 6);

    tokio::time::timeout(WAIT, async {
        while state_machine.last_applied().index < 6 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("new proposal applied");
    assert_eq!(state_machine.applied_commands().last(), Some(&(6, b"d".to_vec())));
}
