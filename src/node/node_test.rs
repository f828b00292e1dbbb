use std::time::Duration;

use tokio::sync::watch;

use crate::test_utils::mock_node;
use crate::test_utils::node_address;
use crate::test_utils::voters;
use crate::ConsensusError;
use crate::Error;
use crate::LocalNetwork;
use crate::NetworkError;
use crate::RoleKind;
use crate::StateMachine;

#[tokio::test]
async fn test_readiness_follows_run() {
    let network = LocalNetwork::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let (node, _) = mock_node(1, &voters(&[1]), &network, shutdown_rx);
    assert!(!node.server_is_ready());

    let runner = node.clone();
    let handle = tokio::spawn(async move { runner.run().await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(node.server_is_ready());

    shutdown_tx.send(()).expect("Expect send shutdown successfully");
    let result = handle.await.unwrap();
    assert!(result.is_ok());
    assert!(!node.server_is_ready());
}

/// # Case: single voter elects itself and commits proposals
///
/// ## Criterias:
/// 1. the no-op of the new term takes index 1
/// 2. proposals resolve with their own index and are applied in order
#[tokio::test]
async fn test_propose_on_single_node() {
    let network = LocalNetwork::new();
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let (node, state_machine) = mock_node(1, &voters(&[1]), &network, shutdown_rx);

    let runner = node.clone();
    tokio::spawn(async move { runner.run().await });

    let mut status_rx = node.subscribe_status();
    tokio::time::timeout(Duration::from_secs(2), status_rx.wait_for(|s| s.role == RoleKind::Leader))
        .await
        .expect("leader elected in time")
        .unwrap();

    assert_eq!(node.propose(b"a".to_vec()).await.unwrap(), 2);
    assert_eq!(node.propose(b"b".to_vec()).await.unwrap(), 3);

    tokio::time::timeout(Duration::from_secs(1), status_rx.wait_for(|s| s.last_applied.index == 3))
        .await
        .expect("applied in time")
        .unwrap();
    assert_eq!(
        state_machine.applied_commands(),
        vec![(2, b"a".to_vec()), (3, b"b".to_vec())]
    );
    assert_eq!(node.status().commit_index, 3);
}

#[tokio::test]
async fn test_propose_on_follower_returns_not_leader() {
    let network = LocalNetwork::new();
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let (node, _) = mock_node(1, &voters(&[1, 2, 3]), &network, shutdown_rx);

    let runner = node.clone();
    tokio::spawn(async move { runner.run().await });

    let e = node.propose(b"a".to_vec()).await.unwrap_err();
    assert!(e.is_not_leader());
    assert!(matches!(
        e,
        Error::Consensus(ConsensusError::NotLeader {
            leader_id: None,
            leader_address: None
        })
    ));
}

#[tokio::test]
async fn test_request_times_out_when_loop_is_not_running() {
    let network = LocalNetwork::new();
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let (node, _) = mock_node(1, &voters(&[1]), &network, shutdown_rx);

    let e = node.propose(b"a".to_vec()).await.unwrap_err();
    assert!(matches!(
        e,
        Error::System(crate::SystemError::Network(NetworkError::Timeout { node_id: 1, .. }))
    ));
}

#[tokio::test]
async fn test_compact_log_on_leader() {
    let network = LocalNetwork::new();
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let (node, state_machine) = mock_node(1, &voters(&[1]), &network, shutdown_rx);

    let runner = node.clone();
    tokio::spawn(async move { runner.run().await });

    let mut status_rx = node.subscribe_status();
    tokio::time::timeout(Duration::from_secs(2), status_rx.wait_for(|s| s.role == RoleKind::Leader))
        .await
        .expect("leader elected in time")
        .unwrap();
    for i in 0..4u8 {
        node.propose(vec![i]).await.unwrap();
    }
    tokio::time::timeout(Duration::from_secs(1), status_rx.wait_for(|s| s.last_applied.index == 5))
        .await
        .expect("applied in time")
        .unwrap();

    let through = node.compact_log().await.unwrap();
    assert_eq!(through, state_machine.last_applied());
    assert_eq!(through.index, 5);

    // Writes continue after the compacted prefix
    assert_eq!(node.propose(b"after".to_vec()).await.unwrap(), 6);
}

#[tokio::test]
async fn test_rpc_handler_targets_this_node() {
    let network = LocalNetwork::new();
    let (_shutdown_tx, shutdown_rx) = watch::channel(());
    let (node, _) = mock_node(3, &voters(&[1, 2, 3]), &network, shutdown_rx);

    assert_eq!(node.rpc_handler().node_id(), 3);
    assert_eq!(node.node_id(), 3);
    assert_eq!(node.node_config.cluster.initial_cluster[2].address, node_address(3));
}
