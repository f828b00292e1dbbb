use tracing_test::traced_test;
use walraft::proto::MembershipChange;
use walraft::proto::NodeMeta;
use walraft::ConsensusError;
use walraft::Error;
use walraft::MembershipError;
use walraft::RoleKind;

use crate::common::node_address;
use crate::common::NodeSeed;
use crate::common::TestCluster;
use crate::common::ELECTION_SLOW;

/// # Case: grow the cluster one step at a time
///
/// ## Criterias:
/// 1. a non-voter receives the whole log before it votes
/// 2. promotion and removal each take effect once their entry commits
#[tokio::test]
#[traced_test]
async fn test_add_non_voter_promote_and_remove() {
    let mut cluster = TestCluster::start_with_first(&[1, 2, 3], 1);
    assert_eq!(cluster.wait_for_leader(&[1, 2, 3]).await, 1);
    cluster.wait_for_status(1, |s| s.commit_index >= 1).await;
    assert_eq!(cluster.node(1).propose(b"before".to_vec()).await.unwrap(), 2);

    // not part of any configuration yet, so it only listens
    cluster.start_node(4, NodeSeed::fresh(ELECTION_SLOW));

    let index = cluster
        .node(1)
        .change_membership(MembershipChange::AddNonVoter(NodeMeta::non_voter(4, node_address(4))))
        .await
        .unwrap();
    assert_eq!(index, 3);

    let status = cluster.wait_for_status(4, |s| s.last_applied.index >= 3 && s.epoch == 3).await;
    assert_eq!(status.role, RoleKind::Follower);
    assert_eq!(status.leader_id, Some(1));
    assert_eq!(cluster.state_machine(4).applied_commands(), vec![(2, b"before".to_vec())]);

    let index = cluster.node(1).change_membership(MembershipChange::Promote(4)).await.unwrap();
    assert_eq!(index, 4);
    assert_eq!(cluster.wait_for_status(1, |s| s.epoch == 4).await.role, RoleKind::Leader);

    let index = cluster.node(1).change_membership(MembershipChange::Remove(3)).await.unwrap();
    assert_eq!(index, 5);
    // a removed node never learns its removal commits, stop it before it campaigns
    cluster.stop_node(3).await;
    cluster.wait_for_status(2, |s| s.epoch == 5).await;
    cluster.wait_for_status(4, |s| s.epoch == 5).await;

    // writes still commit with the new majority {1, 2, 4}
    assert_eq!(cluster.node(1).propose(b"after".to_vec()).await.unwrap(), 6);

    cluster.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn test_invalid_change_is_rejected() {
    let cluster = TestCluster::start_with_first(&[1, 2, 3], 1);
    assert_eq!(cluster.wait_for_leader(&[1, 2, 3]).await, 1);
    cluster.wait_for_status(1, |s| s.commit_index >= 1).await;

    let e = cluster
        .node(1)
        .change_membership(MembershipChange::Promote(9))
        .await
        .unwrap_err();
    assert!(matches!(
        e,
        Error::Consensus(ConsensusError::Membership(MembershipError::NoMetadataFoundForNode { node_id: 9 }))
    ));
    assert_eq!(cluster.status(1).epoch, 0);

    cluster.shutdown().await;
}

/// # Case: the leader removes itself
///
/// ## Criterias:
/// 1. the change resolves once committed, then the old leader steps down
/// 2. the remaining voters elect a leader that runs the new configuration
#[tokio::test]
#[traced_test]
async fn test_removed_leader_steps_down() {
    let cluster = TestCluster::start_with_first(&[1, 2, 3], 1);
    assert_eq!(cluster.wait_for_leader(&[1, 2, 3]).await, 1);
    cluster.wait_for_status(1, |s| s.commit_index >= 1).await;

    let index = cluster.node(1).change_membership(MembershipChange::Remove(1)).await.unwrap();
    assert_eq!(index, 2);
    cluster.wait_for_status(1, |s| s.role == RoleKind::Follower).await;

    let new_leader = cluster.wait_for_leader(&[2, 3]).await;
    let status = cluster.wait_for_status(new_leader, |s| s.epoch == 2 && s.commit_index >= 3).await;
    assert_eq!(status.role, RoleKind::Leader);

    // the removed node keeps following without campaigning
    let status = cluster.status(1);
    assert_eq!(status.role, RoleKind::Follower);

    cluster.shutdown().await;
}
