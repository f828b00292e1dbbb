use tracing_test::traced_test;
use walraft::RoleKind;

use crate::common::NodeSeed;
use crate::common::TestCluster;
use crate::common::ELECTION_FAST;
use crate::common::ELECTION_SLOW;

/// # Case: first node to time out wins the next term
///
/// ## Setup:
/// - 3 nodes, all at term 1
/// - node 1 has the shortest election timeout
///
/// ## Criterias:
/// 1. node 1 is leader of term 2 and voted for itself
/// 2. nodes 2 and 3 are followers of term 2 with `voted_for = 1`
#[tokio::test]
#[traced_test]
async fn test_first_timeout_wins_with_votes_of_peers() {
    let mut cluster = TestCluster::new(&[1, 2, 3]);
    cluster.start_node(1, NodeSeed::fresh(ELECTION_FAST).with_term(1, None));
    cluster.start_node(2, NodeSeed::fresh(ELECTION_SLOW).with_term(1, None));
    cluster.start_node(3, NodeSeed::fresh(ELECTION_SLOW).with_term(1, None));

    let leader = cluster.wait_for_leader(&[1, 2, 3]).await;
    assert_eq!(leader, 1);

    let status = cluster.status(1);
    assert_eq!(status.current_term, 2);
    assert_eq!(status.voted_for, Some(1));
    assert_eq!(status.leader_id, Some(1));

    for id in [2, 3] {
        let status = cluster
            .wait_for_status(id, |s| s.voted_for == Some(1) && s.leader_id == Some(1))
            .await;
        assert_eq!(status.role, RoleKind::Follower);
        assert_eq!(status.current_term, 2);
    }

    cluster.shutdown().await;
}

/// # Case: two candidates split the votes of a term
///
/// ## Setup:
/// - nodes 1 and 2 restart in term 2, each having voted for itself
/// - node 3 is unreachable, so no term-2 vote can complete a majority
///
/// ## Criterias:
/// 1. nobody leads term 2
/// 2. a later round with fresh randomized timeouts elects one of them
/// 3. the other one follows the winner in the same term
#[tokio::test]
#[traced_test]
async fn test_split_vote_is_resolved_by_a_later_round() {
    let mut cluster = TestCluster::new(&[1, 2, 3]);
    cluster.network.isolate(3);
    cluster.start_node(1, NodeSeed::fresh(ELECTION_FAST).with_term(2, Some(1)));
    cluster.start_node(2, NodeSeed::fresh(ELECTION_FAST).with_term(2, Some(2)));
    cluster.start_node(3, NodeSeed::fresh(ELECTION_SLOW));

    let leader = cluster.wait_for_leader(&[1, 2]).await;
    let leader_status = cluster.status(leader);
    assert!(leader_status.current_term > 2);
    assert_eq!(leader_status.voted_for, Some(leader));

    let other = if leader == 1 { 2 } else { 1 };
    let status = cluster
        .wait_for_status(other, |s| s.leader_id == Some(leader) && s.current_term == leader_status.current_term)
        .await;
    assert_eq!(status.role, RoleKind::Follower);

    cluster.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn test_single_voter_elects_itself() {
    let mut cluster = TestCluster::new(&[1]);
    cluster.start_node(1, NodeSeed::fresh(ELECTION_FAST));

    assert_eq!(cluster.wait_for_leader(&[1]).await, 1);
    let status = cluster.wait_for_status(1, |s| s.commit_index == 1).await;
    assert_eq!(status.current_term, 1);

    cluster.shutdown().await;
}
