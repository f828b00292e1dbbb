use tokio::sync::mpsc;
use tokio::sync::oneshot;

use super::*;
use crate::proto::AppendEntriesRequest;
use crate::proto::AppendOutcome;
use crate::proto::ClusterConfiguration;
use crate::proto::NodeMeta;
use crate::proto::VoteRequest;
use crate::proto::VoteResponse;
use crate::test_utils::mock_raft_context;
use crate::test_utils::voters;
use crate::test_utils::MockContext;
use crate::LocalNetwork;
use crate::MemTypeConfig;
use crate::NetworkError;
use crate::RaftEvent;
use crate::RoleEvent;
use crate::StateStorage;

fn candidate(
    c: &MockContext<MemTypeConfig>,
    current_term: u64,
) -> CandidateState<MemTypeConfig> {
    let follower = FollowerState::new(
        c.ctx.node_id,
        HardState {
            current_term,
            voted_for: Some(c.ctx.node_id),
        },
        0,
        c.ctx.node_config(),
    );
    let mut state = CandidateState::from(&follower);
    state.votes.insert(c.ctx.node_id);
    state
}

fn granted_by(
    term: u64,
    peer_id: u32,
) -> RaftEvent {
    RaftEvent::VoteResponseReceived {
        term,
        peer_id,
        result: Ok(VoteResponse {
            term,
            vote_granted: true,
            last_log_index: 0,
            last_log_term: 0,
        }),
    }
}

/// # Case 1: new round bumps the term, votes for self and asks every voter
///
/// ## Criterias:
/// 1. hard state (term + 1, self) persisted
/// 2. one vote request per peer, unreachable peers come back as errors
#[tokio::test]
async fn test_tick_case1() {
    let mut c = mock_raft_context(1, voters(&[1, 2, 3]), &LocalNetwork::new());
    let mut state = candidate(&c, 1);
    let (role_tx, mut role_rx) = mpsc::unbounded_channel();

    state.tick(&role_tx, &c.ctx).await.unwrap();

    assert_eq!(state.current_term(), 2);
    assert_eq!(state.voted_for(), Some(1));
    assert_eq!(
        c.ctx.state_storage().load_hard_state().unwrap(),
        Some(HardState {
            current_term: 2,
            voted_for: Some(1)
        })
    );
    assert!(role_rx.try_recv().is_err());

    for _ in 0..2 {
        match c.event_rx.recv().await {
            Some(RaftEvent::VoteResponseReceived { term, result, .. }) => {
                assert_eq!(term, 2);
                assert!(result.is_err());
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}

/// # Case 2: single voter wins immediately
#[tokio::test]
async fn test_tick_case2() {
    let c = mock_raft_context(1, voters(&[1]), &LocalNetwork::new());
    let mut state = candidate(&c, 0);
    let (role_tx, mut role_rx) = mpsc::unbounded_channel();

    state.tick(&role_tx, &c.ctx).await.unwrap();

    assert_eq!(state.current_term(), 1);
    assert!(matches!(role_rx.try_recv(), Ok(RoleEvent::BecomeLeader)));
}

/// # Case 3: a node that is not a voter goes back to follower
#[tokio::test]
async fn test_tick_case3() {
    let configuration = ClusterConfiguration::new(
        0,
        vec![NodeMeta::voter(1, "127.0.0.1:9081"), NodeMeta::non_voter(2, "127.0.0.1:9082")],
    );
    let c = mock_raft_context(2, configuration, &LocalNetwork::new());
    let mut state = candidate(&c, 1);
    let (role_tx, mut role_rx) = mpsc::unbounded_channel();

    state.tick(&role_tx, &c.ctx).await.unwrap();

    assert_eq!(state.current_term(), 1);
    assert!(matches!(role_rx.try_recv(), Ok(RoleEvent::BecomeFollower(None))));
}

/// # Case 1: majority of five reached on the third vote, and only once
#[tokio::test]
async fn test_handle_vote_response_case1() {
    let c = mock_raft_context(1, voters(&[1, 2, 3, 4, 5]), &LocalNetwork::new());
    let mut state = candidate(&c, 3);
    let (role_tx, mut role_rx) = mpsc::unbounded_channel();

    state.handle_raft_event(granted_by(3, 2), &c.ctx, &role_tx).await.unwrap();
    assert!(role_rx.try_recv().is_err());

    state.handle_raft_event(granted_by(3, 3), &c.ctx, &role_tx).await.unwrap();
    assert!(matches!(role_rx.try_recv(), Ok(RoleEvent::BecomeLeader)));

    state.handle_raft_event(granted_by(3, 4), &c.ctx, &role_tx).await.unwrap();
    assert!(role_rx.try_recv().is_err());
}

/// # Case 2: responses of an earlier round are ignored
#[tokio::test]
async fn test_handle_vote_response_case2() {
    let c = mock_raft_context(1, voters(&[1, 2, 3]), &LocalNetwork::new());
    let mut state = candidate(&c, 3);
    let (role_tx, mut role_rx) = mpsc::unbounded_channel();

    state.handle_raft_event(granted_by(2, 2), &c.ctx, &role_tx).await.unwrap();

    assert!(role_rx.try_recv().is_err());
    assert_eq!(state.votes.len(), 1);
}

/// # Case 3: a higher term in a response ends the campaign
#[tokio::test]
async fn test_handle_vote_response_case3() {
    let c = mock_raft_context(1, voters(&[1, 2, 3]), &LocalNetwork::new());
    let mut state = candidate(&c, 3);
    let (role_tx, mut role_rx) = mpsc::unbounded_channel();

    let event = RaftEvent::VoteResponseReceived {
        term: 3,
        peer_id: 2,
        result: Ok(VoteResponse {
            term: 5,
            vote_granted: false,
            last_log_index: 9,
            last_log_term: 5,
        }),
    };
    state.handle_raft_event(event, &c.ctx, &role_tx).await.unwrap();

    assert_eq!(state.current_term(), 5);
    assert_eq!(state.voted_for(), None);
    assert!(matches!(role_rx.try_recv(), Ok(RoleEvent::BecomeFollower(None))));
}

/// # Case 4: failed requests count as no vote
#[tokio::test]
async fn test_handle_vote_response_case4() {
    let c = mock_raft_context(1, voters(&[1, 2, 3]), &LocalNetwork::new());
    let mut state = candidate(&c, 3);
    let (role_tx, mut role_rx) = mpsc::unbounded_channel();

    let event = RaftEvent::VoteResponseReceived {
        term: 3,
        peer_id: 2,
        result: Err(NetworkError::PeerUnreachable { node_id: 2 }.into()),
    };
    state.handle_raft_event(event, &c.ctx, &role_tx).await.unwrap();

    assert!(role_rx.try_recv().is_err());
    assert_eq!(state.current_term(), 3);
}

/// # Case: a leader of the same term makes the candidate step down and
/// replay the request as follower
#[tokio::test]
async fn test_append_entries_from_current_leader() {
    let c = mock_raft_context(1, voters(&[1, 2, 3]), &LocalNetwork::new());
    let mut state = candidate(&c, 3);
    let (role_tx, mut role_rx) = mpsc::unbounded_channel();
    let (resp_tx, _resp_rx) = oneshot::channel();

    let request = AppendEntriesRequest {
        term: 3,
        leader_id: 2,
        prev_log_index: 0,
        prev_log_term: 0,
        entries: vec![],
        leader_commit: 0,
    };
    state
        .handle_raft_event(RaftEvent::AppendEntries(request, resp_tx), &c.ctx, &role_tx)
        .await
        .unwrap();

    assert!(matches!(role_rx.try_recv(), Ok(RoleEvent::BecomeFollower(Some(2)))));
    assert!(matches!(
        role_rx.try_recv(),
        Ok(RoleEvent::ReprocessEvent(event)) if matches!(*event, RaftEvent::AppendEntries(..))
    ));
}

/// # Case: stale leader is rejected without stepping down
#[tokio::test]
async fn test_append_entries_from_stale_leader() {
    let c = mock_raft_context(1, voters(&[1, 2, 3]), &LocalNetwork::new());
    let mut state = candidate(&c, 3);
    let (role_tx, mut role_rx) = mpsc::unbounded_channel();
    let (resp_tx, resp_rx) = oneshot::channel();

    let request = AppendEntriesRequest {
        term: 2,
        leader_id: 2,
        prev_log_index: 0,
        prev_log_term: 0,
        entries: vec![],
        leader_commit: 0,
    };
    state
        .handle_raft_event(RaftEvent::AppendEntries(request, resp_tx), &c.ctx, &role_tx)
        .await
        .unwrap();

    let response = resp_rx.await.unwrap();
    assert_eq!(response.term, 3);
    assert_eq!(response.outcome, AppendOutcome::Rejected);
    assert!(role_rx.try_recv().is_err());
}

/// # Case: competing candidate of the same term is denied
#[tokio::test]
async fn test_vote_request_same_term_denied() {
    let c = mock_raft_context(1, voters(&[1, 2, 3]), &LocalNetwork::new());
    let mut state = candidate(&c, 3);
    let (role_tx, mut role_rx) = mpsc::unbounded_channel();
    let (resp_tx, resp_rx) = oneshot::channel();

    let request = VoteRequest {
        term: 3,
        candidate_id: 2,
        last_log_index: 10,
        last_log_term: 3,
    };
    state
        .handle_raft_event(RaftEvent::ReceiveVoteRequest(request, resp_tx), &c.ctx, &role_tx)
        .await
        .unwrap();

    assert!(!resp_rx.await.unwrap().vote_granted);
    assert!(role_rx.try_recv().is_err());
}

/// # Case: a higher term in a vote response ends the campaign even when it
/// can not be persisted
#[tokio::test]
async fn test_higher_term_vote_response_steps_down_when_save_fails() {
    let mut state_storage = crate::MockStateStorage::new();
    state_storage
        .expect_save_hard_state()
        .returning(|_| Err(crate::StorageError::DbError("disk full".to_string()).into()));
    let c = crate::test_utils::build_context::<crate::test_utils::MockTypeConfig>(
        1,
        voters(&[1, 2, 3]),
        &LocalNetwork::new(),
        state_storage,
    );
    let follower = FollowerState::new(
        1,
        HardState {
            current_term: 2,
            voted_for: Some(1),
        },
        0,
        c.ctx.node_config(),
    );
    let mut state = CandidateState::from(&follower);
    let (role_tx, mut role_rx) = mpsc::unbounded_channel();

    let result = state
        .handle_raft_event(
            RaftEvent::VoteResponseReceived {
                term: 2,
                peer_id: 3,
                result: Ok(VoteResponse {
                    term: 4,
                    vote_granted: false,
                    last_log_index: 0,
                    last_log_term: 0,
                }),
            },
            &c.ctx,
            &role_tx,
        )
        .await;

    assert!(result.is_err());
    assert!(matches!(role_rx.try_recv(), Ok(RoleEvent::BecomeFollower(None))));
}
