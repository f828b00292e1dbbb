use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::warn;

use crate::proto::AppendEntriesRequest;
use crate::proto::AppendEntriesResponse;
use crate::proto::InstallSnapshotRequest;
use crate::proto::InstallSnapshotResponse;
use crate::proto::VoteRequest;
use crate::proto::VoteResponse;
use crate::RaftEvent;
use crate::Result;
use crate::SystemError;

/// Entry point for inbound peer RPCs.
///
/// Each call is queued on the consensus loop and resolved once the role that
/// is current at processing time has replied.
#[derive(Clone, Debug)]
pub struct RaftRpcHandler {
    node_id: u32,
    event_tx: mpsc::Sender<RaftEvent>,
}

impl RaftRpcHandler {
    pub(crate) fn new(
        node_id: u32,
        event_tx: mpsc::Sender<RaftEvent>,
    ) -> Self {
        Self { node_id, event_tx }
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub async fn handle_vote_request(
        &self,
        req: VoteRequest,
    ) -> Result<VoteResponse> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(RaftEvent::ReceiveVoteRequest(req, tx)).await?;
        rx.await.map_err(|_| SystemError::ServerUnavailable.into())
    }

    pub async fn handle_append_entries(
        &self,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(RaftEvent::AppendEntries(req, tx)).await?;
        rx.await.map_err(|_| SystemError::ServerUnavailable.into())
    }

    pub async fn handle_install_snapshot(
        &self,
        req: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse> {
        let (tx, rx) = oneshot::channel();
        self.dispatch(RaftEvent::InstallSnapshot(req, tx)).await?;
        rx.await.map_err(|_| SystemError::ServerUnavailable.into())
    }

    async fn dispatch(
        &self,
        event: RaftEvent,
    ) -> Result<()> {
        self.event_tx.send(event).await.map_err(|_| {
            warn!("[{}] consensus loop stopped, dropping rpc", self.node_id);
            SystemError::ServerUnavailable.into()
        })
    }
}
