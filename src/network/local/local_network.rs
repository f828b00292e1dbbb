//! In-process network used to run whole clusters inside one runtime.
//!
//! Links can be cut per node (isolation) or per direction (blocked link) to
//! simulate partitions.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::DashSet;
use tracing::trace;

use crate::proto::AppendEntriesRequest;
use crate::proto::AppendEntriesResponse;
use crate::proto::InstallSnapshotRequest;
use crate::proto::InstallSnapshotResponse;
use crate::proto::NodeMeta;
use crate::proto::VoteRequest;
use crate::proto::VoteResponse;
use crate::NetworkError;
use crate::RaftRpcHandler;
use crate::Result;
use crate::Transport;

#[derive(Debug, Default)]
struct Inner {
    handlers: DashMap<u32, RaftRpcHandler>,
    isolated: DashSet<u32>,
    // (from, to)
    blocked: DashSet<(u32, u32)>,
}

#[derive(Clone, Debug, Default)]
pub struct LocalNetwork {
    inner: Arc<Inner>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        handler: RaftRpcHandler,
    ) {
        self.inner.handlers.insert(handler.node_id(), handler);
    }

    pub fn unregister(
        &self,
        node_id: u32,
    ) {
        self.inner.handlers.remove(&node_id);
    }

    /// Cuts every link to and from `node_id`
    pub fn isolate(
        &self,
        node_id: u32,
    ) {
        self.inner.isolated.insert(node_id);
    }

    /// Cuts messages sent from `from` to `to`, the other direction is kept
    pub fn block_link(
        &self,
        from: u32,
        to: u32,
    ) {
        self.inner.blocked.insert((from, to));
    }

    pub fn heal(
        &self,
        node_id: u32,
    ) {
        self.inner.isolated.remove(&node_id);
        self.inner.blocked.retain(|(from, to)| *from != node_id && *to != node_id);
    }

    pub fn heal_all(&self) {
        self.inner.isolated.clear();
        self.inner.blocked.clear();
    }

    pub fn transport(
        &self,
        node_id: u32,
    ) -> LocalTransport {
        LocalTransport {
            node_id,
            network: self.clone(),
        }
    }

    fn reachable(
        &self,
        from: u32,
        to: u32,
    ) -> bool {
        !self.inner.isolated.contains(&from)
            && !self.inner.isolated.contains(&to)
            && !self.inner.blocked.contains(&(from, to))
    }

    fn route(
        &self,
        from: u32,
        to: u32,
    ) -> Result<RaftRpcHandler> {
        if !self.reachable(from, to) {
            trace!("link {} -> {} is cut", from, to);
            return Err(NetworkError::PeerUnreachable { node_id: to }.into());
        }
        self.inner
            .handlers
            .get(&to)
            .map(|h| h.value().clone())
            .ok_or_else(|| NetworkError::PeerUnreachable { node_id: to }.into())
    }

    /// Drops the response when the return path was cut meanwhile
    fn deliver_back<R>(
        &self,
        from: u32,
        to: u32,
        response: R,
    ) -> Result<R> {
        if self.reachable(to, from) {
            Ok(response)
        } else {
            Err(NetworkError::PeerUnreachable { node_id: to }.into())
        }
    }
}

/// [`Transport`] bound to one node of a [`LocalNetwork`]
#[derive(Clone, Debug)]
pub struct LocalTransport {
    node_id: u32,
    network: LocalNetwork,
}

#[async_trait::async_trait]
impl Transport for LocalTransport {
    async fn send_vote_request(
        &self,
        peer: NodeMeta,
        req: VoteRequest,
    ) -> Result<VoteResponse> {
        let handler = self.network.route(self.node_id, peer.id)?;
        let response = handler.handle_vote_request(req).await?;
        self.network.deliver_back(self.node_id, peer.id, response)
    }

    async fn send_append_entries(
        &self,
        peer: NodeMeta,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        let handler = self.network.route(self.node_id, peer.id)?;
        let response = handler.handle_append_entries(req).await?;
        self.network.deliver_back(self.node_id, peer.id, response)
    }

    async fn send_install_snapshot(
        &self,
        peer: NodeMeta,
        req: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse> {
        let handler = self.network.route(self.node_id, peer.id)?;
        let response = handler.handle_install_snapshot(req).await?;
        self.network.deliver_back(self.node_id, peer.id, response)
    }
}
