use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::codec::LengthDelimitedCodec;
use tracing::debug;
use tracing::trace;

use super::decode_frame;
use super::encode_frame;
use super::new_codec;
use super::Envelope;
use super::RpcRequest;
use super::RpcResponse;
use crate::proto::AppendEntriesRequest;
use crate::proto::AppendEntriesResponse;
use crate::proto::InstallSnapshotRequest;
use crate::proto::InstallSnapshotResponse;
use crate::proto::NodeMeta;
use crate::proto::VoteRequest;
use crate::proto::VoteResponse;
use crate::Error;
use crate::NetworkError;
use crate::Result;
use crate::Transport;

type Connection = Framed<TcpStream, LengthDelimitedCodec>;

/// One pooled connection per peer address.
///
/// Calls to the same peer are serialized on its connection. A connection
/// that failed, or whose call was abandoned half way, is dropped and
/// re-dialed by the next call.
pub struct TcpTransport {
    node_id: u32,
    connect_timeout: Duration,
    pub(crate) connections: DashMap<String, Arc<Mutex<Option<Connection>>>>,
    next_request_id: AtomicU64,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("node_id", &self.node_id)
            .field("connections", &self.connections.len())
            .finish()
    }
}

impl TcpTransport {
    pub fn new(
        node_id: u32,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            node_id,
            connect_timeout,
            connections: DashMap::new(),
            next_request_id: AtomicU64::new(1),
        }
    }

    async fn call(
        &self,
        peer: &NodeMeta,
        request: RpcRequest,
    ) -> Result<RpcResponse> {
        let slot = self.connections.entry(peer.address.clone()).or_default().clone();
        let mut guard = slot.lock().await;

        // Taken out while in use. Only a clean exchange puts it back.
        let mut conn = match guard.take() {
            Some(conn) => conn,
            None => self.connect(peer).await?,
        };

        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        trace!("[{}] -> {} {} #{}", self.node_id, peer.id, request.kind(), id);

        let response = Self::exchange(&mut conn, &peer.address, id, request).await?;
        *guard = Some(conn);
        Ok(response)
    }

    async fn connect(
        &self,
        peer: &NodeMeta,
    ) -> Result<Connection> {
        let stream = timeout(self.connect_timeout, TcpStream::connect(&peer.address))
            .await
            .map_err(|_| NetworkError::Timeout {
                node_id: peer.id,
                duration: self.connect_timeout,
            })?
            .map_err(|source| NetworkError::ConnectError {
                address: peer.address.clone(),
                source,
            })?;
        stream.set_nodelay(true).map_err(NetworkError::Io)?;

        debug!("[{}] connected to node {} at {}", self.node_id, peer.id, peer.address);
        Ok(Framed::new(stream, new_codec()))
    }

    async fn exchange(
        conn: &mut Connection,
        address: &str,
        id: u64,
        body: RpcRequest,
    ) -> Result<RpcResponse> {
        conn.send(encode_frame(&Envelope { id, body })?)
            .await
            .map_err(NetworkError::Io)?;

        loop {
            match conn.next().await {
                Some(Ok(frame)) => {
                    let envelope: Envelope<RpcResponse> = decode_frame(&frame)?;
                    if envelope.id == id {
                        return Ok(envelope.body);
                    }
                    trace!("skipping stale response #{} while waiting for #{}", envelope.id, id);
                }
                Some(Err(e)) => return Err(NetworkError::Io(e).into()),
                None => {
                    return Err(NetworkError::ConnectionClosed {
                        address: address.to_string(),
                    }
                    .into())
                }
            }
        }
    }
}

fn unexpected(response: RpcResponse) -> Error {
    match response {
        RpcResponse::Error(msg) => NetworkError::UnexpectedResponse(msg).into(),
        other => NetworkError::UnexpectedResponse(format!("{:?}", other)).into(),
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn send_vote_request(
        &self,
        peer: NodeMeta,
        req: VoteRequest,
    ) -> Result<VoteResponse> {
        match self.call(&peer, RpcRequest::Vote(req)).await? {
            RpcResponse::Vote(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    async fn send_append_entries(
        &self,
        peer: NodeMeta,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse> {
        match self.call(&peer, RpcRequest::AppendEntries(req)).await? {
            RpcResponse::AppendEntries(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }

    async fn send_install_snapshot(
        &self,
        peer: NodeMeta,
        req: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse> {
        match self.call(&peer, RpcRequest::InstallSnapshot(req)).await? {
            RpcResponse::InstallSnapshot(response) => Ok(response),
            other => Err(unexpected(other)),
        }
    }
}
