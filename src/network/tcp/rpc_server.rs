use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpListener;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::decode_frame;
use super::encode_frame;
use super::new_codec;
use super::Envelope;
use super::RpcRequest;
use super::RpcResponse;
use crate::NetworkError;
use crate::RaftRpcHandler;
use crate::Result;

/// Accepts peer connections until `shutdown_signal` fires.
///
/// Every connection gets its own task. Requests on one connection are
/// answered in order.
pub(crate) async fn start_rpc_server(
    listener: TcpListener,
    handler: RaftRpcHandler,
    mut shutdown_signal: watch::Receiver<()>,
) -> Result<()> {
    let local_addr = listener.local_addr().map_err(NetworkError::Io)?;
    info!("[{}] rpc server listening on {}", handler.node_id(), local_addr);

    loop {
        tokio::select! {
            _ = shutdown_signal.changed() => {
                warn!("Stopping RPC server. {}", local_addr);
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        debug!("accepted peer connection from {}", addr);
                        let handler = handler.clone();
                        let shutdown = shutdown_signal.clone();
                        tokio::spawn(async move {
                            if let Err(e) = serve_connection(stream, handler, shutdown).await {
                                debug!("connection from {} ended: {:?}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("accept failed: {:?}", e);
                    }
                }
            }
        }
    }
    Ok(())
}

async fn serve_connection(
    stream: TcpStream,
    handler: RaftRpcHandler,
    mut shutdown_signal: watch::Receiver<()>,
) -> Result<()> {
    stream.set_nodelay(true).map_err(NetworkError::Io)?;
    let mut framed = tokio_util::codec::Framed::new(stream, new_codec());

    loop {
        let frame = tokio::select! {
            _ = shutdown_signal.changed() => return Ok(()),
            frame = framed.next() => frame,
        };

        let frame = match frame {
            Some(Ok(frame)) => frame,
            Some(Err(e)) => return Err(NetworkError::Io(e).into()),
            None => return Ok(()),
        };

        let request: Envelope<RpcRequest> = decode_frame(&frame)?;
        let body = dispatch(&handler, request.body).await;
        framed
            .send(encode_frame(&Envelope { id: request.id, body })?)
            .await
            .map_err(NetworkError::Io)?;
    }
}

async fn dispatch(
    handler: &RaftRpcHandler,
    request: RpcRequest,
) -> RpcResponse {
    let result = match request {
        RpcRequest::Vote(req) => handler.handle_vote_request(req).await.map(RpcResponse::Vote),
        RpcRequest::AppendEntries(req) => handler.handle_append_entries(req).await.map(RpcResponse::AppendEntries),
        RpcRequest::InstallSnapshot(req) => handler
            .handle_install_snapshot(req)
            .await
            .map(RpcResponse::InstallSnapshot),
    };
    result.unwrap_or_else(|e| RpcResponse::Error(e.to_string()))
}
