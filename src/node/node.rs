//! The public handle of one consensus node.
//!
//! ## Key Responsibilities
//! - Drives the consensus loop ([`Node::run`])
//! - Turns client calls into consensus events and waits for their outcome
//! - Publishes a [`NodeStatus`] snapshot for diagnostics
//!
//! ## Example Usage
//! ```ignore
//! let node = NodeBuilder::new(node_config, shutdown_rx)
//!     .with_default_components()?
//!     .build()?
//!     .start_rpc_server()
//!     .await?
//!     .ready()?;
//! let runner = node.clone();
//! tokio::spawn(async move { runner.run().await });
//! let index = node.propose(b"set x 1".to_vec()).await?;
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::info;

use crate::proto::LogId;
use crate::proto::MembershipChange;
use crate::Error;
use crate::NetworkError;
use crate::NodeStatus;
use crate::Raft;
use crate::RaftEvent;
use crate::RaftNodeConfig;
use crate::RaftRpcHandler;
use crate::Result;
use crate::SystemError;
use crate::TypeConfig;

pub struct Node<T>
where T: TypeConfig
{
    pub(crate) node_id: u32,
    pub(crate) raft_core: Arc<Mutex<Raft<T>>>,

    // Network & client events, shared with the consensus loop
    pub(crate) event_tx: mpsc::Sender<RaftEvent>,
    pub(crate) status_rx: watch::Receiver<NodeStatus>,
    pub(crate) ready: AtomicBool,

    pub node_config: Arc<RaftNodeConfig>,
}

impl<T> Node<T>
where T: TypeConfig
{
    /// Runs the consensus loop until the shutdown signal fires.
    pub async fn run(&self) -> Result<()> {
        let mut raft = self.raft_core.lock().await;

        self.set_ready(true);
        info!("[{}] node is running", self.node_id);
        let result = raft.run().await;
        self.set_ready(false);

        result
    }

    /// Appends `command` to the log.
    ///
    /// Resolves with the index of the entry once it is committed. A non
    /// leader answers with [`crate::ConsensusError::NotLeader`] carrying the
    /// leader it knows of.
    pub async fn propose(
        &self,
        command: Vec<u8>,
    ) -> Result<u64> {
        self.request(|tx| RaftEvent::ClientPropose(command, tx)).await
    }

    /// Adds, promotes or removes one member. Resolves with the index of the
    /// configuration entry once it is committed.
    pub async fn change_membership(
        &self,
        change: MembershipChange,
    ) -> Result<u64> {
        self.request(|tx| RaftEvent::ChangeMembership(change, tx)).await
    }

    /// Compacts the applied prefix of the log into a state machine snapshot.
    pub async fn compact_log(&self) -> Result<LogId> {
        self.request(RaftEvent::CompactLog).await
    }

    pub fn status(&self) -> NodeStatus {
        self.status_rx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<NodeStatus> {
        self.status_rx.clone()
    }

    /// Handler that feeds peer RPCs into this node
    pub fn rpc_handler(&self) -> RaftRpcHandler {
        RaftRpcHandler::new(self.node_id, self.event_tx.clone())
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    pub fn set_ready(
        &self,
        is_ready: bool,
    ) {
        self.ready.store(is_ready, Ordering::SeqCst);
    }

    pub fn server_is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    async fn request<R>(
        &self,
        event: impl FnOnce(oneshot::Sender<Result<R>>) -> RaftEvent,
    ) -> Result<R> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.event_tx
            .send(event(resp_tx))
            .await
            .map_err(|_| Error::from(SystemError::ServerUnavailable))?;

        let duration = Duration::from_millis(self.node_config.raft.client_request_timeout_in_ms);
        match timeout(duration, resp_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SystemError::ServerUnavailable.into()),
            Err(_) => Err(NetworkError::Timeout {
                node_id: self.node_id,
                duration,
            }
            .into()),
        }
    }
}

impl<T> std::fmt::Debug for Node<T>
where T: TypeConfig
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.node_id)
            .field("ready", &self.server_is_ready())
            .finish()
    }
}
