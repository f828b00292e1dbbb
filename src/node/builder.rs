//! A builder pattern implementation for constructing a [`Node`] instance in a
//! Raft cluster.
//!
//! The [`NodeBuilder`] assembles the storage layers, the transport and the
//! state machine selected by a [`TypeConfig`], restores what was persisted
//! and spawns the apply task.
//!
//! ## Lifecycle
//! - `build()`: restores membership and commit index, spawns the
//!   [`DefaultCommitHandler`] and creates the consensus loop.
//! - `start_rpc_server()`: serves peer RPCs over TCP on `listen_address`.
//! - `ready()`: returns the initialized [`Node`].
//!
//! ## Example
//! ```ignore
//! let (shutdown_tx, shutdown_rx) = watch::channel(());
//! let node = NodeBuilder::new(node_config, shutdown_rx)
//!     .with_default_components()?
//!     .build()?
//!     .start_rpc_server()
//!     .await?
//!     .ready()?;
//! ```

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tracing::debug;
use tracing::error;
use tracing::info;

use super::RaftTypeConfig;
use crate::alias::ROF;
use crate::alias::SMOF;
use crate::alias::SSOF;
use crate::alias::TROF;
use crate::init_sled_storage;
use crate::proto::ClusterConfiguration;
use crate::start_rpc_server;
use crate::ApplyCommand;
use crate::DefaultCommitHandler;
use crate::ElectionHandler;
use crate::MemStateMachine;
use crate::NetworkError;
use crate::Node;
use crate::Raft;
use crate::RaftContext;
use crate::RaftCoreHandlers;
use crate::RaftLog;
use crate::RaftMembership;
use crate::RaftNodeConfig;
use crate::RaftStorageHandles;
use crate::ReplicationHandler;
use crate::Result;
use crate::SledRaftLog;
use crate::SledStateStorage;
use crate::StateMachine;
use crate::StateStorage;
use crate::StorageError;
use crate::SystemError;
use crate::TcpTransport;
use crate::TypeConfig;

/// Fluent construction of a [`Node`] from a [`RaftNodeConfig`] plus the
/// components of `T`.
pub struct NodeBuilder<T>
where T: TypeConfig
{
    node_id: u32,
    pub(super) node_config: RaftNodeConfig,
    pub(super) raft_log: Option<ROF<T>>,
    pub(super) state_machine: Option<Arc<SMOF<T>>>,
    pub(super) state_storage: Option<SSOF<T>>,
    pub(super) transport: Option<TROF<T>>,
    pub(super) shutdown_signal: watch::Receiver<()>,

    pub(super) node: Option<Arc<Node<T>>>,
}

impl<T> NodeBuilder<T>
where T: TypeConfig
{
    /// Core initialization logic shared by all construction paths
    pub fn new(
        node_config: RaftNodeConfig,
        shutdown_signal: watch::Receiver<()>,
    ) -> Self {
        Self {
            node_id: node_config.cluster.node_id,
            node_config,
            raft_log: None,
            state_machine: None,
            state_storage: None,
            transport: None,
            shutdown_signal,
            node: None,
        }
    }

    /// Sets a custom Raft log storage implementation
    pub fn raft_log(
        mut self,
        raft_log: ROF<T>,
    ) -> Self {
        self.raft_log = Some(raft_log);
        self
    }

    /// Sets a custom state machine implementation
    pub fn state_machine(
        mut self,
        state_machine: Arc<SMOF<T>>,
    ) -> Self {
        self.state_machine = Some(state_machine);
        self
    }

    /// Sets a custom state storage implementation
    pub fn state_storage(
        mut self,
        state_storage: SSOF<T>,
    ) -> Self {
        self.state_storage = Some(state_storage);
        self
    }

    /// Sets a custom network transport implementation
    pub fn transport(
        mut self,
        transport: TROF<T>,
    ) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Finalizes the builder and constructs the Raft node instance.
    ///
    /// The active configuration is the persisted one, or `initial_cluster`
    /// at epoch 0 on first boot. Configuration entries found in the log
    /// above it are replayed. Every component must have been set.
    pub fn build(mut self) -> Result<Self> {
        let node_id = self.node_id;
        let node_config = Arc::new(self.node_config.clone());

        let raft_log = Arc::new(take_component(self.raft_log.take(), "raft_log")?);
        let state_storage = Arc::new(take_component(self.state_storage.take(), "state_storage")?);
        let state_machine = take_component(self.state_machine.take(), "state_machine")?;
        let transport = Arc::new(take_component(self.transport.take(), "transport")?);

        // Restore persisted progress
        raft_log.mark_committed(state_storage.load_commit_index()?)?;
        let commit_index = raft_log.committed_index();

        let configuration = match state_storage.load_membership()? {
            Some(configuration) => configuration,
            None => ClusterConfiguration::new(0, node_config.cluster.initial_cluster.clone()),
        };
        let membership = Arc::new(RaftMembership::new(node_id, configuration));
        if let Some(active) = membership.recover_from_log(raft_log.as_ref(), commit_index)? {
            state_storage.save_membership(&active)?;
        }
        info!(
            "[{}] restored commit_index: {}, configuration epoch: {}",
            node_id,
            commit_index,
            membership.epoch()
        );

        // The state machine may be volatile; the persisted snapshot covers the compacted prefix
        if let Some(snapshot) = state_storage.load_snapshot()? {
            if snapshot.last_included.index > state_machine.last_applied().index {
                info!("[{}] restoring state machine from snapshot {}", node_id, snapshot.last_included);
                state_machine.restore(snapshot)?;
            }
        }

        let (event_tx, event_rx) = mpsc::channel(node_config.raft.event_queue_size);
        let (apply_tx, apply_rx) = mpsc::unbounded_channel();
        let (applied_tx, applied_rx) = watch::channel(state_machine.last_applied());

        // Start CommitHandler in its own task
        let mut commit_handler = DefaultCommitHandler::<T>::new(
            node_id,
            state_machine.clone(),
            raft_log.clone(),
            apply_rx,
            applied_tx,
            node_config.raft.commit_handler.batch_size,
            self.shutdown_signal.clone(),
        );
        tokio::spawn(async move {
            match commit_handler.run().await {
                Ok(_) => {
                    info!("commit_handler exit program");
                }
                Err(e) => {
                    error!("commit_handler exit program with unexpected error: {:?}", e);
                }
            }
        });
        // Catch the state machine up with what was committed before restart
        apply_tx.send(ApplyCommand::Apply(commit_index)).map_err(|e| {
            let error_str = format!("{:?}", e);
            error!("failed to send initial apply command: {}", error_str);
            NetworkError::SingalSendFailed(error_str)
        })?;

        let ctx = RaftContext::<T> {
            node_id,
            storage: RaftStorageHandles::<T> {
                raft_log,
                state_machine,
                state_storage,
            },
            transport,
            membership,
            handlers: RaftCoreHandlers::<T> {
                election_handler: ElectionHandler::new(node_id, event_tx.clone()),
                replication_handler: ReplicationHandler::new(node_id, event_tx.clone()),
            },
            apply_tx,
            node_config: node_config.clone(),
        };

        let raft_core = Raft::<T>::new(ctx, event_tx.clone(), event_rx, applied_rx, self.shutdown_signal.clone())?;
        let status_rx = raft_core.subscribe_status();

        let node = Node::<T> {
            node_id,
            raft_core: Arc::new(Mutex::new(raft_core)),
            event_tx,
            status_rx,
            ready: AtomicBool::new(false),
            node_config,
        };

        self.node = Some(Arc::new(node));
        Ok(self)
    }

    /// Serves peer RPCs of the built node on `cluster.listen_address`.
    pub async fn start_rpc_server(self) -> Result<Self> {
        debug!("1. --- start RPC server --- ");
        let node = self
            .node
            .as_ref()
            .ok_or_else(|| SystemError::NodeStartFailed("start_rpc_server called before build".to_string()))?;

        let listen_address = self.node_config.cluster.listen_address;
        let listener = TcpListener::bind(listen_address).await.map_err(|source| NetworkError::ConnectError {
            address: listen_address.to_string(),
            source,
        })?;

        let handler = node.rpc_handler();
        let shutdown = self.shutdown_signal.clone();
        tokio::spawn(async move {
            if let Err(e) = start_rpc_server(listener, handler, shutdown).await {
                error!("RPC server stops. {:?}", e);
            }
        });
        Ok(self)
    }

    /// Returns the built node instance after successful construction.
    ///
    /// # Errors
    /// Returns `SystemError::NodeStartFailed` if build hasn't completed
    pub fn ready(self) -> Result<Arc<Node<T>>> {
        self.node
            .ok_or_else(|| SystemError::NodeStartFailed("check node ready failed".to_string()).into())
    }
}

impl NodeBuilder<RaftTypeConfig> {
    /// Fills every component not set yet with its durable default: sled
    /// storage under `<db_root_dir>/<node_id>`, TCP transport and an
    /// in-memory state machine.
    pub fn with_default_components(mut self) -> Result<Self> {
        let node_id = self.node_id;
        let db_path = self.node_config.cluster.db_root_dir.join(node_id.to_string());

        if self.raft_log.is_none() || self.state_storage.is_none() {
            let db = Arc::new(init_sled_storage(&db_path).map_err(StorageError::IoError)?);

            if self.state_storage.is_none() {
                self.state_storage = Some(SledStateStorage::new(db.clone())?);
            }
            if self.raft_log.is_none() {
                let commit_index = match self.state_storage {
                    Some(ref state_storage) => state_storage.load_commit_index()?,
                    None => 0,
                };
                self.raft_log = Some(SledRaftLog::new(node_id, db, commit_index)?);
            }
        }

        if self.state_machine.is_none() {
            self.state_machine = Some(Arc::new(MemStateMachine::new(node_id)));
        }

        if self.transport.is_none() {
            let connect_timeout = Duration::from_millis(self.node_config.retry.append_entries.timeout_ms);
            self.transport = Some(TcpTransport::new(node_id, connect_timeout));
        }

        Ok(self)
    }
}

fn take_component<C>(
    component: Option<C>,
    name: &str,
) -> Result<C> {
    component.ok_or_else(|| SystemError::NodeStartFailed(format!("{} is not configured", name)).into())
}
