use std::fmt::Debug;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::ApplyCommand;
use super::ElectionHandler;
use super::ReplicationHandler;
use crate::alias::ROF;
use crate::alias::SMOF;
use crate::alias::SSOF;
use crate::alias::TROF;
use crate::RaftMembership;
use crate::RaftNodeConfig;
use crate::TypeConfig;

pub(crate) struct RaftStorageHandles<T: TypeConfig> {
    pub(crate) raft_log: Arc<ROF<T>>,
    pub(crate) state_machine: Arc<SMOF<T>>,
    pub(crate) state_storage: Arc<SSOF<T>>,
}

pub(crate) struct RaftCoreHandlers<T: TypeConfig> {
    pub(crate) election_handler: ElectionHandler<T>,
    pub(crate) replication_handler: ReplicationHandler<T>,
}

/// Everything a role needs besides its own state.
pub(crate) struct RaftContext<T>
where T: TypeConfig
{
    pub(crate) node_id: u32,

    // Storages
    pub(crate) storage: RaftStorageHandles<T>,

    // Network
    pub(crate) transport: Arc<TROF<T>>,

    // Cluster Membership
    pub(crate) membership: Arc<RaftMembership>,

    // Handlers
    pub(crate) handlers: RaftCoreHandlers<T>,

    // Commands for the apply task
    pub(crate) apply_tx: mpsc::UnboundedSender<ApplyCommand>,

    // RaftNodeConfig
    pub(crate) node_config: Arc<RaftNodeConfig>,
}

impl<T> RaftContext<T>
where T: TypeConfig
{
    pub(crate) fn raft_log(&self) -> &Arc<ROF<T>> {
        &self.storage.raft_log
    }

    pub(crate) fn state_machine(&self) -> &Arc<SMOF<T>> {
        &self.storage.state_machine
    }

    pub(crate) fn state_storage(&self) -> &Arc<SSOF<T>> {
        &self.storage.state_storage
    }

    pub(crate) fn transport(&self) -> &Arc<TROF<T>> {
        &self.transport
    }

    pub(crate) fn replication_handler(&self) -> &ReplicationHandler<T> {
        &self.handlers.replication_handler
    }

    pub(crate) fn election_handler(&self) -> &ElectionHandler<T> {
        &self.handlers.election_handler
    }

    pub(crate) fn node_config(&self) -> Arc<RaftNodeConfig> {
        self.node_config.clone()
    }

    pub(crate) fn membership(&self) -> &Arc<RaftMembership> {
        &self.membership
    }

    pub(crate) fn apply_tx(&self) -> &mpsc::UnboundedSender<ApplyCommand> {
        &self.apply_tx
    }
}

impl<T> Debug for RaftContext<T>
where T: TypeConfig
{
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RaftContext").field("node_id", &self.node_id).finish()
    }
}
