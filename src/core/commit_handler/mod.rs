mod default_commit_handler;

pub(crate) use default_commit_handler::*;


use tokio::sync::oneshot;

use crate::Result;
use crate::Snapshot;

/// Work handed from the consensus loop to the apply task.
#[derive(Debug)]
pub(crate) enum ApplyCommand {
    /// Apply every committed entry up to this index
    Apply(u64),
    /// Replace the state machine with a snapshot received from the leader
    Restore(Snapshot, oneshot::Sender<Result<()>>),
}
