//! Network abstraction layer.
//!
//! [`Transport`] carries the three peer RPCs. Every outbound call is wrapped
//! by [`task_with_timeout_and_exponential_backoff`] with the policy of its
//! RPC kind from [`crate::RetryPolicies`]. Inbound RPCs reach the consensus
//! loop through [`RaftRpcHandler`].

mod local;
mod rpc_handler;
mod tcp;

pub use local::*;
pub use rpc_handler::*;
pub use tcp::*;


#[cfg(test)]
use mockall::automock;

use crate::proto::AppendEntriesRequest;
use crate::proto::AppendEntriesResponse;
use crate::proto::InstallSnapshotRequest;
use crate::proto::InstallSnapshotResponse;
use crate::proto::NodeMeta;
use crate::proto::VoteRequest;
use crate::proto::VoteResponse;
use crate::BackoffPolicy;
use crate::Error;
use crate::NetworkError;
use crate::Result;

#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// One RequestVote attempt. Retries are the caller's business.
    async fn send_vote_request(
        &self,
        peer: NodeMeta,
        req: VoteRequest,
    ) -> Result<VoteResponse>;

    async fn send_append_entries(
        &self,
        peer: NodeMeta,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse>;

    async fn send_install_snapshot(
        &self,
        peer: NodeMeta,
        req: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse>;
}

// Module level utils
// -----------------------------------------------------------------------------
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

/// Runs `task` until it succeeds, each attempt bounded by `policy.timeout_ms`.
///
/// Up to `policy.max_retries` retries follow the first attempt, with a delay
/// starting at `base_delay_ms` and doubling up to `max_delay_ms`. The error of
/// the last attempt is returned.
pub(crate) async fn task_with_timeout_and_exponential_backoff<F, Fut, U>(
    mut task: F,
    policy: BackoffPolicy,
) -> Result<U>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<U>>,
{
    let attempts = policy.max_retries + 1;
    let timeout_duration = Duration::from_millis(policy.timeout_ms);
    let max_delay = Duration::from_millis(policy.max_delay_ms);
    let mut current_delay = Duration::from_millis(policy.base_delay_ms);

    let mut last_error: Error = NetworkError::TaskBackoffFailed("Task failed after max retries".to_string()).into();
    for attempt in 1..=attempts {
        debug!("Attempt {} of {}", attempt, attempts);
        match timeout(timeout_duration, task()).await {
            Ok(Ok(r)) => return Ok(r),
            Ok(Err(e)) => {
                debug!("Attempt {} failed: {:?}", attempt, e);
                last_error = e;
            }
            Err(_) => {
                debug!("Task timed out after {:?}", timeout_duration);
                last_error = NetworkError::RetryTimeoutError(timeout_duration).into();
            }
        }

        if attempt < attempts {
            sleep(current_delay).await;
            current_delay = (current_delay * 2).min(max_delay);
        }
    }
    warn!("Task failed after {} attempts: {:?}", attempts, last_error);
    Err(last_error)
}
