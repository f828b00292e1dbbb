use std::fmt::Debug;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Configuration parameters for the Raft consensus algorithm
#[derive(Serialize, Deserialize, Clone)]
pub struct RaftConfig {
    /// Heartbeat cadence and batch size of AppendEntries
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Randomized election timeout bounds
    #[serde(default)]
    pub election: ElectionConfig,

    /// Controls how committed log entries are applied to the state machine
    #[serde(default)]
    pub commit_handler: CommitHandlerConfig,

    /// After this many consecutive storage failures the node enters degraded
    /// mode: it refuses votes and appends and stops campaigning until a
    /// storage write succeeds again.
    #[serde(default = "default_max_consecutive_storage_failures")]
    pub max_consecutive_storage_failures: u32,

    /// How long `propose` and `change_membership` wait for commit
    #[serde(default = "default_client_request_timeout")]
    pub client_request_timeout_in_ms: u64,

    /// Capacity of the consensus event queue
    #[serde(default = "default_event_queue_size")]
    pub event_queue_size: usize,
}

impl Debug for RaftConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RaftConfig")
            .field("election", &self.election)
            .field("replication", &self.replication)
            .finish()
    }
}

impl Default for RaftConfig {
    fn default() -> Self {
        Self {
            replication: ReplicationConfig::default(),
            election: ElectionConfig::default(),
            commit_handler: CommitHandlerConfig::default(),
            max_consecutive_storage_failures: default_max_consecutive_storage_failures(),
            client_request_timeout_in_ms: default_client_request_timeout(),
            event_queue_size: default_event_queue_size(),
        }
    }
}

impl RaftConfig {
    /// Validates all Raft subsystem configurations
    pub fn validate(&self) -> Result<()> {
        if self.max_consecutive_storage_failures == 0 {
            return Err(Error::Config(ConfigError::Message(
                "max_consecutive_storage_failures must be greater than 0".into(),
            )));
        }

        if self.client_request_timeout_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "client_request_timeout_in_ms must be at least 1ms".into(),
            )));
        }

        if self.event_queue_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "event_queue_size must be > 0".into(),
            )));
        }

        self.replication.validate()?;
        self.election.validate()?;
        self.commit_handler.validate()?;

        if self.replication.rpc_append_entries_clock_in_ms >= self.election.election_timeout_min {
            return Err(Error::Config(ConfigError::Message(format!(
                "heartbeat interval {}ms must be shorter than election_timeout_min {}ms",
                self.replication.rpc_append_entries_clock_in_ms, self.election.election_timeout_min
            ))));
        }

        Ok(())
    }
}

fn default_max_consecutive_storage_failures() -> u32 {
    3
}
fn default_client_request_timeout() -> u64 {
    2000
}
fn default_event_queue_size() -> usize {
    1024
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ReplicationConfig {
    /// Heartbeat interval of the leader
    #[serde(default = "default_append_interval")]
    pub rpc_append_entries_clock_in_ms: u64,

    #[serde(default = "default_entries_per_replication")]
    pub append_entries_max_entries_per_replication: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            rpc_append_entries_clock_in_ms: default_append_interval(),
            append_entries_max_entries_per_replication: default_entries_per_replication(),
        }
    }
}

impl ReplicationConfig {
    fn validate(&self) -> Result<()> {
        if self.rpc_append_entries_clock_in_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "rpc_append_entries_clock_in_ms cannot be 0".into(),
            )));
        }

        if self.append_entries_max_entries_per_replication == 0 {
            return Err(Error::Config(ConfigError::Message(
                "append_entries_max_entries_per_replication must be > 0".into(),
            )));
        }

        Ok(())
    }
}

fn default_append_interval() -> u64 {
    100
}
fn default_entries_per_replication() -> u64 {
    100
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ElectionConfig {
    #[serde(default = "default_election_timeout_min")]
    pub election_timeout_min: u64,

    #[serde(default = "default_election_timeout_max")]
    pub election_timeout_max: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            election_timeout_min: default_election_timeout_min(),
            election_timeout_max: default_election_timeout_max(),
        }
    }
}

impl ElectionConfig {
    fn validate(&self) -> Result<()> {
        if self.election_timeout_min >= self.election_timeout_max {
            return Err(Error::Config(ConfigError::Message(format!(
                "election_timeout_min {}ms must be less than election_timeout_max {}ms",
                self.election_timeout_min, self.election_timeout_max
            ))));
        }

        Ok(())
    }
}

fn default_election_timeout_min() -> u64 {
    500
}
fn default_election_timeout_max() -> u64 {
    1000
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CommitHandlerConfig {
    /// Maximum number of entries applied per state machine pass
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
}

impl Default for CommitHandlerConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl CommitHandlerConfig {
    fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config(ConfigError::Message("batch_size must be > 0".into())));
        }
        Ok(())
    }
}

fn default_batch_size() -> u64 {
    100
}
