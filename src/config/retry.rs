use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Basic retry policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum number of retries after the first attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Single operation timeout (unit: milliseconds)
    #[serde(default = "default_op_timeout_ms")]
    pub timeout_ms: u64,

    /// Backoff base (unit: milliseconds)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum backoff time (unit: milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            timeout_ms: default_op_timeout_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl BackoffPolicy {
    fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "{}.timeout_ms must be > 0",
                name
            ))));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "{}.base_delay_ms {}ms exceeds max_delay_ms {}ms",
                name, self.base_delay_ms, self.max_delay_ms
            ))));
        }
        Ok(())
    }
}

/// Divide strategies by RPC kind
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryPolicies {
    /// Log replication strategy (AppendEntries RPC)
    #[serde(default)]
    pub append_entries: BackoffPolicy,

    /// Election strategy (RequestVote RPC)
    #[serde(default)]
    pub election: BackoffPolicy,

    /// Snapshot transfer strategy (InstallSnapshot RPC)
    #[serde(default)]
    pub install_snapshot: BackoffPolicy,
}

impl Default for RetryPolicies {
    fn default() -> Self {
        Self {
            append_entries: BackoffPolicy {
                max_retries: 1,
                timeout_ms: 100,
                base_delay_ms: 20,
                max_delay_ms: 200,
            },
            election: BackoffPolicy {
                max_retries: 2,
                timeout_ms: 100,
                base_delay_ms: 20,
                max_delay_ms: 200,
            },
            install_snapshot: BackoffPolicy {
                max_retries: 3,
                timeout_ms: 1000,
                base_delay_ms: 100,
                max_delay_ms: 2000,
            },
        }
    }
}

impl RetryPolicies {
    pub fn validate(&self) -> Result<()> {
        self.append_entries.validate("retry.append_entries")?;
        self.election.validate("retry.election")?;
        self.install_snapshot.validate("retry.install_snapshot")?;
        Ok(())
    }
}

fn default_max_retries() -> usize {
    3
}
fn default_op_timeout_ms() -> u64 {
    100
}
fn default_base_delay_ms() -> u64 {
    50
}
fn default_max_delay_ms() -> u64 {
    1000
}
