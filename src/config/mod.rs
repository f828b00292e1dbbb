//! Configuration management for a Raft node.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
mod cluster;
mod raft;
mod retry;

pub use cluster::*;
pub use raft::*;
pub use retry::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Main configuration container for a Raft node
///
/// Sources are merged in this order, later ones win:
/// 1. Default values from code
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables prefixed with `RAFT__`
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct RaftNodeConfig {
    /// Node identity, bootstrap membership and on-disk locations
    #[serde(default)]
    pub cluster: ClusterConfig,
    /// Core Raft algorithm parameters
    #[serde(default)]
    pub raft: RaftConfig,
    /// Retry policies for peer RPCs
    #[serde(default)]
    pub retry: RetryPolicies,
}

impl Debug for RaftNodeConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RaftNodeConfig").field("cluster", &self.cluster).finish()
    }
}

impl RaftNodeConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Callers must call [`RaftNodeConfig::validate`] once all overrides are
    /// applied.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("RAFT__CLUSTER__NODE_ID", "2");
    /// let cfg = RaftNodeConfig::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("RAFT")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Environment variables are merged again on top, so they keep the
    /// highest priority.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("RAFT")
                    .separator("__")
                    .ignore_empty(true)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every subsystem and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.cluster.validate()?;
        self.raft.validate()?;
        self.retry.validate()?;
        Ok(self)
    }
}
