use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;
use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::proto::NodeMeta;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    #[serde(default = "default_node_id")]
    pub node_id: u32,

    #[serde(default = "default_listen_addr")]
    pub listen_address: SocketAddr,

    /// Bootstrap configuration, used until a configuration entry is committed
    #[serde(default = "default_initial_cluster")]
    pub initial_cluster: Vec<NodeMeta>,

    #[serde(default = "default_db_dir")]
    pub db_root_dir: PathBuf,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            listen_address: default_listen_addr(),
            initial_cluster: default_initial_cluster(),
            db_root_dir: default_db_dir(),
            log_dir: default_log_dir(),
        }
    }
}

impl ClusterConfig {
    /// Validates cluster configuration consistency
    pub fn validate(&self) -> Result<()> {
        if self.node_id == 0 {
            return Err(invalid("node_id cannot be 0 (reserved for invalid nodes)".into()));
        }

        if self.initial_cluster.is_empty() {
            return Err(invalid("initial_cluster must contain at least one node".into()));
        }

        if !self.initial_cluster.iter().any(|n| n.id == self.node_id) {
            return Err(invalid(format!(
                "Current node {} not found in initial_cluster",
                self.node_id
            )));
        }

        let mut ids = HashSet::new();
        for node in &self.initial_cluster {
            if !ids.insert(node.id) {
                return Err(invalid(format!("Duplicate node_id {} in initial_cluster", node.id)));
            }
        }

        if !self.initial_cluster.iter().any(|n| n.is_voter()) {
            return Err(invalid("initial_cluster must contain at least one voter".into()));
        }

        if self.listen_address.port() == 0 {
            return Err(invalid("listen_address must specify a non-zero port".into()));
        }

        validate_directory(&self.db_root_dir, "db_root_dir")?;
        validate_directory(&self.log_dir, "log_dir")?;

        Ok(())
    }
}

/// Ensures the directory path is usable, creating it when missing
pub(super) fn validate_directory(
    path: &Path,
    name: &str,
) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(invalid(format!("{} path cannot be empty", name)));
    }

    #[cfg(not(test))]
    {
        if !path.exists() {
            std::fs::create_dir_all(path).map_err(|e| {
                invalid(format!(
                    "Failed to create {} directory at {}: {}",
                    name,
                    path.display(),
                    e
                ))
            })?;
        }
    }

    Ok(())
}

fn invalid(message: String) -> Error {
    Error::Config(ConfigError::Message(message))
}

fn default_node_id() -> u32 {
    1
}
fn default_initial_cluster() -> Vec<NodeMeta> {
    vec![NodeMeta::voter(1, "127.0.0.1:9081")]
}
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9081))
}
fn default_db_dir() -> PathBuf {
    PathBuf::from("/tmp/walraft/db")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("/tmp/walraft/logs")
}
