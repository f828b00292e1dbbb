use std::fs::create_dir_all;
use std::fs::File;
use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

use crate::constants::LOG_FILE_NAME;
use crate::Result;
use crate::StorageError;

/// `<log_dir>/<node_id>/walraft.log`
pub fn log_file_path(
    node_id: u32,
    log_dir: &Path,
) -> PathBuf {
    log_dir.join(node_id.to_string()).join(LOG_FILE_NAME)
}

pub fn open_file_for_append(path: &Path) -> Result<File> {
    if let Some(parent_dir) = path.parent() {
        create_dir_all(parent_dir).map_err(StorageError::IoError)?;
    }
    let file = OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .map_err(StorageError::IoError)?;
    Ok(file)
}

/// Installs the global subscriber: `RUST_LOG` filtered, written by a
/// background thread to the node's log file.
///
/// Keep the returned guard alive, pending lines are flushed when it drops.
pub fn init_observability(
    node_id: u32,
    log_dir: &Path,
) -> Result<WorkerGuard> {
    let log_file = open_file_for_append(&log_file_path(node_id, log_dir))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
