// -
// Database namespaces

/// Sled database tree namespaces
pub(crate) const RAFT_LOG_TREE: &str = "_raft_log";
pub(crate) const RAFT_LOG_META_TREE: &str = "_raft_log_meta";
pub(crate) const STATE_STORAGE_TREE: &str = "_state_storage";

/// Sled entry key namespaces
pub(crate) const RAFT_LOG_META_KEY_SNAPSHOT_LOG_ID: &str = "_raft_snapshot_log_id";

pub(crate) const STATE_STORAGE_HARD_STATE_KEY: &str = "_state_storage_hard_state";
pub(crate) const STATE_STORAGE_COMMIT_INDEX_KEY: &str = "_state_storage_commit_index";
pub(crate) const STATE_STORAGE_LAST_APPLIED_KEY: &str = "_state_storage_last_applied";
pub(crate) const STATE_STORAGE_MEMBERSHIP_KEY: &str = "_state_storage_membership";
pub(crate) const STATE_STORAGE_SNAPSHOT_KEY: &str = "_state_storage_snapshot";

/// Log file name inside `<log_dir>/<node_id>/`
pub(crate) const LOG_FILE_NAME: &str = "walraft.log";

/// Upper bound of one TCP frame, snapshots included
pub(crate) const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;
