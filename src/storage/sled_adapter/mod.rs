// Submodule declaration
// -----------------------------------------------------------------------------
mod raft_log;
mod state_storage;

// Re-export
// -----------------------------------------------------------------------------
pub use raft_log::*;
pub use state_storage::*;
