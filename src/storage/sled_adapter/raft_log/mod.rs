mod sled_raft_log;

pub use sled_raft_log::*;
