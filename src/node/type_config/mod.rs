mod raft_type_config;

pub use raft_type_config::*;
