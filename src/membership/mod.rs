mod raft_membership;

pub use raft_membership::*;
