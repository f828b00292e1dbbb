//! walraft: a Raft consensus engine over a durable, checksummed write-ahead
//! log.
//!
//! A [`Node`] is assembled by [`NodeBuilder`] from the components a
//! [`TypeConfig`] selects: a [`RaftLog`], a [`StateStorage`], a
//! [`StateMachine`] and a [`Transport`]. [`RaftTypeConfig`] wires sled and
//! TCP, [`MemTypeConfig`] keeps everything in memory for in-process
//! clusters over a [`LocalNetwork`].

mod config;
mod constants;
mod core;
mod errors;
mod membership;
mod metrics;
mod network;
mod node;
mod storage;
mod type_config;
mod utils;

pub mod proto;

pub use core::*;

pub use config::*;
pub use errors::*;
pub use membership::*;
pub use metrics::*;
pub use network::*;
pub use node::*;
pub use storage::*;
pub use type_config::*;
pub use utils::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
