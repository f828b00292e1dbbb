//! Wire and storage types shared by every node.
//!
//! All messages are plain serde structs. They are encoded with bincode both on
//! disk (sled values) and on the wire (length-delimited TCP frames).

pub mod common;
pub mod election;
pub mod replication;

pub use common::*;
pub use election::*;
pub use replication::*;
