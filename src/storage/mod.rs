mod adaptors;
mod raft_log;
mod sled_adapter;
mod state_machine;
mod state_storage;

#[cfg(test)]
mod storage_test;

use std::path::Path;

#[doc(hidden)]
pub use adaptors::*;
#[doc(hidden)]
pub use raft_log::*;
#[doc(hidden)]
pub use sled_adapter::*;
#[doc(hidden)]
pub use state_machine::*;
#[doc(hidden)]
pub use state_storage::*;
use tracing::debug;
use tracing::warn;

/// Opens the node database. Raft log and state storage live in separate
/// trees of this one sled instance.
pub fn init_sled_storage(
    sled_db_root_path: impl AsRef<Path> + std::fmt::Debug
) -> std::result::Result<sled::Db, std::io::Error> {
    debug!("init_sled_storage from path: {:?}", &sled_db_root_path);

    let path = sled_db_root_path.as_ref();
    let db_path = path.join("raft");

    sled::Config::default()
        .path(&db_path)
        .cache_capacity(64 * 1024 * 1024) //64MB
        .use_compression(true)
        .compression_factor(1)
        .open()
        .map_err(|e| {
            warn!("Try to open DB at this location: {:?} and failed: {:?}", db_path, e);
            std::io::Error::other(e)
        })
}
