mod sled_state_storage;

pub use sled_state_storage::*;
