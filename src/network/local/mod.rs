mod local_network;

pub use local_network::*;
