//! TCP transport.
//!
//! Each RPC travels as one length-delimited frame holding a bincode
//! [`Envelope`]. The response frame echoes the request id so that a reply
//! left over from a timed out call is never taken for the current one.

mod rpc_server;
mod tcp_transport;
mod wire;

pub use rpc_server::*;
pub use tcp_transport::*;
pub(crate) use wire::*;
