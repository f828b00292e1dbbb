use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tokio_util::codec::LengthDelimitedCodec;

use crate::constants::MAX_FRAME_LENGTH;
use crate::proto::AppendEntriesRequest;
use crate::proto::AppendEntriesResponse;
use crate::proto::InstallSnapshotRequest;
use crate::proto::InstallSnapshotResponse;
use crate::proto::VoteRequest;
use crate::proto::VoteResponse;
use crate::Result;
use crate::SerializationError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Envelope<T> {
    pub(crate) id: u64,
    pub(crate) body: T,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum RpcRequest {
    Vote(VoteRequest),
    AppendEntries(AppendEntriesRequest),
    InstallSnapshot(InstallSnapshotRequest),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum RpcResponse {
    Vote(VoteResponse),
    AppendEntries(AppendEntriesResponse),
    InstallSnapshot(InstallSnapshotResponse),
    /// Handler failed on the remote side, e.g. the node is shutting down
    Error(String),
}

impl RpcRequest {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            RpcRequest::Vote(_) => "vote",
            RpcRequest::AppendEntries(_) => "append_entries",
            RpcRequest::InstallSnapshot(_) => "install_snapshot",
        }
    }
}

pub(crate) fn new_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

pub(crate) fn encode_frame<T: Serialize>(envelope: &Envelope<T>) -> Result<Bytes> {
    let buf = bincode::serialize(envelope).map_err(SerializationError::from)?;
    Ok(Bytes::from(buf))
}

pub(crate) fn decode_frame<T: DeserializeOwned>(frame: &[u8]) -> Result<Envelope<T>> {
    Ok(bincode::deserialize(frame).map_err(SerializationError::from)?)
}
