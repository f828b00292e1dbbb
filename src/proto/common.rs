use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Position of an entry in the replicated log.
///
/// Ordering compares `term` first, then `index`, which is exactly the
/// "more up-to-date" relation of Raft section 5.4.1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogId {
    pub term: u64,
    pub index: u64,
}

impl LogId {
    pub fn new(
        term: u64,
        index: u64,
    ) -> Self {
        Self { term, index }
    }
}

impl fmt::Display for LogId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(f, "{}-{}", self.term, self.index)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberRole {
    /// Counts toward quorum and may campaign
    #[default]
    Voter,
    /// Receives the log but never votes or campaigns
    NonVoter,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeMeta {
    pub id: u32,
    pub address: String,
    #[serde(default)]
    pub role: MemberRole,
}

impl NodeMeta {
    pub fn voter(
        id: u32,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id,
            address: address.into(),
            role: MemberRole::Voter,
        }
    }

    pub fn non_voter(
        id: u32,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id,
            address: address.into(),
            role: MemberRole::NonVoter,
        }
    }

    #[inline]
    pub fn is_voter(&self) -> bool {
        self.role == MemberRole::Voter
    }
}

/// One cluster configuration. Members are kept sorted by id.
///
/// `epoch` is the log index of the entry that introduced the configuration,
/// or 0 for the bootstrap configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfiguration {
    pub epoch: u64,
    pub members: Vec<NodeMeta>,
}

impl ClusterConfiguration {
    pub fn new(
        epoch: u64,
        mut members: Vec<NodeMeta>,
    ) -> Self {
        members.sort_by_key(|m| m.id);
        Self { epoch, members }
    }

    pub fn member(
        &self,
        node_id: u32,
    ) -> Option<&NodeMeta> {
        self.members.iter().find(|m| m.id == node_id)
    }

    pub fn contains(
        &self,
        node_id: u32,
    ) -> bool {
        self.member(node_id).is_some()
    }

    pub fn is_voter(
        &self,
        node_id: u32,
    ) -> bool {
        self.member(node_id).map(|m| m.is_voter()).unwrap_or(false)
    }

    pub fn voter_ids(&self) -> Vec<u32> {
        self.members.iter().filter(|m| m.is_voter()).map(|m| m.id).collect()
    }
}

/// Administrative membership change, one at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MembershipChange {
    AddVoter(NodeMeta),
    AddNonVoter(NodeMeta),
    Promote(u32),
    Remove(u32),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// Opaque application command
    Command(Vec<u8>),
    /// Appended by every new leader to commit entries of earlier terms
    Noop,
    /// Complete next cluster configuration
    Config(ClusterConfiguration),
}

impl EntryPayload {
    pub fn command(command: impl Into<Vec<u8>>) -> Self {
        EntryPayload::Command(command.into())
    }

    #[inline]
    pub fn is_config(&self) -> bool {
        matches!(self, EntryPayload::Config(_))
    }

    #[inline]
    pub fn is_command(&self) -> bool {
        matches!(self, EntryPayload::Command(_))
    }

    #[inline]
    pub fn is_noop(&self) -> bool {
        matches!(self, EntryPayload::Noop)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub index: u64,
    pub term: u64,
    pub payload: EntryPayload,
    /// crc32 over index, term and payload
    pub checksum: u32,
}

impl Entry {
    pub fn new(
        index: u64,
        term: u64,
        payload: EntryPayload,
    ) -> Self {
        let checksum = Self::compute_checksum(index, term, &payload);
        Self {
            index,
            term,
            payload,
            checksum,
        }
    }

    #[inline]
    pub fn log_id(&self) -> LogId {
        LogId::new(self.term, self.index)
    }

    pub fn verify_checksum(&self) -> bool {
        self.checksum == Self::compute_checksum(self.index, self.term, &self.payload)
    }

    fn compute_checksum(
        index: u64,
        term: u64,
        payload: &EntryPayload,
    ) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&index.to_be_bytes());
        hasher.update(&term.to_be_bytes());
        match payload {
            EntryPayload::Command(bytes) => {
                hasher.update(&[0]);
                hasher.update(&(bytes.len() as u64).to_be_bytes());
                hasher.update(bytes);
            }
            EntryPayload::Noop => hasher.update(&[1]),
            EntryPayload::Config(conf) => {
                hasher.update(&[2]);
                hasher.update(&conf.epoch.to_be_bytes());
                for member in &conf.members {
                    hasher.update(&member.id.to_be_bytes());
                    hasher.update(&(member.address.len() as u64).to_be_bytes());
                    hasher.update(member.address.as_bytes());
                    hasher.update(&[member.is_voter() as u8]);
                }
            }
        }
        hasher.finalize()
    }
}
