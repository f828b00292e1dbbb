//! Cluster member registry.
//!
//! Holds the *active* configuration (the last committed one, used for
//! quorum) and at most one *pending* configuration (appended but not yet
//! committed). Replication targets are the union of both, so a node being
//! added receives the log before its configuration commits.

use std::collections::HashSet;
use std::fmt::Debug;

use parking_lot::RwLock;
use tracing::debug;
use tracing::info;

use crate::cluster::is_majority;
use crate::proto::ClusterConfiguration;
use crate::proto::EntryPayload;
use crate::proto::MemberRole;
use crate::proto::MembershipChange;
use crate::proto::NodeMeta;
use crate::MembershipError;
use crate::RaftLog;
use crate::Result;

#[derive(Debug)]
struct Inner {
    active: ClusterConfiguration,
    pending: Option<ClusterConfiguration>,
    current_leader: Option<u32>,
}

pub struct RaftMembership {
    node_id: u32,
    inner: RwLock<Inner>,
}

impl Debug for RaftMembership {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("RaftMembership")
            .field("node_id", &self.node_id)
            .field("active_epoch", &inner.active.epoch)
            .field("pending_epoch", &inner.pending.as_ref().map(|c| c.epoch))
            .finish()
    }
}

impl RaftMembership {
    pub fn new(
        node_id: u32,
        active: ClusterConfiguration,
    ) -> Self {
        Self {
            node_id,
            inner: RwLock::new(Inner {
                active,
                pending: None,
                current_leader: None,
            }),
        }
    }

    pub fn node_id(&self) -> u32 {
        self.node_id
    }

    /// Last committed configuration
    pub fn active(&self) -> ClusterConfiguration {
        self.inner.read().active.clone()
    }

    pub fn pending(&self) -> Option<ClusterConfiguration> {
        self.inner.read().pending.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.inner.read().active.epoch
    }

    pub fn has_pending_change(&self) -> bool {
        self.inner.read().pending.is_some()
    }

    pub fn current_leader(&self) -> Option<u32> {
        self.inner.read().current_leader
    }

    pub fn set_current_leader(
        &self,
        leader_id: Option<u32>,
    ) {
        let mut inner = self.inner.write();
        if inner.current_leader != leader_id {
            debug!("[{}] current leader: {:?}", self.node_id, leader_id);
            inner.current_leader = leader_id;
        }
    }

    /// Address of the known leader, looked up in both configurations
    pub fn leader_address(&self) -> Option<String> {
        let leader_id = self.current_leader()?;
        self.member(leader_id).map(|m| m.address)
    }

    pub fn member(
        &self,
        node_id: u32,
    ) -> Option<NodeMeta> {
        let inner = self.inner.read();
        inner
            .active
            .member(node_id)
            .or_else(|| inner.pending.as_ref().and_then(|p| p.member(node_id)))
            .cloned()
    }

    /// Whether `node_id` votes under the active configuration
    pub fn is_voter(
        &self,
        node_id: u32,
    ) -> bool {
        self.inner.read().active.is_voter(node_id)
    }

    pub fn voter_ids(&self) -> Vec<u32> {
        self.inner.read().active.voter_ids()
    }

    /// Voters of the active configuration other than this node
    pub fn voting_peers(&self) -> Vec<NodeMeta> {
        self.inner
            .read()
            .active
            .members
            .iter()
            .filter(|m| m.is_voter() && m.id != self.node_id)
            .cloned()
            .collect()
    }

    /// Every other member of the active or pending configuration
    pub fn replication_targets(&self) -> Vec<NodeMeta> {
        let inner = self.inner.read();
        let mut targets: Vec<NodeMeta> = inner
            .active
            .members
            .iter()
            .filter(|m| m.id != self.node_id)
            .cloned()
            .collect();
        if let Some(pending) = &inner.pending {
            for member in &pending.members {
                if member.id != self.node_id && !targets.iter().any(|t| t.id == member.id) {
                    targets.push(member.clone());
                }
            }
        }
        targets
    }

    /// Whether `supporters` hold a majority of the active voters
    pub fn is_quorum(
        &self,
        supporters: &HashSet<u32>,
    ) -> bool {
        let voters = self.voter_ids();
        let granted = voters.iter().filter(|id| supporters.contains(id)).count();
        is_majority(granted, voters.len())
    }

    /// Records a configuration entry that has been appended but not committed.
    pub fn stage(
        &self,
        configuration: ClusterConfiguration,
    ) {
        let mut inner = self.inner.write();
        if configuration.epoch <= inner.active.epoch {
            return;
        }
        debug!("[{}] staged configuration epoch {}", self.node_id, configuration.epoch);
        inner.pending = Some(configuration);
    }

    /// Activates the pending configuration once its entry is committed.
    ///
    /// Returns the newly active configuration, which the caller persists.
    pub fn commit_up_to(
        &self,
        commit_index: u64,
    ) -> Option<ClusterConfiguration> {
        let mut inner = self.inner.write();
        match &inner.pending {
            Some(pending) if pending.epoch <= commit_index => {
                let active = pending.clone();
                inner.active = active.clone();
                inner.pending = None;
                info!(
                    "[{}] configuration epoch {} is now active: {:?}",
                    self.node_id, active.epoch, active.members
                );
                Some(active)
            }
            _ => None,
        }
    }

    /// Replaces both configurations with the one carried by a snapshot.
    pub fn install(
        &self,
        configuration: ClusterConfiguration,
    ) {
        let mut inner = self.inner.write();
        if configuration.epoch < inner.active.epoch {
            return;
        }
        inner.active = configuration;
        if inner
            .pending
            .as_ref()
            .map(|p| p.epoch <= inner.active.epoch)
            .unwrap_or(false)
        {
            inner.pending = None;
        }
    }

    /// Builds the next configuration for an administrative change.
    ///
    /// `epoch` is the log index the resulting configuration entry will get.
    pub fn propose_change(
        &self,
        change: &MembershipChange,
        epoch: u64,
    ) -> Result<ClusterConfiguration> {
        let inner = self.inner.read();
        if let Some(pending) = &inner.pending {
            return Err(MembershipError::ChangeInProgress {
                pending_epoch: pending.epoch,
            }
            .into());
        }

        let mut members = inner.active.members.clone();
        match change {
            MembershipChange::AddVoter(meta) | MembershipChange::AddNonVoter(meta) => {
                if members.iter().any(|m| m.id == meta.id) {
                    return Err(MembershipError::InvalidChange(format!("node {} is already a member", meta.id)).into());
                }
                let role = match change {
                    MembershipChange::AddVoter(_) => MemberRole::Voter,
                    _ => MemberRole::NonVoter,
                };
                members.push(NodeMeta {
                    role,
                    ..meta.clone()
                });
            }
            MembershipChange::Promote(node_id) => match members.iter_mut().find(|m| m.id == *node_id) {
                Some(m) if !m.is_voter() => m.role = MemberRole::Voter,
                Some(_) => {
                    return Err(MembershipError::InvalidChange(format!("node {} is already a voter", node_id)).into())
                }
                None => return Err(MembershipError::NoMetadataFoundForNode { node_id: *node_id }.into()),
            },
            MembershipChange::Remove(node_id) => {
                if !members.iter().any(|m| m.id == *node_id) {
                    return Err(MembershipError::NoMetadataFoundForNode { node_id: *node_id }.into());
                }
                members.retain(|m| m.id != *node_id);
                if !members.iter().any(|m| m.is_voter()) {
                    return Err(MembershipError::InvalidChange("cannot remove the last voter".to_string()).into());
                }
            }
        }

        Ok(ClusterConfiguration::new(epoch, members))
    }

    /// Rebuilds both configurations from the log after a restart, or after
    /// the uncommitted tail changed.
    ///
    /// Configuration entries at or below `commit_index` become active, the
    /// last one above it becomes pending. Returns the active configuration
    /// when it changed, so the caller can persist it.
    pub fn recover_from_log<R: RaftLog + ?Sized>(
        &self,
        raft_log: &R,
        commit_index: u64,
    ) -> Result<Option<ClusterConfiguration>> {
        let start = self.epoch() + 1;
        self.scan_log(raft_log, start, commit_index)
    }

    fn scan_log<R: RaftLog + ?Sized>(
        &self,
        raft_log: &R,
        start: u64,
        commit_index: u64,
    ) -> Result<Option<ClusterConfiguration>> {
        let last = raft_log.last_entry_id();
        let mut newly_active = None;
        let mut pending = None;

        if start <= last {
            for entry in raft_log.get_entries_range(start..=last)? {
                if let EntryPayload::Config(configuration) = entry.payload {
                    if entry.index <= commit_index {
                        newly_active = Some(configuration);
                    } else {
                        pending = Some(configuration);
                    }
                }
            }
        }

        let mut inner = self.inner.write();
        if let Some(active) = &newly_active {
            if active.epoch > inner.active.epoch {
                inner.active = active.clone();
            }
        }
        if inner.pending != pending {
            debug!(
                "[{}] pending configuration: {:?}",
                self.node_id,
                pending.as_ref().map(|p| p.epoch)
            );
            inner.pending = pending;
        }
        Ok(newly_active)
    }
}
