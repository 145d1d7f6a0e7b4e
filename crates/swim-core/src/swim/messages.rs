//! SWIM protocol message types.
//!
//! All messages are sent as JSON so any transport that can carry bytes
//! (in-process channels, WebSocket frames) can carry them unchanged.

use crate::MemberId;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Identity and contact address of a cluster member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct MemberInfo {
    /// Member's unique identifier
    pub id: MemberId,
    /// Address other members use to reach it (host:port)
    pub address: String,
}

impl MemberInfo {
    pub fn new(id: MemberId, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
        }
    }
}

/// Status of a member as seen by the local node.
///
/// Ordered by severity. Only `Alive` and `Suspect` toggle back and forth;
/// every other transition moves forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "camelCase")]
pub enum MemberStatus {
    Alive,
    Suspect,
    Leaving,
    Dead,
}

impl MemberStatus {
    /// Whether other components may treat the member as usable.
    pub fn is_alive(self) -> bool {
        self == Self::Alive
    }
}

/// Kind of membership event carried in gossip.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum GossipKind {
    /// Member is alive at this incarnation (join or refutation)
    Join,
    /// Member failed direct and indirect probes
    Suspect,
    /// Suspicion expired, member is dead
    Confirm,
    /// Member left voluntarily
    Leave,
}

/// An immutable membership fact queued for dissemination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GossipEvent {
    pub member: MemberId,
    pub address: String,
    pub kind: GossipKind,
    pub incarnation: u64,
    /// Member metadata, only meaningful on `Join`
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl GossipEvent {
    pub fn new(info: &MemberInfo, kind: GossipKind, incarnation: u64) -> Self {
        Self {
            member: info.id,
            address: info.address.clone(),
            kind,
            incarnation,
            properties: BTreeMap::new(),
        }
    }

    pub fn info(&self) -> MemberInfo {
        MemberInfo::new(self.member, self.address.clone())
    }
}

/// Full state of one member, as shipped in a sync response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MemberSnapshot {
    pub id: MemberId,
    pub address: String,
    pub status: MemberStatus,
    pub incarnation: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl MemberSnapshot {
    /// The gossip event equivalent to this snapshot entry, used for merging.
    pub fn to_gossip(&self) -> GossipEvent {
        let kind = match self.status {
            MemberStatus::Alive => GossipKind::Join,
            MemberStatus::Suspect => GossipKind::Suspect,
            MemberStatus::Leaving => GossipKind::Leave,
            MemberStatus::Dead => GossipKind::Confirm,
        };
        GossipEvent {
            member: self.id,
            address: self.address.clone(),
            kind,
            incarnation: self.incarnation,
            properties: self.properties.clone(),
        }
    }
}

/// SWIM protocol messages.
///
/// Every message names its sender and the sender's own incarnation, so a
/// direct exchange doubles as first contact and as suspicion refutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SwimMessage {
    /// Direct probe with piggybacked gossip.
    Ping {
        sender: MemberInfo,
        incarnation: u64,
        gossip: Vec<GossipEvent>,
    },

    /// Response to a ping (or a relayed copy of one).
    Ack {
        sender: MemberInfo,
        incarnation: u64,
        gossip: Vec<GossipEvent>,
    },

    /// Ask the recipient to probe `probe_member` on our behalf.
    #[serde(rename_all = "camelCase")]
    PingReq {
        sender: MemberInfo,
        incarnation: u64,
        probe_member: MemberId,
        gossip: Vec<GossipEvent>,
    },

    /// Anti-entropy pull request.
    SyncRequest {
        sender: MemberInfo,
        incarnation: u64,
        gossip: Vec<GossipEvent>,
    },

    /// Full membership snapshot, including the responder itself.
    SyncResponse {
        sender: MemberInfo,
        incarnation: u64,
        members: Vec<MemberSnapshot>,
    },
}

impl SwimMessage {
    /// Serialize to JSON bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from JSON bytes.
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    pub fn sender(&self) -> &MemberInfo {
        match self {
            Self::Ping { sender, .. }
            | Self::Ack { sender, .. }
            | Self::PingReq { sender, .. }
            | Self::SyncRequest { sender, .. }
            | Self::SyncResponse { sender, .. } => sender,
        }
    }

    /// The sender's own incarnation at the time it built the message.
    pub fn incarnation(&self) -> u64 {
        match self {
            Self::Ping { incarnation, .. }
            | Self::Ack { incarnation, .. }
            | Self::PingReq { incarnation, .. }
            | Self::SyncRequest { incarnation, .. }
            | Self::SyncResponse { incarnation, .. } => *incarnation,
        }
    }

    /// Extract piggybacked gossip (sync responses carry a snapshot instead).
    pub fn gossip(&self) -> &[GossipEvent] {
        match self {
            Self::Ping { gossip, .. }
            | Self::Ack { gossip, .. }
            | Self::PingReq { gossip, .. }
            | Self::SyncRequest { gossip, .. } => gossip,
            Self::SyncResponse { .. } => &[],
        }
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ping { .. } => "ping",
            Self::Ack { .. } => "ack",
            Self::PingReq { .. } => "ping-req",
            Self::SyncRequest { .. } => "sync-request",
            Self::SyncResponse { .. } => "sync-response",
        }
    }
}
