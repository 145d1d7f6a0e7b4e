//! State shared by all controllers of one node, and the effects they emit.
//!
//! The controllers never perform I/O. They ask the [`Context`] to open a
//! request, reply to an inbound one, or close one they no longer wait on,
//! and the owner of the node turns the queued [`Effect`]s into network calls.

use super::{
    Applied, Dissemination, GossipEvent, GossipKind, MemberInfo, MembershipList, SwimConfig,
    SwimMessage,
};
use crate::MemberId;
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Identifies an outbound request for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub(crate) u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Identifies an inbound request awaiting a reply or a discard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InboundId(pub(crate) u64);

impl fmt::Display for InboundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in-{}", self.0)
    }
}

/// Why an outbound request produced no response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestFailure {
    /// No response within the request timeout
    Timeout,
    /// The peer could not be reached or dropped the request
    Unreachable(String),
    /// The peer answered with something we could not decode
    Malformed(String),
}

impl fmt::Display for RequestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Unreachable(reason) => write!(f, "unreachable: {reason}"),
            Self::Malformed(reason) => write!(f, "malformed response: {reason}"),
        }
    }
}

/// Outcome of an outbound request as reported by the runtime.
pub type Response = std::result::Result<SwimMessage, RequestFailure>;

/// Work the node asks its runtime to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send `message` to `to` and report the outcome through `handle_response`
    Send {
        request: RequestId,
        to: String,
        message: SwimMessage,
        timeout: Duration,
    },
    /// Answer an inbound request
    Reply {
        inbound: InboundId,
        message: SwimMessage,
    },
    /// Drop an inbound request without answering
    Discard { inbound: InboundId },
    /// Stop waiting on a request; a late response is ignored
    Close { request: RequestId },
    /// The join completed
    Joined,
    /// The leave completed
    Left,
}

/// Everything the controllers share. Owned by `SwimNode`.
pub struct Context {
    pub config: SwimConfig,
    pub membership: MembershipList,
    pub gossip: Dissemination,
    next_request: u64,
    effects: Vec<Effect>,
}

impl Context {
    pub fn new(local: MemberInfo, incarnation: u64, config: SwimConfig) -> Self {
        Self {
            config,
            membership: MembershipList::new(local, incarnation),
            gossip: Dissemination::new(),
            next_request: 0,
            effects: Vec::new(),
        }
    }

    pub fn drain_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub(crate) fn emit(&mut self, effect: Effect) {
        self.effects.push(effect);
    }

    /// Open a request. The caller owns the returned id until it closes it.
    pub(crate) fn send(&mut self, to: &str, message: SwimMessage, timeout: Duration) -> RequestId {
        self.next_request += 1;
        let request = RequestId(self.next_request);
        debug!("Sending {} to {} ({})", message.kind(), to, request);
        self.effects.push(Effect::Send {
            request,
            to: to.to_string(),
            message,
            timeout,
        });
        request
    }

    pub(crate) fn close(&mut self, request: RequestId) {
        self.effects.push(Effect::Close { request });
    }

    pub(crate) fn reply(&mut self, inbound: InboundId, message: SwimMessage) {
        self.effects.push(Effect::Reply { inbound, message });
    }

    pub(crate) fn discard(&mut self, inbound: InboundId) {
        self.effects.push(Effect::Discard { inbound });
    }

    // ==================== Envelopes ====================

    fn piggyback(&mut self) -> Vec<GossipEvent> {
        let limit = self
            .config
            .retransmit_limit(self.membership.cluster_size());
        self.gossip
            .drain(self.config.max_gossip_per_message, limit)
    }

    fn sender(&self) -> (MemberInfo, u64) {
        (
            self.membership.local_info().clone(),
            self.membership.local_incarnation(),
        )
    }

    pub(crate) fn ping(&mut self) -> SwimMessage {
        self.ping_with(Vec::new())
    }

    /// A ping carrying `extra` ahead of the regular piggyback batch.
    pub(crate) fn ping_with(&mut self, extra: Vec<GossipEvent>) -> SwimMessage {
        let (sender, incarnation) = self.sender();
        let batch = self.piggyback();
        let mut gossip = extra;
        for event in batch {
            if !gossip.contains(&event) {
                gossip.push(event);
            }
        }
        SwimMessage::Ping {
            sender,
            incarnation,
            gossip,
        }
    }

    pub(crate) fn ack(&mut self) -> SwimMessage {
        let (sender, incarnation) = self.sender();
        SwimMessage::Ack {
            sender,
            incarnation,
            gossip: self.piggyback(),
        }
    }

    pub(crate) fn ping_req(&mut self, probe_member: MemberId) -> SwimMessage {
        let (sender, incarnation) = self.sender();
        SwimMessage::PingReq {
            sender,
            incarnation,
            probe_member,
            gossip: self.piggyback(),
        }
    }

    pub(crate) fn sync_request(&mut self) -> SwimMessage {
        let (sender, incarnation) = self.sender();
        SwimMessage::SyncRequest {
            sender,
            incarnation,
            gossip: self.piggyback(),
        }
    }

    pub(crate) fn sync_response(&self) -> SwimMessage {
        let (sender, incarnation) = self.sender();
        SwimMessage::SyncResponse {
            sender,
            incarnation,
            members: self.membership.snapshot(),
        }
    }

    /// An event about ourselves at our current incarnation.
    pub(crate) fn local_event(&self, kind: GossipKind) -> GossipEvent {
        self.membership.local().to_gossip(kind)
    }

    // ==================== Merging ====================

    pub(crate) fn suspect_deadline(&self, now: u64) -> u64 {
        let timeout = self
            .config
            .suspicion_timeout(self.membership.cluster_size());
        now.saturating_add(millis(timeout))
    }

    /// Apply everything a message teaches us: piggybacked gossip first, then
    /// the sender itself, then a sync snapshot if there is one.
    ///
    /// Gossip goes first so a sender announcing its own leave is not re-added
    /// by the first-contact rule.
    pub(crate) fn process_message(&mut self, message: &SwimMessage, now: u64) {
        let deadline = self.suspect_deadline(now);

        for event in message.gossip() {
            let applied = self.membership.apply(event, deadline, now);
            self.disseminate(event, applied);
        }

        self.membership
            .observe(message.sender(), message.incarnation());

        if let SwimMessage::SyncResponse { members, .. } = message {
            for (event, applied) in self.membership.merge_snapshot(members, deadline, now) {
                self.disseminate(&event, applied);
            }
        }
    }

    fn disseminate(&mut self, event: &GossipEvent, applied: Applied) {
        match applied {
            Applied::Accepted => self.gossip.enqueue(event.clone()),
            Applied::Refuted => self.announce_self(),
            Applied::Ignored => {}
        }
    }

    /// Queue a Join for ourselves at our current incarnation.
    pub(crate) fn announce_self(&mut self) {
        let event = self.local_event(GossipKind::Join);
        self.gossip.enqueue(event);
    }

    /// Mark `member` suspect and tell the cluster. Idempotent.
    pub(crate) fn suspect(&mut self, member: &MemberInfo, incarnation: u64, now: u64) {
        let deadline = self.suspect_deadline(now);
        if self
            .membership
            .suspect_member(&member.id, incarnation, deadline)
        {
            self.gossip
                .add_membership_event(member)
                .kind(GossipKind::Suspect)
                .gossip_term(incarnation)
                .enqueue();
        }
    }
}

/// Milliseconds in `d`, saturating.
pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
