//! Piggyback queue of membership events.
//!
//! Every outbound envelope drains a few events from here. Each event is sent
//! a bounded number of times (`retransmit_limit`, logarithmic in cluster
//! size) and then dropped, which keeps gossip traffic per event at
//! O(n log n) messages cluster-wide.

use super::{GossipEvent, GossipKind, MemberInfo};
use std::collections::BTreeMap;
use tracing::trace;

#[derive(Debug, Clone)]
struct PendingEvent {
    event: GossipEvent,
    transmissions: u32,
}

/// Queue of membership events waiting to be piggybacked.
#[derive(Debug, Default)]
pub struct Dissemination {
    pending: Vec<PendingEvent>,
}

impl Dissemination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building an event about `member`.
    ///
    /// ```
    /// use swim_core::swim::{Dissemination, GossipKind, MemberInfo};
    /// use swim_core::MemberId;
    ///
    /// let mut gossip = Dissemination::new();
    /// let member = MemberInfo::new(MemberId::from(7), "10.0.0.7:26502");
    /// gossip
    ///     .add_membership_event(&member)
    ///     .kind(GossipKind::Suspect)
    ///     .gossip_term(3)
    ///     .enqueue();
    /// assert_eq!(gossip.len(), 1);
    /// ```
    pub fn add_membership_event(&mut self, member: &MemberInfo) -> EventBuilder<'_> {
        EventBuilder {
            queue: self,
            event: GossipEvent::new(member, GossipKind::Join, 0),
        }
    }

    /// Queue an event. Replaces anything still queued about the same member.
    pub fn enqueue(&mut self, event: GossipEvent) {
        trace!(
            "Queueing {:?} for {} (incarnation {})",
            event.kind, event.member, event.incarnation
        );
        self.pending.retain(|p| p.event.member != event.member);
        self.pending.push(PendingEvent {
            event,
            transmissions: 0,
        });
    }

    /// Take up to `max` events for one outbound message.
    ///
    /// Events sent the fewest times go first. Each returned event counts one
    /// transmission; events that reach `limit` are dropped from the queue.
    pub fn drain(&mut self, max: usize, limit: u32) -> Vec<GossipEvent> {
        if max == 0 || self.pending.is_empty() {
            return Vec::new();
        }

        // Stable sort keeps insertion order among equals
        self.pending.sort_by_key(|p| p.transmissions);

        let batch: Vec<_> = self
            .pending
            .iter_mut()
            .take(max)
            .map(|p| {
                p.transmissions += 1;
                p.event.clone()
            })
            .collect();

        self.pending.retain(|p| p.transmissions < limit.max(1));
        batch
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Fluent builder returned by [`Dissemination::add_membership_event`].
#[must_use = "the event is only queued by calling `enqueue`"]
pub struct EventBuilder<'a> {
    queue: &'a mut Dissemination,
    event: GossipEvent,
}

impl EventBuilder<'_> {
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.event.address = address.into();
        self
    }

    pub fn kind(mut self, kind: GossipKind) -> Self {
        self.event.kind = kind;
        self
    }

    /// Incarnation of the member the event is about.
    pub fn gossip_term(mut self, incarnation: u64) -> Self {
        self.event.incarnation = incarnation;
        self
    }

    pub fn properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.event.properties = properties;
        self
    }

    pub fn enqueue(self) {
        self.queue.enqueue(self.event);
    }
}
