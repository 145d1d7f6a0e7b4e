//! Peer side of indirect probing.
//!
//! A PING-REQ asks us to ping a member on someone else's behalf. We forward
//! the target's ack unchanged; on failure we drop the inbound request and
//! let the requester's own timeout decide.

use super::SwimMessage;
use super::context::{Context, InboundId, RequestId, Response, millis};
use crate::MemberId;
use std::collections::HashMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct PendingRelay {
    inbound: InboundId,
    target: MemberId,
    deadline: u64,
}

#[derive(Debug, Default)]
pub struct RelayHandler {
    pending: HashMap<RequestId, PendingRelay>,
}

impl RelayHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle a PING-REQ for `target`.
    pub fn on_ping_req(
        &mut self,
        inbound: InboundId,
        target: MemberId,
        now: u64,
        ctx: &mut Context,
    ) {
        let Some(member) = ctx.membership.get(&target) else {
            warn!("Rejecting ping-req for unknown member {}", target);
            ctx.discard(inbound);
            return;
        };
        let address = member.info.address.clone();

        let timeout = ctx.config.probe_timeout;
        let ping = ctx.ping();
        let request = ctx.send(&address, ping, timeout);
        self.pending.insert(
            request,
            PendingRelay {
                inbound,
                target,
                deadline: now.saturating_add(millis(timeout)),
            },
        );
    }

    pub fn holds(&self, id: RequestId) -> bool {
        self.pending.contains_key(&id)
    }

    /// Forward the target's ack, or drop the inbound request.
    pub fn on_response(&mut self, id: RequestId, response: &Response, ctx: &mut Context) -> bool {
        let Some(relay) = self.pending.remove(&id) else {
            return false;
        };

        match response {
            Ok(ack @ SwimMessage::Ack { .. }) => {
                debug!("Relaying ack from {}", relay.target);
                ctx.reply(relay.inbound, ack.clone());
            }
            Ok(other) => {
                warn!("Expected ack from {}, got {}", relay.target, other.kind());
                ctx.discard(relay.inbound);
            }
            Err(failure) => {
                debug!("Relayed ping to {} failed: {}", relay.target, failure);
                ctx.discard(relay.inbound);
            }
        }
        true
    }

    /// Give up on relays whose probe timed out.
    pub fn tick(&mut self, now: u64, ctx: &mut Context) {
        let expired: Vec<_> = self
            .pending
            .iter()
            .filter(|(_, relay)| now >= relay.deadline)
            .map(|(id, _)| *id)
            .collect();

        for id in expired {
            if let Some(relay) = self.pending.remove(&id) {
                debug!("Relayed ping to {} timed out", relay.target);
                ctx.close(id);
                ctx.discard(relay.inbound);
            }
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.pending.values().map(|r| r.deadline).min()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swim::context::{Effect, RequestFailure};
    use crate::swim::{GossipEvent, GossipKind, MemberInfo, SwimConfig};

    fn info(id: u64) -> MemberInfo {
        MemberInfo::new(MemberId::from(id), format!("node-{id}:26502"))
    }

    fn context() -> Context {
        let mut ctx = Context::new(info(1), 1, SwimConfig::default());
        ctx.membership
            .apply(&GossipEvent::new(&info(3), GossipKind::Join, 1), 0, 0);
        ctx
    }

    fn inbound(n: u64) -> InboundId {
        InboundId(n)
    }

    fn sent_request(effects: &[Effect]) -> RequestId {
        effects
            .iter()
            .find_map(|e| match e {
                Effect::Send { request, to, .. } => {
                    assert_eq!(to, "node-3:26502");
                    Some(*request)
                }
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_unknown_member_rejected() {
        let mut ctx = context();
        let mut relay = RelayHandler::new();

        relay.on_ping_req(inbound(1), MemberId::from(9), 0, &mut ctx);

        assert_eq!(ctx.drain_effects(), vec![Effect::Discard { inbound: inbound(1) }]);
        assert!(relay.is_empty());
    }

    #[test]
    fn test_ack_forwarded_to_requester() {
        let mut ctx = context();
        let mut relay = RelayHandler::new();
        relay.on_ping_req(inbound(1), MemberId::from(3), 0, &mut ctx);
        let request = sent_request(&ctx.drain_effects());

        let ack = SwimMessage::Ack {
            sender: info(3),
            incarnation: 4,
            gossip: vec![],
        };
        assert!(relay.on_response(request, &Ok(ack.clone()), &mut ctx));

        assert_eq!(
            ctx.drain_effects(),
            vec![Effect::Reply {
                inbound: inbound(1),
                message: ack
            }]
        );
        assert!(relay.is_empty());
    }

    #[test]
    fn test_failure_discards_inbound() {
        let mut ctx = context();
        let mut relay = RelayHandler::new();
        relay.on_ping_req(inbound(1), MemberId::from(3), 0, &mut ctx);
        let request = sent_request(&ctx.drain_effects());

        relay.on_response(request, &Err(RequestFailure::Timeout), &mut ctx);

        assert_eq!(ctx.drain_effects(), vec![Effect::Discard { inbound: inbound(1) }]);
    }

    #[test]
    fn test_timeout_closes_and_discards() {
        let mut ctx = context();
        let mut relay = RelayHandler::new();
        relay.on_ping_req(inbound(1), MemberId::from(3), 0, &mut ctx);
        let request = sent_request(&ctx.drain_effects());
        assert_eq!(relay.next_deadline(), Some(500));

        relay.tick(499, &mut ctx);
        assert!(ctx.drain_effects().is_empty());

        relay.tick(500, &mut ctx);
        assert_eq!(
            ctx.drain_effects(),
            vec![
                Effect::Close { request },
                Effect::Discard { inbound: inbound(1) }
            ]
        );
        assert!(!relay.on_response(request, &Err(RequestFailure::Timeout), &mut ctx));
    }
}
