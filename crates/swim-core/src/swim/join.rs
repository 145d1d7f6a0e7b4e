//! Joining and leaving the cluster.
//!
//! Join: bump our incarnation, ping every contact point with a Join for
//! ourselves, take the first ack, pull one full snapshot from that member,
//! and only then report joined. Any failure waits `join_interval` and
//! starts over; a join never fails on network errors.
//!
//! Leave: bump our incarnation, send a Leave for ourselves to a gossip-sized
//! random sample, and finish when they all answered or `leave_timeout`
//! elapsed, whichever comes first.

use super::context::{Context, Effect, RequestId, Response, millis};
use super::{GossipKind, MemberInfo, MemberStatus, SwimMessage};
use crate::error::{Result, SwimError};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinState {
    /// Not part of a cluster
    AwaitJoin,
    SendJoin,
    AwaitJoinResponse {
        requests: Vec<RequestId>,
        deadline: u64,
    },
    SendSyncRequest {
        peer: MemberInfo,
    },
    AwaitSyncResponse {
        peer: MemberInfo,
        request: RequestId,
        deadline: u64,
    },
    AwaitNextJoinInterval {
        retry_at: u64,
    },
    Joined,
    Leave,
    AwaitLeaveResponse {
        requests: Vec<RequestId>,
        deadline: u64,
    },
}

#[derive(Debug)]
pub struct JoinController {
    state: JoinState,
    contact_points: Vec<String>,
}

impl Default for JoinController {
    fn default() -> Self {
        Self {
            state: JoinState::AwaitJoin,
            contact_points: Vec::new(),
        }
    }
}

impl JoinController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &JoinState {
        &self.state
    }

    pub fn is_joined(&self) -> bool {
        self.state == JoinState::Joined
    }

    /// Not joined and not trying to.
    pub fn is_idle(&self) -> bool {
        self.state == JoinState::AwaitJoin
    }

    pub fn is_leaving(&self) -> bool {
        matches!(
            self.state,
            JoinState::Leave | JoinState::AwaitLeaveResponse { .. }
        )
    }

    /// Start joining through `contact_points` (addresses).
    ///
    /// Fails without touching the network if the list is empty or a join
    /// already happened or is under way.
    pub fn join(&mut self, contact_points: Vec<String>, now: u64, ctx: &mut Context) -> Result<()> {
        if contact_points.is_empty() {
            return Err(SwimError::NoContactPoints);
        }
        if !self.is_idle() {
            return Err(SwimError::AlreadyJoined);
        }

        info!("Joining cluster via {:?}", contact_points);
        self.contact_points = contact_points;
        ctx.membership.set_local_status(MemberStatus::Alive);
        self.state = JoinState::SendJoin;
        self.tick(now, ctx);
        Ok(())
    }

    /// Start leaving. Valid once joined, or while idle (completes at once).
    pub fn leave(&mut self, now: u64, ctx: &mut Context) -> Result<()> {
        match self.state {
            JoinState::Joined => {
                self.state = JoinState::Leave;
                self.tick(now, ctx);
                Ok(())
            }
            JoinState::AwaitJoin => {
                ctx.emit(Effect::Left);
                Ok(())
            }
            JoinState::Leave | JoinState::AwaitLeaveResponse { .. } => {
                Err(SwimError::LeaveInProgress)
            }
            _ => Err(SwimError::JoinInProgress),
        }
    }

    pub fn holds(&self, id: RequestId) -> bool {
        match &self.state {
            JoinState::AwaitJoinResponse { requests, .. }
            | JoinState::AwaitLeaveResponse { requests, .. } => requests.contains(&id),
            JoinState::AwaitSyncResponse { request, .. } => *request == id,
            _ => false,
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        match &self.state {
            JoinState::AwaitJoinResponse { deadline, .. }
            | JoinState::AwaitSyncResponse { deadline, .. }
            | JoinState::AwaitLeaveResponse { deadline, .. } => Some(*deadline),
            JoinState::AwaitNextJoinInterval { retry_at } => Some(*retry_at),
            _ => None,
        }
    }

    pub fn tick(&mut self, now: u64, ctx: &mut Context) {
        while let Some(next) = self.step(now, ctx) {
            debug!("Join: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn step(&mut self, now: u64, ctx: &mut Context) -> Option<JoinState> {
        match &self.state {
            JoinState::AwaitJoin | JoinState::Joined => None,

            JoinState::SendJoin => {
                let incarnation = ctx.membership.bump_local_incarnation();
                let join = ctx.local_event(GossipKind::Join);
                ctx.gossip.enqueue(join.clone());
                debug!("Announcing join at incarnation {}", incarnation);

                let timeout = ctx.config.join_timeout;
                let requests = self
                    .contact_points
                    .iter()
                    .map(|address| {
                        let ping = ctx.ping_with(vec![join.clone()]);
                        ctx.send(address, ping, timeout)
                    })
                    .collect();
                Some(JoinState::AwaitJoinResponse {
                    requests,
                    deadline: now.saturating_add(millis(timeout)),
                })
            }

            JoinState::AwaitJoinResponse { requests, deadline } => {
                if now < *deadline {
                    return None;
                }
                debug!("No contact point answered the join");
                for request in requests {
                    ctx.close(*request);
                }
                Some(Self::retry_later(now, ctx))
            }

            JoinState::SendSyncRequest { peer } => {
                let timeout = ctx.config.sync_timeout;
                let message = ctx.sync_request();
                let request = ctx.send(&peer.address, message, timeout);
                Some(JoinState::AwaitSyncResponse {
                    peer: peer.clone(),
                    request,
                    deadline: now.saturating_add(millis(timeout)),
                })
            }

            JoinState::AwaitSyncResponse {
                peer,
                request,
                deadline,
            } => {
                if now < *deadline {
                    return None;
                }
                debug!("Initial sync with {} timed out", peer.id);
                ctx.close(*request);
                Some(Self::retry_later(now, ctx))
            }

            JoinState::AwaitNextJoinInterval { retry_at } => {
                (now >= *retry_at).then_some(JoinState::SendJoin)
            }

            JoinState::Leave => {
                let incarnation = ctx.membership.bump_local_incarnation();
                ctx.membership.set_local_status(MemberStatus::Leaving);
                let leave = ctx.local_event(GossipKind::Leave);
                ctx.gossip.enqueue(leave.clone());

                let sample_size = ctx.config.leave_sample_size(ctx.membership.len());
                let local_id = ctx.membership.local_id();
                let sample = ctx
                    .membership
                    .pick_k_random_members(sample_size, &local_id);
                info!(
                    "Leaving cluster at incarnation {}, notifying {} members",
                    incarnation,
                    sample.len()
                );
                if sample.is_empty() {
                    return Some(Self::finish_leave(ctx));
                }

                let timeout = ctx.config.leave_timeout;
                let requests = sample
                    .iter()
                    .map(|member| {
                        let ping = ctx.ping_with(vec![leave.clone()]);
                        ctx.send(&member.address, ping, timeout)
                    })
                    .collect();
                Some(JoinState::AwaitLeaveResponse {
                    requests,
                    deadline: now.saturating_add(millis(timeout)),
                })
            }

            JoinState::AwaitLeaveResponse { requests, deadline } => {
                if now < *deadline {
                    return None;
                }
                debug!("Leave timeout, {} members did not answer", requests.len());
                for request in requests {
                    ctx.close(*request);
                }
                Some(Self::finish_leave(ctx))
            }
        }
    }

    /// The message has already been merged by the caller.
    pub fn on_response(
        &mut self,
        id: RequestId,
        response: &Response,
        now: u64,
        ctx: &mut Context,
    ) -> bool {
        if !self.holds(id) {
            return false;
        }

        let next = match &mut self.state {
            JoinState::AwaitJoinResponse { requests, .. } => {
                requests.retain(|r| *r != id);
                match response {
                    Ok(SwimMessage::Ack { sender, .. }) => {
                        debug!("Contact point {} answered the join", sender.id);
                        for other in requests.drain(..) {
                            ctx.close(other);
                        }
                        JoinState::SendSyncRequest {
                            peer: sender.clone(),
                        }
                    }
                    _ if requests.is_empty() => Self::retry_later(now, ctx),
                    _ => return true,
                }
            }
            JoinState::AwaitSyncResponse { peer, .. } => match response {
                Ok(SwimMessage::SyncResponse { .. }) => {
                    info!(
                        "Joined cluster via {} ({} members known)",
                        peer.id,
                        ctx.membership.cluster_size()
                    );
                    ctx.emit(Effect::Joined);
                    JoinState::Joined
                }
                _ => {
                    debug!("Initial sync with {} failed", peer.id);
                    Self::retry_later(now, ctx)
                }
            },
            JoinState::AwaitLeaveResponse { requests, .. } => {
                requests.retain(|r| *r != id);
                if !requests.is_empty() {
                    return true;
                }
                Self::finish_leave(ctx)
            }
            _ => return false,
        };

        self.state = next;
        self.tick(now, ctx);
        true
    }

    fn retry_later(now: u64, ctx: &Context) -> JoinState {
        let retry_at = now.saturating_add(millis(ctx.config.join_interval));
        debug!("Retrying join at {}", retry_at);
        JoinState::AwaitNextJoinInterval { retry_at }
    }

    /// Forget the cluster and become joinable again.
    fn finish_leave(ctx: &mut Context) -> JoinState {
        ctx.membership.clear();
        ctx.gossip.clear();
        ctx.membership.set_local_status(MemberStatus::Dead);
        info!("Left cluster");
        ctx.emit(Effect::Left);
        JoinState::AwaitJoin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemberId;
    use crate::swim::context::RequestFailure;
    use crate::swim::{GossipEvent, SwimConfig};

    fn info(id: u64) -> MemberInfo {
        MemberInfo::new(MemberId::from(id), format!("node-{id}:26502"))
    }

    fn context() -> Context {
        Context::new(info(1), 1, SwimConfig::default())
    }

    fn sends(effects: &[Effect]) -> Vec<(RequestId, String, SwimMessage)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send {
                    request,
                    to,
                    message,
                    ..
                } => Some((*request, to.clone(), message.clone())),
                _ => None,
            })
            .collect()
    }

    fn closes(effects: &[Effect]) -> Vec<RequestId> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Close { request } => Some(*request),
                _ => None,
            })
            .collect()
    }

    fn ack_from(id: u64) -> Response {
        Ok(SwimMessage::Ack {
            sender: info(id),
            incarnation: 1,
            gossip: vec![],
        })
    }

    fn sync_from(id: u64) -> Response {
        Ok(SwimMessage::SyncResponse {
            sender: info(id),
            incarnation: 1,
            members: vec![],
        })
    }

    fn contacts() -> Vec<String> {
        vec!["node-2:26502".to_string(), "node-3:26502".to_string()]
    }

    /// Drive a join through to Joined via contact node 2.
    fn joined(ctx: &mut Context) -> JoinController {
        let mut join = JoinController::new();
        join.join(contacts(), 0, ctx).unwrap();
        let pings = sends(&ctx.drain_effects());
        join.on_response(pings[0].0, &ack_from(2), 10, ctx);
        let sync = sends(&ctx.drain_effects());
        join.on_response(sync[0].0, &sync_from(2), 20, ctx);
        ctx.drain_effects();
        assert!(join.is_joined());
        join
    }

    // ==================== Preconditions ====================

    #[test]
    fn test_join_without_contacts_fails() {
        let mut ctx = context();
        let mut join = JoinController::new();

        let result = join.join(vec![], 0, &mut ctx);

        assert!(matches!(result, Err(SwimError::NoContactPoints)));
        assert!(ctx.drain_effects().is_empty());
        assert!(join.is_idle());
    }

    #[test]
    fn test_second_join_fails() {
        let mut ctx = context();
        let mut join = JoinController::new();
        join.join(contacts(), 0, &mut ctx).unwrap();
        ctx.drain_effects();

        let result = join.join(contacts(), 0, &mut ctx);

        assert!(matches!(result, Err(SwimError::AlreadyJoined)));
        assert!(ctx.drain_effects().is_empty());
    }

    #[test]
    fn test_join_after_joined_fails() {
        let mut ctx = context();
        let mut join = joined(&mut ctx);

        assert!(matches!(
            join.join(contacts(), 100, &mut ctx),
            Err(SwimError::AlreadyJoined)
        ));
    }

    // ==================== Join ====================

    #[test]
    fn test_join_pings_every_contact_with_join_event() {
        let mut ctx = context();
        let mut join = JoinController::new();

        join.join(contacts(), 0, &mut ctx).unwrap();

        assert_eq!(ctx.membership.local_incarnation(), 2);
        let pings = sends(&ctx.drain_effects());
        assert_eq!(pings.len(), 2);
        for (_, _, message) in &pings {
            assert!(message.gossip().iter().any(|e| e.member == info(1).id
                && e.kind == GossipKind::Join
                && e.incarnation == 2));
        }
        assert_eq!(join.next_deadline(), Some(1000));
    }

    #[test]
    fn test_first_ack_wins_then_syncs() {
        let mut ctx = context();
        let mut join = JoinController::new();
        join.join(contacts(), 0, &mut ctx).unwrap();
        let pings = sends(&ctx.drain_effects());

        assert!(join.on_response(pings[1].0, &ack_from(3), 50, &mut ctx));

        let effects = ctx.drain_effects();
        assert_eq!(closes(&effects), vec![pings[0].0]);
        let sync = sends(&effects);
        assert_eq!(sync.len(), 1);
        assert_eq!(sync[0].1, "node-3:26502");
        assert_eq!(sync[0].2.kind(), "sync-request");
        assert!(!join.is_joined());
    }

    #[test]
    fn test_joined_after_sync_response() {
        let mut ctx = context();
        let mut join = JoinController::new();
        join.join(contacts(), 0, &mut ctx).unwrap();
        let pings = sends(&ctx.drain_effects());
        join.on_response(pings[0].0, &ack_from(2), 10, &mut ctx);
        let sync = sends(&ctx.drain_effects());

        join.on_response(sync[0].0, &sync_from(2), 20, &mut ctx);

        assert!(join.is_joined());
        assert_eq!(ctx.drain_effects(), vec![Effect::Joined]);
        assert_eq!(join.next_deadline(), None);
    }

    #[test]
    fn test_join_timeout_retries_after_interval() {
        let mut ctx = context();
        let mut join = JoinController::new();
        join.join(contacts(), 0, &mut ctx).unwrap();
        let pings = sends(&ctx.drain_effects());

        join.tick(1000, &mut ctx);
        let effects = ctx.drain_effects();
        assert_eq!(closes(&effects).len(), 2);
        assert_eq!(join.state(), &JoinState::AwaitNextJoinInterval { retry_at: 2000 });
        assert!(!join.holds(pings[0].0));

        join.tick(2000, &mut ctx);
        assert_eq!(sends(&ctx.drain_effects()).len(), 2);
        assert_eq!(ctx.membership.local_incarnation(), 3);
    }

    #[test]
    fn test_all_contacts_failing_retries() {
        let mut ctx = context();
        let mut join = JoinController::new();
        join.join(contacts(), 0, &mut ctx).unwrap();
        let pings = sends(&ctx.drain_effects());
        let refused = Err(RequestFailure::Unreachable("refused".into()));

        join.on_response(pings[0].0, &refused, 5, &mut ctx);
        assert!(matches!(join.state(), JoinState::AwaitJoinResponse { .. }));

        join.on_response(pings[1].0, &refused, 6, &mut ctx);
        assert_eq!(join.state(), &JoinState::AwaitNextJoinInterval { retry_at: 1006 });
    }

    #[test]
    fn test_failed_sync_retries_join() {
        let mut ctx = context();
        let mut join = JoinController::new();
        join.join(contacts(), 0, &mut ctx).unwrap();
        let pings = sends(&ctx.drain_effects());
        join.on_response(pings[0].0, &ack_from(2), 10, &mut ctx);
        let sync = sends(&ctx.drain_effects());

        join.tick(10 + 2000, &mut ctx);

        assert_eq!(closes(&ctx.drain_effects()), vec![sync[0].0]);
        assert!(matches!(join.state(), JoinState::AwaitNextJoinInterval { .. }));
    }

    // ==================== Leave ====================

    #[test]
    fn test_leave_before_join_completes_at_once() {
        let mut ctx = context();
        let mut join = JoinController::new();

        join.leave(0, &mut ctx).unwrap();

        assert_eq!(ctx.drain_effects(), vec![Effect::Left]);
    }

    #[test]
    fn test_leave_while_joining_fails() {
        let mut ctx = context();
        let mut join = JoinController::new();
        join.join(contacts(), 0, &mut ctx).unwrap();

        assert!(matches!(join.leave(0, &mut ctx), Err(SwimError::JoinInProgress)));
    }

    #[test]
    fn test_leave_notifies_sample_and_completes_on_acks() {
        let mut ctx = context();
        let mut join = joined(&mut ctx);
        for id in 2..7 {
            ctx.membership
                .apply(&GossipEvent::new(&info(id), GossipKind::Join, 1), 0, 0);
        }
        let before = ctx.membership.local_incarnation();

        join.leave(100, &mut ctx).unwrap();

        assert!(join.is_leaving());
        assert!(!ctx.membership.is_alive(&info(1).id));
        assert_eq!(ctx.membership.local_incarnation(), before + 1);
        let pings = sends(&ctx.drain_effects());
        // gossip_spread(3, 5) = 3
        assert_eq!(pings.len(), 3);
        for (_, _, message) in &pings {
            assert_eq!(message.gossip()[0].kind, GossipKind::Leave);
        }
        assert!(matches!(join.leave(100, &mut ctx), Err(SwimError::LeaveInProgress)));

        for (request, _, _) in &pings {
            join.on_response(*request, &ack_from(2), 150, &mut ctx);
        }

        assert!(join.is_idle());
        assert_eq!(ctx.drain_effects(), vec![Effect::Left]);
        assert!(ctx.membership.is_empty());
        assert!(ctx.gossip.is_empty());
    }

    #[test]
    fn test_leave_bounded_by_timeout() {
        let mut ctx = context();
        let mut join = joined(&mut ctx);
        ctx.membership
            .apply(&GossipEvent::new(&info(2), GossipKind::Join, 1), 0, 0);

        join.leave(100, &mut ctx).unwrap();
        let pings = sends(&ctx.drain_effects());
        assert_eq!(pings.len(), 1);

        join.tick(100 + 1000, &mut ctx);

        let effects = ctx.drain_effects();
        assert_eq!(effects, vec![Effect::Close { request: pings[0].0 }, Effect::Left]);
        assert!(join.is_idle());
    }

    #[test]
    fn test_rejoin_after_leave() {
        let mut ctx = context();
        let mut join = joined(&mut ctx);
        join.leave(100, &mut ctx).unwrap();
        assert_eq!(ctx.drain_effects(), vec![Effect::Left]);

        join.join(contacts(), 200, &mut ctx).unwrap();

        assert!(ctx.membership.is_alive(&info(1).id));
        assert_eq!(sends(&ctx.drain_effects()).len(), 2);
    }
}
