//! One cluster member: the single owner of the membership state.
//!
//! `SwimNode` sequences the controllers and exposes a sans-IO surface:
//! time enters as `now` (milliseconds on any monotonic clock), inbound
//! traffic enters through [`SwimNode::handle_request`] and
//! [`SwimNode::handle_response`], and everything that should happen on the
//! network leaves through [`SwimNode::drain_effects`].
//!
//! A runtime drives it like this:
//!
//! ```text
//! loop {
//!     select! {
//!         sleep_until(node.next_wakeup()) => node.tick(now),
//!         inbound request             => node.handle_request(msg, now),
//!         response for a request      => node.handle_response(id, result, now),
//!     }
//!     for effect in node.drain_effects() { perform(effect) }
//!     for change in node.drain_changes() { notify(change) }
//! }
//! ```

use super::context::{Context, Effect, InboundId, RequestId, Response};
use super::{
    JoinController, Member, MemberInfo, MembershipChange, MembershipList, ProbeController,
    RelayHandler, SuspicionController, SwimConfig, SwimMessage, SyncController,
};
use crate::MemberId;
use crate::error::Result;
use tracing::{debug, info, trace, warn};

pub struct SwimNode {
    ctx: Context,
    join: JoinController,
    probe: ProbeController,
    suspicion: SuspicionController,
    sync: SyncController,
    relay: RelayHandler,
    next_inbound: u64,
}

impl SwimNode {
    /// Create a node that has not joined any cluster yet.
    ///
    /// `incarnation` should grow across restarts (a wall-clock timestamp
    /// works) so the cluster accepts the new life over stale beliefs.
    pub fn new(local: MemberInfo, incarnation: u64, config: SwimConfig) -> Self {
        Self {
            ctx: Context::new(local, incarnation, config),
            join: JoinController::new(),
            probe: ProbeController::new(),
            suspicion: SuspicionController::new(),
            sync: SyncController::new(),
            relay: RelayHandler::new(),
            next_inbound: 0,
        }
    }

    // ==================== Lifecycle ====================

    /// Join through the given contact point addresses.
    ///
    /// Completion is reported as [`Effect::Joined`].
    pub fn join(&mut self, contact_points: Vec<String>, now: u64) -> Result<()> {
        self.join.join(contact_points, now, &mut self.ctx)?;
        self.tick(now);
        Ok(())
    }

    /// Leave the cluster. Completion is reported as [`Effect::Left`].
    pub fn leave(&mut self, now: u64) -> Result<()> {
        let was_joined = self.join.is_joined();
        self.join.leave(now, &mut self.ctx)?;
        if was_joined {
            self.stop_controllers();
        }
        self.tick(now);
        Ok(())
    }

    /// Set a property on ourselves and announce it.
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        if !self.ctx.membership.set_local_property(key.clone(), value.into()) {
            return;
        }
        let incarnation = self.ctx.membership.bump_local_incarnation();
        info!("Property {} changed, incarnation now {}", key, incarnation);
        if self.join.is_joined() {
            self.ctx.announce_self();
        }
    }

    // ==================== Driving ====================

    /// Run every timer that is due. Order: probe, suspicion, sync, join,
    /// then relays.
    pub fn tick(&mut self, now: u64) {
        let was_joined = self.join.is_joined();

        if was_joined {
            self.probe.tick(now, &mut self.ctx);
            self.suspicion.tick(now, &mut self.ctx);
            self.sync.tick(now, &mut self.ctx);
        }
        self.join.tick(now, &mut self.ctx);
        self.relay.tick(now, &mut self.ctx);

        if !was_joined && self.join.is_joined() {
            self.start_controllers(now);
        }
    }

    /// Accept an inbound request. The reply (or discard) shows up as an
    /// effect carrying the returned id.
    pub fn handle_request(&mut self, message: SwimMessage, now: u64) -> InboundId {
        self.next_inbound += 1;
        let inbound = InboundId(self.next_inbound);

        if self.join.is_idle() {
            debug!(
                "Not a cluster member, dropping {} from {}",
                message.kind(),
                message.sender().id
            );
            self.ctx.discard(inbound);
            return inbound;
        }

        trace!("Received {} from {}", message.kind(), message.sender().id);
        self.ctx.process_message(&message, now);

        match &message {
            SwimMessage::Ping { .. } => {
                let ack = self.ctx.ack();
                self.ctx.reply(inbound, ack);
            }
            SwimMessage::PingReq { probe_member, .. } => {
                self.relay
                    .on_ping_req(inbound, *probe_member, now, &mut self.ctx);
            }
            SwimMessage::SyncRequest { .. } => {
                let response = self.ctx.sync_response();
                self.ctx.reply(inbound, response);
            }
            SwimMessage::Ack { .. } | SwimMessage::SyncResponse { .. } => {
                warn!("Unexpected {} as a request, dropping", message.kind());
                self.ctx.discard(inbound);
            }
        }
        inbound
    }

    /// Deliver the outcome of a request opened through [`Effect::Send`].
    ///
    /// Responses to requests no controller holds any more are ignored.
    pub fn handle_response(&mut self, request: RequestId, response: Response, now: u64) {
        let held = self.join.holds(request)
            || self.probe.holds(request)
            || self.sync.holds(request)
            || self.relay.holds(request);
        if !held {
            trace!("Ignoring response for closed request {}", request);
            return;
        }

        if let Ok(message) = &response {
            self.ctx.process_message(message, now);
        }

        let was_joined = self.join.is_joined();
        let routed = self.join.on_response(request, &response, now, &mut self.ctx)
            || self.probe.on_response(request, &response, now, &mut self.ctx)
            || self.sync.on_response(request, &response, now, &mut self.ctx)
            || self.relay.on_response(request, &response, &mut self.ctx);
        if !routed {
            warn!("No controller accepted the response to {}", request);
        }
        if !was_joined && self.join.is_joined() {
            self.start_controllers(now);
        }

        self.tick(now);
    }

    /// The earliest time `tick` has work to do.
    pub fn next_wakeup(&self) -> Option<u64> {
        let mut deadlines = vec![self.join.next_deadline(), self.relay.next_deadline()];
        if self.join.is_joined() {
            deadlines.push(self.probe.next_deadline());
            deadlines.push(self.suspicion.next_deadline());
            deadlines.push(self.sync.next_deadline());
        }
        deadlines.into_iter().flatten().min()
    }

    pub fn drain_effects(&mut self) -> Vec<Effect> {
        self.ctx.drain_effects()
    }

    pub fn drain_changes(&mut self) -> Vec<MembershipChange> {
        self.ctx.membership.drain_changes()
    }

    fn start_controllers(&mut self, now: u64) {
        self.probe.start(now);
        self.suspicion.start(now);
        self.sync.start(now, &self.ctx);
    }

    fn stop_controllers(&mut self) {
        self.probe.stop(&mut self.ctx);
        self.suspicion.stop();
        self.sync.stop(&mut self.ctx);
    }

    // ==================== Queries ====================

    pub fn local_member(&self) -> &Member {
        self.ctx.membership.local()
    }

    pub fn local_id(&self) -> MemberId {
        self.ctx.membership.local_id()
    }

    /// Remote members currently known.
    pub fn members(&self) -> Vec<Member> {
        self.ctx.membership.members_view()
    }

    pub fn is_alive(&self, id: &MemberId) -> bool {
        self.ctx.membership.is_alive(id)
    }

    pub fn is_joined(&self) -> bool {
        self.join.is_joined()
    }

    pub fn membership(&self) -> &MembershipList {
        &self.ctx.membership
    }

    pub fn config(&self) -> &SwimConfig {
        &self.ctx.config
    }
}
