//! Failure detection by direct and indirect probing.
//!
//! Each probe period:
//! 1. Ping the next member in round-robin order
//! 2. If no ack within `probe_timeout`, ask up to k other alive members to
//!    ping it on our behalf (PING-REQ)
//! 3. If no relayed ack within `probe_indirect_timeout`, mark it suspect
//!
//! The controller is a plain state enum advanced by `tick` and
//! `on_response`. Transient states (`SendPing`, `SendPingReq`,
//! `SuspectMember`) do their work and move on within the same step.

use super::context::{Context, RequestId, Response, millis};
use super::{MemberInfo, RoundRobin, SwimMessage};
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeState {
    /// Waiting for the next probe period
    AwaitInterval { until: u64 },
    /// Pick the next member and ping it
    SendPing,
    /// Direct ping in flight
    AwaitAck {
        target: MemberInfo,
        incarnation: u64,
        request: RequestId,
        deadline: u64,
    },
    /// Direct ping failed, ask others
    SendPingReq { target: MemberInfo, incarnation: u64 },
    /// Indirect pings in flight; the first ack wins
    AwaitIndirectAck {
        target: MemberInfo,
        incarnation: u64,
        requests: Vec<RequestId>,
        deadline: u64,
    },
    /// Nobody reached the target
    SuspectMember { target: MemberInfo, incarnation: u64 },
}

/// Probe state machine.
#[derive(Debug)]
pub struct ProbeController {
    state: ProbeState,
    members: RoundRobin,
    /// Start of the next probe period
    next_probe_at: u64,
}

impl Default for ProbeController {
    fn default() -> Self {
        Self {
            state: ProbeState::AwaitInterval { until: u64::MAX },
            members: RoundRobin::new(),
            next_probe_at: u64::MAX,
        }
    }
}

impl ProbeController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ProbeState {
        &self.state
    }

    /// Begin probing at `now`.
    pub fn start(&mut self, now: u64) {
        self.next_probe_at = now;
        self.state = ProbeState::AwaitInterval { until: now };
    }

    /// Stop probing, closing anything in flight.
    pub fn stop(&mut self, ctx: &mut Context) {
        self.close_pending(ctx);
        self.next_probe_at = u64::MAX;
        self.state = ProbeState::AwaitInterval { until: u64::MAX };
    }

    pub fn holds(&self, id: RequestId) -> bool {
        match &self.state {
            ProbeState::AwaitAck { request, .. } => *request == id,
            ProbeState::AwaitIndirectAck { requests, .. } => requests.contains(&id),
            _ => false,
        }
    }

    /// When the controller next needs a tick.
    pub fn next_deadline(&self) -> Option<u64> {
        match &self.state {
            ProbeState::AwaitInterval { until } if *until != u64::MAX => Some(*until),
            ProbeState::AwaitInterval { .. } => None,
            ProbeState::AwaitAck { deadline, .. }
            | ProbeState::AwaitIndirectAck { deadline, .. } => Some(*deadline),
            // Transient states are resolved within a step
            _ => None,
        }
    }

    /// Advance on timers until the controller waits on something.
    pub fn tick(&mut self, now: u64, ctx: &mut Context) {
        while let Some(next) = self.step(now, ctx) {
            trace!("Probe: {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn step(&mut self, now: u64, ctx: &mut Context) -> Option<ProbeState> {
        match &self.state {
            ProbeState::AwaitInterval { until } => (now >= *until).then_some(ProbeState::SendPing),

            ProbeState::SendPing => {
                let interval = millis(ctx.config.probe_interval);
                self.next_probe_at = now.saturating_add(interval);

                let Some(id) = self.members.next(&ctx.membership) else {
                    return Some(ProbeState::AwaitInterval {
                        until: self.next_probe_at,
                    });
                };
                let Some(member) = ctx.membership.get(&id) else {
                    return Some(ProbeState::AwaitInterval {
                        until: self.next_probe_at,
                    });
                };
                let target = member.info.clone();
                let incarnation = member.incarnation;

                let timeout = ctx.config.probe_timeout;
                let ping = ctx.ping();
                let request = ctx.send(&target.address, ping, timeout);
                Some(ProbeState::AwaitAck {
                    target,
                    incarnation,
                    request,
                    deadline: now.saturating_add(millis(timeout)),
                })
            }

            ProbeState::AwaitAck {
                target,
                incarnation,
                request,
                deadline,
            } => {
                if now < *deadline {
                    return None;
                }
                debug!("No ack from {} within probe timeout", target.id);
                ctx.close(*request);
                Some(ProbeState::SendPingReq {
                    target: target.clone(),
                    incarnation: *incarnation,
                })
            }

            ProbeState::SendPingReq {
                target,
                incarnation,
            } => {
                let helpers = ctx
                    .membership
                    .pick_k_random_members(ctx.config.probe_indirect_nodes, &target.id);
                if helpers.is_empty() {
                    debug!("No members available to probe {} indirectly", target.id);
                    return Some(ProbeState::SuspectMember {
                        target: target.clone(),
                        incarnation: *incarnation,
                    });
                }

                let timeout = ctx.config.probe_indirect_timeout;
                let requests = helpers
                    .iter()
                    .map(|helper| {
                        let ping_req = ctx.ping_req(target.id);
                        ctx.send(&helper.address, ping_req, timeout)
                    })
                    .collect();
                debug!("Asked {} members to probe {}", helpers.len(), target.id);

                Some(ProbeState::AwaitIndirectAck {
                    target: target.clone(),
                    incarnation: *incarnation,
                    requests,
                    deadline: now.saturating_add(millis(timeout)),
                })
            }

            ProbeState::AwaitIndirectAck {
                target,
                incarnation,
                requests,
                deadline,
            } => {
                if now < *deadline {
                    return None;
                }
                for request in requests {
                    ctx.close(*request);
                }
                Some(ProbeState::SuspectMember {
                    target: target.clone(),
                    incarnation: *incarnation,
                })
            }

            ProbeState::SuspectMember {
                target,
                incarnation,
            } => {
                ctx.suspect(target, *incarnation, now);
                Some(ProbeState::AwaitInterval {
                    until: self.next_probe_at,
                })
            }
        }
    }

    /// Route a response. Returns false if the request is not ours.
    ///
    /// The message itself has already been merged by the caller.
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
        let acked = matches!(response, Ok(SwimMessage::Ack { .. }));

        let next = match &mut self.state {
            ProbeState::AwaitAck {
                target,
                incarnation,
                ..
            } => {
                if acked {
                    trace!("Ack from {}", target.id);
                    ProbeState::AwaitInterval {
                        until: self.next_probe_at,
                    }
                } else {
                    debug!("Ping to {} failed", target.id);
                    ProbeState::SendPingReq {
                        target: target.clone(),
                        incarnation: *incarnation,
                    }
                }
            }
            ProbeState::AwaitIndirectAck {
                target,
                incarnation,
                requests,
                ..
            } => {
                requests.retain(|r| *r != id);
                if acked {
                    debug!("Indirect ack for {}", target.id);
                    for other in requests.drain(..) {
                        ctx.close(other);
                    }
                    ProbeState::AwaitInterval {
                        until: self.next_probe_at,
                    }
                } else if requests.is_empty() {
                    ProbeState::SuspectMember {
                        target: target.clone(),
                        incarnation: *incarnation,
                    }
                } else {
                    return true;
                }
            }
            _ => return false,
        };

        self.state = next;
        self.tick(now, ctx);
        true
    }

    fn close_pending(&mut self, ctx: &mut Context) {
        match &self.state {
            ProbeState::AwaitAck { request, .. } => ctx.close(*request),
            ProbeState::AwaitIndirectAck { requests, .. } => {
                for request in requests {
                    ctx.close(*request);
                }
            }
            _ => {}
        }
    }
}
