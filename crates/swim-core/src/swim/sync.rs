//! Anti-entropy: periodically pull a full snapshot from one member.
//!
//! Gossip retransmits each event a bounded number of times, so this pull
//! is what guarantees convergence. Failures are logged and skipped; the next period
//! tries the next member.

use super::context::{Context, RequestId, Response, millis};
use super::{MemberInfo, RoundRobin, SwimMessage};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    AwaitInterval { until: u64 },
    AwaitResponse {
        peer: MemberInfo,
        request: RequestId,
        deadline: u64,
    },
}

#[derive(Debug)]
pub struct SyncController {
    state: SyncState,
    members: RoundRobin,
}

impl Default for SyncController {
    fn default() -> Self {
        Self {
            state: SyncState::AwaitInterval { until: u64::MAX },
            members: RoundRobin::new(),
        }
    }
}

impl SyncController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &SyncState {
        &self.state
    }

    /// First sync one interval after `now`.
    pub fn start(&mut self, now: u64, ctx: &Context) {
        self.state = SyncState::AwaitInterval {
            until: now.saturating_add(millis(ctx.config.sync_interval)),
        };
    }

    pub fn stop(&mut self, ctx: &mut Context) {
        if let SyncState::AwaitResponse { request, .. } = &self.state {
            ctx.close(*request);
        }
        self.state = SyncState::AwaitInterval { until: u64::MAX };
    }

    pub fn holds(&self, id: RequestId) -> bool {
        matches!(&self.state, SyncState::AwaitResponse { request, .. } if *request == id)
    }

    pub fn next_deadline(&self) -> Option<u64> {
        match &self.state {
            SyncState::AwaitInterval { until } if *until == u64::MAX => None,
            SyncState::AwaitInterval { until } => Some(*until),
            SyncState::AwaitResponse { deadline, .. } => Some(*deadline),
        }
    }

    pub fn tick(&mut self, now: u64, ctx: &mut Context) {
        match &self.state {
            SyncState::AwaitInterval { until } if now >= *until => {
                let interval = millis(ctx.config.sync_interval);
                let Some(peer) = self
                    .members
                    .next(&ctx.membership)
                    .and_then(|id| ctx.membership.get(&id))
                    .map(|m| m.info.clone())
                else {
                    self.state = SyncState::AwaitInterval {
                        until: now.saturating_add(interval),
                    };
                    return;
                };

                let timeout = ctx.config.sync_timeout;
                let request_message = ctx.sync_request();
                let request = ctx.send(&peer.address, request_message, timeout);
                self.state = SyncState::AwaitResponse {
                    peer,
                    request,
                    deadline: now.saturating_add(millis(timeout)),
                };
            }
            SyncState::AwaitResponse {
                peer,
                request,
                deadline,
            } if now >= *deadline => {
                debug!("Sync with {} timed out", peer.id);
                ctx.close(*request);
                self.schedule_next(now, ctx);
            }
            _ => {}
        }
    }

    /// The snapshot itself is merged by the caller before routing.
    pub fn on_response(
        &mut self,
        id: RequestId,
        response: &Response,
        now: u64,
        ctx: &mut Context,
    ) -> bool {
        let SyncState::AwaitResponse { peer, request, .. } = &self.state else {
            return false;
        };
        if *request != id {
            return false;
        }

        match response {
            Ok(SwimMessage::SyncResponse { members, .. }) => {
                debug!("Synced {} members from {}", members.len(), peer.id);
            }
            Ok(other) => debug!("Sync with {} got {} instead of a snapshot", peer.id, other.kind()),
            Err(failure) => debug!("Sync with {} failed: {}", peer.id, failure),
        }
        self.schedule_next(now, ctx);
        true
    }

    fn schedule_next(&mut self, now: u64, ctx: &Context) {
        self.state = SyncState::AwaitInterval {
            until: now.saturating_add(millis(ctx.config.sync_interval)),
        };
    }
}
