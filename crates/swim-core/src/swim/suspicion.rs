//! Confirms suspects whose timeout expired.

use super::GossipKind;
use super::context::{Context, millis};
use tracing::info;

/// Sweeps the membership list once per probe period.
#[derive(Debug)]
pub struct SuspicionController {
    next_check_at: u64,
}

impl Default for SuspicionController {
    fn default() -> Self {
        Self {
            next_check_at: u64::MAX,
        }
    }
}

impl SuspicionController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, now: u64) {
        self.next_check_at = now;
    }

    pub fn stop(&mut self) {
        self.next_check_at = u64::MAX;
    }

    pub fn next_deadline(&self) -> Option<u64> {
        (self.next_check_at != u64::MAX).then_some(self.next_check_at)
    }

    pub fn tick(&mut self, now: u64, ctx: &mut Context) {
        if now < self.next_check_at {
            return;
        }
        self.next_check_at = now.saturating_add(millis(ctx.config.probe_interval));

        for id in ctx.membership.expired_suspects(now) {
            let Some(member) = ctx.membership.confirm_member(&id, now) else {
                continue;
            };
            info!(
                "Suspicion of {} expired, confirming (incarnation {})",
                id, member.incarnation
            );
            ctx.gossip
                .add_membership_event(&member.info)
                .kind(GossipKind::Confirm)
                .gossip_term(member.incarnation)
                .enqueue();
        }

        ctx.membership
            .prune_tombstones(now, millis(ctx.config.tombstone_timeout));
    }
}
