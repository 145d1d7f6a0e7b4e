//! SWIM (Scalable Weakly-consistent Infection-style Membership) protocol implementation.
//!
//! Runtime-agnostic: the same code runs under any scheduler that can call
//! [`SwimNode::tick`] and carry [`Effect`]s over a request/response transport.
//!
//! # Protocol Overview
//!
//! **Failure Detection:**
//! 1. Each member pings the next member in round-robin order every probe period
//! 2. If no ack within timeout, ask k other members to ping it (PING-REQ)
//! 3. If no relayed ack either, mark it suspect
//! 4. If the suspicion is not refuted in time, confirm it dead and remove it
//!
//! **Dissemination:**
//! - Membership events (`Join`, `Suspect`, `Confirm`, `Leave`) ride on every
//!   ping, ack and sync request, each a bounded number of times
//! - A periodic full sync with one member repairs whatever gossip lost
//!
//! **Ordering:**
//! - Each member owns its incarnation number and raises it on join, leave,
//!   metadata change, and to refute suspicion; it is the only tie-breaker

pub mod config;
pub mod context;
pub mod dissemination;
pub mod join;
pub mod membership;
pub mod messages;
pub mod node;
pub mod probe;
pub mod relay;
pub mod suspicion;
pub mod sync;

pub use config::SwimConfig;
pub use context::{Effect, InboundId, RequestFailure, RequestId, Response};
pub use dissemination::{Dissemination, EventBuilder};
pub use join::{JoinController, JoinState};
pub use membership::{Applied, Member, MembershipChange, MembershipList, RoundRobin};
pub use messages::{GossipEvent, GossipKind, MemberInfo, MemberSnapshot, MemberStatus, SwimMessage};
pub use node::SwimNode;
pub use probe::{ProbeController, ProbeState};
pub use relay::RelayHandler;
pub use suspicion::SuspicionController;
pub use sync::{SyncController, SyncState};
