//! swim-core: Cluster membership and failure detection using the SWIM protocol.
//!
//! This crate provides the core functionality for:
//! - Tracking cluster members, their status and incarnation numbers
//! - Detecting failed members with direct and indirect probes
//! - Disseminating membership events by piggybacking on protocol traffic
//! - Periodic full-membership sync between members
//!
//! The protocol is pure state: callers feed it time, inbound requests and
//! request outcomes, and carry out the [`Effect`]s it returns.

pub mod error;
pub mod events;
pub mod member_id;
pub mod swim;

pub use error::{Result, SwimError};
pub use events::{EventBus, Subscription};
pub use member_id::{MemberId, MemberIdError};
pub use swim::{
    Effect, GossipKind, InboundId, Member, MemberInfo, MemberStatus, MembershipChange,
    RequestFailure, RequestId, Response, SwimConfig, SwimMessage, SwimNode,
};
