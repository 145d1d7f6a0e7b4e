//! Request/response transport the runtime sends protocol messages over.
//!
//! Implementations:
//! - Memory: in-process network with fault injection (tests, demos)
//! - WebSocket: one connection per request (daemon)

pub mod memory;
pub mod websocket;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

pub use memory::{MemoryNetwork, MemoryTransport};
pub use websocket::WebSocketTransport;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection closed before a reply arrived")]
    Closed,

    #[error("Transport error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A request delivered to this node.
///
/// Answer it by sending on `reply`. Dropping `reply` closes the request
/// without an answer, which the requester sees as a failure.
#[derive(Debug)]
pub struct InboundRequest {
    pub payload: Vec<u8>,
    pub reply: oneshot::Sender<Vec<u8>>,
}

/// Transport layer for protocol traffic
#[async_trait]
pub trait Transport: Send + Sync {
    /// The address other members reach us at
    fn local_address(&self) -> &str;

    /// Send one request and wait for its reply
    async fn send(&self, address: &str, payload: Vec<u8>) -> Result<Vec<u8>>;

    /// Start receiving requests. A new subscription replaces any earlier one.
    async fn subscribe(&self) -> Result<mpsc::Receiver<InboundRequest>>;
}
