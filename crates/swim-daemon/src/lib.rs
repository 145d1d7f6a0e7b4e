//! swim-daemon library: tokio runtime and transports for `swim-core`.
//!
//! The binary is a thin layer over these modules; integration tests drive
//! whole clusters through them over the in-memory transport.

pub mod config;
pub mod error;
pub mod poll;
pub mod runtime;
pub mod transport;

// Re-export key types for convenience
pub use config::{ConfigError, DaemonConfig, Overrides};
pub use error::{DaemonError, Result};
pub use poll::{DEFAULT_POLL_LIMIT, PollController};
pub use runtime::{NodeHandle, NodeRuntime};
pub use transport::{
    InboundRequest, MemoryNetwork, MemoryTransport, Transport, TransportError, WebSocketTransport,
};
