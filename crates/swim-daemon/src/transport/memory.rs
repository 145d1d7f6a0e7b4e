//! In-process transport.
//!
//! Every `MemoryTransport` created from one `MemoryNetwork` can reach the
//! others by address. The network can kill members or cut links between
//! them; traffic over a dead link vanishes, so the requester only learns
//! about it through its own timeout, exactly like a crashed peer.

use super::{InboundRequest, Result, Transport, TransportError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

/// Queue depth of one member's inbound channel.
const INBOUND_CAPACITY: usize = 256;

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<String, mpsc::Sender<InboundRequest>>,
    killed: HashSet<String>,
    cut: HashSet<(String, String)>,
}

impl NetworkState {
    fn link_down(&self, from: &str, to: &str) -> bool {
        self.killed.contains(from)
            || self.killed.contains(to)
            || self.cut.contains(&link(from, to))
    }
}

fn link(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

enum Route {
    Open(mpsc::Sender<InboundRequest>),
    Down,
    Unknown,
}

/// Shared in-memory network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the transport for the member at `address`.
    pub fn endpoint(&self, address: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            address: address.into(),
            network: self.clone(),
        }
    }

    /// The member stops sending and receiving anything.
    pub fn kill(&self, address: &str) {
        self.lock().killed.insert(address.to_string());
    }

    pub fn revive(&self, address: &str) {
        self.lock().killed.remove(address);
    }

    /// Drop all traffic between `a` and `b`, both directions.
    pub fn disconnect(&self, a: &str, b: &str) {
        self.lock().cut.insert(link(a, b));
    }

    pub fn reconnect(&self, a: &str, b: &str) {
        self.lock().cut.remove(&link(a, b));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn route(&self, from: &str, to: &str) -> Route {
        let state = self.lock();
        if state.link_down(from, to) {
            return Route::Down;
        }
        match state.endpoints.get(to) {
            Some(tx) => Route::Open(tx.clone()),
            None => Route::Unknown,
        }
    }

    fn is_down(&self, from: &str, to: &str) -> bool {
        self.lock().link_down(from, to)
    }
}

/// One member's view of a `MemoryNetwork`.
pub struct MemoryTransport {
    address: String,
    network: MemoryNetwork,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_address(&self) -> &str {
        &self.address
    }

    async fn send(&self, address: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        let tx = match self.network.route(&self.address, address) {
            Route::Open(tx) => tx,
            Route::Down => {
                trace!("Link {} -> {} is down, request lost", self.address, address);
                return futures::future::pending().await;
            }
            Route::Unknown => {
                return Err(TransportError::ConnectionFailed(format!(
                    "no member listening at {address}"
                )));
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(InboundRequest {
            payload,
            reply: reply_tx,
        })
        .await
        .map_err(|_| TransportError::ConnectionFailed(format!("{address} stopped listening")))?;

        let reply = reply_rx.await.map_err(|_| TransportError::Closed)?;

        // The link may have gone down while the request was in flight
        if self.network.is_down(address, &self.address) {
            return futures::future::pending().await;
        }
        Ok(reply)
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<InboundRequest>> {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        self.network.lock().endpoints.insert(self.address.clone(), tx);
        Ok(rx)
    }
}
