//! WebSocket transport.
//!
//! Each request opens its own connection: the requester sends one binary
//! frame and reads one binary frame back, then the connection closes.
//! Protocol messages are small and infrequent, so there is no pooling.
//! A request the node discards is closed without a reply frame.

use super::{InboundRequest, Result, Transport, TransportError};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{WebSocketStream, accept_async_with_config, connect_async_with_config};
use tracing::{debug, info, warn};

/// Maximum size of one protocol frame (1MB). Sync snapshots are the largest.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

const INBOUND_CAPACITY: usize = 256;

/// Rejects oversized frames while they are read, not after buffering.
fn ws_config() -> WebSocketConfig {
    WebSocketConfig {
        max_message_size: Some(MAX_MESSAGE_SIZE),
        max_frame_size: Some(MAX_MESSAGE_SIZE),
        ..Default::default()
    }
}

pub struct WebSocketTransport {
    address: String,
    listener: Arc<TcpListener>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Bind `listen`. Other members reach us at `advertise`, or at the bound
    /// socket address when none is given.
    pub async fn bind(listen: &str, advertise: Option<String>) -> Result<Self> {
        let listener = TcpListener::bind(listen)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("bind {listen}: {e}")))?;
        let address = match advertise {
            Some(address) => address,
            None => listener
                .local_addr()
                .map_err(|e| TransportError::Other(e.to_string()))?
                .to_string(),
        };
        info!("WebSocket transport listening on {} (advertised as {})", listen, address);

        Ok(Self {
            address,
            listener: Arc::new(listener),
            accept_task: Mutex::new(None),
        })
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        let task = self
            .accept_task
            .get_mut()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            task.abort();
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn local_address(&self) -> &str {
        &self.address
    }

    async fn send(&self, address: &str, payload: Vec<u8>) -> Result<Vec<u8>> {
        let url = format!("ws://{address}");
        let (mut ws, _) = connect_async_with_config(url, Some(ws_config()), true)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{address}: {e}")))?;

        ws.send(Message::Binary(payload.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let reply = read_frame(&mut ws).await;
        let _ = ws.close(None).await;
        reply?.ok_or(TransportError::Closed)
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<InboundRequest>> {
        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        let listener = Arc::clone(&self.listener);
        let task = tokio::spawn(accept_loop(listener, tx));

        let previous = self
            .accept_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(rx)
    }
}

/// Accept connections until the subscriber goes away.
async fn accept_loop(listener: Arc<TcpListener>, tx: mpsc::Sender<InboundRequest>) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = tx.closed() => {
                debug!("Subscriber gone, no longer accepting connections");
                return;
            }
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = serve_request(stream, tx).await {
                debug!("Request from {} failed: {}", peer, e);
            }
        });
    }
}

/// Read one request frame, hand it to the node, write back its reply.
async fn serve_request(stream: TcpStream, tx: mpsc::Sender<InboundRequest>) -> Result<()> {
    let mut ws = accept_async_with_config(stream, Some(ws_config()))
        .await
        .map_err(|e| TransportError::ConnectionFailed(format!("handshake: {e}")))?;

    let Some(payload) = read_frame(&mut ws).await? else {
        return Ok(());
    };

    let (reply_tx, reply_rx) = oneshot::channel();
    tx.send(InboundRequest {
        payload,
        reply: reply_tx,
    })
    .await
    .map_err(|_| TransportError::Closed)?;

    // A dropped reply sender means the node discarded the request
    if let Ok(reply) = reply_rx.await {
        ws.send(Message::Binary(reply.into()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
    }
    let _ = ws.close(None).await;
    Ok(())
}

/// Next data frame, or `None` when the peer closed first.
async fn read_frame<S>(ws: &mut WebSocketStream<S>) -> Result<Option<Vec<u8>>>
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
    while let Some(frame) = ws.next().await {
        return match frame.map_err(|e| TransportError::Other(e.to_string()))? {
            Message::Binary(data) => Ok(Some(data.into())),
            Message::Text(text) => Ok(Some(text.into_bytes())),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            Message::Close(_) => Ok(None),
        };
    }
    Ok(None)
}
