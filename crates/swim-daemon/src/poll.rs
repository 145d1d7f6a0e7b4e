//! Inbound request polling.
//!
//! Keeps a transport subscription open and hands the runtime bounded
//! batches of inbound requests. If the subscription cannot be opened, or
//! closes underneath us, it backs off and opens a new one.

use crate::transport::{InboundRequest, Transport, TransportError};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default number of inbound requests handled per poll.
pub const DEFAULT_POLL_LIMIT: usize = 64;

/// Wait before reopening a failed subscription.
const RESUBSCRIBE_BACKOFF: Duration = Duration::from_millis(500);

type OpenFuture = BoxFuture<'static, Result<mpsc::Receiver<InboundRequest>, TransportError>>;

pub enum PollState {
    OpenSubscription,
    AwaitOpen(OpenFuture),
    Backoff { until: Instant },
    Poll(mpsc::Receiver<InboundRequest>),
}

impl std::fmt::Debug for PollState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenSubscription => write!(f, "OpenSubscription"),
            Self::AwaitOpen(_) => write!(f, "AwaitOpen"),
            Self::Backoff { until } => f.debug_struct("Backoff").field("until", until).finish(),
            Self::Poll(_) => write!(f, "Poll"),
        }
    }
}

pub struct PollController {
    transport: Arc<dyn Transport>,
    state: PollState,
    poll_limit: usize,
}

impl PollController {
    pub fn new(transport: Arc<dyn Transport>, poll_limit: usize) -> Self {
        Self {
            transport,
            state: PollState::OpenSubscription,
            poll_limit: poll_limit.max(1),
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// Wait for the next batch of at most `poll_limit` requests.
    ///
    /// Cancel safe: every await point leaves the state intact, so the
    /// runtime can drop this future in a `select!` and call it again.
    pub async fn next_batch(&mut self) -> Vec<InboundRequest> {
        loop {
            match &mut self.state {
                PollState::OpenSubscription => {
                    let transport = Arc::clone(&self.transport);
                    self.state =
                        PollState::AwaitOpen(Box::pin(async move { transport.subscribe().await }));
                }
                PollState::AwaitOpen(open) => match open.await {
                    Ok(rx) => {
                        info!("Listening on {}", self.transport.local_address());
                        self.state = PollState::Poll(rx);
                    }
                    Err(e) => {
                        warn!("Failed to open subscription: {}", e);
                        self.state = PollState::Backoff {
                            until: Instant::now() + RESUBSCRIBE_BACKOFF,
                        };
                    }
                },
                PollState::Backoff { until } => {
                    tokio::time::sleep_until(*until).await;
                    self.state = PollState::OpenSubscription;
                }
                PollState::Poll(rx) => {
                    let Some(first) = rx.recv().await else {
                        warn!("Subscription closed, reopening");
                        self.state = PollState::Backoff {
                            until: Instant::now() + RESUBSCRIBE_BACKOFF,
                        };
                        continue;
                    };

                    let mut batch = vec![first];
                    while batch.len() < self.poll_limit {
                        match rx.try_recv() {
                            Ok(request) => batch.push(request),
                            Err(_) => break,
                        }
                    }
                    if batch.len() == self.poll_limit {
                        debug!("Poll limit of {} reached, deferring the rest", self.poll_limit);
                    }
                    return batch;
                }
            }
        }
    }
}
