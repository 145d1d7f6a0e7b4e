//! Tokio scheduler for one `SwimNode`.
//!
//! The runtime task is the node's only owner. It sleeps until the node's
//! next timer, or until a response, a command or a batch of inbound
//! requests arrives, feeds that to the node, then carries out the effects
//! the node queued. Everyone else talks to it through a [`NodeHandle`].

use crate::error::{DaemonError, Result};
use crate::poll::PollController;
use crate::transport::Transport;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use swim_core::{
    Effect, EventBus, InboundId, Member, MemberId, MemberInfo, MembershipChange, RequestFailure,
    RequestId, Response, Subscription, SwimConfig, SwimMessage, SwimNode,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Roughly thirty years; stands in for deadlines that overflow `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Commands queued by handles for the runtime task.
enum Command {
    Join {
        contacts: Vec<String>,
        done: oneshot::Sender<Result<()>>,
    },
    Leave {
        done: oneshot::Sender<Result<()>>,
    },
    SetProperty {
        key: String,
        value: String,
    },
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Read-only copy of the node's state, refreshed after every step.
struct ClusterView {
    local: Member,
    members: Vec<Member>,
    joined: bool,
}

impl ClusterView {
    fn is_alive(&self, id: &MemberId) -> bool {
        if *id == self.local.id() {
            return self.joined && self.local.is_alive();
        }
        self.members.iter().any(|m| m.id() == *id && m.is_alive())
    }
}

pub struct NodeRuntime {
    node: SwimNode,
    transport: Arc<dyn Transport>,
    poll: PollController,
    epoch: Instant,
    /// Outbound requests still on the wire
    in_flight: HashMap<RequestId, JoinHandle<()>>,
    /// Inbound requests awaiting a reply or a discard
    inbound: HashMap<InboundId, oneshot::Sender<Vec<u8>>>,
    responses_tx: mpsc::UnboundedSender<(RequestId, Response)>,
    responses_rx: mpsc::UnboundedReceiver<(RequestId, Response)>,
    commands: mpsc::Receiver<Command>,
    join_waiters: Vec<oneshot::Sender<Result<()>>>,
    leave_waiters: Vec<oneshot::Sender<Result<()>>>,
    view: Arc<RwLock<ClusterView>>,
    events: Arc<EventBus>,
}

impl NodeRuntime {
    /// Start a node that listens on `transport` and return its handle.
    ///
    /// The node is idle until [`NodeHandle::join`] is called.
    pub fn spawn(
        member_id: MemberId,
        transport: Arc<dyn Transport>,
        config: SwimConfig,
        poll_limit: usize,
    ) -> NodeHandle {
        let info = MemberInfo::new(member_id, transport.local_address());
        let node = SwimNode::new(info.clone(), initial_incarnation(), config);

        let (responses_tx, responses_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands) = mpsc::channel(64);
        let view = Arc::new(RwLock::new(ClusterView {
            local: node.local_member().clone(),
            members: Vec::new(),
            joined: false,
        }));
        let events = Arc::new(EventBus::new());

        let runtime = Self {
            node,
            poll: PollController::new(Arc::clone(&transport), poll_limit),
            transport,
            epoch: Instant::now(),
            in_flight: HashMap::new(),
            inbound: HashMap::new(),
            responses_tx,
            responses_rx,
            commands,
            join_waiters: Vec::new(),
            leave_waiters: Vec::new(),
            view: Arc::clone(&view),
            events: Arc::clone(&events),
        };
        tokio::spawn(runtime.run());

        NodeHandle {
            info,
            commands: commands_tx,
            view,
            events,
        }
    }

    async fn run(mut self) {
        debug!("Runtime for {} started", self.node.local_id());
        loop {
            let wakeup = self.node.next_wakeup().map(|at| self.instant(at));

            tokio::select! {
                _ = sleep_until(wakeup) => {
                    let now = self.now();
                    self.node.tick(now);
                }
                Some((request, response)) = self.responses_rx.recv() => {
                    self.in_flight.remove(&request);
                    let now = self.now();
                    self.node.handle_response(request, response, now);
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { done }) => {
                        self.stop();
                        let _ = done.send(());
                        return;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        self.stop();
                        return;
                    }
                },
                batch = self.poll.next_batch() => {
                    for request in batch {
                        self.on_request(request.payload, request.reply);
                    }
                }
            }

            self.apply_effects();
            self.publish();
        }
    }

    fn on_command(&mut self, command: Command) {
        let now = self.now();
        match command {
            Command::Join { contacts, done } => match self.node.join(contacts, now) {
                Ok(()) => self.join_waiters.push(done),
                Err(e) => {
                    let _ = done.send(Err(e.into()));
                }
            },
            Command::Leave { done } => match self.node.leave(now) {
                Ok(()) => self.leave_waiters.push(done),
                Err(e) => {
                    let _ = done.send(Err(e.into()));
                }
            },
            Command::SetProperty { key, value } => self.node.set_property(key, value),
            Command::Shutdown { .. } => {}
        }
    }

    fn on_request(&mut self, payload: Vec<u8>, reply: oneshot::Sender<Vec<u8>>) {
        let message = match SwimMessage::decode(&payload) {
            Ok(message) => message,
            Err(e) => {
                warn!("Dropping undecodable request ({} bytes): {}", payload.len(), e);
                return;
            }
        };
        let now = self.now();
        let inbound = self.node.handle_request(message, now);
        self.inbound.insert(inbound, reply);
    }

    fn apply_effects(&mut self) {
        for effect in self.node.drain_effects() {
            match effect {
                Effect::Send {
                    request,
                    to,
                    message,
                    timeout,
                } => self.spawn_request(request, to, message, timeout),
                Effect::Reply { inbound, message } => {
                    let Some(reply) = self.inbound.remove(&inbound) else {
                        trace!("Reply for unknown inbound request {}", inbound);
                        continue;
                    };
                    match message.encode() {
                        Ok(payload) => {
                            let _ = reply.send(payload);
                        }
                        Err(e) => warn!("Failed to encode {}: {}", message.kind(), e),
                    }
                }
                Effect::Discard { inbound } => {
                    self.inbound.remove(&inbound);
                }
                Effect::Close { request } => {
                    if let Some(task) = self.in_flight.remove(&request) {
                        task.abort();
                    }
                }
                Effect::Joined => {
                    info!(
                        "Joined cluster as {} ({} other members)",
                        self.node.local_id(),
                        self.node.members().len()
                    );
                    for waiter in self.join_waiters.drain(..) {
                        let _ = waiter.send(Ok(()));
                    }
                }
                Effect::Left => {
                    info!("Left cluster");
                    for waiter in self.leave_waiters.drain(..) {
                        let _ = waiter.send(Ok(()));
                    }
                }
            }
        }
    }

    fn spawn_request(
        &mut self,
        request: RequestId,
        to: String,
        message: SwimMessage,
        timeout: Duration,
    ) {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(e) => {
                let failure = RequestFailure::Malformed(e.to_string());
                let _ = self.responses_tx.send((request, Err(failure)));
                return;
            }
        };

        let transport = Arc::clone(&self.transport);
        let responses = self.responses_tx.clone();
        let task = tokio::spawn(async move {
            let response = match tokio::time::timeout(timeout, transport.send(&to, payload)).await
            {
                Err(_) => Err(RequestFailure::Timeout),
                Ok(Err(e)) => Err(RequestFailure::Unreachable(e.to_string())),
                Ok(Ok(reply)) => SwimMessage::decode(&reply)
                    .map_err(|e| RequestFailure::Malformed(e.to_string())),
            };
            let _ = responses.send((request, response));
        });
        self.in_flight.insert(request, task);
    }

    fn publish(&mut self) {
        for change in self.node.drain_changes() {
            log_change(&change);
            self.events.emit(change);
        }

        let mut view = self.view.write().unwrap_or_else(|e| e.into_inner());
        view.local = self.node.local_member().clone();
        view.members = self.node.members();
        view.joined = self.node.is_joined();
    }

    fn stop(&mut self) {
        for (_, task) in self.in_flight.drain() {
            task.abort();
        }
        self.inbound.clear();
        info!("Runtime for {} stopped", self.node.local_id());
    }

    fn now(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn instant(&self, at: u64) -> Instant {
        deadline_instant(self.epoch, at)
    }
}

/// `epoch + at` ms, never further out than `FAR_FUTURE`.
fn deadline_instant(epoch: Instant, at: u64) -> Instant {
    epoch + Duration::from_millis(at).min(FAR_FUTURE)
}

fn log_change(change: &MembershipChange) {
    let member = change.member();
    match change {
        MembershipChange::MemberAdded(_) => debug!("Change: {} added", member.id()),
        MembershipChange::MemberRemoved(_) => debug!("Change: {} removed", member.id()),
        MembershipChange::ReachabilityChanged(_) => {
            debug!("Change: {} is now {:?}", member.id(), member.status)
        }
        MembershipChange::MetadataChanged(_) => debug!("Change: {} metadata", member.id()),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => futures::future::pending().await,
    }
}

/// Wall-clock milliseconds, so a restarted member outranks its old life.
fn initial_incarnation() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Handle to a running node. Cheap to clone.
#[derive(Clone)]
pub struct NodeHandle {
    info: MemberInfo,
    commands: mpsc::Sender<Command>,
    view: Arc<RwLock<ClusterView>>,
    events: Arc<EventBus>,
}

impl NodeHandle {
    pub fn member_id(&self) -> MemberId {
        self.info.id
    }

    pub fn address(&self) -> &str {
        &self.info.address
    }

    /// Join the cluster through `contacts`.
    ///
    /// Fails right away on an empty contact list or when already joining or
    /// joined. Otherwise resolves once joined, retrying for as long as it
    /// takes; wrap it in a timeout to bound the wait.
    pub async fn join(&self, contacts: Vec<String>) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Join { contacts, done }).await?;
        rx.await.map_err(|_| DaemonError::Stopped)?
    }

    /// Leave the cluster. Resolves within the configured leave timeout.
    pub async fn leave(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.command(Command::Leave { done }).await?;
        rx.await.map_err(|_| DaemonError::Stopped)?
    }

    /// Set a property on this member and gossip it to the cluster.
    pub async fn set_property(
        &self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<()> {
        self.command(Command::SetProperty {
            key: key.into(),
            value: value.into(),
        })
        .await
    }

    /// Stop the runtime without leaving. Other members will detect it as failed.
    pub async fn shutdown(&self) {
        let (done, rx) = oneshot::channel();
        if self.command(Command::Shutdown { done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub fn is_alive(&self, id: &MemberId) -> bool {
        self.read_view().is_alive(id)
    }

    pub fn is_joined(&self) -> bool {
        self.read_view().joined
    }

    /// Remote members currently known.
    pub fn members(&self) -> Vec<Member> {
        self.read_view().members.clone()
    }

    pub fn local_member(&self) -> Member {
        self.read_view().local.clone()
    }

    /// Call `callback` for every membership change. Drop the returned
    /// subscription to stop.
    pub fn subscribe(
        &self,
        callback: impl Fn(MembershipChange) + Send + Sync + 'static,
    ) -> Subscription {
        self.events.subscribe(callback)
    }

    async fn command(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| DaemonError::Stopped)
    }

    fn read_view(&self) -> std::sync::RwLockReadGuard<'_, ClusterView> {
        self.view.read().unwrap_or_else(|e| e.into_inner())
    }
}
