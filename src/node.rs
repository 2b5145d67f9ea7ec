//! `NodeCore` (spec §4.7): wires every other component together behind a
//! single owning task, exposes `broadcast`/`on`/`teardown`, and owns the
//! three timers (presence, GC, switchboard). Grounded in the teacher's
//! kernel design: every producer (timers, per-connection transport-event
//! forwarders, the public handle) feeds one `mpsc` channel drained by one
//! task, so all reads/writes to `connections`/`seen`/`rude` stay serialized
//! without needing a lock (spec §5).

use crate::config::Config;
use crate::connection::Connection;
use crate::crypto::SigningKey;
use crate::error::NodeError;
use crate::event::{Event, EventBus, Listener, ListenerHandle};
use crate::rude_list::RudeList;
use crate::seen_memory::SeenMemory;
use crate::transport::loopback::LoopbackNetwork;
use crate::transport::{TransportEvent, TransportFactory};
use crate::types::{Address, ConnState, ConnectionId, PartialMessage, Role};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Constructor argument bundle (spec §6 "Embedding API").
pub struct NodeOpts {
    pub network_id: String,
    pub switch_address: String,
    pub identity: Identity,
    pub config: Config,
}

/// "a signing key pair, ... or address" (spec §2); §3 "Address" (a) or (b).
pub enum Identity {
    Signed(SigningKey),
    Unsigned(Address),
}

pub(crate) struct ManagerEvent {
    pub id: ConnectionId,
    pub event: TransportEvent,
}

pub(crate) struct SwitchboardTrigger {
    pub next_interval_tx: oneshot::Sender<Duration>,
}

pub(crate) enum LoopEvent {
    Command(Command),
    Manager(ManagerEvent),
    SwitchboardTick(SwitchboardTrigger),
    PresenceTick,
    GcTick,
}

pub(crate) enum Command {
    Broadcast(PartialMessage, oneshot::Sender<Result<(), NodeError>>),
    RegisterListener(Listener, oneshot::Sender<ListenerHandle>),
    RemoveListener(ListenerHandle),
    Connections(oneshot::Sender<Vec<ConnectionSnapshot>>),
    ActiveConnections(oneshot::Sender<Vec<ConnectionSnapshot>>),
    /// Cancels the scheduled switchboard task without tearing the node
    /// down (spec §4.4 "`stop()` cancels the scheduled task"; exercised
    /// directly by testable scenario 2, "switch-free healing").
    StopSwitchboard(oneshot::Sender<()>),
    /// Restarts the switchboard task if it isn't already running (spec
    /// §4.4 "the loop can be restarted by invoking the entry point
    /// again").
    StartSwitchboard(oneshot::Sender<()>),
    Teardown(oneshot::Sender<()>),
}

/// An immutable, cloneable view of a `Connection` for embedders (the real
/// `Connection` holds a `Box<dyn Transport>` and can't be handed out).
#[derive(Clone, Debug)]
pub struct ConnectionSnapshot {
    pub id: ConnectionId,
    pub role: Role,
    pub remote_address: Option<Address>,
    pub state: ConnState,
}

/// All mutable state, owned exclusively by the one task running
/// [`run_loop`]. Every other module's logic is implemented as inherent
/// methods on this type, split across files by spec component
/// (`connection_manager.rs`, `negotiator.rs`, `gossip.rs`,
/// `switchboard.rs`) even though there is only one owner.
pub(crate) struct CoreState {
    pub our_address: Address,
    pub network_id: String,
    pub switch_address: String,
    pub signing_key: Option<SigningKey>,
    pub config: Config,
    pub connections: HashMap<ConnectionId, Connection>,
    pub seen: SeenMemory,
    pub rude: RudeList,
    pub events: EventBus,
    pub transport_factory: Arc<dyn TransportFactory>,
    pub http: reqwest::Client,
    pub loop_tx: mpsc::UnboundedSender<LoopEvent>,
    pub log_lines: Vec<String>,
    /// Answers/offers generated locally that are waiting for the next
    /// switchboard POST to carry them back to their origin (spec §4.4,
    /// `ReplyVia::Switchboard`).
    pub pending_switchboard_items: Vec<crate::types::NegotiationItem>,
    /// The currently running switchboard scheduler task, if any (spec
    /// §4.4 `stop()`/restart). `None` after `StopSwitchboard` until a
    /// `StartSwitchboard` command spawns a fresh one.
    pub switchboard_handle: Option<JoinHandle<()>>,
}

impl CoreState {
    pub fn active_connection_count(&self) -> usize {
        self.connections.values().filter(|c| c.is_connected()).count()
    }
}

/// Composes ConnectionManager, Negotiator, GossipEngine, SwitchboardClient,
/// RudeList and SeenMemory; the public handle for embedders (spec §4.7,
/// §6).
pub struct NodeCore {
    cmd_tx: mpsc::UnboundedSender<Command>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeCore {
    /// Production constructor: connections use the real `webrtc`-crate
    /// transport unless the `sim` feature is active, in which case an
    /// in-process loopback network is used instead (see `transport::sim`).
    pub fn new(opts: NodeOpts) -> Result<Self, NodeError> {
        #[cfg(feature = "sim")]
        let factory: Arc<dyn TransportFactory> = LoopbackNetwork::new();
        #[cfg(not(feature = "sim"))]
        let factory: Arc<dyn TransportFactory> =
            Arc::new(crate::transport::webrtc_transport::WebRtcFactory::new(vec![
                "stun:stun.l.google.com:19302".to_string(),
            ]));
        Self::with_transport(opts, factory)
    }

    pub fn with_transport(opts: NodeOpts, transport_factory: Arc<dyn TransportFactory>) -> Result<Self, NodeError> {
        let (our_address, signing_key) = match opts.identity {
            Identity::Signed(key) => {
                let address = key.address().clone();
                (address, Some(key))
            }
            Identity::Unsigned(address) => (address, None),
        };

        let (loop_tx, loop_rx) = mpsc::unbounded_channel();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let config = opts.config;
        let initial_switchboard_interval = config.fast_switchboard_request_interval();
        let switchboard_handle = Some(tokio::spawn(switchboard_scheduler(loop_tx.clone(), initial_switchboard_interval)));

        let state = CoreState {
            our_address,
            network_id: opts.network_id,
            switch_address: opts.switch_address,
            signing_key,
            seen: SeenMemory::new(config.memory_duration()),
            rude: RudeList::new(config.max_message_rate_before_rude),
            connections: HashMap::new(),
            events: EventBus::default(),
            transport_factory,
            http: reqwest::Client::new(),
            loop_tx: loop_tx.clone(),
            log_lines: Vec::new(),
            pending_switchboard_items: Vec::new(),
            switchboard_handle,
            config,
        };

        let presence_interval = state.config.presence_broadcast_interval();
        let gc_interval = state.config.garbage_collect_interval();

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(presence_timer(loop_tx.clone(), presence_interval)));
        tasks.push(tokio::spawn(gc_timer(loop_tx.clone(), gc_interval)));
        tasks.push(tokio::spawn(command_forwarder(cmd_rx, loop_tx)));
        tasks.push(tokio::spawn(run_loop(state, loop_rx)));

        Ok(NodeCore { cmd_tx, tasks })
    }

    /// Forwards to `GossipEngine::broadcast` (spec §4.7). Missing `type` or
    /// `app_id` is the one synchronous contract violation the spec
    /// prescribes (§7).
    pub async fn broadcast(&self, partial: PartialMessage) -> Result<(), NodeError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Broadcast(partial, tx))
            .map_err(|_| NodeError::ShuttingDown)?;
        rx.await.map_err(|_| NodeError::ShuttingDown)?
    }

    pub async fn on<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::RegisterListener(Box::new(handler), tx));
        rx.await.unwrap_or(ListenerHandle(u64::MAX))
    }

    pub fn remove_listener(&self, handle: ListenerHandle) {
        let _ = self.cmd_tx.send(Command::RemoveListener(handle));
    }

    pub async fn connections(&self) -> Vec<ConnectionSnapshot> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Connections(tx));
        rx.await.unwrap_or_default()
    }

    pub async fn active_connections(&self) -> Vec<ConnectionSnapshot> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::ActiveConnections(tx));
        rx.await.unwrap_or_default()
    }

    /// Cancels the scheduled switchboard task, leaving every other timer
    /// and all existing Connections untouched (spec §4.4: "`stop()`
    /// cancels the scheduled task"). Used by the "switch-free healing"
    /// scenario (spec §8) to prove the mesh keeps discovering peers via
    /// in-band gossip alone once the switchboard is unreachable.
    pub async fn stop_switchboard_requests(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::StopSwitchboard(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Restarts the switchboard polling loop if it isn't already running
    /// (spec §4.4: "the loop can be restarted by invoking the entry point
    /// again"). A no-op if the switchboard task is already active.
    pub async fn start_switchboard_requests(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::StartSwitchboard(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stops the switchboard task, the presence timer and the GC timer;
    /// destroys all Connections; clears listeners. Idempotent and, once it
    /// returns, no further events are emitted and no further HTTP requests
    /// are initiated (spec §5 P9).
    pub async fn teardown(mut self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Teardown(tx)).is_ok() {
            let _ = rx.await;
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

async fn command_forwarder(mut cmd_rx: mpsc::UnboundedReceiver<Command>, loop_tx: mpsc::UnboundedSender<LoopEvent>) {
    while let Some(cmd) = cmd_rx.recv().await {
        if loop_tx.send(LoopEvent::Command(cmd)).is_err() {
            return;
        }
    }
}

async fn presence_timer(loop_tx: mpsc::UnboundedSender<LoopEvent>, interval: Duration) {
    loop {
        let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=100));
        tokio::time::sleep(interval + jitter).await;
        if loop_tx.send(LoopEvent::PresenceTick).is_err() {
            return;
        }
    }
}

async fn gc_timer(loop_tx: mpsc::UnboundedSender<LoopEvent>, interval: Duration) {
    loop {
        tokio::time::sleep(interval).await;
        if loop_tx.send(LoopEvent::GcTick).is_err() {
            return;
        }
    }
}

/// Adaptive-cadence scheduler (spec §4.4, P8). Sleeps, asks the loop to run
/// one switchboard tick, and is told the interval to use next — which
/// depends on `active_connections`, known only inside the loop.
async fn switchboard_scheduler(loop_tx: mpsc::UnboundedSender<LoopEvent>, initial_interval: Duration) {
    let mut interval = initial_interval;
    loop {
        tokio::time::sleep(interval).await;
        let (tx, rx) = oneshot::channel();
        if loop_tx
            .send(LoopEvent::SwitchboardTick(SwitchboardTrigger { next_interval_tx: tx }))
            .is_err()
        {
            return;
        }
        match rx.await {
            Ok(next) => interval = next,
            Err(_) => return,
        }
    }
}

async fn run_loop(mut state: CoreState, mut rx: mpsc::UnboundedReceiver<LoopEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            LoopEvent::Command(Command::Broadcast(partial, reply)) => {
                let result = state.broadcast(partial).await;
                let _ = reply.send(result);
            }
            LoopEvent::Command(Command::RegisterListener(handler, reply)) => {
                let handle = state.events.on(handler);
                let _ = reply.send(handle);
            }
            LoopEvent::Command(Command::RemoveListener(handle)) => {
                state.events.remove_listener(handle);
            }
            LoopEvent::Command(Command::Connections(reply)) => {
                let _ = reply.send(state.snapshot_connections(false));
            }
            LoopEvent::Command(Command::ActiveConnections(reply)) => {
                let _ = reply.send(state.snapshot_connections(true));
            }
            LoopEvent::Command(Command::StopSwitchboard(reply)) => {
                if let Some(handle) = state.switchboard_handle.take() {
                    handle.abort();
                }
                let _ = reply.send(());
            }
            LoopEvent::Command(Command::StartSwitchboard(reply)) => {
                if state.switchboard_handle.is_none() {
                    let interval = if state.active_connection_count() == 0 {
                        state.config.fast_switchboard_request_interval()
                    } else {
                        state.config.slow_switchboard_request_interval()
                    };
                    state.switchboard_handle = Some(tokio::spawn(switchboard_scheduler(state.loop_tx.clone(), interval)));
                }
                let _ = reply.send(());
            }
            LoopEvent::Command(Command::Teardown(reply)) => {
                state.teardown().await;
                let _ = reply.send(());
                return;
            }
            LoopEvent::Manager(manager_event) => {
                state.handle_transport_event(manager_event).await;
            }
            LoopEvent::PresenceTick => {
                state.broadcast_presence().await;
            }
            LoopEvent::GcTick => {
                state.gc().await;
            }
            LoopEvent::SwitchboardTick(trigger) => {
                state.run_switchboard_tick().await;
                let next = if state.active_connection_count() == 0 {
                    state.config.fast_switchboard_request_interval()
                } else {
                    state.config.slow_switchboard_request_interval()
                };
                let _ = trigger.next_interval_tx.send(next);
            }
        }
    }
}

impl CoreState {
    fn snapshot_connections(&self, active_only: bool) -> Vec<ConnectionSnapshot> {
        self.connections
            .values()
            .filter(|c| !active_only || c.is_connected())
            .map(|c| ConnectionSnapshot {
                id: c.id,
                role: c.role,
                remote_address: c.remote_address.clone(),
                state: c.state,
            })
            .collect()
    }

    async fn teardown(&mut self) {
        if let Some(handle) = self.switchboard_handle.take() {
            handle.abort();
        }
        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();
        for id in ids {
            self.destroy_connection(id).await;
        }
        self.events.clear();
    }
}
