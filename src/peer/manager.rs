//! Peer manager module
//!
//! Drives every peer connection through its state machine and provides a
//! uniform send/receive API regardless of per-peer state. One loop task
//! owns the registry; relay and transport events are queued onto it, so
//! state transitions for a peer never interleave.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use crate::channel::{ChannelEvent, RelayChannel};
use crate::error::LinkError;
use crate::peer::{PeerConnection, PeerRole, PeerState, PeerSummary};
use crate::signal::{Message, MessageKind, SignalEnvelope};
use crate::transport::{TransportEvent, TransportFactory};

/// Tunables for a connection manager
#[derive(Debug, Clone, Copy)]
pub struct ManagerConfig {
    /// Deadline for a connect to reach the Connected state
    pub connect_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
        }
    }
}

enum Command {
    Connect {
        peer_id: String,
        reply: oneshot::Sender<Result<(), LinkError>>,
    },
    Disconnect {
        peer_id: String,
    },
    Send {
        message: Message,
    },
    ListConnected {
        reply: oneshot::Sender<Vec<String>>,
    },
    Summaries {
        reply: oneshot::Sender<Vec<PeerSummary>>,
    },
    IsConnected {
        peer_id: String,
        reply: oneshot::Sender<bool>,
    },
    Subscribe {
        reply: oneshot::Sender<mpsc::UnboundedReceiver<Message>>,
    },
    Channel(ChannelEvent),
    Transport {
        peer_id: String,
        generation: u64,
        event: TransportEvent,
    },
    ConnectTimeout {
        peer_id: String,
        generation: u64,
    },
    Shutdown,
}

/// Handle to a running connection manager
///
/// Cloneable; all clones talk to the same loop. The manager runs until
/// [`PeerManager::shutdown`] is called.
#[derive(Clone)]
pub struct PeerManager {
    session_id: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl PeerManager {
    /// Spawn a connection manager over a relay channel and transport factory
    pub fn new(
        channel: Box<dyn RelayChannel>,
        channel_events: mpsc::UnboundedReceiver<ChannelEvent>,
        transports: Arc<dyn TransportFactory>,
        config: ManagerConfig,
    ) -> Self {
        let session_id = channel.session_id().to_string();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        // Relay events become loop commands; nothing from the channel runs
        // against manager state directly.
        let forward_tx = cmd_tx.clone();
        let mut events = channel_events;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if forward_tx.send(Command::Channel(event)).is_err() {
                    return;
                }
            }
            let _ = forward_tx.send(Command::Channel(ChannelEvent::Closed));
        });

        let looper = ManagerLoop {
            session_id: session_id.clone(),
            channel,
            transports,
            config,
            registry: HashMap::new(),
            waiters: HashMap::new(),
            subscriber: None,
            next_generation: 1,
            cmd_tx: cmd_tx.clone(),
            channel_open: true,
        };
        tokio::spawn(looper.run(cmd_rx));

        Self { session_id, cmd_tx }
    }

    /// The relay-assigned session id this manager is reachable under
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Establish a data channel to a peer
    ///
    /// Resolves when the connection reaches Connected; rejects with the
    /// terminal error when it reaches Failed. A connect while one is
    /// already in flight (or established) for the same peer attaches to
    /// the existing outcome instead of starting a second handshake.
    pub async fn connect(&self, peer_id: &str) -> Result<(), LinkError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Connect {
                peer_id: peer_id.to_string(),
                reply,
            })
            .map_err(|_| LinkError::closed("manager is shut down"))?;
        rx.await.map_err(|_| LinkError::closed("manager is shut down"))?
    }

    /// Tear down the connection to a peer
    ///
    /// Idempotent for absent or already-terminal peers. A connect still
    /// pending for the peer resolves with a cancellation error.
    pub fn disconnect(&self, peer_id: &str) {
        let _ = self.cmd_tx.send(Command::Disconnect {
            peer_id: peer_id.to_string(),
        });
    }

    /// Broadcast a message to every connected peer, best effort
    ///
    /// The timestamp is assigned here, at call time. Peers not currently
    /// Connected are skipped silently; with zero connected peers this
    /// performs no transport writes at all.
    pub fn send(&self, kind: MessageKind, payload: serde_json::Value) {
        let message = Message::stamped(kind, payload);
        let _ = self.cmd_tx.send(Command::Send { message });
    }

    /// Snapshot of peer ids currently Connected
    pub async fn list_connected(&self) -> Vec<String> {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::ListConnected { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Number of peers currently Connected
    pub async fn connected_count(&self) -> usize {
        self.list_connected().await.len()
    }

    /// Check whether a specific peer is Connected
    pub async fn is_connected(&self, peer_id: &str) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Command::IsConnected {
                peer_id: peer_id.to_string(),
                reply,
            })
            .is_err()
        {
            return false;
        }
        rx.await.unwrap_or(false)
    }

    /// Snapshot of every record in the registry
    pub async fn summaries(&self) -> Vec<PeerSummary> {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Summaries { reply }).is_err() {
            return Vec::new();
        }
        rx.await.unwrap_or_default()
    }

    /// Register the inbound message subscription
    ///
    /// Each received message is delivered exactly once, in transport
    /// order per peer. Subscribing again replaces the previous receiver.
    pub async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Message>, LinkError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Subscribe { reply })
            .map_err(|_| LinkError::closed("manager is shut down"))?;
        rx.await.map_err(|_| LinkError::closed("manager is shut down"))
    }

    /// Stop the manager, releasing every transport and the relay channel
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
    }
}

struct ManagerLoop {
    session_id: String,
    channel: Box<dyn RelayChannel>,
    transports: Arc<dyn TransportFactory>,
    config: ManagerConfig,
    registry: HashMap<String, PeerConnection>,
    waiters: HashMap<String, Vec<oneshot::Sender<Result<(), LinkError>>>>,
    subscriber: Option<mpsc::UnboundedSender<Message>>,
    next_generation: u64,
    cmd_tx: mpsc::UnboundedSender<Command>,
    channel_open: bool,
}

impl ManagerLoop {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        debug!("Connection manager loop started for session {}", self.session_id);
        while let Some(command) = cmd_rx.recv().await {
            match command {
                Command::Connect { peer_id, reply } => self.handle_connect(peer_id, reply).await,
                Command::Disconnect { peer_id } => {
                    self.teardown_peer(&peer_id, LinkError::closed("connect cancelled by disconnect"));
                }
                Command::Send { message } => self.handle_send(message).await,
                Command::ListConnected { reply } => {
                    let _ = reply.send(self.connected_ids());
                }
                Command::Summaries { reply } => {
                    let _ = reply.send(self.registry.values().map(|c| c.summary()).collect());
                }
                Command::IsConnected { peer_id, reply } => {
                    let connected = self
                        .registry
                        .get(&peer_id)
                        .map(|c| c.is_connected())
                        .unwrap_or(false);
                    let _ = reply.send(connected);
                }
                Command::Subscribe { reply } => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    self.subscriber = Some(tx);
                    let _ = reply.send(rx);
                }
                Command::Channel(event) => self.handle_channel_event(event),
                Command::Transport {
                    peer_id,
                    generation,
                    event,
                } => self.handle_transport_event(peer_id, generation, event).await,
                Command::ConnectTimeout { peer_id, generation } => {
                    self.handle_connect_timeout(&peer_id, generation);
                }
                Command::Shutdown => break,
            }
        }
        self.teardown().await;
    }

    fn connected_ids(&self) -> Vec<String> {
        self.registry
            .values()
            .filter(|c| c.is_connected())
            .map(|c| c.peer_id.clone())
            .collect()
    }

    async fn handle_connect(&mut self, peer_id: String, reply: oneshot::Sender<Result<(), LinkError>>) {
        match self.registry.get(&peer_id) {
            Some(conn) if conn.state == PeerState::Connected => {
                debug!("Peer {} already connected; connect is a no-op", peer_id);
                let _ = reply.send(Ok(()));
                return;
            }
            Some(conn) if conn.state == PeerState::Signaling => {
                debug!("Connect to {} already in flight; joining its outcome", peer_id);
                self.waiters.entry(peer_id).or_default().push(reply);
                return;
            }
            _ => {}
        }
        if !self.channel_open {
            let _ = reply.send(Err(LinkError::channel_error("Relay channel is closed")));
            return;
        }

        info!("Connecting to peer {}", peer_id);
        let generation = self.open_transport(&peer_id, PeerRole::Initiator);
        self.waiters.entry(peer_id.clone()).or_default().push(reply);
        if let Err(e) = self.channel.join_signaling(&peer_id).await {
            warn!("Failed to join signaling toward {}: {}", peer_id, e);
            self.fail_peer(
                &peer_id,
                LinkError::channel_error_with_source("Failed to join signaling", e.to_string()),
            );
            return;
        }
        self.arm_timeout(&peer_id, generation);
    }

    /// Create a fresh record with its transport and event forwarder
    fn open_transport(&mut self, peer_id: &str, role: PeerRole) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let transport = self.transports.open(peer_id, role, event_tx);
        self.registry.insert(
            peer_id.to_string(),
            PeerConnection::new(peer_id, role, generation, transport),
        );

        let cmd_tx = self.cmd_tx.clone();
        let id = peer_id.to_string();
        tokio::spawn(async move {
            while let Some(event) = event_rx.recv().await {
                let command = Command::Transport {
                    peer_id: id.clone(),
                    generation,
                    event,
                };
                if cmd_tx.send(command).is_err() {
                    return;
                }
            }
        });
        generation
    }

    fn arm_timeout(&self, peer_id: &str, generation: u64) {
        let cmd_tx = self.cmd_tx.clone();
        let peer_id = peer_id.to_string();
        let deadline = self.config.connect_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let _ = cmd_tx.send(Command::ConnectTimeout { peer_id, generation });
        });
    }

    /// Move a record to Failed, release its transport, reject its waiters
    fn fail_peer(&mut self, peer_id: &str, error: LinkError) {
        if let Some(conn) = self.registry.get_mut(peer_id) {
            if !conn.state.is_terminal() {
                conn.set_state(PeerState::Failed);
            }
            if let Some(mut transport) = conn.take_transport() {
                tokio::spawn(async move { transport.close().await });
            }
        }
        self.drain_waiters(peer_id, Err(error));
    }

    /// Move a record to Disconnected, release its transport, cancel waiters
    fn teardown_peer(&mut self, peer_id: &str, cancel: LinkError) {
        let Some(conn) = self.registry.get_mut(peer_id) else {
            debug!("Disconnect for unknown peer {} is a no-op", peer_id);
            return;
        };
        if conn.state.is_terminal() {
            debug!("Disconnect for already-terminal peer {} is a no-op", peer_id);
            return;
        }
        info!("Disconnecting peer {}", peer_id);
        conn.set_state(PeerState::Disconnected);
        if let Some(mut transport) = conn.take_transport() {
            tokio::spawn(async move { transport.close().await });
        }
        self.drain_waiters(peer_id, Err(cancel));
    }

    fn drain_waiters(&mut self, peer_id: &str, outcome: Result<(), LinkError>) {
        if let Some(list) = self.waiters.remove(peer_id) {
            for waiter in list {
                let _ = waiter.send(outcome.clone());
            }
        }
    }

    fn handle_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Signal { from_id, signal_blob } => {
                let live = self
                    .registry
                    .get(&from_id)
                    .map(|c| !c.state.is_terminal())
                    .unwrap_or(false);
                if !live {
                    // No live record for the sender: either it was never
                    // seen or its old record is torn down. The remote side
                    // initiated, so answer with a fresh responder record.
                    info!("Incoming signaling from {}; creating responder connection", from_id);
                    let generation = self.open_transport(&from_id, PeerRole::Responder);
                    self.arm_timeout(&from_id, generation);
                }
                if let Some(conn) = self.registry.get_mut(&from_id) {
                    if let Some(transport) = conn.transport_mut() {
                        transport.signal(signal_blob);
                    }
                }
            }
            ChannelEvent::PeerDisconnected { peer_id } => {
                debug!("Relay reports peer {} disconnected", peer_id);
                match self.registry.get(&peer_id).map(|c| c.state) {
                    Some(PeerState::Signaling) => {
                        self.fail_peer(
                            &peer_id,
                            LinkError::transport_error_with_peer(
                                "Peer disconnected during signaling",
                                peer_id.as_str(),
                            ),
                        );
                    }
                    Some(PeerState::Connected) => {
                        self.teardown_peer(&peer_id, LinkError::closed("peer disconnected"));
                    }
                    _ => {}
                }
            }
            ChannelEvent::Closed => {
                if !self.channel_open {
                    return;
                }
                self.channel_open = false;
                warn!("Relay channel closed; failing connections still signaling");
                let signaling: Vec<String> = self
                    .registry
                    .values()
                    .filter(|c| c.state == PeerState::Signaling)
                    .map(|c| c.peer_id.clone())
                    .collect();
                for peer_id in signaling {
                    self.fail_peer(
                        &peer_id,
                        LinkError::channel_error("Relay channel closed during signaling"),
                    );
                }
                // Established data channels bypass the relay and stay up.
            }
        }
    }

    async fn handle_transport_event(&mut self, peer_id: String, generation: u64, event: TransportEvent) {
        let Some((state, current)) = self
            .registry
            .get(&peer_id)
            .map(|c| (c.state, c.generation))
        else {
            trace!("Dropping transport event for unknown peer {}", peer_id);
            return;
        };
        if current != generation {
            trace!("Dropping stale transport event for peer {} (generation {})", peer_id, generation);
            return;
        }

        match event {
            TransportEvent::Signal(blob) => {
                if state.is_terminal() {
                    return;
                }
                let envelope = SignalEnvelope::new(blob, peer_id.clone());
                if let Err(e) = self.channel.send_signal(envelope).await {
                    warn!("Failed to relay signal for peer {}: {}", peer_id, e);
                }
            }
            TransportEvent::Connected => {
                if state == PeerState::Signaling {
                    if let Some(conn) = self.registry.get_mut(&peer_id) {
                        conn.set_state(PeerState::Connected);
                    }
                    info!("Peer {} connected", peer_id);
                    self.drain_waiters(&peer_id, Ok(()));
                } else {
                    debug!("Ignoring transport open for peer {} in state {:?}", peer_id, state);
                }
            }
            TransportEvent::Data(bytes) => {
                if !state.is_connected() {
                    debug!("Dropping data from peer {} in state {:?}", peer_id, state);
                    return;
                }
                match Message::from_bytes(&bytes) {
                    Ok(message) => {
                        trace!("Received {} message from peer {}", message.kind.as_str(), peer_id);
                        if let Some(subscriber) = &self.subscriber {
                            if subscriber.send(message).is_err() {
                                debug!("Subscriber is gone; dropping inbound message");
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Dropping malformed message from peer {}: {}", peer_id, e);
                    }
                }
            }
            TransportEvent::Error(reason) => {
                error!("Transport for peer {} failed: {}", peer_id, reason);
                self.fail_peer(
                    &peer_id,
                    LinkError::transport_error_full("Transport failed", peer_id.clone(), reason),
                );
            }
            TransportEvent::Closed => {
                if state == PeerState::Connected {
                    self.teardown_peer(&peer_id, LinkError::closed("transport closed"));
                } else if state == PeerState::Signaling {
                    self.fail_peer(
                        &peer_id,
                        LinkError::transport_error_with_peer(
                            "Transport closed during handshake",
                            peer_id.as_str(),
                        ),
                    );
                }
            }
        }
    }

    fn handle_connect_timeout(&mut self, peer_id: &str, generation: u64) {
        let expired = matches!(
            self.registry.get(peer_id),
            Some(conn) if conn.generation == generation && conn.state == PeerState::Signaling
        );
        if expired {
            warn!(
                "Connect to peer {} timed out after {:?}",
                peer_id, self.config.connect_timeout
            );
            self.fail_peer(peer_id, LinkError::timeout(peer_id, self.config.connect_timeout));
        }
    }

    async fn handle_send(&mut self, message: Message) {
        let bytes = match message.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Dropping unencodable outbound message: {}", e);
                return;
            }
        };
        let targets: Vec<String> = self.connected_ids();
        if targets.is_empty() {
            trace!("No connected peers; outbound message goes nowhere");
            return;
        }
        debug!(
            "Broadcasting {} message to {} peer(s)",
            message.kind.as_str(),
            targets.len()
        );
        for peer_id in targets {
            if let Some(conn) = self.registry.get_mut(&peer_id) {
                if let Some(transport) = conn.transport_mut() {
                    if let Err(e) = transport.send(bytes.clone()).await {
                        warn!("Best-effort send to peer {} failed: {}", peer_id, e);
                    }
                }
            }
        }
    }

    async fn teardown(&mut self) {
        debug!("Shutting down connection manager for session {}", self.session_id);
        let ids: Vec<String> = self.registry.keys().cloned().collect();
        for peer_id in ids {
            if let Some(conn) = self.registry.get_mut(&peer_id) {
                if let Some(mut transport) = conn.take_transport() {
                    transport.close().await;
                }
                if !conn.state.is_terminal() {
                    conn.set_state(PeerState::Disconnected);
                }
            }
            self.drain_waiters(&peer_id, Err(LinkError::closed("manager shut down")));
        }
        self.channel.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::relay::{RegistryHandle, RelayPolicy};
    use crate::transport::{MemoryHub, MemoryTransportFactory};
    use serde_json::json;
    use std::time::Instant;
    use tokio::time::timeout;

    async fn spawn_manager(
        registry: &RegistryHandle,
        hub: &MemoryHub,
        config: ManagerConfig,
    ) -> PeerManager {
        let (channel, events) = MemoryChannel::attach(registry).await.unwrap();
        PeerManager::new(
            Box::new(channel),
            events,
            Arc::new(MemoryTransportFactory::new(hub.clone())),
            config,
        )
    }

    fn short_timeout() -> ManagerConfig {
        ManagerConfig {
            connect_timeout: Duration::from_millis(100),
        }
    }

    #[test]
    fn test_default_config() {
        assert_eq!(ManagerConfig::default().connect_timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_connect_to_absent_target_times_out() {
        let registry = RegistryHandle::spawn(RelayPolicy::default());
        let hub = MemoryHub::new();
        let manager = spawn_manager(&registry, &hub, short_timeout()).await;

        let result = timeout(Duration::from_secs(2), manager.connect("nobody"))
            .await
            .expect("connect must not hang");
        assert!(matches!(result, Err(LinkError::Timeout { .. })));

        let summaries = manager.summaries().await;
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].state, PeerState::Failed);
        assert_eq!(summaries[0].role, PeerRole::Initiator);
    }

    #[tokio::test]
    async fn test_duplicate_connect_shares_outcome() {
        let registry = RegistryHandle::spawn(RelayPolicy::default());
        let hub = MemoryHub::new();
        let manager = spawn_manager(&registry, &hub, short_timeout()).await;

        let (first, second) = tokio::join!(manager.connect("nobody"), manager.connect("nobody"));
        assert!(matches!(first, Err(LinkError::Timeout { .. })));
        assert!(matches!(second, Err(LinkError::Timeout { .. })));
        // One registry entry, not two.
        assert_eq!(manager.summaries().await.len(), 1);
    }

    #[tokio::test]
    async fn test_send_with_zero_connected_peers_is_silent() {
        let registry = RegistryHandle::spawn(RelayPolicy::default());
        let hub = MemoryHub::new();
        let manager = spawn_manager(&registry, &hub, ManagerConfig::default()).await;

        manager.send(MessageKind::OrderUpdate, json!({"order": 7}));
        assert!(manager.list_connected().await.is_empty());
        assert_eq!(manager.connected_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_unknown_peer_is_noop() {
        let registry = RegistryHandle::spawn(RelayPolicy::default());
        let hub = MemoryHub::new();
        let manager = spawn_manager(&registry, &hub, ManagerConfig::default()).await;

        manager.disconnect("ghost");
        assert!(manager.summaries().await.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_cancels_pending_connect_quickly() {
        let registry = RegistryHandle::spawn(RelayPolicy::default());
        let hub = MemoryHub::new();
        // Long timeout: cancellation must come from the disconnect, not the clock.
        let config = ManagerConfig {
            connect_timeout: Duration::from_secs(30),
        };
        let manager = spawn_manager(&registry, &hub, config).await;

        let started = Instant::now();
        let connecting = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.connect("nobody").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        manager.disconnect("nobody");

        let result = timeout(Duration::from_secs(2), connecting)
            .await
            .expect("cancelled connect must not hang")
            .unwrap();
        assert!(matches!(result, Err(LinkError::Closed { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!manager.is_connected("nobody").await);
    }

    #[tokio::test]
    async fn test_failing_transport_rejects_connect() {
        let registry = RegistryHandle::spawn(RelayPolicy::default());
        let hub = MemoryHub::new();
        let (channel, events) = MemoryChannel::attach(&registry).await.unwrap();
        let manager = PeerManager::new(
            Box::new(channel),
            events,
            Arc::new(MemoryTransportFactory::failing(hub)),
            ManagerConfig::default(),
        );

        let result = timeout(Duration::from_secs(2), manager.connect("anyone"))
            .await
            .expect("failed connect must not hang");
        match result {
            Err(LinkError::Transport { peer, .. }) => assert_eq!(peer.as_deref(), Some("anyone")),
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shutdown_rejects_later_calls() {
        let registry = RegistryHandle::spawn(RelayPolicy::default());
        let hub = MemoryHub::new();
        let manager = spawn_manager(&registry, &hub, ManagerConfig::default()).await;

        manager.shutdown();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = manager.connect("anyone").await;
        assert!(matches!(result, Err(LinkError::Closed { .. })));
    }
}
