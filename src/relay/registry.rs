//! Session registry
//!
//! The relay's only mutable state: a map of live signaling sessions. All
//! mutation happens on the single task that owns the registry; connection
//! handlers reach it through [`RegistryHandle`] commands, which serializes
//! concurrent join/signal/disconnect for the same identifier.

use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::error::LinkError;
use crate::signal::{ServerFrame, SignalEnvelope};

/// Relay-side record of one connected client
pub struct SignalingSession {
    /// Identifier assigned by the relay on attach, never chosen by the client
    pub session_id: String,
    /// Frames destined for this client
    outbound: mpsc::UnboundedSender<ServerFrame>,
    /// The peer this session most recently asked to join signaling with
    pub pending_target: Option<String>,
}

/// Relay policy knobs
///
/// The defaults match the permissive fire-and-forget behavior: joins
/// toward absent targets are accepted (the target may come online later)
/// and counterparts are not told about a session's disconnect; failure
/// detection is left to the transport's own timeouts.
#[derive(Debug, Clone, Copy)]
pub struct RelayPolicy {
    /// Accept `join-signaling` toward targets that are not yet online
    pub allow_absent_target: bool,
    /// Send `peer-disconnected` to counterparts when a session closes
    pub notify_disconnect: bool,
}

impl Default for RelayPolicy {
    fn default() -> Self {
        Self {
            allow_absent_target: true,
            notify_disconnect: false,
        }
    }
}

/// Registry of active signaling sessions
///
/// Owned by exactly one task; see [`RegistryHandle`] for the shared entry
/// point.
pub struct SessionRegistry {
    sessions: HashMap<String, SignalingSession>,
    policy: RelayPolicy,
}

/// Generate a random session identifier (16 bytes, hex-encoded)
fn generate_session_id() -> String {
    hex::encode(rand::random::<[u8; 16]>())
}

impl SessionRegistry {
    /// Create an empty registry with the given policy
    pub fn new(policy: RelayPolicy) -> Self {
        Self {
            sessions: HashMap::new(),
            policy,
        }
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Check whether a session is live
    pub fn is_live(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// The pending target recorded for a session, if any
    pub fn pending_target(&self, session_id: &str) -> Option<String> {
        self.sessions.get(session_id).and_then(|s| s.pending_target.clone())
    }

    /// Attach a new client and assign it a session id
    ///
    /// The first frame sent to the client is `session-assigned`.
    pub fn attach(&mut self, outbound: mpsc::UnboundedSender<ServerFrame>) -> String {
        let mut session_id = generate_session_id();
        while self.sessions.contains_key(&session_id) {
            session_id = generate_session_id();
        }
        let _ = outbound.send(ServerFrame::SessionAssigned {
            session_id: session_id.clone(),
        });
        self.sessions.insert(
            session_id.clone(),
            SignalingSession {
                session_id: session_id.clone(),
                outbound,
                pending_target: None,
            },
        );
        info!("Session {} attached (total: {})", session_id, self.sessions.len());
        session_id
    }

    /// Record that a session wishes to begin signaling toward a target
    ///
    /// The target need not be online yet; it may join later. When the
    /// policy forbids absent targets, such joins are dropped and logged.
    pub fn on_session_join(&mut self, session_id: &str, target_id: &str) {
        if !self.policy.allow_absent_target && !self.sessions.contains_key(target_id) {
            warn!(
                "Dropping join from session {} toward absent target {}",
                session_id, target_id
            );
            return;
        }
        match self.sessions.get_mut(session_id) {
            Some(session) => {
                debug!("Session {} joining signaling toward {}", session_id, target_id);
                session.pending_target = Some(target_id.to_string());
            }
            None => {
                warn!("Dropping join from unknown session {}", session_id);
            }
        }
    }

    /// Forward an envelope to its target session
    ///
    /// The forwarded frame carries the sender's session id as the return
    /// address. Envelopes for absent targets are dropped without touching
    /// any other session's state; the sender sees nothing and runs into
    /// its own connect timeout.
    pub fn on_signal(&mut self, session_id: &str, envelope: SignalEnvelope) {
        if !self.sessions.contains_key(session_id) {
            warn!("Dropping signal from unknown session {}", session_id);
            return;
        }
        match self.sessions.get(&envelope.target_id) {
            Some(target) => {
                trace!("Forwarding signal {} -> {}", session_id, envelope.target_id);
                let frame = ServerFrame::Signal {
                    signal_blob: envelope.signal_blob,
                    from_id: session_id.to_string(),
                };
                if target.outbound.send(frame).is_err() {
                    debug!("Target session {} outbound is gone", envelope.target_id);
                }
            }
            None => {
                debug!(
                    "Dropping signal from {} for absent target {}",
                    session_id, envelope.target_id
                );
            }
        }
    }

    /// Remove a session and release its handshake context
    ///
    /// Counterparts are notified only under the `notify_disconnect`
    /// policy, as an additional event; nothing else about the remaining
    /// sessions changes.
    pub fn on_disconnect(&mut self, session_id: &str) {
        let Some(departed) = self.sessions.remove(session_id) else {
            return;
        };
        info!("Session {} detached (remaining: {})", session_id, self.sessions.len());
        if !self.policy.notify_disconnect {
            return;
        }
        let frame = ServerFrame::PeerDisconnected {
            peer_id: session_id.to_string(),
        };
        for session in self.sessions.values() {
            let counterpart = session.pending_target.as_deref() == Some(session_id)
                || departed.pending_target.as_deref() == Some(session.session_id.as_str());
            if counterpart {
                debug!("Notifying session {} of disconnect of {}", session.session_id, session_id);
                let _ = session.outbound.send(frame.clone());
            }
        }
    }
}

enum RegistryCommand {
    Attach {
        outbound: mpsc::UnboundedSender<ServerFrame>,
        reply: oneshot::Sender<String>,
    },
    Join {
        session_id: String,
        target_id: String,
    },
    Signal {
        session_id: String,
        envelope: SignalEnvelope,
    },
    Detach {
        session_id: String,
    },
}

/// Shared handle to a registry loop
///
/// Cloneable; every connection handler holds one. Commands are applied in
/// arrival order by the single owning task.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::UnboundedSender<RegistryCommand>,
}

impl RegistryHandle {
    /// Spawn a registry loop and return its handle
    pub fn spawn(policy: RelayPolicy) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut registry = SessionRegistry::new(policy);
            while let Some(command) = rx.recv().await {
                match command {
                    RegistryCommand::Attach { outbound, reply } => {
                        let session_id = registry.attach(outbound);
                        let _ = reply.send(session_id);
                    }
                    RegistryCommand::Join { session_id, target_id } => {
                        registry.on_session_join(&session_id, &target_id);
                    }
                    RegistryCommand::Signal { session_id, envelope } => {
                        registry.on_signal(&session_id, envelope);
                    }
                    RegistryCommand::Detach { session_id } => {
                        registry.on_disconnect(&session_id);
                    }
                }
            }
            debug!("Registry loop finished");
        });
        Self { tx }
    }

    /// Attach a client, returning its relay-assigned session id
    pub async fn attach(
        &self,
        outbound: mpsc::UnboundedSender<ServerFrame>,
    ) -> Result<String, LinkError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(RegistryCommand::Attach { outbound, reply })
            .map_err(|_| LinkError::closed("registry is gone"))?;
        rx.await.map_err(|_| LinkError::closed("registry is gone"))
    }

    /// Record a join-signaling request
    pub fn join(&self, session_id: &str, target_id: &str) {
        let _ = self.tx.send(RegistryCommand::Join {
            session_id: session_id.to_string(),
            target_id: target_id.to_string(),
        });
    }

    /// Forward an envelope from a session
    pub fn signal(&self, session_id: &str, envelope: SignalEnvelope) {
        let _ = self.tx.send(RegistryCommand::Signal {
            session_id: session_id.to_string(),
            envelope,
        });
    }

    /// Detach a session
    pub fn detach(&self, session_id: &str) {
        let _ = self.tx.send(RegistryCommand::Detach {
            session_id: session_id.to_string(),
        });
    }
}
