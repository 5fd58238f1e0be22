//! In-process transport
//!
//! Pairs two endpoints living in the same process through a shared hub.
//! The handshake mirrors the real thing: the initiator emits an offer blob
//! carrying a random pairing token, the responder answers with the same
//! token, and the hub links the two halves once both have registered.
//! Used by the loopback tests and demos; production deployments plug in a
//! real transport behind the same factory trait.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::LinkError;
use crate::peer::PeerRole;
use crate::signal::SignalBlob;
use crate::transport::primitive::{TransportEvent, TransportFactory, TransportHandle};

type EventSender = mpsc::UnboundedSender<TransportEvent>;
type PeerSlot = Arc<Mutex<Option<EventSender>>>;

struct Registration {
    events: EventSender,
    peer_slot: PeerSlot,
}

/// Shared rendezvous point linking transport halves by pairing token
#[derive(Clone, Default)]
pub struct MemoryHub {
    pending: Arc<Mutex<HashMap<String, Registration>>>,
}

impl MemoryHub {
    /// Create a new hub; clone it into every factory that should interconnect
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handshakes waiting for their counterpart
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("hub lock poisoned").len()
    }

    fn pair(&self, token: &str, events: EventSender, peer_slot: PeerSlot) {
        let mut pending = self.pending.lock().expect("hub lock poisoned");
        match pending.remove(token) {
            Some(other) => {
                debug!("Pairing transport halves for token {}", token);
                *peer_slot.lock().expect("peer slot poisoned") = Some(other.events.clone());
                *other.peer_slot.lock().expect("peer slot poisoned") = Some(events.clone());
                let _ = events.send(TransportEvent::Connected);
                let _ = other.events.send(TransportEvent::Connected);
            }
            None => {
                trace!("First half registered for token {}", token);
                pending.insert(token.to_string(), Registration { events, peer_slot });
            }
        }
    }

    fn abandon(&self, token: &str) {
        self.pending.lock().expect("hub lock poisoned").remove(token);
    }
}

/// One half of an in-process transport pair
pub struct MemoryTransport {
    peer_id: String,
    role: PeerRole,
    token: Option<String>,
    events: EventSender,
    peer_tx: PeerSlot,
    hub: MemoryHub,
    closed: bool,
}

impl MemoryTransport {
    fn handle_offer(&mut self, token: String) {
        if self.role != PeerRole::Responder || self.token.is_some() {
            warn!("Dropping unexpected offer for peer {}", self.peer_id);
            return;
        }
        let answer = json!({ "kind": "answer", "token": token });
        self.token = Some(token.clone());
        let _ = self.events.send(TransportEvent::Signal(answer));
        self.hub.pair(&token, self.events.clone(), self.peer_tx.clone());
    }

    fn handle_answer(&mut self, token: String) {
        if self.role != PeerRole::Initiator || self.token.as_deref() != Some(token.as_str()) {
            warn!("Dropping unexpected answer for peer {}", self.peer_id);
            return;
        }
        self.hub.pair(&token, self.events.clone(), self.peer_tx.clone());
    }
}

#[async_trait]
impl TransportHandle for MemoryTransport {
    fn signal(&mut self, blob: SignalBlob) {
        if self.closed {
            return;
        }
        let kind = blob.get("kind").and_then(|v| v.as_str());
        let token = blob.get("token").and_then(|v| v.as_str()).map(str::to_string);
        match (kind, token) {
            (Some("offer"), Some(token)) => self.handle_offer(token),
            (Some("answer"), Some(token)) => self.handle_answer(token),
            _ => {
                warn!("Dropping malformed signal blob for peer {}", self.peer_id);
            }
        }
    }

    async fn send(&mut self, payload: Vec<u8>) -> Result<()> {
        if self.closed {
            return Err(LinkError::transport_error_with_peer("Transport is closed", self.peer_id.as_str()).into());
        }
        let peer = self.peer_tx.lock().expect("peer slot poisoned").clone();
        match peer {
            Some(tx) => tx.send(TransportEvent::Data(payload)).map_err(|_| {
                LinkError::transport_error_with_peer("Counterpart is gone", self.peer_id.as_str()).into()
            }),
            None => {
                Err(LinkError::transport_error_with_peer("Data channel not open", self.peer_id.as_str()).into())
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(token) = &self.token {
            self.hub.abandon(token);
        }
        if let Some(tx) = self.peer_tx.lock().expect("peer slot poisoned").take() {
            let _ = tx.send(TransportEvent::Closed);
        }
        debug!("Closed in-process transport for peer {}", self.peer_id);
    }
}

/// Factory producing [`MemoryTransport`] halves wired to one hub
#[derive(Clone)]
pub struct MemoryTransportFactory {
    hub: MemoryHub,
    fail_opens: bool,
}

impl MemoryTransportFactory {
    /// Create a factory over a shared hub
    pub fn new(hub: MemoryHub) -> Self {
        Self {
            hub,
            fail_opens: false,
        }
    }

    /// Create a factory whose transports fail immediately after opening
    pub fn failing(hub: MemoryHub) -> Self {
        Self {
            hub,
            fail_opens: true,
        }
    }

    fn generate_token() -> String {
        hex::encode(rand::random::<[u8; 8]>())
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn open(
        &self,
        peer_id: &str,
        role: PeerRole,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Box<dyn TransportHandle> {
        debug!("Opening in-process transport for peer {} as {:?}", peer_id, role);
        if self.fail_opens {
            let _ = events.send(TransportEvent::Error("simulated transport failure".to_string()));
        }
        let mut token = None;
        if role == PeerRole::Initiator && !self.fail_opens {
            let t = Self::generate_token();
            let offer = json!({ "kind": "offer", "token": t });
            let _ = events.send(TransportEvent::Signal(offer));
            token = Some(t);
        }
        Box::new(MemoryTransport {
            peer_id: peer_id.to_string(),
            role,
            token,
            events,
            peer_tx: Arc::new(Mutex::new(None)),
            hub: self.hub.clone(),
            closed: false,
        })
    }
}
