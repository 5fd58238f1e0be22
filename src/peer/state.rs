//! Peer state module
//!
//! Defines the per-peer connection record and its state machine.

use crate::transport::TransportHandle;

/// State of a peer connection
///
/// Disconnected and Failed are terminal for a record; a later connect
/// creates a fresh record rather than resurrecting the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Peer referenced, no handshake started
    Idle,
    /// Handshake in flight; waiting for remote signals
    Signaling,
    /// Data channel open and usable
    Connected,
    /// Explicit teardown completed
    Disconnected,
    /// Handshake or transport error
    Failed,
}

impl PeerState {
    /// Check if the data channel is open
    pub fn is_connected(&self) -> bool {
        matches!(self, PeerState::Connected)
    }

    /// Check if this record can never leave its state again
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Disconnected | PeerState::Failed)
    }

    /// Check if application payload can be sent
    pub fn can_send(&self) -> bool {
        matches!(self, PeerState::Connected)
    }
}

impl Default for PeerState {
    fn default() -> Self {
        PeerState::Idle
    }
}

/// Which side of the handshake this record plays
///
/// Fixed at creation. A record created by a local connect call is the
/// Initiator; one created lazily on a first incoming signal is the
/// Responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerRole {
    Initiator,
    Responder,
}

/// Read-only snapshot of one peer connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub peer_id: String,
    pub state: PeerState,
    pub role: PeerRole,
    pub generation: u64,
}

/// The client-local record of one handshake/session with one remote peer
///
/// Owns its transport exclusively; the transport is released when the
/// record reaches a terminal state. `generation` distinguishes a fresh
/// record from a torn-down predecessor for the same peer id, so stale
/// timeout and transport events can be discarded.
pub struct PeerConnection {
    /// Opaque peer identifier, unique within the manager's registry
    pub peer_id: String,
    /// Current state
    pub state: PeerState,
    /// Handshake role, fixed at creation
    pub role: PeerRole,
    /// Creation ordinal for this peer id
    pub generation: u64,
    /// Exclusively owned transport, present until a terminal state
    transport: Option<Box<dyn TransportHandle>>,
}

impl PeerConnection {
    /// Create a new record in Signaling state with its transport attached
    pub fn new(
        peer_id: impl Into<String>,
        role: PeerRole,
        generation: u64,
        transport: Box<dyn TransportHandle>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            state: PeerState::Signaling,
            role,
            generation,
            transport: Some(transport),
        }
    }

    /// Set the connection state
    pub fn set_state(&mut self, state: PeerState) {
        self.state = state;
    }

    /// Check if the data channel is open
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Mutable access to the owned transport, if still held
    pub fn transport_mut(&mut self) -> Option<&mut Box<dyn TransportHandle>> {
        self.transport.as_mut()
    }

    /// Release ownership of the transport
    ///
    /// Called exactly once, on the transition into a terminal state.
    pub fn take_transport(&mut self) -> Option<Box<dyn TransportHandle>> {
        self.transport.take()
    }

    /// Whether the transport has already been released
    pub fn transport_released(&self) -> bool {
        self.transport.is_none()
    }

    /// Read-only snapshot of this record
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            peer_id: self.peer_id.clone(),
            state: self.state,
            role: self.role,
            generation: self.generation,
        }
    }
}
