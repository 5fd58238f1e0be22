//! Relay channel module
//!
//! The always-on connection each client keeps to the signaling relay,
//! used only for signaling traffic. Events from the relay are delivered
//! to the connection manager as a message stream, never as callbacks on
//! foreign tasks.

pub mod memory;
pub mod ws;

use anyhow::Result;
use async_trait::async_trait;

use crate::signal::{SignalBlob, SignalEnvelope};

// Re-export main types
pub use memory::MemoryChannel;
pub use ws::WsChannel;

/// Events delivered by a relay channel to its owner
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// A forwarded envelope from another session
    Signal {
        from_id: String,
        signal_blob: SignalBlob,
    },
    /// A counterpart's channel endpoint closed
    PeerDisconnected { peer_id: String },
    /// This channel itself is gone; no further events follow
    Closed,
}

/// A client's connection to the signaling relay
#[async_trait]
pub trait RelayChannel: Send + Sync {
    /// The relay-assigned session id for this channel
    fn session_id(&self) -> &str;

    /// Begin signaling toward a target session
    async fn join_signaling(&self, target_id: &str) -> Result<()>;

    /// Ship an envelope to the relay for forwarding
    async fn send_signal(&self, envelope: SignalEnvelope) -> Result<()>;

    /// Close the channel
    async fn close(&self);
}
