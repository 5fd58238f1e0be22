//! Relay wire frames
//!
//! Defines the envelope relayed between sessions and the JSON frames
//! exchanged with the signaling relay. The relay forwards `signal_blob`
//! without inspecting, modifying, or interpreting it.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::LinkError;

/// Opaque handshake payload produced and consumed by the transport primitive
pub type SignalBlob = serde_json::Value;

/// The unit relayed by the signaling relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    /// Opaque signal payload, never inspected by the relay
    pub signal_blob: SignalBlob,
    /// Session the envelope is addressed to
    pub target_id: String,
}

impl SignalEnvelope {
    /// Create a new envelope addressed to a target session
    pub fn new(signal_blob: SignalBlob, target_id: impl Into<String>) -> Self {
        Self {
            signal_blob,
            target_id: target_id.into(),
        }
    }
}

/// Frames sent from a client to the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    /// Begin signaling toward a target session
    #[serde(rename = "join-signaling")]
    JoinSignaling { target_id: String },
    /// Envelope to forward to its target
    #[serde(rename = "signal")]
    Signal {
        signal_blob: SignalBlob,
        target_id: String,
    },
}

/// Frames sent from the relay to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// First frame after attach; carries the relay-assigned session id
    #[serde(rename = "session-assigned")]
    SessionAssigned { session_id: String },
    /// Forwarded envelope, rewritten with the sender's session id
    #[serde(rename = "signal")]
    Signal {
        signal_blob: SignalBlob,
        from_id: String,
    },
    /// A counterpart's channel endpoint closed
    #[serde(rename = "peer-disconnected")]
    PeerDisconnected { peer_id: String },
}

impl ClientFrame {
    /// Serialize the frame to its wire text
    pub fn to_text(&self) -> Result<String> {
        let text = serde_json::to_string(self)
            .map_err(|e| LinkError::signal_error_with_source("Failed to encode client frame", e.to_string()))?;
        Ok(text)
    }

    /// Parse a frame from wire text
    pub fn from_text(text: &str) -> Result<Self> {
        trace!("Parsing client frame ({} bytes)", text.len());
        let frame = serde_json::from_str(text)
            .map_err(|e| LinkError::signal_error_with_source("Failed to decode client frame", e.to_string()))?;
        Ok(frame)
    }
}

impl ServerFrame {
    /// Serialize the frame to its wire text
    pub fn to_text(&self) -> Result<String> {
        let text = serde_json::to_string(self)
            .map_err(|e| LinkError::signal_error_with_source("Failed to encode server frame", e.to_string()))?;
        Ok(text)
    }

    /// Parse a frame from wire text
    pub fn from_text(text: &str) -> Result<Self> {
        trace!("Parsing server frame ({} bytes)", text.len());
        let frame = serde_json::from_str(text)
            .map_err(|e| LinkError::signal_error_with_source("Failed to decode server frame", e.to_string()))?;
        Ok(frame)
    }
}
