//! Application messages
//!
//! Defines the structured messages applications exchange over established
//! peer data channels. Messages are JSON on the wire and never touch the
//! relay once a direct channel exists.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::trace;

use crate::error::LinkError;

/// Kind of an application message
///
/// The known kinds map to fixed wire strings; anything else round-trips
/// through `Other` so new kinds can be introduced without a protocol rev.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    RestaurantUpdate,
    OrderUpdate,
    UserLocation,
    Other(String),
}

impl MessageKind {
    /// Wire string for this kind
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::RestaurantUpdate => "restaurant-update",
            MessageKind::OrderUpdate => "order-update",
            MessageKind::UserLocation => "user-location",
            MessageKind::Other(s) => s,
        }
    }
}

impl From<String> for MessageKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "restaurant-update" => MessageKind::RestaurantUpdate,
            "order-update" => MessageKind::OrderUpdate,
            "user-location" => MessageKind::UserLocation,
            _ => MessageKind::Other(value),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_string()
    }
}

/// A structured application message
///
/// Produced by the sender at call time and consumed exactly once by the
/// receiver's subscriber. The timestamp is assigned when the message is
/// sent, not by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message kind
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Opaque application payload
    #[serde(rename = "data")]
    pub payload: serde_json::Value,
    /// Epoch milliseconds, assigned at send time
    pub timestamp: u64,
}

/// Current wall-clock time as epoch milliseconds
pub fn current_timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl Message {
    /// Create a message with an explicit timestamp
    pub fn new(kind: MessageKind, payload: serde_json::Value, timestamp: u64) -> Self {
        Self {
            kind,
            payload,
            timestamp,
        }
    }

    /// Create a message stamped with the current time
    pub fn stamped(kind: MessageKind, payload: serde_json::Value) -> Self {
        Self::new(kind, payload, current_timestamp_millis())
    }

    /// Serialize the message to bytes for the data channel
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        trace!("Serializing {} message", self.kind.as_str());
        let bytes = serde_json::to_vec(self)
            .map_err(|e| LinkError::signal_error_with_source("Failed to encode message", e.to_string()))?;
        Ok(bytes)
    }

    /// Deserialize a message from data channel bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        trace!("Deserializing message from {} bytes", data.len());
        let message = serde_json::from_slice(data)
            .map_err(|e| LinkError::signal_error_with_source("Failed to decode message", e.to_string()))?;
        Ok(message)
    }
}
