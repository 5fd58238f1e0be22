//! Signaling and application message module
//!
//! Defines the message types exchanged over peer data channels and the
//! frames relayed between clients and the signaling relay.

pub mod envelope;
pub mod message;

// Re-export main types
pub use envelope::{ClientFrame, ServerFrame, SignalBlob, SignalEnvelope};
pub use message::{current_timestamp_millis, Message, MessageKind};
