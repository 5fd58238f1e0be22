//! Signaling relay module
//!
//! Forwards signaling envelopes between exactly two sessions without
//! interpreting them, and tears down session resources on disconnect.

pub mod registry;
pub mod server;

// Re-export main types
pub use registry::{RegistryHandle, RelayPolicy, SessionRegistry, SignalingSession};
pub use server::RelayServer;
