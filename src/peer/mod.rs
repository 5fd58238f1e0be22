//! Peer management module
//!
//! Handles peer connections and state management.

pub mod manager;
pub mod state;

// Re-export main types
pub use manager::{ManagerConfig, PeerManager};
pub use state::{PeerConnection, PeerRole, PeerState, PeerSummary};
