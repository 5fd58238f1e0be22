//! Transport primitive module
//!
//! The boundary to the mechanism that turns exchanged signal blobs into a
//! direct peer-to-peer data channel. Transports emit events onto the
//! owning manager's queue; they never run manager logic on their own tasks.

pub mod memory;
pub mod primitive;

// Re-export main types
pub use memory::{MemoryHub, MemoryTransportFactory};
pub use primitive::{TransportEvent, TransportFactory, TransportHandle};
