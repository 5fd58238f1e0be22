//! peerlink
//!
//! Peer-to-peer data links brokered through a signaling relay, with a
//! client-side connection manager multiplexing one handshake per peer.

pub mod channel;
pub mod cli;
pub mod error;
pub mod peer;
pub mod relay;
pub mod signal;
pub mod transport;

pub use error::LinkError;

pub use channel::{ChannelEvent, MemoryChannel, RelayChannel, WsChannel};
pub use cli::{CliArgs, Config};
pub use peer::{ManagerConfig, PeerConnection, PeerManager, PeerRole, PeerState, PeerSummary};
pub use relay::{RegistryHandle, RelayPolicy, RelayServer, SessionRegistry};
pub use signal::{
    current_timestamp_millis, ClientFrame, Message, MessageKind, ServerFrame, SignalBlob,
    SignalEnvelope,
};
pub use transport::{
    MemoryHub, MemoryTransportFactory, TransportEvent, TransportFactory, TransportHandle,
};
