//! Transport primitive traits
//!
//! A transport is created per peer connection, exclusively owned by it,
//! and released when the connection reaches a terminal state. Given a
//! local role and a stream of remote signal blobs it produces further
//! blobs to send back and, eventually, an open data channel or a failure.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::peer::PeerRole;
use crate::signal::SignalBlob;

/// Events a transport emits onto the owning manager's queue
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// Outbound signal blob to ship to the remote side via the relay
    Signal(SignalBlob),
    /// The data channel is open; `send` is valid from here on
    Connected,
    /// Application payload received on the data channel
    Data(Vec<u8>),
    /// The transport failed; terminal for this connection attempt
    Error(String),
    /// The remote side or the transport itself closed the channel
    Closed,
}

/// Handle to one live transport instance
#[async_trait]
pub trait TransportHandle: Send {
    /// Feed a signal blob received from the remote side
    fn signal(&mut self, blob: SignalBlob);

    /// Send application payload over the open data channel
    ///
    /// Back-pressure policy is the transport's own; callers only see an
    /// error when the channel is not open or the transport rejected the
    /// write outright.
    async fn send(&mut self, payload: Vec<u8>) -> Result<()>;

    /// Release the transport; safe to call before the channel ever opened
    async fn close(&mut self);
}

/// Factory creating one transport per peer connection
pub trait TransportFactory: Send + Sync {
    /// Open a transport for a peer in the given role
    ///
    /// All events for the returned handle are emitted on `events`, in the
    /// order the transport produces them.
    fn open(
        &self,
        peer_id: &str,
        role: PeerRole,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Box<dyn TransportHandle>;
}
