//! In-process relay channel
//!
//! Attaches directly to a [`RegistryHandle`] living in the same process,
//! so tests and demos exercise the real relay registry without sockets.

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::channel::{ChannelEvent, RelayChannel};
use crate::error::LinkError;
use crate::relay::RegistryHandle;
use crate::signal::{ServerFrame, SignalEnvelope};

/// Relay channel backed by an in-process session registry
pub struct MemoryChannel {
    session_id: String,
    registry: RegistryHandle,
}

impl MemoryChannel {
    /// Attach to a registry, returning the channel and its event stream
    pub async fn attach(
        registry: &RegistryHandle,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>), LinkError> {
        let (frame_tx, mut frame_rx) = mpsc::unbounded_channel();
        let session_id = registry.attach(frame_tx).await?;
        debug!("Attached in-process channel as session {}", session_id);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(frame) = frame_rx.recv().await {
                let event = match frame {
                    // The assignment was already consumed via the attach reply.
                    ServerFrame::SessionAssigned { .. } => continue,
                    ServerFrame::Signal { signal_blob, from_id } => {
                        ChannelEvent::Signal { from_id, signal_blob }
                    }
                    ServerFrame::PeerDisconnected { peer_id } => {
                        ChannelEvent::PeerDisconnected { peer_id }
                    }
                };
                if event_tx.send(event).is_err() {
                    return;
                }
            }
            let _ = event_tx.send(ChannelEvent::Closed);
        });

        Ok((
            Self {
                session_id,
                registry: registry.clone(),
            },
            event_rx,
        ))
    }
}

#[async_trait]
impl RelayChannel for MemoryChannel {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn join_signaling(&self, target_id: &str) -> Result<()> {
        self.registry.join(&self.session_id, target_id);
        Ok(())
    }

    async fn send_signal(&self, envelope: SignalEnvelope) -> Result<()> {
        self.registry.signal(&self.session_id, envelope);
        Ok(())
    }

    async fn close(&self) {
        self.registry.detach(&self.session_id);
    }
}
