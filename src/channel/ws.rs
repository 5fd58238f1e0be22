//! WebSocket relay channel
//!
//! Client side of the relay wire contract over a WebSocket connection.
//! Frames are JSON text; the first frame after connecting must be
//! `session-assigned`, after which the channel is usable.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};
use url::Url;

use crate::channel::{ChannelEvent, RelayChannel};
use crate::error::LinkError;
use crate::signal::{ClientFrame, ServerFrame, SignalEnvelope};

enum WriterCommand {
    Frame(ClientFrame),
    Shutdown,
}

/// Relay channel over a WebSocket connection
pub struct WsChannel {
    session_id: String,
    writer: mpsc::UnboundedSender<WriterCommand>,
}

impl WsChannel {
    /// Connect to a relay and wait for the session assignment
    pub async fn connect(
        relay_url: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChannelEvent>), LinkError> {
        let url = Url::parse(relay_url)
            .map_err(|e| LinkError::channel_error_with_source("Invalid relay URL", e.to_string()))?;
        debug!("Connecting to relay at {}", url);
        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(LinkError::from)?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        // The relay speaks first: wait for our session id.
        let session_id = loop {
            match ws_receiver.next().await {
                Some(Ok(WsMessage::Text(text))) => match ServerFrame::from_text(&text) {
                    Ok(ServerFrame::SessionAssigned { session_id }) => break session_id,
                    Ok(other) => {
                        warn!("Dropping unexpected frame before session assignment: {:?}", other);
                    }
                    Err(e) => {
                        warn!("Dropping malformed frame before session assignment: {}", e);
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    return Err(LinkError::channel_error("Relay closed before assigning a session"));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        };
        info!("Attached to relay as session {}", session_id);

        let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<WriterCommand>();
        tokio::spawn(async move {
            while let Some(command) = writer_rx.recv().await {
                match command {
                    WriterCommand::Frame(frame) => match frame.to_text() {
                        Ok(text) => {
                            if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping unencodable frame: {}", e),
                    },
                    WriterCommand::Shutdown => {
                        let _ = ws_sender.send(WsMessage::Close(None)).await;
                        break;
                    }
                }
            }
        });

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let reader_session = session_id.clone();
        tokio::spawn(async move {
            while let Some(result) = ws_receiver.next().await {
                let event = match result {
                    Ok(WsMessage::Text(text)) => match ServerFrame::from_text(&text) {
                        Ok(ServerFrame::Signal { signal_blob, from_id }) => {
                            ChannelEvent::Signal { from_id, signal_blob }
                        }
                        Ok(ServerFrame::PeerDisconnected { peer_id }) => {
                            ChannelEvent::PeerDisconnected { peer_id }
                        }
                        Ok(ServerFrame::SessionAssigned { .. }) => {
                            warn!("Dropping repeated session assignment for {}", reader_session);
                            continue;
                        }
                        Err(e) => {
                            warn!("Dropping malformed relay frame: {}", e);
                            continue;
                        }
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        warn!("Relay channel {} read error: {}", reader_session, e);
                        break;
                    }
                };
                if event_tx.send(event).is_err() {
                    return;
                }
            }
            debug!("Relay channel {} reader finished", reader_session);
            let _ = event_tx.send(ChannelEvent::Closed);
        });

        Ok((
            Self {
                session_id,
                writer: writer_tx,
            },
            event_rx,
        ))
    }
}

#[async_trait]
impl RelayChannel for WsChannel {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn join_signaling(&self, target_id: &str) -> Result<()> {
        let frame = ClientFrame::JoinSignaling {
            target_id: target_id.to_string(),
        };
        self.writer
            .send(WriterCommand::Frame(frame))
            .map_err(|_| LinkError::closed("relay channel writer is gone"))?;
        Ok(())
    }

    async fn send_signal(&self, envelope: SignalEnvelope) -> Result<()> {
        let frame = ClientFrame::Signal {
            signal_blob: envelope.signal_blob,
            target_id: envelope.target_id,
        };
        self.writer
            .send(WriterCommand::Frame(frame))
            .map_err(|_| LinkError::closed("relay channel writer is gone"))?;
        Ok(())
    }

    async fn close(&self) {
        let _ = self.writer.send(WriterCommand::Shutdown);
    }
}
