//! Relay WebSocket server
//!
//! Accepts client connections, attaches each to the session registry,
//! and shuttles frames between the socket and the registry loop. The
//! server never interprets signal payloads and never blocks waiting for
//! a target to acknowledge.

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};

use crate::error::LinkError;
use crate::relay::registry::{RegistryHandle, RelayPolicy};
use crate::signal::{ClientFrame, ServerFrame, SignalEnvelope};

/// WebSocket front end for the signaling relay
pub struct RelayServer {
    listen_addr: String,
    policy: RelayPolicy,
    max_payload: usize,
}

impl RelayServer {
    /// Create a server for the given listen address and policy
    pub fn new(listen_addr: impl Into<String>, policy: RelayPolicy, max_payload: usize) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            policy,
            max_payload,
        }
    }

    /// Bind the listen address and serve until the process ends
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.listen_addr).await.map_err(|e| {
            error!("Failed to bind {}: {}", self.listen_addr, e);
            LinkError::channel_error_with_source("Failed to bind relay listener", e.to_string())
        })?;
        self.serve(listener).await
    }

    /// Serve connections on an already-bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!("Relay listening on ws://{}", local_addr);
        let registry = RegistryHandle::spawn(self.policy);

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    let registry = registry.clone();
                    let max_payload = self.max_payload;
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, addr, registry, max_payload).await {
                            warn!("Connection from {} ended with error: {}", addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: RegistryHandle,
    max_payload: usize,
) -> Result<()> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (frame_tx, mut frame_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let session_id = registry.attach(frame_tx).await?;
    info!("Session {} connected from {}", session_id, addr);

    // Frames from the registry go out on the socket.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            match frame.to_text() {
                Ok(text) => {
                    if ws_sender.send(WsMessage::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("Dropping unencodable frame: {}", e),
            }
        }
    });

    // Frames from the socket go to the registry.
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(WsMessage::Text(text)) => {
                if text.len() > max_payload {
                    warn!(
                        "Session {}: dropping oversized frame ({} bytes, max {})",
                        session_id,
                        text.len(),
                        max_payload
                    );
                    continue;
                }
                match ClientFrame::from_text(&text) {
                    Ok(ClientFrame::JoinSignaling { target_id }) => {
                        registry.join(&session_id, &target_id);
                    }
                    Ok(ClientFrame::Signal { signal_blob, target_id }) => {
                        registry.signal(&session_id, SignalEnvelope::new(signal_blob, target_id));
                    }
                    Err(e) => {
                        warn!("Session {}: dropping malformed frame: {}", session_id, e);
                    }
                }
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!("Session {} read error: {}", session_id, e);
                break;
            }
        }
    }

    registry.detach(&session_id);
    send_task.abort();
    info!("Session {} disconnected", session_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelEvent, RelayChannel, WsChannel};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    async fn start_server(policy: RelayPolicy) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let server = RelayServer::new(addr.to_string(), policy, 65_536);
            let _ = server.serve(listener).await;
        });
        format!("ws://{}", addr)
    }

    async fn recv(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
        timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for channel event")
            .expect("channel event stream ended")
    }

    #[tokio::test]
    async fn test_assigns_sessions_and_forwards() {
        let url = start_server(RelayPolicy::default()).await;
        let (a, _a_events) = WsChannel::connect(&url).await.unwrap();
        let (b, mut b_events) = WsChannel::connect(&url).await.unwrap();
        assert_ne!(a.session_id(), b.session_id());

        a.join_signaling(b.session_id()).await.unwrap();
        a.send_signal(SignalEnvelope::new(json!({"sdp": "offer"}), b.session_id()))
            .await
            .unwrap();

        match recv(&mut b_events).await {
            ChannelEvent::Signal { from_id, signal_blob } => {
                assert_eq!(from_id, a.session_id());
                assert_eq!(signal_blob["sdp"], "offer");
            }
            other => panic!("expected signal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_signal_for_absent_target_leaves_others_alone() {
        let url = start_server(RelayPolicy::default()).await;
        let (a, _a_events) = WsChannel::connect(&url).await.unwrap();
        let (b, mut b_events) = WsChannel::connect(&url).await.unwrap();

        a.send_signal(SignalEnvelope::new(json!({"n": 1}), "no-such-session"))
            .await
            .unwrap();
        // The relay drops the frame; the unrelated session keeps working.
        a.send_signal(SignalEnvelope::new(json!({"n": 2}), b.session_id()))
            .await
            .unwrap();

        match recv(&mut b_events).await {
            ChannelEvent::Signal { signal_blob, .. } => assert_eq!(signal_blob["n"], 2),
            other => panic!("expected signal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_notification_policy() {
        let policy = RelayPolicy {
            notify_disconnect: true,
            ..RelayPolicy::default()
        };
        let url = start_server(policy).await;
        let (a, _a_events) = WsChannel::connect(&url).await.unwrap();
        let (b, mut b_events) = WsChannel::connect(&url).await.unwrap();

        b.join_signaling(a.session_id()).await.unwrap();
        // Give the join time to land before the close races it.
        tokio::time::sleep(Duration::from_millis(50)).await;
        a.close().await;

        match recv(&mut b_events).await {
            ChannelEvent::PeerDisconnected { peer_id } => assert_eq!(peer_id, a.session_id()),
            other => panic!("expected peer-disconnected, got {:?}", other),
        }
    }
}
