//! Error types for peer links and signaling
//!
//! This module defines error types for all components of the
//! peer link stack: transports, the relay channel, and the relay itself.

use std::fmt;
use std::time::Duration;

/// Comprehensive error type for peer link operations
#[derive(Debug, Clone)]
pub enum LinkError {
    /// Transport primitive errors, scoped to a single peer
    Transport {
        message: String,
        peer: Option<String>,
        source: Option<String>,
    },

    /// A pending connect did not complete before its deadline
    Timeout {
        peer: String,
        after: Duration,
    },

    /// Malformed signal or frame payloads
    Signal {
        message: String,
        source: Option<String>,
    },

    /// Relay channel errors (attach, send, connection loss)
    Channel {
        message: String,
        source: Option<String>,
    },

    /// Configuration errors
    Config {
        message: String,
        field: Option<String>,
    },

    /// Operation on a closed manager, channel, or connection
    Closed {
        message: String,
    },
}

impl LinkError {
    /// Create a new Transport error
    pub fn transport_error(message: impl Into<String>) -> Self {
        LinkError::Transport {
            message: message.into(),
            peer: None,
            source: None,
        }
    }

    /// Create a new Transport error with peer id
    pub fn transport_error_with_peer(message: impl Into<String>, peer: impl Into<String>) -> Self {
        LinkError::Transport {
            message: message.into(),
            peer: Some(peer.into()),
            source: None,
        }
    }

    /// Create a new Transport error with peer and source
    pub fn transport_error_full(
        message: impl Into<String>,
        peer: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        LinkError::Transport {
            message: message.into(),
            peer: Some(peer.into()),
            source: Some(source.into()),
        }
    }

    /// Create a new Timeout error for a peer
    pub fn timeout(peer: impl Into<String>, after: Duration) -> Self {
        LinkError::Timeout {
            peer: peer.into(),
            after,
        }
    }

    /// Create a new Signal error
    pub fn signal_error(message: impl Into<String>) -> Self {
        LinkError::Signal {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new Signal error with source
    pub fn signal_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        LinkError::Signal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new Channel error
    pub fn channel_error(message: impl Into<String>) -> Self {
        LinkError::Channel {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new Channel error with source
    pub fn channel_error_with_source(message: impl Into<String>, source: impl Into<String>) -> Self {
        LinkError::Channel {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new Config error
    pub fn config_error(message: impl Into<String>) -> Self {
        LinkError::Config {
            message: message.into(),
            field: None,
        }
    }

    /// Create a new Config error with field
    pub fn config_error_with_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        LinkError::Config {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a new Closed error
    pub fn closed(message: impl Into<String>) -> Self {
        LinkError::Closed {
            message: message.into(),
        }
    }

    /// The peer id this error is scoped to, if any
    pub fn peer_id(&self) -> Option<&str> {
        match self {
            LinkError::Transport { peer, .. } => peer.as_deref(),
            LinkError::Timeout { peer, .. } => Some(peer),
            _ => None,
        }
    }

    /// Whether this error ends a single connection attempt rather than the whole manager
    pub fn is_peer_scoped(&self) -> bool {
        matches!(self, LinkError::Transport { .. } | LinkError::Timeout { .. })
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        let ctx = context.into();
        match &mut self {
            LinkError::Transport { source, .. } => {
                *source = Some(source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)));
            }
            LinkError::Signal { source, .. } => {
                *source = Some(source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)));
            }
            LinkError::Channel { source, .. } => {
                *source = Some(source.as_ref().map_or_else(|| ctx.clone(), |s| format!("{}: {}", s, ctx)));
            }
            _ => {}
        }
        self
    }
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkError::Transport { message, peer, source } => {
                match (peer, source) {
                    (Some(p), Some(s)) => write!(f, "Transport error: {} (peer: {}, source: {})", message, p, s),
                    (Some(p), None) => write!(f, "Transport error: {} (peer: {})", message, p),
                    (None, Some(s)) => write!(f, "Transport error: {} (source: {})", message, s),
                    (None, None) => write!(f, "Transport error: {}", message),
                }
            }
            LinkError::Timeout { peer, after } => {
                write!(f, "Timeout error: connect to peer {} did not complete within {:?}", peer, after)
            }
            LinkError::Signal { message, source } => {
                if let Some(src) = source {
                    write!(f, "Signal error: {} (source: {})", message, src)
                } else {
                    write!(f, "Signal error: {}", message)
                }
            }
            LinkError::Channel { message, source } => {
                if let Some(src) = source {
                    write!(f, "Channel error: {} (source: {})", message, src)
                } else {
                    write!(f, "Channel error: {}", message)
                }
            }
            LinkError::Config { message, field } => {
                if let Some(field_val) = field {
                    write!(f, "Config error: {} (field: {})", message, field_val)
                } else {
                    write!(f, "Config error: {}", message)
                }
            }
            LinkError::Closed { message } => {
                write!(f, "Closed: {}", message)
            }
        }
    }
}

impl std::error::Error for LinkError {}

// Implement From traits for common error types

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        LinkError::channel_error_with_source(err.to_string(), err.kind().to_string())
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::signal_error_with_source("Failed to parse JSON payload", err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        LinkError::channel_error_with_source("WebSocket failure", err.to_string())
    }
}
