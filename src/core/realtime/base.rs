//! Base types for the realtime voice session.
//!
//! This module defines the error taxonomy, the connection status exposed to
//! hosts, and the callback types shared by every component of a session.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use super::messages::LoggedEvent;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while running a realtime session.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// The ephemeral credential could not be obtained or was malformed
    #[error("Credential error: {0}")]
    Credential(String),

    /// The local audio capture device could not be acquired
    #[error("Media access error: {0}")]
    MediaAccess(String),

    /// The remote session-description exchange returned a non-success status
    #[error("Negotiation failed (HTTP {status}): {body}")]
    Negotiation { status: u16, body: String },

    /// Peer-connection level failure (offer creation, answer application, request transport)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The event channel failed or the peer connection dropped
    #[error("Channel error: {0}")]
    Channel(String),

    /// An inbound event could not be parsed
    #[error("Event parse error: {0}")]
    EventParse(String),

    /// An outbound event was attempted while the event channel was not open
    #[error("Not connected")]
    NotConnected,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The session task is gone or a reply was dropped
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Whether this error moves the connection status to `error`.
    ///
    /// Handshake and channel failures are fatal. The rest are only logged.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::Credential(_)
                | SessionError::MediaAccess(_)
                | SessionError::Negotiation { .. }
                | SessionError::Transport(_)
                | SessionError::Channel(_)
        )
    }
}

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

// =============================================================================
// Connection State
// =============================================================================

/// Connection status of a realtime session, as observed by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// No session, or the last session ended normally
    #[default]
    Disconnected,
    /// Handshake in progress
    Connecting,
    /// Event channel open
    Connected,
    /// The last handshake or the live channel failed
    Error,
}

impl ConnectionState {
    /// Whether a session is live or being established.
    pub fn is_active(&self) -> bool {
        matches!(self, ConnectionState::Connecting | ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Callback Types
// =============================================================================

/// Callback receiving every inbound and outbound event for diagnostics.
///
/// Invoked synchronously on the session task, so it must not block.
pub type EventLogCallback = Arc<dyn Fn(LoggedEvent) + Send + Sync>;
