//! Connection status state machine.
//!
//! ```text
//! disconnected ──start──▶ connecting ──channel open──▶ connected
//!      ▲  ▲                   │                            │
//!      │  └──────stop─────────┤◀───────stop / close────────┤
//!      │                      ▼                            ▼
//!      └────────stop──────── error ◀─────channel error─────┘
//! ```
//!
//! `error` is left only by an explicit stop or a new start.

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::base::{ConnectionState, SessionError};

/// Owns the session's [`ConnectionState`] and publishes every change.
#[derive(Debug)]
pub struct ConnectionLifecycle {
    tx: watch::Sender<ConnectionState>,
    error_tx: watch::Sender<Option<SessionError>>,
}

impl Default for ConnectionLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ConnectionState::Disconnected);
        let (error_tx, _rx) = watch::channel(None);
        Self { tx, error_tx }
    }

    pub fn state(&self) -> ConnectionState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.tx.subscribe()
    }

    /// The error that caused the most recent transition to `error`.
    /// Cleared by the next start.
    pub fn last_error(&self) -> Option<SessionError> {
        self.error_tx.borrow().clone()
    }

    pub fn subscribe_error(&self) -> watch::Receiver<Option<SessionError>> {
        self.error_tx.subscribe()
    }

    /// Enter `connecting`. Refused while a session is connecting or connected.
    pub fn begin_connecting(&mut self) -> bool {
        match self.state() {
            ConnectionState::Disconnected | ConnectionState::Error => {
                self.error_tx.send_replace(None);
                self.transition(ConnectionState::Connecting);
                true
            }
            state => {
                warn!(%state, "Session already active or connecting");
                false
            }
        }
    }

    /// Enter `connected`. Only valid while connecting.
    pub fn mark_connected(&mut self) -> bool {
        if self.state() != ConnectionState::Connecting {
            debug!(state = %self.state(), "Ignoring channel open outside of connecting");
            return false;
        }
        self.transition(ConnectionState::Connected);
        true
    }

    /// Enter `error`. Only valid from an active state and for a fatal error.
    pub fn mark_error(&mut self, error: &SessionError) -> bool {
        if !error.is_fatal() {
            debug!(error = %error, "Recoverable error leaves status unchanged");
            return false;
        }
        if !self.state().is_active() {
            debug!(state = %self.state(), error = %error, "Ignoring error outside of an active session");
            return false;
        }
        self.error_tx.send_replace(Some(error.clone()));
        self.transition(ConnectionState::Error);
        true
    }

    /// Enter `disconnected` from any other state.
    pub fn mark_disconnected(&mut self) -> bool {
        if self.state() == ConnectionState::Disconnected {
            return false;
        }
        self.transition(ConnectionState::Disconnected);
        true
    }

    fn transition(&mut self, next: ConnectionState) {
        let previous = self.state();
        info!(from = %previous, to = %next, "Connection status changed");
        self.tx.send_replace(next);
    }
}
