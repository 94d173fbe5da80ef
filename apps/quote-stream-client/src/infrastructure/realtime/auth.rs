//! Quote Stream Authentication
//!
//! The server accepts an optional credentials blob once per connection.
//!
//! # Authentication Flow
//!
//! 1. Transport opens
//! 2. If the host has credentials, send `{"type":"auth","keys":{...}}`
//! 3. Server may answer `{"type":"auth_success"}`
//!
//! The client never waits for the answer. Subscribing and streaming
//! proceed immediately, and a missing `auth_success` is not an error.

use crate::domain::session::Credentials;

use super::messages::ClientMessage;

/// Authentication progress on the current connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthState {
    /// Nothing sent on this connection.
    #[default]
    NotSent,
    /// Credentials sent, no acknowledgement yet.
    Sent,
    /// Server acknowledged the credentials.
    Accepted,
}

impl AuthState {
    /// Check if credentials were sent on this connection.
    #[must_use]
    pub const fn was_sent(&self) -> bool {
        matches!(self, Self::Sent | Self::Accepted)
    }
}

/// Tracks the one-shot auth exchange.
#[derive(Debug, Default)]
pub struct AuthHandler {
    state: AuthState,
}

impl AuthHandler {
    /// Create a handler in the `NotSent` state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AuthState::NotSent,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> AuthState {
        self.state
    }

    /// Reset for a freshly opened transport.
    pub fn on_connection_opened(&mut self) {
        self.state = AuthState::NotSent;
    }

    /// Build the auth request for this connection.
    ///
    /// Returns `None` if one was already produced since the last open.
    pub fn create_auth_request(&mut self, keys: Credentials) -> Option<ClientMessage> {
        if self.state.was_sent() {
            tracing::debug!("Auth already sent on this connection");
            return None;
        }
        self.state = AuthState::Sent;
        Some(ClientMessage::Auth { keys })
    }

    /// Record an `auth_success` message.
    ///
    /// Returns `true` if it acknowledged credentials sent on this connection.
    pub fn on_auth_success(&mut self) -> bool {
        match self.state {
            AuthState::Sent => {
                self.state = AuthState::Accepted;
                true
            }
            AuthState::NotSent | AuthState::Accepted => false,
        }
    }
}
