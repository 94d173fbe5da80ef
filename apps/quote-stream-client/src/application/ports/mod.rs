//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Connector`: Opens a duplex text transport to a URL
//! - `Transport`: Sends text frames, closes, and yields inbound events
//!
//! ## Host Providers
//!
//! - `CredentialsProvider`: Supplies the auth blob, read at every open
//! - `UserIdProvider`: Supplies the signed-in user, read at every connect

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::domain::connection::CloseInfo;
use crate::domain::session::{Credentials, UserId};

// =============================================================================
// Transport
// =============================================================================

/// Errors raised by a transport adapter.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The connection could not be established.
    #[error("connect failed: {0}")]
    Connect(String),

    /// A frame could not be written.
    #[error("send failed: {0}")]
    Send(String),

    /// The close handshake could not be started.
    #[error("close failed: {0}")]
    Close(String),
}

/// Something that happened on an open transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame arrived.
    Message(String),
    /// A transport-level error. A `Closed` event or end of stream follows.
    Error(String),
    /// The peer closed the connection.
    Closed(CloseInfo),
}

/// An open duplex text transport.
///
/// `next_event` returning `None` means the underlying stream ended without
/// a close frame; callers treat that as an abnormal close.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Start the close handshake with the given code and reason.
    async fn close(&mut self, close: CloseInfo) -> Result<(), TransportError>;

    /// Wait for the next inbound event.
    async fn next_event(&mut self) -> Option<TransportEvent>;
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a transport to `url`. Resolves once the transport is open.
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, TransportError>;
}

// =============================================================================
// Host Providers
// =============================================================================

/// Supplies the credentials blob sent after each open.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialsProvider: Send + Sync {
    /// Current credentials, or `None` to skip authentication.
    fn credentials(&self) -> Option<Credentials>;
}

impl<F> CredentialsProvider for F
where
    F: Fn() -> Option<Credentials> + Send + Sync,
{
    fn credentials(&self) -> Option<Credentials> {
        self()
    }
}

/// Supplies the signed-in user used in the connection URL.
#[cfg_attr(test, mockall::automock)]
pub trait UserIdProvider: Send + Sync {
    /// Current user, or `None` for a guest.
    fn user_id(&self) -> Option<UserId>;
}

impl<F> UserIdProvider for F
where
    F: Fn() -> Option<UserId> + Send + Sync,
{
    fn user_id(&self) -> Option<UserId> {
        self()
    }
}
