//! Endpoint Derivation
//!
//! Builds the per-connection WebSocket URL from the configured HTTP API
//! base: `http` becomes `ws`, `https` becomes `wss`, and the path gains
//! `/ws/{session_id}` with a `user_id` query parameter.
//!
//! ```text
//! http://localhost:8000        -> ws://localhost:8000/ws/client_ab12?user_id=guest
//! https://api.example.com/v1/  -> wss://api.example.com/v1/ws/client_ab12?user_id=alice
//! ```

use thiserror::Error;
use url::Url;

use crate::domain::session::{SessionId, UserId};

/// Errors raised while deriving the connection URL.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointError {
    /// The base URL could not be parsed.
    #[error("invalid API base URL: {0}")]
    Parse(#[from] url::ParseError),

    /// The base URL uses a scheme other than http(s) or ws(s).
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// The base URL cannot carry a path.
    #[error("API base URL cannot be used as a base")]
    CannotBeABase,
}

/// Configured API base from which connection URLs are derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: String,
}

impl Endpoint {
    /// Path segment placed before the session id.
    pub const WS_SEGMENT: &'static str = "ws";

    /// Create an endpoint from the API base URL.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    /// The configured base URL, as given.
    #[must_use]
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Check that the base URL can produce connection URLs.
    ///
    /// # Errors
    ///
    /// Returns the same error [`Endpoint::url_for`] would.
    pub fn validate(&self) -> Result<(), EndpointError> {
        self.socket_base().map(|_| ())
    }

    /// Derive the connection URL for a session and user.
    ///
    /// A missing user is sent as `guest`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is malformed or uses an
    /// unsupported scheme.
    pub fn url_for(
        &self,
        session_id: &SessionId,
        user_id: Option<&UserId>,
    ) -> Result<Url, EndpointError> {
        let mut url = self.socket_base()?;

        url.path_segments_mut()
            .map_err(|()| EndpointError::CannotBeABase)?
            .pop_if_empty()
            .push(Self::WS_SEGMENT)
            .push(session_id.as_str());

        url.query_pairs_mut()
            .clear()
            .append_pair("user_id", user_id.map_or(UserId::GUEST, UserId::as_str));
        url.set_fragment(None);

        Ok(url)
    }

    fn socket_base(&self) -> Result<Url, EndpointError> {
        let mut url = Url::parse(self.base.trim())?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(EndpointError::UnsupportedScheme(other.to_string())),
        };
        if url.cannot_be_a_base() {
            return Err(EndpointError::CannotBeABase);
        }
        url.set_scheme(scheme)
            .map_err(|()| EndpointError::UnsupportedScheme(scheme.to_string()))?;
        Ok(url)
    }
}
