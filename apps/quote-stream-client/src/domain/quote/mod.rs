//! Quote Snapshot and Client Outputs
//!
//! The payload of an `update` message is forwarded verbatim; the client
//! does not interpret quote fields.

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::connection::ConnectionState;
use super::subscription::Symbol;

/// Latest quote payload received for the desired symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteSnapshot {
    /// Symbol that was desired when the payload arrived.
    pub symbol: Symbol,
    /// Raw `data` field of the update message.
    pub payload: Value,
    /// Local receive time.
    pub received_at: DateTime<Utc>,
}

impl QuoteSnapshot {
    /// Create a snapshot stamped with the current time.
    #[must_use]
    pub fn now(symbol: Symbol, payload: Value) -> Self {
        Self {
            symbol,
            payload,
            received_at: Utc::now(),
        }
    }
}

/// Everything a consumer can observe about the client.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuoteOutputs {
    /// Latest quote, if any has arrived.
    pub quote: Option<QuoteSnapshot>,
    /// True exactly while the transport is open.
    pub is_connected: bool,
    /// Most recent human-readable error, cleared on successful open.
    pub error: Option<String>,
    /// Scheduled reconnects fired since the last successful open.
    pub reconnect_attempts: u32,
    /// Current transport state.
    pub state: ConnectionState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn default_outputs_are_idle() {
        let outputs = QuoteOutputs::default();
        assert!(outputs.quote.is_none());
        assert!(!outputs.is_connected);
        assert!(outputs.error.is_none());
        assert_eq!(outputs.reconnect_attempts, 0);
        assert_eq!(outputs.state, ConnectionState::Disconnected);
    }

    #[test]
    fn snapshot_keeps_payload() {
        let payload = json!({"price": "71200", "change": -0.5});
        let snapshot = QuoteSnapshot::now(Symbol::parse("005930").unwrap(), payload.clone());
        assert_eq!(snapshot.payload, payload);
        assert!(snapshot.received_at <= Utc::now());
    }
}
