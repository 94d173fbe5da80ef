//! Quote Stream Message Types
//!
//! Wire shapes for the quote push server. Every frame is a JSON object
//! whose `type` field selects the variant.
//!
//! # Client → Server
//!
//! ```json
//! {"type":"subscribe","symbol":"005930"}
//! {"type":"auth","keys":{"app_key":"...","app_secret":"..."}}
//! {"type":"ping"}
//! ```
//!
//! # Server → Client
//!
//! ```json
//! {"type":"update","data":{...}}
//! {"type":"subscribed","symbol":"005930"}
//! {"type":"pong"}
//! {"type":"auth_success"}
//! {"type":"error","message":"..."}
//! {"type":"ping","timestamp":1718000000.0}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::session::Credentials;

// =============================================================================
// Outbound
// =============================================================================

/// Messages the client sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replace the server-side subscription with this symbol.
    Subscribe {
        /// Symbol to follow.
        symbol: String,
    },
    /// Forward the credentials blob.
    Auth {
        /// Opaque key/value blob.
        keys: Credentials,
    },
    /// Application-level heartbeat.
    Ping,
}

impl ClientMessage {
    /// Build a subscribe request.
    #[must_use]
    pub fn subscribe(symbol: impl Into<String>) -> Self {
        Self::Subscribe {
            symbol: symbol.into(),
        }
    }

    /// Wire discriminator, also used as a metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Subscribe { .. } => "subscribe",
            Self::Auth { .. } => "auth",
            Self::Ping => "ping",
        }
    }
}

// =============================================================================
// Inbound
// =============================================================================

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// New quote payload for the subscribed symbol.
    Update {
        /// Quote payload, passed through untouched.
        data: Value,
    },
    /// Subscription acknowledged.
    Subscribed {
        /// Symbol the server is now streaming.
        #[serde(default)]
        symbol: String,
    },
    /// Reply to a client ping.
    Pong,
    /// Credentials accepted.
    AuthSuccess,
    /// Server-reported error. The connection stays up.
    Error {
        /// Human-readable description.
        #[serde(default)]
        message: String,
    },
    /// Server-initiated keepalive. Needs no reply.
    Ping {
        /// Server clock, seconds since the epoch.
        #[serde(default)]
        timestamp: Option<f64>,
    },
    /// Any other `type` value.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Wire discriminator, also used as a metric label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Update { .. } => "update",
            Self::Subscribed { .. } => "subscribed",
            Self::Pong => "pong",
            Self::AuthSuccess => "auth_success",
            Self::Error { .. } => "error",
            Self::Ping { .. } => "ping",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn subscribe_wire_shape() {
        let value = serde_json::to_value(ClientMessage::subscribe("005930")).unwrap();
        assert_eq!(value, json!({"type": "subscribe", "symbol": "005930"}));
    }

    #[test]
    fn auth_wire_shape_forwards_keys_verbatim() {
        let keys = Credentials::from_json(r#"{"app_key":"k","app_secret":"s"}"#).unwrap();
        let value = serde_json::to_value(ClientMessage::Auth { keys }).unwrap();
        assert_eq!(
            value,
            json!({"type": "auth", "keys": {"app_key": "k", "app_secret": "s"}})
        );
    }

    #[test]
    fn ping_wire_shape() {
        let value = serde_json::to_value(ClientMessage::Ping).unwrap();
        assert_eq!(value, json!({"type": "ping"}));
    }

    #[test]
    fn update_keeps_payload() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"update","data":{"price":"71200","nested":[1,2]}}"#)
                .unwrap();
        assert_eq!(
            msg,
            ServerMessage::Update {
                data: json!({"price": "71200", "nested": [1, 2]})
            }
        );
    }

    #[test]
    fn control_messages_parse() {
        let pong: ServerMessage = serde_json::from_str(r#"{"type":"pong"}"#).unwrap();
        assert_eq!(pong, ServerMessage::Pong);

        let auth: ServerMessage = serde_json::from_str(r#"{"type":"auth_success"}"#).unwrap();
        assert_eq!(auth, ServerMessage::AuthSuccess);

        let subscribed: ServerMessage =
            serde_json::from_str(r#"{"type":"subscribed","symbol":"AAPL"}"#).unwrap();
        assert_eq!(
            subscribed,
            ServerMessage::Subscribed {
                symbol: "AAPL".to_string()
            }
        );

        let error: ServerMessage =
            serde_json::from_str(r#"{"type":"error","message":"bad key"}"#).unwrap();
        assert_eq!(
            error,
            ServerMessage::Error {
                message: "bad key".to_string()
            }
        );
    }

    #[test]
    fn server_ping_with_timestamp() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"ping","timestamp":1718000000.5}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Ping {
                timestamp: Some(1_718_000_000.5)
            }
        );
    }

    #[test]
    fn unknown_type_is_tolerated() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"market_status","open":true}"#).unwrap();
        assert_eq!(msg, ServerMessage::Unknown);
        assert_eq!(msg.kind(), "unknown");
    }

    #[test]
    fn update_without_data_is_rejected() {
        assert!(serde_json::from_str::<ServerMessage>(r#"{"type":"update"}"#).is_err());
    }
}
