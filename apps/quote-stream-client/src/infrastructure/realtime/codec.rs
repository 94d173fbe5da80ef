//! Stream Codec Module
//!
//! JSON encoding and decoding for the quote stream. The server sends one
//! object per frame; batched arrays are accepted as well.

use serde_json::Value;

use super::messages::{ClientMessage, ServerMessage};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame had no content.
    #[error("empty frame")]
    Empty,

    /// Invalid message format.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// JSON codec for the quote stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame into server messages.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is empty, is not JSON, or an element
    /// lacks a string `type` field.
    pub fn decode(&self, text: &str) -> Result<Vec<ServerMessage>, CodecError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(CodecError::Empty);
        }

        match serde_json::from_str::<Value>(trimmed)? {
            Value::Array(values) => values.into_iter().map(Self::decode_value).collect(),
            value @ Value::Object(_) => Ok(vec![Self::decode_value(value)?]),
            other => Err(CodecError::InvalidFormat(format!(
                "expected JSON object or array, got {}",
                json_kind(&other)
            ))),
        }
    }

    fn decode_value(value: Value) -> Result<ServerMessage, CodecError> {
        match value.get("type") {
            Some(Value::String(_)) => Ok(serde_json::from_value(value)?),
            Some(_) => Err(CodecError::InvalidFormat(
                "`type` field is not a string".to_string(),
            )),
            None => Err(CodecError::InvalidFormat(
                "missing `type` field".to_string(),
            )),
        }
    }

    /// Encode an outbound message.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode(&self, message: &ClientMessage) -> Result<String, CodecError> {
        Ok(serde_json::to_string(message)?)
    }
}

const fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
