//! Session Identity
//!
//! Identifiers that end up in the connection URL, plus the opaque
//! credentials blob forwarded to the server after the transport opens.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

// =============================================================================
// Session ID
// =============================================================================

/// Client session identifier, generated once per client instance.
///
/// Reused for every connection the client makes, including reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Prefix carried by every generated session id.
    pub const PREFIX: &'static str = "client_";

    /// Generate a fresh random session id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{}{}", Self::PREFIX, Uuid::new_v4().simple()))
    }

    /// Get the session id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// User ID
// =============================================================================

/// Identity of the signed-in user, sent as the `user_id` query parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    /// Sentinel used when nobody is signed in.
    pub const GUEST: &'static str = "guest";

    /// Create a user id. Blank input yields `None`.
    #[must_use]
    pub fn new(value: impl AsRef<str>) -> Option<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Get the user id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Errors raised while building a credentials blob.
#[derive(Debug, Error)]
pub enum CredentialsError {
    /// The blob had no keys.
    #[error("credentials must contain at least one key")]
    Empty,

    /// The JSON document was not an object.
    #[error("credentials must be a JSON object")]
    NotAnObject,

    /// The JSON document could not be parsed.
    #[error("invalid credentials JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Opaque key/value credentials blob.
///
/// The client never interprets the contents; it forwards them verbatim in
/// the `auth` message. The `Debug` implementation only lists key names.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Credentials(Map<String, Value>);

impl Credentials {
    /// Create credentials from a JSON object map.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialsError::Empty`] if the map has no entries.
    pub fn new(keys: Map<String, Value>) -> Result<Self, CredentialsError> {
        if keys.is_empty() {
            return Err(CredentialsError::Empty);
        }
        Ok(Self(keys))
    }

    /// Parse credentials from a JSON object document.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid JSON, is not an object,
    /// or is an empty object.
    pub fn from_json(text: &str) -> Result<Self, CredentialsError> {
        match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => Self::new(map),
            _ => Err(CredentialsError::NotAnObject),
        }
    }

    /// Names of the keys present in the blob.
    pub fn key_names(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of entries in the blob.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; empty blobs are rejected at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("keys", &self.key_names().collect::<Vec<_>>())
            .field("values", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_has_prefix_and_is_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert!(a.as_str().starts_with("client_"));
        assert!(a.as_str().len() > SessionId::PREFIX.len());
        assert_ne!(a, b);
    }

    #[test]
    fn session_id_is_url_safe() {
        let id = SessionId::generate();
        assert!(
            id.as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        );
    }

    #[test]
    fn user_id_rejects_blank() {
        assert!(UserId::new("").is_none());
        assert!(UserId::new("   ").is_none());
        assert_eq!(UserId::new(" alice ").unwrap().as_str(), "alice");
    }

    #[test]
    fn credentials_from_json_object() {
        let creds = Credentials::from_json(r#"{"app_key":"k","app_secret":"s"}"#).unwrap();
        assert_eq!(creds.len(), 2);
        let mut names: Vec<_> = creds.key_names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["app_key", "app_secret"]);
    }

    #[test]
    fn credentials_reject_non_objects() {
        assert!(matches!(
            Credentials::from_json("[1,2]"),
            Err(CredentialsError::NotAnObject)
        ));
        assert!(matches!(
            Credentials::from_json("{}"),
            Err(CredentialsError::Empty)
        ));
        assert!(matches!(
            Credentials::from_json("not json"),
            Err(CredentialsError::Json(_))
        ));
    }

    #[test]
    fn credentials_debug_redacts_values() {
        let creds = Credentials::from_json(r#"{"app_secret":"hunter2"}"#).unwrap();
        let debug = format!("{creds:?}");
        assert!(debug.contains("app_secret"));
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn credentials_serialize_verbatim() {
        let raw = r#"{"app_key":"k","nested":{"a":1}}"#;
        let creds = Credentials::from_json(raw).unwrap();
        let value = serde_json::to_value(&creds).unwrap();
        assert_eq!(value, serde_json::from_str::<Value>(raw).unwrap());
    }
}
