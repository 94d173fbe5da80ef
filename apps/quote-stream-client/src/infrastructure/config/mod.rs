//! Configuration Module
//!
//! Configuration loading for the quote client.

mod settings;

pub use settings::{API_BASE_URL_VAR, ClientConfig, ConfigError, KEYS_VAR, WebSocketSettings};
