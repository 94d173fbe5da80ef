//! Client Configuration Settings
//!
//! Configuration types for the quote client, loaded from environment variables.

use std::time::Duration;

use crate::infrastructure::realtime::Endpoint;

/// Environment variable holding the HTTP API base URL.
pub const API_BASE_URL_VAR: &str = "QUOTE_API_BASE_URL";

/// Environment variable holding the credentials blob (a JSON object).
pub const KEYS_VAR: &str = "QUOTE_CLIENT_KEYS";

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Random jitter applied to each delay, as a fraction of it.
    pub reconnect_jitter_factor: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_millis(30_000),
            reconnect_delay_multiplier: 2.0,
            reconnect_jitter_factor: 0.0,
            max_reconnect_attempts: 5,
        }
    }
}

/// Complete client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// HTTP API base; the socket URL is derived from it.
    pub api_base_url: String,
    /// User id sent on connect, `guest` when absent.
    pub user_id: Option<String>,
    /// Symbol to subscribe on startup.
    pub symbol: Option<String>,
    /// WebSocket connection settings.
    pub websocket: WebSocketSettings,
    /// Capacity of the client event channel.
    pub event_capacity: usize,
    /// Prometheus metrics port (0 = disabled).
    pub metrics_port: u16,
}

impl ClientConfig {
    /// Default capacity of the client event channel.
    pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or empty.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_base_url = lookup(API_BASE_URL_VAR)
            .ok_or_else(|| ConfigError::MissingEnvVar(API_BASE_URL_VAR.to_string()))?;

        if api_base_url.trim().is_empty() {
            return Err(ConfigError::EmptyValue(API_BASE_URL_VAR.to_string()));
        }

        let defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            heartbeat_interval: parse_duration_secs(
                &lookup,
                "QUOTE_CLIENT_HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval,
            ),
            reconnect_delay_initial: parse_duration_millis(
                &lookup,
                "QUOTE_CLIENT_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_duration_millis(
                &lookup,
                "QUOTE_CLIENT_RECONNECT_DELAY_MAX_MS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_or(
                &lookup,
                "QUOTE_CLIENT_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            reconnect_jitter_factor: parse_or(
                &lookup,
                "QUOTE_CLIENT_RECONNECT_JITTER",
                defaults.reconnect_jitter_factor,
            ),
            max_reconnect_attempts: parse_or(
                &lookup,
                "QUOTE_CLIENT_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
        };

        Ok(Self {
            api_base_url,
            user_id: non_blank(lookup("QUOTE_CLIENT_USER_ID")),
            symbol: non_blank(lookup("QUOTE_CLIENT_SYMBOL")),
            websocket,
            event_capacity: parse_or(
                &lookup,
                "QUOTE_CLIENT_EVENT_CAPACITY",
                Self::DEFAULT_EVENT_CAPACITY,
            )
            .max(1),
            metrics_port: parse_or(&lookup, "QUOTE_CLIENT_METRICS_PORT", 0),
        })
    }

    /// The endpoint connection URLs are derived from.
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.api_base_url.clone())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_duration_secs(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
