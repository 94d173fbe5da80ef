#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Quote Stream Client - Realtime Market Data Subscriber
//!
//! Keeps one WebSocket connection to the quote push server open while a
//! symbol is wanted, subscribes to that symbol, and publishes the latest
//! quote together with connection health.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Connection state, symbols, session identity, quote outputs
//!   - `connection`: Connection states and close classification
//!   - `subscription`: Symbol validation and the single-symbol slot
//!   - `session`: Session id, user id, credentials blob
//!   - `quote`: Latest quote snapshot and published outputs
//!
//! - **Application**: Port definitions
//!   - `ports`: Transport, connector, credentials and user id providers
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `realtime`: State machine, async driver, WebSocket transport
//!   - `config`: Environment configuration
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Logging and OpenTelemetry export
//!
//! # Data Flow
//!
//! ```text
//!  set_symbol ──► control ──┐
//!                           ▼
//!  server WS ◄──► Transport ──► ConnectionMachine ──► watch<QuoteOutputs>
//!                           ▲          │
//!  heartbeat / backoff ─────┘          └──────────► mpsc<QuoteEvent>
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Connection and quote types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{CloseInfo, CloseKind, ConnectionState};
pub use domain::quote::{QuoteOutputs, QuoteSnapshot};
pub use domain::session::{Credentials, CredentialsError, SessionId, UserId};
pub use domain::subscription::{Symbol, SymbolError};

// Ports
pub use application::ports::{
    Connector, CredentialsProvider, Transport, TransportError, TransportEvent, UserIdProvider,
};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, WebSocketSettings};

// Realtime client
pub use infrastructure::realtime::{
    QuoteClientConfig, QuoteClientError, QuoteClientHandle, QuoteEvent, RealtimeQuoteClient,
    TungsteniteConnector,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
