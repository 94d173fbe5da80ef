//! Prometheus Metrics Module
//!
//! Exposes quote client metrics in Prometheus format.
//!
//! # Metrics Categories
//!
//! - **Messages**: Frames received and sent, by message type
//! - **Connection**: Transport state gauge, reconnects, connect latency
//! - **Errors**: Frames that failed to parse, events dropped for slow consumers
//!
//! # Integration
//!
//! When a metrics port is configured, the exporter serves `/metrics` on it.
//! Without a recorder installed every call here is a no-op.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::domain::connection::ConnectionState;

// =============================================================================
// Exporter Installation
// =============================================================================

static INSTALLED: OnceLock<SocketAddr> = OnceLock::new();

/// Install the Prometheus recorder with an HTTP listener on `port`.
///
/// Calling this again after a successful install is a no-op.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<SocketAddr, BuildError> {
    if let Some(addr) = INSTALLED.get() {
        return Ok(*addr);
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    register_metrics();

    Ok(*INSTALLED.get_or_init(|| addr))
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "quote_client_messages_received_total",
        "Total frames received from the quote server"
    );
    describe_counter!(
        "quote_client_messages_sent_total",
        "Total frames sent to the quote server"
    );
    describe_counter!(
        "quote_client_parse_errors_total",
        "Total inbound frames that failed to parse"
    );
    describe_counter!(
        "quote_client_events_dropped_total",
        "Total client events dropped because the consumer lagged"
    );
    describe_counter!(
        "quote_client_reconnects_total",
        "Total scheduled reconnects that fired"
    );
    describe_gauge!(
        "quote_client_connection_state",
        "Transport state (0=disconnected, 1=connecting, 2=open, 3=closing)"
    );
    describe_histogram!(
        "quote_client_connect_seconds",
        "Time from connect request to open transport"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a message received from the server.
pub fn record_message_received(message_type: &'static str) {
    counter!(
        "quote_client_messages_received_total",
        "message_type" => message_type
    )
    .increment(1);
}

/// Record a message sent to the server.
pub fn record_message_sent(message_type: &'static str) {
    counter!(
        "quote_client_messages_sent_total",
        "message_type" => message_type
    )
    .increment(1);
}

/// Record a frame that failed to parse.
pub fn record_parse_error() {
    counter!("quote_client_parse_errors_total").increment(1);
}

/// Record an event dropped because the consumer channel was full.
pub fn record_event_dropped() {
    counter!("quote_client_events_dropped_total").increment(1);
}

/// Record a fired reconnect timer.
pub fn record_reconnect() {
    counter!("quote_client_reconnects_total").increment(1);
}

/// Publish the current transport state.
pub fn set_connection_state(state: ConnectionState) {
    gauge!("quote_client_connection_state").set(state.gauge_value());
}

/// Record how long a connect took.
pub fn record_connect_duration(duration: Duration) {
    histogram!("quote_client_connect_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
