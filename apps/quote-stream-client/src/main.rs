//! Quote Stream Client Binary
//!
//! Subscribes to one symbol and logs every quote until interrupted.
//!
//! # Usage
//!
//! ```bash
//! QUOTE_API_BASE_URL=http://localhost:8000 QUOTE_CLIENT_SYMBOL=005930 \
//!     cargo run --bin quote-stream-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `QUOTE_API_BASE_URL`: HTTP API base of the quote server
//! - `QUOTE_CLIENT_SYMBOL`: Symbol to subscribe to
//!
//! ## Optional
//! - `QUOTE_CLIENT_USER_ID`: User id sent on connect (default: guest)
//! - `QUOTE_CLIENT_KEYS`: Credentials blob as a JSON object, re-read on every connect
//! - `QUOTE_CLIENT_HEARTBEAT_INTERVAL_SECS`: Ping interval (default: 30)
//! - `QUOTE_CLIENT_RECONNECT_DELAY_INITIAL_MS`: First backoff delay (default: 1000)
//! - `QUOTE_CLIENT_RECONNECT_DELAY_MAX_MS`: Backoff cap (default: 30000)
//! - `QUOTE_CLIENT_RECONNECT_DELAY_MULTIPLIER`: Backoff multiplier (default: 2.0)
//! - `QUOTE_CLIENT_MAX_RECONNECT_ATTEMPTS`: Attempts before giving up (default: 5)
//! - `QUOTE_CLIENT_EVENT_CAPACITY`: Event channel capacity (default: 1024)
//! - `QUOTE_CLIENT_METRICS_PORT`: Prometheus metrics port (default: 0, disabled)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: quote-stream-client)
//! - `RUST_LOG`: Log level (default: info)

use std::time::Duration;

use anyhow::Context;
use quote_stream_client::infrastructure::config::{API_BASE_URL_VAR, KEYS_VAR};
use quote_stream_client::infrastructure::telemetry;
use quote_stream_client::{
    ClientConfig, Credentials, QuoteClientConfig, QuoteEvent, RealtimeQuoteClient,
    TungsteniteConnector, UserId, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Time allowed for the close handshake after disposal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(6);

/// Time allowed after cancellation before the client task is aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A provider may already be installed by a dependency; either way one exists.
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    let telemetry_guard = telemetry::init();

    tracing::info!(
        span_export = telemetry_guard.is_exporting(),
        "Starting quote stream client"
    );

    let config = ClientConfig::from_env()?;
    config
        .endpoint()
        .validate()
        .with_context(|| format!("invalid {API_BASE_URL_VAR}"))?;
    log_config(&config);

    if config.metrics_port > 0 {
        let addr = init_metrics(config.metrics_port).context("failed to start metrics exporter")?;
        tracing::info!(%addr, "Metrics exporter listening");
    }

    let symbol = config
        .symbol
        .clone()
        .context("QUOTE_CLIENT_SYMBOL must be set")?;

    let user_id = config.user_id.as_deref().and_then(UserId::new);
    let shutdown_token = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel::<QuoteEvent>(config.event_capacity);

    let (client, handle) = RealtimeQuoteClient::new(
        QuoteClientConfig::from_client_config(&config),
        TungsteniteConnector::new(),
        read_credentials,
        move || user_id.clone(),
        event_tx,
        shutdown_token.clone(),
    );

    tracing::info!(session_id = %handle.session_id(), "Session created");

    let mut client_task = tokio::spawn(client.run());
    let logger_task = tokio::spawn(log_events(event_rx));

    handle.set_symbol(Some(symbol.as_str()))?;

    await_shutdown().await;

    handle.dispose();
    match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut client_task).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "Client task failed"),
        Err(_) => {
            tracing::warn!(
                timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
                "Client did not stop in time, cancelling"
            );
            shutdown_token.cancel();
            if tokio::time::timeout(CANCEL_GRACE, &mut client_task)
                .await
                .is_err()
            {
                tracing::error!("Client ignored cancellation, aborting");
                client_task.abort();
            }
        }
    }
    logger_task.abort();

    tracing::info!("Quote stream client stopped");
    Ok(())
}

/// Read the credentials blob from the environment at connect time.
fn read_credentials() -> Option<Credentials> {
    let raw = std::env::var(KEYS_VAR).ok()?;
    match Credentials::from_json(&raw) {
        Ok(credentials) => Some(credentials),
        Err(e) => {
            tracing::warn!(error = %e, var = KEYS_VAR, "Ignoring unusable credentials");
            None
        }
    }
}

/// Log client events as they arrive.
async fn log_events(mut rx: mpsc::Receiver<QuoteEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            QuoteEvent::Connected => tracing::info!("Connected"),
            QuoteEvent::Disconnected(close) => {
                tracing::warn!(code = close.code, reason = %close.reason, "Disconnected");
            }
            QuoteEvent::Reconnecting { attempt, delay } => {
                tracing::info!(attempt, delay_ms = delay.as_millis(), "Reconnecting");
            }
            QuoteEvent::GaveUp { attempts } => {
                tracing::error!(attempts, "Giving up on reconnection");
            }
            QuoteEvent::Subscribed { symbol } => tracing::info!(%symbol, "Subscribed"),
            QuoteEvent::Authenticated => tracing::info!("Authenticated"),
            QuoteEvent::Quote(quote) => {
                tracing::info!(symbol = %quote.symbol, payload = %quote.payload, "Quote");
            }
            QuoteEvent::Error(message) => tracing::error!(error = %message, "Quote client error"),
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &ClientConfig) {
    tracing::info!(
        api_base_url = %config.api_base_url,
        symbol = config.symbol.as_deref().unwrap_or("-"),
        user_id = config.user_id.as_deref().unwrap_or(UserId::GUEST),
        metrics_port = config.metrics_port,
        "Configuration loaded"
    );
    tracing::debug!(
        heartbeat_secs = config.websocket.heartbeat_interval.as_secs(),
        reconnect_initial_ms = config.websocket.reconnect_delay_initial.as_millis(),
        reconnect_max_ms = config.websocket.reconnect_delay_max.as_millis(),
        max_reconnect_attempts = config.websocket.max_reconnect_attempts,
        "WebSocket settings"
    );
}

/// Load the nearest .env file found in an ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGTERM or SIGINT.
async fn await_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
