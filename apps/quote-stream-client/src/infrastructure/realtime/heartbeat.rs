//! Heartbeat Manager
//!
//! Emits a ping request every interval while a connection is open. The
//! first ping goes out one full interval after open, not immediately.
//! Pong replies are recorded for diagnostics only; a missing pong never
//! triggers a reconnect.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with a custom interval.
    #[must_use]
    pub const fn new(ping_interval: Duration) -> Self {
        Self { ping_interval }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &crate::WebSocketSettings) -> Self {
        Self {
            ping_interval: settings.heartbeat_interval,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Request to send a ping message.
    SendPing,
}

/// Ping/pong bookkeeping for the current connection.
#[derive(Debug, Default)]
pub struct HeartbeatState {
    last_ping: RwLock<Option<Instant>>,
    last_pong: RwLock<Option<Instant>>,
    pings_sent: AtomicU64,
    pongs_received: AtomicU64,
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a ping was written.
    pub fn mark_ping_sent(&self) {
        *self.last_ping.write() = Some(Instant::now());
        self.pings_sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Record that a pong was received.
    pub fn record_pong(&self) {
        *self.last_pong.write() = Some(Instant::now());
        self.pongs_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Pings written on this connection.
    #[must_use]
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent.load(Ordering::Relaxed)
    }

    /// Pongs received on this connection.
    #[must_use]
    pub fn pongs_received(&self) -> u64 {
        self.pongs_received.load(Ordering::Relaxed)
    }

    /// Time since the last pong, if one arrived.
    #[must_use]
    pub fn time_since_pong(&self) -> Option<Duration> {
        self.last_pong.read().map(|at| at.elapsed())
    }

    /// Round trip of the latest ping, if its pong has arrived.
    #[must_use]
    pub fn last_round_trip(&self) -> Option<Duration> {
        let ping = (*self.last_ping.read())?;
        let pong = (*self.last_pong.read())?;
        pong.checked_duration_since(ping)
    }

    /// Reset state for new connection.
    pub fn reset(&self) {
        *self.last_ping.write() = None;
        *self.last_pong.write() = None;
        self.pings_sent.store(0, Ordering::Relaxed);
        self.pongs_received.store(0, Ordering::Relaxed);
    }
}

/// Heartbeat ticker for one open connection.
///
/// # Example
///
/// ```rust,no_run
/// use quote_stream_client::infrastructure::realtime::heartbeat::{
///     HeartbeatConfig, HeartbeatEvent, HeartbeatManager,
/// };
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let (event_tx, mut event_rx) = mpsc::channel(4);
///     let cancel = CancellationToken::new();
///
///     let manager = HeartbeatManager::new(HeartbeatConfig::default(), event_tx, cancel.clone());
///     tokio::spawn(manager.run());
///
///     while let Some(HeartbeatEvent::SendPing) = event_rx.recv().await {
///         // Send {"type":"ping"} over the WebSocket
///     }
/// }
/// ```
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            cancel,
        }
    }

    /// Run the ticker until cancelled or the receiver is dropped.
    pub async fn run(self) {
        let period = self.config.ping_interval;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if self.event_tx.send(HeartbeatEvent::SendPing).await.is_err() {
                        tracing::debug!("Event channel closed, stopping heartbeat");
                        break;
                    }
                }
            }
        }
    }
}
