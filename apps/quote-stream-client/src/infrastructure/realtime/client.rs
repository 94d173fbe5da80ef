//! Realtime Quote Client
//!
//! Async driver around [`ConnectionMachine`]. A single task owns the
//! transport, the heartbeat ticker and the reconnect timer, feeds every
//! signal into the machine and executes the commands it returns. Callers
//! interact through a cloneable [`QuoteClientHandle`].
//!
//! # Shutdown
//!
//! The client stops after [`QuoteClientHandle::dispose`], when the
//! cancellation token fires, or when every handle has been dropped. In all
//! three cases the open transport is closed with code 1000 and no timer
//! survives. The close handshake is bounded by [`CLOSE_TIMEOUT`]; cancelling
//! the token after a dispose abandons it at once.

use std::collections::VecDeque;
use std::future::{Future, pending};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{
    Connector, CredentialsProvider, Transport, TransportError, TransportEvent, UserIdProvider,
};
use crate::domain::connection::CloseInfo;
use crate::domain::quote::QuoteOutputs;
use crate::domain::session::SessionId;
use crate::domain::subscription::{Symbol, SymbolError};
use crate::infrastructure::metrics;

use super::codec::JsonCodec;
use super::endpoint::Endpoint;
use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::machine::{Command, ConnectionMachine, MachineEvent, QuoteEvent};
use super::messages::ClientMessage;
use super::reconnect::ReconnectConfig;

/// Longest wait for a close handshake before the transport is dropped.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest wait for one outbound frame before the transport is treated as dead.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Error Type
// =============================================================================

/// Errors returned by [`QuoteClientHandle`].
#[derive(Debug, Error)]
pub enum QuoteClientError {
    /// The client task has stopped.
    #[error("quote client has stopped")]
    Stopped,

    /// The symbol failed validation.
    #[error("invalid symbol: {0}")]
    InvalidSymbol(#[from] SymbolError),
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the quote client.
#[derive(Debug, Clone)]
pub struct QuoteClientConfig {
    /// API base from which connection URLs are derived.
    pub endpoint: Endpoint,
    /// Reconnection configuration.
    pub reconnect: ReconnectConfig,
    /// Heartbeat configuration.
    pub heartbeat: HeartbeatConfig,
}

impl QuoteClientConfig {
    /// Create a configuration with default timings.
    #[must_use]
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            endpoint: Endpoint::new(api_base_url),
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    /// Create configuration from the environment-derived client config.
    #[must_use]
    pub fn from_client_config(config: &crate::ClientConfig) -> Self {
        Self {
            endpoint: config.endpoint(),
            reconnect: ReconnectConfig::from_websocket_settings(&config.websocket),
            heartbeat: HeartbeatConfig::from_websocket_settings(&config.websocket),
        }
    }
}

// =============================================================================
// Handle
// =============================================================================

#[derive(Debug)]
enum Control {
    SetSymbol(Option<Symbol>),
    Reconnect,
    Dispose,
}

/// Cloneable handle for driving and observing a running client.
#[derive(Debug, Clone)]
pub struct QuoteClientHandle {
    control_tx: mpsc::UnboundedSender<Control>,
    outputs: watch::Receiver<QuoteOutputs>,
    session_id: SessionId,
    heartbeat: Arc<HeartbeatState>,
}

impl QuoteClientHandle {
    /// Set or clear the desired symbol.
    ///
    /// Setting the current symbol again has no effect.
    ///
    /// # Errors
    ///
    /// Returns an error if the symbol is blank or the client has stopped.
    pub fn set_symbol(&self, symbol: Option<&str>) -> Result<(), QuoteClientError> {
        let symbol = symbol.map(Symbol::parse).transpose()?;
        self.send(Control::SetSymbol(symbol))
    }

    /// Reconnect now with a fresh attempt budget.
    ///
    /// # Errors
    ///
    /// Returns an error if the client has stopped.
    pub fn reconnect(&self) -> Result<(), QuoteClientError> {
        self.send(Control::Reconnect)
    }

    /// Close the connection and stop the client. Idempotent.
    pub fn dispose(&self) {
        if self.send(Control::Dispose).is_err() {
            tracing::trace!("Dispose requested on stopped client");
        }
    }

    /// Subscribe to output changes.
    #[must_use]
    pub fn outputs(&self) -> watch::Receiver<QuoteOutputs> {
        self.outputs.clone()
    }

    /// Current outputs.
    #[must_use]
    pub fn snapshot(&self) -> QuoteOutputs {
        self.outputs.borrow().clone()
    }

    /// Wait until the outputs satisfy `predicate`.
    ///
    /// # Errors
    ///
    /// Returns an error if the client stops first.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&QuoteOutputs) -> bool,
    ) -> Result<QuoteOutputs, QuoteClientError> {
        let mut outputs = self.outputs.clone();
        let result = outputs.wait_for(predicate).await;
        result
            .map(|outputs| outputs.clone())
            .map_err(|_| QuoteClientError::Stopped)
    }

    /// Session id used in every connection URL.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Ping/pong bookkeeping for the current connection.
    #[must_use]
    pub fn heartbeat(&self) -> Arc<HeartbeatState> {
        Arc::clone(&self.heartbeat)
    }

    fn send(&self, control: Control) -> Result<(), QuoteClientError> {
        self.control_tx
            .send(control)
            .map_err(|_| QuoteClientError::Stopped)
    }
}

// =============================================================================
// Timers
// =============================================================================

type ConnectFuture =
    Pin<Box<dyn Future<Output = Result<Box<dyn Transport>, TransportError>> + Send>>;

/// Heartbeat ticker bound to one open connection.
struct ActiveHeartbeat {
    cancel: CancellationToken,
    events: mpsc::Receiver<HeartbeatEvent>,
    task: JoinHandle<()>,
}

impl Drop for ActiveHeartbeat {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

/// Single-shot reconnect timer.
#[derive(Default)]
struct ReconnectTimer {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ReconnectTimer {
    fn arm(&mut self, delay: Duration) {
        self.sleep = Some(Box::pin(tokio::time::sleep(delay)));
    }

    fn cancel(&mut self) -> bool {
        self.sleep.take().is_some()
    }

    async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => {
                sleep.as_mut().await;
                self.sleep = None;
            }
            None => pending().await,
        }
    }
}

// =============================================================================
// Client
// =============================================================================

/// Realtime quote client driver.
///
/// # Example
///
/// ```rust,no_run
/// use quote_stream_client::infrastructure::realtime::{
///     QuoteClientConfig, RealtimeQuoteClient, TungsteniteConnector,
/// };
/// use quote_stream_client::{Credentials, UserId};
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
///
/// async fn example() {
///     let (event_tx, _event_rx) = mpsc::channel(64);
///     let (client, handle) = RealtimeQuoteClient::new(
///         QuoteClientConfig::new("http://localhost:8000"),
///         TungsteniteConnector::new(),
///         || None::<Credentials>,
///         || None::<UserId>,
///         event_tx,
///         CancellationToken::new(),
///     );
///     tokio::spawn(client.run());
///
///     handle.set_symbol(Some("005930")).ok();
///     let outputs = handle.wait_for(|o| o.quote.is_some()).await;
///     println!("{outputs:?}");
///     handle.dispose();
/// }
/// ```
pub struct RealtimeQuoteClient<C> {
    config: QuoteClientConfig,
    connector: Arc<C>,
    credentials: Box<dyn CredentialsProvider>,
    user_id: Box<dyn UserIdProvider>,
    session_id: SessionId,
    machine: ConnectionMachine,
    heartbeat_state: Arc<HeartbeatState>,
    codec: JsonCodec,
    control_rx: mpsc::UnboundedReceiver<Control>,
    outputs_tx: watch::Sender<QuoteOutputs>,
    event_tx: mpsc::Sender<QuoteEvent>,
    cancel: CancellationToken,
    transport: Option<Box<dyn Transport>>,
    connecting: Option<ConnectFuture>,
    connect_started: Option<Instant>,
    heartbeat: Option<ActiveHeartbeat>,
    reconnect_timer: ReconnectTimer,
    pending: VecDeque<MachineEvent>,
}

impl<C: Connector> RealtimeQuoteClient<C> {
    /// Create a client and its handle. Nothing connects until
    /// [`RealtimeQuoteClient::run`] is spawned and a symbol is set.
    #[must_use]
    pub fn new(
        config: QuoteClientConfig,
        connector: C,
        credentials: impl CredentialsProvider + 'static,
        user_id: impl UserIdProvider + 'static,
        event_tx: mpsc::Sender<QuoteEvent>,
        cancel: CancellationToken,
    ) -> (Self, QuoteClientHandle) {
        let session_id = SessionId::generate();
        let heartbeat_state = Arc::new(HeartbeatState::new());
        let machine = ConnectionMachine::with_heartbeat_state(
            config.reconnect.clone(),
            Arc::clone(&heartbeat_state),
        );
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (outputs_tx, outputs_rx) = watch::channel(machine.outputs().clone());

        let handle = QuoteClientHandle {
            control_tx,
            outputs: outputs_rx,
            session_id: session_id.clone(),
            heartbeat: Arc::clone(&heartbeat_state),
        };

        let client = Self {
            config,
            connector: Arc::new(connector),
            credentials: Box::new(credentials),
            user_id: Box::new(user_id),
            session_id,
            machine,
            heartbeat_state,
            codec: JsonCodec::new(),
            control_rx,
            outputs_tx,
            event_tx,
            cancel,
            transport: None,
            connecting: None,
            connect_started: None,
            heartbeat: None,
            reconnect_timer: ReconnectTimer::default(),
            pending: VecDeque::new(),
        };

        (client, handle)
    }

    /// Session id used in every connection URL.
    #[must_use]
    pub const fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Run the client until disposed.
    pub async fn run(mut self) {
        tracing::info!(session_id = %self.session_id, "Quote client started");

        loop {
            let disposed = self.machine.is_disposed();
            let event = tokio::select! {
                () = self.cancel.cancelled() => {
                    if disposed {
                        tracing::debug!("Cancelled while shutting down");
                        break;
                    }
                    MachineEvent::Dispose
                }
                control = self.control_rx.recv(), if !disposed => match control {
                    Some(Control::SetSymbol(symbol)) => MachineEvent::SymbolChanged(symbol),
                    Some(Control::Reconnect) => MachineEvent::ManualReconnect,
                    Some(Control::Dispose) | None => MachineEvent::Dispose,
                },
                result = Self::await_connect(&mut self.connecting) => {
                    self.connecting = None;
                    self.on_connect_result(result)
                }
                event = Self::next_transport_event(&mut self.transport) => {
                    self.on_transport_event(event)
                }
                () = Self::next_heartbeat(&mut self.heartbeat) => MachineEvent::HeartbeatTick,
                () = self.reconnect_timer.fired() => MachineEvent::ReconnectTimerFired,
            };

            self.dispatch(event).await;

            if self.machine.is_finished() {
                break;
            }
        }

        self.stop_heartbeat();
        self.reconnect_timer.cancel();
        tracing::info!(session_id = %self.session_id, "Quote client stopped");
    }

    // =========================================================================
    // Signal Sources
    // =========================================================================

    async fn await_connect(
        connecting: &mut Option<ConnectFuture>,
    ) -> Result<Box<dyn Transport>, TransportError> {
        match connecting {
            Some(future) => future.as_mut().await,
            None => pending().await,
        }
    }

    async fn next_transport_event(
        transport: &mut Option<Box<dyn Transport>>,
    ) -> Option<TransportEvent> {
        match transport {
            Some(transport) => transport.next_event().await,
            None => pending().await,
        }
    }

    async fn next_heartbeat(heartbeat: &mut Option<ActiveHeartbeat>) {
        match heartbeat {
            Some(active) => match active.events.recv().await {
                Some(HeartbeatEvent::SendPing) => {}
                None => pending().await,
            },
            None => pending().await,
        }
    }

    fn on_connect_result(
        &mut self,
        result: Result<Box<dyn Transport>, TransportError>,
    ) -> MachineEvent {
        if let Some(started) = self.connect_started.take() {
            metrics::record_connect_duration(started.elapsed());
        }
        match result {
            Ok(transport) => {
                self.transport = Some(transport);
                MachineEvent::TransportOpened {
                    credentials: self.credentials.credentials(),
                }
            }
            Err(e) => MachineEvent::ConnectFailed(e.to_string()),
        }
    }

    fn on_transport_event(&mut self, event: Option<TransportEvent>) -> MachineEvent {
        match event {
            Some(TransportEvent::Message(text)) => MachineEvent::MessageReceived(text),
            Some(TransportEvent::Error(reason)) => MachineEvent::TransportError(reason),
            Some(TransportEvent::Closed(close)) => {
                self.transport = None;
                MachineEvent::TransportClosed(close)
            }
            None => {
                self.transport = None;
                MachineEvent::TransportClosed(CloseInfo::abnormal())
            }
        }
    }

    // =========================================================================
    // Command Execution
    // =========================================================================

    async fn dispatch(&mut self, event: MachineEvent) {
        self.pending.push_back(event);
        while let Some(event) = self.pending.pop_front() {
            for command in self.machine.handle(event) {
                self.execute(command).await;
            }
        }
        self.publish_outputs();
    }

    async fn execute(&mut self, command: Command) {
        match command {
            Command::OpenTransport => self.open_transport(),
            Command::Send(message) => self.send(&message).await,
            Command::CloseTransport(close) => self.close_transport(close).await,
            Command::StartHeartbeat => self.start_heartbeat(),
            Command::StopHeartbeat => self.stop_heartbeat(),
            Command::ScheduleReconnect { delay, attempt } => {
                tracing::debug!(attempt, ?delay, "Reconnect timer armed");
                self.reconnect_timer.arm(delay);
            }
            Command::CancelReconnect => {
                if self.reconnect_timer.cancel() {
                    tracing::debug!("Reconnect timer cancelled");
                }
            }
            Command::Emit(event) => self.emit(event),
        }
    }

    fn open_transport(&mut self) {
        self.transport = None;
        let user_id = self.user_id.user_id();

        match self.config.endpoint.url_for(&self.session_id, user_id.as_ref()) {
            Ok(url) => {
                tracing::info!(url = %url, "Connecting to quote stream");
                let connector = Arc::clone(&self.connector);
                self.connect_started = Some(Instant::now());
                self.connecting = Some(Box::pin(async move { connector.connect(&url).await }));
            }
            Err(e) => {
                tracing::error!(error = %e, "Cannot derive quote stream URL");
                self.pending
                    .push_back(MachineEvent::ConnectFailed(e.to_string()));
            }
        }
    }

    async fn send(&mut self, message: &ClientMessage) {
        let Some(transport) = self.transport.as_mut() else {
            tracing::debug!(kind = message.kind(), "No open transport; message dropped");
            return;
        };

        let text = match self.codec.encode(message) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, kind = message.kind(), "Failed to encode message");
                return;
            }
        };

        let result = tokio::time::timeout(SEND_TIMEOUT, transport.send_text(text)).await;
        match result {
            Ok(Ok(())) => metrics::record_message_sent(message.kind()),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, kind = message.kind(), "Failed to send message");
            }
            Err(_) => {
                tracing::warn!(
                    kind = message.kind(),
                    timeout_ms = u64::try_from(SEND_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
                    "Send stalled; dropping transport"
                );
                self.transport = None;
                self.pending
                    .push_back(MachineEvent::TransportClosed(CloseInfo::abnormal()));
            }
        }
    }

    async fn close_transport(&mut self, close: CloseInfo) {
        if self.connecting.take().is_some() {
            self.connect_started = None;
            tracing::debug!("Abandoning in-flight connection attempt");
        }
        if let Some(mut transport) = self.transport.take() {
            // a cancel that arrives mid-close abandons it; one that caused it does not
            let cancel = self.cancel.clone();
            let abandon_on_cancel = !cancel.is_cancelled();
            let cancelled = async move {
                if abandon_on_cancel {
                    cancel.cancelled().await;
                } else {
                    pending::<()>().await;
                }
            };
            tokio::select! {
                result = tokio::time::timeout(CLOSE_TIMEOUT, transport.close(close.clone())) => {
                    match result {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => tracing::debug!(error = %e, "Close handshake failed"),
                        Err(_) => tracing::warn!(
                            timeout_ms = u64::try_from(CLOSE_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
                            "Close handshake timed out; dropping transport"
                        ),
                    }
                }
                () = cancelled => tracing::warn!("Close handshake abandoned on cancellation"),
            }
        }
        self.pending.push_back(MachineEvent::TransportClosed(close));
    }

    fn start_heartbeat(&mut self) {
        self.stop_heartbeat();

        let cancel = self.cancel.child_token();
        let (event_tx, events) = mpsc::channel(4);
        let manager = HeartbeatManager::new(self.config.heartbeat.clone(), event_tx, cancel.clone());
        let task = tokio::spawn(manager.run());

        self.heartbeat = Some(ActiveHeartbeat {
            cancel,
            events,
            task,
        });
    }

    fn stop_heartbeat(&mut self) {
        if self.heartbeat.take().is_some() {
            tracing::debug!(
                pings = self.heartbeat_state.pings_sent(),
                pongs = self.heartbeat_state.pongs_received(),
                since_pong_ms = self
                    .heartbeat_state
                    .time_since_pong()
                    .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
                "Heartbeat stopped"
            );
        }
    }

    fn emit(&self, event: QuoteEvent) {
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::record_event_dropped();
                tracing::warn!("Event consumer lagging; event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::trace!("Event receiver dropped");
            }
        }
    }

    fn publish_outputs(&self) {
        let next = self.machine.outputs();
        metrics::set_connection_state(next.state);
        self.outputs_tx.send_if_modified(|current| {
            if current == next {
                false
            } else {
                current.clone_from(next);
                true
            }
        });
    }
}
