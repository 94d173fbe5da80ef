//! Connection State Machine
//!
//! Sans-IO core of the quote client. Every input (caller request, transport
//! signal, timer) arrives as a [`MachineEvent`]; the machine updates its
//! state and returns the [`Command`]s the driver must carry out, in order.
//!
//! # Rules
//!
//! - No transport is requested until a symbol is desired.
//! - On open: reset the attempt counter, start the heartbeat, send auth if
//!   credentials exist, then subscribe.
//! - On any close or failed connect not caused by our own teardown:
//!   schedule a reconnect with backoff, or give up once the budget is spent.
//! - The attempt counter advances when a reconnect timer fires, never when
//!   one is scheduled.
//! - Teardown (symbol cleared, dispose) stops the heartbeat, cancels any
//!   pending reconnect and suppresses reconnection for the closing transport.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::connection::{CloseInfo, ConnectionState};
use crate::domain::quote::{QuoteOutputs, QuoteSnapshot};
use crate::domain::session::Credentials;
use crate::domain::subscription::{SubscriptionSlot, Symbol, SymbolChange};
use crate::infrastructure::metrics;

use super::auth::{AuthHandler, AuthState};
use super::codec::JsonCodec;
use super::heartbeat::HeartbeatState;
use super::messages::{ClientMessage, ServerMessage};
use super::reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};

// =============================================================================
// Inputs and Outputs
// =============================================================================

/// Inputs to the connection machine.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineEvent {
    /// Caller changed the desired symbol.
    SymbolChanged(Option<Symbol>),
    /// The requested transport opened. Carries the credentials read now.
    TransportOpened {
        /// Credentials supplied by the host at open time.
        credentials: Option<Credentials>,
    },
    /// The requested transport could not be opened.
    ConnectFailed(String),
    /// A text frame arrived.
    MessageReceived(String),
    /// The transport reported an error.
    TransportError(String),
    /// The transport closed.
    TransportClosed(CloseInfo),
    /// Heartbeat interval elapsed.
    HeartbeatTick,
    /// A scheduled reconnect delay elapsed.
    ReconnectTimerFired,
    /// Caller asked for an immediate reconnect with a fresh budget.
    ManualReconnect,
    /// Caller is done with the client.
    Dispose,
}

/// Side effects requested by the machine.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Derive the URL and open a new transport.
    OpenTransport,
    /// Send a message on the open transport.
    Send(ClientMessage),
    /// Close the current or pending transport.
    CloseTransport(CloseInfo),
    /// Start the heartbeat ticker.
    StartHeartbeat,
    /// Stop the heartbeat ticker.
    StopHeartbeat,
    /// Arm the reconnect timer.
    ScheduleReconnect {
        /// Delay before the timer fires.
        delay: Duration,
        /// Attempt number this timer will start.
        attempt: u32,
    },
    /// Disarm the reconnect timer.
    CancelReconnect,
    /// Publish an event to the consumer.
    Emit(QuoteEvent),
}

/// Events published to consumers of the client.
#[derive(Debug, Clone, PartialEq)]
pub enum QuoteEvent {
    /// Transport opened.
    Connected,
    /// Transport closed.
    Disconnected(CloseInfo),
    /// A reconnect was scheduled.
    Reconnecting {
        /// Attempt number the timer will start.
        attempt: u32,
        /// Delay before it starts.
        delay: Duration,
    },
    /// The reconnect budget is spent; no further attempts will be made.
    GaveUp {
        /// Attempts made since the last open.
        attempts: u32,
    },
    /// Server acknowledged a subscription.
    Subscribed {
        /// Symbol the server reported.
        symbol: String,
    },
    /// Server accepted the credentials.
    Authenticated,
    /// A quote update arrived.
    Quote(QuoteSnapshot),
    /// Human-readable error.
    Error(String),
}

// =============================================================================
// Connection Machine
// =============================================================================

/// Connection lifecycle, subscription and reconnect bookkeeping.
#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    subscription: SubscriptionSlot,
    policy: ReconnectPolicy,
    auth: AuthHandler,
    heartbeat: Arc<HeartbeatState>,
    codec: JsonCodec,
    outputs: QuoteOutputs,
    heartbeat_running: bool,
    reconnect_pending: bool,
    suppress_reconnect: bool,
    restart_after_close: bool,
    disposed: bool,
}

impl ConnectionMachine {
    /// Create an idle machine.
    #[must_use]
    pub fn new(reconnect: ReconnectConfig) -> Self {
        Self::with_heartbeat_state(reconnect, Arc::new(HeartbeatState::new()))
    }

    /// Create an idle machine that records pings and pongs into `heartbeat`.
    #[must_use]
    pub fn with_heartbeat_state(reconnect: ReconnectConfig, heartbeat: Arc<HeartbeatState>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            subscription: SubscriptionSlot::new(),
            policy: ReconnectPolicy::new(reconnect),
            auth: AuthHandler::new(),
            heartbeat,
            codec: JsonCodec::new(),
            outputs: QuoteOutputs::default(),
            heartbeat_running: false,
            reconnect_pending: false,
            suppress_reconnect: false,
            restart_after_close: false,
            disposed: false,
        }
    }

    /// Current transport state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Observable outputs.
    #[must_use]
    pub const fn outputs(&self) -> &QuoteOutputs {
        &self.outputs
    }

    /// Desired symbol.
    #[must_use]
    pub const fn desired_symbol(&self) -> Option<&Symbol> {
        self.subscription.desired()
    }

    /// Auth progress on the current connection.
    #[must_use]
    pub const fn auth_state(&self) -> AuthState {
        self.auth.state()
    }

    /// Check if a reconnect timer is armed.
    #[must_use]
    pub const fn is_reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// Check if the heartbeat should be running.
    #[must_use]
    pub const fn is_heartbeat_running(&self) -> bool {
        self.heartbeat_running
    }

    /// Check if [`MachineEvent::Dispose`] was handled.
    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Disposed and fully closed. Nothing further will happen.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.disposed && matches!(self.state, ConnectionState::Disconnected)
    }

    /// Apply one event and return the commands to execute, in order.
    pub fn handle(&mut self, event: MachineEvent) -> Vec<Command> {
        let mut out = Vec::new();

        match event {
            MachineEvent::SymbolChanged(symbol) => self.on_symbol_changed(symbol, &mut out),
            MachineEvent::TransportOpened { credentials } => {
                self.on_transport_opened(credentials, &mut out);
            }
            MachineEvent::ConnectFailed(reason) => self.on_connect_failed(&reason, &mut out),
            MachineEvent::MessageReceived(text) => self.on_message(&text, &mut out),
            MachineEvent::TransportError(reason) => self.on_transport_error(&reason, &mut out),
            MachineEvent::TransportClosed(close) => self.on_transport_closed(close, &mut out),
            MachineEvent::HeartbeatTick => self.on_heartbeat_tick(&mut out),
            MachineEvent::ReconnectTimerFired => self.on_reconnect_timer(&mut out),
            MachineEvent::ManualReconnect => self.on_manual_reconnect(&mut out),
            MachineEvent::Dispose => self.on_dispose(&mut out),
        }

        self.outputs.state = self.state;
        self.outputs.reconnect_attempts = self.policy.attempt_count();
        out
    }

    // =========================================================================
    // Caller Requests
    // =========================================================================

    fn on_symbol_changed(&mut self, symbol: Option<Symbol>, out: &mut Vec<Command>) {
        if self.disposed {
            tracing::warn!("Ignoring symbol change on disposed client");
            return;
        }

        match self.subscription.replace(symbol) {
            SymbolChange::Unchanged => {
                tracing::debug!("Desired symbol unchanged");
            }
            SymbolChange::Acquired(symbol) => {
                tracing::info!(symbol = %symbol, "Symbol selected");
                match self.state {
                    ConnectionState::Disconnected => self.start_fresh(out),
                    ConnectionState::Closing => self.restart_after_close = true,
                    ConnectionState::Connecting => {}
                    ConnectionState::Open => self.send_subscribe(&symbol, out),
                }
            }
            SymbolChange::Switched { from, to } => {
                tracing::info!(from = %from, to = %to, "Symbol switched");
                match self.state {
                    ConnectionState::Open => self.send_subscribe(&to, out),
                    ConnectionState::Closing => self.restart_after_close = true,
                    ConnectionState::Connecting | ConnectionState::Disconnected => {}
                }
            }
            SymbolChange::Cleared(previous) => {
                tracing::info!(symbol = %previous, "Symbol cleared");
                self.teardown("symbol cleared", out);
            }
        }
    }

    fn on_manual_reconnect(&mut self, out: &mut Vec<Command>) {
        if self.disposed {
            tracing::warn!("Ignoring reconnect request on disposed client");
            return;
        }

        self.policy.reset();
        self.outputs.error = None;

        if self.state != ConnectionState::Disconnected {
            tracing::debug!(state = %self.state, "Reconnect requested while transport active");
            return;
        }
        if self.subscription.is_empty() {
            tracing::debug!("Reconnect requested without a symbol");
            return;
        }

        tracing::info!("Manual reconnect requested");
        self.cancel_pending_reconnect(out);
        self.start_fresh(out);
    }

    fn on_dispose(&mut self, out: &mut Vec<Command>) {
        if self.disposed {
            return;
        }
        tracing::info!("Disposing quote client");
        self.disposed = true;
        self.teardown("client disposed", out);
    }

    // =========================================================================
    // Transport Signals
    // =========================================================================

    fn on_transport_opened(&mut self, credentials: Option<Credentials>, out: &mut Vec<Command>) {
        if self.state != ConnectionState::Connecting {
            tracing::warn!(state = %self.state, "Ignoring open signal for unexpected transport");
            return;
        }

        tracing::info!("Quote stream connected");
        self.state = ConnectionState::Open;
        self.policy.reset();
        self.outputs.is_connected = true;
        self.outputs.error = None;
        self.auth.on_connection_opened();
        self.heartbeat.reset();

        self.heartbeat_running = true;
        out.push(Command::StartHeartbeat);

        if let Some(keys) = credentials {
            if let Some(request) = self.auth.create_auth_request(keys) {
                out.push(Command::Send(request));
            }
        }

        if let Some(symbol) = self.subscription.desired().cloned() {
            self.send_subscribe(&symbol, out);
        }

        out.push(Command::Emit(QuoteEvent::Connected));
    }

    fn on_connect_failed(&mut self, reason: &str, out: &mut Vec<Command>) {
        if self.state != ConnectionState::Connecting {
            tracing::debug!(state = %self.state, "Ignoring connect failure for stale attempt");
            return;
        }

        tracing::warn!(error = %reason, "Failed to connect to quote stream");
        self.state = ConnectionState::Disconnected;
        self.outputs.is_connected = false;

        let message = format!("failed to connect to the quote server: {reason}");
        self.outputs.error = Some(message.clone());
        out.push(Command::Emit(QuoteEvent::Error(message)));

        self.after_disconnect(out);
    }

    fn on_transport_error(&mut self, reason: &str, out: &mut Vec<Command>) {
        if self.suppress_reconnect || !self.state.is_active() {
            tracing::debug!(error = %reason, "Transport error during teardown");
            return;
        }

        tracing::warn!(error = %reason, "Quote stream transport error");
        let message = format!("quote stream error: {reason}");
        self.outputs.error = Some(message.clone());
        out.push(Command::Emit(QuoteEvent::Error(message)));
    }

    fn on_transport_closed(&mut self, close: CloseInfo, out: &mut Vec<Command>) {
        if self.state == ConnectionState::Disconnected {
            tracing::debug!(close = %close, "Ignoring close for inactive transport");
            return;
        }

        tracing::info!(code = close.code, reason = %close.reason, "Quote stream disconnected");
        self.stop_heartbeat(out);
        self.state = ConnectionState::Disconnected;
        self.outputs.is_connected = false;

        if !self.suppress_reconnect {
            if let Some(message) = close.user_message() {
                self.outputs.error = Some(message.clone());
                out.push(Command::Emit(QuoteEvent::Error(message)));
            }
        }
        out.push(Command::Emit(QuoteEvent::Disconnected(close)));

        self.after_disconnect(out);
    }

    fn on_message(&mut self, text: &str, out: &mut Vec<Command>) {
        if self.state != ConnectionState::Open {
            tracing::trace!(state = %self.state, "Dropping frame outside open state");
            return;
        }

        match self.codec.decode(text) {
            Ok(messages) => {
                for message in messages {
                    metrics::record_message_received(message.kind());
                    self.on_server_message(message, out);
                }
            }
            Err(e) => {
                metrics::record_parse_error();
                tracing::warn!(error = %e, "Failed to parse quote stream message");
            }
        }
    }

    fn on_server_message(&mut self, message: ServerMessage, out: &mut Vec<Command>) {
        match message {
            ServerMessage::Update { data } => {
                let Some(symbol) = self.subscription.desired().cloned() else {
                    tracing::debug!("Dropping update with no desired symbol");
                    return;
                };
                let snapshot = QuoteSnapshot::now(symbol, data);
                self.outputs.quote = Some(snapshot.clone());
                out.push(Command::Emit(QuoteEvent::Quote(snapshot)));
            }
            ServerMessage::Subscribed { symbol } => {
                tracing::debug!(symbol = %symbol, "Subscription confirmed");
                out.push(Command::Emit(QuoteEvent::Subscribed { symbol }));
            }
            ServerMessage::Pong => {
                self.heartbeat.record_pong();
                tracing::trace!(round_trip = ?self.heartbeat.last_round_trip(), "Pong received");
            }
            ServerMessage::AuthSuccess => {
                if self.auth.on_auth_success() {
                    tracing::info!("Quote stream authenticated");
                    out.push(Command::Emit(QuoteEvent::Authenticated));
                } else {
                    tracing::debug!("Unsolicited auth_success");
                }
            }
            ServerMessage::Error { message } => {
                tracing::error!(error = %message, "Quote server reported an error");
                self.outputs.error = Some(message.clone());
                out.push(Command::Emit(QuoteEvent::Error(message)));
            }
            ServerMessage::Ping { .. } => {
                tracing::trace!("Server keepalive");
            }
            ServerMessage::Unknown => {
                tracing::debug!("Ignoring unknown message type");
            }
        }
    }

    // =========================================================================
    // Timers
    // =========================================================================

    fn on_heartbeat_tick(&mut self, out: &mut Vec<Command>) {
        if self.state != ConnectionState::Open || !self.heartbeat_running {
            tracing::trace!("Heartbeat tick outside open state");
            return;
        }
        self.heartbeat.mark_ping_sent();
        out.push(Command::Send(ClientMessage::Ping));
    }

    fn on_reconnect_timer(&mut self, out: &mut Vec<Command>) {
        if !self.reconnect_pending || self.suppress_reconnect || self.disposed {
            tracing::debug!("Ignoring stale reconnect timer");
            return;
        }
        if self.state != ConnectionState::Disconnected {
            tracing::debug!(state = %self.state, "Reconnect timer fired with transport active");
            self.reconnect_pending = false;
            return;
        }

        self.reconnect_pending = false;
        let attempt = self.policy.record_attempt();
        metrics::record_reconnect();
        tracing::info!(attempt, "Reconnecting to quote stream");
        self.begin_connecting(out);
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn start_fresh(&mut self, out: &mut Vec<Command>) {
        self.policy.reset();
        self.suppress_reconnect = false;
        self.restart_after_close = false;
        self.begin_connecting(out);
    }

    fn begin_connecting(&mut self, out: &mut Vec<Command>) {
        self.state = ConnectionState::Connecting;
        out.push(Command::OpenTransport);
    }

    fn send_subscribe(&mut self, symbol: &Symbol, out: &mut Vec<Command>) {
        if self
            .outputs
            .quote
            .as_ref()
            .is_some_and(|quote| &quote.symbol != symbol)
        {
            self.outputs.quote = None;
        }
        tracing::debug!(symbol = %symbol, "Subscribing");
        out.push(Command::Send(ClientMessage::subscribe(symbol.as_str())));
    }

    fn stop_heartbeat(&mut self, out: &mut Vec<Command>) {
        if self.heartbeat_running {
            self.heartbeat_running = false;
            out.push(Command::StopHeartbeat);
        }
    }

    fn cancel_pending_reconnect(&mut self, out: &mut Vec<Command>) {
        if self.reconnect_pending {
            self.reconnect_pending = false;
            out.push(Command::CancelReconnect);
        }
    }

    fn teardown(&mut self, reason: &str, out: &mut Vec<Command>) {
        self.suppress_reconnect = true;
        self.restart_after_close = false;
        self.cancel_pending_reconnect(out);
        self.stop_heartbeat(out);

        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                self.state = ConnectionState::Closing;
                self.outputs.is_connected = false;
                out.push(Command::CloseTransport(CloseInfo::normal(reason)));
            }
            ConnectionState::Closing | ConnectionState::Disconnected => {}
        }
    }

    fn after_disconnect(&mut self, out: &mut Vec<Command>) {
        if self.suppress_reconnect {
            if self.restart_after_close && !self.disposed && !self.subscription.is_empty() {
                tracing::debug!("Restarting for symbol selected during close");
                self.start_fresh(out);
            }
            return;
        }
        self.schedule_reconnect(out);
    }

    fn schedule_reconnect(&mut self, out: &mut Vec<Command>) {
        if let Some(delay) = self.policy.next_delay() {
            let attempt = self.policy.attempt_count().saturating_add(1);
            tracing::info!(
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Scheduling reconnect"
            );
            self.reconnect_pending = true;
            out.push(Command::ScheduleReconnect { delay, attempt });
            out.push(Command::Emit(QuoteEvent::Reconnecting { attempt, delay }));
        } else {
            let attempts = self.policy.attempt_count();
            let error = ReconnectError::MaxAttemptsExceeded(attempts);
            tracing::warn!(attempts, "Giving up on quote stream");
            self.outputs.error = Some(error.to_string());
            out.push(Command::Emit(QuoteEvent::GaveUp { attempts }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connection::{CLOSE_ABNORMAL, CLOSE_NORMAL};
    use serde_json::json;

    fn sym(s: &str) -> Symbol {
        Symbol::parse(s).unwrap()
    }

    fn creds() -> Credentials {
        Credentials::from_json(r#"{"app_key":"k","app_secret":"s"}"#).unwrap()
    }

    fn sent(commands: &[Command]) -> Vec<&ClientMessage> {
        commands
            .iter()
            .filter_map(|c| match c {
                Command::Send(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn has(commands: &[Command], pred: impl Fn(&Command) -> bool) -> bool {
        commands.iter().any(pred)
    }

    fn scheduled_delay(commands: &[Command]) -> Option<Duration> {
        commands.iter().find_map(|c| match c {
            Command::ScheduleReconnect { delay, .. } => Some(*delay),
            _ => None,
        })
    }

    /// Machine connected and open for `symbol`, without credentials.
    fn open_machine(symbol: &str) -> ConnectionMachine {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        machine.handle(MachineEvent::SymbolChanged(Some(sym(symbol))));
        machine.handle(MachineEvent::TransportOpened { credentials: None });
        assert_eq!(machine.state(), ConnectionState::Open);
        machine
    }

    fn drop_connection(machine: &mut ConnectionMachine) -> Vec<Command> {
        machine.handle(MachineEvent::TransportClosed(CloseInfo::abnormal()))
    }

    #[test]
    fn idle_until_symbol_supplied() {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        assert!(machine.handle(MachineEvent::SymbolChanged(None)).is_empty());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(!machine.outputs().is_connected);
    }

    #[test]
    fn first_symbol_opens_transport() {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        let commands = machine.handle(MachineEvent::SymbolChanged(Some(sym("005930"))));
        assert_eq!(commands, vec![Command::OpenTransport]);
        assert_eq!(machine.state(), ConnectionState::Connecting);
        assert_eq!(machine.outputs().state, ConnectionState::Connecting);
    }

    #[test]
    fn open_starts_heartbeat_then_auth_then_subscribe() {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        machine.handle(MachineEvent::SymbolChanged(Some(sym("005930"))));
        let commands = machine.handle(MachineEvent::TransportOpened {
            credentials: Some(creds()),
        });

        assert_eq!(
            commands,
            vec![
                Command::StartHeartbeat,
                Command::Send(ClientMessage::Auth { keys: creds() }),
                Command::Send(ClientMessage::subscribe("005930")),
                Command::Emit(QuoteEvent::Connected),
            ]
        );
        assert!(machine.outputs().is_connected);
        assert_eq!(machine.auth_state(), AuthState::Sent);
    }

    #[test]
    fn open_without_credentials_skips_auth() {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        machine.handle(MachineEvent::SymbolChanged(Some(sym("AAPL"))));
        let commands = machine.handle(MachineEvent::TransportOpened { credentials: None });
        assert_eq!(sent(&commands), vec![&ClientMessage::subscribe("AAPL")]);
        assert_eq!(machine.auth_state(), AuthState::NotSent);
    }

    #[test]
    fn abnormal_close_backs_off_then_gives_up() {
        let mut machine = open_machine("AAPL");
        let mut delays = Vec::new();

        let mut commands = drop_connection(&mut machine);
        while let Some(delay) = scheduled_delay(&commands) {
            delays.push(delay);
            assert!(machine.is_reconnect_pending());
            let open = machine.handle(MachineEvent::ReconnectTimerFired);
            assert_eq!(open, vec![Command::OpenTransport]);
            commands = machine.handle(MachineEvent::ConnectFailed("refused".to_string()));
        }

        assert_eq!(
            delays,
            [1, 2, 4, 8, 16].map(Duration::from_secs).to_vec()
        );
        assert!(has(&commands, |c| matches!(
            c,
            Command::Emit(QuoteEvent::GaveUp { attempts: 5 })
        )));
        assert_eq!(machine.outputs().reconnect_attempts, 5);
        assert_eq!(
            machine.outputs().error.as_deref(),
            Some("maximum reconnection attempts (5) exceeded")
        );
        assert_eq!(machine.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn counter_advances_only_when_timer_fires() {
        let mut machine = open_machine("AAPL");
        drop_connection(&mut machine);
        assert_eq!(machine.outputs().reconnect_attempts, 0);

        machine.handle(MachineEvent::ReconnectTimerFired);
        assert_eq!(machine.outputs().reconnect_attempts, 1);
    }

    #[test]
    fn open_resets_counter_and_error() {
        let mut machine = open_machine("AAPL");
        for _ in 0..3 {
            drop_connection(&mut machine);
            machine.handle(MachineEvent::ReconnectTimerFired);
            machine.handle(MachineEvent::ConnectFailed("refused".to_string()));
        }
        assert_eq!(machine.outputs().reconnect_attempts, 3);
        machine.handle(MachineEvent::ReconnectTimerFired);

        machine.handle(MachineEvent::TransportOpened { credentials: None });

        assert_eq!(machine.outputs().reconnect_attempts, 0);
        assert!(machine.outputs().error.is_none());
        assert!(machine.outputs().is_connected);
    }

    #[test]
    fn clean_server_close_reconnects_without_error() {
        let mut machine = open_machine("AAPL");
        let commands = machine.handle(MachineEvent::TransportClosed(CloseInfo::new(
            CLOSE_NORMAL,
            "server restart",
        )));
        assert_eq!(scheduled_delay(&commands), Some(Duration::from_secs(1)));
        assert!(machine.outputs().error.is_none());
        assert!(!machine.outputs().is_connected);
    }

    #[test]
    fn abnormal_close_sets_error() {
        let mut machine = open_machine("AAPL");
        drop_connection(&mut machine);
        assert!(
            machine
                .outputs()
                .error
                .as_deref()
                .is_some_and(|e| e.contains("abnormally"))
        );

        let mut machine = open_machine("AAPL");
        machine.handle(MachineEvent::TransportClosed(CloseInfo::new(4003, "")));
        assert_eq!(
            machine.outputs().error.as_deref(),
            Some("connection closed (code 4003)")
        );
    }

    #[test]
    fn close_stops_heartbeat_before_anything_else() {
        let mut machine = open_machine("AAPL");
        assert!(machine.is_heartbeat_running());
        let commands = drop_connection(&mut machine);
        assert_eq!(commands.first(), Some(&Command::StopHeartbeat));
        assert!(!machine.is_heartbeat_running());

        assert!(machine.handle(MachineEvent::HeartbeatTick).is_empty());
    }

    #[test]
    fn heartbeat_tick_sends_ping_while_open() {
        let mut machine = open_machine("AAPL");
        let commands = machine.handle(MachineEvent::HeartbeatTick);
        assert_eq!(commands, vec![Command::Send(ClientMessage::Ping)]);
    }

    #[test]
    fn dispose_closes_and_suppresses_reconnect() {
        let mut machine = open_machine("AAPL");
        let commands = machine.handle(MachineEvent::Dispose);
        assert_eq!(
            commands,
            vec![
                Command::StopHeartbeat,
                Command::CloseTransport(CloseInfo::normal("client disposed")),
            ]
        );
        assert_eq!(machine.state(), ConnectionState::Closing);

        // Even an abnormal code arriving afterwards must not reconnect.
        let commands = machine.handle(MachineEvent::TransportClosed(CloseInfo::new(
            CLOSE_ABNORMAL,
            "",
        )));
        assert!(scheduled_delay(&commands).is_none());
        assert!(machine.outputs().error.is_none());
        assert!(machine.is_finished());
    }

    #[test]
    fn dispose_cancels_pending_reconnect() {
        let mut machine = open_machine("AAPL");
        drop_connection(&mut machine);
        assert!(machine.is_reconnect_pending());

        let commands = machine.handle(MachineEvent::Dispose);
        assert_eq!(commands, vec![Command::CancelReconnect]);
        assert!(machine.is_finished());

        assert!(machine.handle(MachineEvent::ReconnectTimerFired).is_empty());
        assert!(
            machine
                .handle(MachineEvent::SymbolChanged(Some(sym("MSFT"))))
                .is_empty()
        );
    }

    #[test]
    fn dispose_while_connecting_closes_pending_transport() {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        machine.handle(MachineEvent::SymbolChanged(Some(sym("AAPL"))));
        let commands = machine.handle(MachineEvent::Dispose);
        assert_eq!(
            commands,
            vec![Command::CloseTransport(CloseInfo::normal("client disposed"))]
        );
        machine.handle(MachineEvent::TransportClosed(CloseInfo::normal("client disposed")));
        assert!(machine.is_finished());
    }

    #[test]
    fn same_symbol_twice_sends_nothing() {
        let mut machine = open_machine("AAPL");
        let commands = machine.handle(MachineEvent::SymbolChanged(Some(sym("AAPL"))));
        assert!(commands.is_empty());
    }

    #[test]
    fn switching_symbol_resubscribes_on_live_transport() {
        let mut machine = open_machine("AAPL");
        machine.handle(MachineEvent::MessageReceived(
            r#"{"type":"update","data":{"p":1}}"#.to_string(),
        ));
        assert!(machine.outputs().quote.is_some());

        let commands = machine.handle(MachineEvent::SymbolChanged(Some(sym("MSFT"))));

        assert_eq!(commands, vec![Command::Send(ClientMessage::subscribe("MSFT"))]);
        assert_eq!(machine.state(), ConnectionState::Open);
        assert!(machine.outputs().quote.is_none());
    }

    #[test]
    fn switching_while_connecting_subscribes_new_symbol_on_open() {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        machine.handle(MachineEvent::SymbolChanged(Some(sym("AAPL"))));
        assert!(
            machine
                .handle(MachineEvent::SymbolChanged(Some(sym("MSFT"))))
                .is_empty()
        );

        let commands = machine.handle(MachineEvent::TransportOpened { credentials: None });
        assert_eq!(sent(&commands), vec![&ClientMessage::subscribe("MSFT")]);
    }

    #[test]
    fn clearing_symbol_tears_down_quietly() {
        let mut machine = open_machine("AAPL");
        let commands = machine.handle(MachineEvent::SymbolChanged(None));
        assert_eq!(
            commands,
            vec![
                Command::StopHeartbeat,
                Command::CloseTransport(CloseInfo::normal("symbol cleared")),
            ]
        );

        let commands = machine.handle(MachineEvent::TransportClosed(CloseInfo::normal(
            "symbol cleared",
        )));
        assert!(scheduled_delay(&commands).is_none());
        assert_eq!(machine.state(), ConnectionState::Disconnected);
        assert!(!machine.is_finished());

        let commands = machine.handle(MachineEvent::SymbolChanged(Some(sym("MSFT"))));
        assert_eq!(commands, vec![Command::OpenTransport]);
    }

    #[test]
    fn symbol_during_closing_restarts_after_close() {
        let mut machine = open_machine("AAPL");
        machine.handle(MachineEvent::SymbolChanged(None));
        assert!(
            machine
                .handle(MachineEvent::SymbolChanged(Some(sym("MSFT"))))
                .is_empty()
        );

        let commands = machine.handle(MachineEvent::TransportClosed(CloseInfo::normal(
            "symbol cleared",
        )));
        assert_eq!(commands.last(), Some(&Command::OpenTransport));
        assert_eq!(machine.state(), ConnectionState::Connecting);
    }

    #[test]
    fn update_payload_forwarded_verbatim() {
        let mut machine = open_machine("005930");
        let commands = machine.handle(MachineEvent::MessageReceived(
            r#"{"type":"update","data":{"price":"71200","volume":[1,2,3]}}"#.to_string(),
        ));

        let quote = machine.outputs().quote.clone().unwrap();
        assert_eq!(quote.symbol, sym("005930"));
        assert_eq!(quote.payload, json!({"price": "71200", "volume": [1, 2, 3]}));
        assert_eq!(commands, vec![Command::Emit(QuoteEvent::Quote(quote))]);
    }

    #[test]
    fn server_error_surfaces_without_closing() {
        let mut machine = open_machine("AAPL");
        let commands = machine.handle(MachineEvent::MessageReceived(
            r#"{"type":"error","message":"invalid symbol"}"#.to_string(),
        ));
        assert_eq!(
            commands,
            vec![Command::Emit(QuoteEvent::Error("invalid symbol".to_string()))]
        );
        assert_eq!(machine.outputs().error.as_deref(), Some("invalid symbol"));
        assert_eq!(machine.state(), ConnectionState::Open);
    }

    #[test]
    fn unparseable_frames_are_dropped() {
        let mut machine = open_machine("AAPL");
        assert!(
            machine
                .handle(MachineEvent::MessageReceived("not json".to_string()))
                .is_empty()
        );
        assert!(
            machine
                .handle(MachineEvent::MessageReceived(
                    r#"{"type":"market_status"}"#.to_string()
                ))
                .is_empty()
        );
        assert!(
            machine
                .handle(MachineEvent::MessageReceived(
                    r#"{"type":"ping","timestamp":1.0}"#.to_string()
                ))
                .is_empty()
        );
        assert_eq!(machine.state(), ConnectionState::Open);
        assert!(machine.outputs().error.is_none());
    }

    #[test]
    fn auth_success_emits_event_once() {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        machine.handle(MachineEvent::SymbolChanged(Some(sym("AAPL"))));
        machine.handle(MachineEvent::TransportOpened {
            credentials: Some(creds()),
        });

        let ack = || MachineEvent::MessageReceived(r#"{"type":"auth_success"}"#.to_string());
        assert_eq!(
            machine.handle(ack()),
            vec![Command::Emit(QuoteEvent::Authenticated)]
        );
        assert!(machine.handle(ack()).is_empty());
        assert_eq!(machine.auth_state(), AuthState::Accepted);
    }

    #[test]
    fn pong_is_recorded() {
        let heartbeat = Arc::new(HeartbeatState::new());
        let mut machine =
            ConnectionMachine::with_heartbeat_state(ReconnectConfig::default(), heartbeat.clone());
        machine.handle(MachineEvent::SymbolChanged(Some(sym("AAPL"))));
        machine.handle(MachineEvent::TransportOpened { credentials: None });
        machine.handle(MachineEvent::HeartbeatTick);
        machine.handle(MachineEvent::MessageReceived(r#"{"type":"pong"}"#.to_string()));

        assert_eq!(heartbeat.pings_sent(), 1);
        assert_eq!(heartbeat.pongs_received(), 1);
    }

    #[test]
    fn frames_ignored_when_not_open() {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        machine.handle(MachineEvent::SymbolChanged(Some(sym("AAPL"))));
        let commands = machine.handle(MachineEvent::MessageReceived(
            r#"{"type":"update","data":{}}"#.to_string(),
        ));
        assert!(commands.is_empty());
        assert!(machine.outputs().quote.is_none());
    }

    #[test]
    fn connect_failure_schedules_reconnect() {
        let mut machine = ConnectionMachine::new(ReconnectConfig::default());
        machine.handle(MachineEvent::SymbolChanged(Some(sym("AAPL"))));
        let commands = machine.handle(MachineEvent::ConnectFailed("dns".to_string()));
        assert_eq!(scheduled_delay(&commands), Some(Duration::from_secs(1)));
        assert!(
            machine
                .outputs()
                .error
                .as_deref()
                .is_some_and(|e| e.contains("dns"))
        );
    }

    #[test]
    fn manual_reconnect_after_giving_up() {
        let config = ReconnectConfig {
            max_attempts: 1,
            ..Default::default()
        };
        let mut machine = ConnectionMachine::new(config);
        machine.handle(MachineEvent::SymbolChanged(Some(sym("AAPL"))));
        machine.handle(MachineEvent::ConnectFailed("refused".to_string()));
        machine.handle(MachineEvent::ReconnectTimerFired);
        let commands = machine.handle(MachineEvent::ConnectFailed("refused".to_string()));
        assert!(has(&commands, |c| matches!(
            c,
            Command::Emit(QuoteEvent::GaveUp { .. })
        )));

        let commands = machine.handle(MachineEvent::ManualReconnect);
        assert_eq!(commands, vec![Command::OpenTransport]);
        assert_eq!(machine.outputs().reconnect_attempts, 0);
        assert!(machine.outputs().error.is_none());
    }

    #[test]
    fn manual_reconnect_cancels_pending_timer() {
        let mut machine = open_machine("AAPL");
        drop_connection(&mut machine);
        let commands = machine.handle(MachineEvent::ManualReconnect);
        assert_eq!(
            commands,
            vec![Command::CancelReconnect, Command::OpenTransport]
        );
    }

    #[test]
    fn transport_error_reports_without_state_change() {
        let mut machine = open_machine("AAPL");
        let commands = machine.handle(MachineEvent::TransportError("reset".to_string()));
        assert_eq!(commands.len(), 1);
        assert_eq!(machine.state(), ConnectionState::Open);
        assert!(machine.outputs().error.is_some());
    }
}
