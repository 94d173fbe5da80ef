//! Realtime Quote Stream
//!
//! WebSocket client for the quote server's per-session stream:
//!
//! - **Machine**: Sans-IO connection state machine (state, backoff, auth, subscription)
//! - **Client**: Async driver owning the transport, heartbeat and reconnect timer
//! - **Transport**: `tokio-tungstenite` adapter behind the transport ports
//! - **Codec**: JSON frames tagged by `type`

pub mod auth;
pub mod client;
pub mod codec;
pub mod endpoint;
pub mod heartbeat;
pub mod machine;
pub mod messages;
pub mod reconnect;
pub mod transport;

pub use auth::{AuthHandler, AuthState};
pub use client::{QuoteClientConfig, QuoteClientError, QuoteClientHandle, RealtimeQuoteClient};
pub use codec::{CodecError, JsonCodec};
pub use endpoint::{Endpoint, EndpointError};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
pub use machine::{Command, ConnectionMachine, MachineEvent, QuoteEvent};
pub use messages::{ClientMessage, ServerMessage};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use transport::{TungsteniteConnector, TungsteniteTransport};
