//! WebSocket Transport Adapter
//!
//! Implements the transport ports on top of `tokio-tungstenite`. TLS is
//! provided by rustls with the webpki root store, so `wss://` bases work
//! without a system certificate bundle.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::application::ports::{Connector, Transport, TransportError, TransportEvent};
use crate::domain::connection::CloseInfo;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Longest wait for the reply to a peer-initiated close to reach the wire.
const CLOSE_REPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens WebSocket connections with `tokio-tungstenite`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Transport>, TransportError> {
        let (stream, response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(TungsteniteTransport::new(stream)))
    }
}

/// An open WebSocket connection.
pub struct TungsteniteTransport {
    stream: WsStream,
}

impl TungsteniteTransport {
    /// Wrap an established stream.
    #[must_use]
    pub const fn new(stream: WsStream) -> Self {
        Self { stream }
    }

    /// Push out the close reply tungstenite queued for a peer close frame.
    async fn flush_close_reply(&mut self) {
        match tokio::time::timeout(CLOSE_REPLY_TIMEOUT, self.stream.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "Close reply not flushed"),
            Err(_) => tracing::debug!("Close reply flush timed out"),
        }
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self, close: CloseInfo) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(close.code),
            reason: close.reason.into(),
        };
        self.stream
            .close(Some(frame))
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => {
                    return Some(TransportEvent::Message(text.as_str().to_owned()));
                }
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(TransportEvent::Message(text)),
                    Err(_) => tracing::debug!(len = data.len(), "Ignoring non-UTF-8 binary frame"),
                },
                // tungstenite queues the pong reply itself
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Close(frame)) => {
                    let info = frame.map_or_else(CloseInfo::no_status, |f| {
                        CloseInfo::new(u16::from(f.code), f.reason.as_str())
                    });
                    self.flush_close_reply().await;
                    return Some(TransportEvent::Closed(info));
                }
                Err(e) => return Some(TransportEvent::Error(e.to_string())),
            }
        }
    }
}
