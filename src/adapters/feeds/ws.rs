//! WebSocket Feed Transport - tokio-tungstenite Adapter
//!
//! Implements the `FeedConnector` / `FeedConnection` ports over a
//! WebSocket. Text and binary frames are handed up untouched as
//! `RawMessage`s; pings are answered by tungstenite, pongs and raw
//! frames are skipped, and a close frame ends the stream.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, instrument};

use crate::domain::sample::RawMessage;
use crate::ports::feed_transport::{FeedConnection, FeedConnector};

/// Opens WebSocket connections (ws:// or wss://, rustls).
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

impl WsConnector {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FeedConnector for WsConnector {
    #[instrument(skip(self))]
    async fn connect(&self, url: &str) -> Result<Box<dyn FeedConnection>> {
        let (ws_stream, response) = connect_async(url)
            .await
            .context("Feed WebSocket connection failed")?;

        info!(status = %response.status(), "Feed WebSocket connected");

        Ok(Box::new(WsConnection {
            stream: ws_stream,
            closed: false,
        }))
    }
}

/// One open WebSocket session.
pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl FeedConnection for WsConnection {
    async fn send_text(&mut self, text: String) -> Result<()> {
        self.stream
            .send(Message::Text(text))
            .await
            .context("Failed to send on feed WebSocket")
    }

    async fn next_message(&mut self) -> Option<Result<RawMessage>> {
        if self.closed {
            return None;
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(RawMessage::Text(text))),
                Some(Ok(Message::Binary(bytes))) => return Some(Ok(RawMessage::Binary(bytes))),
                Some(Ok(Message::Ping(data))) => {
                    // Pong is handled automatically by tungstenite
                    debug!(len = data.len(), "Feed ping received");
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(frame = ?frame, "Feed close frame received");
                    self.closed = true;
                    return None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.closed = true;
                    return Some(Err(anyhow::anyhow!("Feed WebSocket error: {e}")));
                }
                None => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "Feed WebSocket close handshake failed");
        }
    }
}
