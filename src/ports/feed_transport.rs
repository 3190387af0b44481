//! Feed Transport Port - Streaming Connection Interface
//!
//! Defines the traits the feed client needs from a persistent streaming
//! connection. The WebSocket adapter implements them; tests use scripted
//! in-memory connections.

use async_trait::async_trait;

use crate::domain::sample::RawMessage;

/// Opens connections to the feed server.
#[async_trait]
pub trait FeedConnector: Send + Sync + 'static {
    /// Establish a connection to `url`.
    async fn connect(&self, url: &str) -> anyhow::Result<Box<dyn FeedConnection>>;
}

/// One open streaming connection.
#[async_trait]
pub trait FeedConnection: Send {
    /// Send a text message to the server.
    async fn send_text(&mut self, text: String) -> anyhow::Result<()>;

    /// Next data message.
    ///
    /// `None` means the stream closed cleanly; `Some(Err(_))` is a socket
    /// error. Transport-level pings are handled by the implementation.
    async fn next_message(&mut self) -> Option<anyhow::Result<RawMessage>>;

    /// Close the connection. Must be safe to call more than once.
    async fn close(&mut self);
}
