//! Feed Transport Adapters - Streaming Connections
//!
//! Provides the WebSocket implementation of the feed transport ports.
//! Protocol logic lives in the domain; this layer only moves frames.

pub mod ws;

pub use ws::{WsConnection, WsConnector};
