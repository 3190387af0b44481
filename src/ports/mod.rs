//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `FeedConnector` / `FeedConnection`: persistent streaming connection
//! - `KeyValueStore`: resume cursor persistence

pub mod cursor_store;
pub mod feed_transport;

pub use cursor_store::{CursorError, KeyValueStore, load_cursor, save_cursor};
pub use feed_transport::{FeedConnection, FeedConnector};
