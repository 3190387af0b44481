//! Use Cases Layer - Async Orchestration
//!
//! Wires the synchronous domain core to the ports and tokio channels.
//!
//! Use cases:
//! - `FeedClient`: connection lifecycle, resume, cursor persistence, reconnect
//! - `IngestPipeline`: frame-paced draining into the series store

pub mod feed_client;
pub mod ingest_pipeline;

pub use feed_client::{FeedClient, FeedCommand, FeedHandle, FeedOutputs};
pub use ingest_pipeline::{IngestOutputs, IngestPipeline, IngestStats, SharedSeriesStore};
