//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (WebSockets, file I/O, HTTP exporters). Each
//! sub-module groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `feeds`: WebSocket transport for the resumable feed
//! - `metrics`: Prometheus gauges and health/status endpoints
//! - `persistence`: cursor storage (JSON file, in-memory)

pub mod feeds;
pub mod metrics;
pub mod persistence;
