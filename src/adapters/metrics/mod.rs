//! Metrics and Monitoring Adapters
//!
//! Prometheus gauges on `/metrics` and the health endpoints
//! (`/live`, `/ready`, `/status`) via axum 0.7.

pub mod health;
pub mod prometheus;

pub use health::{HealthServer, HealthState};
pub use prometheus::MetricsRegistry;
