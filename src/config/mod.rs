//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`. Every field
//! has a default so an empty (or missing) file yields a runnable
//! service. Feed, queue and store budgets are externalized here -
//! nothing is hardcoded in the domain layer.

pub mod loader;

use std::time::Duration;

use serde::Deserialize;

use crate::domain::backoff::ReconnectPolicy;
use crate::domain::ingest_queue::{OverflowPolicy, QueueLimits};
use crate::domain::series_store::StoreLimits;

/// Top-level service configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Service identity and logging.
  pub service: ServiceConfig,
  /// Feed connection and status publishing.
  pub feed: FeedConfig,
  /// Reconnect backoff.
  pub reconnect: ReconnectConfig,
  /// Ingest queue budgets.
  pub ingest: IngestConfig,
  /// Series store sizing.
  pub store: StoreConfig,
  /// Metrics and monitoring.
  pub metrics: MetricsConfig,
  /// Persistence configuration.
  pub persistence: PersistenceConfig,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  pub log_level: String,
}

/// Feed connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
  /// Streaming endpoint URL.
  pub url: String,
  /// Key the resume cursor is stored under.
  pub cursor_key: String,
  /// Minimum interval between status snapshots (ms).
  pub status_throttle_ms: u64,
  /// Capacity of the accepted-batch and on_samples channels.
  pub channel_capacity: usize,
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
  /// Reconnect automatically after an unexpected close.
  pub enabled: bool,
  /// Delay before the first attempt (ms).
  pub initial_delay_ms: u64,
  /// Cap on the doubled delay (ms).
  pub max_delay_ms: u64,
}

/// Ingest queue configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
  /// Drain tick interval, one per display frame (ms).
  pub frame_interval_ms: u64,
  /// Maximum batches concatenated per drain cycle.
  pub max_batches_per_cycle: usize,
  /// Wall-clock budget per drain cycle (ms).
  pub max_ms_per_cycle: u64,
  /// Maximum samples held in the queue.
  pub max_total_samples: usize,
  /// What to drop when over `max_total_samples`.
  pub overflow_policy: OverflowPolicy,
}

/// Series store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  /// Points kept per series.
  pub series_capacity: usize,
  /// Points kept across all series.
  pub global_point_budget: usize,
  /// Fraction of each series dropped per trim pass.
  pub trim_ratio: f64,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  pub enabled: bool,
  /// Metrics server bind address.
  pub bind_address: String,
  /// Health/status endpoint port.
  pub health_port: u16,
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
  /// Directory holding the cursor file.
  pub data_dir: String,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      name: "tickstream".to_string(),
      log_level: "info".to_string(),
    }
  }
}

impl Default for FeedConfig {
  fn default() -> Self {
    Self {
      url: "ws://127.0.0.1:8765/feed".to_string(),
      cursor_key: "tickstream.cursor".to_string(),
      status_throttle_ms: 250,
      channel_capacity: 1024,
    }
  }
}

impl Default for ReconnectConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      initial_delay_ms: 500,
      max_delay_ms: 30_000,
    }
  }
}

impl Default for IngestConfig {
  fn default() -> Self {
    Self {
      frame_interval_ms: 16,
      max_batches_per_cycle: 64,
      max_ms_per_cycle: 4,
      max_total_samples: 500_000,
      overflow_policy: OverflowPolicy::DropOldest,
    }
  }
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      series_capacity: 100_000,
      global_point_budget: 2_000_000,
      trim_ratio: 0.1,
    }
  }
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: "0.0.0.0:9090".to_string(),
      health_port: 8080,
    }
  }
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      data_dir: "data".to_string(),
    }
  }
}

impl ReconnectConfig {
  /// Fresh backoff policy with zero attempts.
  pub const fn policy(&self) -> ReconnectPolicy {
    ReconnectPolicy::new(
      self.enabled,
      Duration::from_millis(self.initial_delay_ms),
      Duration::from_millis(self.max_delay_ms),
    )
  }
}

impl IngestConfig {
  /// Queue budgets for the domain queue.
  pub const fn limits(&self) -> QueueLimits {
    QueueLimits {
      max_batches_per_cycle: self.max_batches_per_cycle,
      max_cycle_time: Duration::from_millis(self.max_ms_per_cycle),
      max_total_samples: self.max_total_samples,
      overflow_policy: self.overflow_policy,
    }
  }
}

impl StoreConfig {
  /// Store sizing for the domain store.
  pub const fn limits(&self) -> StoreLimits {
    StoreLimits {
      series_capacity: self.series_capacity,
      global_point_budget: self.global_point_budget,
      trim_ratio: self.trim_ratio,
    }
  }
}
