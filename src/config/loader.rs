//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, applying environment overrides,
//! validating all parameters, and providing clear error messages for
//! misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::AppConfig;

/// Environment variable overriding `feed.url`.
pub const FEED_URL_ENV: &str = "TICKSTREAM_FEED_URL";

/// Load and validate configuration from a TOML file.
///
/// A missing file is not an error: defaults are used.
///
/// # Arguments
/// * `path` - Path to the config.toml file
///
/// # Errors
/// Returns detailed error if:
/// - The file exists but can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let mut config = if path.exists() {
    let content = std::fs::read_to_string(path)
      .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)?
  } else {
    warn!(path = %path.display(), "Config file not found, using defaults");
    AppConfig::default()
  };

  if let Ok(url) = std::env::var(FEED_URL_ENV) {
    info!(env = FEED_URL_ENV, "Feed URL overridden from environment");
    config.feed.url = url;
  }

  validate_config(&config)?;

  info!(
    url = %config.feed.url,
    series_capacity = config.store.series_capacity,
    point_budget = config.store.global_point_budget,
    overflow = ?config.ingest.overflow_policy,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse a TOML document into a config, without validation.
///
/// # Errors
/// Returns the TOML error with context.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  toml::from_str(content).with_context(|| "Failed to parse config.toml")
}

/// Validate all configuration parameters.
///
/// # Errors
/// Returns the first rule violated.
pub fn validate_config(config: &AppConfig) -> Result<()> {
  // Feed validation
  anyhow::ensure!(!config.feed.url.is_empty(), "Feed URL must not be empty");
  anyhow::ensure!(
    !config.feed.cursor_key.is_empty(),
    "Cursor key must not be empty"
  );
  anyhow::ensure!(
    config.feed.channel_capacity > 0,
    "feed.channel_capacity must be positive"
  );

  // Reconnect validation
  anyhow::ensure!(
    config.reconnect.initial_delay_ms > 0,
    "reconnect.initial_delay_ms must be positive"
  );
  anyhow::ensure!(
    config.reconnect.initial_delay_ms <= config.reconnect.max_delay_ms,
    "reconnect.initial_delay_ms ({}) must not exceed max_delay_ms ({})",
    config.reconnect.initial_delay_ms,
    config.reconnect.max_delay_ms
  );

  // Ingest validation
  anyhow::ensure!(
    config.ingest.frame_interval_ms > 0,
    "ingest.frame_interval_ms must be positive"
  );
  anyhow::ensure!(
    config.ingest.max_batches_per_cycle > 0,
    "ingest.max_batches_per_cycle must be positive"
  );
  anyhow::ensure!(
    config.ingest.max_total_samples > 0,
    "ingest.max_total_samples must be positive"
  );

  // Store validation
  anyhow::ensure!(
    config.store.series_capacity > 0,
    "store.series_capacity must be positive"
  );
  anyhow::ensure!(
    config.store.global_point_budget >= config.store.series_capacity,
    "store.global_point_budget ({}) must hold at least one full series ({})",
    config.store.global_point_budget,
    config.store.series_capacity
  );
  anyhow::ensure!(
    config.store.trim_ratio > 0.0 && config.store.trim_ratio < 1.0,
    "store.trim_ratio must be in (0, 1), got {}",
    config.store.trim_ratio
  );

  Ok(())
}
