//! Reconnect backoff policy.
//!
//! `delay = min(max_delay, initial_delay * 2^(attempts - 1))`.
//!
//! The attempt counter is NOT cleared by a successful reconnect; only a
//! cursor reset or toggling auto-reconnect clears it.

use std::time::Duration;

use serde::Serialize;

/// Exponential reconnect schedule.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    enabled: bool,
    initial_delay: Duration,
    max_delay: Duration,
    attempts: u32,
    next_delay: Option<Duration>,
}

/// Read-only view for status snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ReconnectStatus {
    pub enabled: bool,
    pub attempts: u32,
    pub next_delay_ms: Option<u64>,
}

impl ReconnectPolicy {
    /// Create a policy with zero attempts.
    pub const fn new(enabled: bool, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            enabled,
            initial_delay,
            max_delay,
            attempts: 0,
            next_delay: None,
        }
    }

    /// Schedule the next attempt. `None` when auto-reconnect is disabled.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.enabled {
            self.next_delay = None;
            return None;
        }
        self.attempts = self.attempts.saturating_add(1);
        let delay = self.delay_for(self.attempts);
        self.next_delay = Some(delay);
        Some(delay)
    }

    /// Delay for the n-th attempt (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.initial_delay
            .checked_mul(1u32 << shift)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Clear the attempt counter.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.next_delay = None;
    }

    /// Toggle auto-reconnect; any toggle clears the attempt counter.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.reset();
    }

    /// Whether auto-reconnect is on.
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Attempts scheduled since the last reset.
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Snapshot for status reporting.
    #[allow(clippy::cast_possible_truncation)]
    pub fn status(&self) -> ReconnectStatus {
        ReconnectStatus {
            enabled: self.enabled,
            attempts: self.attempts,
            next_delay_ms: self.next_delay.map(|d| d.as_millis() as u64),
        }
    }
}
