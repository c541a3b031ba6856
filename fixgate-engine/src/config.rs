/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! Engine configuration.
//!
//! This module provides a builder-style configuration for the gateway engine:
//! flow-control limits, slow-consumer policy, throttle-reject defaults, and
//! framer tick timing.

use std::time::Duration;

/// Default backlog cap per connection before a slow consumer is disconnected.
pub const DEFAULT_MAX_BYTES_IN_BUFFER: usize = 4 * 1024 * 1024;

/// Default time a connection may sit with backlog and no successful write.
pub const DEFAULT_SLOW_CONSUMER_TIMEOUT_MS: u64 = 10_000;

/// Configuration for the gateway engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// BeginString stamped on synthetic messages (e.g. throttle rejects).
    begin_string: String,
    /// Maximum buffered bytes per connection before disconnect.
    max_bytes_in_buffer: usize,
    /// Slow-consumer watchdog timeout in milliseconds.
    slow_consumer_timeout_ms: u64,
    /// Default throttle window for reject messages.
    throttle_window_ms: u64,
    /// Default message limit within the throttle window.
    throttle_limit: usize,
    /// Interval between framer ticks.
    poll_interval: Duration,
    /// Maximum size of one inbound FIX message.
    max_inbound_message_size: usize,
    /// Whether inbound checksums are verified during framing.
    validate_checksums: bool,
    /// Capacity of the shared inbound message bus.
    bus_capacity: usize,
}

impl EngineConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            begin_string: "FIX.4.4".to_string(),
            max_bytes_in_buffer: DEFAULT_MAX_BYTES_IN_BUFFER,
            slow_consumer_timeout_ms: DEFAULT_SLOW_CONSUMER_TIMEOUT_MS,
            throttle_window_ms: 1_000,
            throttle_limit: 100,
            poll_interval: Duration::from_millis(1),
            max_inbound_message_size: 1024 * 1024,
            validate_checksums: true,
            bus_capacity: 1024,
        }
    }

    /// Sets the BeginString used for synthetic messages.
    #[must_use]
    pub fn with_begin_string(mut self, begin_string: impl Into<String>) -> Self {
        self.begin_string = begin_string.into();
        self
    }

    /// Sets the per-connection backlog cap in bytes.
    #[must_use]
    pub const fn with_max_bytes_in_buffer(mut self, max: usize) -> Self {
        self.max_bytes_in_buffer = max;
        self
    }

    /// Sets the slow-consumer watchdog timeout.
    #[must_use]
    pub const fn with_slow_consumer_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.slow_consumer_timeout_ms = timeout_ms;
        self
    }

    /// Sets the default throttle window and limit for reject messages.
    #[must_use]
    pub const fn with_throttle(mut self, window_ms: u64, limit: usize) -> Self {
        self.throttle_window_ms = window_ms;
        self.throttle_limit = limit;
        self
    }

    /// Sets the framer tick interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum inbound message size.
    #[must_use]
    pub const fn with_max_inbound_message_size(mut self, size: usize) -> Self {
        self.max_inbound_message_size = size;
        self
    }

    /// Sets whether inbound checksums are verified.
    #[must_use]
    pub const fn with_checksum_validation(mut self, validate: bool) -> Self {
        self.validate_checksums = validate;
        self
    }

    /// Sets the capacity of the shared inbound message bus.
    #[must_use]
    pub const fn with_bus_capacity(mut self, capacity: usize) -> Self {
        self.bus_capacity = capacity;
        self
    }

    /// Returns the BeginString for synthetic messages.
    #[must_use]
    pub fn begin_string(&self) -> &str {
        &self.begin_string
    }

    /// Returns the per-connection backlog cap in bytes.
    #[must_use]
    pub const fn max_bytes_in_buffer(&self) -> usize {
        self.max_bytes_in_buffer
    }

    /// Returns the slow-consumer watchdog timeout.
    #[must_use]
    pub const fn slow_consumer_timeout_ms(&self) -> u64 {
        self.slow_consumer_timeout_ms
    }

    /// Returns the default throttle window in milliseconds.
    #[must_use]
    pub const fn throttle_window_ms(&self) -> u64 {
        self.throttle_window_ms
    }

    /// Returns the default throttle limit.
    #[must_use]
    pub const fn throttle_limit(&self) -> usize {
        self.throttle_limit
    }

    /// Returns the framer tick interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Returns the maximum inbound message size.
    #[must_use]
    pub const fn max_inbound_message_size(&self) -> usize {
        self.max_inbound_message_size
    }

    /// Returns whether inbound checksums are verified.
    #[must_use]
    pub const fn validate_checksums(&self) -> bool {
        self.validate_checksums
    }

    /// Returns the capacity of the shared inbound message bus.
    #[must_use]
    pub const fn bus_capacity(&self) -> usize {
        self.bus_capacity
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EngineConfig::new();
        assert_eq!(config.begin_string(), "FIX.4.4");
        assert_eq!(config.max_bytes_in_buffer(), DEFAULT_MAX_BYTES_IN_BUFFER);
        assert_eq!(
            config.slow_consumer_timeout_ms(),
            DEFAULT_SLOW_CONSUMER_TIMEOUT_MS
        );
        assert!(config.validate_checksums());
    }

    #[test]
    fn test_config_builder() {
        let config = EngineConfig::new()
            .with_begin_string("FIX.4.2")
            .with_max_bytes_in_buffer(100)
            .with_slow_consumer_timeout_ms(5_000)
            .with_throttle(2_000, 50)
            .with_poll_interval(Duration::from_millis(5));

        assert_eq!(config.begin_string(), "FIX.4.2");
        assert_eq!(config.max_bytes_in_buffer(), 100);
        assert_eq!(config.slow_consumer_timeout_ms(), 5_000);
        assert_eq!(config.throttle_window_ms(), 2_000);
        assert_eq!(config.throttle_limit(), 50);
        assert_eq!(config.poll_interval(), Duration::from_millis(5));
    }
}
