//! # Relay Configuration
//!
//! Settings consumed by the entry store and the rate limiters. Everything is
//! fixed at construction time; nothing here can be changed on a running
//! store.
//!
//! ## Timeline of an entry
//!
//! ```text
//!     created_at                          expires_at = created_at + ttl
//!         │◄──────────── readable once ──────────►│
//!         ●───────────────────────────────────────●──────────────► time
//!                                                  └ gone (swept or
//!                                                    rejected on read)
//! ```
//!
//! ## Sliding rate window
//!
//! ```text
//!     now - window                                      now
//!         │◄──────── counted requests (≤ limit) ───────►│
//!     ────┼───x────x──────x─────────x──────x────────────┼──► time
//! ```

use std::time::Duration;

/// Size of the six-digit code space.
pub const CODE_SPACE: u32 = 1_000_000;

/// Default time-to-live for an entry (10 minutes).
pub const DEFAULT_TTL_MS: u64 = 10 * 60 * 1000;

/// Default interval between background sweeps (1 minute).
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 60 * 1000;

/// Default sliding window for rate limiting (1 minute).
pub const DEFAULT_RATE_WINDOW_MS: u64 = 60 * 1000;

/// Default number of creations allowed per window per bucket.
pub const DEFAULT_CREATE_LIMIT: u32 = 10;

/// Default number of retrievals allowed per window per bucket.
///
/// Tighter than creation because retrieval is the enumeration target.
pub const DEFAULT_RETRIEVE_LIMIT: u32 = 5;

/// Default number of random draws before allocation gives up.
pub const DEFAULT_MAX_CODE_ATTEMPTS: u32 = 10;

/// Default maximum accepted content length in bytes.
pub const DEFAULT_MAX_CONTENT_LENGTH: usize = 50_000;

/// Default maximum number of identifier buckets tracked per limiter.
pub const DEFAULT_MAX_TRACKED_BUCKETS: usize = 100_000;

/// Configuration for a relay instance.
///
/// ## Examples
///
/// ```rust
/// use portal_core::RelayConfig;
/// use std::time::Duration;
///
/// // Defaults: 10 minute TTL, 10 creates / 5 retrievals per minute
/// let config = RelayConfig::default();
/// assert!(config.validate().is_ok());
///
/// // Short-lived entries with a stricter retrieval ceiling
/// let config = RelayConfig::default()
///     .with_ttl(Duration::from_secs(120))
///     .with_limits(20, 3);
/// assert_eq!(config.ttl_ms, 120_000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// How long an unretrieved entry stays readable.
    pub ttl_ms: u64,

    /// Interval between background sweeps of both entries and rate buckets.
    pub cleanup_interval_ms: u64,

    /// Length of the trailing rate-limit window.
    pub rate_window_ms: u64,

    /// Creation ceiling per bucket per window.
    pub create_limit: u32,

    /// Retrieval ceiling per bucket per window.
    pub retrieve_limit: u32,

    /// Random draws allowed when looking for a free code.
    pub max_code_attempts: u32,

    /// Largest accepted plaintext in UTF-8 bytes (not characters), measured
    /// after trimming and enforced by `Relay::submit`. Multi-byte text hits
    /// the limit at fewer characters.
    pub max_content_length: usize,

    /// Upper bound on identifier buckets held by each limiter.
    pub max_tracked_buckets: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ttl_ms: DEFAULT_TTL_MS,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            rate_window_ms: DEFAULT_RATE_WINDOW_MS,
            create_limit: DEFAULT_CREATE_LIMIT,
            retrieve_limit: DEFAULT_RETRIEVE_LIMIT,
            max_code_attempts: DEFAULT_MAX_CODE_ATTEMPTS,
            max_content_length: DEFAULT_MAX_CONTENT_LENGTH,
            max_tracked_buckets: DEFAULT_MAX_TRACKED_BUCKETS,
        }
    }
}

impl RelayConfig {
    /// Sets the entry time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl_ms = ttl.as_millis() as u64;
        self
    }

    /// Sets the background sweep interval.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Sets the rate-limit window.
    pub fn with_rate_window(mut self, window: Duration) -> Self {
        self.rate_window_ms = window.as_millis() as u64;
        self
    }

    /// Sets both rate ceilings at once.
    pub fn with_limits(mut self, create_limit: u32, retrieve_limit: u32) -> Self {
        self.create_limit = create_limit;
        self.retrieve_limit = retrieve_limit;
        self
    }

    /// Sets the maximum accepted content length in UTF-8 bytes.
    pub fn with_max_content_length(mut self, max: usize) -> Self {
        self.max_content_length = max;
        self
    }

    /// Entry TTL as a `Duration`.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Sweep interval as a `Duration`.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a message if any duration or ceiling is zero, or if the retry
    /// budget exceeds the size of the code space.
    ///
    /// # Example
    ///
    /// ```rust
    /// use portal_core::RelayConfig;
    ///
    /// let config = RelayConfig {
    ///     ttl_ms: 0,
    ///     ..Default::default()
    /// };
    /// assert!(config.validate().is_err());
    /// ```
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.ttl_ms == 0 {
            return Err("ttl_ms must be greater than 0");
        }
        if self.cleanup_interval_ms == 0 {
            return Err("cleanup_interval_ms must be greater than 0");
        }
        if self.rate_window_ms == 0 {
            return Err("rate_window_ms must be greater than 0");
        }
        if self.create_limit == 0 || self.retrieve_limit == 0 {
            return Err("rate limits must be greater than 0");
        }
        if self.max_code_attempts == 0 {
            return Err("max_code_attempts must be greater than 0");
        }
        if self.max_code_attempts > CODE_SPACE {
            return Err("max_code_attempts should not exceed the code space");
        }
        if self.max_content_length == 0 {
            return Err("max_content_length must be greater than 0");
        }
        if self.max_tracked_buckets == 0 {
            return Err("max_tracked_buckets must be greater than 0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.ttl_ms, 600_000);
        assert_eq!(config.cleanup_interval_ms, 60_000);
        assert_eq!(config.rate_window_ms, 60_000);
        assert_eq!(config.create_limit, 10);
        assert_eq!(config.retrieve_limit, 5);
        assert_eq!(config.max_code_attempts, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let zero_window = RelayConfig {
            rate_window_ms: 0,
            ..Default::default()
        };
        assert!(zero_window.validate().is_err());

        let zero_limit = RelayConfig::default().with_limits(10, 0);
        assert!(zero_limit.validate().is_err());

        let huge_budget = RelayConfig {
            max_code_attempts: CODE_SPACE + 1,
            ..Default::default()
        };
        assert!(huge_budget.validate().is_err());
    }

    #[test]
    fn test_config_builders() {
        let config = RelayConfig::default()
            .with_ttl(Duration::from_secs(30))
            .with_cleanup_interval(Duration::from_millis(250))
            .with_rate_window(Duration::from_secs(5))
            .with_max_content_length(128);

        assert_eq!(config.ttl(), Duration::from_secs(30));
        assert_eq!(config.cleanup_interval(), Duration::from_millis(250));
        assert_eq!(config.rate_window_ms, 5_000);
        assert_eq!(config.max_content_length, 128);
    }
}
