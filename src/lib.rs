//! # Portal Core - One-Time Encrypted Text Relay
//!
//! The in-memory heart of a "send a note, read it once" service. A sender
//! submits text and gets a six-digit code; a receiver trades that code for
//! the text exactly once, after which it is gone.
//!
//! ## What Does It Guarantee?
//!
//! - **Single use** - of any number of concurrent reads for one code, exactly
//!   one gets the text
//! - **Expiry** - unread entries become unreadable after their TTL
//!   (10 minutes by default) and are swept in the background
//! - **Encryption at rest** - entries are sealed with AES-256-GCM under a key
//!   that exists only in this process; a restart makes every stored entry
//!   unrecoverable
//! - **No oracles** - missing, expired, consumed and corrupted entries all
//!   look the same to the caller: [`RelayError::NotFound`]
//! - **Throttling** - creation and retrieval are rate limited per client
//!   network prefix, which is hashed before it is stored
//!
//! ## Entry Lifecycle
//!
//! ```text
//!     submit("hello")
//!         │
//!         ▼
//!     ┌─────────┐  encrypt   ┌────────────┐  allocate  ┌──────────────┐
//!     │  text   │ ─────────► │ ciphertext │ ─────────► │ "042817" ──► │
//!     └─────────┘            └────────────┘            │   sealed     │
//!                                                      └──────┬───────┘
//!                                      ┌──────────────────────┤
//!                                      │                      │
//!                               retrieve("042817")       now > expires_at
//!                                      │                      │
//!                                      ▼                      ▼
//!                               "hello" (entry gone)     swept (entry gone)
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use portal_core::{Relay, RelayConfig, RelayError};
//!
//! let relay = Relay::new(RelayConfig::default())?;
//!
//! // Sender
//! let receipt = relay.submit("203.0.113.7", "the wifi password is hunter2")?;
//! println!("Share code {}", receipt.code);
//!
//! // Receiver
//! let text = relay.retrieve("198.51.100.20", receipt.code.as_str())?;
//! assert_eq!(text, b"the wifi password is hunter2");
//!
//! // Second attempt
//! assert!(matches!(
//!     relay.retrieve("198.51.100.20", receipt.code.as_str()),
//!     Err(RelayError::NotFound)
//! ));
//! # Ok::<(), RelayError>(())
//! ```
//!
//! ### Configuring with the Builder
//!
//! ```rust
//! use portal_core::RelayBuilder;
//! use std::time::Duration;
//!
//! let relay = RelayBuilder::new()
//!     .ttl(Duration::from_secs(120))       // Short-lived notes
//!     .limits(20, 3)                       // 20 creates, 3 reads per window
//!     .max_content_length(4_096)
//!     .build()
//!     .expect("valid configuration");
//!
//! // Background sweeps for expired entries and idle rate buckets
//! relay.start_sweep().expect("sweep threads");
//! // ...
//! relay.stop_sweep();
//! ```
//!
//! ## Architecture Overview
//!
//! ```text
//!                    ┌─────────────────────────┐
//!                    │   Transport (HTTP etc.) │
//!                    └──────────┬──────────────┘
//!                               │
//!                    ┌──────────▼──────────────┐
//!                    │         Relay           │
//!                    ├─────────────────────────┤
//!                    │  • submit()             │
//!                    │  • retrieve()           │
//!                    │  • start/stop_sweep()   │
//!                    └──────────┬──────────────┘
//!                               │
//!                ┌──────────────┴───────────────┐
//!                │                              │
//!     ┌──────────▼──────────┐       ┌───────────▼──────────┐
//!     │   AccessLimiter     │       │   EntryStore         │
//!     ├─────────────────────┤       ├──────────────────────┤
//!     │ • create window     │       │ • Cipher (AES-GCM)   │
//!     │ • retrieve window   │       │ • CodeAllocator      │
//!     │ • hashed prefixes   │       │ • TTL sweep          │
//!     └─────────────────────┘       └──────────────────────┘
//! ```
//!
//! ## Thread Safety
//!
//! Every type here is `Send + Sync`. [`Relay`] is a cheap handle: clone it
//! into each request handler. The store and limiters use sharded concurrent
//! maps, so unrelated codes and unrelated clients never contend on one lock.
//!
//! ## Logging
//!
//! Diagnostics go through [`tracing`]. The crate never logs plaintext,
//! codes, client addresses or key material, and installs no subscriber of
//! its own.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    rust_2018_idioms,
    unreachable_pub,
    missing_debug_implementations
)]
#![forbid(unsafe_code)]

// Internal module
mod relay;

// Public re-exports
pub use relay::{
    current_time_ms, identifier_prefix, is_valid_format, AccessLimiter, AuthenticationFailure,
    BucketId, Cipher, Clock, Code, CodeAllocator, EntryStore, ExhaustionError, HealthStatus,
    LimiterStats, ManualClock, PlaintextTooLarge, Receipt, Relay, RelayConfig, RelayError,
    Result, Sealed, SlidingWindowLimiter, StoreStats, SystemClock, CODE_LEN, CODE_SPACE,
    DEFAULT_CLEANUP_INTERVAL_MS, DEFAULT_CREATE_LIMIT, DEFAULT_MAX_CODE_ATTEMPTS,
    DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_MAX_TRACKED_BUCKETS, DEFAULT_RATE_WINDOW_MS,
    DEFAULT_RETRIEVE_LIMIT, DEFAULT_TTL_MS, KEY_LEN, MAX_PLAINTEXT_LEN, NONCE_LEN, TAG_LEN,
};

/// An entry store wrapped in `Arc`, as required by
/// [`EntryStore::start_sweep`].
///
/// # Example
/// ```rust
/// use portal_core::{EntryStore, RelayConfig, SharedEntryStore, SystemClock};
/// use std::sync::Arc;
///
/// let store: SharedEntryStore =
///     Arc::new(EntryStore::new(&RelayConfig::default(), Arc::new(SystemClock)));
///
/// store.start_sweep().unwrap();
/// store.stop_sweep();
/// ```
pub type SharedEntryStore = std::sync::Arc<EntryStore>;

/// An access limiter wrapped in `Arc`, as required by
/// [`AccessLimiter::start_sweep`].
pub type SharedAccessLimiter = std::sync::Arc<AccessLimiter>;

/// Version information for the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Minimum supported Rust version.
pub const MSRV: &str = "1.70.0";

/// Prelude module for convenient imports.
///
/// ```rust
/// use portal_core::prelude::*;
/// ```
pub mod prelude {
    //! Common imports for embedding the relay in a service.
    //!
    //! # Example
    //! ```rust
    //! use portal_core::prelude::*;
    //!
    //! let relay = RelayBuilder::new().build().unwrap();
    //! let status = relay.store().stats().health_status();
    //! assert_eq!(status, HealthStatus::Healthy);
    //! ```

    pub use crate::{
        HealthStatus, LimiterStats, Receipt, Relay, RelayBuilder, RelayConfig, RelayError,
        SharedAccessLimiter, SharedEntryStore, StoreStats,
    };
}

/// Builder for a [`Relay`] with non-default settings.
///
/// # Example
///
/// ```rust
/// use portal_core::{ManualClock, RelayBuilder};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let clock = Arc::new(ManualClock::new(0));
/// let relay = RelayBuilder::new()
///     .ttl(Duration::from_secs(30))
///     .rate_window(Duration::from_secs(10))
///     .clock(clock.clone())
///     .build()
///     .unwrap();
///
/// let receipt = relay.create(b"note").unwrap();
/// assert_eq!(receipt.expires_at, 30_000);
///
/// // Invalid settings are reported, not panicked on
/// assert!(RelayBuilder::new().limits(0, 5).build().is_err());
/// ```
#[derive(Debug, Clone)]
pub struct RelayBuilder {
    config: RelayConfig,
    clock: Option<std::sync::Arc<dyn Clock>>,
}

impl RelayBuilder {
    /// Creates a builder with the default configuration and the system clock.
    ///
    /// Defaults:
    /// - 10 minute TTL, swept every minute
    /// - 10 creations and 5 retrievals per minute per network prefix
    /// - 50 000 byte content limit
    pub fn new() -> Self {
        Self {
            config: RelayConfig::default(),
            clock: None,
        }
    }

    /// Starts from an existing configuration.
    pub fn from_config(config: RelayConfig) -> Self {
        Self {
            config,
            clock: None,
        }
    }

    /// Sets how long an unread entry stays readable.
    pub fn ttl(mut self, ttl: std::time::Duration) -> Self {
        self.config = self.config.with_ttl(ttl);
        self
    }

    /// Sets the interval between background sweeps.
    pub fn cleanup_interval(mut self, interval: std::time::Duration) -> Self {
        self.config = self.config.with_cleanup_interval(interval);
        self
    }

    /// Sets the length of the sliding rate window.
    pub fn rate_window(mut self, window: std::time::Duration) -> Self {
        self.config = self.config.with_rate_window(window);
        self
    }

    /// Sets the creation and retrieval ceilings per window.
    pub fn limits(mut self, create: u32, retrieve: u32) -> Self {
        self.config = self.config.with_limits(create, retrieve);
        self
    }

    /// Sets the number of random draws before allocation reports exhaustion.
    pub fn max_code_attempts(mut self, attempts: u32) -> Self {
        self.config.max_code_attempts = attempts;
        self
    }

    /// Sets the largest accepted content, in bytes after trimming.
    pub fn max_content_length(mut self, max: usize) -> Self {
        self.config = self.config.with_max_content_length(max);
        self
    }

    /// Sets the number of client buckets each limiter may track.
    pub fn max_tracked_buckets(mut self, max: usize) -> Self {
        self.config.max_tracked_buckets = max;
        self
    }

    /// Drives expiry and rate windows from `clock` instead of the system
    /// clock.
    pub fn clock(mut self, clock: std::sync::Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// The configuration assembled so far.
    pub fn into_config(self) -> RelayConfig {
        self.config
    }

    /// Validates the configuration and builds the relay.
    ///
    /// Background sweeps are not started; call [`Relay::start_sweep`].
    ///
    /// # Errors
    ///
    /// [`RelayError::InvalidConfig`] if any setting is out of range.
    pub fn build(self) -> Result<Relay> {
        match self.clock {
            Some(clock) => Relay::with_clock(self.config, clock),
            None => Relay::new(self.config),
        }
    }
}

impl Default for RelayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_basic_functionality() {
        let relay = RelayBuilder::new().build().unwrap();

        let receipt = relay.submit("10.0.0.5", "hello").unwrap();
        assert_eq!(relay.count(), 1);
        assert_eq!(
            relay.retrieve("10.0.0.5", receipt.code.as_str()).unwrap(),
            b"hello"
        );
        assert_eq!(relay.count(), 0);
    }

    #[test]
    fn test_builder() {
        let relay = RelayBuilder::new()
            .ttl(Duration::from_secs(30))
            .cleanup_interval(Duration::from_secs(5))
            .rate_window(Duration::from_secs(10))
            .limits(3, 2)
            .max_code_attempts(20)
            .max_content_length(64)
            .max_tracked_buckets(50)
            .build()
            .unwrap();

        let config = relay.config();
        assert_eq!(config.ttl_ms, 30_000);
        assert_eq!(config.cleanup_interval_ms, 5_000);
        assert_eq!(config.rate_window_ms, 10_000);
        assert_eq!(config.create_limit, 3);
        assert_eq!(config.retrieve_limit, 2);
        assert_eq!(config.max_code_attempts, 20);
        assert_eq!(config.max_content_length, 64);
        assert_eq!(config.max_tracked_buckets, 50);
    }

    #[test]
    fn test_builder_validation() {
        let result = RelayBuilder::new().ttl(Duration::ZERO).build();
        assert!(matches!(result, Err(RelayError::InvalidConfig(_))));

        let result = RelayBuilder::new().max_content_length(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_from_config() {
        let config = RelayConfig::default().with_limits(7, 7);
        let builder = RelayBuilder::from_config(config.clone());
        assert_eq!(builder.into_config(), config);
    }

    #[test]
    fn test_builder_clock() {
        let clock = Arc::new(ManualClock::new(5_000));
        let relay = RelayBuilder::new().clock(clock.clone()).build().unwrap();

        let receipt = relay.create(b"timed").unwrap();
        assert_eq!(receipt.created_at, 5_000);

        clock.advance(Duration::from_millis(DEFAULT_TTL_MS + 1));
        assert!(matches!(
            relay.take_once(receipt.code.as_str()),
            Err(RelayError::NotFound)
        ));
    }

    #[test]
    fn test_thread_safety() {
        let relay = RelayBuilder::new().limits(1_000, 1_000).build().unwrap();
        let mut handles = vec![];

        for i in 0..8 {
            let relay = relay.clone();
            handles.push(thread::spawn(move || {
                let text = format!("note {}", i);
                let receipt = relay.submit("10.0.0.5", &text).unwrap();
                relay.retrieve("10.0.0.5", receipt.code.as_str()).unwrap() == text.as_bytes()
            }));
        }

        assert!(handles.into_iter().all(|h| h.join().unwrap()));
        assert_eq!(relay.count(), 0);
    }

    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let _config = RelayConfig::default();
        let _builder = RelayBuilder::default();
        let _status = HealthStatus::Healthy;
    }

    #[test]
    fn test_shared_types() {
        let config = RelayConfig::default();
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let _store: SharedEntryStore = Arc::new(EntryStore::new(&config, clock.clone()));
        let _limiter: SharedAccessLimiter = Arc::new(AccessLimiter::new(&config, clock));
    }

    #[test]
    fn test_constants() {
        assert!(!VERSION.is_empty());
        assert_eq!(MSRV, "1.70.0");
    }
}
