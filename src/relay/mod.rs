//! # Relay Module
//!
//! Internal implementation of the one-time relay. Each submodule owns one
//! concern; only `service` knows how they fit together.
//!
//! ## Module Structure
//!
//! ```text
//!     relay/
//!     ├── mod.rs          (Module organization)
//!     ├── service.rs      (Relay facade, request-order wiring)
//!     ├── store.rs        (Encrypted single-use entry storage)
//!     ├── code.rs         (Six-digit code allocation)
//!     ├── cipher.rs       (AES-256-GCM with a process-lifetime key)
//!     ├── limiter.rs      (Sliding-window limits per hashed prefix)
//!     ├── sweeper.rs      (Background maintenance thread)
//!     ├── config.rs       (Settings and validation)
//!     ├── metrics.rs      (Counter snapshots and health)
//!     ├── error.rs        (Error taxonomy)
//!     └── utils.rs        (Clocks)
//! ```
//!
//! ## Architecture Flow
//!
//! ```text
//!     Transport layer
//!          │
//!          ▼
//!     ┌─────────┐
//!     │ Service │ ◄── Request-order wiring
//!     └────┬────┘
//!          │
//!     ┌────┴──────────────┐
//!     ▼                   ▼
//!     ┌─────────┐    ┌─────────┐
//!     │ Limiter │    │  Store  │ ◄── Owns entries, sweeps expired ones
//!     └─────────┘    └────┬────┘
//!                         │
//!                  ┌──────┴──────┐
//!                  ▼             ▼
//!             ┌────────┐    ┌────────┐
//!             │ Cipher │    │  Code  │
//!             └────────┘    └────────┘
//! ```

mod cipher;
mod code;
mod config;
mod error;
mod limiter;
mod metrics;
mod service;
mod store;
mod sweeper;
mod utils;

/// Authenticated encryption of entry payloads
pub use cipher::{
    AuthenticationFailure, Cipher, PlaintextTooLarge, Sealed, KEY_LEN, MAX_PLAINTEXT_LEN,
    NONCE_LEN, TAG_LEN,
};

/// Code format and allocation
pub use code::{is_valid_format, Code, CodeAllocator, ExhaustionError, CODE_LEN};

/// Configuration and defaults
pub use config::{
    RelayConfig, CODE_SPACE, DEFAULT_CLEANUP_INTERVAL_MS, DEFAULT_CREATE_LIMIT,
    DEFAULT_MAX_CODE_ATTEMPTS, DEFAULT_MAX_CONTENT_LENGTH, DEFAULT_MAX_TRACKED_BUCKETS,
    DEFAULT_RATE_WINDOW_MS, DEFAULT_RETRIEVE_LIMIT, DEFAULT_TTL_MS,
};

/// Error taxonomy
pub use error::{RelayError, Result};

/// Rate limiting
pub use limiter::{identifier_prefix, AccessLimiter, BucketId, SlidingWindowLimiter};

/// Statistics and health
pub use metrics::{HealthStatus, LimiterStats, StoreStats};

/// Facade
pub use service::Relay;

/// Entry storage
pub use store::{EntryStore, Receipt};

/// Time sources
pub use utils::{current_time_ms, Clock, ManualClock, SystemClock};
