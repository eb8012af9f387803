//! # Relay Facade
//!
//! Wires the limiter, store, cipher and allocator together in request order.
//! A transport layer holds one `Relay` (it is cheap to clone) and calls
//! [`Relay::submit`] and [`Relay::retrieve`] per request.
//!
//! ```text
//!     submit(client, text)                  retrieve(client, code)
//!         │                                     │
//!         ▼                                     ▼
//!     create limit ── over ──► RateLimited  format ── bad ───► InvalidCode
//!         │                                     │
//!         ▼                                     ▼
//!     trim / length ── bad ──► EmptyContent  retrieve limit ─► RateLimited
//!         │                    ContentTooLarge  │
//!         ▼                                     ▼
//!     store.create ── full ──► AllocationExhausted
//!         │                                 store.take_once ─► NotFound
//!         ▼                                     │
//!      Receipt                                  ▼
//!                                           plaintext
//! ```

use super::code::is_valid_format;
use super::config::RelayConfig;
use super::error::{RelayError, Result};
use super::limiter::AccessLimiter;
use super::store::{EntryStore, Receipt};
use super::utils::{Clock, SystemClock};
use std::sync::Arc;
use tracing::{debug, info};

/// Shared handle to one relay instance.
///
/// Clones share the same store, limiters and key.
#[derive(Debug, Clone)]
pub struct Relay {
    config: Arc<RelayConfig>,
    store: Arc<EntryStore>,
    limiter: Arc<AccessLimiter>,
}

impl Relay {
    /// Creates a relay on the system clock.
    ///
    /// # Errors
    ///
    /// [`RelayError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: RelayConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a relay driven by `clock`.
    ///
    /// # Errors
    ///
    /// [`RelayError::InvalidConfig`] if `config` fails validation.
    pub fn with_clock(config: RelayConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate().map_err(RelayError::InvalidConfig)?;

        let store = Arc::new(EntryStore::new(&config, clock.clone()));
        let limiter = Arc::new(AccessLimiter::new(&config, clock));

        info!(
            "Relay ready (ttl: {}s, limits: {} create / {} retrieve per {}s)",
            config.ttl_ms / 1000,
            config.create_limit,
            config.retrieve_limit,
            config.rate_window_ms / 1000
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            limiter,
        })
    }

    /// Validates and stores text on behalf of `client_key`.
    ///
    /// Surrounding whitespace is trimmed and the trimmed text is what gets
    /// stored. The creation limit is charged before the content is looked
    /// at.
    ///
    /// # Errors
    ///
    /// - [`RelayError::RateLimited`] if the client's create budget is spent
    /// - [`RelayError::EmptyContent`] if nothing remains after trimming
    /// - [`RelayError::ContentTooLarge`] if the trimmed text exceeds
    ///   `max_content_length` UTF-8 bytes
    /// - [`RelayError::AllocationExhausted`] if no free code was found
    pub fn submit(&self, client_key: &str, content: &str) -> Result<Receipt> {
        if !self.limiter.check_create_limit(client_key) {
            return Err(RelayError::RateLimited);
        }

        let content = content.trim();
        if content.is_empty() {
            return Err(RelayError::EmptyContent);
        }
        if content.len() > self.config.max_content_length {
            return Err(RelayError::ContentTooLarge {
                len: content.len(),
                max: self.config.max_content_length,
            });
        }

        self.store.create(content.as_bytes())
    }

    /// Exchanges `code` for its plaintext on behalf of `client_key`.
    ///
    /// Malformed codes are rejected before the retrieval limit is charged.
    ///
    /// # Errors
    ///
    /// - [`RelayError::InvalidCode`] if `code` is not six ASCII digits
    /// - [`RelayError::RateLimited`] if the client's retrieve budget is spent
    /// - [`RelayError::NotFound`] for missing, expired or consumed codes
    pub fn retrieve(&self, client_key: &str, code: &str) -> Result<Vec<u8>> {
        if !is_valid_format(code) {
            return Err(RelayError::InvalidCode);
        }

        if !self.limiter.check_retrieve_limit(client_key) {
            debug!("Retrieval rejected by rate limit");
            return Err(RelayError::RateLimited);
        }

        self.store.take_once(code)
    }

    /// Stores `plaintext` without rate limiting or content checks.
    #[inline]
    pub fn create(&self, plaintext: &[u8]) -> Result<Receipt> {
        self.store.create(plaintext)
    }

    /// Takes an entry without rate limiting or format checks.
    #[inline]
    pub fn take_once(&self, code: &str) -> Result<Vec<u8>> {
        self.store.take_once(code)
    }

    /// Checks and records a creation request.
    #[inline]
    pub fn check_create_limit(&self, client_key: &str) -> bool {
        self.limiter.check_create_limit(client_key)
    }

    /// Checks and records a retrieval request.
    #[inline]
    pub fn check_retrieve_limit(&self, client_key: &str) -> bool {
        self.limiter.check_retrieve_limit(client_key)
    }

    /// Number of entries held.
    #[inline]
    pub fn count(&self) -> usize {
        self.store.count()
    }

    /// Starts both background sweeps. Idempotent.
    ///
    /// # Errors
    ///
    /// [`RelayError::SweepSpawn`] if a thread could not be spawned. A store
    /// sweep started by this call is stopped again; one that was already
    /// running is left alone.
    pub fn start_sweep(&self) -> Result<()> {
        start_paired(
            || self.store.start_sweep(),
            || self.limiter.start_sweep(),
            || {
                self.store.stop_sweep();
            },
        )
    }

    /// Stops both background sweeps. Idempotent.
    pub fn stop_sweep(&self) {
        self.store.stop_sweep();
        self.limiter.stop_sweep();
    }

    /// Whether both background sweeps are running.
    pub fn is_sweeping(&self) -> bool {
        self.store.is_sweeping() && self.limiter.is_sweeping()
    }

    /// The entry store.
    pub fn store(&self) -> &Arc<EntryStore> {
        &self.store
    }

    /// The create/retrieve limiters.
    pub fn limiter(&self) -> &Arc<AccessLimiter> {
        &self.limiter
    }

    /// The configuration this relay was built with.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }
}

/// Starts `first` then `second`, undoing `first` only if this call started
/// it and `second` failed.
fn start_paired<A, B, U>(first: A, second: B, undo_first: U) -> Result<()>
where
    A: FnOnce() -> Result<bool>,
    B: FnOnce() -> Result<bool>,
    U: FnOnce(),
{
    let started_first = first()?;
    if let Err(err) = second() {
        if started_first {
            undo_first();
        }
        return Err(err);
    }
    Ok(())
}
