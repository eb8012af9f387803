//! # Entry Store
//!
//! Maps codes to encrypted entries and hands each one out at most once.
//!
//! ## Retrieval
//!
//! ```text
//!     take_once(code)
//!         │
//!         ▼
//!     remove(code) ── absent ─────────────────────────► NotFound
//!         │
//!      present (now owned by this caller only)
//!         │
//!         ├── now > expires_at ───────────────────────► NotFound
//!         │
//!         ├── tag fails to verify ── warn! ───────────► NotFound
//!         │
//!         └── plaintext ──────────────────────────────► Ok(plaintext)
//! ```
//!
//! The entry leaves the map before anything else happens. `DashMap::remove`
//! is atomic per key, so of any number of concurrent callers for one code
//! exactly one gets the entry back; the rest see it absent.
//!
//! ## Creation
//!
//! Code allocation and insertion happen together: each candidate code is
//! claimed through the map's entry API, which holds the shard lock between
//! the vacancy check and the insert. Two creations can never end up with the
//! same code.

use super::cipher::{Cipher, Sealed};
use super::code::{Code, CodeAllocator};
use super::config::RelayConfig;
use super::error::{RelayError, Result};
use super::metrics::StoreStats;
use super::sweeper::Sweeper;
use super::utils::Clock;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Initial map capacity.
const INITIAL_CAPACITY: usize = 1024;

/// One pending secret. Immutable once inserted.
struct Entry {
    sealed: Sealed,
    created_at: u64,
    expires_at: u64,
}

impl Entry {
    #[inline]
    fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

/// What the sender gets back from a successful creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// The retrieval code.
    pub code: Code,
    /// Creation instant, ms since the UNIX epoch.
    pub created_at: u64,
    /// Last instant at which the entry is readable, ms since the UNIX epoch.
    pub expires_at: u64,
}

impl Receipt {
    /// Whole seconds left before expiry, as seen at `now_ms`.
    pub fn expires_in_secs(&self, now_ms: u64) -> u64 {
        self.expires_at.saturating_sub(now_ms) / 1000
    }
}

/// Encrypted, single-use, expiring entry storage.
///
/// # Example
///
/// ```rust
/// use portal_core::{EntryStore, RelayConfig, RelayError, SystemClock};
/// use std::sync::Arc;
///
/// let store = EntryStore::new(&RelayConfig::default(), Arc::new(SystemClock));
///
/// let receipt = store.create(b"hello").unwrap();
/// assert_eq!(store.take_once(receipt.code.as_str()).unwrap(), b"hello");
/// assert!(matches!(
///     store.take_once(receipt.code.as_str()),
///     Err(RelayError::NotFound)
/// ));
/// ```
pub struct EntryStore {
    entries: DashMap<Code, Entry, ahash::RandomState>,
    cipher: Cipher,
    allocator: CodeAllocator,
    clock: Arc<dyn Clock>,
    ttl_ms: u64,
    cleanup_interval: Duration,
    sweeper: Sweeper,

    total_created: AtomicU64,
    total_retrieved: AtomicU64,
    total_expired: AtomicU64,
    total_swept: AtomicU64,
    total_not_found: AtomicU64,
    auth_failures: AtomicU64,
    allocation_failures: AtomicU64,
}

impl EntryStore {
    /// Creates an empty store with a fresh process-lifetime key.
    pub fn new(config: &RelayConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::with_capacity_and_hasher(
                INITIAL_CAPACITY,
                ahash::RandomState::new(),
            ),
            cipher: Cipher::new(),
            allocator: CodeAllocator::new(config.max_code_attempts),
            clock,
            ttl_ms: config.ttl_ms,
            cleanup_interval: config.cleanup_interval(),
            sweeper: Sweeper::new("portal-entry-sweep"),
            total_created: AtomicU64::new(0),
            total_retrieved: AtomicU64::new(0),
            total_expired: AtomicU64::new(0),
            total_swept: AtomicU64::new(0),
            total_not_found: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            allocation_failures: AtomicU64::new(0),
        }
    }

    /// Encrypts `plaintext` and stores it under a freshly allocated code.
    ///
    /// The caller is responsible for bounding `plaintext`.
    ///
    /// # Errors
    ///
    /// - [`RelayError::AllocationExhausted`] if no free code was found within
    ///   the retry budget. Nothing is inserted.
    /// - [`RelayError::ContentTooLarge`] if the payload is beyond what the
    ///   cipher can seal.
    pub fn create(&self, plaintext: &[u8]) -> Result<Receipt> {
        let sealed = self.cipher.encrypt(plaintext)?;
        let created_at = self.clock.now_ms();
        let expires_at = created_at.saturating_add(self.ttl_ms);

        let mut pending = Some(Entry {
            sealed,
            created_at,
            expires_at,
        });

        let claimed = self.allocator.generate_unique_with(|code| {
            match self.entries.entry(code.clone()) {
                MapEntry::Occupied(_) => false,
                MapEntry::Vacant(slot) => match pending.take() {
                    Some(entry) => {
                        slot.insert(entry);
                        true
                    }
                    None => false,
                },
            }
        });

        match claimed {
            Ok(code) => {
                self.total_created.fetch_add(1, Ordering::Relaxed);
                debug!("Entry created (live: {})", self.entries.len());
                Ok(Receipt {
                    code,
                    created_at,
                    expires_at,
                })
            }
            Err(err) => {
                self.allocation_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Code allocation exhausted after {} attempts (live: {})",
                    err.attempts,
                    self.entries.len()
                );
                Err(err.into())
            }
        }
    }

    /// Returns the plaintext for `code` and destroys the entry.
    ///
    /// # Errors
    ///
    /// [`RelayError::NotFound`] if the code never existed, has expired, was
    /// already taken, or its stored ciphertext failed verification.
    pub fn take_once(&self, code: &str) -> Result<Vec<u8>> {
        let entry = match self.entries.remove(code) {
            Some((_, entry)) => entry,
            None => {
                self.total_not_found.fetch_add(1, Ordering::Relaxed);
                return Err(RelayError::NotFound);
            }
        };

        if entry.is_expired(self.clock.now_ms()) {
            self.total_expired.fetch_add(1, Ordering::Relaxed);
            return Err(RelayError::NotFound);
        }

        match self.cipher.open(&entry.sealed) {
            Ok(plaintext) => {
                self.total_retrieved.fetch_add(1, Ordering::Relaxed);
                Ok(plaintext)
            }
            Err(_) => {
                self.auth_failures.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Stored entry failed authentication and was discarded (age: {}ms)",
                    self.clock.now_ms().saturating_sub(entry.created_at)
                );
                Err(RelayError::NotFound)
            }
        }
    }

    /// Whether `code` currently resolves to a readable entry.
    ///
    /// Does not consume the entry. An expired entry found here is removed.
    pub fn is_live(&self, code: &str) -> bool {
        let now = self.clock.now_ms();

        if self
            .entries
            .remove_if(code, |_, entry| entry.is_expired(now))
            .is_some()
        {
            self.total_expired.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.entries.contains_key(code)
    }

    /// Number of entries held, including expired ones not yet swept.
    #[inline]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        let dropped = self.entries.len();
        self.entries.clear();
        info!("Entry store cleared ({} entries dropped)", dropped);
    }

    /// Removes every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let mut removed = 0;

        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.total_swept.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(
                "Sweep removed {} expired entries (live: {})",
                removed,
                self.entries.len()
            );
        }

        let stats = self.stats();
        if stats.health_status().is_unhealthy() {
            warn!(
                "Code space {:.1}% used: {}",
                stats.code_space_used() * 100.0,
                stats.health_status().suggested_action()
            );
        }

        removed
    }

    /// Starts the periodic sweep. Calling it again while running is a no-op.
    ///
    /// Returns `true` if this call spawned the sweep thread.
    pub fn start_sweep(self: &Arc<Self>) -> Result<bool> {
        let started = self
            .sweeper
            .start(self.cleanup_interval, Arc::downgrade(self), |store: &Self| {
                store.sweep();
            })?;
        Ok(started)
    }

    /// Stops the periodic sweep. Calling it when stopped is a no-op.
    pub fn stop_sweep(&self) {
        self.sweeper.stop();
    }

    /// Whether the periodic sweep is running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper.is_running()
    }

    /// Entry time-to-live.
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            live_entries: self.entries.len(),
            total_created: self.total_created.load(Ordering::Relaxed),
            total_retrieved: self.total_retrieved.load(Ordering::Relaxed),
            total_expired: self.total_expired.load(Ordering::Relaxed),
            total_swept: self.total_swept.load(Ordering::Relaxed),
            total_not_found: self.total_not_found.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for EntryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryStore")
            .field("live_entries", &self.entries.len())
            .field("ttl_ms", &self.ttl_ms)
            .field("cipher", &self.cipher)
            .field("sweeper", &self.sweeper)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::code::is_valid_format;
    use crate::relay::utils::ManualClock;
    use std::sync::Barrier;
    use std::thread;

    const T0: u64 = 1_700_000_000_000;

    fn store() -> (Arc<EntryStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(T0));
        let store = Arc::new(EntryStore::new(&RelayConfig::default(), clock.clone()));
        (store, clock)
    }

    #[test]
    fn test_create_and_take() {
        let (store, _) = store();

        let receipt = store.create(b"hello").unwrap();
        assert!(is_valid_format(receipt.code.as_str()));
        assert_eq!(receipt.created_at, T0);
        assert_eq!(receipt.expires_at, T0 + 600_000);
        assert_eq!(receipt.expires_in_secs(T0), 600);
        assert_eq!(store.count(), 1);

        assert_eq!(store.take_once(receipt.code.as_str()).unwrap(), b"hello");
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_second_take_is_not_found() {
        let (store, _) = store();
        let receipt = store.create(b"once").unwrap();

        assert!(store.take_once(receipt.code.as_str()).is_ok());
        assert!(matches!(
            store.take_once(receipt.code.as_str()),
            Err(RelayError::NotFound)
        ));
    }

    #[test]
    fn test_unknown_code_is_not_found() {
        let (store, _) = store();
        assert!(matches!(store.take_once("000000"), Err(RelayError::NotFound)));
        assert!(matches!(store.take_once("not-a-code"), Err(RelayError::NotFound)));
        assert_eq!(store.stats().total_not_found, 2);
    }

    #[test]
    fn test_readable_until_expiry_instant() {
        let (store, clock) = store();
        let receipt = store.create(b"edge").unwrap();

        clock.set(receipt.expires_at - 1);
        assert!(store.is_live(receipt.code.as_str()));

        clock.set(receipt.expires_at);
        assert_eq!(store.take_once(receipt.code.as_str()).unwrap(), b"edge");
    }

    #[test]
    fn test_not_readable_after_expiry() {
        let (store, clock) = store();
        let receipt = store.create(b"late").unwrap();

        clock.set(receipt.expires_at + 1);
        assert!(matches!(
            store.take_once(receipt.code.as_str()),
            Err(RelayError::NotFound)
        ));
        // Expired entries are deleted on read
        assert_eq!(store.count(), 0);
        assert_eq!(store.stats().total_expired, 1);
    }

    #[test]
    fn test_is_live_does_not_consume() {
        let (store, clock) = store();
        let receipt = store.create(b"peek").unwrap();

        assert!(store.is_live(receipt.code.as_str()));
        assert!(store.is_live(receipt.code.as_str()));
        assert_eq!(store.count(), 1);

        clock.advance(Duration::from_millis(600_001));
        assert!(!store.is_live(receipt.code.as_str()));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_tampered_entry_is_not_found() {
        let (store, _) = store();
        let receipt = store.create(b"integrity").unwrap();

        if let Some(mut entry) = store.entries.get_mut(receipt.code.as_str()) {
            entry.sealed.tag[0] ^= 0x01;
        }

        assert!(matches!(
            store.take_once(receipt.code.as_str()),
            Err(RelayError::NotFound)
        ));
        assert_eq!(store.count(), 0);
        assert_eq!(store.stats().auth_failures, 1);
    }

    #[test]
    fn test_concurrent_take_single_winner() {
        const THREADS: usize = 16;

        let (store, _) = store();
        let receipt = store.create(b"race").unwrap();
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let store = store.clone();
                let barrier = barrier.clone();
                let code = receipt.code.clone();
                thread::spawn(move || {
                    barrier.wait();
                    store.take_once(code.as_str())
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();

        assert_eq!(winners.len(), 1);
        assert_eq!(winners[0].as_slice(), b"race");
        assert_eq!(
            results
                .iter()
                .filter(|r| matches!(r, Err(RelayError::NotFound)))
                .count(),
            THREADS - 1
        );
    }

    #[test]
    fn test_concurrent_creates_get_distinct_codes() {
        let (store, _) = store();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    (0..200)
                        .map(|j| store.create(format!("{}-{}", i, j).as_bytes()).unwrap().code)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut codes: Vec<Code> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let total = codes.len();
        codes.sort();
        codes.dedup();

        assert_eq!(codes.len(), total);
        assert_eq!(store.count(), total);
    }

    #[test]
    fn test_sweep_removes_only_expired() {
        let (store, clock) = store();

        for _ in 0..3 {
            store.create(b"old").unwrap();
        }
        clock.advance(Duration::from_millis(300_000));
        let fresh = store.create(b"fresh").unwrap();

        clock.advance(Duration::from_millis(300_001));
        assert_eq!(store.sweep(), 3);
        assert_eq!(store.count(), 1);
        assert_eq!(store.take_once(fresh.code.as_str()).unwrap(), b"fresh");
        assert_eq!(store.stats().total_swept, 3);
    }

    #[test]
    fn test_clear() {
        let (store, _) = store();
        for _ in 0..5 {
            store.create(b"x").unwrap();
        }
        store.clear();
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_background_sweep() {
        let clock = Arc::new(ManualClock::new(T0));
        let config = RelayConfig::default().with_cleanup_interval(Duration::from_millis(10));
        let store = Arc::new(EntryStore::new(&config, clock.clone()));

        store.create(b"short-lived").unwrap();
        clock.advance(Duration::from_millis(600_001));

        assert!(store.start_sweep().unwrap());
        assert!(!store.start_sweep().unwrap());
        assert!(store.is_sweeping());

        thread::sleep(Duration::from_millis(100));
        assert_eq!(store.count(), 0);

        store.stop_sweep();
        store.stop_sweep();
        assert!(!store.is_sweeping());
    }

    #[test]
    fn test_stats() {
        let (store, _) = store();
        let receipt = store.create(b"counted").unwrap();
        store.create(b"pending").unwrap();
        store.take_once(receipt.code.as_str()).unwrap();
        let _ = store.take_once(receipt.code.as_str());

        let stats = store.stats();
        assert_eq!(stats.live_entries, 1);
        assert_eq!(stats.total_created, 2);
        assert_eq!(stats.total_retrieved, 1);
        assert_eq!(stats.total_not_found, 1);
        assert!(stats.summary().contains("Created: 2"));
    }

    #[test]
    fn test_debug_hides_contents() {
        let (store, _) = store();
        let receipt = store.create(b"classified").unwrap();

        assert!(!format!("{:?}", store).contains("classified"));
        assert!(format!("{:?}", receipt).contains("Code(******)"));
    }
}
