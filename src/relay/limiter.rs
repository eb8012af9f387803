//! # Sliding-Window Rate Limiting
//!
//! Requests are counted per *bucket*, where a bucket is a salted hash of the
//! client's network prefix rather than the client address itself.
//!
//! ```text
//!     "203.0.113.57"  ──► prefix "203.0.113"  ──┐
//!     "203.0.113.9"   ──► prefix "203.0.113"  ──┼──► SHA-256(salt ‖ prefix)[..8]
//!                                               │        = bucket 5f0c…e1
//!     "2001:db8:42::7"──► prefix "2001:db8:42" ─┘        (different bucket)
//!
//!     bucket ──► [t1, t2, t3, …]   timestamps inside the trailing window
//! ```
//!
//! Each check prunes timestamps that have left the window, rejects if the
//! remaining count has reached the ceiling, and otherwise records `now`.
//! The prune/compare/append sequence runs under the bucket's shard lock, so
//! concurrent bursts from one source cannot undercount.
//!
//! The bucket table is bounded. A new identifier reserves a slot before its
//! bucket is inserted; when none is free, empty buckets are swept and then
//! the buckets with the oldest newest request are evicted, so a flood of
//! rotating prefixes pushes out idle clients instead of locking out new ones.
//!
//! [`AccessLimiter`] pairs two independent namespaces: creation and
//! retrieval.

use super::config::RelayConfig;
use super::error::Result;
use super::metrics::LimiterStats;
use super::sweeper::Sweeper;
use super::utils::Clock;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::VecDeque;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bytes of the salted digest kept as the bucket identifier.
const BUCKET_ID_LEN: usize = 8;

/// Length of the per-limiter random salt.
const SALT_LEN: usize = 32;

/// Eviction frees `max_buckets / EVICTION_DIVISOR` slots (at least one).
const EVICTION_DIVISOR: usize = 10;

/// Times a new identifier retries after freeing room before it is refused.
const ADMIT_ATTEMPTS: usize = 4;

/// Hashed identifier for a client network prefix.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketId([u8; BUCKET_ID_LEN]);

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketId({})", self)
    }
}

/// Reduces a client address to its privacy-preserving prefix.
///
/// - IPv4: first three octets (`/24`)
/// - IPv6: first three groups (`/48`); IPv4-mapped addresses count as IPv4
/// - anything unparseable: first three `.`- or `:`-separated parts of the
///   raw string
///
/// ```rust
/// use portal_core::identifier_prefix;
///
/// assert_eq!(identifier_prefix("10.0.0.5"), "10.0.0");
/// assert_eq!(identifier_prefix("2001:db8:42::7"), "2001:db8:42");
/// assert_eq!(identifier_prefix("::ffff:10.0.0.5"), "10.0.0");
/// ```
pub fn identifier_prefix(client_key: &str) -> String {
    let trimmed = client_key.trim();

    match trimmed.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => ipv4_prefix(v4),
        Ok(IpAddr::V6(v6)) => match v6.to_ipv4_mapped() {
            Some(v4) => ipv4_prefix(v4),
            None => {
                let groups = v6.segments();
                format!("{:x}:{:x}:{:x}", groups[0], groups[1], groups[2])
            }
        },
        Err(_) => {
            let separator = if trimmed.contains(':') { ":" } else { "." };
            trimmed
                .split(separator)
                .take(3)
                .collect::<Vec<_>>()
                .join(separator)
        }
    }
}

fn ipv4_prefix(addr: Ipv4Addr) -> String {
    let [a, b, c, _] = addr.octets();
    format!("{}.{}.{}", a, b, c)
}

/// Sliding-window limiter for a single namespace.
///
/// # Example
///
/// ```rust
/// use portal_core::{SlidingWindowLimiter, SystemClock};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let limiter = SlidingWindowLimiter::new(
///     "create",
///     3,
///     Duration::from_secs(60),
///     1_000,
///     Arc::new(SystemClock),
/// );
///
/// assert!(limiter.check("10.0.0.5"));
/// assert!(limiter.check("10.0.0.6")); // same /24, same bucket
/// assert!(limiter.check("10.0.0.7"));
/// assert!(!limiter.check("10.0.0.8"));
/// assert!(limiter.check("10.0.1.5")); // different /24
/// ```
pub struct SlidingWindowLimiter {
    namespace: &'static str,
    limit: u32,
    window_ms: u64,
    max_buckets: usize,
    salt: [u8; SALT_LEN],
    buckets: DashMap<BucketId, VecDeque<u64>, ahash::RandomState>,
    clock: Arc<dyn Clock>,
    tracked: AtomicUsize,
    eviction_in_progress: AtomicBool,
    total_allowed: AtomicU64,
    total_rejected: AtomicU64,
    total_swept: AtomicU64,
    total_evicted: AtomicU64,
}

impl SlidingWindowLimiter {
    /// Creates a limiter allowing `limit` requests per `window` per bucket.
    pub fn new(
        namespace: &'static str,
        limit: u32,
        window: Duration,
        max_buckets: usize,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        Self {
            namespace,
            limit,
            window_ms: window.as_millis() as u64,
            max_buckets: max_buckets.max(1),
            salt,
            buckets: DashMap::with_hasher(ahash::RandomState::new()),
            clock,
            tracked: AtomicUsize::new(0),
            eviction_in_progress: AtomicBool::new(false),
            total_allowed: AtomicU64::new(0),
            total_rejected: AtomicU64::new(0),
            total_swept: AtomicU64::new(0),
            total_evicted: AtomicU64::new(0),
        }
    }

    /// Derives the bucket for a client address.
    ///
    /// The salt is random per limiter instance, so identifiers cannot be
    /// recomputed outside this process.
    pub fn bucket_id(&self, client_key: &str) -> BucketId {
        let prefix = identifier_prefix(client_key);

        let mut hasher = Sha256::new();
        hasher.update(self.salt);
        hasher.update(prefix.as_bytes());
        let digest = hasher.finalize();

        let mut id = [0u8; BUCKET_ID_LEN];
        id.copy_from_slice(&digest[..BUCKET_ID_LEN]);
        BucketId(id)
    }

    /// Checks against the configured ceiling and records the request if
    /// allowed.
    #[inline]
    pub fn check(&self, client_key: &str) -> bool {
        self.check_with_limit(client_key, self.limit)
    }

    /// Checks against an explicit ceiling and records the request if
    /// allowed.
    ///
    /// Rejected requests are not recorded, so a client that stops sending
    /// regains capacity as soon as its oldest counted request leaves the
    /// window.
    pub fn check_with_limit(&self, client_key: &str, limit: u32) -> bool {
        let id = self.bucket_id(client_key);
        let now = self.clock.now_ms();

        for _ in 0..ADMIT_ATTEMPTS {
            match self.record(id, now, limit) {
                Some(true) => {
                    self.total_allowed.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Some(false) => {
                    self.total_rejected.fetch_add(1, Ordering::Relaxed);
                    debug!("Rate limit hit [{}] for bucket {}", self.namespace, id);
                    return false;
                }
                None => {
                    self.evict_idle();
                }
            }
        }

        warn!(
            "Rate limiter [{}] could not admit bucket {} at capacity ({})",
            self.namespace, id, self.max_buckets
        );
        self.total_rejected.fetch_add(1, Ordering::Relaxed);
        false
    }

    /// Prunes, compares and appends under the bucket's shard lock.
    ///
    /// A new bucket is only inserted after a slot under `max_buckets` has
    /// been reserved; `None` means the table is full.
    fn record(&self, id: BucketId, now: u64, limit: u32) -> Option<bool> {
        let mut bucket = match self.buckets.entry(id) {
            MapEntry::Occupied(entry) => entry.into_ref(),
            MapEntry::Vacant(slot) => {
                let max = self.max_buckets;
                self.tracked
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                        (n < max).then_some(n + 1)
                    })
                    .ok()?;
                slot.insert(VecDeque::new())
            }
        };

        let window = self.window_ms;
        bucket.retain(|&ts| now.saturating_sub(ts) < window);

        if bucket.len() >= limit as usize {
            return Some(false);
        }

        bucket.push_back(now);
        Some(true)
    }

    /// Frees room at the ceiling: sweeps first, then drops the buckets whose
    /// newest request is oldest until a tenth of the table is free.
    ///
    /// Returns the number of buckets evicted.
    fn evict_idle(&self) -> usize {
        if self
            .eviction_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Another caller is already freeing room
            std::thread::yield_now();
            return 0;
        }

        self.sweep();

        let target = self
            .max_buckets
            .saturating_sub((self.max_buckets / EVICTION_DIVISOR).max(1));
        let current = self.tracked.load(Ordering::Acquire);
        let mut evicted = 0;

        if current > target {
            info!(
                "Rate limiter [{}] at capacity ({}), evicting idle buckets",
                self.namespace, current
            );

            let mut candidates: Vec<(u64, BucketId)> = self
                .buckets
                .iter()
                .map(|entry| (entry.value().back().copied().unwrap_or(0), *entry.key()))
                .collect();
            candidates.sort_unstable_by_key(|&(newest, _)| newest);

            for (_, id) in candidates.into_iter().take(current - target) {
                if self.buckets.remove(&id).is_some() {
                    self.tracked.fetch_sub(1, Ordering::AcqRel);
                    evicted += 1;
                }
            }

            self.total_evicted.fetch_add(evicted as u64, Ordering::Relaxed);
            info!(
                "Rate limiter [{}] evicted {} idle buckets",
                self.namespace, evicted
            );
        }

        self.eviction_in_progress.store(false, Ordering::Release);
        evicted
    }

    /// Prunes stale timestamps and drops buckets left empty.
    ///
    /// Returns the number of buckets removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let window = self.window_ms;
        let mut removed = 0;

        self.buckets.retain(|_, timestamps| {
            timestamps.retain(|&ts| now.saturating_sub(ts) < window);
            if timestamps.is_empty() {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            self.tracked.fetch_sub(removed, Ordering::AcqRel);
            self.total_swept.fetch_add(removed as u64, Ordering::Relaxed);
            debug!("Sweep [{}] removed {} empty buckets", self.namespace, removed);
        }

        removed
    }

    /// Number of buckets currently tracked.
    #[inline]
    pub fn tracked_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Requests currently counted for the client's bucket.
    pub fn recorded(&self, client_key: &str) -> usize {
        let id = self.bucket_id(client_key);
        let now = self.clock.now_ms();
        self.buckets
            .get(&id)
            .map(|b| b.iter().filter(|&&ts| now.saturating_sub(ts) < self.window_ms).count())
            .unwrap_or(0)
    }

    /// Configured ceiling.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Drops every bucket.
    pub fn clear(&self) {
        let mut removed = 0;
        self.buckets.retain(|_, _| {
            removed += 1;
            false
        });
        self.tracked.fetch_sub(removed, Ordering::AcqRel);
    }

    /// Counter snapshot.
    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            namespace: self.namespace,
            tracked_buckets: self.tracked_buckets(),
            max_buckets: self.max_buckets,
            total_allowed: self.total_allowed.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_swept: self.total_swept.load(Ordering::Relaxed),
            total_evicted: self.total_evicted.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("namespace", &self.namespace)
            .field("limit", &self.limit)
            .field("window_ms", &self.window_ms)
            .field("tracked_buckets", &self.tracked_buckets())
            .finish()
    }
}

/// The creation and retrieval limiters plus their shared background sweep.
pub struct AccessLimiter {
    create: SlidingWindowLimiter,
    retrieve: SlidingWindowLimiter,
    cleanup_interval: Duration,
    sweeper: Sweeper,
}

impl AccessLimiter {
    /// Builds both namespaces from the relay configuration.
    pub fn new(config: &RelayConfig, clock: Arc<dyn Clock>) -> Self {
        let window = Duration::from_millis(config.rate_window_ms);

        Self {
            create: SlidingWindowLimiter::new(
                "create",
                config.create_limit,
                window,
                config.max_tracked_buckets,
                clock.clone(),
            ),
            retrieve: SlidingWindowLimiter::new(
                "retrieve",
                config.retrieve_limit,
                window,
                config.max_tracked_buckets,
                clock,
            ),
            cleanup_interval: config.cleanup_interval(),
            sweeper: Sweeper::new("portal-limit-sweep"),
        }
    }

    /// Checks and records a creation request.
    #[inline]
    pub fn check_create_limit(&self, client_key: &str) -> bool {
        self.create.check(client_key)
    }

    /// Checks and records a retrieval request.
    #[inline]
    pub fn check_retrieve_limit(&self, client_key: &str) -> bool {
        self.retrieve.check(client_key)
    }

    /// The creation namespace.
    pub fn create_limiter(&self) -> &SlidingWindowLimiter {
        &self.create
    }

    /// The retrieval namespace.
    pub fn retrieve_limiter(&self) -> &SlidingWindowLimiter {
        &self.retrieve
    }

    /// Sweeps both namespaces, returning the total buckets removed.
    pub fn sweep(&self) -> usize {
        let removed = self.create.sweep() + self.retrieve.sweep();

        for stats in [self.create.stats(), self.retrieve.stats()] {
            if stats.is_near_capacity() {
                warn!(
                    "High bucket usage [{}]: {}/{}",
                    stats.namespace, stats.tracked_buckets, stats.max_buckets
                );
            }
        }

        removed
    }

    /// Starts the periodic sweep. Calling it again while running is a no-op.
    ///
    /// Returns `true` if this call spawned the sweep thread.
    pub fn start_sweep(self: &Arc<Self>) -> Result<bool> {
        let started = self
            .sweeper
            .start(self.cleanup_interval, Arc::downgrade(self), |limiter: &Self| {
                limiter.sweep();
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

    /// Counter snapshots for (create, retrieve).
    pub fn stats(&self) -> (LimiterStats, LimiterStats) {
        (self.create.stats(), self.retrieve.stats())
    }
}

impl fmt::Debug for AccessLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessLimiter")
            .field("create", &self.create)
            .field("retrieve", &self.retrieve)
            .field("sweeper", &self.sweeper)
            .finish()
    }
}
