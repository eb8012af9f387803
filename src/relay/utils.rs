//! # Time Sources (utils.rs)
//!
//! Every expiry decision in the relay (entry TTLs, sliding rate windows) is a
//! comparison against "now" in milliseconds since the UNIX epoch. This module
//! provides that "now" through the [`Clock`] trait so stores can be driven by
//! the real clock in production and by a hand-cranked clock in tests.
//!
//! ```text
//!     Clock implementations:
//!
//!     SystemClock ──► current_time_ms()   (wall clock anchored once,
//!                                          advanced by a monotonic Instant)
//!
//!     ManualClock ──► AtomicU64           (set / advance explicitly)
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

// Monotonic time base to prevent issues when the system clock jumps.
// We capture the wall-clock epoch milliseconds at process start,
// then advance using a monotonic Instant to compute 'now'.
static START_TIME_BASE: OnceLock<(Instant, u64)> = OnceLock::new();

/// Returns the current time in milliseconds since UNIX epoch.
///
/// The value never goes backwards within a process, even if the system
/// clock is adjusted, so TTL and window arithmetic stays consistent.
///
/// # Example
///
/// ```rust
/// use portal_core::current_time_ms;
///
/// let now = current_time_ms();
/// assert!(now > 0);
/// ```
#[inline(always)]
pub fn current_time_ms() -> u64 {
    let (start, base_ms) = START_TIME_BASE.get_or_init(|| {
        let epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        (Instant::now(), epoch_ms)
    });
    base_ms.saturating_add(start.elapsed().as_millis() as u64)
}

/// Source of "now" for expiry and window calculations.
///
/// Implementations must be cheap to call; stores query the clock on every
/// operation.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current instant in milliseconds since the UNIX epoch.
    fn now_ms(&self) -> u64;
}

/// The production clock, backed by [`current_time_ms`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        current_time_ms()
    }
}

/// A clock that only moves when told to.
///
/// Used to test behaviour exactly at TTL and window boundaries without
/// sleeping.
///
/// # Example
///
/// ```rust
/// use portal_core::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(Duration::from_millis(500));
/// assert_eq!(clock.now_ms(), 1_500);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Creates a clock frozen at `start_ms`.
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        self.now
            .fetch_add(by.as_millis() as u64, Ordering::AcqRel);
    }

    /// Jumps the clock to an absolute instant.
    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::Release);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_monotonicity() {
        let mut last_ms = 0;

        for _ in 0..10 {
            let ms = current_time_ms();
            assert!(ms >= last_ms);
            last_ms = ms;
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_system_clock_tracks_current_time() {
        let before = current_time_ms();
        let now = SystemClock.now_ms();
        let after = current_time_ms();

        assert!(now >= before);
        assert!(now <= after);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(10);
        assert_eq!(clock.now_ms(), 10);

        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now_ms(), 1_010);

        clock.set(5);
        assert_eq!(clock.now_ms(), 5);
    }
}
