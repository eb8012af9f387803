//! # Store and Limiter Statistics
//!
//! Point-in-time snapshots for observability. Nothing in here feeds back into
//! a control decision; the store and limiters behave the same whether or not
//! anyone reads these numbers.
//!
//! ```text
//!     StoreStats:
//!     ┌─────────────────────────────────────┐
//!     │  Live Entries: 1 204 / 1 000 000    │
//!     │  Code Space Used: 0.12%             │
//!     │  Retrieved: 8 713   Expired: 310    │
//!     │  Health: ✅ Healthy                 │
//!     └─────────────────────────────────────┘
//! ```

use super::config::CODE_SPACE;
use std::fmt;

/// Occupancy above which random allocation starts to collide noticeably.
const CROWDED_OCCUPANCY: f64 = 0.5;

/// Occupancy above which a ten-draw allocation is likely to fail.
const SATURATED_OCCUPANCY: f64 = 0.8;

/// Snapshot of entry store counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    /// Entries currently held (including expired ones not yet swept).
    pub live_entries: usize,

    /// Entries created since startup.
    pub total_created: u64,

    /// Entries handed out by a successful retrieval.
    pub total_retrieved: u64,

    /// Entries found expired during retrieval.
    pub total_expired: u64,

    /// Entries removed by sweeps.
    pub total_swept: u64,

    /// Retrievals that resolved to nothing.
    pub total_not_found: u64,

    /// Stored entries that failed tag verification.
    pub auth_failures: u64,

    /// Creations refused because no free code was found.
    pub allocation_failures: u64,
}

impl StoreStats {
    /// Fraction of the six-digit code space currently occupied (0.0 to 1.0).
    #[inline]
    pub fn code_space_used(&self) -> f64 {
        self.live_entries as f64 / CODE_SPACE as f64
    }

    /// Classifies the store by code-space occupancy.
    ///
    /// Allocation draws uniformly, so the chance that all draws collide grows
    /// with occupancy; at 80% a ten-draw budget fails about one time in ten.
    pub fn health_status(&self) -> HealthStatus {
        let used = self.code_space_used();
        if used >= SATURATED_OCCUPANCY {
            HealthStatus::Saturated
        } else if used >= CROWDED_OCCUPANCY {
            HealthStatus::Crowded
        } else {
            HealthStatus::Healthy
        }
    }

    /// Human-readable summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "Entry Store Stats:\n\
             ├─ Capacity:\n\
             │  ├─ Live Entries: {}/{}\n\
             │  └─ Code Space Used: {:.2}%\n\
             ├─ Lifetime:\n\
             │  ├─ Created: {}\n\
             │  ├─ Retrieved: {}\n\
             │  ├─ Expired On Read: {}\n\
             │  ├─ Swept: {}\n\
             │  └─ Not Found: {}\n\
             └─ Anomalies:\n\
                ├─ Auth Failures: {}\n\
                ├─ Allocation Failures: {}\n\
                └─ Status: {}",
            self.live_entries,
            CODE_SPACE,
            self.code_space_used() * 100.0,
            self.total_created,
            self.total_retrieved,
            self.total_expired,
            self.total_swept,
            self.total_not_found,
            self.auth_failures,
            self.allocation_failures,
            self.health_status()
        )
    }
}

impl fmt::Display for StoreStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Snapshot of one rate limiter namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimiterStats {
    /// Namespace label ("create" or "retrieve").
    pub namespace: &'static str,

    /// Identifier buckets currently tracked.
    pub tracked_buckets: usize,

    /// Bucket ceiling for this namespace.
    pub max_buckets: usize,

    /// Checks that were allowed.
    pub total_allowed: u64,

    /// Checks that were rejected.
    pub total_rejected: u64,

    /// Empty buckets removed by sweeps.
    pub total_swept: u64,

    /// Least recently used buckets dropped to admit new identifiers.
    pub total_evicted: u64,
}

impl LimiterStats {
    /// Total checks performed.
    #[inline]
    pub fn total_checks(&self) -> u64 {
        self.total_allowed + self.total_rejected
    }

    /// Fraction of checks rejected (0.0 when nothing was checked).
    pub fn rejection_rate(&self) -> f64 {
        let total = self.total_checks();
        if total == 0 {
            0.0
        } else {
            self.total_rejected as f64 / total as f64
        }
    }

    /// Whether more than 80% of the bucket ceiling is in use.
    pub fn is_near_capacity(&self) -> bool {
        self.max_buckets > 0 && self.tracked_buckets as f64 / self.max_buckets as f64 > 0.8
    }

    /// Human-readable summary for logs.
    pub fn summary(&self) -> String {
        format!(
            "Rate Limiter [{}] Stats:\n\
             ├─ Buckets: {}/{}\n\
             ├─ Allowed: {}\n\
             ├─ Rejected: {} ({:.2}%)\n\
             ├─ Swept: {}\n\
             └─ Evicted: {}",
            self.namespace,
            self.tracked_buckets,
            self.max_buckets,
            self.total_allowed,
            self.total_rejected,
            self.rejection_rate() * 100.0,
            self.total_swept,
            self.total_evicted
        )
    }
}

impl fmt::Display for LimiterStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())
    }
}

/// Health of the entry store's code space.
///
/// ```text
///     Healthy ────► < 50% of codes in use, allocation effectively never fails
///        │
///     Crowded ────► ≥ 50%, collisions common, retries absorb them
///        │
///     Saturated ──► ≥ 80%, allocation failures expected
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Plenty of free codes.
    Healthy,
    /// Collisions are frequent but allocation still succeeds.
    Crowded,
    /// Allocation is likely to report exhaustion.
    Saturated,
}

impl HealthStatus {
    /// Returns true for anything other than `Healthy`.
    pub fn is_unhealthy(&self) -> bool {
        !matches!(self, Self::Healthy)
    }

    /// Operator guidance for the status.
    pub fn suggested_action(&self) -> &'static str {
        match self {
            Self::Healthy => "No action needed",
            Self::Crowded => "Monitor closely, consider a shorter TTL or tighter create limit",
            Self::Saturated => "Immediate action required: shed creation load",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "✅ Healthy"),
            Self::Crowded => write!(f, "⚠️ Crowded"),
            Self::Saturated => write!(f, "🔴 Saturated"),
        }
    }
}
