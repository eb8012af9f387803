//! Error types returned by the relay core.

use thiserror::Error;

/// Errors surfaced to the transport layer.
///
/// `NotFound` deliberately covers "never existed", "expired", "already
/// consumed" and "failed integrity check". Callers cannot tell these apart.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The code does not resolve to a readable entry.
    #[error("code not found")]
    NotFound,

    /// No free code was found within the allocator's retry budget.
    #[error("unable to allocate a unique code after {attempts} attempts")]
    AllocationExhausted {
        /// Number of draws made before giving up.
        attempts: u32,
    },

    /// The client's bucket has no capacity left in the current window.
    #[error("too many requests")]
    RateLimited,

    /// The code is not exactly six ASCII digits.
    #[error("invalid code format")]
    InvalidCode,

    /// The submitted content is empty after trimming whitespace.
    #[error("content is required")]
    EmptyContent,

    /// The submitted content exceeds the configured maximum.
    #[error("content length {len} exceeds maximum of {max} bytes")]
    ContentTooLarge {
        /// Length of the rejected content.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Construction-time configuration was rejected by validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    /// The background sweep thread could not be spawned.
    #[error("failed to spawn sweep thread: {0}")]
    SweepSpawn(#[from] std::io::Error),
}

impl RelayError {
    /// Whether the error signals overload rather than a bad request.
    ///
    /// Transport layers map these to 503/429 style responses.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::AllocationExhausted { .. } | Self::RateLimited | Self::SweepSpawn(_)
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RelayError>;
