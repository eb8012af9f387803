//! # Code Allocator
//!
//! Codes are the only credential a receiver holds, so they are drawn from the
//! operating system's CSPRNG and sampled uniformly over `000000..=999999`.
//!
//! ```text
//!     generate_unique_with(claim):
//!
//!     attempt 1 ─► "482913" ─► claim? ── no ──┐
//!     attempt 2 ─► "004817" ─► claim? ── no ──┤
//!        ...                                  │
//!     attempt k ─► "771020" ─► claim? ── yes ─┼──► Ok(code)
//!                                             │
//!     attempt max ─────────────────── no ─────┴──► Err(ExhaustionError)
//! ```

use super::config::{CODE_SPACE, DEFAULT_MAX_CODE_ATTEMPTS};
use super::error::RelayError;
use rand::rngs::OsRng;
use rand::Rng;
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of digits in a code.
pub const CODE_LEN: usize = 6;

/// Returns `true` if `s` is exactly six ASCII decimal digits.
///
/// No sign, no whitespace, no non-ASCII digits.
///
/// ```rust
/// use portal_core::is_valid_format;
///
/// assert!(is_valid_format("004213"));
/// assert!(!is_valid_format(" 04213"));
/// assert!(!is_valid_format("+04213"));
/// assert!(!is_valid_format("1234567"));
/// ```
#[inline]
pub fn is_valid_format(s: &str) -> bool {
    s.len() == CODE_LEN && s.bytes().all(|b| b.is_ascii_digit())
}

/// A validated six-digit retrieval code.
///
/// Hashes and compares like its string form, so maps keyed by `Code` can be
/// queried with a `&str`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Code(String);

impl Code {
    /// Builds a code from a number in `0..=999_999`, zero-padded.
    fn from_number(n: u32) -> Self {
        Self(format!("{:06}", n))
    }

    /// The code as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Code {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if is_valid_format(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(RelayError::InvalidCode)
        }
    }
}

impl Borrow<str> for Code {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Code {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Codes are credentials; keep them out of debug output.
impl fmt::Debug for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Code(******)")
    }
}

/// Raised when no free code was found within the retry budget.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no free code after {attempts} attempts")]
pub struct ExhaustionError {
    /// Draws made before giving up.
    pub attempts: u32,
}

impl From<ExhaustionError> for RelayError {
    fn from(err: ExhaustionError) -> Self {
        RelayError::AllocationExhausted {
            attempts: err.attempts,
        }
    }
}

/// Draws random codes and finds free ones.
#[derive(Debug, Clone, Copy)]
pub struct CodeAllocator {
    max_attempts: u32,
}

impl Default for CodeAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CODE_ATTEMPTS)
    }
}

impl CodeAllocator {
    /// Creates an allocator that gives up after `max_attempts` draws.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Retry budget of this allocator.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Draws one code uniformly from the full six-digit space.
    pub fn generate(&self) -> Code {
        Code::from_number(OsRng.gen_range(0..CODE_SPACE))
    }

    /// Draws codes until one is absent from `live`.
    ///
    /// # Errors
    ///
    /// [`ExhaustionError`] once the retry budget is spent.
    pub fn generate_unique(&self, live: &HashSet<String>) -> Result<Code, ExhaustionError> {
        self.generate_unique_with(|code| !live.contains(code.as_str()))
    }

    /// Draws codes until `claim` accepts one.
    ///
    /// `claim` decides whether a candidate is free and, if so, may take it
    /// atomically (the entry store inserts inside the closure so the
    /// check-and-insert cannot race another allocation).
    pub fn generate_unique_with<F>(&self, mut claim: F) -> Result<Code, ExhaustionError>
    where
        F: FnMut(&Code) -> bool,
    {
        for _ in 0..self.max_attempts {
            let code = self.generate();
            if claim(&code) {
                return Ok(code);
            }
        }

        Err(ExhaustionError {
            attempts: self.max_attempts,
        })
    }
}
