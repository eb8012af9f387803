//! # Entry Cipher
//!
//! AES-256-GCM with a key generated once per process. The key lives only
//! inside the cipher instance; when the process exits every stored entry
//! becomes undecryptable.
//!
//! ```text
//!     seal(plaintext)
//!         nonce  ◄── OsRng (12 bytes, fresh per call)
//!         ciphertext, tag ◄── AES-256-GCM(key, nonce, plaintext)
//!
//!     open(ciphertext, nonce, tag)
//!         tag verifies ──► plaintext
//!         otherwise    ──► AuthenticationFailure (no partial output)
//! ```

use super::error::RelayError;
use aes_gcm::aead::{AeadInPlace, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce, Tag};
use rand::RngCore;
use std::fmt;
use thiserror::Error;
use zeroize::Zeroize;

/// Key length in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Authentication tag length in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// Largest plaintext AES-GCM accepts under one nonce (2^36 - 32 bytes).
pub const MAX_PLAINTEXT_LEN: usize = ((1u64 << 36) - 32) as usize;

/// Encryption refused because the payload exceeds [`MAX_PLAINTEXT_LEN`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("plaintext of {0} bytes exceeds the AES-GCM limit")]
pub struct PlaintextTooLarge(pub usize);

impl From<PlaintextTooLarge> for RelayError {
    fn from(err: PlaintextTooLarge) -> Self {
        RelayError::ContentTooLarge {
            len: err.0,
            max: MAX_PLAINTEXT_LEN,
        }
    }
}

/// Decryption refused: wrong tag, wrong nonce, or malformed input.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("authentication failed")]
pub struct AuthenticationFailure;

/// Output of [`Cipher::encrypt`]: everything needed to decrypt except the key.
#[derive(Clone, PartialEq, Eq)]
pub struct Sealed {
    /// Encrypted payload, same length as the plaintext.
    pub ciphertext: Vec<u8>,
    /// Per-call random nonce.
    pub nonce: [u8; NONCE_LEN],
    /// GCM authentication tag.
    pub tag: [u8; TAG_LEN],
}

impl fmt::Debug for Sealed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sealed")
            .field("ciphertext_len", &self.ciphertext.len())
            .finish()
    }
}

/// Process-lifetime symmetric cipher.
///
/// There is no way to read, export or persist the key.
pub struct Cipher {
    aead: Aes256Gcm,
}

impl Cipher {
    /// Creates a cipher with a fresh random 256-bit key.
    pub fn new() -> Self {
        let mut key_bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key_bytes);
        let key: &Key<Aes256Gcm> = (&key_bytes).into();
        let aead = Aes256Gcm::new(key);
        key_bytes.zeroize();

        Self { aead }
    }

    /// Encrypts `plaintext` under a fresh nonce.
    ///
    /// # Errors
    ///
    /// [`PlaintextTooLarge`] if the payload is beyond what GCM can seal.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Sealed, PlaintextTooLarge> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let mut buffer = plaintext.to_vec();
        let tag = match self
            .aead
            .encrypt_in_place_detached(Nonce::from_slice(&nonce), b"", &mut buffer)
        {
            Ok(tag) => tag,
            Err(_) => {
                buffer.zeroize();
                return Err(PlaintextTooLarge(plaintext.len()));
            }
        };

        let mut tag_bytes = [0u8; TAG_LEN];
        tag_bytes.copy_from_slice(tag.as_slice());

        Ok(Sealed {
            ciphertext: buffer,
            nonce,
            tag: tag_bytes,
        })
    }

    /// Decrypts and verifies.
    ///
    /// # Errors
    ///
    /// [`AuthenticationFailure`] if the nonce or tag has the wrong length or
    /// the tag does not verify. Nothing is returned in that case.
    pub fn decrypt(
        &self,
        ciphertext: &[u8],
        nonce: &[u8],
        tag: &[u8],
    ) -> Result<Vec<u8>, AuthenticationFailure> {
        if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(AuthenticationFailure);
        }

        let mut buffer = ciphertext.to_vec();
        match self.aead.decrypt_in_place_detached(
            Nonce::from_slice(nonce),
            b"",
            &mut buffer,
            Tag::from_slice(tag),
        ) {
            Ok(()) => Ok(buffer),
            Err(_) => {
                buffer.zeroize();
                Err(AuthenticationFailure)
            }
        }
    }

    /// Decrypts a [`Sealed`] value.
    pub fn open(&self, sealed: &Sealed) -> Result<Vec<u8>, AuthenticationFailure> {
        self.decrypt(&sealed.ciphertext, &sealed.nonce, &sealed.tag)
    }
}

impl Default for Cipher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("algorithm", &"AES-256-GCM")
            .finish_non_exhaustive()
    }
}
