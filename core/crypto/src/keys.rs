//! Key type with secure memory handling.
//!
//! Keys zeroize their memory on drop and never print their bytes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cipher::CipherSpec;
use filecrypt_common::{Error, Result};

/// Raw symmetric key material.
///
/// The length is checked against a [`CipherSpec`] when the key is used, so
/// the same bytes can be handed to any cipher that accepts their length.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Key {
    bytes: Vec<u8>,
}

impl Key {
    /// Wrap raw key bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// Generate a random key sized exactly for `cipher`.
    pub fn generate(cipher: CipherSpec) -> Self {
        let mut bytes = vec![0u8; cipher.key_len()];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Decode a base64 key.
    ///
    /// # Errors
    /// - Returns a configuration error if the input is not valid base64
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| Error::Configuration(format!("Key is not valid base64: {}", e)))?;
        Ok(Self { bytes })
    }

    /// Encode the key as base64.
    ///
    /// # Security
    /// The returned string holds key material and is not zeroized.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    /// Get the key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Key length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the key is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key([REDACTED; {} bytes])", self.bytes.len())
    }
}
