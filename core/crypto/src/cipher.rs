//! Cipher selection.
//!
//! Key and IV lengths are fixed functions of the selected algorithm.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use filecrypt_common::{Error, Result};

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// A block cipher in CBC mode with PKCS#7 padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CipherSpec {
    /// AES with a 128-bit key.
    Aes128Cbc,
    /// AES with a 192-bit key.
    Aes192Cbc,
    /// AES with a 256-bit key.
    Aes256Cbc,
}

impl CipherSpec {
    /// All supported ciphers.
    pub const ALL: [CipherSpec; 3] = [
        CipherSpec::Aes128Cbc,
        CipherSpec::Aes192Cbc,
        CipherSpec::Aes256Cbc,
    ];

    /// Canonical algorithm name.
    pub fn name(&self) -> &'static str {
        match self {
            CipherSpec::Aes128Cbc => "aes-128-cbc",
            CipherSpec::Aes192Cbc => "aes-192-cbc",
            CipherSpec::Aes256Cbc => "aes-256-cbc",
        }
    }

    /// Required key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            CipherSpec::Aes128Cbc => 16,
            CipherSpec::Aes192Cbc => 24,
            CipherSpec::Aes256Cbc => 32,
        }
    }

    /// IV length in bytes. CBC uses one block.
    pub fn iv_len(&self) -> usize {
        BLOCK_SIZE
    }

    /// Cipher block size in bytes.
    pub fn block_size(&self) -> usize {
        BLOCK_SIZE
    }

    /// Check that `key` has the length this cipher requires.
    ///
    /// # Errors
    /// - Returns a configuration error on length mismatch
    pub fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_len() {
            return Err(Error::Configuration(format!(
                "Invalid key length for {}: expected {}, got {}",
                self.name(),
                self.key_len(),
                key.len()
            )));
        }
        Ok(())
    }

    /// Check that `chunk_size` never splits a cipher block.
    pub fn check_chunk_size(&self, chunk_size: usize) -> Result<()> {
        if chunk_size == 0 || chunk_size % self.block_size() != 0 {
            return Err(Error::Configuration(format!(
                "Chunk size {} must be a non-zero multiple of {}",
                chunk_size,
                self.block_size()
            )));
        }
        Ok(())
    }
}

impl Default for CipherSpec {
    fn default() -> Self {
        CipherSpec::Aes256Cbc
    }
}

impl fmt::Display for CipherSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CipherSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        CipherSpec::ALL
            .into_iter()
            .find(|c| c.name() == wanted)
            .ok_or_else(|| Error::Configuration(format!("Unsupported cipher: {}", s)))
    }
}

impl TryFrom<String> for CipherSpec {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CipherSpec> for String {
    fn from(cipher: CipherSpec) -> Self {
        cipher.name().to_string()
    }
}
