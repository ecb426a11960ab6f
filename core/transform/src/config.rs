//! filecrypt configuration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use filecrypt_common::{Error, Result};
use filecrypt_crypto::{CipherSpec, DEFAULT_CHUNK_SIZE};

/// Suffix appended to encrypted files.
pub const DEFAULT_ENCRYPTED_SUFFIX: &str = ".enc";

/// Suffix appended to decrypted files whose name lacks the encrypted suffix.
pub const DEFAULT_FALLBACK_SUFFIX: &str = ".dec";

/// Name of the backend used when no configuration file is given.
pub const DEFAULT_BACKEND_NAME: &str = "local";

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_encrypted_suffix() -> String {
    DEFAULT_ENCRYPTED_SUFFIX.to_string()
}

fn default_fallback_suffix() -> String {
    DEFAULT_FALLBACK_SUFFIX.to_string()
}

/// One configured backend: its type plus type-specific options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend type as known to the registry (e.g. "local", "s3").
    #[serde(rename = "type")]
    pub kind: String,
    /// Remaining options, passed to the backend factory untouched.
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl BackendConfig {
    /// Options as a JSON object.
    pub fn options_value(&self) -> Value {
        Value::Object(self.options.clone())
    }
}

/// Top-level configuration.
///
/// Loaded once and passed by reference to everything that needs it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CryptConfig {
    /// Cipher used when an operation does not name one.
    #[serde(default)]
    pub cipher: CipherSpec,
    /// Backend used when the caller does not name one.
    pub default_backend: String,
    /// Streaming chunk size in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Suffix appended on encryption.
    #[serde(default = "default_encrypted_suffix")]
    pub encrypted_suffix: String,
    /// Suffix appended on decryption when the encrypted suffix is absent.
    #[serde(default = "default_fallback_suffix")]
    pub fallback_suffix: String,
    /// Configured backends by name.
    pub backends: BTreeMap<String, BackendConfig>,
}

impl CryptConfig {
    /// Configuration with a single local backend rooted at `root`.
    pub fn default_local(root: impl AsRef<Path>) -> Self {
        let mut options = Map::new();
        options.insert(
            "root".to_string(),
            Value::String(root.as_ref().to_string_lossy().into_owned()),
        );

        let mut backends = BTreeMap::new();
        backends.insert(
            DEFAULT_BACKEND_NAME.to_string(),
            BackendConfig {
                kind: "local".to_string(),
                options,
            },
        );

        Self {
            cipher: CipherSpec::default(),
            default_backend: DEFAULT_BACKEND_NAME.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            encrypted_suffix: default_encrypted_suffix(),
            fallback_suffix: default_fallback_suffix(),
            backends,
        }
    }

    /// Parse and validate configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::Configuration(format!("Invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse, and validate a configuration file.
    ///
    /// # Errors
    /// - I/O error if the file cannot be read
    /// - Configuration error if it is malformed or inconsistent
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&json)
    }

    /// Serialize configuration to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| Error::Configuration(format!("Cannot serialize configuration: {}", e)))
    }

    /// Check internal consistency.
    ///
    /// # Errors
    /// - Default backend is not configured
    /// - Chunk size is zero or not a multiple of the block size
    /// - A suffix is empty, or both suffixes are equal
    pub fn validate(&self) -> Result<()> {
        if !self.backends.contains_key(&self.default_backend) {
            return Err(Error::Configuration(format!(
                "Default backend '{}' is not configured",
                self.default_backend
            )));
        }

        self.cipher.check_chunk_size(self.chunk_size)?;

        if self.encrypted_suffix.is_empty() || self.fallback_suffix.is_empty() {
            return Err(Error::Configuration(
                "File suffixes cannot be empty".to_string(),
            ));
        }
        if self.encrypted_suffix == self.fallback_suffix {
            return Err(Error::Configuration(
                "Encrypted and fallback suffixes must differ".to_string(),
            ));
        }

        Ok(())
    }
}
