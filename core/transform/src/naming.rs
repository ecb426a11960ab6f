//! Default destination names.

use filecrypt_common::FileRef;

use crate::config::{CryptConfig, DEFAULT_ENCRYPTED_SUFFIX, DEFAULT_FALLBACK_SUFFIX};

/// Derives a destination when the caller does not give one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naming {
    encrypted_suffix: String,
    fallback_suffix: String,
}

impl Naming {
    /// Create naming rules from explicit suffixes.
    pub fn new(encrypted_suffix: impl Into<String>, fallback_suffix: impl Into<String>) -> Self {
        Self {
            encrypted_suffix: encrypted_suffix.into(),
            fallback_suffix: fallback_suffix.into(),
        }
    }

    /// Naming rules from configuration.
    pub fn from_config(config: &CryptConfig) -> Self {
        Self::new(&config.encrypted_suffix, &config.fallback_suffix)
    }

    /// `report.pdf` → `report.pdf.enc`
    pub fn encrypted_name(&self, source: &FileRef) -> FileRef {
        source.with_suffix(&self.encrypted_suffix)
    }

    /// `report.pdf.enc` → `report.pdf`; anything else gets the fallback
    /// suffix appended so the source is never overwritten.
    pub fn decrypted_name(&self, source: &FileRef) -> FileRef {
        source
            .strip_suffix(&self.encrypted_suffix)
            .unwrap_or_else(|| source.with_suffix(&self.fallback_suffix))
    }
}

impl Default for Naming {
    fn default() -> Self {
        Self::new(DEFAULT_ENCRYPTED_SUFFIX, DEFAULT_FALLBACK_SUFFIX)
    }
}
