//! Common error types for filecrypt.

use thiserror::Error;

/// Top-level error type for filecrypt operations.
///
/// `Configuration` and `Resolution` are raised before any stream is opened.
/// `Io` and `Crypto` abort a transform midway; the destination is then
/// incomplete. `PostCondition` is reported after a successful transform.
#[derive(Debug, Error)]
pub enum Error {
    /// Unknown backend, invalid key length, or malformed configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Backend preparation failed (e.g. remote credentials unavailable).
    #[error("Resolution error: {0}")]
    Resolution(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[source] std::io::Error),

    /// Invalid padding, truncated ciphertext, or other decryption failure.
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// The transform succeeded but the follow-up on the source failed.
    #[error("Post-condition error: {0}")]
    PostCondition(String),

    /// Backend storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),
}

impl Error {
    /// Whether this error was raised before any stream was opened.
    pub fn is_preflight(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::Resolution(_))
    }
}

impl From<std::io::Error> for Error {
    /// Stream adapters carry backend errors inside `io::Error`; those are
    /// unwrapped so the caller sees the original variant.
    fn from(e: std::io::Error) -> Self {
        if !e.get_ref().is_some_and(|inner| inner.is::<Error>()) {
            return Error::Io(e);
        }
        match e.into_inner().map(|inner| inner.downcast::<Error>()) {
            Some(Ok(inner)) => *inner,
            _ => Error::Io(std::io::Error::other("Wrapped error could not be recovered")),
        }
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
