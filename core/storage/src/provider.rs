//! Storage backend trait definitions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

use filecrypt_common::{AccessDescriptor, FileRef, Result};

use crate::handlers::{self, StreamHandler};

/// Readable byte stream opened at an access descriptor.
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;

/// Writable byte stream opened at an access descriptor.
///
/// Remote writers commit on `shutdown`; dropping one without shutting it
/// down discards the upload.
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// The two families of backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Files on the local filesystem.
    Local,
    /// Objects in a (possibly remote) container.
    RemoteObject,
}

/// Proof that a backend has been prepared for stream access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityHandle {
    /// Name of the prepared backend.
    pub backend: String,
    /// Kind of the prepared backend.
    pub kind: BackendKind,
    /// `scheme://container` the stream handler is registered under.
    pub authority: Option<String>,
}

impl CapabilityHandle {
    /// Handle for a backend that needs no registration.
    pub fn local(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            kind: BackendKind::Local,
            authority: None,
        }
    }

    /// Handle for an object backend registered under `authority`.
    pub fn remote(backend: impl Into<String>, authority: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            kind: BackendKind::RemoteObject,
            authority: Some(authority.into()),
        }
    }
}

/// Storage backend trait.
///
/// A backend turns backend-relative identifiers into access descriptors and
/// owns the operations that are not plain stream I/O (existence checks and
/// deletion). Stream opening goes through the generic [`handlers`] so that
/// callers never touch backend-specific APIs.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Configured backend name (e.g., "local", "archive").
    fn name(&self) -> &str;

    /// Which family this backend belongs to.
    fn kind(&self) -> BackendKind;

    /// Map a logical identifier to an access descriptor.
    ///
    /// The identifier is used verbatim. It is not validated here and is
    /// never rewritten.
    fn resolve(&self, id: &FileRef) -> Result<AccessDescriptor>;

    /// Prepare the backend for stream access.
    ///
    /// # Postconditions
    /// - `open_read`/`open_write` on descriptors from this backend work
    /// - Repeated calls are no-ops returning the same handle
    ///
    /// # Errors
    /// - Resolution error if the backend cannot be made usable (e.g.
    ///   missing credentials); a later call retries
    async fn prepare(&self) -> Result<CapabilityHandle>;

    /// Open a stream to read `id`.
    async fn open_read(&self, id: &FileRef) -> Result<BoxedReader> {
        let descriptor = self.resolve(id)?;
        handlers::open_read(&descriptor).await
    }

    /// Open a stream to write `id`, replacing any existing content.
    async fn open_write(&self, id: &FileRef) -> Result<BoxedWriter> {
        let descriptor = self.resolve(id)?;
        handlers::open_write(&descriptor).await
    }

    /// Check if `id` exists.
    async fn exists(&self, id: &FileRef) -> Result<bool>;

    /// Delete a file.
    ///
    /// # Errors
    /// - File not found
    /// - Backend errors
    async fn delete(&self, id: &FileRef) -> Result<()>;
}

/// Capability contract for object backends.
///
/// Everything needed to register stream access is exposed here explicitly
/// instead of being dug out of the backend's internals.
pub trait ObjectBackend: StorageBackend {
    /// URI scheme the backend's objects are addressed with.
    fn scheme(&self) -> &str;

    /// Bucket or container holding the objects.
    fn container(&self) -> &str;

    /// Build the handler that opens streams for this container.
    ///
    /// # Errors
    /// - Resolution error if the handler cannot be built (e.g. credentials
    ///   are missing)
    fn stream_handler(&self) -> Result<Arc<dyn StreamHandler>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_handles() {
        let local = CapabilityHandle::local("disk");
        assert_eq!(local.kind, BackendKind::Local);
        assert!(local.authority.is_none());

        let remote = CapabilityHandle::remote("archive", "s3://bucket");
        assert_eq!(remote.kind, BackendKind::RemoteObject);
        assert_eq!(remote.authority.as_deref(), Some("s3://bucket"));
    }

    #[test]
    fn test_backend_kind_serialization() {
        let json = serde_json::to_string(&BackendKind::RemoteObject).unwrap();
        assert_eq!(json, "\"remote_object\"");
    }
}
