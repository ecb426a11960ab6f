//! In-memory object storage backend for testing.
//!
//! Behaves like a remote object store: identifiers resolve to
//! `scheme://container/key` descriptors and streams are only reachable once
//! the backend has been prepared.

use async_trait::async_trait;
use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

use filecrypt_common::{AccessDescriptor, Error, FileRef, RemoteObject, Result};

use crate::capability::Capability;
use crate::handlers::StreamHandler;
use crate::provider::{
    BackendKind, BoxedReader, BoxedWriter, CapabilityHandle, ObjectBackend, StorageBackend,
};

/// Default scheme for in-memory objects.
pub const MEMORY_SCHEME: &str = "mem";

type Objects = Arc<RwLock<HashMap<String, Vec<u8>>>>;

fn poisoned() -> Error {
    Error::Storage("Memory store lock poisoned".to_string())
}

/// In-memory object storage backend.
///
/// Useful for testing and development. All data is stored in memory
/// and lost on drop.
pub struct MemoryObjectBackend {
    name: String,
    scheme: String,
    container: String,
    objects: Objects,
    capability: Capability,
}

impl MemoryObjectBackend {
    /// Create a new empty backend serving `container`.
    pub fn new(name: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scheme: MEMORY_SCHEME.to_string(),
            container: container.into(),
            objects: Arc::new(RwLock::new(HashMap::new())),
            capability: Capability::new(),
        }
    }

    /// Use a custom URI scheme.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }

    /// Store an object directly, bypassing streams.
    pub fn insert(&self, key: impl Into<String>, data: Vec<u8>) -> Result<()> {
        self.objects
            .write()
            .map_err(|_| poisoned())?
            .insert(key.into(), data);
        Ok(())
    }

    /// Fetch a copy of an object directly, bypassing streams.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.objects.read().map_err(|_| poisoned())?.get(key).cloned())
    }

    /// Whether the stream handler has been registered.
    pub fn is_prepared(&self) -> bool {
        self.capability.is_ready()
    }
}

#[async_trait]
impl StorageBackend for MemoryObjectBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::RemoteObject
    }

    fn resolve(&self, id: &FileRef) -> Result<AccessDescriptor> {
        Ok(AccessDescriptor::Remote(RemoteObject::new(
            &self.scheme,
            &self.container,
            id.as_str(),
        )))
    }

    async fn prepare(&self) -> Result<CapabilityHandle> {
        self.capability.get_or_register(self).await
    }

    async fn exists(&self, id: &FileRef) -> Result<bool> {
        Ok(self
            .objects
            .read()
            .map_err(|_| poisoned())?
            .contains_key(id.as_str()))
    }

    async fn delete(&self, id: &FileRef) -> Result<()> {
        match self
            .objects
            .write()
            .map_err(|_| poisoned())?
            .remove(id.as_str())
        {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("Object not found: {}", id))),
        }
    }
}

impl ObjectBackend for MemoryObjectBackend {
    fn scheme(&self) -> &str {
        &self.scheme
    }

    fn container(&self) -> &str {
        &self.container
    }

    fn stream_handler(&self) -> Result<Arc<dyn StreamHandler>> {
        Ok(Arc::new(MemoryStreamHandler {
            objects: self.objects.clone(),
        }))
    }
}

struct MemoryStreamHandler {
    objects: Objects,
}

#[async_trait]
impl StreamHandler for MemoryStreamHandler {
    async fn open_read(&self, object: &RemoteObject) -> Result<BoxedReader> {
        let data = self
            .objects
            .read()
            .map_err(|_| poisoned())?
            .get(&object.key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", object)))?;
        Ok(Box::pin(io::Cursor::new(data)))
    }

    async fn open_write(&self, object: &RemoteObject) -> Result<BoxedWriter> {
        Ok(Box::pin(MemoryObjectWriter {
            objects: self.objects.clone(),
            key: object.key.clone(),
            buffer: Vec::new(),
        }))
    }
}

/// Buffers writes and publishes the object on shutdown.
struct MemoryObjectWriter {
    objects: Objects,
    key: String,
    buffer: Vec<u8>,
}

impl AsyncWrite for MemoryObjectWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buffer.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let data = std::mem::take(&mut self.buffer);
        let key = self.key.clone();
        let mut objects = self
            .objects
            .write()
            .map_err(|_| io::Error::other("Memory store lock poisoned"))?;
        objects.insert(key, data);
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_streams_require_prepare() {
        let backend = MemoryObjectBackend::new("mem", "unprepared");
        let id = FileRef::new("file").unwrap();
        backend.insert("file", b"data".to_vec()).unwrap();

        assert!(matches!(
            backend.open_read(&id).await,
            Err(Error::Resolution(_))
        ));

        backend.prepare().await.unwrap();
        assert!(backend.open_read(&id).await.is_ok());
    }

    #[tokio::test]
    async fn test_prepare_is_idempotent() {
        let backend = MemoryObjectBackend::new("mem", "idempotent");
        assert!(!backend.is_prepared());

        let first = backend.prepare().await.unwrap();
        let second = backend.prepare().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.authority.as_deref(), Some("mem://idempotent"));
        assert!(backend.is_prepared());
    }

    #[tokio::test]
    async fn test_concurrent_prepare() {
        let backend = Arc::new(MemoryObjectBackend::new("mem", "concurrent"));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let backend = backend.clone();
            tasks.push(tokio::spawn(async move { backend.prepare().await }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert!(handlers::is_registered("mem://concurrent"));
    }

    #[tokio::test]
    async fn test_two_backends_same_container_conflict() {
        let first = MemoryObjectBackend::new("a", "shared");
        let second = MemoryObjectBackend::new("b", "shared");
        first.prepare().await.unwrap();
        assert!(matches!(
            second.prepare().await,
            Err(Error::Resolution(_))
        ));
    }

    #[tokio::test]
    async fn test_write_commits_on_shutdown() {
        let backend = MemoryObjectBackend::new("mem", "commit");
        backend.prepare().await.unwrap();
        let id = FileRef::new("dir/object.bin").unwrap();

        let mut writer = backend.open_write(&id).await.unwrap();
        writer.write_all(b"Hello, Memory!").await.unwrap();
        assert!(!backend.exists(&id).await.unwrap());

        writer.shutdown().await.unwrap();
        assert_eq!(backend.get("dir/object.bin").unwrap().unwrap(), b"Hello, Memory!");

        let mut reader = handlers::open_uri_read("mem://commit/dir/object.bin")
            .await
            .unwrap();
        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"Hello, Memory!");
    }

    #[tokio::test]
    async fn test_dropped_writer_does_not_publish() {
        let backend = MemoryObjectBackend::new("mem", "dropped");
        backend.prepare().await.unwrap();
        let id = FileRef::new("partial").unwrap();

        let mut writer = backend.open_write(&id).await.unwrap();
        writer.write_all(b"half").await.unwrap();
        drop(writer);

        assert!(!backend.exists(&id).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let backend = MemoryObjectBackend::new("mem", "delete");
        let id = FileRef::new("gone").unwrap();
        backend.insert("gone", vec![1, 2, 3]).unwrap();

        backend.delete(&id).await.unwrap();
        assert!(!backend.exists(&id).await.unwrap());
        assert!(matches!(backend.delete(&id).await, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_resolve_uses_identifier_verbatim() {
        let backend = MemoryObjectBackend::new("mem", "bucket").with_scheme("s3");
        let id = FileRef::new("/odd//key").unwrap();
        let descriptor = backend.resolve(&id).unwrap();
        assert_eq!(descriptor.to_string(), "s3://bucket//odd//key");
    }
}
