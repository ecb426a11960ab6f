//! Encrypt/decrypt operations over configured backends.

use std::fmt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use filecrypt_common::{AccessDescriptor, Error, FileRef, Result};
use filecrypt_crypto::{
    CipherSpec, DecryptingStream, EncryptingStream, Key, StreamStats, DEFAULT_CHUNK_SIZE,
};
use filecrypt_storage::{
    open_read, open_write, BackendRegistry, BoxedReader, BoxedWriter, StorageBackend,
};

use crate::config::CryptConfig;
use crate::naming::Naming;
use crate::resolver::BackendResolver;

/// Direction of a transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Encrypt,
    Decrypt,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Encrypt => f.write_str("encrypt"),
            Mode::Decrypt => f.write_str("decrypt"),
        }
    }
}

/// A single requested transform.
///
/// Source and destination live on the same backend.
#[derive(Debug, Clone)]
pub struct Operation<'k> {
    /// Encrypt or decrypt.
    pub mode: Mode,
    /// Name of the configured backend holding both files.
    pub backend: String,
    /// File read from.
    pub source: FileRef,
    /// File written to.
    pub destination: FileRef,
    /// Key material; its length must match `cipher`.
    pub key: &'k Key,
    /// Cipher and key size.
    pub cipher: CipherSpec,
    /// Delete the source through the backend once the transform succeeded.
    pub delete_source_on_success: bool,
    /// Delete a partially written local destination if the transform fails
    /// midway. Remote destinations are never deleted: an upload that was not
    /// committed left nothing behind, so any object at that key predates
    /// this operation.
    pub remove_partial_on_failure: bool,
}

impl<'k> Operation<'k> {
    /// An operation that keeps the source and leaves partial output alone.
    pub fn new(
        mode: Mode,
        backend: impl Into<String>,
        source: FileRef,
        destination: FileRef,
        key: &'k Key,
        cipher: CipherSpec,
    ) -> Self {
        Self {
            mode,
            backend: backend.into(),
            source,
            destination,
            key,
            cipher,
            delete_source_on_success: false,
            remove_partial_on_failure: false,
        }
    }

    /// Set [`Operation::delete_source_on_success`].
    pub fn delete_source(mut self, delete: bool) -> Self {
        self.delete_source_on_success = delete;
        self
    }

    /// Set [`Operation::remove_partial_on_failure`].
    pub fn remove_partial(mut self, remove: bool) -> Self {
        self.remove_partial_on_failure = remove;
        self
    }
}

/// What happened to the source after a successful transform.
#[derive(Debug)]
pub enum SourceDisposition {
    /// Deletion was not requested.
    Kept,
    /// The source was deleted.
    Deleted,
    /// Deletion was requested but failed. The destination is still valid.
    Failed(Error),
}

/// Outcome of a successful transform.
#[derive(Debug)]
pub struct TransformReport {
    /// Direction that ran.
    pub mode: Mode,
    /// Backend the files live on.
    pub backend: String,
    /// Where the source resolved to.
    pub source: AccessDescriptor,
    /// Where the output was written.
    pub destination: AccessDescriptor,
    /// Bytes consumed from the source and produced into the destination.
    pub stats: StreamStats,
    /// Whether the source was kept, deleted, or failed to delete.
    pub source_disposition: SourceDisposition,
}

impl TransformReport {
    /// Whether the source was deleted.
    pub fn source_deleted(&self) -> bool {
        matches!(self.source_disposition, SourceDisposition::Deleted)
    }

    /// The post-condition error, if source deletion failed.
    pub fn post_condition_error(&self) -> Option<&Error> {
        match &self.source_disposition {
            SourceDisposition::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// File encryption over configured backends.
///
/// Holds no per-operation state; one instance can run any number of
/// independent operations concurrently.
pub struct FileCrypt {
    resolver: BackendResolver,
    naming: Naming,
    cipher: CipherSpec,
    chunk_size: usize,
}

impl FileCrypt {
    /// Create with the default cipher, chunk size, and naming.
    pub fn new(resolver: BackendResolver) -> Self {
        Self {
            resolver,
            naming: Naming::default(),
            cipher: CipherSpec::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Build every configured backend and take cipher, chunk size, and
    /// naming from `config`.
    ///
    /// # Errors
    /// - Configuration error for invalid configuration or backend options
    pub fn from_config(config: &CryptConfig, registry: &BackendRegistry) -> Result<Self> {
        let resolver = BackendResolver::from_config(config, registry)?;
        Ok(Self {
            resolver,
            naming: Naming::from_config(config),
            cipher: config.cipher,
            chunk_size: config.chunk_size,
        })
    }

    /// Use `cipher` for the convenience operations.
    pub fn with_cipher(mut self, cipher: CipherSpec) -> Self {
        self.cipher = cipher;
        self
    }

    /// Set the streaming chunk size.
    ///
    /// # Errors
    /// - Size is zero or not a multiple of the block size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self> {
        self.cipher.check_chunk_size(chunk_size)?;
        self.chunk_size = chunk_size;
        Ok(self)
    }

    /// Replace the default destination naming.
    pub fn with_naming(mut self, naming: Naming) -> Self {
        self.naming = naming;
        self
    }

    /// Backends this instance operates on.
    pub fn resolver(&self) -> &BackendResolver {
        &self.resolver
    }

    /// Destination naming rules.
    pub fn naming(&self) -> &Naming {
        &self.naming
    }

    /// Cipher used by the convenience operations.
    pub fn cipher(&self) -> CipherSpec {
        self.cipher
    }

    /// Generate a fresh key for the configured cipher.
    pub fn generate_key(&self) -> Key {
        Key::generate(self.cipher)
    }

    /// Map `id` on `backend` to its access descriptor without opening it.
    pub fn resolve(&self, backend: &str, id: &FileRef) -> Result<AccessDescriptor> {
        self.resolver.resolve(backend, id)
    }

    /// Run one transform.
    ///
    /// # Postconditions
    /// - On success the destination holds the complete output and remote
    ///   uploads have been committed
    /// - On failure a local destination may hold partial output, unless
    ///   `remove_partial_on_failure` was set and removal succeeded
    /// - On failure a remote destination is left as it was before the call
    ///
    /// # Errors
    /// - Configuration error: key length, unknown backend (nothing opened)
    /// - Resolution error: backend preparation failed (nothing opened)
    /// - InvalidInput error: source and destination are the same file
    /// - I/O or NotFound error opening or streaming
    /// - Crypto error: truncated input or invalid padding
    pub async fn transform(&self, operation: Operation<'_>) -> Result<TransformReport> {
        operation.cipher.check_key(operation.key.as_bytes())?;
        let backend = self.resolver.backend(&operation.backend)?;
        backend.prepare().await?;

        let source = backend.resolve(&operation.source)?;
        let destination = backend.resolve(&operation.destination)?;
        if source == destination {
            return Err(Error::InvalidInput(format!(
                "Source and destination are the same: {}",
                source
            )));
        }

        debug!(
            mode = %operation.mode,
            backend = %operation.backend,
            source = %source,
            destination = %destination,
            cipher = %operation.cipher,
            "Starting transform"
        );

        let mut reader = open_read(&source).await?;
        let mut writer = open_write(&destination).await?;

        let stats = match self
            .run(&operation, &mut reader, &mut writer)
            .await
        {
            Ok(stats) => stats,
            Err(e) => {
                // Dropping an unfinished remote writer discards the upload.
                drop(writer);
                if operation.remove_partial_on_failure && !destination.is_remote() {
                    remove_partial(&**backend, &operation.destination).await;
                }
                warn!(
                    mode = %operation.mode,
                    destination = %destination,
                    error = %e,
                    "Transform failed"
                );
                return Err(e);
            }
        };
        drop(reader);

        info!(
            mode = %operation.mode,
            destination = %destination,
            bytes_read = stats.bytes_read,
            bytes_written = stats.bytes_written,
            "Transform complete"
        );

        let source_disposition = if operation.delete_source_on_success {
            match backend.delete(&operation.source).await {
                Ok(()) => {
                    debug!(source = %source, "Source deleted");
                    SourceDisposition::Deleted
                }
                Err(e) => {
                    warn!(source = %source, error = %e, "Source could not be deleted");
                    SourceDisposition::Failed(Error::PostCondition(format!(
                        "{} succeeded but deleting {} failed: {}",
                        operation.mode, source, e
                    )))
                }
            }
        } else {
            SourceDisposition::Kept
        };

        Ok(TransformReport {
            mode: operation.mode,
            backend: operation.backend,
            source,
            destination,
            stats,
            source_disposition,
        })
    }

    async fn run(
        &self,
        operation: &Operation<'_>,
        reader: &mut BoxedReader,
        writer: &mut BoxedWriter,
    ) -> Result<StreamStats> {
        let stats = match operation.mode {
            Mode::Encrypt => {
                EncryptingStream::new(operation.key, operation.cipher)?
                    .with_chunk_size(self.chunk_size)?
                    .encrypt_async(reader, &mut *writer)
                    .await?
            }
            Mode::Decrypt => {
                DecryptingStream::new(operation.key, operation.cipher)?
                    .with_chunk_size(self.chunk_size)?
                    .decrypt_async(reader, &mut *writer)
                    .await?
            }
        };
        writer.shutdown().await?;
        Ok(stats)
    }

    /// Encrypt `source` on `backend`.
    ///
    /// The destination defaults to the source name plus the encrypted suffix.
    pub async fn encrypt(
        &self,
        backend: &str,
        source: &FileRef,
        destination: Option<&FileRef>,
        key: &Key,
        delete_source: bool,
    ) -> Result<TransformReport> {
        let destination = destination
            .cloned()
            .unwrap_or_else(|| self.naming.encrypted_name(source));
        let operation = Operation::new(
            Mode::Encrypt,
            backend,
            source.clone(),
            destination,
            key,
            self.cipher,
        )
        .delete_source(delete_source);
        self.transform(operation).await
    }

    /// Decrypt `source` on `backend`.
    ///
    /// The destination defaults to the source name without the encrypted
    /// suffix, or with the fallback suffix appended if it has none.
    pub async fn decrypt(
        &self,
        backend: &str,
        source: &FileRef,
        destination: Option<&FileRef>,
        key: &Key,
        delete_source: bool,
    ) -> Result<TransformReport> {
        let destination = destination
            .cloned()
            .unwrap_or_else(|| self.naming.decrypted_name(source));
        let operation = Operation::new(
            Mode::Decrypt,
            backend,
            source.clone(),
            destination,
            key,
            self.cipher,
        )
        .delete_source(delete_source);
        self.transform(operation).await
    }

    /// Encrypt, always keeping the source.
    pub async fn encrypt_copy(
        &self,
        backend: &str,
        source: &FileRef,
        destination: Option<&FileRef>,
        key: &Key,
    ) -> Result<TransformReport> {
        self.encrypt(backend, source, destination, key, false).await
    }

    /// Decrypt, always keeping the source.
    pub async fn decrypt_copy(
        &self,
        backend: &str,
        source: &FileRef,
        destination: Option<&FileRef>,
        key: &Key,
    ) -> Result<TransformReport> {
        self.decrypt(backend, source, destination, key, false).await
    }

    /// Stream-decrypt `source` into any writer (stdout, a response body).
    ///
    /// The writer is flushed but not shut down.
    pub async fn decrypt_to_writer<W>(
        &self,
        backend: &str,
        source: &FileRef,
        key: &Key,
        writer: W,
    ) -> Result<StreamStats>
    where
        W: AsyncWrite + Unpin,
    {
        self.cipher.check_key(key.as_bytes())?;
        let backend = self.resolver.backend(backend)?;
        backend.prepare().await?;

        let descriptor = backend.resolve(source)?;
        debug!(source = %descriptor, "Decrypting to writer");

        let reader = open_read(&descriptor).await?;
        DecryptingStream::new(key, self.cipher)?
            .with_chunk_size(self.chunk_size)?
            .decrypt_async(reader, writer)
            .await
    }
}

async fn remove_partial(backend: &dyn StorageBackend, destination: &FileRef) {
    match backend.delete(destination).await {
        Ok(()) => debug!(destination = %destination, "Partial output removed"),
        // Uncommitted uploads never existed.
        Err(Error::NotFound(_)) => {}
        Err(e) => warn!(
            destination = %destination,
            error = %e,
            "Partial output could not be removed"
        ),
    }
}
