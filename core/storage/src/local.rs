//! Local filesystem storage backend.

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use tokio::fs;
use tracing::debug;

use crate::provider::{BackendKind, CapabilityHandle, StorageBackend};
use filecrypt_common::{AccessDescriptor, Error, FileRef, Result};

/// Local filesystem storage backend.
///
/// Identifiers are appended to the root directory as-is.
pub struct LocalBackend {
    name: String,
    root: PathBuf,
}

impl LocalBackend {
    /// Create a new local backend with the given root directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied
    pub fn new(name: impl Into<String>, root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Create root if it doesn't exist (sync for constructor)
        if !root.exists() {
            std::fs::create_dir_all(&root)?;
        }

        Ok(Self {
            name: name.into(),
            root,
        })
    }

    /// Root directory of this backend.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a FileRef to a filesystem path.
    ///
    /// Plain concatenation: an identifier starting with a separator still
    /// lands under the root instead of replacing it, as `Path::join` would.
    fn to_fs_path(&self, id: &FileRef) -> PathBuf {
        let mut joined = OsString::from(self.root.as_os_str());
        joined.push(MAIN_SEPARATOR.to_string());
        joined.push(id.as_str());
        PathBuf::from(joined)
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    fn resolve(&self, id: &FileRef) -> Result<AccessDescriptor> {
        Ok(AccessDescriptor::Local {
            path: self.to_fs_path(id),
        })
    }

    async fn prepare(&self) -> Result<CapabilityHandle> {
        if !self.root.is_dir() {
            return Err(Error::Resolution(format!(
                "Root of backend '{}' is not a directory: {}",
                self.name,
                self.root.display()
            )));
        }
        Ok(CapabilityHandle::local(&self.name))
    }

    async fn exists(&self, id: &FileRef) -> Result<bool> {
        Ok(self.to_fs_path(id).exists())
    }

    async fn delete(&self, id: &FileRef) -> Result<()> {
        let fs_path = self.to_fs_path(id);

        if !fs_path.exists() {
            return Err(Error::NotFound(format!("File not found: {}", id)));
        }

        if fs_path.is_dir() {
            return Err(Error::InvalidInput(format!(
                "Refusing to delete a directory: {}",
                id
            )));
        }

        fs::remove_file(&fs_path).await?;
        debug!(backend = %self.name, file = %id, "File deleted");
        Ok(())
    }
}
