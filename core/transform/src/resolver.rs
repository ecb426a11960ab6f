//! Backend resolution.
//!
//! Maps a configured backend name plus a logical identifier to the access
//! descriptor streams are opened at, and prepares backends for stream access.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use filecrypt_common::{AccessDescriptor, Error, FileRef, Result};
use filecrypt_storage::{BackendRegistry, CapabilityHandle, StorageBackend};

use crate::config::CryptConfig;

/// Configured backends, by name.
///
/// Built once from configuration; shared freely behind an `Arc`.
pub struct BackendResolver {
    backends: BTreeMap<String, Arc<dyn StorageBackend>>,
    default_backend: String,
}

impl BackendResolver {
    /// Create an empty resolver whose default backend is `default_backend`.
    pub fn new(default_backend: impl Into<String>) -> Self {
        Self {
            backends: BTreeMap::new(),
            default_backend: default_backend.into(),
        }
    }

    /// Build every configured backend through `registry`.
    ///
    /// # Errors
    /// - Configuration error for an unknown backend type or invalid options
    pub fn from_config(config: &CryptConfig, registry: &BackendRegistry) -> Result<Self> {
        config.validate()?;

        let mut resolver = Self::new(&config.default_backend);
        for (name, backend) in &config.backends {
            let built = registry.create(&backend.kind, name, &backend.options_value())?;
            resolver.add(built)?;
            debug!(backend = %name, kind = %backend.kind, "Backend configured");
        }
        Ok(resolver)
    }

    /// Add a backend under its own name.
    ///
    /// # Errors
    /// - Returns error if a backend with that name already exists
    pub fn add(&mut self, backend: Arc<dyn StorageBackend>) -> Result<()> {
        let name = backend.name().to_string();
        if self.backends.contains_key(&name) {
            return Err(Error::AlreadyExists(format!(
                "Backend '{}' is already configured",
                name
            )));
        }
        self.backends.insert(name, backend);
        Ok(())
    }

    /// Builder-style [`add`](Self::add).
    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Result<Self> {
        self.add(backend)?;
        Ok(self)
    }

    /// Name of the default backend.
    pub fn default_backend(&self) -> &str {
        &self.default_backend
    }

    /// Names of all configured backends.
    pub fn names(&self) -> Vec<&str> {
        self.backends.keys().map(String::as_str).collect()
    }

    /// Look up a configured backend.
    ///
    /// # Errors
    /// - Configuration error if `name` is not configured
    pub fn backend(&self, name: &str) -> Result<&Arc<dyn StorageBackend>> {
        self.backends
            .get(name)
            .ok_or_else(|| Error::Configuration(format!("Unknown backend '{}'", name)))
    }

    /// Map `id` on backend `name` to an access descriptor.
    ///
    /// The identifier is used verbatim; nothing is checked or opened.
    pub fn resolve(&self, name: &str, id: &FileRef) -> Result<AccessDescriptor> {
        self.backend(name)?.resolve(id)
    }

    /// Prepare backend `name` for stream access. Idempotent.
    ///
    /// # Errors
    /// - Configuration error if `name` is not configured
    /// - Resolution error if the backend cannot be prepared
    pub async fn prepare_backend(&self, name: &str) -> Result<CapabilityHandle> {
        self.backend(name)?.prepare().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filecrypt_storage::{create_default_registry, BackendKind, MemoryObjectBackend};
    use tempfile::TempDir;

    #[test]
    fn test_from_config() {
        let temp = TempDir::new().unwrap();
        let config = CryptConfig::default_local(temp.path());
        let resolver = BackendResolver::from_config(&config, &create_default_registry()).unwrap();

        assert_eq!(resolver.default_backend(), "local");
        assert_eq!(resolver.names(), vec!["local"]);
        assert_eq!(resolver.backend("local").unwrap().kind(), BackendKind::Local);
    }

    #[test]
    fn test_unknown_backend_is_configuration_error() {
        let resolver = BackendResolver::new("local");
        let id = FileRef::new("file").unwrap();
        assert!(matches!(
            resolver.resolve("nowhere", &id),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_duplicate_backend_rejected() {
        let resolver = BackendResolver::new("mem")
            .with_backend(Arc::new(MemoryObjectBackend::new("mem", "resolver-dup-a")))
            .unwrap();
        let result =
            resolver.with_backend(Arc::new(MemoryObjectBackend::new("mem", "resolver-dup-b")));
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_remote_resolution_is_verbatim() {
        let resolver = BackendResolver::new("mem")
            .with_backend(Arc::new(MemoryObjectBackend::new("mem", "resolver-verbatim")))
            .unwrap();
        let id = FileRef::new("a/../b.txt").unwrap();
        let descriptor = resolver.resolve("mem", &id).unwrap();
        assert_eq!(descriptor.to_string(), "mem://resolver-verbatim/a/../b.txt");
    }

    #[tokio::test]
    async fn test_prepare_backend_is_idempotent() {
        let resolver = BackendResolver::new("mem")
            .with_backend(Arc::new(MemoryObjectBackend::new("mem", "resolver-prepare")))
            .unwrap();
        let first = resolver.prepare_backend("mem").await.unwrap();
        let second = resolver.prepare_backend("mem").await.unwrap();
        assert_eq!(first, second);
        assert!(matches!(
            resolver.prepare_backend("other").await,
            Err(Error::Configuration(_))
        ));
    }
}
