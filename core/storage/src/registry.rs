//! Backend registry for building backends from configuration.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::http::{HttpObjectBackend, HttpObjectConfig};
use crate::local::LocalBackend;
use crate::memory::MemoryObjectBackend;
use crate::provider::StorageBackend;
use filecrypt_common::{Error, Result};

/// Factory function type for creating backends.
///
/// Receives the configured backend name and its option object.
pub type BackendFactory =
    Box<dyn Fn(&str, &Value) -> Result<Arc<dyn StorageBackend>> + Send + Sync>;

/// Registry of backend factories, keyed by backend type.
pub struct BackendRegistry {
    factories: HashMap<String, BackendFactory>,
}

impl BackendRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a backend factory.
    ///
    /// # Errors
    /// - Returns error if `kind` is already registered
    pub fn register(&mut self, kind: impl Into<String>, factory: BackendFactory) -> Result<()> {
        let kind = kind.into();
        if self.factories.contains_key(&kind) {
            return Err(Error::AlreadyExists(format!(
                "Backend type '{}' is already registered",
                kind
            )));
        }
        self.factories.insert(kind, factory);
        Ok(())
    }

    /// Build a backend named `name` of type `kind`.
    ///
    /// # Errors
    /// - Configuration error for an unknown type or invalid options
    pub fn create(&self, kind: &str, name: &str, options: &Value) -> Result<Arc<dyn StorageBackend>> {
        let factory = self.factories.get(kind).ok_or_else(|| {
            Error::Configuration(format!("Unknown backend type '{}' for '{}'", kind, name))
        })?;
        factory(name, options)
    }

    /// Registered backend types.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.factories.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    /// Check if a backend type is registered.
    pub fn has_kind(&self, kind: &str) -> bool {
        self.factories.contains_key(kind)
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn string_option<'a>(options: &'a Value, key: &str) -> Option<&'a str> {
    options.get(key).and_then(Value::as_str)
}

fn local_factory(name: &str, options: &Value) -> Result<Arc<dyn StorageBackend>> {
    let root = string_option(options, "root").ok_or_else(|| {
        Error::Configuration(format!("Local backend '{}' requires a 'root' path", name))
    })?;
    Ok(Arc::new(LocalBackend::new(name, root)?))
}

fn memory_factory(name: &str, options: &Value) -> Result<Arc<dyn StorageBackend>> {
    let container = string_option(options, "container").unwrap_or(name);
    let mut backend = MemoryObjectBackend::new(name, container);
    if let Some(scheme) = string_option(options, "scheme") {
        backend = backend.with_scheme(scheme);
    }
    Ok(Arc::new(backend))
}

fn s3_factory(name: &str, options: &Value) -> Result<Arc<dyn StorageBackend>> {
    let config: HttpObjectConfig = serde_json::from_value(options.clone()).map_err(|e| {
        Error::Configuration(format!("Invalid options for backend '{}': {}", name, e))
    })?;
    Ok(Arc::new(HttpObjectBackend::new(name, config)?))
}

/// Create a registry with the built-in backend types:
/// `local`, `memory`, and `s3`.
pub fn create_default_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    registry
        .factories
        .insert("local".to_string(), Box::new(local_factory));
    registry
        .factories
        .insert("memory".to_string(), Box::new(memory_factory));
    registry
        .factories
        .insert("s3".to_string(), Box::new(s3_factory));
    registry
}
