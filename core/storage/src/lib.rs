//! Storage backend abstraction for filecrypt.
//!
//! This module provides a trait-based interface over the places encrypted
//! files live (local filesystem, in-memory object store, HTTP object
//! storage), a registry for building backends from configuration, and the
//! process-wide stream handler table that lets `scheme://container/key`
//! identifiers be opened like local paths.
//!
//! # Design Principles
//! - Backend isolation: no backend-specific logic in the crypto or transform crates
//! - Explicit capabilities: remote backends expose their container, scheme, and
//!   stream handler through [`ObjectBackend`]
//! - One-time preparation: handler registration happens once per backend,
//!   never as a side effect of resolving a path
//! - Streaming: reads and writes are `AsyncRead`/`AsyncWrite` handles

pub mod capability;
pub mod handlers;
pub mod http;
pub mod local;
pub mod memory;
pub mod provider;
pub mod registry;

pub use capability::Capability;
pub use handlers::{open_read, open_uri_read, open_uri_write, open_write, StreamHandler};
pub use http::{HttpObjectBackend, HttpObjectConfig};
pub use local::LocalBackend;
pub use memory::MemoryObjectBackend;
pub use provider::{
    BackendKind, BoxedReader, BoxedWriter, CapabilityHandle, ObjectBackend, StorageBackend,
};
pub use registry::{create_default_registry, BackendFactory, BackendRegistry};
