//! File encryption orchestration for filecrypt.
//!
//! This module provides:
//! - Configuration loading and validation
//! - Backend resolution from logical identifiers to access descriptors
//! - Default naming of encrypted and decrypted files
//! - Encrypt/decrypt operations over any configured backend
//!
//! # Architecture
//! The transform layer sits between the command surface and the storage
//! backends. It prepares a backend once, resolves both ends of an operation,
//! and streams data through the crypto engine without knowing where the
//! bytes actually live.

pub mod config;
pub mod naming;
pub mod operations;
pub mod resolver;

pub use config::{BackendConfig, CryptConfig};
pub use naming::Naming;
pub use operations::{FileCrypt, Mode, Operation, SourceDisposition, TransformReport};
pub use resolver::BackendResolver;
