//! Common utilities and types shared across filecrypt modules.
//!
//! This module provides the error taxonomy and the small data contracts that
//! connect the storage layer to the transform engine.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{AccessDescriptor, FileRef, RemoteObject};
