//! Process-wide stream handler table.
//!
//! Object backends register a [`StreamHandler`] for their
//! `scheme://container` authority when they are prepared. After that,
//! [`open_read`] and [`open_write`] accept remote descriptors (or plain
//! `scheme://container/key` URIs) exactly like local paths.
//!
//! The table holds weak references: a handler stays registered for as long
//! as the backend that registered it is alive.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock, RwLock, Weak};
use tokio::fs::File;
use tracing::debug;

use filecrypt_common::{AccessDescriptor, Error, RemoteObject, Result};

use crate::provider::{BoxedReader, BoxedWriter};

/// Opens byte streams for objects of one container.
#[async_trait]
pub trait StreamHandler: Send + Sync {
    /// Open an object for reading.
    async fn open_read(&self, object: &RemoteObject) -> Result<BoxedReader>;

    /// Open an object for writing. Content is committed on `shutdown`.
    async fn open_write(&self, object: &RemoteObject) -> Result<BoxedWriter>;
}

type HandlerTable = RwLock<HashMap<String, Weak<dyn StreamHandler>>>;

fn table() -> &'static HandlerTable {
    static HANDLERS: OnceLock<HandlerTable> = OnceLock::new();
    HANDLERS.get_or_init(|| RwLock::new(HashMap::new()))
}

fn poisoned() -> Error {
    Error::Resolution("Stream handler table is poisoned".to_string())
}

fn same_handler(a: &Arc<dyn StreamHandler>, b: &Arc<dyn StreamHandler>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Register `handler` for `authority` (`scheme://container`).
///
/// Registering the same handler again is a no-op. A slot whose previous
/// owner has been dropped is reused.
///
/// # Errors
/// - Resolution error if another live handler already owns `authority`
pub fn register(authority: &str, handler: &Arc<dyn StreamHandler>) -> Result<()> {
    let mut table = table().write().map_err(|_| poisoned())?;

    if let Some(existing) = table.get(authority).and_then(Weak::upgrade) {
        if same_handler(&existing, handler) {
            return Ok(());
        }
        return Err(Error::Resolution(format!(
            "A different backend already serves {}",
            authority
        )));
    }

    table.insert(authority.to_string(), Arc::downgrade(handler));
    debug!(authority = %authority, "Stream handler registered");
    Ok(())
}

/// Look up the live handler for `authority`.
pub fn handler_for(authority: &str) -> Option<Arc<dyn StreamHandler>> {
    let table = table().read().ok()?;
    table.get(authority).and_then(Weak::upgrade)
}

/// Whether a live handler is registered for `authority`.
pub fn is_registered(authority: &str) -> bool {
    handler_for(authority).is_some()
}

fn lookup(object: &RemoteObject) -> Result<Arc<dyn StreamHandler>> {
    let authority = object.authority();
    handler_for(&authority).ok_or_else(|| {
        Error::Resolution(format!(
            "No stream handler registered for {}; prepare its backend first",
            authority
        ))
    })
}

/// Open a readable stream at `descriptor`.
///
/// # Errors
/// - I/O error if a local file cannot be opened
/// - Resolution error if no handler serves a remote descriptor
pub async fn open_read(descriptor: &AccessDescriptor) -> Result<BoxedReader> {
    match descriptor {
        AccessDescriptor::Local { path } => {
            let file = File::open(path).await?;
            Ok(Box::pin(file))
        }
        AccessDescriptor::Remote(object) => lookup(object)?.open_read(object).await,
    }
}

/// Open a writable stream at `descriptor`, truncating existing content.
///
/// The parent directory of a local path must already exist.
pub async fn open_write(descriptor: &AccessDescriptor) -> Result<BoxedWriter> {
    match descriptor {
        AccessDescriptor::Local { path } => {
            let file = File::create(path).await?;
            Ok(Box::pin(file))
        }
        AccessDescriptor::Remote(object) => lookup(object)?.open_write(object).await,
    }
}

fn descriptor_for_uri(uri: &str) -> Result<AccessDescriptor> {
    if uri.contains("://") {
        Ok(AccessDescriptor::Remote(RemoteObject::parse(uri)?))
    } else {
        Ok(AccessDescriptor::Local {
            path: PathBuf::from(uri),
        })
    }
}

/// Open a readable stream from a local path or a `scheme://container/key` URI.
pub async fn open_uri_read(uri: &str) -> Result<BoxedReader> {
    open_read(&descriptor_for_uri(uri)?).await
}

/// Open a writable stream to a local path or a `scheme://container/key` URI.
pub async fn open_uri_write(uri: &str) -> Result<BoxedWriter> {
    open_write(&descriptor_for_uri(uri)?).await
}
