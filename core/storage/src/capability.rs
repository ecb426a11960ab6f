//! One-time backend preparation.

use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use filecrypt_common::{Error, Result};

use crate::handlers::{self, StreamHandler};
use crate::provider::{CapabilityHandle, ObjectBackend};

struct Prepared {
    handle: CapabilityHandle,
    // Keeps the registered handler alive; the table only holds a weak ref.
    _handler: Arc<dyn StreamHandler>,
}

/// Lazily registers an object backend's stream handler, at most once.
///
/// Concurrent first calls are serialized; only one performs the
/// registration and the rest observe its result. A failed attempt leaves
/// the capability unprepared so a later call can retry.
#[derive(Default)]
pub struct Capability {
    cell: OnceCell<Prepared>,
}

impl Capability {
    /// Create an unprepared capability.
    pub fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Whether registration has completed.
    pub fn is_ready(&self) -> bool {
        self.cell.initialized()
    }

    /// Register `backend`'s stream handler unless already done.
    ///
    /// # Errors
    /// - Resolution error from building or registering the handler
    pub async fn get_or_register<B>(&self, backend: &B) -> Result<CapabilityHandle>
    where
        B: ObjectBackend + ?Sized,
    {
        let prepared = self
            .cell
            .get_or_try_init(|| async move {
                let handler = backend.stream_handler()?;
                let authority = format!("{}://{}", backend.scheme(), backend.container());
                handlers::register(&authority, &handler)?;

                info!(backend = backend.name(), authority = %authority, "Backend prepared");
                Ok::<_, Error>(Prepared {
                    handle: CapabilityHandle::remote(backend.name(), authority),
                    _handler: handler,
                })
            })
            .await?;

        Ok(prepared.handle.clone())
    }
}
