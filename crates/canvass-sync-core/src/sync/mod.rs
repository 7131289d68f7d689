//! The outbox lifecycle: local-first writes, reconciliation with the
//! server, and abandonment of items that keep failing.

pub mod manager;

use thiserror::Error;

use crate::api::ApiError;
use crate::store::StoreError;

pub use manager::SyncManager;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to snapshot contact for the outbox: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("Outbox item {id} cannot be replayed: {reason}")]
    InvalidPayload { id: String, reason: String },

    #[error("Contact {key} kept changing during reconciliation")]
    Contended { key: String },
}

/// What one outbox drain did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Items confirmed by the server and removed from the outbox.
    pub synced: usize,
    /// Items that failed this round and stay queued with a higher retry count.
    pub failed: usize,
    /// Items that had run out of retries and left the outbox.
    pub abandoned: usize,
    /// Nothing was attempted: another drain was in flight or the device
    /// was offline.
    pub skipped: bool,
}

impl DrainReport {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn attempted(&self) -> usize {
        self.synced + self.failed
    }
}
