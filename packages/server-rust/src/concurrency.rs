//! Optimistic concurrency coordinator.
//!
//! Turns a record the caller read earlier into a single version-checked write.
//! No lock is held between the caller's read and this write; the storage
//! layer's atomic conditional update is the only arbiter of the current version.

use std::sync::Arc;

use bulwark_core::{RecordId, Version, VersionedRecord};
use tracing::debug;

use crate::traits::{ConditionalWrite, VersionedStore};

/// Why a conditional write did not apply.
#[derive(Debug, thiserror::Error)]
pub enum OccError {
    /// Another writer advanced the record past the version the caller saw.
    #[error("edit conflict on record {id}: expected version {expected} is stale")]
    EditConflict { id: RecordId, expected: Version },
    /// The record does not exist.
    #[error("record {id} not found")]
    NotFound { id: RecordId },
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Executes version-checked writes and classifies their outcome.
///
/// Never retries: on [`OccError::EditConflict`] the caller decides whether to
/// re-read and try again.
pub struct OccCoordinator<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for OccCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: VersionedStore + ?Sized> OccCoordinator<S> {
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Writes `record`'s fields if the stored version still equals
    /// `record.version()`, returning the new version.
    ///
    /// # Errors
    ///
    /// [`OccError::EditConflict`] if the stored version moved on,
    /// [`OccError::NotFound`] if no such record exists, and
    /// [`OccError::Storage`] if the store itself failed.
    pub async fn update<R>(&self, record: &R) -> Result<Version, OccError>
    where
        R: VersionedRecord<Fields = S::Fields> + Sync,
    {
        let id = record.id();
        let expected = record.version();

        match self
            .store
            .conditional_update(id, expected, record.fields())
            .await?
        {
            ConditionalWrite::Applied(version) => {
                debug!(id, version, "conditional write applied");
                Ok(version)
            }
            ConditionalWrite::VersionMismatch => {
                debug!(id, expected, "conditional write rejected: stale version");
                Err(OccError::EditConflict { id, expected })
            }
            ConditionalWrite::NotFound => Err(OccError::NotFound { id }),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}
