//! Errors surfaced to callers of the synchronizer.

use thiserror::Error;

use crate::backend::BackendError;

/// Synchronizer errors.
///
/// Read-path and enrichment failures are absorbed inside the synchronizer;
/// only validation, authentication and terminal write failures reach here.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not signed in: {0}")]
    Auth(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Whether the failure happened before any network call.
    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Validation(_))
    }
}
