//! Collaborator interfaces of the hosted backend.
//!
//! The synchronizer never talks to a wire protocol directly; it goes through
//! these traits. [`LocalBackend`] implements all of them over the embedded
//! SQLite store.

mod local;

pub use local::*;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::db::DbError;
use crate::models::{
    AuthUser, ChangeFilter, Medication, NewPrescription, NewPrescriptionItem, Prescription,
    PrescriptionItem, PrescriptionWithItems, RawChange,
};

/// Errors reported by backend calls.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Query on {table} failed: {message}")]
    Query { table: String, message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] DbError),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Source of the authenticated subject.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The signed-in user, or `None` when signed out.
    async fn current_user(&self) -> BackendResult<Option<AuthUser>>;
}

/// Read access to remote tables.
#[async_trait]
pub trait QueryApi: Send + Sync {
    /// Prescriptions of `patient_id` with nested items and medications,
    /// ordered by `prescribed_at` descending.
    async fn fetch_prescriptions_with_items(
        &self,
        patient_id: &str,
    ) -> BackendResult<Vec<PrescriptionWithItems>>;

    async fn get_prescription(&self, id: &str) -> BackendResult<Option<Prescription>>;

    async fn get_medication(&self, id: &str) -> BackendResult<Option<Medication>>;

    /// Name search over the medication reference table.
    async fn search_medications(&self, query: &str, limit: usize)
        -> BackendResult<Vec<Medication>>;
}

/// Write access to remote tables.
#[async_trait]
pub trait WriteApi: Send + Sync {
    async fn upsert_patient_profile(&self, user_id: &str) -> BackendResult<()>;

    async fn upsert_app_user(&self, user_id: &str, email: Option<&str>) -> BackendResult<()>;

    async fn insert_prescription(&self, new: NewPrescription) -> BackendResult<Prescription>;

    async fn insert_prescription_item(
        &self,
        new: NewPrescriptionItem,
    ) -> BackendResult<PrescriptionItem>;

    /// Set a prescription's status. `None` when no such prescription exists.
    async fn update_prescription_status(
        &self,
        id: &str,
        status: &str,
    ) -> BackendResult<Option<Prescription>>;

    /// Set a prescription's validity window. `None` when no such prescription
    /// exists.
    async fn set_prescription_window(
        &self,
        id: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> BackendResult<Option<Prescription>>;
}

/// Row-level change subscriptions.
pub trait RealtimeApi: Send + Sync {
    /// Open a channel delivering changes that match any of `filters`.
    fn subscribe(&self, channel_key: &str, filters: &[ChangeFilter])
        -> BackendResult<Subscription>;
}

/// Everything the synchronizer needs from a backend.
pub trait Backend: IdentityProvider + QueryApi + WriteApi + RealtimeApi + 'static {}

impl<T> Backend for T where T: IdentityProvider + QueryApi + WriteApi + RealtimeApi + 'static {}

/// An open realtime channel. Dropping it tears the channel down.
pub struct Subscription {
    key: String,
    receiver: mpsc::UnboundedReceiver<RawChange>,
    teardown: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(
        key: String,
        receiver: mpsc::UnboundedReceiver<RawChange>,
        teardown: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            key,
            receiver,
            teardown: Some(Box::new(teardown)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Next change, or `None` once the backend closed the channel.
    pub async fn recv(&mut self) -> Option<RawChange> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("key", &self.key).finish()
    }
}
