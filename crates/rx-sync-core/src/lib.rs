//! Rx Sync Core Library
//!
//! Client-side synchronizer for a patient's medication list. Keeps an
//! in-memory, display-ready list consistent with the backend while three
//! sources race to modify it.
//!
//! # Architecture
//!
//! ```text
//!   bulk fetch ──────────┐
//!   (FetchGateway)       │
//!                        ▼
//!   add medication ──► ReconcilingStore::apply ──► StoreHandle ──► UI
//!   (AddMedicationPipeline)   ▲                    (watch revision)
//!                             │
//!   realtime changes ─────────┘
//!   (ChangeListener, one per subject)
//! ```
//!
//! # Core Principle
//!
//! **Every record ID is held at most once.** Whichever source delivers a
//! record first wins; the others are dropped inside the same reducer call.
//!
//! # Modules
//!
//! - [`backend`]: collaborator traits plus the embedded SQLite backend
//! - [`db`]: SQLite storage behind the embedded backend
//! - [`models`]: domain types (DisplayRecord, Medication, ChangeEvent, etc.)
//! - [`sync`]: fetch gateway, change listener, reconciling store, add pipeline
//! - [`config`] / [`logging`]: runtime settings and tracing setup

pub mod backend;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod sync;

// Re-export commonly used types
pub use backend::{Backend, BackendError, FaultPoint, LocalBackend};
pub use config::SyncConfig;
pub use db::Database;
pub use error::{SyncError, SyncResult};
pub use models::{
    AuthUser, ChangeEvent, DisplayRecord, MedOption, Medication, RecordPatch, StatusGroups,
};
pub use sync::{MergeOp, MergeOutcome, ReconcilingStore, StoreHandle, SyncSession};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

use tokio::runtime::Runtime;

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum RxSyncError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not signed in: {0}")]
    NotSignedIn(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

impl From<SyncError> for RxSyncError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Validation(msg) => RxSyncError::InvalidInput(msg),
            SyncError::Auth(msg) => RxSyncError::NotSignedIn(msg),
            SyncError::Backend(e) => e.into(),
        }
    }
}

impl From<BackendError> for RxSyncError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Network(msg) => RxSyncError::Network(msg),
            BackendError::Auth(msg) => RxSyncError::NotSignedIn(msg),
            other => RxSyncError::Backend(other.to_string()),
        }
    }
}

impl From<db::DbError> for RxSyncError {
    fn from(e: db::DbError) -> Self {
        RxSyncError::DatabaseError(e.to_string())
    }
}

impl From<config::ConfigError> for RxSyncError {
    fn from(e: config::ConfigError) -> Self {
        RxSyncError::ConfigError(e.to_string())
    }
}

impl From<std::io::Error> for RxSyncError {
    fn from(e: std::io::Error) -> Self {
        RxSyncError::RuntimeError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for RxSyncError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        RxSyncError::RuntimeError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a local store at the given path with default settings.
#[uniffi::export]
pub fn open_session(path: String) -> Result<Arc<RxSyncCore>, RxSyncError> {
    RxSyncCore::build(LocalBackend::open(&path)?, SyncConfig::default())
}

/// Open or create a local store with settings given as JSON.
#[uniffi::export]
pub fn open_session_with_config(
    path: String,
    config_json: String,
) -> Result<Arc<RxSyncCore>, RxSyncError> {
    let config = SyncConfig::from_json(&config_json)?;
    RxSyncCore::build(LocalBackend::open(&path)?, config)
}

/// Create an in-memory store (for testing).
#[uniffi::export]
pub fn open_session_in_memory() -> Result<Arc<RxSyncCore>, RxSyncError> {
    RxSyncCore::build(LocalBackend::open_in_memory()?, SyncConfig::default())
}

// =========================================================================
// Main API Object
// =========================================================================

/// Blocking session wrapper for FFI. Owns the runtime the listener runs on.
#[derive(uniffi::Object)]
pub struct RxSyncCore {
    runtime: Runtime,
    backend: Arc<LocalBackend>,
    session: Mutex<SyncSession<LocalBackend>>,
}

impl RxSyncCore {
    fn build(backend: LocalBackend, config: SyncConfig) -> Result<Arc<Self>, RxSyncError> {
        logging::init_tracing(&config);
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()?;
        let backend = Arc::new(backend);
        let session = SyncSession::new(backend.clone(), config);
        Ok(Arc::new(Self {
            runtime,
            backend,
            session: Mutex::new(session),
        }))
    }
}

#[uniffi::export]
impl RxSyncCore {
    // =========================================================================
    // Identity
    // =========================================================================

    /// Sign in locally and load that user's medications.
    pub fn sign_in(&self, user_id: String, email: Option<String>) -> Result<(), RxSyncError> {
        self.backend.sign_in(AuthUser { id: user_id, email });
        let mut session = self.session.lock()?;
        self.runtime.block_on(session.sync_identity())?;
        Ok(())
    }

    /// Sign out and clear the list.
    pub fn sign_out(&self) -> Result<(), RxSyncError> {
        self.backend.sign_out();
        let mut session = self.session.lock()?;
        self.runtime.block_on(session.sync_identity())?;
        Ok(())
    }

    /// Current subject ID, if signed in.
    pub fn subject(&self) -> Result<Option<String>, RxSyncError> {
        let session = self.session.lock()?;
        Ok(session.subject().map(str::to_string))
    }

    // =========================================================================
    // Medication List
    // =========================================================================

    /// Re-fetch the list. Returns the number of records fetched.
    pub fn refresh(&self) -> Result<u32, RxSyncError> {
        let session = self.session.lock()?;
        let count = self.runtime.block_on(session.refresh())?;
        Ok(count as u32)
    }

    /// Records in render order: active first, then the rest.
    pub fn list_medications(&self) -> Result<Vec<FfiDisplayRecord>, RxSyncError> {
        let session = self.session.lock()?;
        Ok(session.ordered().into_iter().map(|r| r.into()).collect())
    }

    /// Revision of the list; changes whenever the list changes.
    pub fn revision(&self) -> Result<u64, RxSyncError> {
        let session = self.session.lock()?;
        Ok(session.store().revision())
    }

    /// Add a medication with directions for the signed-in user.
    pub fn add_medication(
        &self,
        medication_id: Option<String>,
        directions: String,
    ) -> Result<FfiDisplayRecord, RxSyncError> {
        let session = self.session.lock()?;
        let record = self
            .runtime
            .block_on(session.add_medication(medication_id.as_deref(), &directions))?;
        Ok(record.into())
    }

    /// Active records only.
    pub fn list_active(&self) -> Result<Vec<FfiDisplayRecord>, RxSyncError> {
        let session = self.session.lock()?;
        Ok(session.active().into_iter().map(|r| r.into()).collect())
    }

    /// Active records whose window ends soon.
    pub fn list_expiring(&self) -> Result<Vec<FfiDisplayRecord>, RxSyncError> {
        let session = self.session.lock()?;
        Ok(session.expiring().into_iter().map(|r| r.into()).collect())
    }

    // =========================================================================
    // Prescription Lifecycle
    // =========================================================================

    pub fn mark_completed(&self, prescription_id: String) -> Result<(), RxSyncError> {
        let session = self.session.lock()?;
        self.runtime.block_on(session.mark_completed(&prescription_id))?;
        Ok(())
    }

    pub fn mark_expired(&self, prescription_id: String) -> Result<(), RxSyncError> {
        let session = self.session.lock()?;
        self.runtime.block_on(session.mark_expired(&prescription_id))?;
        Ok(())
    }

    pub fn request_refill(&self, prescription_id: String) -> Result<(), RxSyncError> {
        let session = self.session.lock()?;
        self.runtime.block_on(session.request_refill(&prescription_id))?;
        Ok(())
    }

    // =========================================================================
    // Medication Reference
    // =========================================================================

    /// Options for the add-medication picker.
    pub fn search_medications(&self, query: String) -> Result<Vec<FfiMedOption>, RxSyncError> {
        let session = self.session.lock()?;
        let options = self.runtime.block_on(session.search_medications(&query));
        Ok(options.into_iter().map(|o| o.into()).collect())
    }

    /// Add or update a medication reference row.
    pub fn upsert_medication(&self, medication: FfiMedication) -> Result<(), RxSyncError> {
        self.backend.upsert_medication(&medication.into())?;
        Ok(())
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe medication reference row.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMedication {
    pub id: String,
    pub generic_name: Option<String>,
    pub brand_name: Option<String>,
    pub form: Option<String>,
    pub strength_value: Option<f64>,
    pub strength_unit: Option<String>,
    pub atc_code: Option<String>,
}

impl From<Medication> for FfiMedication {
    fn from(med: Medication) -> Self {
        Self {
            id: med.id,
            generic_name: med.generic_name,
            brand_name: med.brand_name,
            form: med.form,
            strength_value: med.strength_value,
            strength_unit: med.strength_unit,
            atc_code: med.atc_code,
        }
    }
}

impl From<FfiMedication> for Medication {
    fn from(med: FfiMedication) -> Self {
        Medication {
            id: med.id,
            generic_name: med.generic_name,
            brand_name: med.brand_name,
            form: med.form,
            strength_value: med.strength_value,
            strength_unit: med.strength_unit,
            atc_code: med.atc_code,
        }
    }
}

/// FFI-safe picker option.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiMedOption {
    pub id: String,
    pub label: String,
    pub sublabel: Option<String>,
}

impl From<MedOption> for FfiMedOption {
    fn from(option: MedOption) -> Self {
        Self {
            id: option.id,
            label: option.label,
            sublabel: option.sublabel,
        }
    }
}

/// FFI-safe medication card.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDisplayRecord {
    pub id: String,
    pub title: String,
    pub dose_label: Option<String>,
    pub medication: Option<FfiMedication>,
    pub directions: Option<String>,
    pub prescription_id: String,
    pub prescribed_at: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: String,
}

impl From<DisplayRecord> for FfiDisplayRecord {
    fn from(record: DisplayRecord) -> Self {
        let title = record.display_name().to_string();
        let dose_label = record.medication.as_ref().and_then(Medication::dose_label);
        Self {
            id: record.id,
            title,
            dose_label,
            medication: record.medication.map(|m| m.into()),
            directions: record.directions,
            prescription_id: record.prescription_id,
            prescribed_at: record.prescribed_at,
            start_date: record.start_date,
            end_date: record.end_date,
            status: record.status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_core() -> Arc<RxSyncCore> {
        let core = open_session_in_memory().unwrap();
        core.upsert_medication(FfiMedication {
            id: "med-1".into(),
            generic_name: Some("Paracetamol".into()),
            brand_name: Some("Panadol".into()),
            form: Some("tablet".into()),
            strength_value: Some(500.0),
            strength_unit: Some("mg".into()),
            atc_code: Some("N02BE01".into()),
        })
        .unwrap();
        core
    }

    #[test]
    fn test_add_requires_sign_in() {
        let core = seeded_core();
        let err = core
            .add_medication(Some("med-1".into()), "daily".into())
            .unwrap_err();
        assert!(matches!(err, RxSyncError::NotSignedIn(_)));
    }

    #[test]
    fn test_sign_in_add_and_list() {
        let core = seeded_core();
        core.sign_in("user-1".into(), Some("p@example.com".into()))
            .unwrap();
        assert_eq!(core.subject().unwrap(), Some("user-1".into()));
        assert!(core.list_medications().unwrap().is_empty());

        let added = core
            .add_medication(Some("med-1".into()), " 1 tablet every 6 hours ".into())
            .unwrap();
        assert_eq!(added.title, "Panadol");
        assert_eq!(added.dose_label, Some("500 mg".into()));
        assert_eq!(added.directions, Some("1 tablet every 6 hours".into()));

        let listed = core.list_medications().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, added.id);
        assert_eq!(core.refresh().unwrap(), 1);
    }

    #[test]
    fn test_validation_maps_to_invalid_input() {
        let core = seeded_core();
        core.sign_in("user-1".into(), None).unwrap();
        let err = core.add_medication(None, "daily".into()).unwrap_err();
        assert!(matches!(err, RxSyncError::InvalidInput(_)));
    }

    #[test]
    fn test_search_and_sign_out() {
        let core = seeded_core();
        let options = core.search_medications("pana".into()).unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].sublabel, Some("ATC: N02BE01".into()));

        core.sign_in("user-1".into(), None).unwrap();
        core.add_medication(Some("med-1".into()), "daily".into())
            .unwrap();
        core.sign_out().unwrap();
        assert!(core.list_medications().unwrap().is_empty());
        assert_eq!(core.subject().unwrap(), None);
    }

    #[test]
    fn test_lifecycle_updates_lists() {
        let core = seeded_core();
        core.sign_in("user-1".into(), None).unwrap();
        let added = core
            .add_medication(Some("med-1".into()), "daily".into())
            .unwrap();
        assert_eq!(core.list_active().unwrap().len(), 1);
        assert!(core.list_expiring().unwrap().is_empty());

        core.request_refill(added.prescription_id.clone()).unwrap();
        assert!(core.list_active().unwrap().is_empty());
        assert_eq!(core.list_medications().unwrap()[0].status, "refill_requested");

        core.mark_completed(added.prescription_id).unwrap();
        assert_eq!(core.list_medications().unwrap()[0].status, "completed");

        let err = core.mark_expired("no-such-rx".into()).unwrap_err();
        assert!(matches!(err, RxSyncError::Backend(_)));
    }

    #[test]
    fn test_bad_config_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rx.db").to_string_lossy().to_string();
        let result = open_session_with_config(path, r#"{"search_limit": 0}"#.into());
        assert!(matches!(result, Err(RxSyncError::ConfigError(_))));
    }
}
