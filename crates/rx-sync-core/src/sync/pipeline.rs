//! Optimistic add-medication pipeline.

use std::sync::Arc;

use super::{MergeOp, MergeOutcome, StoreHandle};
use crate::backend::{BackendError, IdentityProvider, QueryApi, WriteApi};
use crate::error::{SyncError, SyncResult};
use crate::models::{DisplayRecord, NewPrescription, NewPrescriptionItem};

/// Validated input of an add request.
#[derive(Debug, Clone, PartialEq)]
pub struct AddRequest {
    pub medication_id: String,
    pub directions: String,
}

impl AddRequest {
    /// Trim and check the raw form input. Makes no backend call.
    pub fn validate(medication_id: Option<&str>, directions: &str) -> SyncResult<Self> {
        let medication_id = medication_id.map(str::trim).unwrap_or_default();
        if medication_id.is_empty() {
            return Err(SyncError::Validation("Select a medication".into()));
        }

        let directions = directions.trim();
        if directions.is_empty() {
            return Err(SyncError::Validation("Enter directions for use".into()));
        }

        Ok(Self {
            medication_id: medication_id.to_string(),
            directions: directions.to_string(),
        })
    }
}

/// Writes a new prescription with one item, then inserts the resulting
/// record into the store without waiting for the change notification.
pub struct AddMedicationPipeline<B: ?Sized> {
    backend: Arc<B>,
    store: StoreHandle,
}

impl<B> AddMedicationPipeline<B>
where
    B: IdentityProvider + QueryApi + WriteApi + ?Sized,
{
    pub fn new(backend: Arc<B>, store: StoreHandle) -> Self {
        Self { backend, store }
    }

    /// Run the whole pipeline for the store's `subject`. Any failure leaves
    /// the store untouched.
    ///
    /// The signed-in user must be the subject: a record owned by anyone else
    /// never enters the store, and nothing is written remotely in that case.
    pub async fn add_record(
        &self,
        subject: Option<&str>,
        medication_id: Option<&str>,
        directions: &str,
    ) -> SyncResult<DisplayRecord> {
        let request = AddRequest::validate(medication_id, directions)?;
        let subject = subject.ok_or_else(|| SyncError::Auth("no subject bound".into()))?;

        let user = self
            .backend
            .current_user()
            .await?
            .ok_or_else(|| SyncError::Auth("no authenticated user".into()))?;
        if user.id != subject {
            return Err(SyncError::Auth(format!(
                "signed in as {} but showing {}",
                user.id, subject
            )));
        }

        self.backend.upsert_patient_profile(&user.id).await?;
        self.backend
            .upsert_app_user(&user.id, user.email.as_deref())
            .await?;

        let prescription = self
            .backend
            .insert_prescription(NewPrescription {
                patient_id: user.id.clone(),
                created_by: user.id.clone(),
            })
            .await?;

        let item = match self
            .backend
            .insert_prescription_item(NewPrescriptionItem {
                prescription_id: prescription.id.clone(),
                medication_id: request.medication_id.clone(),
                sig_text: Some(request.directions.clone()),
            })
            .await
        {
            Ok(item) => item,
            Err(e) => {
                tracing::warn!(
                    prescription_id = %prescription.id,
                    error = %e,
                    "item insert failed, prescription left without items"
                );
                return Err(e.into());
            }
        };

        let medication = self
            .backend
            .get_medication(&item.medication_id)
            .await?
            .ok_or_else(|| BackendError::Query {
                table: "medications".into(),
                message: format!("medication {} not found", item.medication_id),
            })?;

        let record = DisplayRecord::from_parts(
            item.id,
            item.sig_text,
            Some(medication),
            &prescription,
        );

        match self.store.apply(MergeOp::Insert(record.clone())) {
            MergeOutcome::Applied => {
                tracing::info!(id = %record.id, "medication added");
            }
            outcome => {
                // The change notification won the race.
                tracing::debug!(id = %record.id, ?outcome, "record already present");
            }
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FaultPoint, LocalBackend};
    use crate::models::{AuthUser, Medication};

    const SUBJECT: Option<&str> = Some("user-1");

    fn setup() -> (Arc<LocalBackend>, StoreHandle, AddMedicationPipeline<LocalBackend>) {
        let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
        let mut med = Medication::new("med-1".into(), "Atorvastatin".into());
        med.brand_name = Some("Lipitor".into());
        backend.upsert_medication(&med).unwrap();
        backend.sign_in(AuthUser {
            id: "user-1".into(),
            email: Some("patient@example.com".into()),
        });

        let store = StoreHandle::default();
        let pipeline = AddMedicationPipeline::new(backend.clone(), store.clone());
        (backend, store, pipeline)
    }

    #[test]
    fn test_validation_trims_and_rejects_blank() {
        let request = AddRequest::validate(Some(" med-1 "), "  1 tablet nightly ").unwrap();
        assert_eq!(request.medication_id, "med-1");
        assert_eq!(request.directions, "1 tablet nightly");

        assert!(AddRequest::validate(None, "x").unwrap_err().is_validation());
        assert!(AddRequest::validate(Some("  "), "x").unwrap_err().is_validation());
        assert!(AddRequest::validate(Some("med-1"), " \t ").unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn test_add_record_applies_to_store() {
        let (backend, store, pipeline) = setup();

        let record = pipeline
            .add_record(SUBJECT, Some("med-1"), "  1 tablet nightly ")
            .await
            .unwrap();

        assert_eq!(record.directions, Some("1 tablet nightly".into()));
        assert_eq!(record.status, "active");
        assert_eq!(record.display_name(), "Lipitor");
        assert!(store.contains(&record.id));

        let rx = backend
            .get_prescription(&record.prescription_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.patient_id, "user-1");
        assert!(backend
            .with_db(|db| db.has_patient_profile("user-1"))
            .unwrap());
    }

    #[tokio::test]
    async fn test_validation_makes_no_backend_call() {
        let (backend, store, pipeline) = setup();
        // Would fail the identity lookup if the pipeline reached it.
        backend.inject_fault(FaultPoint::CurrentUser);

        let err = pipeline.add_record(SUBJECT, Some("med-1"), "   ").await.unwrap_err();
        assert!(err.is_validation());
        assert!(store.is_empty());

        assert!(backend.current_user().await.is_err());
    }

    #[tokio::test]
    async fn test_signed_out_is_auth_error() {
        let (backend, store, pipeline) = setup();
        backend.sign_out();

        let err = pipeline.add_record(SUBJECT, Some("med-1"), "daily").await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_mid_pipeline_failure_leaves_store_untouched() {
        for point in [
            FaultPoint::UpsertPatientProfile,
            FaultPoint::UpsertAppUser,
            FaultPoint::InsertPrescription,
            FaultPoint::InsertPrescriptionItem,
            FaultPoint::GetMedication,
        ] {
            let (backend, store, pipeline) = setup();
            backend.inject_fault(point);

            let result = pipeline.add_record(SUBJECT, Some("med-1"), "daily").await;
            assert!(
                matches!(result, Err(SyncError::Backend(BackendError::Network(_)))),
                "{:?} should abort",
                point
            );
            assert!(store.is_empty(), "{:?} touched the store", point);
        }
    }

    #[tokio::test]
    async fn test_unknown_medication_aborts() {
        let (_backend, store, pipeline) = setup();
        let result = pipeline.add_record(SUBJECT, Some("med-404"), "daily").await;
        assert!(matches!(result, Err(SyncError::Backend(_))));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_record_already_delivered_is_not_duplicated() {
        let (_backend, store, pipeline) = setup();
        let record = pipeline.add_record(SUBJECT, Some("med-1"), "daily").await.unwrap();

        assert_eq!(
            store.apply(MergeOp::Insert(record.clone())),
            MergeOutcome::Duplicate
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_no_subject_is_auth_error_before_any_write() {
        let (backend, store, pipeline) = setup();

        let err = pipeline.add_record(None, Some("med-1"), "daily").await.unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
        assert!(store.is_empty());
        assert!(!backend
            .with_db(|db| db.has_patient_profile("user-1"))
            .unwrap());
    }

    #[tokio::test]
    async fn test_user_other_than_subject_is_rejected() {
        let (backend, store, pipeline) = setup();

        let err = pipeline
            .add_record(Some("user-2"), Some("med-1"), "daily")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Auth(_)));
        assert!(store.is_empty());

        // Nothing was written for either user.
        assert!(!backend
            .with_db(|db| db.has_patient_profile("user-1"))
            .unwrap());
        assert!(backend
            .fetch_prescriptions_with_items("user-1")
            .await
            .unwrap()
            .is_empty());
    }
}
