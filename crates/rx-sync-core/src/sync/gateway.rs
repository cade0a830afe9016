//! Bulk fetch of the subject's records.

use std::sync::Arc;

use crate::backend::QueryApi;
use crate::error::SyncResult;
use crate::models::DisplayRecord;

/// Issues the nested prescriptions query and flattens the result.
pub struct FetchGateway<Q: ?Sized> {
    api: Arc<Q>,
}

impl<Q: QueryApi + ?Sized> FetchGateway<Q> {
    pub fn new(api: Arc<Q>) -> Self {
        Self { api }
    }

    /// Every item of every prescription owned by `subject_id`, newest
    /// prescription first. No retry; the caller decides how to degrade.
    pub async fn fetch_all(&self, subject_id: &str) -> SyncResult<Vec<DisplayRecord>> {
        let aggregates = self.api.fetch_prescriptions_with_items(subject_id).await?;
        let records = DisplayRecord::flatten(aggregates);
        tracing::debug!(subject = %subject_id, count = records.len(), "fetched records");
        Ok(records)
    }
}

impl<Q: ?Sized> Clone for FetchGateway<Q> {
    fn clone(&self) -> Self {
        Self {
            api: Arc::clone(&self.api),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FaultPoint, LocalBackend, WriteApi};
    use crate::error::SyncError;
    use crate::models::{Medication, NewPrescription, NewPrescriptionItem};

    async fn seeded() -> Arc<LocalBackend> {
        let backend = Arc::new(LocalBackend::open_in_memory().unwrap());
        backend
            .upsert_medication(&Medication::new("med-1".into(), "Ibuprofen".into()))
            .unwrap();
        backend.upsert_patient_profile("user-1").await.unwrap();
        backend.upsert_patient_profile("user-2").await.unwrap();

        for (user, sig) in [("user-1", "first"), ("user-1", "second"), ("user-2", "theirs")] {
            let rx = backend
                .insert_prescription(NewPrescription {
                    patient_id: user.into(),
                    created_by: user.into(),
                })
                .await
                .unwrap();
            backend
                .insert_prescription_item(NewPrescriptionItem {
                    prescription_id: rx.id,
                    medication_id: "med-1".into(),
                    sig_text: Some(sig.into()),
                })
                .await
                .unwrap();
        }
        backend
    }

    #[tokio::test]
    async fn test_fetch_all_is_scoped_and_newest_first() {
        let backend = seeded().await;
        let gateway = FetchGateway::new(backend);

        let records = gateway.fetch_all("user-1").await.unwrap();
        let directions: Vec<_> = records
            .iter()
            .map(|r| r.directions.clone().unwrap())
            .collect();
        assert_eq!(directions, vec!["second", "first"]);
        assert!(records
            .iter()
            .all(|r| r.medication.as_ref().map(|m| m.id.as_str()) == Some("med-1")));
    }

    #[tokio::test]
    async fn test_fetch_all_surfaces_network_error() {
        let backend = seeded().await;
        backend.inject_fault(FaultPoint::FetchPrescriptions);
        let gateway = FetchGateway::new(backend);

        let result = gateway.fetch_all("user-1").await;
        assert!(matches!(result, Err(SyncError::Backend(_))));
    }

    #[tokio::test]
    async fn test_fetch_all_unknown_subject_is_empty() {
        let gateway = FetchGateway::new(seeded().await);
        assert!(gateway.fetch_all("nobody").await.unwrap().is_empty());
    }
}
