//! Per-subject synchronization session.
//!
//! Owns the store, the fetch gateway, the add pipeline and at most one live
//! realtime subscription. The subscription is scoped to the subject: changing
//! subject tears it down before anything of the new subject is loaded.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tokio::task::JoinHandle;

use super::{
    AddMedicationPipeline, ChangeListener, FetchGateway, MergeOp, MergeOutcome, StoreHandle,
};
use crate::backend::{Backend, BackendError};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{
    DisplayRecord, MedOption, Prescription, StatusGroups, COMPLETED_STATUS, EXPIRED_STATUS,
    REFILL_REQUESTED_STATUS,
};

/// A running listener bound to one subject.
///
/// Dropping the scope aborts the listener task; the task owns the
/// [`crate::backend::Subscription`], whose drop tears down the channel.
#[derive(Debug)]
pub struct SubscriptionScope {
    subject_id: String,
    channel_key: String,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionScope {
    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn channel_key(&self) -> &str {
        &self.channel_key
    }

    /// Abort the listener and wait until its subscription is released.
    pub async fn close(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // Resolves once the task's future, and its subscription, are dropped.
            let _ = task.await;
        }
        tracing::info!(channel = %self.channel_key, "subscription closed");
    }
}

impl Drop for SubscriptionScope {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Keeps the medication list of the current subject in sync with the backend.
pub struct SyncSession<B: Backend + ?Sized> {
    backend: Arc<B>,
    config: SyncConfig,
    store: StoreHandle,
    gateway: FetchGateway<B>,
    pipeline: AddMedicationPipeline<B>,
    subject: Option<String>,
    scope: Option<SubscriptionScope>,
}

impl<B: Backend + ?Sized> SyncSession<B> {
    pub fn new(backend: Arc<B>, config: SyncConfig) -> Self {
        let store = StoreHandle::new(&config.active_status);
        Self {
            gateway: FetchGateway::new(backend.clone()),
            pipeline: AddMedicationPipeline::new(backend.clone(), store.clone()),
            backend,
            config,
            store,
            subject: None,
            scope: None,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Current subject, if any.
    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Whether a realtime listener is running.
    pub fn is_listening(&self) -> bool {
        self.scope.is_some()
    }

    /// Follow the identity provider: bind the session to the signed-in user,
    /// or unbind it when signed out. Returns the resulting subject.
    pub async fn sync_identity(&mut self) -> SyncResult<Option<String>> {
        let user = self.backend.current_user().await?;
        self.set_subject(user.map(|u| u.id)).await?;
        Ok(self.subject.clone())
    }

    /// Switch to `subject`.
    ///
    /// Setting the same subject again is a no-op. Otherwise the previous
    /// subscription is closed and the store emptied, then the new subject is
    /// subscribed to and fetched. A failed subscribe leaves the session
    /// without realtime updates; a failed fetch is returned after the store
    /// has been set to empty.
    pub async fn set_subject(&mut self, subject: Option<String>) -> SyncResult<()> {
        if self.subject == subject {
            return Ok(());
        }

        if let Some(scope) = self.scope.take() {
            scope.close().await;
        }
        self.clear_store();
        self.subject = subject;

        let Some(subject_id) = self.subject.clone() else {
            tracing::info!("subject cleared");
            return Ok(());
        };

        tracing::info!(subject = %subject_id, "subject set");
        self.scope = self.open_scope(&subject_id);
        self.refresh().await.map(|_| ())
    }

    fn open_scope(&self, subject_id: &str) -> Option<SubscriptionScope> {
        let listener = ChangeListener::new(
            self.backend.clone(),
            self.store.clone(),
            subject_id,
            &self.config,
        );
        let channel_key = self.config.channel_key(subject_id);

        let subscription = match self.backend.subscribe(&channel_key, &listener.filters()) {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::warn!(channel = %channel_key, error = %e, "subscribe failed");
                return None;
            }
        };

        let task = tokio::spawn(listener.run(subscription));
        Some(SubscriptionScope {
            subject_id: subject_id.to_string(),
            channel_key,
            task: Some(task),
        })
    }

    /// Reset the store to empty under a fresh token, so any fetch still in
    /// flight for the previous subject lands as stale.
    fn clear_store(&self) {
        let token = self.store.begin_fetch();
        self.store.apply(MergeOp::ReplaceAll {
            token,
            records: Vec::new(),
        });
    }

    /// Re-fetch the subject's records and replace the collection.
    ///
    /// On failure the collection becomes empty and the error is returned.
    /// A reply overtaken by a later refresh is discarded. Returns the number
    /// of records fetched.
    pub async fn refresh(&self) -> SyncResult<usize> {
        let Some(subject_id) = self.subject.as_deref() else {
            self.clear_store();
            return Ok(0);
        };

        let token = self.store.begin_fetch();
        match self.gateway.fetch_all(subject_id).await {
            Ok(records) => {
                let count = records.len();
                match self.store.apply(MergeOp::ReplaceAll { token, records }) {
                    MergeOutcome::Stale => {
                        tracing::debug!(token = token.value(), "stale fetch discarded")
                    }
                    _ => tracing::info!(subject = %subject_id, count, "records refreshed"),
                }
                Ok(count)
            }
            Err(e) => {
                tracing::warn!(subject = %subject_id, error = %e, "fetch failed, showing empty list");
                self.store.apply(MergeOp::ReplaceAll {
                    token,
                    records: Vec::new(),
                });
                Err(e)
            }
        }
    }

    /// Add a medication for the current subject, who must be the signed-in
    /// user.
    pub async fn add_medication(
        &self,
        medication_id: Option<&str>,
        directions: &str,
    ) -> SyncResult<DisplayRecord> {
        self.pipeline
            .add_record(self.subject(), medication_id, directions)
            .await
    }

    /// Mark a prescription's course as finished, then refresh.
    pub async fn mark_completed(&self, prescription_id: &str) -> SyncResult<Prescription> {
        self.set_status(prescription_id, COMPLETED_STATUS).await
    }

    /// Mark a prescription as run out, then refresh.
    pub async fn mark_expired(&self, prescription_id: &str) -> SyncResult<Prescription> {
        self.set_status(prescription_id, EXPIRED_STATUS).await
    }

    /// Ask for a prescription to be renewed, then refresh.
    pub async fn request_refill(&self, prescription_id: &str) -> SyncResult<Prescription> {
        self.set_status(prescription_id, REFILL_REQUESTED_STATUS).await
    }

    /// Change a prescription's validity window, then refresh.
    pub async fn set_window(
        &self,
        prescription_id: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> SyncResult<Prescription> {
        self.ensure_owned(prescription_id).await?;
        let updated = self
            .backend
            .set_prescription_window(prescription_id, start_date, end_date)
            .await?
            .ok_or_else(|| prescription_not_found(prescription_id))?;
        self.refresh().await?;
        Ok(updated)
    }

    async fn set_status(&self, prescription_id: &str, status: &str) -> SyncResult<Prescription> {
        self.ensure_owned(prescription_id).await?;
        let updated = self
            .backend
            .update_prescription_status(prescription_id, status)
            .await?
            .ok_or_else(|| prescription_not_found(prescription_id))?;
        tracing::info!(prescription_id = %prescription_id, status = %status, "status changed");

        // Status lives on the prescription, which sends no item notification.
        self.refresh().await?;
        Ok(updated)
    }

    /// Only the subject's own prescriptions may be changed.
    async fn ensure_owned(&self, prescription_id: &str) -> SyncResult<()> {
        let subject = self
            .subject()
            .ok_or_else(|| SyncError::Auth("no subject bound".into()))?;
        let prescription = self
            .backend
            .get_prescription(prescription_id)
            .await?
            .ok_or_else(|| prescription_not_found(prescription_id))?;
        if prescription.patient_id != subject {
            return Err(SyncError::Auth(format!(
                "prescription {} does not belong to {}",
                prescription_id, subject
            )));
        }
        Ok(())
    }

    /// Picker options matching `query`. Lookup failures yield no options.
    pub async fn search_medications(&self, query: &str) -> Vec<MedOption> {
        match self
            .backend
            .search_medications(query, self.config.search_limit)
            .await
        {
            Ok(medications) => medications.iter().map(MedOption::from).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "medication search failed");
                Vec::new()
            }
        }
    }

    pub fn grouped(&self) -> StatusGroups {
        self.store.grouped()
    }

    pub fn ordered(&self) -> Vec<DisplayRecord> {
        self.store.ordered()
    }

    /// Active records in collection order.
    pub fn active(&self) -> Vec<DisplayRecord> {
        self.store.grouped().active
    }

    /// Active records whose window ends within the configured number of days.
    pub fn expiring(&self) -> Vec<DisplayRecord> {
        self.expiring_on(Utc::now().date_naive())
    }

    /// [`Self::expiring`] as seen on `today`.
    pub fn expiring_on(&self, today: NaiveDate) -> Vec<DisplayRecord> {
        let days = self.config.expiring_within_days;
        self.active()
            .into_iter()
            .filter(|record| record.expires_within(today, days))
            .collect()
    }

    /// Close the subscription, if any, and wait for its teardown.
    pub async fn shutdown(&mut self) {
        if let Some(scope) = self.scope.take() {
            scope.close().await;
        }
    }
}

fn prescription_not_found(id: &str) -> BackendError {
    BackendError::Query {
        table: "prescriptions".into(),
        message: format!("prescription {} not found", id),
    }
}
