//! Realtime change listener.
//!
//! Turns raw row notifications on the item table into [`ChangeEvent`]s and
//! feeds them to the store. Every failure here is absorbed: the event is
//! dropped and logged, nothing propagates to the caller.

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::{MergeOp, MergeOutcome, StoreHandle};
use crate::backend::{QueryApi, Subscription};
use crate::config::SyncConfig;
use crate::models::{
    ChangeEvent, ChangeFilter, ChangeKind, DisplayRecord, PrescriptionItem, RawChange,
    RecordPatch,
};

/// Why a change notification did not reach the store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DropReason {
    #[error("record {0} already present")]
    AlreadyKnown(String),

    #[error("prescription {0} not found")]
    ParentMissing(String),

    #[error("prescription lookup failed: {0}")]
    ParentLookup(String),

    #[error("prescription owned by {0}")]
    ForeignOwner(String),

    #[error("medication lookup failed: {0}")]
    Enrichment(String),

    #[error("malformed row image: {0}")]
    Malformed(String),

    #[error("change on unwatched table {schema}.{table}")]
    UnwatchedTable { schema: String, table: String },
}

impl DropReason {
    /// Drops that are part of normal operation rather than anomalies.
    pub fn is_expected(&self) -> bool {
        matches!(self, DropReason::AlreadyKnown(_) | DropReason::ForeignOwner(_))
    }
}

/// Normalizes change notifications for one subject.
pub struct ChangeListener<Q: ?Sized> {
    api: Arc<Q>,
    store: StoreHandle,
    subject_id: String,
    schema: String,
    table: String,
}

impl<Q: QueryApi + ?Sized> ChangeListener<Q> {
    pub fn new(api: Arc<Q>, store: StoreHandle, subject_id: &str, config: &SyncConfig) -> Self {
        Self {
            api,
            store,
            subject_id: subject_id.to_string(),
            schema: config.schema.clone(),
            table: config.items_table.clone(),
        }
    }

    /// Filters to subscribe with: every event kind on the item table.
    pub fn filters(&self) -> Vec<ChangeFilter> {
        ChangeFilter::all_for_table(&self.schema, &self.table)
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    /// Convert a raw notification into a store-ready event.
    pub async fn normalize(&self, raw: RawChange) -> Result<ChangeEvent, DropReason> {
        if raw.schema != self.schema || raw.table != self.table {
            return Err(DropReason::UnwatchedTable {
                schema: raw.schema,
                table: raw.table,
            });
        }

        match raw.kind {
            ChangeKind::Insert => self.normalize_insert(raw.new).await,
            ChangeKind::Update => normalize_update(raw.new),
            ChangeKind::Delete => {
                let id = row_id(raw.old.as_ref())?;
                Ok(ChangeEvent::Delete { id })
            }
        }
    }

    async fn normalize_insert(&self, image: Option<Value>) -> Result<ChangeEvent, DropReason> {
        let image = image.ok_or_else(|| DropReason::Malformed("insert without new row".into()))?;
        let item: PrescriptionItem =
            serde_json::from_value(image).map_err(|e| DropReason::Malformed(e.to_string()))?;

        // Cheap early exit; the store re-checks under its lock.
        if self.store.contains(&item.id) {
            return Err(DropReason::AlreadyKnown(item.id));
        }

        let prescription = self
            .api
            .get_prescription(&item.prescription_id)
            .await
            .map_err(|e| DropReason::ParentLookup(e.to_string()))?
            .ok_or_else(|| DropReason::ParentMissing(item.prescription_id.clone()))?;

        if prescription.patient_id != self.subject_id {
            return Err(DropReason::ForeignOwner(prescription.patient_id));
        }

        let medication = self
            .api
            .get_medication(&item.medication_id)
            .await
            .map_err(|e| DropReason::Enrichment(e.to_string()))?;

        Ok(ChangeEvent::Insert(DisplayRecord::from_parts(
            item.id,
            item.sig_text,
            medication,
            &prescription,
        )))
    }

    /// Normalize and apply one notification. `None` means it was dropped.
    pub async fn handle(&self, raw: RawChange) -> Option<MergeOutcome> {
        let kind = raw.kind;
        let event = match self.normalize(raw).await {
            Ok(event) => event,
            Err(reason) if reason.is_expected() => {
                tracing::debug!(?kind, %reason, "change dropped");
                return None;
            }
            Err(reason) => {
                tracing::warn!(?kind, %reason, "change dropped");
                return None;
            }
        };

        let id = event.id().to_string();
        let outcome = self.store.apply(MergeOp::from(event));
        match outcome {
            MergeOutcome::Applied => tracing::debug!(?kind, id = %id, "change applied"),
            other => tracing::debug!(?kind, id = %id, outcome = ?other, "change ignored"),
        }
        Some(outcome)
    }

    /// Process notifications sequentially until the channel closes.
    pub async fn run(self, mut subscription: Subscription) {
        tracing::info!(channel = %subscription.key(), subject = %self.subject_id, "listening");
        while let Some(raw) = subscription.recv().await {
            self.handle(raw).await;
        }
        tracing::info!(channel = %subscription.key(), "channel closed");
    }
}

fn row_id(image: Option<&Value>) -> Result<String, DropReason> {
    image
        .and_then(|row| row.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DropReason::Malformed("row image without id".into()))
}

fn normalize_update(image: Option<Value>) -> Result<ChangeEvent, DropReason> {
    let id = row_id(image.as_ref())?;

    let directions = match image.as_ref().and_then(|row| row.get("sig_text")) {
        None => None,
        Some(Value::Null) => Some(None),
        Some(Value::String(text)) => Some(Some(text.clone())),
        Some(other) => {
            return Err(DropReason::Malformed(format!("sig_text is {}", other)));
        }
    };

    Ok(ChangeEvent::Update {
        id,
        patch: RecordPatch { directions },
    })
}
