//! Embedded backend: SQLite tables plus in-process change fan-out.
//!
//! Used for offline development and for exercising the synchronizer end to
//! end without the hosted platform. Writes to `prescription_items` publish
//! the same row-level notifications the hosted realtime service would.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use super::{
    BackendError, BackendResult, IdentityProvider, QueryApi, RealtimeApi, Subscription,
    WriteApi,
};
use crate::db::{Database, DbError, DbResult};
use crate::models::{
    AuthUser, ChangeFilter, ChangeKind, Medication, NewPrescription, NewPrescriptionItem,
    Prescription, PrescriptionItem, PrescriptionWithItems, RawChange,
};

/// Schema name reported on published changes.
pub const LOCAL_SCHEMA: &str = "public";

const ITEMS_TABLE: &str = "prescription_items";

/// Backend call that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    CurrentUser,
    FetchPrescriptions,
    GetPrescription,
    GetMedication,
    SearchMedications,
    UpsertPatientProfile,
    UpsertAppUser,
    InsertPrescription,
    InsertPrescriptionItem,
    UpdatePrescriptionStatus,
    SetPrescriptionWindow,
    Subscribe,
}

struct Channel {
    key: String,
    filters: Vec<ChangeFilter>,
    sender: mpsc::UnboundedSender<RawChange>,
}

#[derive(Default)]
struct ChannelRegistry {
    next_id: u64,
    channels: HashMap<u64, Channel>,
}

/// SQLite-backed implementation of every backend trait.
pub struct LocalBackend {
    db: Mutex<Database>,
    user: Mutex<Option<AuthUser>>,
    channels: Arc<Mutex<ChannelRegistry>>,
    faults: Mutex<HashSet<FaultPoint>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn query_error(table: &str) -> impl FnOnce(DbError) -> BackendError + '_ {
    move |e| match e {
        DbError::Constraint(message) | DbError::NotFound(message) => BackendError::Query {
            table: table.to_string(),
            message,
        },
        other => BackendError::Storage(other),
    }
}

impl LocalBackend {
    pub fn new(db: Database) -> Self {
        Self {
            db: Mutex::new(db),
            user: Mutex::new(None),
            channels: Arc::new(Mutex::new(ChannelRegistry::default())),
            faults: Mutex::new(HashSet::new()),
        }
    }

    /// Open a file-backed store.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Ok(Self::new(Database::open(path)?))
    }

    /// Create an in-memory store.
    pub fn open_in_memory() -> DbResult<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Set the authenticated user.
    pub fn sign_in(&self, user: AuthUser) {
        tracing::info!(user_id = %user.id, "local sign-in");
        *lock(&self.user) = Some(user);
    }

    pub fn sign_out(&self) {
        *lock(&self.user) = None;
    }

    /// Make the next call at `point` fail with a network error.
    pub fn inject_fault(&self, point: FaultPoint) {
        lock(&self.faults).insert(point);
    }

    fn check_fault(&self, point: FaultPoint) -> BackendResult<()> {
        if lock(&self.faults).remove(&point) {
            return Err(BackendError::Network(format!("injected fault at {:?}", point)));
        }
        Ok(())
    }

    /// Run a closure against the database.
    pub fn with_db<T>(&self, f: impl FnOnce(&Database) -> DbResult<T>) -> DbResult<T> {
        let db = lock(&self.db);
        f(&db)
    }

    /// Insert or update a medication reference row.
    pub fn upsert_medication(&self, med: &Medication) -> DbResult<()> {
        self.with_db(|db| db.upsert_medication(med))
    }

    /// Replace an item's directions and publish an update notification.
    pub fn update_item_directions(
        &self,
        id: &str,
        sig_text: Option<&str>,
    ) -> DbResult<PrescriptionItem> {
        let item = self.with_db(|db| db.update_item_directions(id, sig_text))?;
        self.publish(RawChange {
            kind: ChangeKind::Update,
            schema: LOCAL_SCHEMA.to_string(),
            table: ITEMS_TABLE.to_string(),
            new: Some(serde_json::to_value(&item)?),
            old: Some(json!({ "id": item.id })),
        });
        Ok(item)
    }

    /// Delete an item and publish a delete notification.
    pub fn delete_prescription_item(&self, id: &str) -> DbResult<bool> {
        let deleted = self.with_db(|db| db.delete_prescription_item(id))?;
        let Some(item) = deleted else {
            return Ok(false);
        };
        self.publish(RawChange {
            kind: ChangeKind::Delete,
            schema: LOCAL_SCHEMA.to_string(),
            table: ITEMS_TABLE.to_string(),
            new: None,
            old: Some(json!({ "id": item.id })),
        });
        Ok(true)
    }

    /// Deliver a change to every channel with a matching filter.
    pub fn publish(&self, change: RawChange) {
        let mut registry = lock(self.channels.as_ref());
        let mut closed = Vec::new();

        for (id, channel) in &registry.channels {
            if !channel.filters.iter().any(|f| f.matches(&change)) {
                continue;
            }
            if channel.sender.send(change.clone()).is_err() {
                closed.push(*id);
            }
        }

        for id in closed {
            if let Some(channel) = registry.channels.remove(&id) {
                tracing::debug!(channel = %channel.key, "dropping closed channel");
            }
        }
    }

    /// Number of open realtime channels.
    pub fn channel_count(&self) -> usize {
        lock(self.channels.as_ref()).channels.len()
    }

    /// Keys of open realtime channels.
    pub fn channel_keys(&self) -> Vec<String> {
        let registry = lock(self.channels.as_ref());
        let mut keys: Vec<_> = registry.channels.values().map(|c| c.key.clone()).collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl IdentityProvider for LocalBackend {
    async fn current_user(&self) -> BackendResult<Option<AuthUser>> {
        self.check_fault(FaultPoint::CurrentUser)?;
        Ok(lock(&self.user).clone())
    }
}

#[async_trait]
impl QueryApi for LocalBackend {
    async fn fetch_prescriptions_with_items(
        &self,
        patient_id: &str,
    ) -> BackendResult<Vec<PrescriptionWithItems>> {
        self.check_fault(FaultPoint::FetchPrescriptions)?;
        self.with_db(|db| db.list_prescriptions_with_items(patient_id))
            .map_err(query_error("prescriptions"))
    }

    async fn get_prescription(&self, id: &str) -> BackendResult<Option<Prescription>> {
        self.check_fault(FaultPoint::GetPrescription)?;
        self.with_db(|db| db.get_prescription(id))
            .map_err(query_error("prescriptions"))
    }

    async fn get_medication(&self, id: &str) -> BackendResult<Option<Medication>> {
        self.check_fault(FaultPoint::GetMedication)?;
        self.with_db(|db| db.get_medication(id))
            .map_err(query_error("medications"))
    }

    async fn search_medications(
        &self,
        query: &str,
        limit: usize,
    ) -> BackendResult<Vec<Medication>> {
        self.check_fault(FaultPoint::SearchMedications)?;
        self.with_db(|db| db.search_medications(query, limit))
            .map_err(query_error("medications"))
    }
}

#[async_trait]
impl WriteApi for LocalBackend {
    async fn upsert_patient_profile(&self, user_id: &str) -> BackendResult<()> {
        self.check_fault(FaultPoint::UpsertPatientProfile)?;
        self.with_db(|db| db.upsert_patient_profile(user_id))
            .map_err(query_error("patient_profiles"))
    }

    async fn upsert_app_user(&self, user_id: &str, email: Option<&str>) -> BackendResult<()> {
        self.check_fault(FaultPoint::UpsertAppUser)?;
        self.with_db(|db| db.upsert_app_user(user_id, email))
            .map_err(query_error("users"))
    }

    async fn insert_prescription(&self, new: NewPrescription) -> BackendResult<Prescription> {
        self.check_fault(FaultPoint::InsertPrescription)?;
        self.with_db(|db| db.insert_prescription(&new))
            .map_err(query_error("prescriptions"))
    }

    async fn insert_prescription_item(
        &self,
        new: NewPrescriptionItem,
    ) -> BackendResult<PrescriptionItem> {
        self.check_fault(FaultPoint::InsertPrescriptionItem)?;
        let item = self
            .with_db(|db| db.insert_prescription_item(&new))
            .map_err(query_error(ITEMS_TABLE))?;

        self.publish(RawChange {
            kind: ChangeKind::Insert,
            schema: LOCAL_SCHEMA.to_string(),
            table: ITEMS_TABLE.to_string(),
            new: Some(serde_json::to_value(&item).map_err(DbError::from)?),
            old: None,
        });
        Ok(item)
    }

    async fn update_prescription_status(
        &self,
        id: &str,
        status: &str,
    ) -> BackendResult<Option<Prescription>> {
        self.check_fault(FaultPoint::UpdatePrescriptionStatus)?;
        self.with_db(|db| {
            if !db.update_prescription_status(id, status)? {
                return Ok(None);
            }
            db.get_prescription(id)
        })
        .map_err(query_error("prescriptions"))
    }

    async fn set_prescription_window(
        &self,
        id: &str,
        start_date: Option<&str>,
        end_date: Option<&str>,
    ) -> BackendResult<Option<Prescription>> {
        self.check_fault(FaultPoint::SetPrescriptionWindow)?;
        self.with_db(|db| {
            if !db.set_prescription_window(id, start_date, end_date)? {
                return Ok(None);
            }
            db.get_prescription(id)
        })
        .map_err(query_error("prescriptions"))
    }
}

impl RealtimeApi for LocalBackend {
    fn subscribe(
        &self,
        channel_key: &str,
        filters: &[ChangeFilter],
    ) -> BackendResult<Subscription> {
        self.check_fault(FaultPoint::Subscribe)?;

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = {
            let mut registry = lock(self.channels.as_ref());
            let id = registry.next_id;
            registry.next_id += 1;
            registry.channels.insert(
                id,
                Channel {
                    key: channel_key.to_string(),
                    filters: filters.to_vec(),
                    sender,
                },
            );
            id
        };
        tracing::debug!(channel = %channel_key, "channel opened");

        let registry = Arc::downgrade(&self.channels);
        let key = channel_key.to_string();
        Ok(Subscription::new(key.clone(), receiver, move || {
            if let Some(registry) = registry.upgrade() {
                lock(registry.as_ref()).channels.remove(&id);
                tracing::debug!(channel = %key, "channel removed");
            }
        }))
    }
}
