//! The reconciling store: one serialized reducer over (collection, identity set).
//!
//! Bulk fetches, optimistic inserts and pushed change events all become a
//! [`MergeOp`] applied by [`ReconcilingStore::apply`]. The duplicate check and
//! the identity update happen inside that single call, so no suspension point
//! can separate them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use super::IdentityTracker;
use crate::models::{ChangeEvent, DisplayRecord, RecordPatch, StatusGroups, ACTIVE_STATUS};

/// Tag of a bulk fetch. Later fetches carry larger tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FetchToken(u64);

impl FetchToken {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A merge request submitted to the reducer.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOp {
    /// Swap the whole collection with a fetch result.
    ReplaceAll {
        token: FetchToken,
        records: Vec<DisplayRecord>,
    },
    /// Prepend a record unless its ID is already present.
    Insert(DisplayRecord),
    /// Patch fields of a present record in place.
    Patch { id: String, patch: RecordPatch },
    /// Drop a record.
    Remove { id: String },
}

impl From<ChangeEvent> for MergeOp {
    fn from(event: ChangeEvent) -> Self {
        match event {
            ChangeEvent::Insert(record) => MergeOp::Insert(record),
            ChangeEvent::Update { id, patch } => MergeOp::Patch { id, patch },
            ChangeEvent::Delete { id } => MergeOp::Remove { id },
        }
    }
}

/// What the reducer did with an op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Applied,
    /// Insert for an ID that is already present; first writer wins.
    Duplicate,
    /// Patch or remove for an ID that is not present.
    Missing,
    /// Fetch result older than one already applied.
    Stale,
}

impl MergeOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, MergeOutcome::Applied)
    }
}

/// In-memory ordered collection of display records.
#[derive(Debug, Clone)]
pub struct ReconcilingStore {
    records: Vec<DisplayRecord>,
    identity: IdentityTracker,
    active_status: String,
    issued: u64,
    applied: Option<FetchToken>,
}

impl Default for ReconcilingStore {
    fn default() -> Self {
        Self::new(ACTIVE_STATUS)
    }
}

impl ReconcilingStore {
    pub fn new(active_status: &str) -> Self {
        Self {
            records: Vec::new(),
            identity: IdentityTracker::new(),
            active_status: active_status.to_string(),
            issued: 0,
            applied: None,
        }
    }

    /// Issue the token for a fetch about to start.
    pub fn begin_fetch(&mut self) -> FetchToken {
        self.issued += 1;
        FetchToken(self.issued)
    }

    /// Apply one merge op.
    pub fn apply(&mut self, op: MergeOp) -> MergeOutcome {
        let outcome = match op {
            MergeOp::ReplaceAll { token, records } => self.replace_all(token, records),
            MergeOp::Insert(record) => self.insert(record),
            MergeOp::Patch { id, patch } => self.patch(&id, &patch),
            MergeOp::Remove { id } => self.remove(&id),
        };
        debug_assert!(self.is_consistent(), "identity set diverged from records");
        outcome
    }

    fn replace_all(
        &mut self,
        token: FetchToken,
        mut records: Vec<DisplayRecord>,
    ) -> MergeOutcome {
        if self.applied.is_some_and(|applied| token <= applied) {
            return MergeOutcome::Stale;
        }
        self.applied = Some(token);

        let mut seen = HashSet::with_capacity(records.len());
        records.retain(|record| seen.insert(record.id.clone()));

        self.identity.reset(seen);
        self.records = records;
        MergeOutcome::Applied
    }

    fn insert(&mut self, record: DisplayRecord) -> MergeOutcome {
        if !self.identity.add(&record.id) {
            return MergeOutcome::Duplicate;
        }
        self.records.insert(0, record);
        MergeOutcome::Applied
    }

    fn patch(&mut self, id: &str, patch: &RecordPatch) -> MergeOutcome {
        match self.records.iter_mut().find(|r| r.id == id) {
            Some(record) => {
                patch.apply_to(record);
                MergeOutcome::Applied
            }
            None => MergeOutcome::Missing,
        }
    }

    fn remove(&mut self, id: &str) -> MergeOutcome {
        if !self.identity.remove(id) {
            return MergeOutcome::Missing;
        }
        self.records.retain(|r| r.id != id);
        MergeOutcome::Applied
    }

    pub fn contains(&self, id: &str) -> bool {
        self.identity.contains(id)
    }

    pub fn get(&self, id: &str) -> Option<&DisplayRecord> {
        self.records.iter().find(|r| r.id == id)
    }

    /// Records in collection order.
    pub fn records(&self) -> &[DisplayRecord] {
        &self.records
    }

    pub fn identity(&self) -> &IdentityTracker {
        &self.identity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Active and other groups, each in collection order.
    pub fn grouped(&self) -> StatusGroups {
        StatusGroups::partition(&self.records, &self.active_status)
    }

    /// Render order: active group, then the rest.
    pub fn ordered(&self) -> Vec<DisplayRecord> {
        self.grouped().into_ordered()
    }

    /// Present iff tracked, and no ID held twice.
    pub fn is_consistent(&self) -> bool {
        self.records.len() == self.identity.len()
            && self.records.iter().all(|r| self.identity.contains(&r.id))
    }
}

/// Shared handle to a [`ReconcilingStore`].
///
/// The lock is never held across an `.await`. Every applied op bumps a
/// revision published on a watch channel.
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<Mutex<ReconcilingStore>>,
    revision: Arc<watch::Sender<u64>>,
}

impl Default for StoreHandle {
    fn default() -> Self {
        Self::new(ACTIVE_STATUS)
    }
}

impl StoreHandle {
    pub fn new(active_status: &str) -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(ReconcilingStore::new(active_status))),
            revision: Arc::new(revision),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ReconcilingStore> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply one op and publish a new revision if it changed anything.
    pub fn apply(&self, op: MergeOp) -> MergeOutcome {
        let outcome = self.lock().apply(op);
        if outcome.is_applied() {
            self.revision.send_modify(|rev| *rev += 1);
        }
        outcome
    }

    pub fn begin_fetch(&self) -> FetchToken {
        self.lock().begin_fetch()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains(id)
    }

    pub fn get(&self, id: &str) -> Option<DisplayRecord> {
        self.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the records in collection order.
    pub fn snapshot(&self) -> Vec<DisplayRecord> {
        self.lock().records().to_vec()
    }

    /// Sorted copy of the tracked IDs.
    pub fn identity_snapshot(&self) -> Vec<String> {
        let store = self.lock();
        let mut ids: Vec<String> = store.identity().iter().map(str::to_string).collect();
        ids.sort();
        ids
    }

    pub fn grouped(&self) -> StatusGroups {
        self.lock().grouped()
    }

    pub fn ordered(&self) -> Vec<DisplayRecord> {
        self.lock().ordered()
    }

    /// Read the store under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&ReconcilingStore) -> R) -> R {
        f(&self.lock())
    }

    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Receiver notified after every applied op.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Wait until `predicate` holds for the store.
    pub async fn wait_until(&self, predicate: impl Fn(&ReconcilingStore) -> bool) {
        let mut changes = self.subscribe();
        loop {
            if self.read(&predicate) {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("revision", &self.revision())
            .field("len", &self.len())
            .finish()
    }
}
