//! Realtime change notification models.

use serde::{Deserialize, Serialize};

use super::{DisplayRecord, RecordPatch};

/// Row-level change kind.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// Subscription filter: one event kind on one table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChangeFilter {
    pub event: ChangeKind,
    pub schema: String,
    pub table: String,
}

impl ChangeFilter {
    pub fn new(event: ChangeKind, schema: &str, table: &str) -> Self {
        Self {
            event,
            schema: schema.to_string(),
            table: table.to_string(),
        }
    }

    /// Insert, update and delete filters for a single table.
    pub fn all_for_table(schema: &str, table: &str) -> Vec<ChangeFilter> {
        [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
            .into_iter()
            .map(|event| ChangeFilter::new(event, schema, table))
            .collect()
    }

    pub fn matches(&self, change: &RawChange) -> bool {
        self.event == change.kind && self.schema == change.schema && self.table == change.table
    }
}

/// Change notification as delivered by the backend, with row images.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawChange {
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    /// Row after the change (insert/update)
    pub new: Option<serde_json::Value>,
    /// Row before the change (delete carries at least the primary key)
    pub old: Option<serde_json::Value>,
}

/// Normalized event handed to the reconciling store.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert(DisplayRecord),
    Update { id: String, patch: RecordPatch },
    Delete { id: String },
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update { .. } => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ChangeEvent::Insert(record) => &record.id,
            ChangeEvent::Update { id, .. } | ChangeEvent::Delete { id } => id,
        }
    }
}
