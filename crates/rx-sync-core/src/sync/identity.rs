//! Set of record IDs currently held by the reconciling store.

use std::collections::HashSet;

/// Tracks which record IDs are present, for de-duplication only.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityTracker {
    ids: HashSet<String>,
}

impl IdentityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    /// Returns false if the ID was already tracked.
    pub fn add(&mut self, id: &str) -> bool {
        self.ids.insert(id.to_string())
    }

    /// Returns false if the ID was not tracked.
    pub fn remove(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    /// Replace the tracked set with exactly `ids`.
    pub fn reset<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = ids.into_iter().map(Into::into).collect();
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}
