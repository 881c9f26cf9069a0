//! In-memory store of past optimizations for the current session.
//!
//! Entries are ordered most-recent-first and are scoped to the logged-in
//! user: logout discards them outright rather than hiding them.

use crate::model::HistoryEntry;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct HistoryStore {
    entries: Vec<HistoryEntry>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert at the head. Appending an entry whose id is already present is
    /// a silent no-op, so a double-fired completion cannot duplicate a row.
    pub fn append(&mut self, entry: HistoryEntry) {
        if self.entries.iter().any(|e| e.id == entry.id) {
            return;
        }
        self.entries.insert(0, entry);
    }

    /// Replace the whole collection, e.g. from the bulk history fetch after
    /// login or restore. Ids stay unique (first occurrence wins) and entries
    /// are re-sorted most-recent-first.
    pub fn replace_all(&mut self, entries: Vec<HistoryEntry>) {
        let mut seen = HashSet::new();
        let mut entries: Vec<_> = entries
            .into_iter()
            .filter(|e| seen.insert(e.id.clone()))
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        self.entries = entries;
    }

    pub fn list(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pure projection for rehydrating the editor: returns the (initial,
    /// final) prompt pair without mutating the store or running anything.
    pub fn load_into_form(&self, id: &str) -> Option<(String, String)> {
        self.entries
            .iter()
            .find(|e| e.id == id)
            .map(|e| (e.initial_prompt.clone(), e.final_prompt.clone()))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
