use serde::Serialize;
use std::collections::BTreeMap;

use crate::value::{Entry, FieldValue, Fields};

/// Per-session wizard record: field values, the step pointer, the row each
/// single-row tab was written to, and the provisioned spreadsheet.
///
/// The store performs no validation and no remote calls; steps validate
/// before calling [`WizardState::update`] and the controller owns all I/O.
#[derive(Debug, Clone)]
pub struct WizardState {
    initial: Fields,
    fields: Fields,
    active_step: usize,
    step_count: usize,
    row_index_by_tab: BTreeMap<String, u32>,
    sheet_id: Option<String>,
}

/// Read-only copy of the state, as sent to clients
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WizardSnapshot {
    pub fields: Fields,
    pub active_step_index: usize,
    pub step_count: usize,
    pub row_index_by_tab: BTreeMap<String, u32>,
    pub sheet_id: Option<String>,
    pub completed: bool,
}

impl WizardState {
    /// Creates an empty session whose fields start at `initial`.
    pub fn new(initial: Fields, step_count: usize) -> Self {
        Self {
            fields: initial.clone(),
            initial,
            active_step: 0,
            step_count,
            row_index_by_tab: BTreeMap::new(),
            sheet_id: None,
        }
    }

    pub fn get(&self) -> WizardSnapshot {
        WizardSnapshot {
            fields: self.fields.clone(),
            active_step_index: self.active_step,
            step_count: self.step_count,
            row_index_by_tab: self.row_index_by_tab.clone(),
            sheet_id: self.sheet_id.clone(),
            completed: self.is_completed(),
        }
    }

    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn active_step(&self) -> usize {
        self.active_step
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn is_completed(&self) -> bool {
        self.active_step >= self.step_count
    }

    pub fn row_index(&self, tab: &str) -> Option<u32> {
        self.row_index_by_tab.get(tab).copied()
    }

    pub fn sheet_id(&self) -> Option<&str> {
        self.sheet_id.as_deref()
    }

    /// Shallow-merges `partial` into the fields.
    pub fn update(&mut self, partial: Fields) {
        self.fields.extend(partial);
    }

    /// Remembers the row written for `tab`. Returns `false` and leaves the
    /// existing index alone when one was already recorded.
    pub fn set_row_index(&mut self, tab: &str, index: u32) -> bool {
        if self.row_index_by_tab.contains_key(tab) {
            return false;
        }
        self.row_index_by_tab.insert(tab.to_string(), index);
        true
    }

    /// Records the provisioned spreadsheet; set-once like row indices.
    pub fn set_sheet_id(&mut self, sheet_id: impl Into<String>) -> bool {
        let sheet_id = sheet_id.into();
        if self.sheet_id.is_some() || sheet_id.is_empty() {
            return false;
        }
        self.sheet_id = Some(sheet_id);
        true
    }

    pub fn advance(&mut self) -> usize {
        self.active_step = (self.active_step + 1).min(self.step_count);
        self.active_step
    }

    pub fn retreat(&mut self) -> usize {
        self.active_step = self.active_step.saturating_sub(1).min(self.step_count);
        self.active_step
    }

    pub fn reset(&mut self) {
        self.fields = self.initial.clone();
        self.active_step = 0;
        self.row_index_by_tab.clear();
        self.sheet_id = None;
    }

    /// Entries stored under `list`, empty when the list was never set
    pub fn entries(&self, list: &str) -> &[Entry] {
        self.fields
            .get(list)
            .and_then(FieldValue::as_entries)
            .unwrap_or(&[])
    }

    pub fn add_entry(&mut self, list: &str, entry: Entry) {
        self.entries_mut(list).push(entry);
    }

    /// Removes and returns the entry at `index`, if it exists.
    pub fn remove_entry(&mut self, list: &str, index: usize) -> Option<Entry> {
        let entries = self.entries_mut(list);
        (index < entries.len()).then(|| entries.remove(index))
    }

    /// Replaces the entry at `index` in place. Returns `false` when out of range.
    pub fn replace_entry(&mut self, list: &str, index: usize, entry: Entry) -> bool {
        match self.entries_mut(list).get_mut(index) {
            Some(slot) => {
                *slot = entry;
                true
            }
            None => false,
        }
    }

    fn entries_mut(&mut self, list: &str) -> &mut Vec<Entry> {
        let slot = self
            .fields
            .entry(list.to_string())
            .or_insert_with(|| FieldValue::Entries(Vec::new()));
        if !matches!(slot, FieldValue::Entries(_)) {
            *slot = FieldValue::Entries(Vec::new());
        }
        match slot {
            FieldValue::Entries(entries) => entries,
            _ => unreachable!("slot was just set to a list"),
        }
    }
}
