//! Per-task delegation record and its transitions.
//!
//! The record follows `active → delegated → completed`, with
//! `delegated → active` as the repair transition when the awaited child is
//! removed before it reports back.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationStatus {
    Active,
    Delegated,
    Completed,
}

/// Persisted delegation bookkeeping for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationMeta {
    pub status: DelegationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaiting_child_id: Option<String>,
    #[serde(default)]
    pub child_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by_child_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_result_summary: Option<String>,
}

impl Default for DelegationMeta {
    /// A legacy task with no record on disk is active with no children.
    fn default() -> Self {
        Self {
            status: DelegationStatus::Active,
            delegated_to_id: None,
            awaiting_child_id: None,
            child_ids: Vec::new(),
            completed_by_child_id: None,
            completion_result_summary: None,
        }
    }
}

impl DelegationMeta {
    /// Suspend this task pending `child_id`.
    pub fn mark_delegated(&mut self, child_id: &str) {
        self.status = DelegationStatus::Delegated;
        self.delegated_to_id = Some(child_id.to_string());
        self.awaiting_child_id = Some(child_id.to_string());
        if !self.child_ids.iter().any(|id| id == child_id) {
            self.child_ids.push(child_id.to_string());
        }
    }

    /// True when this record is suspended waiting on `child_id`.
    pub fn is_awaiting(&self, child_id: &str) -> bool {
        self.status == DelegationStatus::Delegated
            && self.awaiting_child_id.as_deref() == Some(child_id)
    }

    /// Return to `active` after the awaited child was removed.
    ///
    /// Returns `false` (and leaves the record untouched) unless this task is
    /// delegated and awaiting exactly `child_id`.
    pub fn repair_after_child_removed(&mut self, child_id: &str) -> bool {
        if !self.is_awaiting(child_id) {
            return false;
        }
        self.status = DelegationStatus::Active;
        self.awaiting_child_id = None;
        true
    }

    /// Return to `active` with the child's result recorded.
    pub fn record_child_completion(&mut self, child_id: &str, summary: Option<String>) {
        self.status = DelegationStatus::Active;
        self.awaiting_child_id = None;
        self.completed_by_child_id = Some(child_id.to_string());
        self.completion_result_summary = summary;
        if !self.child_ids.iter().any(|id| id == child_id) {
            self.child_ids.push(child_id.to_string());
        }
    }

    pub fn mark_completed(&mut self) {
        self.status = DelegationStatus::Completed;
        self.awaiting_child_id = None;
    }

    /// Check record invariants:
    /// - `delegated` has an `awaitingChildId`
    /// - the awaited child is listed in `childIds`
    /// - `delegatedToId` equals `awaitingChildId` while delegated
    /// - `childIds` has no duplicates
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.status == DelegationStatus::Delegated {
            match self.awaiting_child_id.as_deref() {
                None => errors.push("delegated record missing awaitingChildId".to_string()),
                Some(awaiting) => {
                    if !self.child_ids.iter().any(|id| id == awaiting) {
                        errors.push(format!(
                            "awaitingChildId '{awaiting}' not present in childIds"
                        ));
                    }
                    if self.delegated_to_id.as_deref() != Some(awaiting) {
                        errors.push(format!(
                            "delegatedToId {:?} does not match awaitingChildId '{awaiting}'",
                            self.delegated_to_id
                        ));
                    }
                }
            }
        }

        let mut sorted = self.child_ids.clone();
        sorted.sort();
        for pair in sorted.windows(2) {
            if pair[0] == pair[1] {
                errors.push(format!("duplicate child id '{}'", pair[0]));
            }
        }

        errors
    }
}
