//! Condition history shared by all reconciled resources.
//!
//! Each resource keeps a list with at most one condition per type. Setting a
//! condition rewrites the entry for that type in place; the transition
//! timestamp is only advanced when the boolean status actually changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tri-state status of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

impl ConditionStatus {
    pub fn is_true(&self) -> bool {
        matches!(self, Self::True)
    }
}

/// One observed condition of a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition<T> {
    #[serde(rename = "type")]
    pub condition_type: T,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_update_time: DateTime<Utc>,
    pub last_transition_time: DateTime<Utc>,
}

/// Condition history with one current entry per condition type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Conditions<T>(Vec<Condition<T>>);

impl<T> Default for Conditions<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T: Copy + Eq> Conditions<T> {
    pub fn get(&self, condition_type: T) -> Option<&Condition<T>> {
        self.0.iter().find(|c| c.condition_type == condition_type)
    }

    /// True iff the condition exists with status True.
    pub fn is_true(&self, condition_type: T) -> bool {
        self.get(condition_type)
            .map(|c| c.status.is_true())
            .unwrap_or(false)
    }

    pub fn has(&self, condition_type: T) -> bool {
        self.get(condition_type).is_some()
    }

    /// The most recently rewritten condition, if any.
    pub fn last(&self) -> Option<&Condition<T>> {
        self.0.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition<T>> {
        self.0.iter()
    }

    pub fn remove(&mut self, condition_type: T) {
        self.0.retain(|c| c.condition_type != condition_type);
    }

    /// Set the condition of the given type, rewriting the current entry.
    ///
    /// A set with unchanged status and reason is a no-op, so reconciles that
    /// observe the same state twice produce byte-equal status documents.
    pub fn set(&mut self, condition_type: T, status: ConditionStatus, reason: &str, message: &str) {
        let now = Utc::now();
        let mut new_cond = Condition {
            condition_type,
            status,
            reason: reason.to_string(),
            message: message.to_string(),
            last_update_time: now,
            last_transition_time: now,
        };

        if let Some(current) = self.get(condition_type) {
            if current.status == new_cond.status && current.reason == new_cond.reason {
                return;
            }
            if current.status == new_cond.status {
                new_cond.last_transition_time = current.last_transition_time;
                new_cond.last_update_time = current.last_update_time;
            }
        }

        self.remove(condition_type);
        self.0.push(new_cond);
    }
}
