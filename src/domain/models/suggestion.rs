//! Suggestion domain model.
//!
//! Exactly one suggestion exists per experiment, under the same name. It
//! tracks how many parameter assignments the experiment has asked for and
//! the append-only list the algorithm worker has produced so far.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::{AlgorithmSpec, TrialAssignment};
use super::condition::{ConditionStatus, Conditions};
use super::experiment::ResumePolicy;

/// Condition reasons written by the suggestion controller.
pub mod reasons {
    pub const SUGGESTION_CREATED: &str = "SuggestionCreated";
    pub const SUGGESTION_DEPLOYMENT_READY: &str = "DeploymentReady";
    pub const SUGGESTION_DEPLOYMENT_NOT_READY: &str = "DeploymentNotReady";
    pub const SUGGESTION_RUNNING: &str = "SuggestionRunning";
    pub const SUGGESTION_RESTART: &str = "SuggestionRestarting";
    pub const SUGGESTION_SUCCEEDED: &str = "SuggestionSucceeded";
    pub const SUGGESTION_FAILED: &str = "SuggestionFailed";
    pub const SUGGESTION_SETTINGS_REJECTED: &str = "AlgorithmSettingsRejected";
    pub const SUGGESTION_ALGORITHM_UNAVAILABLE: &str = "AlgorithmUnavailable";
}

/// Condition types of a suggestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuggestionConditionType {
    Created,
    DeploymentReady,
    Running,
    Restarting,
    Succeeded,
    Failed,
}

/// Owner intent for a suggestion. Written by the experiment controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionSpec {
    pub algorithm: AlgorithmSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_stopping: Option<AlgorithmSpec>,
    /// Cumulative count of assignments the experiment has asked for. Only
    /// ever raised; the worker fills `status.suggestions` up to it.
    #[serde(default)]
    pub requests: u32,
    #[serde(default)]
    pub resume_policy: ResumePolicy,
}

/// Controller-maintained observation of a suggestion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuggestionStatus {
    #[serde(default)]
    pub conditions: Conditions<SuggestionConditionType>,
    /// Always equals `suggestions.len()`.
    #[serde(default)]
    pub suggestion_count: u32,
    /// Ordered, append-only except for head pruning on parallelism drops
    /// and the FromVolume restart path.
    #[serde(default)]
    pub suggestions: Vec<TrialAssignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

/// The per-experiment algorithm worker plus its output list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub namespace: String,
    /// Same name as the owning experiment.
    pub name: String,
    /// Owning experiment name, kept explicit for cascade queries.
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
    pub spec: SuggestionSpec,
    #[serde(default)]
    pub status: SuggestionStatus,
}

impl Suggestion {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: SuggestionSpec) -> Self {
        let name = name.into();
        Self {
            namespace: namespace.into(),
            owner: name.clone(),
            name,
            deletion_timestamp: None,
            created_at: Utc::now(),
            version: 1,
            spec,
            status: SuggestionStatus::default(),
        }
    }

    /// Name of the worker deployment/service for this suggestion.
    pub fn worker_name(&self) -> String {
        format!("{}-{}", self.name, self.spec.algorithm.algorithm_name)
    }

    /// Name of the persistent state volume used under FromVolume.
    pub fn volume_name(&self) -> String {
        format!(
            "{}-{}-{}",
            self.name, self.spec.algorithm.algorithm_name, self.namespace
        )
    }

    /// How many assignments the worker still owes.
    pub fn request_gap(&self) -> u32 {
        self.spec
            .requests
            .saturating_sub(self.status.suggestions.len() as u32)
    }

    pub fn is_created(&self) -> bool {
        self.status.conditions.is_true(SuggestionConditionType::Created)
    }

    pub fn is_deployment_ready(&self) -> bool {
        self.status
            .conditions
            .is_true(SuggestionConditionType::DeploymentReady)
    }

    pub fn is_running(&self) -> bool {
        self.status.conditions.is_true(SuggestionConditionType::Running)
    }

    pub fn is_restarting(&self) -> bool {
        self.status
            .conditions
            .is_true(SuggestionConditionType::Restarting)
    }

    pub fn is_succeeded(&self) -> bool {
        self.status
            .conditions
            .is_true(SuggestionConditionType::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        self.status.conditions.is_true(SuggestionConditionType::Failed)
    }

    pub fn is_completed(&self) -> bool {
        self.is_succeeded() || self.is_failed()
    }

    pub fn mark_created(&mut self, reason: &str, message: &str) {
        self.status
            .conditions
            .set(SuggestionConditionType::Created, ConditionStatus::True, reason, message);
        if self.status.start_time.is_none() {
            self.status.start_time = Some(Utc::now());
        }
    }

    pub fn mark_deployment_ready(&mut self, status: ConditionStatus, reason: &str, message: &str) {
        self.status
            .conditions
            .set(SuggestionConditionType::DeploymentReady, status, reason, message);
    }

    /// Assert Running. Clears Succeeded, which is how a FromVolume restart
    /// reopens a finished suggestion.
    pub fn mark_running(&mut self, status: ConditionStatus, reason: &str, message: &str) {
        self.status
            .conditions
            .remove(SuggestionConditionType::Succeeded);
        self.status
            .conditions
            .set(SuggestionConditionType::Running, status, reason, message);
        if status.is_true() {
            self.status
                .conditions
                .remove(SuggestionConditionType::Restarting);
            self.status.completion_time = None;
        }
    }

    pub fn mark_restarting(&mut self, reason: &str, message: &str) {
        self.status
            .conditions
            .remove(SuggestionConditionType::Succeeded);
        self.status
            .conditions
            .set(SuggestionConditionType::Restarting, ConditionStatus::True, reason, message);
    }

    /// Terminal success. Running and DeploymentReady drop to False; further
    /// production is blocked until a restart clears this.
    pub fn mark_succeeded(&mut self, reason: &str, message: &str) {
        if self.status.conditions.has(SuggestionConditionType::Running) {
            self.status.conditions.set(
                SuggestionConditionType::Running,
                ConditionStatus::False,
                reason,
                "Suggestion is not running",
            );
        }
        if self
            .status
            .conditions
            .has(SuggestionConditionType::DeploymentReady)
        {
            self.status.conditions.set(
                SuggestionConditionType::DeploymentReady,
                ConditionStatus::False,
                reason,
                "Worker is not deployed",
            );
        }
        self.status
            .conditions
            .set(SuggestionConditionType::Succeeded, ConditionStatus::True, reason, message);
        self.status.completion_time = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, reason: &str, message: &str) {
        if let Some(running) = self.status.conditions.get(SuggestionConditionType::Running) {
            let (r, m) = (running.reason.clone(), running.message.clone());
            self.status
                .conditions
                .set(SuggestionConditionType::Running, ConditionStatus::False, &r, &m);
        }
        self.status
            .conditions
            .set(SuggestionConditionType::Failed, ConditionStatus::True, reason, message);
        self.status.completion_time = Some(Utc::now());
    }

    /// Append freshly produced assignments and keep the count in sync.
    pub fn append_assignments(&mut self, assignments: Vec<TrialAssignment>) {
        self.status.suggestions.extend(assignments);
        self.status.suggestion_count = self.status.suggestions.len() as u32;
    }
}
