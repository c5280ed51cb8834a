//! Trial domain model.
//!
//! A trial is one point in the search space, materialized as a training
//! workload plus the metrics it emitted. Terminal conditions are monotonic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::{EarlyStoppingRule, ObjectiveSpec, Observation, ParameterAssignment};
use super::condition::{ConditionStatus, Conditions};
use super::metrics_collector::MetricsCollectorSpec;

/// Condition reasons written by the trial controller.
pub mod reasons {
    pub const TRIAL_CREATED: &str = "TrialCreated";
    pub const TRIAL_RUNNING: &str = "TrialRunning";
    pub const TRIAL_SUCCEEDED: &str = "TrialSucceeded";
    pub const TRIAL_FAILED: &str = "TrialFailed";
    pub const TRIAL_KILLED: &str = "TrialKilled";
    pub const TRIAL_EARLY_STOPPED: &str = "TrialEarlyStopped";
    pub const TRIAL_METRICS_UNAVAILABLE: &str = "TrialMetricsUnavailable";
}

/// Condition types of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialConditionType {
    Created,
    Running,
    Succeeded,
    Failed,
    Killed,
    EarlyStopped,
    MetricsUnavailable,
}

impl TrialConditionType {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::Killed | Self::EarlyStopped | Self::MetricsUnavailable
        )
    }
}

/// Owner intent for one trial, minted by the experiment controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSpec {
    /// Objective inherited from the experiment.
    pub objective: ObjectiveSpec,
    pub parameter_assignments: Vec<ParameterAssignment>,
    /// The rendered workload document; opaque to the core.
    pub run_spec: serde_json::Value,
    #[serde(default)]
    pub metrics_collector: MetricsCollectorSpec,
    pub primary_container_name: String,
    pub success_condition: String,
    pub failure_condition: String,
    #[serde(default)]
    pub early_stopping_rules: Vec<EarlyStoppingRule>,
    /// Keep the workload after the trial terminates.
    #[serde(default)]
    pub retain: bool,
}

/// Controller-maintained observation of a trial.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialStatus {
    #[serde(default)]
    pub conditions: Conditions<TrialConditionType>,
    #[serde(default)]
    pub observation: Observation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
}

/// One materialized point in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub namespace: String,
    pub name: String,
    /// Owning experiment name.
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: u64,
    pub spec: TrialSpec,
    #[serde(default)]
    pub status: TrialStatus,
}

impl Trial {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        owner: impl Into<String>,
        spec: TrialSpec,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            owner: owner.into(),
            deletion_timestamp: None,
            created_at: Utc::now(),
            version: 1,
            spec,
            status: TrialStatus::default(),
        }
    }

    pub fn is_created(&self) -> bool {
        self.status.conditions.is_true(TrialConditionType::Created)
    }

    pub fn is_running(&self) -> bool {
        self.status.conditions.is_true(TrialConditionType::Running)
    }

    pub fn is_succeeded(&self) -> bool {
        self.status.conditions.is_true(TrialConditionType::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        self.status.conditions.is_true(TrialConditionType::Failed)
    }

    pub fn is_killed(&self) -> bool {
        self.status.conditions.is_true(TrialConditionType::Killed)
    }

    pub fn is_early_stopped(&self) -> bool {
        self.status.conditions.is_true(TrialConditionType::EarlyStopped)
    }

    pub fn is_metrics_unavailable(&self) -> bool {
        self.status
            .conditions
            .is_true(TrialConditionType::MetricsUnavailable)
    }

    pub fn is_completed(&self) -> bool {
        self.status
            .conditions
            .iter()
            .any(|c| c.condition_type.is_terminal() && c.status.is_true())
    }

    pub fn mark_created(&mut self, reason: &str, message: &str) {
        self.status
            .conditions
            .set(TrialConditionType::Created, ConditionStatus::True, reason, message);
        if self.status.start_time.is_none() {
            self.status.start_time = Some(Utc::now());
        }
    }

    pub fn mark_running(&mut self, reason: &str, message: &str) {
        self.status
            .conditions
            .set(TrialConditionType::Running, ConditionStatus::True, reason, message);
    }

    pub fn mark_succeeded(&mut self, reason: &str, message: &str) {
        self.terminate(TrialConditionType::Succeeded, reason, message);
    }

    pub fn mark_failed(&mut self, reason: &str, message: &str) {
        self.terminate(TrialConditionType::Failed, reason, message);
    }

    pub fn mark_killed(&mut self, reason: &str, message: &str) {
        self.terminate(TrialConditionType::Killed, reason, message);
    }

    pub fn mark_early_stopped(&mut self, reason: &str, message: &str) {
        self.terminate(TrialConditionType::EarlyStopped, reason, message);
    }

    pub fn mark_metrics_unavailable(&mut self, reason: &str, message: &str) {
        self.terminate(TrialConditionType::MetricsUnavailable, reason, message);
    }

    /// Terminal conditions are monotonic: once terminal, further terminal
    /// marks are ignored.
    fn terminate(&mut self, condition: TrialConditionType, reason: &str, message: &str) {
        if self.is_completed() {
            return;
        }
        if self.status.conditions.has(TrialConditionType::Running) {
            self.status.conditions.set(
                TrialConditionType::Running,
                ConditionStatus::False,
                reason,
                "Trial is not running",
            );
        }
        self.status
            .conditions
            .set(condition, ConditionStatus::True, reason, message);
        self.status.completion_time = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::common::ObjectiveType;

    fn trial() -> Trial {
        Trial::new(
            "default",
            "tune-a1b2c3",
            "tune",
            TrialSpec {
                objective: ObjectiveSpec {
                    objective_type: ObjectiveType::Maximize,
                    goal: None,
                    objective_metric_name: "accuracy".to_string(),
                    additional_metric_names: vec![],
                },
                parameter_assignments: vec![ParameterAssignment {
                    name: "lr".to_string(),
                    value: "0.05".to_string(),
                }],
                run_spec: serde_json::json!({
                    "apiVersion": "tunelab.dev/v1",
                    "kind": "ShellJob",
                }),
                metrics_collector: MetricsCollectorSpec::default(),
                primary_container_name: "training".to_string(),
                success_condition: "status.succeeded > 0".to_string(),
                failure_condition: "status.failed > 0".to_string(),
                early_stopping_rules: vec![],
                retain: false,
            },
        )
    }

    #[test]
    fn test_lifecycle() {
        let mut t = trial();
        t.mark_created(reasons::TRIAL_CREATED, "created");
        assert!(t.status.start_time.is_some());

        t.mark_running(reasons::TRIAL_RUNNING, "workload running");
        assert!(t.is_running());

        t.mark_succeeded(reasons::TRIAL_SUCCEEDED, "workload finished");
        assert!(t.is_succeeded());
        assert!(!t.is_running());
        assert!(t.is_completed());
        assert!(t.status.completion_time.is_some());
    }

    #[test]
    fn test_terminal_conditions_are_monotonic() {
        let mut t = trial();
        t.mark_succeeded(reasons::TRIAL_SUCCEEDED, "done");
        let completion = t.status.completion_time;

        t.mark_failed(reasons::TRIAL_FAILED, "late failure report");
        assert!(t.is_succeeded());
        assert!(!t.is_failed());
        assert_eq!(t.status.completion_time, completion);
    }

    #[test]
    fn test_metrics_unavailable_is_terminal() {
        let mut t = trial();
        t.mark_metrics_unavailable(reasons::TRIAL_METRICS_UNAVAILABLE, "no observations recorded");
        assert!(t.is_completed());
        assert!(t.is_metrics_unavailable());
        assert!(!t.is_succeeded());
    }
}
