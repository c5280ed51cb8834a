//! Experiment domain model.
//!
//! An experiment declares an objective, a search space, a trial workload
//! template and a budget; the controllers drive it to completion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::common::{AlgorithmSpec, ObjectiveSpec, Observation, ParameterAssignment};
use super::condition::{ConditionStatus, Conditions};
use super::metrics_collector::MetricsCollectorSpec;

/// Default number of trials running in parallel when the spec is silent.
pub const DEFAULT_PARALLEL_TRIAL_COUNT: u32 = 3;

/// Condition reasons written by the experiment controller.
pub mod reasons {
    pub const EXPERIMENT_CREATED: &str = "ExperimentCreated";
    pub const EXPERIMENT_RUNNING: &str = "ExperimentRunning";
    pub const EXPERIMENT_RESTARTING: &str = "ExperimentRestarting";
    pub const EXPERIMENT_GOAL_REACHED: &str = "ExperimentGoalReached";
    pub const EXPERIMENT_MAX_TRIALS_REACHED: &str = "ExperimentMaxTrialsReached";
    pub const EXPERIMENT_MAX_FAILED_TRIALS_REACHED: &str = "MaxFailedTrialCountReached";
    pub const EXPERIMENT_SUGGESTION_END_REACHED: &str = "ExperimentSuggestionEndReached";
    pub const EXPERIMENT_FAILED: &str = "ExperimentFailed";
}

/// What happens to the search once the experiment first reaches a terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResumePolicy {
    /// Tear the algorithm worker down; the experiment cannot be resumed.
    NeverResume,
    /// Keep the worker alive so a raised budget continues the search.
    LongRunning,
    /// Park the worker but keep its state volume; a raised budget restarts
    /// it from persisted state.
    FromVolume,
}

impl Default for ResumePolicy {
    fn default() -> Self {
        Self::NeverResume
    }
}

impl ResumePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NeverResume => "Never",
            Self::LongRunning => "LongRunning",
            Self::FromVolume => "FromVolume",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Never" | "NeverResume" => Some(Self::NeverResume),
            "LongRunning" => Some(Self::LongRunning),
            "FromVolume" => Some(Self::FromVolume),
            _ => None,
        }
    }
}

/// Type of a search-space parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Int,
    Double,
    Discrete,
    Categorical,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Double => "double",
            Self::Discrete => "discrete",
            Self::Categorical => "categorical",
        }
    }

    /// Whether the feasible space is an interval (vs. an explicit list).
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Double)
    }
}

/// The values a parameter may take: an interval for numeric types, a list
/// for discrete/categorical ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeasibleSpace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub list: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

/// One dimension of the search space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub parameter_type: ParameterType,
    pub feasible_space: FeasibleSpace,
}

/// One operation in a NAS search space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NasOperation {
    pub operation_type: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
}

/// Architecture search space, mutually exclusive with `parameters`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NasConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_layers: Option<u32>,
    #[serde(default)]
    pub operations: Vec<NasOperation>,
}

/// Where the trial workload template comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemplateSource {
    /// The template document embedded in the experiment spec.
    Inline(serde_json::Value),
    /// A named template from the runtime catalog.
    Named(String),
}

/// Declares one `${trialParameters.NAME}` placeholder and which search-space
/// parameter fills it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialParameterSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub reference: String,
}

/// The workload template a trial is minted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialTemplate {
    pub source: TemplateSource,
    #[serde(default)]
    pub trial_parameters: Vec<TrialParameterSpec>,
    /// Container holding the user script; the only one scanned for metrics.
    pub primary_container_name: String,
    /// Expression over the workload status document marking success.
    pub success_condition: String,
    /// Expression over the workload status document marking failure.
    pub failure_condition: String,
    /// Keep the workload around after the trial terminates.
    #[serde(default)]
    pub retain: bool,
}

/// User intent for one experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentSpec {
    pub objective: ObjectiveSpec,
    pub algorithm: AlgorithmSpec,
    /// Optional early-stopping algorithm; rules are fetched per suggestion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_stopping: Option<AlgorithmSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nas_config: Option<NasConfig>,
    #[serde(default = "default_parallel_trial_count")]
    pub parallel_trial_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_trial_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_failed_trial_count: Option<u32>,
    pub trial_template: TrialTemplate,
    #[serde(default)]
    pub metrics_collector: MetricsCollectorSpec,
    #[serde(default)]
    pub resume_policy: ResumePolicy,
}

fn default_parallel_trial_count() -> u32 {
    DEFAULT_PARALLEL_TRIAL_COUNT
}

/// Condition types of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExperimentConditionType {
    Created,
    Running,
    Restarting,
    Succeeded,
    Failed,
}

/// Aggregate trial counts, recomputed from the observed trial set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialCounts {
    pub trials: u32,
    pub pending: u32,
    pub running: u32,
    pub succeeded: u32,
    pub failed: u32,
    pub killed: u32,
    pub early_stopped: u32,
    pub metrics_unavailable: u32,
}

impl TrialCounts {
    /// Trials that currently occupy a parallelism slot.
    pub fn active(&self) -> u32 {
        self.pending + self.running
    }

    /// Trials that have finished one way or another and count toward the
    /// trial budget.
    pub fn finished(&self) -> u32 {
        self.succeeded + self.failed + self.killed + self.early_stopped + self.metrics_unavailable
    }
}

/// The trial currently holding the best objective value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimalTrial {
    pub trial_name: String,
    pub parameter_assignments: Vec<ParameterAssignment>,
    pub observation: Observation,
}

/// Controller-maintained observation of an experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentStatus {
    #[serde(default)]
    pub conditions: Conditions<ExperimentConditionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_optimal_trial: Option<OptimalTrial>,
    #[serde(default)]
    pub trial_counts: TrialCounts,
}

/// A declarative search job: objective + search space + budget + algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    /// Store version for optimistic concurrency.
    pub version: u64,
    pub spec: ExperimentSpec,
    #[serde(default)]
    pub status: ExperimentStatus,
}

impl Experiment {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, spec: ExperimentSpec) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            finalizers: Vec::new(),
            deletion_timestamp: None,
            created_at: Utc::now(),
            version: 1,
            spec,
            status: ExperimentStatus::default(),
        }
    }

    pub fn is_created(&self) -> bool {
        self.status.conditions.is_true(ExperimentConditionType::Created)
    }

    pub fn is_running(&self) -> bool {
        self.status.conditions.is_true(ExperimentConditionType::Running)
    }

    pub fn is_restarting(&self) -> bool {
        self.status.conditions.is_true(ExperimentConditionType::Restarting)
    }

    pub fn is_succeeded(&self) -> bool {
        self.status.conditions.is_true(ExperimentConditionType::Succeeded)
    }

    pub fn is_failed(&self) -> bool {
        self.status.conditions.is_true(ExperimentConditionType::Failed)
    }

    pub fn is_completed(&self) -> bool {
        self.is_succeeded() || self.is_failed()
    }

    pub fn is_deleted(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn mark_created(&mut self, reason: &str, message: &str) {
        self.status
            .conditions
            .set(ExperimentConditionType::Created, ConditionStatus::True, reason, message);
    }

    pub fn mark_running(&mut self, reason: &str, message: &str) {
        self.status
            .conditions
            .set(ExperimentConditionType::Running, ConditionStatus::True, reason, message);
        self.status
            .conditions
            .remove(ExperimentConditionType::Restarting);
    }

    /// Clear the terminal state so a raised budget continues the search.
    /// Only meaningful under `ResumePolicy::FromVolume`.
    pub fn mark_restarting(&mut self, reason: &str, message: &str) {
        self.status
            .conditions
            .remove(ExperimentConditionType::Succeeded);
        self.status
            .conditions
            .set(ExperimentConditionType::Running, ConditionStatus::False, reason, message);
        self.status
            .conditions
            .set(ExperimentConditionType::Restarting, ConditionStatus::True, reason, message);
        self.status.completion_time = None;
    }

    pub fn mark_succeeded(&mut self, reason: &str, message: &str) {
        self.status.conditions.set(
            ExperimentConditionType::Running,
            ConditionStatus::False,
            reason,
            "Experiment is not running",
        );
        self.status
            .conditions
            .set(ExperimentConditionType::Succeeded, ConditionStatus::True, reason, message);
        self.status.completion_time = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, reason: &str, message: &str) {
        self.status.conditions.set(
            ExperimentConditionType::Running,
            ConditionStatus::False,
            reason,
            "Experiment is not running",
        );
        self.status
            .conditions
            .set(ExperimentConditionType::Failed, ConditionStatus::True, reason, message);
        self.status.completion_time = Some(Utc::now());
    }

    /// Whether the failed-trial budget has been exhausted. The budget is
    /// strict: a budget of 2 tolerates 2 failures.
    pub fn max_failed_exceeded(&self) -> bool {
        match self.spec.max_failed_trial_count {
            Some(max) => self.status.trial_counts.failed > max,
            None => false,
        }
    }

    /// Whether every budgeted trial has finished.
    pub fn trial_budget_exhausted(&self) -> bool {
        match self.spec.max_trial_count {
            Some(max) => {
                self.status.trial_counts.finished() >= max
                    && self.status.trial_counts.active() == 0
            }
            None => false,
        }
    }

    /// Whether the given observation reaches the objective goal.
    pub fn goal_reached(&self, observation: &Observation) -> bool {
        let Some(goal) = self.spec.objective.goal else {
            return false;
        };
        observation
            .metric_value(&self.spec.objective.objective_metric_name)
            .map(|value| self.spec.objective.objective_type.meets_goal(value, goal))
            .unwrap_or(false)
    }

    /// How many more trials may be started right now: the free parallelism
    /// slots, bounded by what remains of the trial budget.
    pub fn trial_deficit(&self) -> u32 {
        let counts = &self.status.trial_counts;
        let free_slots = self.spec.parallel_trial_count.saturating_sub(counts.active());
        match self.spec.max_trial_count {
            Some(max) => {
                let budget_left = max.saturating_sub(counts.finished() + counts.active());
                free_slots.min(budget_left)
            }
            None => free_slots,
        }
    }
}
