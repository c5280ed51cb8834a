//! Domain models for the tunelab orchestrator.

pub mod common;
pub mod condition;
pub mod experiment;
pub mod metrics_collector;
pub mod suggestion;
pub mod template;
pub mod trial;

pub use common::{
    AlgorithmSetting, AlgorithmSpec, ComparisonType, EarlyStoppingRule, Metric, MetricEntry,
    ObjectiveSpec, ObjectiveType, Observation, ObservationLog, ParameterAssignment,
    TrialAssignment,
};
pub use condition::{Condition, ConditionStatus, Conditions};
pub use experiment::{
    Experiment, ExperimentConditionType, ExperimentSpec, ExperimentStatus, FeasibleSpace,
    NasConfig, NasOperation, OptimalTrial, ParameterSpec, ParameterType, ResumePolicy,
    TemplateSource, TrialCounts, TrialParameterSpec, TrialTemplate,
};
pub use metrics_collector::{
    CollectorKind, CollectorSource, FileSystemKind, FileSystemPath, HttpGet, MetricsCollectorSpec,
    MetricsFilter,
};
pub use suggestion::{Suggestion, SuggestionConditionType, SuggestionSpec, SuggestionStatus};
pub use trial::{Trial, TrialConditionType, TrialSpec, TrialStatus};
