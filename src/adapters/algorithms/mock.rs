//! In-process algorithm client for tests and dry runs.
//!
//! Serves scripted assignments when seeded, and otherwise synthesizes
//! deterministic assignments by cycling through the experiment's feasible
//! space. No search algorithm lives here; the point is a predictable
//! counterpart for the controllers.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    EarlyStoppingRule, Experiment, ParameterAssignment, ParameterSpec, ParameterType, Trial,
    TrialAssignment,
};
use crate::domain::ports::{AlgorithmClient, WorkerEndpoint};

#[derive(Default)]
pub struct MockAlgorithmClient {
    scripted: Mutex<VecDeque<TrialAssignment>>,
    validation_error: Option<String>,
    rules: Vec<EarlyStoppingRule>,
    supports_early_stopping: bool,
    /// The first N suggestion calls fail with a transient error.
    fail_next: AtomicU32,
    counter: AtomicU32,
    suggestion_calls: AtomicU32,
}

impl MockAlgorithmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed assignments returned before any are synthesized.
    pub fn with_scripted(self, assignments: Vec<TrialAssignment>) -> Self {
        *self.scripted.lock().unwrap() = assignments.into();
        self
    }

    /// Make `validate_algorithm_settings` reject with the given message.
    pub fn with_validation_error(mut self, message: impl Into<String>) -> Self {
        self.validation_error = Some(message.into());
        self
    }

    pub fn with_early_stopping_rules(mut self, rules: Vec<EarlyStoppingRule>) -> Self {
        self.supports_early_stopping = true;
        self.rules = rules;
        self
    }

    /// Fail the next `count` suggestion calls with a transient error.
    pub fn fail_suggestions(self, count: u32) -> Self {
        self.fail_next.store(count, Ordering::SeqCst);
        self
    }

    pub fn suggestion_calls(&self) -> u32 {
        self.suggestion_calls.load(Ordering::SeqCst)
    }

    fn synthesize(&self, experiment: &Experiment, index: u32) -> TrialAssignment {
        let parameter_assignments = experiment
            .spec
            .parameters
            .iter()
            .map(|p| ParameterAssignment {
                name: p.name.clone(),
                value: pick_value(p, index),
            })
            .collect();
        let suffix = Uuid::new_v4().simple().to_string();
        TrialAssignment {
            name: format!("{}-{}", experiment.name, &suffix[..8]),
            parameter_assignments,
            early_stopping_rules: vec![],
        }
    }
}

/// Deterministic walk over a parameter's feasible space.
fn pick_value(parameter: &ParameterSpec, index: u32) -> String {
    let space = &parameter.feasible_space;
    match parameter.parameter_type {
        ParameterType::Int => {
            let min: i64 = space.min.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0);
            let max: i64 = space.max.as_deref().and_then(|v| v.parse().ok()).unwrap_or(min);
            let width = (max - min + 1).max(1);
            (min + (index as i64 % width)).to_string()
        }
        ParameterType::Double => {
            let min: f64 = space.min.as_deref().and_then(|v| v.parse().ok()).unwrap_or(0.0);
            let max: f64 = space.max.as_deref().and_then(|v| v.parse().ok()).unwrap_or(min);
            let fraction = f64::from((index * 7) % 10) / 10.0;
            format!("{:.6}", min + (max - min) * fraction)
        }
        ParameterType::Discrete | ParameterType::Categorical => {
            let list = &space.list;
            if list.is_empty() {
                String::new()
            } else {
                list[index as usize % list.len()].clone()
            }
        }
    }
}

#[async_trait]
impl AlgorithmClient for MockAlgorithmClient {
    async fn get_suggestions(
        &self,
        _endpoint: &WorkerEndpoint,
        experiment: &Experiment,
        _trials: &[Trial],
        request_number: u32,
    ) -> DomainResult<Vec<TrialAssignment>> {
        self.suggestion_calls.fetch_add(1, Ordering::SeqCst);

        let remaining_failures = self.fail_next.load(Ordering::SeqCst);
        if remaining_failures > 0 {
            self.fail_next.store(remaining_failures - 1, Ordering::SeqCst);
            return Err(DomainError::AlgorithmUnavailable(
                "worker is not reachable".to_string(),
            ));
        }

        let mut produced = Vec::new();
        {
            let mut scripted = self.scripted.lock().unwrap();
            while produced.len() < request_number as usize {
                match scripted.pop_front() {
                    Some(assignment) => produced.push(assignment),
                    None => break,
                }
            }
        }
        while produced.len() < request_number as usize {
            let index = self.counter.fetch_add(1, Ordering::SeqCst);
            produced.push(self.synthesize(experiment, index));
        }
        Ok(produced)
    }

    async fn validate_algorithm_settings(
        &self,
        _endpoint: &WorkerEndpoint,
        _experiment: &Experiment,
    ) -> DomainResult<()> {
        match &self.validation_error {
            Some(message) => Err(DomainError::AlgorithmSettingsInvalid(message.clone())),
            None => Ok(()),
        }
    }

    fn supports_early_stopping(&self) -> bool {
        self.supports_early_stopping
    }

    async fn get_early_stopping_rules(
        &self,
        _endpoint: &WorkerEndpoint,
        _experiment: &Experiment,
        _trials: &[Trial],
    ) -> DomainResult<Vec<EarlyStoppingRule>> {
        Ok(self.rules.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::common::{AlgorithmSpec, ObjectiveSpec, ObjectiveType};
    use crate::domain::models::{
        ExperimentSpec, FeasibleSpace, MetricsCollectorSpec, ResumePolicy, TemplateSource,
        TrialParameterSpec, TrialTemplate,
    };

    fn experiment() -> Experiment {
        Experiment::new(
            "default",
            "tune",
            ExperimentSpec {
                objective: ObjectiveSpec {
                    objective_type: ObjectiveType::Maximize,
                    goal: None,
                    objective_metric_name: "accuracy".to_string(),
                    additional_metric_names: vec![],
                },
                algorithm: AlgorithmSpec {
                    algorithm_name: "random".to_string(),
                    algorithm_settings: vec![],
                },
                early_stopping: None,
                parameters: vec![
                    ParameterSpec {
                        name: "layers".to_string(),
                        parameter_type: ParameterType::Int,
                        feasible_space: FeasibleSpace {
                            min: Some("2".to_string()),
                            max: Some("4".to_string()),
                            ..Default::default()
                        },
                    },
                    ParameterSpec {
                        name: "optimizer".to_string(),
                        parameter_type: ParameterType::Categorical,
                        feasible_space: FeasibleSpace {
                            list: vec!["sgd".to_string(), "adam".to_string()],
                            ..Default::default()
                        },
                    },
                ],
                nas_config: None,
                parallel_trial_count: 2,
                max_trial_count: None,
                max_failed_trial_count: None,
                trial_template: TrialTemplate {
                    source: TemplateSource::Inline(serde_json::json!({
                        "apiVersion": "tunelab.dev/v1",
                        "kind": "ShellJob",
                        "spec": {
                            "cmd": "--layers=${trialParameters.numLayers} --opt=${trialParameters.optimizerName}"
                        }
                    })),
                    trial_parameters: vec![
                        TrialParameterSpec {
                            name: "numLayers".to_string(),
                            description: String::new(),
                            reference: "layers".to_string(),
                        },
                        TrialParameterSpec {
                            name: "optimizerName".to_string(),
                            description: String::new(),
                            reference: "optimizer".to_string(),
                        },
                    ],
                    primary_container_name: "training".to_string(),
                    success_condition: "status.succeeded > 0".to_string(),
                    failure_condition: "status.failed > 0".to_string(),
                    retain: false,
                },
                metrics_collector: MetricsCollectorSpec::default(),
                resume_policy: ResumePolicy::NeverResume,
            },
        )
    }

    fn endpoint() -> WorkerEndpoint {
        WorkerEndpoint {
            host: "127.0.0.1".to_string(),
            port: 0,
        }
    }

    #[tokio::test]
    async fn test_synthesized_assignments_stay_in_space() {
        let client = MockAlgorithmClient::new();
        let assignments = client
            .get_suggestions(&endpoint(), &experiment(), &[], 4)
            .await
            .unwrap();

        assert_eq!(assignments.len(), 4);
        for assignment in &assignments {
            let layers: i64 = assignment.parameter_assignments[0].value.parse().unwrap();
            assert!((2..=4).contains(&layers));
            assert!(["sgd", "adam"]
                .contains(&assignment.parameter_assignments[1].value.as_str()));
        }
        // Names are unique.
        let names: std::collections::HashSet<_> =
            assignments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names.len(), 4);
    }

    #[tokio::test]
    async fn test_scripted_assignments_served_first() {
        let scripted = TrialAssignment {
            name: "tune-scripted".to_string(),
            parameter_assignments: vec![],
            early_stopping_rules: vec![],
        };
        let client = MockAlgorithmClient::new().with_scripted(vec![scripted]);
        let assignments = client
            .get_suggestions(&endpoint(), &experiment(), &[], 2)
            .await
            .unwrap();
        assert_eq!(assignments[0].name, "tune-scripted");
        assert_eq!(assignments.len(), 2);
    }

    #[tokio::test]
    async fn test_transient_failures_then_recovery() {
        let client = MockAlgorithmClient::new().fail_suggestions(2);
        assert!(client
            .get_suggestions(&endpoint(), &experiment(), &[], 1)
            .await
            .is_err());
        assert!(client
            .get_suggestions(&endpoint(), &experiment(), &[], 1)
            .await
            .is_err());
        assert!(client
            .get_suggestions(&endpoint(), &experiment(), &[], 1)
            .await
            .is_ok());
        assert_eq!(client.suggestion_calls(), 3);
    }

    #[tokio::test]
    async fn test_validation_rejection() {
        let client = MockAlgorithmClient::new().with_validation_error("bad setting 'alpha'");
        let err = client
            .validate_algorithm_settings(&endpoint(), &experiment())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::AlgorithmSettingsInvalid(_)));
    }
}
