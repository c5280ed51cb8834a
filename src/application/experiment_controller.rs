//! Experiment controller.
//!
//! Reconciles one experiment per pass: finalizer management, terminal
//! short-circuit with resume handling, completion detection, suggestion
//! watermark updates, assignment consumption into trials, and status
//! aggregation. All writes go through the versioned store; conflicts are
//! surfaced to the runner and retried against the fresh version.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::application::reconciler::{Reconcile, ReconcileOutcome, ResourceKey};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::experiment::reasons;
use crate::domain::models::suggestion::reasons as suggestion_reasons;
use crate::domain::models::trial::reasons as trial_reasons;
use crate::domain::models::{
    template, Experiment, OptimalTrial, ResumePolicy, Suggestion, SuggestionConditionType,
    SuggestionSpec, TemplateSource, Trial, TrialAssignment, TrialCounts, TrialSpec,
};
use crate::domain::ports::{
    ExperimentRepository, JobProvider, RuntimeCatalog, SuggestionRepository, TrialRepository,
    WorkerHost,
};
use crate::services::Telemetry;

/// Finalizer held on every experiment until its cleanup reconcile ran.
pub const EXPERIMENT_FINALIZER: &str = "tunelab.dev/update-metrics";

pub struct ExperimentController {
    experiments: Arc<dyn ExperimentRepository>,
    suggestions: Arc<dyn SuggestionRepository>,
    trials: Arc<dyn TrialRepository>,
    job_provider: Arc<dyn JobProvider>,
    worker_host: Arc<dyn WorkerHost>,
    catalog: Arc<dyn RuntimeCatalog>,
    telemetry: Arc<Telemetry>,
}

impl ExperimentController {
    pub fn new(
        experiments: Arc<dyn ExperimentRepository>,
        suggestions: Arc<dyn SuggestionRepository>,
        trials: Arc<dyn TrialRepository>,
        job_provider: Arc<dyn JobProvider>,
        worker_host: Arc<dyn WorkerHost>,
        catalog: Arc<dyn RuntimeCatalog>,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self {
            experiments,
            suggestions,
            trials,
            job_provider,
            worker_host,
            catalog,
            telemetry,
        }
    }

    /// One reconcile pass. See the module docs for the pass structure.
    #[instrument(skip(self), fields(experiment = %key))]
    async fn reconcile_experiment(&self, key: &ResourceKey) -> DomainResult<ReconcileOutcome> {
        let Some(mut experiment) = self.experiments.get(&key.namespace, &key.name).await? else {
            return Ok(ReconcileOutcome::Done);
        };

        // Finalizer management.
        if !experiment.is_deleted() && !experiment.finalizers.iter().any(|f| f == EXPERIMENT_FINALIZER)
        {
            experiment.finalizers.push(EXPERIMENT_FINALIZER.to_string());
            self.experiments.update(&experiment).await?;
            self.telemetry.inc_experiments_created();
            return Ok(ReconcileOutcome::Done);
        }
        if experiment.is_deleted() {
            if experiment.finalizers.iter().any(|f| f == EXPERIMENT_FINALIZER) {
                self.cleanup_children(&experiment).await?;
                self.telemetry.inc_experiments_deleted();
                experiment.finalizers.retain(|f| f != EXPERIMENT_FINALIZER);
                self.experiments.update(&experiment).await?;
            }
            return Ok(ReconcileOutcome::Done);
        }

        let original_status = experiment.status.clone();

        if !experiment.is_created() {
            experiment.mark_created(reasons::EXPERIMENT_CREATED, "Experiment is created");
            experiment.status.start_time = Some(Utc::now());
        }

        // Observe children once; everything below derives from this snapshot.
        let trial_list = self
            .trials
            .list_by_owner(&key.namespace, &key.name)
            .await?;
        let mut suggestion = self.suggestions.get(&key.namespace, &key.name).await?;

        experiment.status.trial_counts = count_trials(&trial_list);
        experiment.status.current_optimal_trial =
            best_trial(&experiment, &trial_list);

        // Terminal short-circuit, with the resume paths carved out.
        if experiment.is_completed() {
            if self.handle_completed(&mut experiment, suggestion.as_mut()).await? {
                self.write_status_if_changed(&experiment, &original_status).await?;
                return Ok(ReconcileOutcome::Done);
            }
            // A resume cleared the terminal state; the status write below
            // publishes the Restarting transition and the next event
            // continues the search.
            self.write_status_if_changed(&experiment, &original_status).await?;
            return Ok(ReconcileOutcome::Done);
        }

        // Completion check before any new work is started.
        if self.check_completion(&mut experiment, &trial_list, suggestion.as_mut()).await? {
            self.write_status_if_changed(&experiment, &original_status).await?;
            return Ok(ReconcileOutcome::Done);
        }

        // Suggestion failure is fatal for the experiment.
        if let Some(s) = &suggestion {
            if s.is_failed() {
                let (reason, message) = s
                    .status
                    .conditions
                    .get(SuggestionConditionType::Failed)
                    .map(|c| (c.reason.clone(), c.message.clone()))
                    .unwrap_or_else(|| {
                        (reasons::EXPERIMENT_FAILED.to_string(), "Suggestion failed".to_string())
                    });
                experiment.mark_failed(&reason, &message);
                self.telemetry.inc_experiments_failed();
                self.write_status_if_changed(&experiment, &original_status).await?;
                return Ok(ReconcileOutcome::Done);
            }
        }

        experiment.mark_running(reasons::EXPERIMENT_RUNNING, "Experiment is running");

        // Maintain the suggestion: raise the request watermark, consume
        // assignments into trials, prune what can never run. All suggestion
        // mutations land in one versioned write.
        let mut suggestion = match suggestion {
            Some(s) => s,
            None => self.create_suggestion(&experiment).await?,
        };
        let deficit = experiment.trial_deficit();
        let mut suggestion_dirty = false;
        // Assignments already produced but not yet consumed fill part of the
        // deficit; only the remainder is requested from the worker.
        let trial_names: HashSet<&str> = trial_list.iter().map(|t| t.name.as_str()).collect();
        let unconsumed = suggestion
            .status
            .suggestions
            .iter()
            .filter(|a| !trial_names.contains(a.name.as_str()))
            .count() as u32;
        let assignment_deficit = deficit.saturating_sub(unconsumed);
        if assignment_deficit > 0 {
            let desired = suggestion.status.suggestions.len() as u32 + assignment_deficit;
            if desired > suggestion.spec.requests {
                suggestion.spec.requests = desired;
                self.telemetry.inc_suggestion_requests();
                suggestion_dirty = true;
            }
        }

        suggestion_dirty |= self
            .reconcile_trials(&experiment, &mut suggestion, &trial_list, deficit)
            .await?;
        if suggestion_dirty {
            self.suggestions.update(&suggestion).await?;
        }

        self.write_status_if_changed(&experiment, &original_status).await?;
        Ok(ReconcileOutcome::Done)
    }

    /// Handle an experiment already in a terminal state. Returns true when
    /// the short-circuit holds, false when a resume cleared the state.
    async fn handle_completed(
        &self,
        experiment: &mut Experiment,
        suggestion: Option<&mut Suggestion>,
    ) -> DomainResult<bool> {
        let budget_reopened = experiment.is_succeeded()
            && experiment
                .status
                .conditions
                .get(crate::domain::models::ExperimentConditionType::Succeeded)
                .map(|c| c.reason == reasons::EXPERIMENT_MAX_TRIALS_REACHED)
                .unwrap_or(false)
            && !experiment.trial_budget_exhausted();

        match experiment.spec.resume_policy {
            ResumePolicy::NeverResume => {
                // Make sure the suggestion is finished and the worker gone.
                if let Some(s) = suggestion {
                    if !s.is_completed() {
                        s.mark_succeeded(
                            suggestion_reasons::SUGGESTION_SUCCEEDED,
                            "Experiment has finished",
                        );
                        self.suggestions.update(s).await?;
                    }
                }
                Ok(true)
            }
            ResumePolicy::FromVolume if budget_reopened => {
                info!(experiment = %experiment.name, "trial budget raised, restarting");
                experiment.mark_restarting(
                    reasons::EXPERIMENT_RESTARTING,
                    "Max trial count was raised, experiment is restarting",
                );
                if let Some(s) = suggestion {
                    s.mark_restarting(
                        suggestion_reasons::SUGGESTION_RESTART,
                        "Experiment is restarting",
                    );
                    self.suggestions.update(s).await?;
                }
                Ok(false)
            }
            ResumePolicy::LongRunning if budget_reopened => {
                info!(experiment = %experiment.name, "trial budget raised, resuming");
                experiment
                    .status
                    .conditions
                    .remove(crate::domain::models::ExperimentConditionType::Succeeded);
                experiment.status.completion_time = None;
                Ok(false)
            }
            // Parked terminal state: FromVolume waiting for a raised budget,
            // LongRunning with nothing to do, or a failed experiment.
            _ => {
                if experiment.spec.resume_policy == ResumePolicy::FromVolume {
                    if let Some(s) = suggestion {
                        if !s.is_completed() {
                            s.mark_succeeded(
                                suggestion_reasons::SUGGESTION_SUCCEEDED,
                                "Experiment has finished, worker state is kept on the volume",
                            );
                            self.suggestions.update(s).await?;
                        }
                    }
                }
                Ok(true)
            }
        }
    }

    /// Evaluate the termination criteria. Returns true when the experiment
    /// just transitioned to a terminal state.
    async fn check_completion(
        &self,
        experiment: &mut Experiment,
        trial_list: &[Trial],
        suggestion: Option<&mut Suggestion>,
    ) -> DomainResult<bool> {
        if experiment.max_failed_exceeded() {
            experiment.mark_failed(
                reasons::EXPERIMENT_MAX_FAILED_TRIALS_REACHED,
                &format!(
                    "Failed trials ({}) exceeded the budget ({})",
                    experiment.status.trial_counts.failed,
                    experiment.spec.max_failed_trial_count.unwrap_or(0)
                ),
            );
            self.telemetry.inc_experiments_failed();
            self.finish_suggestion(experiment, suggestion).await?;
            return Ok(true);
        }

        let goal_met = trial_list
            .iter()
            .any(|t| t.is_succeeded() && experiment.goal_reached(&t.status.observation));
        if goal_met {
            experiment.mark_succeeded(
                reasons::EXPERIMENT_GOAL_REACHED,
                "Objective goal has been reached",
            );
            self.telemetry.inc_experiments_succeeded();
            self.finish_suggestion(experiment, suggestion).await?;
            return Ok(true);
        }

        if experiment.trial_budget_exhausted() {
            experiment.mark_succeeded(
                reasons::EXPERIMENT_MAX_TRIALS_REACHED,
                "All budgeted trials have finished",
            );
            self.telemetry.inc_experiments_succeeded();
            self.finish_suggestion(experiment, suggestion).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Drive the suggestion to Succeeded on experiment termination. Under
    /// LongRunning the worker stays live and the suggestion stays open.
    async fn finish_suggestion(
        &self,
        experiment: &Experiment,
        suggestion: Option<&mut Suggestion>,
    ) -> DomainResult<()> {
        if experiment.spec.resume_policy == ResumePolicy::LongRunning {
            return Ok(());
        }
        if let Some(s) = suggestion {
            if !s.is_completed() {
                s.mark_succeeded(
                    suggestion_reasons::SUGGESTION_SUCCEEDED,
                    "Experiment has finished",
                );
                self.suggestions.update(s).await?;
            }
        }
        Ok(())
    }

    async fn create_suggestion(&self, experiment: &Experiment) -> DomainResult<Suggestion> {
        let suggestion = Suggestion::new(
            &experiment.namespace,
            &experiment.name,
            SuggestionSpec {
                algorithm: experiment.spec.algorithm.clone(),
                early_stopping: experiment.spec.early_stopping.clone(),
                requests: 0,
                resume_policy: experiment.spec.resume_policy,
            },
        );
        match self.suggestions.create(&suggestion).await {
            Ok(()) => Ok(suggestion),
            // Lost a race with a concurrent pass; use the stored one.
            Err(DomainError::AlreadyExists { .. }) => self
                .suggestions
                .get(&experiment.namespace, &experiment.name)
                .await?
                .ok_or_else(|| {
                    DomainError::not_found("Suggestion", &experiment.namespace, &experiment.name)
                }),
            Err(e) => Err(e),
        }
    }

    /// Mint trials for unconsumed assignments and prune what can never be
    /// consumed (assignments beyond the trial budget, pending trials beyond
    /// a lowered parallelism). Returns whether the suggestion was mutated.
    async fn reconcile_trials(
        &self,
        experiment: &Experiment,
        suggestion: &mut Suggestion,
        trial_list: &[Trial],
        deficit: u32,
    ) -> DomainResult<bool> {
        let trial_names: HashSet<&str> = trial_list.iter().map(|t| t.name.as_str()).collect();
        let mut suggestion_dirty = false;

        // Pending trials beyond a lowered parallelism are deleted from the
        // head, together with their assignments.
        let active = experiment.status.trial_counts.active();
        let mut excess_active = active.saturating_sub(experiment.spec.parallel_trial_count);
        if excess_active > 0 {
            for trial in trial_list.iter().filter(|t| !t.is_completed() && !t.is_running()) {
                if excess_active == 0 {
                    break;
                }
                info!(trial = %trial.name, "pruning pending trial beyond parallelism");
                self.job_provider.delete(trial).await.ok();
                self.trials.delete(&trial.namespace, &trial.name).await?;
                suggestion
                    .status
                    .suggestions
                    .retain(|a| a.name != trial.name);
                suggestion_dirty = true;
                excess_active -= 1;
            }
        }

        // Unconsumed assignments beyond the trial budget can never become
        // trials; drop them. Assignments already backed by a trial stay so
        // the status keeps matching reality.
        if let Some(max) = experiment.spec.max_trial_count {
            let mut kept = 0u32;
            let before = suggestion.status.suggestions.len();
            suggestion.status.suggestions.retain(|a| {
                if trial_names.contains(a.name.as_str()) || kept < max {
                    kept += 1;
                    true
                } else {
                    info!(assignment = %a.name, "pruning assignment beyond trial budget");
                    false
                }
            });
            suggestion_dirty |= suggestion.status.suggestions.len() != before;
        }

        // Mint trials for the oldest unconsumed assignments, up to the
        // deficit computed against the observed counts.
        let unconsumed: Vec<TrialAssignment> = suggestion
            .status
            .suggestions
            .iter()
            .filter(|a| !trial_names.contains(a.name.as_str()))
            .take(deficit as usize)
            .cloned()
            .collect();
        for assignment in unconsumed {
            self.create_trial(experiment, &assignment).await?;
        }

        if suggestion_dirty {
            suggestion.status.suggestion_count = suggestion.status.suggestions.len() as u32;
        }
        Ok(suggestion_dirty)
    }

    /// Render the template and create the trial. A render failure is fatal
    /// for this trial only: it is created already Failed so the experiment
    /// counts it, and the search goes on.
    async fn create_trial(
        &self,
        experiment: &Experiment,
        assignment: &TrialAssignment,
    ) -> DomainResult<()> {
        let template_spec = &experiment.spec.trial_template;
        let template_doc = match &template_spec.source {
            TemplateSource::Inline(value) => value.clone(),
            TemplateSource::Named(name) => self.catalog.trial_template(name).await?,
        };

        let rendered = template::render_run_spec(
            &template_doc,
            &template_spec.trial_parameters,
            &assignment.parameter_assignments,
        );

        let mut trial = Trial::new(
            &experiment.namespace,
            &assignment.name,
            &experiment.name,
            TrialSpec {
                objective: experiment.spec.objective.clone(),
                parameter_assignments: assignment.parameter_assignments.clone(),
                run_spec: serde_json::Value::Null,
                metrics_collector: experiment.spec.metrics_collector.clone(),
                primary_container_name: template_spec.primary_container_name.clone(),
                success_condition: template_spec.success_condition.clone(),
                failure_condition: template_spec.failure_condition.clone(),
                early_stopping_rules: assignment.early_stopping_rules.clone(),
                retain: template_spec.retain,
            },
        );

        match rendered {
            Ok(run_spec) => trial.spec.run_spec = run_spec,
            Err(err) => {
                warn!(trial = %trial.name, error = %err, "trial template render failed");
                trial.mark_created(trial_reasons::TRIAL_CREATED, "Trial is created");
                trial.mark_failed(trial_reasons::TRIAL_FAILED, &err.to_string());
            }
        }

        match self.trials.create(&trial).await {
            Ok(()) => {
                self.telemetry.inc_trials_created();
                info!(trial = %trial.name, experiment = %experiment.name, "trial created");
                Ok(())
            }
            // Another pass won the race; nothing to do.
            Err(DomainError::AlreadyExists { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn cleanup_children(&self, experiment: &Experiment) -> DomainResult<()> {
        for trial in self
            .trials
            .list_by_owner(&experiment.namespace, &experiment.name)
            .await?
        {
            if !trial.spec.retain {
                self.job_provider.delete(&trial).await.ok();
            }
            self.trials.delete(&trial.namespace, &trial.name).await.ok();
        }
        if let Some(suggestion) = self
            .suggestions
            .get(&experiment.namespace, &experiment.name)
            .await?
        {
            self.worker_host.teardown(&suggestion, true).await.ok();
            self.suggestions
                .delete(&suggestion.namespace, &suggestion.name)
                .await
                .ok();
        }
        Ok(())
    }

    async fn write_status_if_changed(
        &self,
        experiment: &Experiment,
        original: &crate::domain::models::ExperimentStatus,
    ) -> DomainResult<()> {
        if experiment.status != *original {
            self.experiments.update(experiment).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Reconcile for ExperimentController {
    async fn reconcile(&self, key: &ResourceKey) -> DomainResult<ReconcileOutcome> {
        self.reconcile_experiment(key).await
    }
}

/// Classify the observed trial set into the aggregate counts.
pub fn count_trials(trials: &[Trial]) -> TrialCounts {
    let mut counts = TrialCounts {
        trials: trials.len() as u32,
        ..Default::default()
    };
    for trial in trials {
        if trial.is_succeeded() {
            counts.succeeded += 1;
        } else if trial.is_failed() {
            counts.failed += 1;
        } else if trial.is_killed() {
            counts.killed += 1;
        } else if trial.is_early_stopped() {
            counts.early_stopped += 1;
        } else if trial.is_metrics_unavailable() {
            counts.metrics_unavailable += 1;
        } else if trial.is_running() {
            counts.running += 1;
        } else {
            counts.pending += 1;
        }
    }
    counts
}

/// Re-derive the optimal trial from scratch: best objective value among
/// succeeded trials, ties broken by earliest completion time.
pub fn best_trial(experiment: &Experiment, trials: &[Trial]) -> Option<OptimalTrial> {
    let objective = &experiment.spec.objective;
    let mut best: Option<(&Trial, f64)> = None;
    for trial in trials.iter().filter(|t| t.is_succeeded()) {
        let Some(value) = trial
            .status
            .observation
            .metric_value(&objective.objective_metric_name)
        else {
            continue;
        };
        best = match best {
            None => Some((trial, value)),
            Some((incumbent, incumbent_value)) => {
                if objective.objective_type.is_better(value, incumbent_value) {
                    Some((trial, value))
                } else if value == incumbent_value
                    && trial.status.completion_time < incumbent.status.completion_time
                {
                    Some((trial, value))
                } else {
                    Some((incumbent, incumbent_value))
                }
            }
        };
    }
    best.map(|(trial, _)| OptimalTrial {
        trial_name: trial.name.clone(),
        parameter_assignments: trial.spec.parameter_assignments.clone(),
        observation: trial.status.observation.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::common::{
        AlgorithmSpec, Metric, ObjectiveSpec, ObjectiveType, Observation, ParameterAssignment,
    };
    use crate::domain::models::{
        ExperimentSpec, MetricsCollectorSpec, TrialParameterSpec, TrialTemplate,
    };

    fn make_trial(name: &str, value: Option<f64>) -> Trial {
        let mut trial = Trial::new(
            "default",
            name,
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
                    value: "0.1".to_string(),
                }],
                run_spec: serde_json::Value::Null,
                metrics_collector: MetricsCollectorSpec::default(),
                primary_container_name: "training".to_string(),
                success_condition: String::new(),
                failure_condition: String::new(),
                early_stopping_rules: vec![],
                retain: false,
            },
        );
        if let Some(value) = value {
            trial.status.observation = Observation {
                metrics: vec![Metric {
                    name: "accuracy".to_string(),
                    value,
                }],
            };
            trial.mark_succeeded("TrialSucceeded", "done");
        }
        trial
    }

    #[test]
    fn test_count_trials_classification() {
        let mut running = make_trial("running", None);
        running.mark_running("TrialRunning", "running");
        let pending = make_trial("pending", None);
        let succeeded = make_trial("succeeded", Some(0.8));
        let mut failed = make_trial("failed", None);
        failed.mark_failed("TrialFailed", "boom");
        let mut unavailable = make_trial("unavailable", None);
        unavailable.mark_metrics_unavailable("TrialMetricsUnavailable", "no metrics");

        let counts = count_trials(&[running, pending, succeeded, failed, unavailable]);
        assert_eq!(counts.trials, 5);
        assert_eq!(counts.running, 1);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.succeeded, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.metrics_unavailable, 1);
        assert_eq!(counts.active(), 2);
        assert_eq!(counts.finished(), 3);
    }

    fn make_experiment() -> Experiment {
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
                parameters: vec![],
                nas_config: None,
                parallel_trial_count: 2,
                max_trial_count: Some(10),
                max_failed_trial_count: None,
                trial_template: TrialTemplate {
                    source: crate::domain::models::TemplateSource::Inline(serde_json::json!({
                        "apiVersion": "tunelab.dev/v1",
                        "kind": "ShellJob",
                        "spec": {"cmd": "--lr=${trialParameters.learningRate}"}
                    })),
                    trial_parameters: vec![TrialParameterSpec {
                        name: "learningRate".to_string(),
                        description: String::new(),
                        reference: "lr".to_string(),
                    }],
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

    #[test]
    fn test_best_trial_picks_maximum() {
        let experiment = make_experiment();
        let trials = vec![
            make_trial("t1", Some(0.7)),
            make_trial("t2", Some(0.9)),
            make_trial("t3", Some(0.8)),
            make_trial("t4", None),
        ];
        let optimal = best_trial(&experiment, &trials).unwrap();
        assert_eq!(optimal.trial_name, "t2");
        assert_eq!(optimal.observation.metric_value("accuracy"), Some(0.9));
    }

    #[test]
    fn test_best_trial_tie_broken_by_earliest_completion() {
        let experiment = make_experiment();
        let first = make_trial("first", Some(0.9));
        // Completed measurably later.
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = make_trial("second", Some(0.9));

        let optimal = best_trial(&experiment, &[second, first]).unwrap();
        assert_eq!(optimal.trial_name, "first");
    }

    #[test]
    fn test_best_trial_none_without_observations() {
        let experiment = make_experiment();
        assert!(best_trial(&experiment, &[make_trial("t", None)]).is_none());
    }
}
