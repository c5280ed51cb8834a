//! Trial controller.
//!
//! Materializes a trial's workload, polls its condition, evaluates
//! early-stopping rules against the live observation log, and derives the
//! trial's terminal state together with its best-value observation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::application::reconciler::{Reconcile, ReconcileOutcome, ResourceKey};
use crate::domain::errors::DomainResult;
use crate::domain::models::common::{Metric, Observation, ObservationLog};
use crate::domain::models::trial::reasons;
use crate::domain::models::Trial;
use crate::domain::ports::{JobProvider, MetricsSink, TrialRepository, WorkloadCondition};
use crate::services::Telemetry;

pub struct TrialController {
    trials: Arc<dyn TrialRepository>,
    job_provider: Arc<dyn JobProvider>,
    metrics_sink: Arc<dyn MetricsSink>,
    telemetry: Arc<Telemetry>,
    /// Poll interval while the workload is running.
    requeue_interval: Duration,
}

impl TrialController {
    pub fn new(
        trials: Arc<dyn TrialRepository>,
        job_provider: Arc<dyn JobProvider>,
        metrics_sink: Arc<dyn MetricsSink>,
        telemetry: Arc<Telemetry>,
        requeue_interval: Duration,
    ) -> Self {
        Self {
            trials,
            job_provider,
            metrics_sink,
            telemetry,
            requeue_interval,
        }
    }

    #[instrument(skip(self), fields(trial = %key))]
    async fn reconcile_trial(&self, key: &ResourceKey) -> DomainResult<ReconcileOutcome> {
        let Some(mut trial) = self.trials.get(&key.namespace, &key.name).await? else {
            return Ok(ReconcileOutcome::Done);
        };
        let original_status = trial.status.clone();

        if trial.is_completed() {
            if !trial.spec.retain {
                self.job_provider.delete(&trial).await.ok();
            }
            return Ok(ReconcileOutcome::Done);
        }

        if !trial.is_created() {
            trial.mark_created(reasons::TRIAL_CREATED, "Trial is created");
        }

        // A run spec without the declared primary container can never
        // produce metrics; fail fast.
        if !self
            .job_provider
            .is_primary_container(&trial.spec.run_spec, &trial.spec.primary_container_name)
        {
            warn!(
                trial = %trial.name,
                container = %trial.spec.primary_container_name,
                "primary container missing from run spec"
            );
            trial.mark_failed(
                reasons::TRIAL_FAILED,
                &format!(
                    "Primary container '{}' not found in run spec",
                    trial.spec.primary_container_name
                ),
            );
            self.telemetry.inc_trials_failed();
            self.write_status_if_changed(&trial, &original_status).await?;
            return Ok(ReconcileOutcome::Done);
        }

        let condition = self.job_provider.get_condition(&trial).await?;
        let outcome = match condition {
            None => {
                // Workload creation is retried by the runner on error.
                self.job_provider.create(&trial).await?;
                info!(trial = %trial.name, "workload created");
                ReconcileOutcome::RequeueAfter(self.requeue_interval)
            }
            Some(WorkloadCondition::Running) => {
                trial.mark_running(reasons::TRIAL_RUNNING, "Workload is running");
                self.evaluate_early_stopping(&trial).await?;
                ReconcileOutcome::RequeueAfter(self.requeue_interval)
            }
            Some(WorkloadCondition::Succeeded { reason, message }) => {
                self.complete_trial(&mut trial, &reason, &message).await?;
                ReconcileOutcome::Done
            }
            Some(WorkloadCondition::Failed { reason: _, message }) => {
                // Best effort: keep whatever observations were recorded.
                let log = self.observation_log(&trial).await?;
                if !log.is_empty() {
                    trial.status.observation = derive_observation(&trial, &log);
                }
                trial.mark_failed(reasons::TRIAL_FAILED, &message);
                self.telemetry.inc_trials_failed();
                ReconcileOutcome::Done
            }
        };

        self.write_status_if_changed(&trial, &original_status).await?;
        Ok(outcome)
    }

    /// Derive the terminal state of a workload that finished cleanly.
    async fn complete_trial(
        &self,
        trial: &mut Trial,
        workload_reason: &str,
        message: &str,
    ) -> DomainResult<()> {
        let log = self.observation_log(trial).await?;
        let observation = derive_observation(trial, &log);

        if workload_reason == reasons::TRIAL_EARLY_STOPPED {
            trial.status.observation = observation;
            trial.mark_early_stopped(reasons::TRIAL_EARLY_STOPPED, message);
            info!(trial = %trial.name, "trial early stopped");
            return Ok(());
        }

        // A clean workload without any objective-metric observation is a
        // distinct terminal state: it consumes trial budget without
        // contributing a value. Additional metrics that did arrive are kept.
        if observation
            .metric_value(&trial.spec.objective.objective_metric_name)
            .is_none()
        {
            trial.status.observation = observation;
            trial.mark_metrics_unavailable(
                reasons::TRIAL_METRICS_UNAVAILABLE,
                "Workload succeeded but no objective metric was recorded",
            );
            return Ok(());
        }

        trial.status.observation = observation;
        trial.mark_succeeded(reasons::TRIAL_SUCCEEDED, message);
        self.telemetry.inc_trials_succeeded();
        info!(trial = %trial.name, "trial succeeded");
        Ok(())
    }

    /// Evaluate early-stopping rules against the live log; on a match,
    /// signal the workload so the wrapped command exits as early-stopped.
    async fn evaluate_early_stopping(&self, trial: &Trial) -> DomainResult<()> {
        if trial.spec.early_stopping_rules.is_empty() {
            return Ok(());
        }
        let log = self.observation_log(trial).await?;
        if log.is_empty() {
            return Ok(());
        }
        for rule in &trial.spec.early_stopping_rules {
            if rule.matches(&log) {
                info!(
                    trial = %trial.name,
                    metric = %rule.metric,
                    "early stopping rule matched, signaling workload"
                );
                self.job_provider.signal_early_stop(trial).await?;
                break;
            }
        }
        Ok(())
    }

    async fn observation_log(&self, trial: &Trial) -> DomainResult<ObservationLog> {
        self.metrics_sink
            .get_observation_log(&trial.name, None, None, None)
            .await
    }

    async fn write_status_if_changed(
        &self,
        trial: &Trial,
        original: &crate::domain::models::TrialStatus,
    ) -> DomainResult<()> {
        if trial.status != *original {
            self.trials.update(trial).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Reconcile for TrialController {
    async fn reconcile(&self, key: &ResourceKey) -> DomainResult<ReconcileOutcome> {
        self.reconcile_trial(key).await
    }
}

/// One entry per tracked metric present in the log, holding its best value
/// under the objective direction.
pub fn derive_observation(trial: &Trial, log: &ObservationLog) -> Observation {
    let objective = &trial.spec.objective;
    let mut metrics = Vec::new();
    for name in objective.metric_names() {
        if let Some(value) = log.best_value(name, objective.objective_type) {
            metrics.push(Metric {
                name: name.to_string(),
                value,
            });
        }
    }
    Observation { metrics }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::common::{
        MetricEntry, ObjectiveSpec, ObjectiveType, ParameterAssignment,
    };
    use crate::domain::models::{MetricsCollectorSpec, TrialSpec};
    use chrono::Utc;

    fn trial() -> Trial {
        Trial::new(
            "default",
            "tune-x",
            "tune",
            TrialSpec {
                objective: ObjectiveSpec {
                    objective_type: ObjectiveType::Maximize,
                    goal: None,
                    objective_metric_name: "accuracy".to_string(),
                    additional_metric_names: vec!["loss".to_string()],
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
        )
    }

    fn entry(name: &str, value: f64) -> MetricEntry {
        MetricEntry {
            timestamp: Utc::now(),
            name: name.to_string(),
            value,
        }
    }

    #[test]
    fn test_derive_observation_covers_tracked_metrics() {
        let log = ObservationLog {
            entries: vec![
                entry("accuracy", 0.7),
                entry("accuracy", 0.9),
                entry("loss", 0.5),
                entry("untracked", 42.0),
            ],
        };
        let observation = derive_observation(&trial(), &log);
        assert_eq!(observation.metrics.len(), 2);
        assert_eq!(observation.metric_value("accuracy"), Some(0.9));
        assert_eq!(observation.metric_value("loss"), Some(0.5));
        assert_eq!(observation.metric_value("untracked"), None);
    }

    #[test]
    fn test_derive_observation_empty_log() {
        let observation = derive_observation(&trial(), &ObservationLog::default());
        assert!(observation.is_empty());
    }
}
