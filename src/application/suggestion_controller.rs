//! Suggestion controller.
//!
//! Provisions the per-experiment algorithm worker, validates algorithm
//! settings once, fills the request watermark by asking the worker for
//! fresh assignments, and honors the resume policy on termination.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, instrument, warn};

use crate::application::reconciler::{Reconcile, ReconcileOutcome, ResourceKey};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::condition::ConditionStatus;
use crate::domain::models::suggestion::reasons;
use crate::domain::models::{ResumePolicy, Suggestion};
use crate::domain::ports::{
    AlgorithmClient, ExperimentRepository, RuntimeCatalog, SuggestionRepository, TrialRepository,
    WorkerHost,
};

pub struct SuggestionController {
    suggestions: Arc<dyn SuggestionRepository>,
    experiments: Arc<dyn ExperimentRepository>,
    trials: Arc<dyn TrialRepository>,
    algorithm_client: Arc<dyn AlgorithmClient>,
    worker_host: Arc<dyn WorkerHost>,
    catalog: Arc<dyn RuntimeCatalog>,
    /// Algorithm failures tolerated per suggestion before it is failed.
    retry_budget: u32,
    /// Poll interval while the worker deployment is not ready yet.
    not_ready_requeue: Duration,
    attempts: Mutex<HashMap<ResourceKey, u32>>,
}

impl SuggestionController {
    pub fn new(
        suggestions: Arc<dyn SuggestionRepository>,
        experiments: Arc<dyn ExperimentRepository>,
        trials: Arc<dyn TrialRepository>,
        algorithm_client: Arc<dyn AlgorithmClient>,
        worker_host: Arc<dyn WorkerHost>,
        catalog: Arc<dyn RuntimeCatalog>,
        retry_budget: u32,
        not_ready_requeue: Duration,
    ) -> Self {
        Self {
            suggestions,
            experiments,
            trials,
            algorithm_client,
            worker_host,
            catalog,
            retry_budget,
            not_ready_requeue,
            attempts: Mutex::new(HashMap::new()),
        }
    }

    #[instrument(skip(self), fields(suggestion = %key))]
    async fn reconcile_suggestion(&self, key: &ResourceKey) -> DomainResult<ReconcileOutcome> {
        let Some(mut suggestion) = self.suggestions.get(&key.namespace, &key.name).await? else {
            return Ok(ReconcileOutcome::Done);
        };
        let original_status = suggestion.status.clone();

        if suggestion.is_failed() {
            return Ok(ReconcileOutcome::Done);
        }

        // Terminal success: park or remove the worker per resume policy.
        if suggestion.is_succeeded() {
            match suggestion.spec.resume_policy {
                ResumePolicy::NeverResume => {
                    self.worker_host.teardown(&suggestion, true).await?;
                }
                ResumePolicy::FromVolume => {
                    self.worker_host.scale_to_zero(&suggestion).await?;
                }
                ResumePolicy::LongRunning => {}
            }
            return Ok(ReconcileOutcome::Done);
        }

        if !suggestion.is_created() {
            suggestion.mark_created(reasons::SUGGESTION_CREATED, "Suggestion is created");
        }

        // Provision the worker; algorithm names resolve through the runtime
        // catalog, unknown names fail the suggestion.
        let worker_config = match self
            .catalog
            .suggestion_config(&suggestion.spec.algorithm.algorithm_name)
            .await
        {
            Ok(config) => config,
            Err(DomainError::UnknownAlgorithm(name)) => {
                suggestion.mark_failed(
                    reasons::SUGGESTION_FAILED,
                    &format!("Unknown algorithm: {name}"),
                );
                self.write_status_if_changed(&suggestion, &original_status).await?;
                return Ok(ReconcileOutcome::Done);
            }
            Err(e) => return Err(e),
        };

        let endpoint = self.worker_host.ensure_worker(&suggestion, &worker_config).await?;
        if !self.worker_host.is_ready(&suggestion).await? {
            suggestion.mark_deployment_ready(
                ConditionStatus::False,
                reasons::SUGGESTION_DEPLOYMENT_NOT_READY,
                "Worker deployment is not ready",
            );
            self.write_status_if_changed(&suggestion, &original_status).await?;
            return Ok(ReconcileOutcome::RequeueAfter(self.not_ready_requeue));
        }
        suggestion.mark_deployment_ready(
            ConditionStatus::True,
            reasons::SUGGESTION_DEPLOYMENT_READY,
            "Worker deployment is ready",
        );

        // First time the worker is reachable: validate the settings once.
        // Rejection is permanent for this suggestion and its experiment.
        if !suggestion.is_running() {
            if let Some(experiment) = self
                .experiments
                .get(&suggestion.namespace, &suggestion.owner)
                .await?
            {
                match self
                    .algorithm_client
                    .validate_algorithm_settings(&endpoint, &experiment)
                    .await
                {
                    Ok(()) => {}
                    Err(DomainError::AlgorithmSettingsInvalid(message)) => {
                        warn!(suggestion = %suggestion.name, %message, "algorithm settings rejected");
                        suggestion.mark_failed(reasons::SUGGESTION_SETTINGS_REJECTED, &message);
                        self.write_status_if_changed(&suggestion, &original_status).await?;
                        return Ok(ReconcileOutcome::Done);
                    }
                    Err(e) => return Err(e),
                }
            }
            suggestion.mark_running(
                ConditionStatus::True,
                reasons::SUGGESTION_RUNNING,
                "Suggestion is running",
            );
        }

        // Honor the request watermark.
        let gap = suggestion.request_gap();
        if gap > 0 {
            match self.produce_assignments(&mut suggestion, &endpoint, gap).await {
                Ok(produced) => {
                    self.attempts.lock().unwrap().remove(key);
                    if produced == 0 && gap > 0 {
                        // Space exhausted: the worker owes nothing more.
                        info!(suggestion = %suggestion.name, "search space exhausted");
                    }
                }
                Err(err) => {
                    let attempt = {
                        let mut attempts = self.attempts.lock().unwrap();
                        let entry = attempts.entry(key.clone()).or_insert(0);
                        *entry += 1;
                        *entry
                    };
                    if attempt > self.retry_budget {
                        suggestion.mark_failed(
                            reasons::SUGGESTION_ALGORITHM_UNAVAILABLE,
                            &format!("Algorithm failed after {attempt} attempts: {err}"),
                        );
                        self.write_status_if_changed(&suggestion, &original_status).await?;
                        return Ok(ReconcileOutcome::Done);
                    }
                    // Transient: persist what we know and let the runner
                    // back off.
                    self.write_status_if_changed(&suggestion, &original_status).await?;
                    return Err(err);
                }
            }
        }

        self.write_status_if_changed(&suggestion, &original_status).await?;
        Ok(ReconcileOutcome::Done)
    }

    /// Ask the worker for `gap` fresh assignments and append the result.
    async fn produce_assignments(
        &self,
        suggestion: &mut Suggestion,
        endpoint: &crate::domain::ports::WorkerEndpoint,
        gap: u32,
    ) -> DomainResult<usize> {
        let Some(experiment) = self
            .experiments
            .get(&suggestion.namespace, &suggestion.owner)
            .await?
        else {
            // Owner is going away; nothing to produce.
            return Ok(0);
        };
        let trials = self
            .trials
            .list_by_owner(&suggestion.namespace, &suggestion.owner)
            .await?;

        let mut assignments = self
            .algorithm_client
            .get_suggestions(endpoint, &experiment, &trials, gap)
            .await?;

        if experiment.spec.early_stopping.is_some()
            && self.algorithm_client.supports_early_stopping()
        {
            let rules = self
                .algorithm_client
                .get_early_stopping_rules(endpoint, &experiment, &trials)
                .await?;
            for assignment in &mut assignments {
                if assignment.early_stopping_rules.is_empty() {
                    assignment.early_stopping_rules = rules.clone();
                }
            }
        }

        let produced = assignments.len();
        if produced > 0 {
            info!(
                suggestion = %suggestion.name,
                produced,
                total = suggestion.status.suggestions.len() + produced,
                "assignments produced"
            );
            suggestion.append_assignments(assignments);
        }
        Ok(produced)
    }

    async fn write_status_if_changed(
        &self,
        suggestion: &Suggestion,
        original: &crate::domain::models::SuggestionStatus,
    ) -> DomainResult<()> {
        if suggestion.status != *original {
            self.suggestions.update(suggestion).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Reconcile for SuggestionController {
    async fn reconcile(&self, key: &ResourceKey) -> DomainResult<ReconcileOutcome> {
        self.reconcile_suggestion(key).await
    }
}
