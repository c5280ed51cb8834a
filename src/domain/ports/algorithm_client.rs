use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{EarlyStoppingRule, Experiment, Trial, TrialAssignment};

/// Network address of a running algorithm worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerEndpoint {
    pub host: String,
    pub port: u16,
}

impl WorkerEndpoint {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// RPC contract to a running suggestion worker.
///
/// `get_suggestions` must be idempotent with respect to
/// `(experiment.name, trials.len())`: a retry after a crash must not
/// double-consume the search space. The worker may return fewer assignments
/// than requested when the space is exhausted.
#[async_trait]
pub trait AlgorithmClient: Send + Sync {
    /// Ask the worker for up to `request_number` fresh assignments, given
    /// the experiment snapshot and all past trials with their observations.
    async fn get_suggestions(
        &self,
        endpoint: &WorkerEndpoint,
        experiment: &Experiment,
        trials: &[Trial],
        request_number: u32,
    ) -> DomainResult<Vec<TrialAssignment>>;

    /// Validate algorithm settings. Called once at suggestion creation;
    /// rejection fails the suggestion (and its experiment) permanently.
    async fn validate_algorithm_settings(
        &self,
        endpoint: &WorkerEndpoint,
        experiment: &Experiment,
    ) -> DomainResult<()>;

    /// Whether the algorithm advertises early-stopping support. Only then is
    /// `get_early_stopping_rules` called.
    fn supports_early_stopping(&self) -> bool;

    /// Fetch early-stopping rules for the next batch of trials.
    async fn get_early_stopping_rules(
        &self,
        endpoint: &WorkerEndpoint,
        experiment: &Experiment,
        trials: &[Trial],
    ) -> DomainResult<Vec<EarlyStoppingRule>>;
}
