//! HTTP JSON client for algorithm workers.
//!
//! Workers expose three endpoints: `POST /suggestions`, `POST /validate`
//! and `POST /early-stopping-rules`. The suggestion request carries the
//! observed trial count so workers can serve retries idempotently.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{EarlyStoppingRule, Experiment, Trial, TrialAssignment};
use crate::domain::ports::{AlgorithmClient, WorkerEndpoint};

#[derive(Debug, Clone)]
pub struct HttpAlgorithmConfig {
    pub timeout: Duration,
    /// Advertised by the worker deployment's catalog entry.
    pub supports_early_stopping: bool,
}

impl Default for HttpAlgorithmConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            supports_early_stopping: false,
        }
    }
}

pub struct HttpAlgorithmClient {
    client: Client,
    config: HttpAlgorithmConfig,
}

impl HttpAlgorithmClient {
    pub fn new(config: HttpAlgorithmConfig) -> DomainResult<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DomainError::AlgorithmUnavailable(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn url(endpoint: &WorkerEndpoint, path: &str) -> String {
        format!("http://{}{}", endpoint.address(), path)
    }
}

#[derive(Serialize)]
struct GetSuggestionsRequest<'a> {
    experiment: &'a Experiment,
    trials: &'a [Trial],
    request_number: u32,
    /// Idempotency key half: together with the experiment name a retry with
    /// the same observed count must return the same assignments.
    observed_trials: usize,
}

#[derive(Deserialize)]
struct GetSuggestionsResponse {
    assignments: Vec<TrialAssignment>,
}

#[derive(Serialize)]
struct ValidateRequest<'a> {
    experiment: &'a Experiment,
}

#[derive(Deserialize)]
struct ValidateResponse {
    ok: bool,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Serialize)]
struct EarlyStoppingRequest<'a> {
    experiment: &'a Experiment,
    trials: &'a [Trial],
}

#[derive(Deserialize)]
struct EarlyStoppingResponse {
    rules: Vec<EarlyStoppingRule>,
}

#[async_trait]
impl AlgorithmClient for HttpAlgorithmClient {
    async fn get_suggestions(
        &self,
        endpoint: &WorkerEndpoint,
        experiment: &Experiment,
        trials: &[Trial],
        request_number: u32,
    ) -> DomainResult<Vec<TrialAssignment>> {
        let request = GetSuggestionsRequest {
            experiment,
            trials,
            request_number,
            observed_trials: trials.len(),
        };
        let response = self
            .client
            .post(Self::url(endpoint, "/suggestions"))
            .json(&request)
            .send()
            .await
            .map_err(|e| DomainError::AlgorithmUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DomainError::AlgorithmUnavailable(format!(
                "worker returned {} from /suggestions",
                response.status()
            )));
        }
        let body: GetSuggestionsResponse = response
            .json()
            .await
            .map_err(|e| DomainError::AlgorithmUnavailable(e.to_string()))?;
        Ok(body.assignments)
    }

    async fn validate_algorithm_settings(
        &self,
        endpoint: &WorkerEndpoint,
        experiment: &Experiment,
    ) -> DomainResult<()> {
        let response = self
            .client
            .post(Self::url(endpoint, "/validate"))
            .json(&ValidateRequest { experiment })
            .send()
            .await
            .map_err(|e| DomainError::AlgorithmUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DomainError::AlgorithmUnavailable(format!(
                "worker returned {} from /validate",
                response.status()
            )));
        }
        let body: ValidateResponse = response
            .json()
            .await
            .map_err(|e| DomainError::AlgorithmUnavailable(e.to_string()))?;
        if !body.ok {
            return Err(DomainError::AlgorithmSettingsInvalid(
                body.message
                    .unwrap_or_else(|| "algorithm settings rejected".to_string()),
            ));
        }
        Ok(())
    }

    fn supports_early_stopping(&self) -> bool {
        self.config.supports_early_stopping
    }

    async fn get_early_stopping_rules(
        &self,
        endpoint: &WorkerEndpoint,
        experiment: &Experiment,
        trials: &[Trial],
    ) -> DomainResult<Vec<EarlyStoppingRule>> {
        let response = self
            .client
            .post(Self::url(endpoint, "/early-stopping-rules"))
            .json(&EarlyStoppingRequest { experiment, trials })
            .send()
            .await
            .map_err(|e| DomainError::AlgorithmUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DomainError::AlgorithmUnavailable(format!(
                "worker returned {} from /early-stopping-rules",
                response.status()
            )));
        }
        let body: EarlyStoppingResponse = response
            .json()
            .await
            .map_err(|e| DomainError::AlgorithmUnavailable(e.to_string()))?;
        Ok(body.rules)
    }
}
