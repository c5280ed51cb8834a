use async_trait::async_trait;

use super::algorithm_client::WorkerEndpoint;
use super::catalog::SuggestionWorkerConfig;
use crate::domain::errors::DomainResult;
use crate::domain::models::Suggestion;

/// Hosts the long-lived algorithm worker backing a suggestion.
///
/// Lifecycle mirrors a deployment: ensure (create or scale up) → ready →
/// scale to zero (FromVolume park) → teardown. The persistent state volume
/// is named `{name}-{algorithm}-{namespace}` and survives scale-to-zero so a
/// restarted worker rehydrates from it.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Create the worker (or scale it back up) and return its endpoint.
    /// Idempotent: an already-running worker just returns its endpoint.
    async fn ensure_worker(
        &self,
        suggestion: &Suggestion,
        config: &SuggestionWorkerConfig,
    ) -> DomainResult<WorkerEndpoint>;

    /// Whether the worker reports ready to serve.
    async fn is_ready(&self, suggestion: &Suggestion) -> DomainResult<bool>;

    /// Stop the worker but keep its state volume.
    async fn scale_to_zero(&self, suggestion: &Suggestion) -> DomainResult<()>;

    /// Remove the worker; `remove_state` also drops the state volume.
    async fn teardown(&self, suggestion: &Suggestion, remove_state: bool) -> DomainResult<()>;
}
