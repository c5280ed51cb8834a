use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::errors::DomainResult;
use crate::domain::models::CollectorKind;

/// Default port algorithm workers listen on.
pub const DEFAULT_WORKER_PORT: u16 = 6789;

/// How to run the worker for one algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuggestionWorkerConfig {
    /// Image or local binary of the worker.
    pub image: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_worker_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
}

fn default_worker_port() -> u16 {
    DEFAULT_WORKER_PORT
}

/// How to run the metrics-collector sidecar for one collector kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorSidecarConfig {
    pub image: String,
    #[serde(default)]
    pub wait_all_processes: bool,
}

/// The cluster-wide runtime configuration: worker images keyed by algorithm
/// name, sidecar images keyed by collector kind, and named trial templates.
///
/// Implementations cache and invalidate on change; lookups must be cheap
/// enough to sit inside a reconcile.
#[async_trait]
pub trait RuntimeCatalog: Send + Sync {
    /// Worker configuration for an algorithm. Unknown names fail suggestion
    /// reconciliation with `DomainError::UnknownAlgorithm`.
    async fn suggestion_config(&self, algorithm: &str) -> DomainResult<SuggestionWorkerConfig>;

    /// Whether the algorithm is registered at all.
    async fn has_algorithm(&self, algorithm: &str) -> bool;

    /// Sidecar configuration for a collector kind.
    async fn collector_config(&self, kind: CollectorKind) -> DomainResult<CollectorSidecarConfig>;

    /// A named trial template.
    async fn trial_template(&self, name: &str) -> DomainResult<serde_json::Value>;
}
