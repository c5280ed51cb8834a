//! Runtime catalog backed by configuration.
//!
//! Holds worker configs keyed by algorithm name, sidecar configs keyed by
//! collector kind, and named trial templates. The whole catalog is swapped
//! atomically on configuration change; lookups clone small values.

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::CollectorKind;
use crate::domain::ports::{CollectorSidecarConfig, RuntimeCatalog, SuggestionWorkerConfig};
use crate::services::config::CatalogConfig;

pub struct ConfigCatalog {
    data: RwLock<CatalogConfig>,
}

impl ConfigCatalog {
    pub fn new(config: CatalogConfig) -> Self {
        Self {
            data: RwLock::new(config),
        }
    }

    /// Replace the catalog contents. Watch-driven: callers invoke this when
    /// the configuration source changes, not on a timer.
    pub async fn replace(&self, config: CatalogConfig) {
        *self.data.write().await = config;
    }
}

#[async_trait]
impl RuntimeCatalog for ConfigCatalog {
    async fn suggestion_config(&self, algorithm: &str) -> DomainResult<SuggestionWorkerConfig> {
        let data = self.data.read().await;
        data.suggestions
            .get(algorithm)
            .cloned()
            .ok_or_else(|| DomainError::UnknownAlgorithm(algorithm.to_string()))
    }

    async fn has_algorithm(&self, algorithm: &str) -> bool {
        self.data.read().await.suggestions.contains_key(algorithm)
    }

    async fn collector_config(&self, kind: CollectorKind) -> DomainResult<CollectorSidecarConfig> {
        let data = self.data.read().await;
        data.collectors.get(kind.as_str()).cloned().ok_or_else(|| {
            DomainError::ValidationFailed(format!(
                "no metrics collector sidecar registered for kind '{}'",
                kind.as_str()
            ))
        })
    }

    async fn trial_template(&self, name: &str) -> DomainResult<serde_json::Value> {
        let data = self.data.read().await;
        data.templates.get(name).cloned().ok_or_else(|| {
            DomainError::ValidationFailed(format!("unknown trial template '{name}'"))
        })
    }
}
