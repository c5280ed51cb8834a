use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Experiment;

/// Repository interface for experiment persistence.
///
/// The store is versioned: `update` and `update_status` compare-and-swap on
/// the entity's `version` and fail with `DomainError::ConcurrencyConflict`
/// when the stored version has moved on. Controllers treat conflicts as
/// transient and re-reconcile against the fresh version.
///
/// Every successful write publishes a resource event so watchers re-enqueue
/// the affected keys.
///
/// # Thread Safety
/// Implementations must be Send + Sync for concurrent reconcile workers.
#[async_trait]
pub trait ExperimentRepository: Send + Sync {
    /// Insert a new experiment. Fails with `AlreadyExists` on name collision.
    async fn create(&self, experiment: &Experiment) -> DomainResult<()>;

    /// Fetch an experiment, or None when absent.
    async fn get(&self, namespace: &str, name: &str) -> DomainResult<Option<Experiment>>;

    /// Replace the stored experiment if the version matches.
    ///
    /// Increments the stored version. When the deletion timestamp is set and
    /// the finalizer list is empty, the row is dropped instead (the cleanup
    /// reconcile released the last finalizer).
    async fn update(&self, experiment: &Experiment) -> DomainResult<()>;

    /// Request deletion. With finalizers present this only stamps the
    /// deletion timestamp; the row disappears once finalizers are released.
    async fn delete(&self, namespace: &str, name: &str) -> DomainResult<()>;

    /// List experiments, optionally restricted to one namespace.
    async fn list(&self, namespace: Option<&str>) -> DomainResult<Vec<Experiment>>;
}
