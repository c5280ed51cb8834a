use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Trial;

/// Repository interface for trial persistence.
///
/// Same versioning and event contract as `ExperimentRepository`. Trials are
/// owned by their experiment (`owner` back-reference); the experiment
/// controller consumes `list_by_owner` on every reconcile to recount.
#[async_trait]
pub trait TrialRepository: Send + Sync {
    async fn create(&self, trial: &Trial) -> DomainResult<()>;

    async fn get(&self, namespace: &str, name: &str) -> DomainResult<Option<Trial>>;

    /// Replace the stored trial if the version matches.
    async fn update(&self, trial: &Trial) -> DomainResult<()>;

    /// Remove the trial. Workload cleanup is the caller's responsibility.
    async fn delete(&self, namespace: &str, name: &str) -> DomainResult<()>;

    /// All trials owned by the given experiment, in creation order.
    async fn list_by_owner(&self, namespace: &str, owner: &str) -> DomainResult<Vec<Trial>>;

    async fn list(&self, namespace: Option<&str>) -> DomainResult<Vec<Trial>>;
}
