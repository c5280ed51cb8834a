use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Suggestion;

/// Repository interface for suggestion persistence.
///
/// Same versioning and event contract as `ExperimentRepository`. There is at
/// most one suggestion per experiment, stored under the experiment's name.
#[async_trait]
pub trait SuggestionRepository: Send + Sync {
    async fn create(&self, suggestion: &Suggestion) -> DomainResult<()>;

    async fn get(&self, namespace: &str, name: &str) -> DomainResult<Option<Suggestion>>;

    /// Replace the stored suggestion if the version matches.
    async fn update(&self, suggestion: &Suggestion) -> DomainResult<()>;

    /// Remove the suggestion. Suggestions carry no finalizers; deletion is
    /// immediate.
    async fn delete(&self, namespace: &str, name: &str) -> DomainResult<()>;

    async fn list(&self, namespace: Option<&str>) -> DomainResult<Vec<Suggestion>>;
}
