//! Domain errors for the tunelab orchestrator.

use thiserror::Error;

/// Domain-level errors shared by the controllers, repositories and adapters.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{kind} not found: {namespace}/{name}")]
    NotFound {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("{kind} already exists: {namespace}/{name}")]
    AlreadyExists {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("Concurrency conflict: {kind} {namespace}/{name} was modified")]
    ConcurrencyConflict {
        kind: &'static str,
        namespace: String,
        name: String,
    },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid condition transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Template render failed: {0}")]
    TemplateRender(String),

    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("Algorithm settings rejected: {0}")]
    AlgorithmSettingsInvalid(String),

    #[error("Algorithm request failed: {0}")]
    AlgorithmUnavailable(String),

    #[error("Workload error: {0}")]
    Workload(String),

    #[error("Primary container '{container}' not found in workload for trial {trial}")]
    PrimaryContainerMissing { trial: String, container: String },

    #[error("Worker host error: {0}")]
    WorkerHost(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    pub fn not_found(kind: &'static str, namespace: &str, name: &str) -> Self {
        Self::NotFound {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn already_exists(kind: &'static str, namespace: &str, name: &str) -> Self {
        Self::AlreadyExists {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn conflict(kind: &'static str, namespace: &str, name: &str) -> Self {
        Self::ConcurrencyConflict {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// True for errors that may succeed on retry. Conflicts are retried
    /// immediately; the rest with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. }
                | Self::AlgorithmUnavailable(_)
                | Self::Workload(_)
                | Self::WorkerHost(_)
                | Self::Database(_)
        )
    }

    /// Conflicts are the one transient class that skips backoff.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let err = DomainError::not_found("Experiment", "default", "tune-1");
        assert_eq!(err.to_string(), "Experiment not found: default/tune-1");

        let err = DomainError::conflict("Trial", "default", "tune-1-abc");
        assert_eq!(
            err.to_string(),
            "Concurrency conflict: Trial default/tune-1-abc was modified"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(DomainError::conflict("Experiment", "ns", "x").is_transient());
        assert!(DomainError::conflict("Experiment", "ns", "x").is_conflict());
        assert!(DomainError::AlgorithmUnavailable("connection refused".into()).is_transient());
        assert!(!DomainError::AlgorithmUnavailable("connection refused".into()).is_conflict());
        assert!(!DomainError::ValidationFailed("bad spec".into()).is_transient());
        assert!(!DomainError::TemplateRender("unresolved placeholder".into()).is_transient());
    }
}
