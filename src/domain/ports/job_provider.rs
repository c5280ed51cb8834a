use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::Trial;

/// Condition of a trial's workload, classified against the trial's success
/// and failure expressions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadCondition {
    Running,
    Succeeded { reason: String, message: String },
    Failed { reason: String, message: String },
}

impl WorkloadCondition {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Capability that turns a trial's run spec into a running workload and
/// classifies its status.
#[async_trait]
pub trait JobProvider: Send + Sync {
    /// Whether this provider understands the given workload kind.
    fn recognizes(&self, kind: &str) -> bool;

    /// Whether `container_name` names the primary (user script) container
    /// of the run spec.
    fn is_primary_container(&self, run_spec: &serde_json::Value, container_name: &str) -> bool;

    /// Materialize the workload. Must be idempotent: a second create for the
    /// same trial is a no-op.
    async fn create(&self, trial: &Trial) -> DomainResult<()>;

    /// Current workload condition, evaluated against the trial's
    /// success/failure expressions. None when no workload exists.
    async fn get_condition(&self, trial: &Trial) -> DomainResult<Option<WorkloadCondition>>;

    /// Write the early-stopped sentinel into the workload's shared volume
    /// and stop it; the wrapped command then exits cleanly.
    async fn signal_early_stop(&self, trial: &Trial) -> DomainResult<()>;

    /// Tear the workload down.
    async fn delete(&self, trial: &Trial) -> DomainResult<()>;
}
