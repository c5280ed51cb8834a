use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{MetricEntry, ObservationLog};

/// Records observation logs keyed by trial name and serves them back.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Append entries to the trial's observation log.
    async fn report_observation_log(
        &self,
        trial_name: &str,
        entries: &[MetricEntry],
    ) -> DomainResult<()>;

    /// The trial's observation log, optionally restricted to one metric
    /// and/or a time window.
    async fn get_observation_log(
        &self,
        trial_name: &str,
        metric_name: Option<&str>,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> DomainResult<ObservationLog>;
}
