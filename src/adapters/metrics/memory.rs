//! In-memory metrics sink for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{MetricEntry, ObservationLog};
use crate::domain::ports::MetricsSink;

#[derive(Default)]
pub struct MemoryMetricsSink {
    logs: Mutex<HashMap<String, Vec<MetricEntry>>>,
}

impl MemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricsSink for MemoryMetricsSink {
    async fn report_observation_log(
        &self,
        trial_name: &str,
        entries: &[MetricEntry],
    ) -> DomainResult<()> {
        self.logs
            .lock()
            .unwrap()
            .entry(trial_name.to_string())
            .or_default()
            .extend_from_slice(entries);
        Ok(())
    }

    async fn get_observation_log(
        &self,
        trial_name: &str,
        metric_name: Option<&str>,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> DomainResult<ObservationLog> {
        let logs = self.logs.lock().unwrap();
        let entries = logs
            .get(trial_name)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| metric_name.map(|m| e.name == m).unwrap_or(true))
                    .filter(|e| start_time.map(|t| e.timestamp >= t).unwrap_or(true))
                    .filter(|e| end_time.map(|t| e.timestamp <= t).unwrap_or(true))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(ObservationLog { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::ObjectiveType;

    #[tokio::test]
    async fn test_report_and_filter() {
        let sink = MemoryMetricsSink::new();
        let entries = vec![
            MetricEntry {
                timestamp: Utc::now(),
                name: "accuracy".to_string(),
                value: 0.7,
            },
            MetricEntry {
                timestamp: Utc::now(),
                name: "loss".to_string(),
                value: 0.2,
            },
        ];
        sink.report_observation_log("tune-a", &entries).await.unwrap();

        let all = sink.get_observation_log("tune-a", None, None, None).await.unwrap();
        assert_eq!(all.entries.len(), 2);
        assert_eq!(all.best_value("accuracy", ObjectiveType::Maximize), Some(0.7));

        let only_loss = sink
            .get_observation_log("tune-a", Some("loss"), None, None)
            .await
            .unwrap();
        assert_eq!(only_loss.entries.len(), 1);
    }
}
