//! SQLite-backed metrics sink.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use super::experiment_repository::parse_timestamp;
use crate::domain::errors::DomainResult;
use crate::domain::models::{MetricEntry, ObservationLog};
use crate::domain::ports::MetricsSink;

#[derive(Clone)]
pub struct SqliteMetricsSink {
    pool: SqlitePool,
}

impl SqliteMetricsSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsSink for SqliteMetricsSink {
    async fn report_observation_log(
        &self,
        trial_name: &str,
        entries: &[MetricEntry],
    ) -> DomainResult<()> {
        for entry in entries {
            sqlx::query(
                r#"INSERT INTO observation_logs (trial_name, metric_name, metric_value, recorded_at)
                   VALUES (?, ?, ?, ?)"#,
            )
            .bind(trial_name)
            .bind(&entry.name)
            .bind(entry.value)
            .bind(entry.timestamp.to_rfc3339())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn get_observation_log(
        &self,
        trial_name: &str,
        metric_name: Option<&str>,
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
    ) -> DomainResult<ObservationLog> {
        let mut query = String::from(
            "SELECT metric_name, metric_value, recorded_at FROM observation_logs WHERE trial_name = ?",
        );
        let mut bindings: Vec<String> = Vec::new();
        if let Some(metric) = metric_name {
            query.push_str(" AND metric_name = ?");
            bindings.push(metric.to_string());
        }
        if let Some(start) = start_time {
            query.push_str(" AND recorded_at >= ?");
            bindings.push(start.to_rfc3339());
        }
        if let Some(end) = end_time {
            query.push_str(" AND recorded_at <= ?");
            bindings.push(end.to_rfc3339());
        }
        query.push_str(" ORDER BY id");

        let mut q = sqlx::query_as::<_, (String, f64, String)>(&query).bind(trial_name);
        for binding in &bindings {
            q = q.bind(binding);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut entries = Vec::with_capacity(rows.len());
        for (name, value, recorded_at) in rows {
            entries.push(MetricEntry {
                timestamp: parse_timestamp(&recorded_at)?,
                name,
                value,
            });
        }
        Ok(ObservationLog { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{all_embedded_migrations, create_test_pool, Migrator};
    use crate::domain::models::ObjectiveType;

    async fn setup() -> SqliteMetricsSink {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        SqliteMetricsSink::new(pool)
    }

    fn entry(name: &str, value: f64) -> MetricEntry {
        MetricEntry {
            timestamp: Utc::now(),
            name: name.to_string(),
            value,
        }
    }

    #[tokio::test]
    async fn test_report_and_fetch() {
        let sink = setup().await;
        sink.report_observation_log(
            "tune-a",
            &[entry("accuracy", 0.7), entry("accuracy", 0.9), entry("loss", 0.3)],
        )
        .await
        .unwrap();
        sink.report_observation_log("other", &[entry("accuracy", 0.99)])
            .await
            .unwrap();

        let log = sink
            .get_observation_log("tune-a", None, None, None)
            .await
            .unwrap();
        assert_eq!(log.entries.len(), 3);
        assert_eq!(log.best_value("accuracy", ObjectiveType::Maximize), Some(0.9));

        let filtered = sink
            .get_observation_log("tune-a", Some("loss"), None, None)
            .await
            .unwrap();
        assert_eq!(filtered.entries.len(), 1);
        assert_eq!(filtered.entries[0].value, 0.3);
    }

    #[tokio::test]
    async fn test_missing_trial_yields_empty_log() {
        let sink = setup().await;
        let log = sink
            .get_observation_log("absent", None, None, None)
            .await
            .unwrap();
        assert!(log.is_empty());
    }
}
