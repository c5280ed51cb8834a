//! SQLite implementation of the ExperimentRepository.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Experiment;
use crate::domain::ports::ExperimentRepository;
use crate::services::{EventAction, EventBus, ResourceKind};

#[derive(Clone)]
pub struct SqliteExperimentRepository {
    pool: SqlitePool,
    bus: Arc<EventBus>,
}

impl SqliteExperimentRepository {
    pub fn new(pool: SqlitePool, bus: Arc<EventBus>) -> Self {
        Self { pool, bus }
    }

    async fn conflict_or_not_found(&self, namespace: &str, name: &str) -> DomainError {
        match self.get(namespace, name).await {
            Ok(Some(_)) => DomainError::conflict("Experiment", namespace, name),
            _ => DomainError::not_found("Experiment", namespace, name),
        }
    }
}

#[async_trait]
impl ExperimentRepository for SqliteExperimentRepository {
    async fn create(&self, experiment: &Experiment) -> DomainResult<()> {
        let result = sqlx::query(
            r#"INSERT INTO experiments
               (namespace, name, spec, status, finalizers, deletion_timestamp, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&experiment.namespace)
        .bind(&experiment.name)
        .bind(serde_json::to_string(&experiment.spec)?)
        .bind(serde_json::to_string(&experiment.status)?)
        .bind(serde_json::to_string(&experiment.finalizers)?)
        .bind(experiment.deletion_timestamp.map(|t| t.to_rfc3339()))
        .bind(experiment.version as i64)
        .bind(experiment.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                self.bus.publish(
                    ResourceKind::Experiment,
                    EventAction::Created,
                    &experiment.namespace,
                    &experiment.name,
                    None,
                );
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(DomainError::already_exists(
                "Experiment",
                &experiment.namespace,
                &experiment.name,
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, namespace: &str, name: &str) -> DomainResult<Option<Experiment>> {
        let row: Option<ExperimentRow> =
            sqlx::query_as("SELECT * FROM experiments WHERE namespace = ? AND name = ?")
                .bind(namespace)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Experiment::try_from).transpose()
    }

    async fn update(&self, experiment: &Experiment) -> DomainResult<()> {
        // Releasing the last finalizer of a deleted experiment drops the row.
        if experiment.deletion_timestamp.is_some() && experiment.finalizers.is_empty() {
            let result =
                sqlx::query("DELETE FROM experiments WHERE namespace = ? AND name = ? AND version = ?")
                    .bind(&experiment.namespace)
                    .bind(&experiment.name)
                    .bind(experiment.version as i64)
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(self
                    .conflict_or_not_found(&experiment.namespace, &experiment.name)
                    .await);
            }
            self.bus.publish(
                ResourceKind::Experiment,
                EventAction::Deleted,
                &experiment.namespace,
                &experiment.name,
                None,
            );
            return Ok(());
        }

        let result = sqlx::query(
            r#"UPDATE experiments
               SET spec = ?, status = ?, finalizers = ?, deletion_timestamp = ?,
                   version = version + 1, updated_at = ?
               WHERE namespace = ? AND name = ? AND version = ?"#,
        )
        .bind(serde_json::to_string(&experiment.spec)?)
        .bind(serde_json::to_string(&experiment.status)?)
        .bind(serde_json::to_string(&experiment.finalizers)?)
        .bind(experiment.deletion_timestamp.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(&experiment.namespace)
        .bind(&experiment.name)
        .bind(experiment.version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .conflict_or_not_found(&experiment.namespace, &experiment.name)
                .await);
        }
        self.bus.publish(
            ResourceKind::Experiment,
            EventAction::Updated,
            &experiment.namespace,
            &experiment.name,
            None,
        );
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> DomainResult<()> {
        let Some(existing) = self.get(namespace, name).await? else {
            return Err(DomainError::not_found("Experiment", namespace, name));
        };

        if existing.finalizers.is_empty() {
            sqlx::query("DELETE FROM experiments WHERE namespace = ? AND name = ?")
                .bind(namespace)
                .bind(name)
                .execute(&self.pool)
                .await?;
            self.bus.publish(
                ResourceKind::Experiment,
                EventAction::Deleted,
                namespace,
                name,
                None,
            );
            return Ok(());
        }

        if existing.deletion_timestamp.is_none() {
            let result = sqlx::query(
                r#"UPDATE experiments SET deletion_timestamp = ?, version = version + 1, updated_at = ?
                   WHERE namespace = ? AND name = ? AND version = ?"#,
            )
            .bind(Utc::now().to_rfc3339())
            .bind(Utc::now().to_rfc3339())
            .bind(namespace)
            .bind(name)
            .bind(existing.version as i64)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(self.conflict_or_not_found(namespace, name).await);
            }
            self.bus.publish(
                ResourceKind::Experiment,
                EventAction::Updated,
                namespace,
                name,
                None,
            );
        }
        Ok(())
    }

    async fn list(&self, namespace: Option<&str>) -> DomainResult<Vec<Experiment>> {
        let rows: Vec<ExperimentRow> = match namespace {
            Some(ns) => {
                sqlx::query_as("SELECT * FROM experiments WHERE namespace = ? ORDER BY created_at")
                    .bind(ns)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM experiments ORDER BY created_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(Experiment::try_from).collect()
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

#[derive(sqlx::FromRow)]
struct ExperimentRow {
    namespace: String,
    name: String,
    spec: String,
    status: String,
    finalizers: String,
    deletion_timestamp: Option<String>,
    version: i64,
    created_at: String,
    #[allow(dead_code)]
    updated_at: String,
}

impl TryFrom<ExperimentRow> for Experiment {
    type Error = DomainError;

    fn try_from(row: ExperimentRow) -> Result<Self, Self::Error> {
        Ok(Experiment {
            namespace: row.namespace,
            name: row.name,
            finalizers: serde_json::from_str(&row.finalizers)?,
            deletion_timestamp: parse_optional_timestamp(row.deletion_timestamp.as_deref())?,
            created_at: parse_timestamp(&row.created_at)?,
            version: row.version as u64,
            spec: serde_json::from_str(&row.spec)?,
            status: serde_json::from_str(&row.status)?,
        })
    }
}

pub(crate) fn parse_timestamp(value: &str) -> DomainResult<chrono::DateTime<Utc>> {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| DomainError::Serialization(e.to_string()))
}

pub(crate) fn parse_optional_timestamp(
    value: Option<&str>,
) -> DomainResult<Option<chrono::DateTime<Utc>>> {
    value.map(parse_timestamp).transpose()
}
