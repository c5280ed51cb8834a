//! SQLite implementation of the TrialRepository.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::experiment_repository::{is_unique_violation, parse_optional_timestamp, parse_timestamp};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Trial;
use crate::domain::ports::TrialRepository;
use crate::services::{EventAction, EventBus, ResourceKind};

#[derive(Clone)]
pub struct SqliteTrialRepository {
    pool: SqlitePool,
    bus: Arc<EventBus>,
}

impl SqliteTrialRepository {
    pub fn new(pool: SqlitePool, bus: Arc<EventBus>) -> Self {
        Self { pool, bus }
    }

    async fn conflict_or_not_found(&self, namespace: &str, name: &str) -> DomainError {
        match self.get(namespace, name).await {
            Ok(Some(_)) => DomainError::conflict("Trial", namespace, name),
            _ => DomainError::not_found("Trial", namespace, name),
        }
    }
}

#[async_trait]
impl TrialRepository for SqliteTrialRepository {
    async fn create(&self, trial: &Trial) -> DomainResult<()> {
        let result = sqlx::query(
            r#"INSERT INTO trials
               (namespace, name, owner, spec, status, deletion_timestamp, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&trial.namespace)
        .bind(&trial.name)
        .bind(&trial.owner)
        .bind(serde_json::to_string(&trial.spec)?)
        .bind(serde_json::to_string(&trial.status)?)
        .bind(trial.deletion_timestamp.map(|t| t.to_rfc3339()))
        .bind(trial.version as i64)
        .bind(trial.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                self.bus.publish(
                    ResourceKind::Trial,
                    EventAction::Created,
                    &trial.namespace,
                    &trial.name,
                    Some(&trial.owner),
                );
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(DomainError::already_exists(
                "Trial",
                &trial.namespace,
                &trial.name,
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, namespace: &str, name: &str) -> DomainResult<Option<Trial>> {
        let row: Option<TrialRow> =
            sqlx::query_as("SELECT * FROM trials WHERE namespace = ? AND name = ?")
                .bind(namespace)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Trial::try_from).transpose()
    }

    async fn update(&self, trial: &Trial) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE trials
               SET spec = ?, status = ?, deletion_timestamp = ?, version = version + 1, updated_at = ?
               WHERE namespace = ? AND name = ? AND version = ?"#,
        )
        .bind(serde_json::to_string(&trial.spec)?)
        .bind(serde_json::to_string(&trial.status)?)
        .bind(trial.deletion_timestamp.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(&trial.namespace)
        .bind(&trial.name)
        .bind(trial.version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.conflict_or_not_found(&trial.namespace, &trial.name).await);
        }
        self.bus.publish(
            ResourceKind::Trial,
            EventAction::Updated,
            &trial.namespace,
            &trial.name,
            Some(&trial.owner),
        );
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> DomainResult<()> {
        let owner: Option<(String,)> =
            sqlx::query_as("SELECT owner FROM trials WHERE namespace = ? AND name = ?")
                .bind(namespace)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        let Some((owner,)) = owner else {
            return Err(DomainError::not_found("Trial", namespace, name));
        };

        sqlx::query("DELETE FROM trials WHERE namespace = ? AND name = ?")
            .bind(namespace)
            .bind(name)
            .execute(&self.pool)
            .await?;
        self.bus.publish(
            ResourceKind::Trial,
            EventAction::Deleted,
            namespace,
            name,
            Some(&owner),
        );
        Ok(())
    }

    async fn list_by_owner(&self, namespace: &str, owner: &str) -> DomainResult<Vec<Trial>> {
        let rows: Vec<TrialRow> = sqlx::query_as(
            "SELECT * FROM trials WHERE namespace = ? AND owner = ? ORDER BY created_at, name",
        )
        .bind(namespace)
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Trial::try_from).collect()
    }

    async fn list(&self, namespace: Option<&str>) -> DomainResult<Vec<Trial>> {
        let rows: Vec<TrialRow> = match namespace {
            Some(ns) => {
                sqlx::query_as("SELECT * FROM trials WHERE namespace = ? ORDER BY created_at, name")
                    .bind(ns)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM trials ORDER BY created_at, name")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(Trial::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct TrialRow {
    namespace: String,
    name: String,
    owner: String,
    spec: String,
    status: String,
    deletion_timestamp: Option<String>,
    version: i64,
    created_at: String,
    #[allow(dead_code)]
    updated_at: String,
}

impl TryFrom<TrialRow> for Trial {
    type Error = DomainError;

    fn try_from(row: TrialRow) -> Result<Self, Self::Error> {
        Ok(Trial {
            namespace: row.namespace,
            name: row.name,
            owner: row.owner,
            deletion_timestamp: parse_optional_timestamp(row.deletion_timestamp.as_deref())?,
            created_at: parse_timestamp(&row.created_at)?,
            version: row.version as u64,
            spec: serde_json::from_str(&row.spec)?,
            status: serde_json::from_str(&row.status)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{all_embedded_migrations, create_test_pool, Migrator};
    use crate::domain::models::common::{
        ObjectiveSpec, ObjectiveType, ParameterAssignment,
    };
    use crate::domain::models::{MetricsCollectorSpec, TrialSpec};

    async fn setup() -> SqliteTrialRepository {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        SqliteTrialRepository::new(pool, EventBus::new(64))
    }

    fn trial(name: &str, owner: &str) -> Trial {
        Trial::new(
            "default",
            name,
            owner,
            TrialSpec {
                objective: ObjectiveSpec {
                    objective_type: ObjectiveType::Maximize,
                    goal: None,
                    objective_metric_name: "accuracy".to_string(),
                    additional_metric_names: vec![],
                },
                parameter_assignments: vec![ParameterAssignment {
                    name: "lr".to_string(),
                    value: "0.05".to_string(),
                }],
                run_spec: serde_json::json!({"apiVersion": "tunelab.dev/v1", "kind": "ShellJob"}),
                metrics_collector: MetricsCollectorSpec::default(),
                primary_container_name: "training".to_string(),
                success_condition: "status.succeeded > 0".to_string(),
                failure_condition: "status.failed > 0".to_string(),
                early_stopping_rules: vec![],
                retain: false,
            },
        )
    }

    #[tokio::test]
    async fn test_list_by_owner() {
        let repo = setup().await;
        repo.create(&trial("tune-a", "tune")).await.unwrap();
        repo.create(&trial("tune-b", "tune")).await.unwrap();
        repo.create(&trial("other-a", "other")).await.unwrap();

        let owned = repo.list_by_owner("default", "tune").await.unwrap();
        assert_eq!(owned.len(), 2);
        assert!(owned.iter().all(|t| t.owner == "tune"));
    }

    #[tokio::test]
    async fn test_status_update_round_trip() {
        let repo = setup().await;
        let mut t = trial("tune-a", "tune");
        repo.create(&t).await.unwrap();

        t.mark_created("TrialCreated", "created");
        t.mark_running("TrialRunning", "running");
        repo.update(&t).await.unwrap();

        let stored = repo.get("default", "tune-a").await.unwrap().unwrap();
        assert!(stored.is_running());
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn test_delete_publishes_owner() {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        let bus = EventBus::new(64);
        let repo = SqliteTrialRepository::new(pool, Arc::clone(&bus));

        repo.create(&trial("tune-a", "tune")).await.unwrap();
        // Subscribe after the create so only the delete event arrives; it
        // carries the owner for routing back to the experiment.
        let mut rx = bus.subscribe();
        repo.delete("default", "tune-a").await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.action, EventAction::Deleted);
        assert_eq!(event.owner.as_deref(), Some("tune"));
    }
}
