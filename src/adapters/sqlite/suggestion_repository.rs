//! SQLite implementation of the SuggestionRepository.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::experiment_repository::{is_unique_violation, parse_optional_timestamp, parse_timestamp};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::Suggestion;
use crate::domain::ports::SuggestionRepository;
use crate::services::{EventAction, EventBus, ResourceKind};

#[derive(Clone)]
pub struct SqliteSuggestionRepository {
    pool: SqlitePool,
    bus: Arc<EventBus>,
}

impl SqliteSuggestionRepository {
    pub fn new(pool: SqlitePool, bus: Arc<EventBus>) -> Self {
        Self { pool, bus }
    }

    async fn conflict_or_not_found(&self, namespace: &str, name: &str) -> DomainError {
        match self.get(namespace, name).await {
            Ok(Some(_)) => DomainError::conflict("Suggestion", namespace, name),
            _ => DomainError::not_found("Suggestion", namespace, name),
        }
    }
}

#[async_trait]
impl SuggestionRepository for SqliteSuggestionRepository {
    async fn create(&self, suggestion: &Suggestion) -> DomainResult<()> {
        let result = sqlx::query(
            r#"INSERT INTO suggestions
               (namespace, name, owner, spec, status, deletion_timestamp, version, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&suggestion.namespace)
        .bind(&suggestion.name)
        .bind(&suggestion.owner)
        .bind(serde_json::to_string(&suggestion.spec)?)
        .bind(serde_json::to_string(&suggestion.status)?)
        .bind(suggestion.deletion_timestamp.map(|t| t.to_rfc3339()))
        .bind(suggestion.version as i64)
        .bind(suggestion.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                self.bus.publish(
                    ResourceKind::Suggestion,
                    EventAction::Created,
                    &suggestion.namespace,
                    &suggestion.name,
                    Some(&suggestion.owner),
                );
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(DomainError::already_exists(
                "Suggestion",
                &suggestion.namespace,
                &suggestion.name,
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, namespace: &str, name: &str) -> DomainResult<Option<Suggestion>> {
        let row: Option<SuggestionRow> =
            sqlx::query_as("SELECT * FROM suggestions WHERE namespace = ? AND name = ?")
                .bind(namespace)
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Suggestion::try_from).transpose()
    }

    async fn update(&self, suggestion: &Suggestion) -> DomainResult<()> {
        let result = sqlx::query(
            r#"UPDATE suggestions
               SET spec = ?, status = ?, deletion_timestamp = ?, version = version + 1, updated_at = ?
               WHERE namespace = ? AND name = ? AND version = ?"#,
        )
        .bind(serde_json::to_string(&suggestion.spec)?)
        .bind(serde_json::to_string(&suggestion.status)?)
        .bind(suggestion.deletion_timestamp.map(|t| t.to_rfc3339()))
        .bind(Utc::now().to_rfc3339())
        .bind(&suggestion.namespace)
        .bind(&suggestion.name)
        .bind(suggestion.version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self
                .conflict_or_not_found(&suggestion.namespace, &suggestion.name)
                .await);
        }
        self.bus.publish(
            ResourceKind::Suggestion,
            EventAction::Updated,
            &suggestion.namespace,
            &suggestion.name,
            Some(&suggestion.owner),
        );
        Ok(())
    }

    async fn delete(&self, namespace: &str, name: &str) -> DomainResult<()> {
        let result = sqlx::query("DELETE FROM suggestions WHERE namespace = ? AND name = ?")
            .bind(namespace)
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::not_found("Suggestion", namespace, name));
        }
        self.bus.publish(
            ResourceKind::Suggestion,
            EventAction::Deleted,
            namespace,
            name,
            Some(name),
        );
        Ok(())
    }

    async fn list(&self, namespace: Option<&str>) -> DomainResult<Vec<Suggestion>> {
        let rows: Vec<SuggestionRow> = match namespace {
            Some(ns) => {
                sqlx::query_as("SELECT * FROM suggestions WHERE namespace = ? ORDER BY created_at")
                    .bind(ns)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT * FROM suggestions ORDER BY created_at")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.into_iter().map(Suggestion::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct SuggestionRow {
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

impl TryFrom<SuggestionRow> for Suggestion {
    type Error = DomainError;

    fn try_from(row: SuggestionRow) -> Result<Self, Self::Error> {
        Ok(Suggestion {
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
