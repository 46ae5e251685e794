//! SQLite-backed record of the executions emitted by the trigger.

use crate::models::execution::{Execution, ExecutionState, ExecutionTrigger};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");
const MAX_LIST_LIMIT: i64 = 500;

#[derive(Debug, Error)]
pub enum ExecutionStoreError {
    #[error("execution `{0}` not found")]
    NotFound(Uuid),
    #[error("execution `{id}` has unknown state `{state}`")]
    UnknownState { id: Uuid, state: String },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type ExecutionStoreResult<T> = Result<T, ExecutionStoreError>;

#[derive(FromRow, Debug)]
struct ExecutionRow {
    id: Uuid,
    namespace: String,
    flow_id: String,
    flow_revision: i64,
    state: String,
    trigger_output: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = ExecutionStoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let state = match row.state.as_str() {
            "CREATED" => ExecutionState::Created,
            other => {
                return Err(ExecutionStoreError::UnknownState {
                    id: row.id,
                    state: other.to_string(),
                });
            }
        };
        let trigger: ExecutionTrigger = serde_json::from_str(&row.trigger_output)?;
        Ok(Execution {
            id: row.id,
            namespace: row.namespace,
            flow_id: row.flow_id,
            flow_revision: row.flow_revision,
            state,
            trigger,
            created_at: row.created_at,
        })
    }
}

#[derive(Clone)]
pub struct ExecutionStore {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl ExecutionStore {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Apply the embedded schema, one statement at a time.
    pub async fn migrate(&self) -> ExecutionStoreResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Lightweight connectivity check.
    pub async fn ping(&self) -> ExecutionStoreResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }

    pub async fn insert(&self, execution: &Execution) -> ExecutionStoreResult<()> {
        let trigger_output = serde_json::to_string(&execution.trigger)?;
        sqlx::query(
            "INSERT INTO executions (
                id, namespace, flow_id, flow_revision, trigger_id, state,
                blob_count, trigger_output, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(execution.id)
        .bind(&execution.namespace)
        .bind(&execution.flow_id)
        .bind(execution.flow_revision)
        .bind(&execution.trigger.id)
        .bind(execution.state.as_str())
        .bind(execution.trigger.variables.blobs.len() as i64)
        .bind(trigger_output)
        .bind(execution.created_at)
        .execute(&*self.db)
        .await?;

        debug!("persisted execution {}", execution.id);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> ExecutionStoreResult<Execution> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            "SELECT id, namespace, flow_id, flow_revision, state, trigger_output, created_at
             FROM executions WHERE id = ?",
        )
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => ExecutionStoreError::NotFound(id),
            other => ExecutionStoreError::Sqlx(other),
        })?;

        row.try_into()
    }

    /// Most recent executions first.
    pub async fn list_recent(&self, limit: i64) -> ExecutionStoreResult<Vec<Execution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(
            "SELECT id, namespace, flow_id, flow_revision, state, trigger_output, created_at
             FROM executions ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit.clamp(1, MAX_LIST_LIMIT))
        .fetch_all(&*self.db)
        .await?;

        rows.into_iter().map(Execution::try_from).collect()
    }
}

#[cfg(test)]
pub(crate) async fn memory_store() -> ExecutionStore {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let store = ExecutionStore::new(Arc::new(pool));
    store.migrate().await.unwrap();
    store
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        execution::{CycleContext, PollResult, TriggerContext},
        object::ObjectRef,
    };
    use chrono::Duration;
    use url::Url;

    fn execution(created_at: DateTime<Utc>) -> Execution {
        let trigger = TriggerContext {
            namespace: "io.example".into(),
            flow_id: "gcs-listen".into(),
            flow_revision: 2,
            trigger_id: "watch".into(),
        };
        let blob = ObjectRef::file("b", "in/a.txt")
            .with_uri(Url::parse("file:///staging/a.txt").unwrap());
        let mut execution = Execution::from_poll(
            &CycleContext::new(&trigger),
            PollResult { blobs: vec![blob] },
        );
        execution.created_at = created_at;
        execution
    }

    #[tokio::test]
    async fn insert_then_get() {
        let store = memory_store().await;
        let original = execution(Utc::now());

        store.insert(&original).await.unwrap();
        let loaded = store.get(original.id).await.unwrap();

        assert_eq!(loaded.id, original.id);
        assert_eq!(loaded.trigger, original.trigger);
        assert_eq!(loaded.state, ExecutionState::Created);
    }

    #[tokio::test]
    async fn missing_execution_is_not_found() {
        let store = memory_store().await;
        let id = Uuid::new_v4();
        assert!(matches!(
            store.get(id).await,
            Err(ExecutionStoreError::NotFound(missing)) if missing == id
        ));
    }

    #[tokio::test]
    async fn list_recent_orders_newest_first() {
        let store = memory_store().await;
        let now = Utc::now();
        let older = execution(now - Duration::minutes(5));
        let newer = execution(now);
        store.insert(&older).await.unwrap();
        store.insert(&newer).await.unwrap();

        let listed = store.list_recent(10).await.unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![newer.id, older.id]);

        assert_eq!(store.list_recent(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn migrate_is_repeatable() {
        let store = memory_store().await;
        store.migrate().await.unwrap();
        store.ping().await.unwrap();
    }
}
