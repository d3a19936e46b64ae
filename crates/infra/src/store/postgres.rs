//! Postgres-backed call store.
//!
//! Conditional status transitions are expressed as
//! `UPDATE ... WHERE id = $1 AND status = $2`, so the guard and the write
//! are a single atomic statement; the returned row count tells the caller
//! whether the transition won.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder, Row, postgres::PgRow};
use tracing::instrument;

use callmesh_core::{Call, CallId, CallStatus, Destination};

use super::{CallPatch, CallStore, CallStoreError, StatusCounts};

/// Postgres call store.
///
/// `PgPool` handles connection management; the store is `Send + Sync` and
/// cheap to clone.
#[derive(Debug, Clone)]
pub struct PostgresCallStore {
    pool: PgPool,
}

impl PostgresCallStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the `calls` table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), CallStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS calls (
                id          UUID PRIMARY KEY,
                destination TEXT        NOT NULL,
                script_id   TEXT        NOT NULL,
                metadata    JSONB       NOT NULL DEFAULT 'null'::jsonb,
                status      TEXT        NOT NULL,
                attempts    INTEGER     NOT NULL DEFAULT 0,
                last_error  TEXT,
                created_at  TIMESTAMPTZ NOT NULL,
                started_at  TIMESTAMPTZ,
                ended_at    TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS calls_status_idx ON calls (status)")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS calls_created_at_idx ON calls (created_at DESC)")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

fn storage_err(e: sqlx::Error) -> CallStoreError {
    CallStoreError::Storage(e.to_string())
}

fn row_to_call(row: &PgRow) -> Result<Call, CallStoreError> {
    let status_raw: String = row.try_get("status").map_err(storage_err)?;
    let status: CallStatus = status_raw
        .parse()
        .map_err(|e| CallStoreError::Storage(format!("bad status column: {e}")))?;

    let attempts: i32 = row.try_get("attempts").map_err(storage_err)?;

    Ok(Call {
        id: CallId::from_uuid(row.try_get("id").map_err(storage_err)?),
        to: Destination::new(
            row.try_get::<String, _>("destination")
                .map_err(storage_err)?,
        ),
        script_id: row.try_get("script_id").map_err(storage_err)?,
        metadata: row.try_get("metadata").map_err(storage_err)?,
        status,
        attempts: attempts.max(0) as u32,
        last_error: row.try_get("last_error").map_err(storage_err)?,
        created_at: row.try_get("created_at").map_err(storage_err)?,
        started_at: row.try_get("started_at").map_err(storage_err)?,
        ended_at: row.try_get("ended_at").map_err(storage_err)?,
    })
}

#[async_trait]
impl CallStore for PostgresCallStore {
    #[instrument(skip(self, call), fields(call_id = %call.id), err)]
    async fn create(&self, call: Call) -> Result<Call, CallStoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO calls
                (id, destination, script_id, metadata, status, attempts,
                 last_error, created_at, started_at, ended_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(call.id.as_uuid())
        .bind(call.to.as_str())
        .bind(&call.script_id)
        .bind(&call.metadata)
        .bind(call.status.as_str())
        .bind(call.attempts as i32)
        .bind(&call.last_error)
        .bind(call.created_at)
        .bind(call.started_at)
        .bind(call.ended_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(CallStoreError::AlreadyExists(call.id));
        }
        Ok(call)
    }

    async fn find_by_id(&self, id: CallId) -> Result<Option<Call>, CallStoreError> {
        let row = sqlx::query("SELECT * FROM calls WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.as_ref().map(row_to_call).transpose()
    }

    #[instrument(skip(self, patch), fields(call_id = %id, expected = ?expected), err)]
    async fn update_if_status(
        &self,
        id: CallId,
        expected: Option<CallStatus>,
        patch: CallPatch,
    ) -> Result<u64, CallStoreError> {
        if patch.is_empty() {
            return Ok(0);
        }

        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new("UPDATE calls SET ");
        let mut sep = qb.separated(", ");
        if let Some(status) = patch.status {
            sep.push("status = ");
            sep.push_bind_unseparated(status.as_str());
        }
        if patch.increment_attempts {
            sep.push("attempts = attempts + 1");
        } else if let Some(attempts) = patch.attempts {
            sep.push("attempts = ");
            sep.push_bind_unseparated(attempts as i32);
        }
        if let Some(error) = patch.last_error {
            sep.push("last_error = ");
            sep.push_bind_unseparated(error);
        }
        if let Some(at) = patch.started_at {
            sep.push("started_at = ");
            sep.push_bind_unseparated(at);
        }
        if let Some(at) = patch.ended_at {
            sep.push("ended_at = ");
            sep.push_bind_unseparated(at);
        }
        if let Some(script_id) = patch.script_id {
            sep.push("script_id = ");
            sep.push_bind_unseparated(script_id);
        }
        if let Some(metadata) = patch.metadata {
            sep.push("metadata = ");
            sep.push_bind_unseparated(metadata);
        }

        qb.push(" WHERE id = ");
        qb.push_bind(*id.as_uuid());
        if let Some(expected) = expected {
            qb.push(" AND status = ");
            qb.push_bind(expected.as_str());
        }
        // Terminal records are write-once even without a guard.
        qb.push(" AND status NOT IN ('COMPLETED', 'FAILED', 'EXPIRED')");

        let result = qb.build().execute(&self.pool).await.map_err(storage_err)?;
        Ok(result.rows_affected())
    }

    async fn count_by_status(&self, status: CallStatus) -> Result<u64, CallStoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM calls WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(count.max(0) as u64)
    }

    async fn list(
        &self,
        status: Option<CallStatus>,
        limit: usize,
    ) -> Result<Vec<Call>, CallStoreError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM calls WHERE status = $1 ORDER BY created_at DESC LIMIT $2",
                )
                .bind(status.as_str())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM calls ORDER BY created_at DESC LIMIT $1")
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(storage_err)?;

        rows.iter().map(row_to_call).collect()
    }

    async fn find_stale_in_progress(
        &self,
        older_than: DateTime<Utc>,
    ) -> Result<Vec<Call>, CallStoreError> {
        let rows = sqlx::query(
            "SELECT * FROM calls WHERE status = 'IN_PROGRESS' AND started_at < $1",
        )
        .bind(older_than)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(row_to_call).collect()
    }

    async fn status_counts(&self) -> Result<StatusCounts, CallStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM calls GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status_raw: String = row.try_get("status").map_err(storage_err)?;
            let n: i64 = row.try_get("n").map_err(storage_err)?;
            match status_raw.parse::<CallStatus>() {
                Ok(status) => counts.record(status, n.max(0) as u64),
                Err(_) => tracing::warn!(status = %status_raw, "unknown status in store"),
            }
        }
        Ok(counts)
    }
}
