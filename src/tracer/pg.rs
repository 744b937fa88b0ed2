use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::schemas::ExecutionTrace;

use super::{TraceQuery, TraceStore, TraceStoreError};

/// Postgres-backed trace store: a header row plus the stage I/O as one
/// jsonb blob, indexed by (tenant_id, created_at desc) and trace_id.
pub struct PgTraceStore {
    pool: PgPool,
}

impl PgTraceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn store_err(err: sqlx::Error) -> TraceStoreError {
    TraceStoreError::StoreError(err.to_string())
}

#[async_trait]
impl TraceStore for PgTraceStore {
    async fn append(&self, trace: ExecutionTrace) -> Result<(), TraceStoreError> {
        let body = serde_json::to_value(&trace)
            .map_err(|err| TraceStoreError::StoreError(err.to_string()))?;
        let status = match trace.status {
            crate::schemas::TraceStatus::Ok => "ok",
            crate::schemas::TraceStatus::Error => "error",
            crate::schemas::TraceStatus::Partial => "partial",
        };
        sqlx::query(
            "INSERT INTO execution_trace \
             (trace_id, tenant_id, question, status, created_at, finished_at, duration_ms, body) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(trace.trace_id)
        .bind(&trace.tenant_id)
        .bind(&trace.question)
        .bind(status)
        .bind(trace.created_at)
        .bind(trace.finished_at)
        .bind(trace.duration_ms as i64)
        .bind(&body)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn get(&self, trace_id: Uuid) -> Result<Option<ExecutionTrace>, TraceStoreError> {
        let row = sqlx::query("SELECT body FROM execution_trace WHERE trace_id = $1")
            .bind(trace_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        match row {
            None => Ok(None),
            Some(row) => {
                let body: serde_json::Value = row.try_get("body").map_err(store_err)?;
                serde_json::from_value(body)
                    .map(Some)
                    .map_err(|err| TraceStoreError::StoreError(err.to_string()))
            }
        }
    }

    async fn search(&self, query: &TraceQuery) -> Result<Vec<ExecutionTrace>, TraceStoreError> {
        let limit = if query.limit == 0 { 50 } else { query.limit };
        let rows = sqlx::query(
            "SELECT body FROM execution_trace \
             WHERE ($1 = '' OR tenant_id = $1) \
               AND ($2 = '' OR question LIKE '%' || $2 || '%') \
               AND ($3::timestamptz IS NULL OR created_at >= $3) \
               AND ($4::timestamptz IS NULL OR created_at <= $4) \
             ORDER BY created_at DESC \
             LIMIT $5 OFFSET $6",
        )
        .bind(query.tenant_id.as_deref().unwrap_or(""))
        .bind(query.q.as_deref().unwrap_or(""))
        .bind(query.from)
        .bind(query.to)
        .bind(limit as i64)
        .bind(query.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                let body: serde_json::Value = row.try_get("body").map_err(store_err)?;
                serde_json::from_value(body)
                    .map_err(|err| TraceStoreError::StoreError(err.to_string()))
            })
            .collect()
    }
}
