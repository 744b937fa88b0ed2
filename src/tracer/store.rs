use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{ErrorCode, OpsError};
use crate::schemas::ExecutionTrace;

#[derive(Error, Debug)]
pub enum TraceStoreError {
    #[error("Trace not found: {0}")]
    NotFound(Uuid),

    #[error("Trace {0} is already finished")]
    AlreadyFinished(Uuid),

    #[error("Store error: {0}")]
    StoreError(String),
}

impl From<TraceStoreError> for OpsError {
    fn from(err: TraceStoreError) -> Self {
        let code = match &err {
            TraceStoreError::NotFound(_) => ErrorCode::NotFound,
            TraceStoreError::AlreadyFinished(_) => ErrorCode::Conflict,
            TraceStoreError::StoreError(_) => ErrorCode::InternalError,
        };
        OpsError::new(code, err.to_string())
    }
}

/// Search filter for the inspector surface.
#[derive(Debug, Clone, Default)]
pub struct TraceQuery {
    pub tenant_id: Option<String>,
    /// Substring match against the question text.
    pub q: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

/// Append-only persistence for finished traces.
#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn append(&self, trace: ExecutionTrace) -> Result<(), TraceStoreError>;

    async fn get(&self, trace_id: Uuid) -> Result<Option<ExecutionTrace>, TraceStoreError>;

    /// Most recent first.
    async fn search(&self, query: &TraceQuery) -> Result<Vec<ExecutionTrace>, TraceStoreError>;
}

/// In-memory trace store for tests and mock mode.
#[derive(Debug, Default)]
pub struct MemoryTraceStore {
    traces: RwLock<Vec<ExecutionTrace>>,
}

impl MemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TraceStore for MemoryTraceStore {
    async fn append(&self, trace: ExecutionTrace) -> Result<(), TraceStoreError> {
        let mut traces = self.traces.write().await;
        if traces.iter().any(|existing| existing.trace_id == trace.trace_id) {
            return Err(TraceStoreError::AlreadyFinished(trace.trace_id));
        }
        traces.push(trace);
        Ok(())
    }

    async fn get(&self, trace_id: Uuid) -> Result<Option<ExecutionTrace>, TraceStoreError> {
        Ok(self
            .traces
            .read()
            .await
            .iter()
            .find(|trace| trace.trace_id == trace_id)
            .cloned())
    }

    async fn search(&self, query: &TraceQuery) -> Result<Vec<ExecutionTrace>, TraceStoreError> {
        let traces = self.traces.read().await;
        let mut found: Vec<ExecutionTrace> = traces
            .iter()
            .filter(|trace| {
                query
                    .tenant_id
                    .as_ref()
                    .map_or(true, |tenant| &trace.tenant_id == tenant)
                    && query
                        .q
                        .as_ref()
                        .map_or(true, |needle| trace.question.contains(needle.as_str()))
                    && query.from.map_or(true, |from| trace.created_at >= from)
                    && query.to.map_or(true, |to| trace.created_at <= to)
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let limit = if query.limit == 0 { 50 } else { query.limit };
        Ok(found.into_iter().skip(query.offset).take(limit).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::TraceStatus;
    use crate::tracer::TraceBuilder;

    fn finished(tenant: &str, question: &str) -> ExecutionTrace {
        TraceBuilder::start(tenant, question).finish(TraceStatus::Ok)
    }

    #[tokio::test]
    async fn append_and_get_round_trip() {
        let store = MemoryTraceStore::new();
        let trace = finished("t1", "total CIs");
        let id = trace.trace_id;
        store.append(trace).await.unwrap();

        let found = store.get(id).await.unwrap().unwrap();
        assert_eq!(found.question, "total CIs");
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn double_append_is_rejected() {
        let store = MemoryTraceStore::new();
        let trace = finished("t1", "q");
        store.append(trace.clone()).await.unwrap();
        assert!(matches!(
            store.append(trace).await,
            Err(TraceStoreError::AlreadyFinished(_))
        ));
    }

    #[tokio::test]
    async fn search_filters_by_tenant_and_text() {
        let store = MemoryTraceStore::new();
        store.append(finished("t1", "cpu of srv-1")).await.unwrap();
        store.append(finished("t1", "memory of srv-2")).await.unwrap();
        store.append(finished("t2", "cpu of srv-9")).await.unwrap();

        let query = TraceQuery {
            tenant_id: Some("t1".into()),
            q: Some("cpu".into()),
            ..Default::default()
        };
        let found = store.search(&query).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].question, "cpu of srv-1");
    }

    #[tokio::test]
    async fn search_paginates_newest_first() {
        let store = MemoryTraceStore::new();
        for index in 0..5 {
            store
                .append(finished("t1", &format!("question {index}")))
                .await
                .unwrap();
        }
        let page = store
            .search(&TraceQuery {
                tenant_id: Some("t1".into()),
                limit: 2,
                offset: 1,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
    }
}
