use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

/// One asked question and how it went, linked to its trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHistoryEntry {
    pub question: String,
    pub tenant_id: String,
    pub plan_summary: Value,
    pub result_summary: Value,
    pub trace_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Query-history persistence. Failures here never fail the request; the
/// runner logs and moves on.
#[async_trait]
pub trait QueryHistoryStore: Send + Sync {
    async fn append(&self, entry: QueryHistoryEntry);

    async fn recent(&self, tenant_id: &str, limit: usize) -> Vec<QueryHistoryEntry>;
}

#[derive(Debug, Default)]
pub struct MemoryQueryHistoryStore {
    entries: RwLock<Vec<QueryHistoryEntry>>,
}

#[async_trait]
impl QueryHistoryStore for MemoryQueryHistoryStore {
    async fn append(&self, entry: QueryHistoryEntry) {
        self.entries.write().await.push(entry);
    }

    async fn recent(&self, tenant_id: &str, limit: usize) -> Vec<QueryHistoryEntry> {
        let entries = self.entries.read().await;
        let mut found: Vec<QueryHistoryEntry> = entries
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        found.truncate(limit);
        found
    }
}
