use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::registry::{AssetFilter, AssetRegistry};
use crate::schemas::{Asset, AssetKind, ToolKind};

use super::safety::{validate_reader_cypher, validate_reader_sql};
use super::{bind_named, BoundStatement, EmptyGuard, QueryError};

/// Wire shape of a query asset's content payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct QueryContent {
    statement: String,
    tool_type: ToolKind,
    operation: String,
    #[serde(default)]
    source_ref: Option<String>,
    #[serde(default)]
    empty_guards: Vec<EmptyGuard>,
}

/// A named query asset resolved to its executable parts.
#[derive(Debug, Clone)]
pub struct ResolvedQuery {
    pub name: String,
    pub statement: String,
    pub tool_type: ToolKind,
    pub operation: String,
    pub source_ref: Option<String>,
    pub empty_guards: Vec<EmptyGuard>,
}

impl ResolvedQuery {
    fn from_asset(asset: &Asset) -> Result<Self, QueryError> {
        let content: QueryContent = serde_json::from_value(asset.content.clone())
            .map_err(|err| QueryError::MalformedAsset(asset.name.clone(), err.to_string()))?;
        Ok(Self {
            name: asset.name.clone(),
            statement: content.statement,
            tool_type: content.tool_type,
            operation: content.operation,
            source_ref: content.source_ref,
            empty_guards: content.empty_guards,
        })
    }

    /// Forbidden-keyword inspection for the tool kind this query serves.
    fn check_safety(&self) -> Result<(), QueryError> {
        let violations = match self.tool_type {
            ToolKind::GraphQuery => validate_reader_cypher(&self.statement),
            _ => validate_reader_sql(&self.statement),
        };
        if violations.is_empty() {
            Ok(())
        } else {
            Err(QueryError::SqlBlocked(violations))
        }
    }

    /// Binds parameters into a positional statement, after the safety gate.
    pub fn bind(
        &self,
        params: &Map<String, serde_json::Value>,
    ) -> Result<BoundStatement, QueryError> {
        self.check_safety()?;
        bind_named(&self.statement, params, &self.empty_guards)
    }
}

/// Resolves named query assets to executable statements.
pub struct QueryResolver {
    registry: Arc<AssetRegistry>,
    scope: String,
}

impl QueryResolver {
    pub fn new(registry: Arc<AssetRegistry>, scope: impl Into<String>) -> Self {
        Self {
            registry,
            scope: scope.into(),
        }
    }

    /// Resolves a query asset by name.
    pub async fn resolve(
        &self,
        query_ref: &str,
        tenant_id: &str,
    ) -> Result<ResolvedQuery, QueryError> {
        let asset = self
            .registry
            .get(AssetKind::Query, &self.scope, query_ref, tenant_id)
            .await?
            .ok_or_else(|| QueryError::QueryNotFound(query_ref.to_string()))?;
        ResolvedQuery::from_asset(&asset)
    }

    /// Selects the query asset whose metadata matches `(tool_type,
    /// operation)`.
    pub async fn resolve_by_operation(
        &self,
        tool_type: ToolKind,
        operation: &str,
        tenant_id: &str,
    ) -> Result<ResolvedQuery, QueryError> {
        let filter = AssetFilter {
            kind: Some(AssetKind::Query),
            scope: Some(self.scope.clone()),
            tenant_id: Some(tenant_id.to_string()),
            ..Default::default()
        };
        for asset in self.registry.list(&filter).await? {
            if let Ok(resolved) = ResolvedQuery::from_asset(&asset) {
                if resolved.tool_type == tool_type && resolved.operation == operation {
                    return Ok(resolved);
                }
            }
        }
        Err(QueryError::QueryNotFound(format!(
            "{}/{operation}",
            tool_type.as_str()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryAssetStore;
    use crate::schemas::AssetDraft;
    use serde_json::json;

    async fn registry_with_query(content: serde_json::Value) -> Arc<AssetRegistry> {
        let registry = Arc::new(AssetRegistry::new(Arc::new(MemoryAssetStore::new())));
        let draft = registry
            .create_draft(
                AssetDraft {
                    kind: AssetKind::Query,
                    name: "ci_aggregate_count".into(),
                    scope: "ops".into(),
                    tenant_id: "t1".into(),
                    content,
                    tool_type: Some(ToolKind::DatabaseQuery),
                    is_system: false,
                    description: String::new(),
                    tags: Default::default(),
                },
                "system",
            )
            .await
            .unwrap();
        registry.publish(draft.id, "system").await.unwrap();
        registry
    }

    #[tokio::test]
    async fn resolves_and_binds_by_name() {
        let registry = registry_with_query(json!({
            "statement": "SELECT count(*) AS total FROM ci WHERE tenant_id = {tenant_id}",
            "tool_type": "database_query",
            "operation": "aggregate_count",
            "source_ref": "primary_postgres"
        }))
        .await;
        let resolver = QueryResolver::new(registry, "ops");

        let resolved = resolver.resolve("ci_aggregate_count", "t1").await.unwrap();
        assert_eq!(resolved.operation, "aggregate_count");

        let mut params = Map::new();
        params.insert("tenant_id".into(), json!("t1"));
        let bound = resolved.bind(&params).unwrap();
        assert_eq!(
            bound.sql,
            "SELECT count(*) AS total FROM ci WHERE tenant_id = $1"
        );
    }

    #[tokio::test]
    async fn resolves_by_tool_type_and_operation() {
        let registry = registry_with_query(json!({
            "statement": "SELECT count(*) FROM ci",
            "tool_type": "database_query",
            "operation": "aggregate_count"
        }))
        .await;
        let resolver = QueryResolver::new(registry, "ops");

        let resolved = resolver
            .resolve_by_operation(ToolKind::DatabaseQuery, "aggregate_count", "t1")
            .await
            .unwrap();
        assert_eq!(resolved.name, "ci_aggregate_count");

        let missing = resolver
            .resolve_by_operation(ToolKind::GraphQuery, "aggregate_count", "t1")
            .await;
        assert!(matches!(missing, Err(QueryError::QueryNotFound(_))));
    }

    #[tokio::test]
    async fn dangerous_statement_blocked_at_bind() {
        let registry = registry_with_query(json!({
            "statement": "DELETE FROM ci WHERE tenant_id = {tenant_id}",
            "tool_type": "database_query",
            "operation": "cleanup"
        }))
        .await;
        let resolver = QueryResolver::new(registry, "ops");
        let resolved = resolver.resolve("ci_aggregate_count", "t1").await.unwrap();

        let mut params = Map::new();
        params.insert("tenant_id".into(), json!("t1"));
        assert!(matches!(
            resolved.bind(&params),
            Err(QueryError::SqlBlocked(_))
        ));
    }
}
