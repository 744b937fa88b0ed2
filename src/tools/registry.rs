use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::registry::{AssetFilter, AssetRegistry};
use crate::schemas::{AssetKind, ToolKind};

use super::{ToolError, ToolSpec};

#[derive(Default)]
struct TenantTools {
    by_name: HashMap<String, Arc<ToolSpec>>,
    /// alias -> canonical tool name, built from each tool's alias list.
    aliases: HashMap<String, String>,
}

/// In-process view of all published tool assets, keyed by name with a
/// secondary alias table for planner-name rewriting. Populated lazily per
/// tenant; publish events invalidate it.
pub struct ToolRegistry {
    registry: Arc<AssetRegistry>,
    scope: String,
    tenants: RwLock<HashMap<String, Arc<TenantTools>>>,
}

impl ToolRegistry {
    pub fn new(registry: Arc<AssetRegistry>, scope: impl Into<String>) -> Self {
        Self {
            registry,
            scope: scope.into(),
            tenants: RwLock::new(HashMap::new()),
        }
    }

    async fn tenant_tools(&self, tenant_id: &str) -> Result<Arc<TenantTools>, ToolError> {
        if let Some(tools) = self.tenants.read().await.get(tenant_id) {
            return Ok(Arc::clone(tools));
        }
        let mut tenants = self.tenants.write().await;
        if let Some(tools) = tenants.get(tenant_id) {
            return Ok(Arc::clone(tools));
        }

        let filter = AssetFilter {
            kind: Some(AssetKind::Tool),
            scope: Some(self.scope.clone()),
            tenant_id: Some(tenant_id.to_string()),
            ..Default::default()
        };
        let assets = self
            .registry
            .list(&filter)
            .await
            .map_err(|err| ToolError::Ops(err.into()))?;

        let mut loaded = TenantTools::default();
        for asset in &assets {
            match ToolSpec::from_asset(asset) {
                Ok(spec) => {
                    for alias in &spec.aliases {
                        loaded
                            .aliases
                            .insert(normalize_tool_name(alias), spec.name.clone());
                    }
                    loaded.by_name.insert(spec.name.clone(), Arc::new(spec));
                }
                Err(err) => {
                    log::warn!("skipping malformed tool asset '{}': {err}", asset.name);
                }
            }
        }
        log::debug!(
            "tool registry loaded {} tools for tenant '{tenant_id}'",
            loaded.by_name.len()
        );
        let loaded = Arc::new(loaded);
        tenants.insert(tenant_id.to_string(), Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Canonicalizes a planner-produced tool name through the alias table.
    pub async fn resolve_name(&self, name: &str, tenant_id: &str) -> Result<String, ToolError> {
        let tools = self.tenant_tools(tenant_id).await?;
        let normalized = normalize_tool_name(name);
        if tools.by_name.contains_key(&normalized) {
            return Ok(normalized);
        }
        tools
            .aliases
            .get(&normalized)
            .cloned()
            .ok_or(ToolError::ToolNotFound(normalized))
    }

    pub async fn get(&self, name: &str, tenant_id: &str) -> Result<Arc<ToolSpec>, ToolError> {
        let tools = self.tenant_tools(tenant_id).await?;
        let canonical = match tools.by_name.get(&normalize_tool_name(name)) {
            Some(spec) => return Ok(Arc::clone(spec)),
            None => tools
                .aliases
                .get(&normalize_tool_name(name))
                .cloned()
                .ok_or_else(|| ToolError::ToolNotFound(name.to_string()))?,
        };
        tools
            .by_name
            .get(&canonical)
            .cloned()
            .ok_or(ToolError::ToolNotFound(canonical))
    }

    pub async fn exists(&self, name: &str, tenant_id: &str) -> bool {
        self.get(name, tenant_id).await.is_ok()
    }

    pub async fn list_by_kind(
        &self,
        kind: ToolKind,
        tenant_id: &str,
    ) -> Result<Vec<Arc<ToolSpec>>, ToolError> {
        let tools = self.tenant_tools(tenant_id).await?;
        Ok(tools
            .by_name
            .values()
            .filter(|spec| spec.kind == kind)
            .cloned()
            .collect())
    }

    pub async fn list_names(&self, tenant_id: &str) -> Result<Vec<String>, ToolError> {
        let tools = self.tenant_tools(tenant_id).await?;
        let mut names: Vec<String> = tools.by_name.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Drops the cached view; the next lookup reloads from published
    /// assets.
    pub async fn invalidate(&self) {
        self.tenants.write().await.clear();
        log::debug!("tool registry invalidated");
    }
}

/// Tool names are matched case-insensitively with spaces collapsed to
/// underscores, the way planner output tends to arrive.
pub fn normalize_tool_name(name: &str) -> String {
    name.trim().to_lowercase().replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryAssetStore;
    use crate::schemas::AssetDraft;
    use serde_json::json;

    async fn seeded_registry() -> ToolRegistry {
        let registry = Arc::new(AssetRegistry::new(Arc::new(MemoryAssetStore::new())));
        let draft = registry
            .create_draft(
                AssetDraft {
                    kind: AssetKind::Tool,
                    name: "ci.aggregate_count".into(),
                    scope: "ops".into(),
                    tenant_id: "t1".into(),
                    content: json!({
                        "source_ref": "primary_postgres",
                        "query_ref": "ci_aggregate_count",
                        "aliases": ["ci", "ci count"]
                    }),
                    tool_type: Some(ToolKind::DatabaseQuery),
                    is_system: false,
                    description: "Counts configuration items".into(),
                    tags: Default::default(),
                },
                "system",
            )
            .await
            .unwrap();
        registry.publish(draft.id, "system").await.unwrap();
        ToolRegistry::new(registry, "ops")
    }

    #[tokio::test]
    async fn lookup_by_name_and_alias() {
        let tools = seeded_registry().await;
        let by_name = tools.get("ci.aggregate_count", "t1").await.unwrap();
        assert_eq!(by_name.kind, ToolKind::DatabaseQuery);

        let by_alias = tools.get("CI Count", "t1").await.unwrap();
        assert_eq!(by_alias.name, "ci.aggregate_count");

        assert_eq!(
            tools.resolve_name("ci", "t1").await.unwrap(),
            "ci.aggregate_count"
        );
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let tools = seeded_registry().await;
        assert!(matches!(
            tools.get("nonexistent", "t1").await,
            Err(ToolError::ToolNotFound(_))
        ));
        assert!(!tools.exists("nonexistent", "t1").await);
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let tools = seeded_registry().await;
        assert!(tools.exists("ci.aggregate_count", "t1").await);
        assert!(!tools.exists("ci.aggregate_count", "t2").await);
    }

    #[test]
    fn name_normalization() {
        assert_eq!(normalize_tool_name("  CI Count "), "ci_count");
    }
}
