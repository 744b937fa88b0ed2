use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::schemas::AssetKind;

use serde_json::Value;

use super::policies::{
    BudgetPolicy, KeywordMappings, PlannerDefaults, RelationAllowlist, ViewDepthPolicy,
    DISCOVERY_CONFIG_ASSET, PLANNER_DEFAULTS_ASSET, PLANNER_KEYWORDS_ASSET, PLAN_BUDGET_ASSET,
    RELATION_ALLOWLIST_ASSET, VIEW_DEPTH_ASSET,
};
use super::{AssetRegistry, RegistryError};

/// Per-tenant lazy cache over one parsed asset. Filled on first read under
/// its own lock, then served from the map; emptied only by an explicit
/// invalidate.
struct LazyCache<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> LazyCache<T> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    async fn get_or_load<F, Fut>(&self, tenant_id: &str, load: F) -> Result<Arc<T>, RegistryError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, RegistryError>>,
    {
        if let Some(entry) = self.entries.read().await.get(tenant_id) {
            return Ok(Arc::clone(entry));
        }
        // Fill under the write lock: a racing reader either sees the fresh
        // entry or loads the same published content.
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get(tenant_id) {
            return Ok(Arc::clone(entry));
        }
        let value = Arc::new(load().await?);
        entries.insert(tenant_id.to_string(), Arc::clone(&value));
        Ok(value)
    }

    async fn invalidate(&self) {
        self.entries.write().await.clear();
    }
}

/// Lazily-filled, explicitly-invalidated caches for the policy and mapping
/// assets consumed on every request. Each cache has its own lock; no lock
/// spans two caches.
pub struct RegistryCaches {
    registry: Arc<AssetRegistry>,
    scope: String,
    budget: LazyCache<BudgetPolicy>,
    view_depth: LazyCache<ViewDepthPolicy>,
    keywords: LazyCache<KeywordMappings>,
    planner_defaults: LazyCache<PlannerDefaults>,
    relation_allowlist: LazyCache<RelationAllowlist>,
    discovery: LazyCache<Value>,
}

impl RegistryCaches {
    pub fn new(registry: Arc<AssetRegistry>, scope: impl Into<String>) -> Self {
        Self {
            registry,
            scope: scope.into(),
            budget: LazyCache::new(),
            view_depth: LazyCache::new(),
            keywords: LazyCache::new(),
            planner_defaults: LazyCache::new(),
            relation_allowlist: LazyCache::new(),
            discovery: LazyCache::new(),
        }
    }

    /// Required system policy; a missing asset is a hard error.
    pub async fn budget_policy(&self, tenant_id: &str) -> Result<Arc<BudgetPolicy>, RegistryError> {
        self.budget
            .get_or_load(tenant_id, || async {
                let asset = self
                    .registry
                    .get_required(AssetKind::Policy, &self.scope, PLAN_BUDGET_ASSET, tenant_id)
                    .await?;
                BudgetPolicy::from_asset(&asset)
            })
            .await
    }

    /// Required system policy; a missing asset is a hard error.
    pub async fn view_depth_policy(
        &self,
        tenant_id: &str,
    ) -> Result<Arc<ViewDepthPolicy>, RegistryError> {
        self.view_depth
            .get_or_load(tenant_id, || async {
                let asset = self
                    .registry
                    .get_required(AssetKind::Policy, &self.scope, VIEW_DEPTH_ASSET, tenant_id)
                    .await?;
                ViewDepthPolicy::from_asset(&asset)
            })
            .await
    }

    /// Optional mapping; absent means an empty mapping.
    pub async fn keyword_mappings(
        &self,
        tenant_id: &str,
    ) -> Result<Arc<KeywordMappings>, RegistryError> {
        self.keywords
            .get_or_load(tenant_id, || async {
                match self
                    .registry
                    .get(
                        AssetKind::Mapping,
                        &self.scope,
                        PLANNER_KEYWORDS_ASSET,
                        tenant_id,
                    )
                    .await?
                {
                    Some(asset) => KeywordMappings::from_asset(&asset),
                    None => Ok(KeywordMappings::default()),
                }
            })
            .await
    }

    /// Optional mapping; absent means built-in priorities and threshold.
    pub async fn planner_defaults(
        &self,
        tenant_id: &str,
    ) -> Result<Arc<PlannerDefaults>, RegistryError> {
        self.planner_defaults
            .get_or_load(tenant_id, || async {
                match self
                    .registry
                    .get(
                        AssetKind::Mapping,
                        &self.scope,
                        PLANNER_DEFAULTS_ASSET,
                        tenant_id,
                    )
                    .await?
                {
                    Some(asset) => PlannerDefaults::from_asset(&asset),
                    None => Ok(PlannerDefaults::default()),
                }
            })
            .await
    }

    /// Optional mapping; absent means no per-view restriction.
    pub async fn relation_allowlist(
        &self,
        tenant_id: &str,
    ) -> Result<Arc<RelationAllowlist>, RegistryError> {
        self.relation_allowlist
            .get_or_load(tenant_id, || async {
                match self
                    .registry
                    .get(
                        AssetKind::Mapping,
                        &self.scope,
                        RELATION_ALLOWLIST_ASSET,
                        tenant_id,
                    )
                    .await?
                {
                    Some(asset) => RelationAllowlist::from_asset(&asset),
                    None => Ok(RelationAllowlist::default()),
                }
            })
            .await
    }

    /// Required system policy consumed by the discovery collaborator; kept
    /// opaque here, a missing asset is still a hard error.
    pub async fn discovery_config(&self, tenant_id: &str) -> Result<Arc<Value>, RegistryError> {
        self.discovery
            .get_or_load(tenant_id, || async {
                let asset = self
                    .registry
                    .get_required(
                        AssetKind::Policy,
                        &self.scope,
                        DISCOVERY_CONFIG_ASSET,
                        tenant_id,
                    )
                    .await?;
                Ok(asset.content)
            })
            .await
    }

    /// Drops every cached entry. Called on publish and on the explicit
    /// reload signal.
    pub async fn invalidate_all(&self) {
        self.budget.invalidate().await;
        self.view_depth.invalidate().await;
        self.keywords.invalidate().await;
        self.planner_defaults.invalidate().await;
        self.relation_allowlist.invalidate().await;
        self.discovery.invalidate().await;
        log::debug!("registry caches invalidated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryAssetStore;
    use crate::schemas::AssetDraft;
    use serde_json::json;

    async fn seeded() -> (Arc<AssetRegistry>, RegistryCaches) {
        let registry = Arc::new(AssetRegistry::new(Arc::new(MemoryAssetStore::new())));
        let draft = registry
            .create_draft(
                AssetDraft {
                    kind: AssetKind::Policy,
                    name: PLAN_BUDGET_ASSET.into(),
                    scope: "ops".into(),
                    tenant_id: "t1".into(),
                    content: json!({
                        "max_steps": 5,
                        "overall_timeout_secs": 60,
                        "max_graph_depth": 3,
                        "max_parallel": 2
                    }),
                    tool_type: None,
                    is_system: true,
                    description: String::new(),
                    tags: Default::default(),
                },
                "system",
            )
            .await
            .unwrap();
        registry.publish(draft.id, "system").await.unwrap();
        let caches = RegistryCaches::new(Arc::clone(&registry), "ops");
        (registry, caches)
    }

    #[tokio::test]
    async fn budget_policy_cached_until_invalidated() {
        let (_registry, caches) = seeded().await;
        let first = caches.budget_policy("t1").await.unwrap();
        let second = caches.budget_policy("t1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.max_steps, 5);

        caches.invalidate_all().await;
        let third = caches.budget_policy("t1").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn missing_required_policy_is_hard_error() {
        let (_registry, caches) = seeded().await;
        assert!(matches!(
            caches.view_depth_policy("t1").await,
            Err(RegistryError::MissingSystemAsset(_))
        ));
    }

    #[tokio::test]
    async fn missing_optional_mapping_yields_default() {
        let (_registry, caches) = seeded().await;
        let keywords = caches.keyword_mappings("t1").await.unwrap();
        assert!(keywords.metric_aliases.is_empty());
    }
}
