use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::schemas::{Asset, AssetIdentity, AssetKind, AssetStatus, AuditEvent, VersionSnapshot};

use super::{AssetFilter, AssetStore, RegistryError};

/// In-memory asset store used in mock mode and tests. Mirrors the
/// transactional semantics of the Postgres store under a single write lock.
#[derive(Debug, Default)]
pub struct MemoryAssetStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    assets: HashMap<Uuid, Asset>,
    history: Vec<VersionSnapshot>,
    audit: Vec<AuditEvent>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_filter(asset: &Asset, filter: &AssetFilter) -> bool {
    if let Some(kind) = filter.kind {
        if asset.kind != kind {
            return false;
        }
    }
    if let Some(scope) = &filter.scope {
        if &asset.scope != scope {
            return false;
        }
    }
    if let Some(tenant) = &filter.tenant_id {
        if &asset.tenant_id != tenant {
            return false;
        }
    }
    if let Some(fragment) = &filter.name_contains {
        if !asset.name.contains(fragment.as_str()) {
            return false;
        }
    }
    true
}

#[async_trait]
impl AssetStore for MemoryAssetStore {
    async fn insert(&self, asset: Asset) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if inner.assets.contains_key(&asset.id) {
            return Err(RegistryError::Conflict(format!(
                "asset id {} already exists",
                asset.id
            )));
        }
        inner.assets.insert(asset.id, asset);
        Ok(())
    }

    async fn update(&self, asset: Asset) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        if !inner.assets.contains_key(&asset.id) {
            return Err(RegistryError::NotFound(asset.id.to_string()));
        }
        inner.assets.insert(asset.id, asset);
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Asset>, RegistryError> {
        Ok(self.inner.read().await.assets.get(&id).cloned())
    }

    async fn find_published(
        &self,
        identity: &AssetIdentity,
    ) -> Result<Option<Asset>, RegistryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .assets
            .values()
            .find(|asset| asset.status == AssetStatus::Published && &asset.identity() == identity)
            .cloned())
    }

    async fn list_published(&self, filter: &AssetFilter) -> Result<Vec<Asset>, RegistryError> {
        let inner = self.inner.read().await;
        let mut found: Vec<Asset> = inner
            .assets
            .values()
            .filter(|asset| asset.status == AssetStatus::Published && matches_filter(asset, filter))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(found)
    }

    async fn max_version(&self, identity: &AssetIdentity) -> Result<i64, RegistryError> {
        let inner = self.inner.read().await;
        Ok(inner
            .assets
            .values()
            .filter(|asset| &asset.identity() == identity)
            .map(|asset| asset.version)
            .max()
            .unwrap_or(0))
    }

    async fn publish_swap(
        &self,
        draft: Asset,
        snapshot: VersionSnapshot,
    ) -> Result<Asset, RegistryError> {
        let mut inner = self.inner.write().await;
        let identity = draft.identity();

        let prior_id = inner
            .assets
            .values()
            .find(|asset| asset.status == AssetStatus::Published && asset.identity() == identity)
            .map(|asset| asset.id);
        if let Some(id) = prior_id {
            if let Some(prior) = inner.assets.get_mut(&id) {
                prior.status = AssetStatus::Archived;
            }
        }

        let mut published = draft;
        published.status = AssetStatus::Published;
        inner.assets.insert(published.id, published.clone());
        inner.history.push(snapshot);
        Ok(published)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RegistryError> {
        let mut inner = self.inner.write().await;
        inner
            .assets
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    async fn history(
        &self,
        identity: &AssetIdentity,
    ) -> Result<Vec<VersionSnapshot>, RegistryError> {
        let inner = self.inner.read().await;
        let mut snapshots: Vec<VersionSnapshot> = inner
            .history
            .iter()
            .filter(|snapshot| &snapshot.identity == identity)
            .cloned()
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.version);
        Ok(snapshots)
    }

    async fn append_audit(&self, event: AuditEvent) -> Result<(), RegistryError> {
        self.inner.write().await.audit.push(event);
        Ok(())
    }

    async fn audit_log(
        &self,
        resource_kind: Option<AssetKind>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, RegistryError> {
        let inner = self.inner.read().await;
        let mut events: Vec<AuditEvent> = inner
            .audit
            .iter()
            .filter(|event| resource_kind.map_or(true, |kind| event.resource_kind == kind))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        events.truncate(limit);
        Ok(events)
    }
}
