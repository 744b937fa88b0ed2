use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::schemas::{
    Asset, AssetDraft, AssetIdentity, AssetKind, AssetPatch, AssetStatus, AuditAction, AuditEvent,
    VersionSnapshot,
};
use crate::source::validate_source_for_publication;
use crate::tools::validator::validate_tool_for_publication;

use super::{AssetFilter, AssetStore, RegistryError};

/// Policy assets the orchestrator refuses to run without. Reads of these
/// never fall back to hard-coded defaults.
pub const REQUIRED_SYSTEM_ASSETS: [&str; 3] = ["plan_budget", "view_depth", "discovery_config"];

/// The versioned configuration store behind every orchestrator decision.
/// Owns all assets; hands out immutable snapshots.
pub struct AssetRegistry {
    store: Arc<dyn AssetStore>,
}

impl AssetRegistry {
    pub fn new(store: Arc<dyn AssetStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    /// Returns the single published asset for the identity, or None.
    pub async fn get(
        &self,
        kind: AssetKind,
        scope: &str,
        name: &str,
        tenant_id: &str,
    ) -> Result<Option<Asset>, RegistryError> {
        self.store
            .find_published(&AssetIdentity {
                kind,
                scope: scope.to_string(),
                name: name.to_string(),
                tenant_id: tenant_id.to_string(),
            })
            .await
    }

    /// Like `get`, but a missing asset is a hard configuration error. Used
    /// for the system policies the orchestrator cannot run without.
    pub async fn get_required(
        &self,
        kind: AssetKind,
        scope: &str,
        name: &str,
        tenant_id: &str,
    ) -> Result<Asset, RegistryError> {
        self.get(kind, scope, name, tenant_id)
            .await?
            .ok_or_else(|| RegistryError::MissingSystemAsset(format!("{kind}/{scope}/{name}")))
    }

    pub async fn list(&self, filter: &AssetFilter) -> Result<Vec<Asset>, RegistryError> {
        self.store.list_published(filter).await
    }

    /// Creates a new draft with the next version for its identity.
    pub async fn create_draft(
        &self,
        draft: AssetDraft,
        actor: &str,
    ) -> Result<Asset, RegistryError> {
        let identity = AssetIdentity {
            kind: draft.kind,
            scope: draft.scope.clone(),
            name: draft.name.clone(),
            tenant_id: draft.tenant_id.clone(),
        };
        let version = self.store.max_version(&identity).await? + 1;
        let asset = Asset {
            id: Uuid::new_v4(),
            kind: draft.kind,
            name: draft.name,
            scope: draft.scope,
            version,
            status: AssetStatus::Draft,
            tenant_id: draft.tenant_id,
            content: draft.content,
            tool_type: draft.tool_type,
            is_system: draft.is_system,
            description: draft.description,
            tags: draft.tags,
            created_by: actor.to_string(),
            created_at: Utc::now(),
            published_by: None,
            published_at: None,
        };
        self.store.insert(asset.clone()).await?;
        log::debug!(
            "created draft {} v{} ({})",
            asset.identity(),
            asset.version,
            asset.id
        );
        Ok(asset)
    }

    /// Applies a sparse patch to a draft. Published and archived rows are
    /// immutable.
    pub async fn update_draft(
        &self,
        asset_id: Uuid,
        patch: AssetPatch,
        _actor: &str,
    ) -> Result<Asset, RegistryError> {
        let mut asset = self
            .store
            .get_by_id(asset_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(asset_id.to_string()))?;
        if asset.status != AssetStatus::Draft {
            return Err(RegistryError::NotADraft(asset_id.to_string()));
        }
        if let Some(content) = patch.content {
            asset.content = content;
        }
        if let Some(description) = patch.description {
            asset.description = description;
        }
        if let Some(tags) = patch.tags {
            asset.tags = tags;
        }
        self.store.update(asset.clone()).await?;
        Ok(asset)
    }

    /// Publishes a draft: safety validation for tools and sources, then the
    /// atomic archive-prior/promote/snapshot swap, then the audit event.
    pub async fn publish(&self, asset_id: Uuid, actor: &str) -> Result<Asset, RegistryError> {
        let mut draft = self
            .store
            .get_by_id(asset_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(asset_id.to_string()))?;
        if draft.status != AssetStatus::Draft {
            return Err(RegistryError::NotADraft(asset_id.to_string()));
        }

        let reasons = match draft.kind {
            AssetKind::Tool => validate_tool_for_publication(&draft),
            AssetKind::Source => validate_source_for_publication(&draft),
            _ => Vec::new(),
        };
        if !reasons.is_empty() {
            return Err(RegistryError::PublicationBlocked {
                identity: draft.identity(),
                reasons,
            });
        }

        let now = Utc::now();
        draft.published_by = Some(actor.to_string());
        draft.published_at = Some(now);

        let snapshot = VersionSnapshot {
            asset_id: draft.id,
            identity: draft.identity(),
            version: draft.version,
            content: draft.content.clone(),
            published_by: actor.to_string(),
            published_at: now,
        };
        let published = self.store.publish_swap(draft, snapshot).await?;

        self.store
            .append_audit(AuditEvent {
                actor: actor.to_string(),
                action: AuditAction::Publish,
                resource_kind: published.kind,
                resource_name: published.name.clone(),
                tenant_id: published.tenant_id.clone(),
                detail: Some(serde_json::json!({"version": published.version})),
                created_at: now,
            })
            .await?;
        log::info!(
            "published {} v{} by {}",
            published.identity(),
            published.version,
            actor
        );
        Ok(published)
    }

    /// Republishes a historical version unchanged, as a new version.
    pub async fn rollback(
        &self,
        asset_id: Uuid,
        target_version: i64,
        actor: &str,
    ) -> Result<Asset, RegistryError> {
        let current = self
            .store
            .get_by_id(asset_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(asset_id.to_string()))?;
        let identity = current.identity();

        let snapshot = self
            .store
            .history(&identity)
            .await?
            .into_iter()
            .find(|snapshot| snapshot.version == target_version)
            .ok_or(RegistryError::VersionNotFound {
                identity: identity.clone(),
                version: target_version,
            })?;

        let draft = self
            .create_draft(
                AssetDraft {
                    kind: current.kind,
                    name: current.name.clone(),
                    scope: current.scope.clone(),
                    tenant_id: current.tenant_id.clone(),
                    content: snapshot.content,
                    tool_type: current.tool_type,
                    is_system: current.is_system,
                    description: current.description.clone(),
                    tags: current.tags.clone(),
                },
                actor,
            )
            .await?;
        let published = self.publish(draft.id, actor).await?;

        self.store
            .append_audit(AuditEvent {
                actor: actor.to_string(),
                action: AuditAction::Rollback,
                resource_kind: published.kind,
                resource_name: published.name.clone(),
                tenant_id: published.tenant_id.clone(),
                detail: Some(serde_json::json!({
                    "restored_version": target_version,
                    "new_version": published.version,
                })),
                created_at: Utc::now(),
            })
            .await?;
        Ok(published)
    }

    /// Deletes a draft. System assets and non-drafts are protected.
    pub async fn delete_draft(&self, asset_id: Uuid, actor: &str) -> Result<(), RegistryError> {
        let asset = self
            .store
            .get_by_id(asset_id)
            .await?
            .ok_or_else(|| RegistryError::NotFound(asset_id.to_string()))?;
        if asset.is_system {
            return Err(RegistryError::SystemAssetProtected(asset.name));
        }
        if asset.status != AssetStatus::Draft {
            return Err(RegistryError::NotADraft(asset_id.to_string()));
        }
        self.store.delete(asset_id).await?;
        self.store
            .append_audit(AuditEvent {
                actor: actor.to_string(),
                action: AuditAction::Delete,
                resource_kind: asset.kind,
                resource_name: asset.name,
                tenant_id: asset.tenant_id,
                detail: None,
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }

    pub async fn history(
        &self,
        kind: AssetKind,
        scope: &str,
        name: &str,
        tenant_id: &str,
    ) -> Result<Vec<VersionSnapshot>, RegistryError> {
        self.store
            .history(&AssetIdentity {
                kind,
                scope: scope.to_string(),
                name: name.to_string(),
                tenant_id: tenant_id.to_string(),
            })
            .await
    }

    pub async fn audit_log(
        &self,
        resource_kind: Option<AssetKind>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, RegistryError> {
        self.store.audit_log(resource_kind, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MemoryAssetStore;
    use serde_json::json;

    fn registry() -> AssetRegistry {
        AssetRegistry::new(Arc::new(MemoryAssetStore::new()))
    }

    fn prompt_draft(name: &str) -> AssetDraft {
        AssetDraft {
            kind: AssetKind::Prompt,
            name: name.into(),
            scope: "ops".into(),
            tenant_id: "t1".into(),
            content: json!({"system": "You answer infrastructure questions."}),
            tool_type: None,
            is_system: false,
            description: String::new(),
            tags: Default::default(),
        }
    }

    #[tokio::test]
    async fn publish_then_get_returns_published_version() {
        let registry = registry();
        let draft = registry
            .create_draft(prompt_draft("planner"), "alice")
            .await
            .unwrap();
        assert_eq!(draft.version, 1);

        let published = registry.publish(draft.id, "alice").await.unwrap();
        assert_eq!(published.status, AssetStatus::Published);

        let found = registry
            .get(AssetKind::Prompt, "ops", "planner", "t1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.version, 1);
        assert_eq!(found.published_by.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn at_most_one_published_per_identity() {
        let registry = registry();
        let first = registry
            .create_draft(prompt_draft("planner"), "alice")
            .await
            .unwrap();
        registry.publish(first.id, "alice").await.unwrap();

        let second = registry
            .create_draft(prompt_draft("planner"), "bob")
            .await
            .unwrap();
        assert_eq!(second.version, 2);
        registry.publish(second.id, "bob").await.unwrap();

        let filter = AssetFilter {
            kind: Some(AssetKind::Prompt),
            tenant_id: Some("t1".into()),
            ..Default::default()
        };
        let published = registry.list(&filter).await.unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].version, 2);

        // The first version remains readable through its id, archived.
        let archived = registry
            .store()
            .get_by_id(first.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(archived.status, AssetStatus::Archived);
    }

    #[tokio::test]
    async fn rollback_restores_snapshot_content_as_new_version() {
        let registry = registry();
        let v1 = registry
            .create_draft(prompt_draft("planner"), "alice")
            .await
            .unwrap();
        registry.publish(v1.id, "alice").await.unwrap();

        let mut newer = prompt_draft("planner");
        newer.content = json!({"system": "Updated prompt."});
        let v2 = registry.create_draft(newer, "alice").await.unwrap();
        let v2 = registry.publish(v2.id, "alice").await.unwrap();

        let restored = registry.rollback(v2.id, 1, "carol").await.unwrap();
        assert_eq!(restored.version, 3);
        assert_eq!(
            restored.content,
            json!({"system": "You answer infrastructure questions."})
        );

        let current = registry
            .get(AssetKind::Prompt, "ops", "planner", "t1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(current.version, 3);
    }

    #[tokio::test]
    async fn update_published_asset_is_rejected() {
        let registry = registry();
        let draft = registry
            .create_draft(prompt_draft("planner"), "alice")
            .await
            .unwrap();
        let published = registry.publish(draft.id, "alice").await.unwrap();

        let result = registry
            .update_draft(
                published.id,
                AssetPatch {
                    content: Some(json!({})),
                    ..Default::default()
                },
                "alice",
            )
            .await;
        assert!(matches!(result, Err(RegistryError::NotADraft(_))));
    }

    #[tokio::test]
    async fn system_assets_cannot_be_deleted() {
        let registry = registry();
        let mut draft = prompt_draft("plan_budget");
        draft.is_system = true;
        let asset = registry.create_draft(draft, "system").await.unwrap();
        let result = registry.delete_draft(asset.id, "mallory").await;
        assert!(matches!(
            result,
            Err(RegistryError::SystemAssetProtected(_))
        ));
    }

    #[tokio::test]
    async fn required_system_asset_missing_is_hard_error() {
        let registry = registry();
        let result = registry
            .get_required(AssetKind::Policy, "ops", "plan_budget", "t1")
            .await;
        assert!(matches!(result, Err(RegistryError::MissingSystemAsset(_))));
    }

    #[tokio::test]
    async fn publish_and_rollback_append_audit_events() {
        let registry = registry();
        let draft = registry
            .create_draft(prompt_draft("planner"), "alice")
            .await
            .unwrap();
        registry.publish(draft.id, "alice").await.unwrap();

        let events = registry.audit_log(None, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].action, AuditAction::Publish);
        assert_eq!(events[0].actor, "alice");
    }
}
