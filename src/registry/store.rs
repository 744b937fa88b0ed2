use async_trait::async_trait;
use uuid::Uuid;

use crate::schemas::{Asset, AssetIdentity, AssetKind, AuditEvent, VersionSnapshot};

use super::RegistryError;

/// Filter for listing published assets.
#[derive(Debug, Clone, Default)]
pub struct AssetFilter {
    pub kind: Option<AssetKind>,
    pub scope: Option<String>,
    pub tenant_id: Option<String>,
    pub name_contains: Option<String>,
}

/// Persistence boundary for the registry. Implementations must make
/// `publish_swap` atomic: archive the previous published row, promote the
/// draft and append the history snapshot as one transaction.
#[async_trait]
pub trait AssetStore: Send + Sync {
    async fn insert(&self, asset: Asset) -> Result<(), RegistryError>;

    async fn update(&self, asset: Asset) -> Result<(), RegistryError>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Asset>, RegistryError>;

    async fn find_published(
        &self,
        identity: &AssetIdentity,
    ) -> Result<Option<Asset>, RegistryError>;

    async fn list_published(&self, filter: &AssetFilter) -> Result<Vec<Asset>, RegistryError>;

    /// Highest version ever used for this identity (drafts and archived
    /// rows included); 0 when the name is new.
    async fn max_version(&self, identity: &AssetIdentity) -> Result<i64, RegistryError>;

    /// Atomically archives the current published row (if any), marks the
    /// draft published and appends the snapshot.
    async fn publish_swap(
        &self,
        draft: Asset,
        snapshot: VersionSnapshot,
    ) -> Result<Asset, RegistryError>;

    async fn delete(&self, id: Uuid) -> Result<(), RegistryError>;

    async fn history(&self, identity: &AssetIdentity)
        -> Result<Vec<VersionSnapshot>, RegistryError>;

    async fn append_audit(&self, event: AuditEvent) -> Result<(), RegistryError>;

    async fn audit_log(
        &self,
        resource_kind: Option<AssetKind>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, RegistryError>;
}
