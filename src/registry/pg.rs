use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::schemas::{
    Asset, AssetIdentity, AssetKind, AssetStatus, AuditAction, AuditEvent, ToolKind,
    VersionSnapshot,
};

use super::{AssetFilter, AssetStore, RegistryError};

/// Postgres-backed asset store. Schema migrations are owned by an external
/// collaborator; this store assumes the `asset_registry`, `asset_history`
/// and `asset_audit` tables exist.
pub struct PgAssetStore {
    pool: PgPool,
}

impl PgAssetStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn store_err(err: sqlx::Error) -> RegistryError {
    RegistryError::StoreError(err.to_string())
}

fn parse_kind(value: &str) -> Result<AssetKind, RegistryError> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| RegistryError::StoreError(format!("unknown asset kind '{value}'")))
}

fn parse_status(value: &str) -> Result<AssetStatus, RegistryError> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .map_err(|_| RegistryError::StoreError(format!("unknown asset status '{value}'")))
}

fn parse_tool_kind(value: Option<String>) -> Result<Option<ToolKind>, RegistryError> {
    match value {
        None => Ok(None),
        Some(raw) => serde_json::from_value(serde_json::Value::String(raw.clone()))
            .map(Some)
            .map_err(|_| RegistryError::StoreError(format!("unknown tool kind '{raw}'"))),
    }
}

fn row_to_asset(row: &sqlx::postgres::PgRow) -> Result<Asset, RegistryError> {
    let kind: String = row.try_get("kind").map_err(store_err)?;
    let status: String = row.try_get("status").map_err(store_err)?;
    let tool_type: Option<String> = row.try_get("tool_type").map_err(store_err)?;
    let tags: serde_json::Value = row.try_get("tags").map_err(store_err)?;
    Ok(Asset {
        id: row.try_get("id").map_err(store_err)?,
        kind: parse_kind(&kind)?,
        name: row.try_get("name").map_err(store_err)?,
        scope: row.try_get("scope").map_err(store_err)?,
        version: row.try_get("version").map_err(store_err)?,
        status: parse_status(&status)?,
        tenant_id: row.try_get("tenant_id").map_err(store_err)?,
        content: row.try_get("content").map_err(store_err)?,
        tool_type: parse_tool_kind(tool_type)?,
        is_system: row.try_get("is_system").map_err(store_err)?,
        description: row.try_get("description").map_err(store_err)?,
        tags: serde_json::from_value::<HashMap<String, String>>(tags).unwrap_or_default(),
        created_by: row.try_get("created_by").map_err(store_err)?,
        created_at: row.try_get("created_at").map_err(store_err)?,
        published_by: row.try_get("published_by").map_err(store_err)?,
        published_at: row.try_get("published_at").map_err(store_err)?,
    })
}

const INSERT_ASSET: &str = r"
INSERT INTO asset_registry
    (id, kind, name, scope, version, status, tenant_id, content, tool_type,
     is_system, description, tags, created_by, created_at, published_by, published_at)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
";

const UPDATE_ASSET: &str = r"
UPDATE asset_registry
SET status = $2, content = $3, description = $4, tags = $5,
    published_by = $6, published_at = $7
WHERE id = $1
";

const SELECT_ASSET: &str = r"
SELECT id, kind, name, scope, version, status, tenant_id, content, tool_type,
       is_system, description, tags, created_by, created_at, published_by, published_at
FROM asset_registry
";

async fn exec_insert<'e, E>(executor: E, asset: &Asset) -> Result<(), RegistryError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(INSERT_ASSET)
        .bind(asset.id)
        .bind(asset.kind.as_str())
        .bind(&asset.name)
        .bind(&asset.scope)
        .bind(asset.version)
        .bind(asset.status.as_str())
        .bind(&asset.tenant_id)
        .bind(&asset.content)
        .bind(asset.tool_type.map(|kind| kind.as_str()))
        .bind(asset.is_system)
        .bind(&asset.description)
        .bind(serde_json::to_value(&asset.tags).unwrap_or_default())
        .bind(&asset.created_by)
        .bind(asset.created_at)
        .bind(&asset.published_by)
        .bind(asset.published_at)
        .execute(executor)
        .await
        .map_err(store_err)?;
    Ok(())
}

#[async_trait]
impl AssetStore for PgAssetStore {
    async fn insert(&self, asset: Asset) -> Result<(), RegistryError> {
        exec_insert(&self.pool, &asset).await
    }

    async fn update(&self, asset: Asset) -> Result<(), RegistryError> {
        let result = sqlx::query(UPDATE_ASSET)
            .bind(asset.id)
            .bind(asset.status.as_str())
            .bind(&asset.content)
            .bind(&asset.description)
            .bind(serde_json::to_value(&asset.tags).unwrap_or_default())
            .bind(&asset.published_by)
            .bind(asset.published_at)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(asset.id.to_string()));
        }
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Asset>, RegistryError> {
        let row = sqlx::query(&format!("{SELECT_ASSET} WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(store_err)?;
        row.as_ref().map(row_to_asset).transpose()
    }

    async fn find_published(
        &self,
        identity: &AssetIdentity,
    ) -> Result<Option<Asset>, RegistryError> {
        let row = sqlx::query(&format!(
            "{SELECT_ASSET} WHERE kind = $1 AND scope = $2 AND name = $3 AND tenant_id = $4 AND status = 'published'"
        ))
        .bind(identity.kind.as_str())
        .bind(&identity.scope)
        .bind(&identity.name)
        .bind(&identity.tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        row.as_ref().map(row_to_asset).transpose()
    }

    async fn list_published(&self, filter: &AssetFilter) -> Result<Vec<Asset>, RegistryError> {
        let sql = format!(
            "{SELECT_ASSET} WHERE status = 'published' \
             AND ($1 = '' OR kind = $1) \
             AND ($2 = '' OR tenant_id = $2) \
             AND ($3 = '' OR scope = $3) \
             AND ($4 = '' OR name LIKE '%' || $4 || '%') \
             ORDER BY name"
        );

        let rows = sqlx::query(&sql)
            .bind(filter.kind.map(|kind| kind.as_str()).unwrap_or(""))
            .bind(filter.tenant_id.as_deref().unwrap_or(""))
            .bind(filter.scope.as_deref().unwrap_or(""))
            .bind(filter.name_contains.as_deref().unwrap_or(""))
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        rows.iter().map(row_to_asset).collect()
    }

    async fn max_version(&self, identity: &AssetIdentity) -> Result<i64, RegistryError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) AS max_version FROM asset_registry \
             WHERE kind = $1 AND scope = $2 AND name = $3 AND tenant_id = $4",
        )
        .bind(identity.kind.as_str())
        .bind(&identity.scope)
        .bind(&identity.name)
        .bind(&identity.tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;
        row.try_get("max_version").map_err(store_err)
    }

    async fn publish_swap(
        &self,
        draft: Asset,
        snapshot: VersionSnapshot,
    ) -> Result<Asset, RegistryError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        sqlx::query(
            "UPDATE asset_registry SET status = 'archived' \
             WHERE kind = $1 AND scope = $2 AND name = $3 AND tenant_id = $4 AND status = 'published'",
        )
        .bind(draft.kind.as_str())
        .bind(&draft.scope)
        .bind(&draft.name)
        .bind(&draft.tenant_id)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        let mut published = draft;
        published.status = AssetStatus::Published;
        sqlx::query(
            "UPDATE asset_registry SET status = 'published', published_by = $2, published_at = $3 \
             WHERE id = $1",
        )
        .bind(published.id)
        .bind(&published.published_by)
        .bind(published.published_at)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        sqlx::query(
            "INSERT INTO asset_history \
             (asset_id, kind, scope, name, tenant_id, version, content, published_by, published_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(snapshot.asset_id)
        .bind(snapshot.identity.kind.as_str())
        .bind(&snapshot.identity.scope)
        .bind(&snapshot.identity.name)
        .bind(&snapshot.identity.tenant_id)
        .bind(snapshot.version)
        .bind(&snapshot.content)
        .bind(&snapshot.published_by)
        .bind(snapshot.published_at)
        .execute(&mut *tx)
        .await
        .map_err(store_err)?;

        tx.commit().await.map_err(store_err)?;
        Ok(published)
    }

    async fn delete(&self, id: Uuid) -> Result<(), RegistryError> {
        let result = sqlx::query("DELETE FROM asset_registry WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(store_err)?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn history(
        &self,
        identity: &AssetIdentity,
    ) -> Result<Vec<VersionSnapshot>, RegistryError> {
        let rows = sqlx::query(
            "SELECT asset_id, kind, scope, name, tenant_id, version, content, published_by, published_at \
             FROM asset_history \
             WHERE kind = $1 AND scope = $2 AND name = $3 AND tenant_id = $4 \
             ORDER BY version",
        )
        .bind(identity.kind.as_str())
        .bind(&identity.scope)
        .bind(&identity.name)
        .bind(&identity.tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                let kind: String = row.try_get("kind").map_err(store_err)?;
                Ok(VersionSnapshot {
                    asset_id: row.try_get("asset_id").map_err(store_err)?,
                    identity: AssetIdentity {
                        kind: parse_kind(&kind)?,
                        scope: row.try_get("scope").map_err(store_err)?,
                        name: row.try_get("name").map_err(store_err)?,
                        tenant_id: row.try_get("tenant_id").map_err(store_err)?,
                    },
                    version: row.try_get("version").map_err(store_err)?,
                    content: row.try_get("content").map_err(store_err)?,
                    published_by: row.try_get("published_by").map_err(store_err)?,
                    published_at: row.try_get("published_at").map_err(store_err)?,
                })
            })
            .collect()
    }

    async fn append_audit(&self, event: AuditEvent) -> Result<(), RegistryError> {
        let action = match event.action {
            AuditAction::Publish => "publish",
            AuditAction::Rollback => "rollback",
            AuditAction::Delete => "delete",
        };
        sqlx::query(
            "INSERT INTO asset_audit \
             (actor, action, resource_kind, resource_name, tenant_id, detail, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&event.actor)
        .bind(action)
        .bind(event.resource_kind.as_str())
        .bind(&event.resource_name)
        .bind(&event.tenant_id)
        .bind(&event.detail)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;
        Ok(())
    }

    async fn audit_log(
        &self,
        resource_kind: Option<AssetKind>,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, RegistryError> {
        let rows = sqlx::query(
            "SELECT actor, action, resource_kind, resource_name, tenant_id, detail, created_at \
             FROM asset_audit \
             WHERE ($1 = '' OR resource_kind = $1) \
             ORDER BY created_at DESC LIMIT $2",
        )
        .bind(resource_kind.map(|kind| kind.as_str()).unwrap_or(""))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter()
            .map(|row| {
                let kind: String = row.try_get("resource_kind").map_err(store_err)?;
                let action: String = row.try_get("action").map_err(store_err)?;
                let action = match action.as_str() {
                    "publish" => AuditAction::Publish,
                    "rollback" => AuditAction::Rollback,
                    "delete" => AuditAction::Delete,
                    other => {
                        return Err(RegistryError::StoreError(format!(
                            "unknown audit action '{other}'"
                        )))
                    }
                };
                Ok(AuditEvent {
                    actor: row.try_get("actor").map_err(store_err)?,
                    action,
                    resource_kind: parse_kind(&kind)?,
                    resource_name: row.try_get("resource_name").map_err(store_err)?,
                    tenant_id: row.try_get("tenant_id").map_err(store_err)?,
                    detail: row.try_get("detail").map_err(store_err)?,
                    created_at: row.try_get("created_at").map_err(store_err)?,
                })
            })
            .collect()
    }
}
