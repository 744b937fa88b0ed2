use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Discriminator for the versioned configuration units the orchestrator
/// consumes at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    Prompt,
    Query,
    Mapping,
    Policy,
    Source,
    Catalog,
    Tool,
    Resolver,
}

impl AssetKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetKind::Prompt => "prompt",
            AssetKind::Query => "query",
            AssetKind::Mapping => "mapping",
            AssetKind::Policy => "policy",
            AssetKind::Source => "source",
            AssetKind::Catalog => "catalog",
            AssetKind::Tool => "tool",
            AssetKind::Resolver => "resolver",
        }
    }
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Draft,
    Published,
    Archived,
}

impl AssetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssetStatus::Draft => "draft",
            AssetStatus::Published => "published",
            AssetStatus::Archived => "archived",
        }
    }
}

/// Sub-discriminator carried by tool assets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    DatabaseQuery,
    HttpApi,
    GraphQuery,
    Search,
    Mcp,
}

impl ToolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolKind::DatabaseQuery => "database_query",
            ToolKind::HttpApi => "http_api",
            ToolKind::GraphQuery => "graph_query",
            ToolKind::Search => "search",
            ToolKind::Mcp => "mcp",
        }
    }
}

impl std::fmt::Display for ToolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One versioned row of orchestrator configuration. Readers always hold an
/// immutable snapshot; the registry owns the canonical copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub kind: AssetKind,
    pub name: String,
    pub scope: String,
    pub version: i64,
    pub status: AssetStatus,
    pub tenant_id: String,
    /// Opaque payload; its schema varies by `kind` and is validated at the
    /// boundary that consumes it.
    pub content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<ToolKind>,
    /// System assets keep their name and kind immutable and cannot be
    /// deleted.
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
}

impl Asset {
    /// Identity key for the at-most-one-published invariant.
    pub fn identity(&self) -> AssetIdentity {
        AssetIdentity {
            kind: self.kind,
            scope: self.scope.clone(),
            name: self.name.clone(),
            tenant_id: self.tenant_id.clone(),
        }
    }
}

/// The `(kind, scope, name, tenant)` tuple under which at most one published
/// row may exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetIdentity {
    pub kind: AssetKind,
    pub scope: String,
    pub name: String,
    pub tenant_id: String,
}

impl std::fmt::Display for AssetIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{} (tenant {})",
            self.kind, self.scope, self.name, self.tenant_id
        )
    }
}

/// Input shape for creating a new draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetDraft {
    pub kind: AssetKind,
    pub name: String,
    pub scope: String,
    pub tenant_id: String,
    pub content: Value,
    #[serde(default)]
    pub tool_type: Option<ToolKind>,
    #[serde(default)]
    pub is_system: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Sparse patch applied to a draft.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<HashMap<String, String>>,
}

/// Immutable snapshot appended to the version-history log at publish and
/// rollback time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionSnapshot {
    pub asset_id: Uuid,
    pub identity: AssetIdentity,
    pub version: i64,
    pub content: Value,
    pub published_by: String,
    pub published_at: DateTime<Utc>,
}

/// Change event on published assets, appended to the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub actor: String,
    pub action: AuditAction,
    pub resource_kind: AssetKind,
    pub resource_name: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Publish,
    Rollback,
    Delete,
}
