use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schemas::{Asset, ToolKind};

use super::ToolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
    AppendOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Serial,
    Parallel,
}

/// Capability declaration the executor consults for scheduling and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCapabilities {
    #[serde(default = "default_access")]
    pub access: AccessMode,
    #[serde(default = "default_execution")]
    pub execution: ExecutionMode,
    #[serde(default = "default_max_rows")]
    pub max_rows: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

fn default_access() -> AccessMode {
    AccessMode::ReadOnly
}
fn default_execution() -> ExecutionMode {
    ExecutionMode::Parallel
}
fn default_max_rows() -> u32 {
    10_000
}
fn default_max_concurrent() -> u32 {
    10
}

impl Default for ToolCapabilities {
    fn default() -> Self {
        Self {
            access: default_access(),
            execution: default_execution(),
            max_rows: default_max_rows(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_retry_count")]
    pub count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub delay_ms: u64,
}

fn default_retry_count() -> u32 {
    0
}
fn default_retry_delay_ms() -> u64 {
    200
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: default_retry_count(),
            delay_ms: default_retry_delay_ms(),
        }
    }
}

/// HTTP-kind tool configuration: a URL/body template with `{param}`
/// placeholders filled from validated inputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpToolConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body_template: Option<Value>,
}

fn default_method() -> String {
    "GET".into()
}

/// MCP-kind tool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolConfig {
    pub server_ref: String,
    pub tool_name: String,
}

/// Wire shape of a tool asset's content payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ToolContent {
    #[serde(default)]
    pub source_ref: Option<String>,
    #[serde(default)]
    pub query_ref: Option<String>,
    #[serde(default)]
    pub query_template: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub capabilities: ToolCapabilities,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub fallback_tool: Option<String>,
    /// Empty means every tenant.
    #[serde(default)]
    pub supported_tenants: Vec<String>,
    #[serde(default = "default_cacheable")]
    pub cacheable: bool,
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
    #[serde(default)]
    pub http: Option<HttpToolConfig>,
    #[serde(default)]
    pub mcp: Option<McpToolConfig>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_cacheable() -> bool {
    true
}

/// In-process descriptor of one published tool.
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub kind: ToolKind,
    pub version: i64,
    pub description: String,
    pub source_ref: Option<String>,
    pub query_ref: Option<String>,
    pub query_template: Option<String>,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub timeout: Duration,
    pub capabilities: ToolCapabilities,
    pub retry: RetryPolicy,
    pub fallback_tool: Option<String>,
    pub supported_tenants: Vec<String>,
    pub cacheable: bool,
    pub cache_ttl: Option<Duration>,
    pub http: Option<HttpToolConfig>,
    pub mcp: Option<McpToolConfig>,
    pub aliases: Vec<String>,
}

impl ToolSpec {
    pub fn from_asset(asset: &Asset) -> Result<Self, ToolError> {
        let kind = asset
            .tool_type
            .ok_or_else(|| ToolError::MalformedAsset(asset.name.clone(), "tool_type is required".into()))?;
        let content: ToolContent = serde_json::from_value(asset.content.clone())
            .map_err(|err| ToolError::MalformedAsset(asset.name.clone(), err.to_string()))?;
        Ok(Self {
            name: asset.name.clone(),
            kind,
            version: asset.version,
            description: asset.description.clone(),
            source_ref: content.source_ref,
            query_ref: content.query_ref,
            query_template: content.query_template,
            input_schema: content.input_schema,
            output_schema: content.output_schema,
            timeout: Duration::from_secs(content.timeout_secs),
            capabilities: content.capabilities,
            retry: content.retry,
            fallback_tool: content.fallback_tool,
            supported_tenants: content.supported_tenants,
            cacheable: content.cacheable,
            cache_ttl: content.cache_ttl_secs.map(Duration::from_secs),
            http: content.http,
            mcp: content.mcp,
            aliases: content.aliases,
        })
    }

    pub fn serves_tenant(&self, tenant_id: &str) -> bool {
        self.supported_tenants.is_empty()
            || self.supported_tenants.iter().any(|t| t == tenant_id)
    }

    pub fn is_read_only(&self) -> bool {
        self.capabilities.access == AccessMode::ReadOnly
    }
}

/// Builds a JSON input/output schema from a Rust type, for tools authored
/// in code rather than through the asset registry.
pub fn schema_of<T: schemars::JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_default()
}

/// Minimal structural check of a declared JSON schema: required properties
/// must exist and declared primitive types must match. Full draft
/// validation is out of scope; this mirrors what the executor can promise
/// cheaply on every call.
pub fn validate_against_schema(
    schema: &Value,
    inputs: &serde_json::Map<String, Value>,
) -> Vec<String> {
    let mut errors = Vec::new();
    let Some(schema) = schema.as_object() else {
        return errors;
    };

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !inputs.contains_key(name) {
                errors.push(format!("missing required input '{name}'"));
            }
        }
    }

    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, property) in properties {
            let Some(value) = inputs.get(name) else {
                continue;
            };
            let Some(expected) = property.get("type").and_then(Value::as_str) else {
                continue;
            };
            let matches = match expected {
                "string" => value.is_string(),
                "number" => value.is_number(),
                "integer" => value.is_i64() || value.is_u64(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                "null" => value.is_null(),
                _ => true,
            };
            if !matches {
                errors.push(format!("input '{name}' is not of type {expected}"));
            }
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schemas::{AssetKind, AssetStatus};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn tool_asset(kind: Option<ToolKind>, content: Value) -> Asset {
        Asset {
            id: Uuid::new_v4(),
            kind: AssetKind::Tool,
            name: "ci.aggregate_count".into(),
            scope: "ops".into(),
            version: 3,
            status: AssetStatus::Published,
            tenant_id: "t1".into(),
            content,
            tool_type: kind,
            is_system: false,
            description: "Counts configuration items".into(),
            tags: Default::default(),
            created_by: "system".into(),
            created_at: Utc::now(),
            published_by: None,
            published_at: None,
        }
    }

    #[test]
    fn parses_database_query_tool() {
        let asset = tool_asset(
            Some(ToolKind::DatabaseQuery),
            json!({
                "source_ref": "primary_postgres",
                "query_ref": "ci_aggregate_count",
                "timeout_secs": 10,
                "aliases": ["ci"],
                "input_schema": {
                    "type": "object",
                    "properties": {"zone": {"type": "string"}},
                    "required": ["zone"]
                }
            }),
        );
        let spec = ToolSpec::from_asset(&asset).unwrap();
        assert_eq!(spec.kind, ToolKind::DatabaseQuery);
        assert_eq!(spec.timeout, Duration::from_secs(10));
        assert_eq!(spec.aliases, vec!["ci"]);
        assert!(spec.serves_tenant("anyone"));
    }

    #[test]
    fn missing_tool_type_is_malformed() {
        let asset = tool_asset(None, json!({}));
        assert!(matches!(
            ToolSpec::from_asset(&asset),
            Err(ToolError::MalformedAsset(_, _))
        ));
    }

    #[test]
    fn tenant_allowlist_enforced() {
        let asset = tool_asset(
            Some(ToolKind::HttpApi),
            json!({"supported_tenants": ["t1", "t2"]}),
        );
        let spec = ToolSpec::from_asset(&asset).unwrap();
        assert!(spec.serves_tenant("t1"));
        assert!(!spec.serves_tenant("t9"));
    }

    #[test]
    fn schema_of_rust_type_validates_its_own_inputs() {
        #[derive(schemars::JsonSchema)]
        #[allow(dead_code)]
        struct SearchInput {
            zone: String,
            limit: Option<u32>,
        }

        let schema = schema_of::<SearchInput>();
        let mut inputs = serde_json::Map::new();
        inputs.insert("zone".into(), json!("zone-a"));
        assert!(validate_against_schema(&schema, &inputs).is_empty());
    }

    #[test]
    fn schema_check_reports_missing_and_mistyped() {
        let schema = json!({
            "type": "object",
            "properties": {
                "zone": {"type": "string"},
                "limit": {"type": "integer"}
            },
            "required": ["zone"]
        });
        let mut inputs = serde_json::Map::new();
        inputs.insert("limit".into(), json!("ten"));

        let errors = validate_against_schema(&schema, &inputs);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.contains("zone")));
        assert!(errors.iter().any(|e| e.contains("limit")));
    }
}
