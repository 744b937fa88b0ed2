use serde_json::Value;

use crate::query::safety::scan_template_keywords;
use crate::schemas::{Asset, ToolKind};

use super::credentials::validate_no_plaintext_credentials;

const VALID_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

/// Validates a tool asset for completeness and safety. Empty result means
/// valid.
pub fn validate_tool_asset(asset: &Asset) -> Vec<String> {
    let mut errors = Vec::new();

    let Some(kind) = asset.tool_type else {
        errors.push("tool_type is required".to_string());
        return errors;
    };
    if asset.name.trim().is_empty() {
        errors.push("tool name cannot be empty".to_string());
    }

    let content = &asset.content;
    match kind {
        ToolKind::DatabaseQuery => validate_query_backed(content, "database_query", &mut errors),
        ToolKind::GraphQuery => validate_query_backed(content, "graph_query", &mut errors),
        ToolKind::HttpApi => validate_http(content, &mut errors),
        ToolKind::Mcp => validate_mcp(content, &mut errors),
        ToolKind::Search => {}
    }

    for schema_field in ["input_schema", "output_schema"] {
        if let Some(schema) = content.get(schema_field) {
            validate_schema_shape(schema, schema_field, &mut errors);
        }
    }

    errors.extend(validate_no_plaintext_credentials(content));
    errors
}

/// Publication gate: everything `validate_tool_asset` checks, plus the
/// higher bar published tools must meet.
pub fn validate_tool_for_publication(asset: &Asset) -> Vec<String> {
    let mut errors = validate_tool_asset(asset);
    if asset.description.trim().is_empty() {
        errors.push("tool description is required for publication".to_string());
    }
    errors
}

fn validate_query_backed(content: &Value, kind: &str, errors: &mut Vec<String>) {
    if content
        .get("source_ref")
        .and_then(Value::as_str)
        .map_or(true, str::is_empty)
    {
        errors.push(format!("{kind}: source_ref is required"));
    }
    let has_query_ref = content
        .get("query_ref")
        .and_then(Value::as_str)
        .is_some_and(|value| !value.is_empty());
    match content.get("query_template").and_then(Value::as_str) {
        Some(template) => {
            for violation in scan_template_keywords(template) {
                errors.push(format!("{kind}: {violation}"));
            }
        }
        None if !has_query_ref => {
            errors.push(format!("{kind}: query_ref or query_template is required"));
        }
        None => {}
    }
}

fn validate_http(content: &Value, errors: &mut Vec<String>) {
    let http = content.get("http");
    let Some(http) = http else {
        errors.push("http_api: http configuration is required".to_string());
        return;
    };
    match http.get("url").and_then(Value::as_str) {
        None | Some("") => errors.push("http_api: url is required".to_string()),
        Some(raw) => {
            if raw.starts_with("http://") || raw.starts_with("https://") {
                // Template placeholders are legal inside the path, so the
                // parse check runs with them masked.
                let masked = raw.replace('{', "_").replace('}', "_");
                if url::Url::parse(&masked).is_err() {
                    errors.push(format!("http_api: url '{raw}' is not a valid URL"));
                }
            } else if !raw.starts_with('/') {
                errors.push(
                    "http_api: url must start with http://, https://, or / (relative)"
                        .to_string(),
                );
            }
        }
    }
    if let Some(method) = http.get("method").and_then(Value::as_str) {
        if !VALID_METHODS.contains(&method.to_uppercase().as_str()) {
            errors.push(format!("http_api: invalid HTTP method '{method}'"));
        }
    }
}

fn validate_mcp(content: &Value, errors: &mut Vec<String>) {
    let mcp = content.get("mcp");
    let Some(mcp) = mcp else {
        errors.push("mcp: server_ref and tool_name are required".to_string());
        return;
    };
    if mcp
        .get("server_ref")
        .and_then(Value::as_str)
        .map_or(true, str::is_empty)
    {
        errors.push("mcp: server_ref is required".to_string());
    }
    if mcp
        .get("tool_name")
        .and_then(Value::as_str)
        .map_or(true, str::is_empty)
    {
        errors.push("mcp: tool_name is required".to_string());
    }
}

const VALID_SCHEMA_TYPES: [&str; 7] = [
    "object", "array", "string", "number", "integer", "boolean", "null",
];

fn validate_schema_shape(schema: &Value, name: &str, errors: &mut Vec<String>) {
    let Some(object) = schema.as_object() else {
        errors.push(format!("{name} must be an object"));
        return;
    };
    if let Some(declared) = object.get("type").and_then(Value::as_str) {
        if !VALID_SCHEMA_TYPES.contains(&declared) {
            errors.push(format!("{name}: invalid schema type '{declared}'"));
        }
    }
    if object.get("type").and_then(Value::as_str) == Some("object") {
        if let Some(properties) = object.get("properties") {
            if !properties.is_object() {
                errors.push(format!("{name}: properties must be an object"));
            }
        }
    }
}
