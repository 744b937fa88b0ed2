use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{ErrorCode, OpsError};
use crate::query::QueryResolver;
use crate::schemas::{Reference, ReferenceKind, ToolKind};
use crate::source::SourcePool;
use crate::template::{fill_json_template, TextTemplate};

use super::ToolSpec;

/// Per-call context passed through dispatch.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub tenant_id: String,
    /// Replaces every tool's declared source for this request.
    pub source_override: Option<String>,
    /// Forces a fresh execution past the result cache (the `rerun` flag).
    pub bypass_cache: bool,
}

impl ToolContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            source_override: None,
            bypass_cache: false,
        }
    }
}

/// What a backend produced for one tool call: the structured data and the
/// references (bound statements, endpoints) that back it.
#[derive(Debug, Clone)]
pub struct DispatchOutput {
    pub data: Value,
    pub references: Vec<Reference>,
}

/// Backend dispatch boundary. The executor is uniform above this trait;
/// tests substitute a static dispatcher below it.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    async fn dispatch(
        &self,
        tool: &ToolSpec,
        inputs: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<DispatchOutput, OpsError>;
}

/// Dispatches each tool kind against its declared source through the
/// connection pools.
pub struct BackendDispatcher {
    pools: Arc<SourcePool>,
    resolver: Arc<QueryResolver>,
    client: reqwest::Client,
}

impl BackendDispatcher {
    pub fn new(pools: Arc<SourcePool>, resolver: Arc<QueryResolver>) -> Self {
        Self {
            pools,
            resolver,
            client: reqwest::Client::new(),
        }
    }

    /// Inputs with the caller's tenant injected, so statements can filter
    /// by `{tenant_id}` without the planner having to supply it.
    fn with_tenant(inputs: &Map<String, Value>, ctx: &ToolContext) -> Map<String, Value> {
        let mut merged = inputs.clone();
        merged
            .entry("tenant_id".to_string())
            .or_insert_with(|| Value::String(ctx.tenant_id.clone()));
        merged
    }

    async fn dispatch_database(
        &self,
        tool: &ToolSpec,
        inputs: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<DispatchOutput, OpsError> {
        let params = Self::with_tenant(inputs, ctx);
        let (bound, source_ref) = match (&tool.query_ref, &tool.query_template) {
            (Some(query_ref), _) => {
                let resolved = self.resolver.resolve(query_ref, &ctx.tenant_id).await?;
                let source = resolved
                    .source_ref
                    .clone()
                    .or_else(|| tool.source_ref.clone());
                (resolved.bind(&params)?, source)
            }
            (None, Some(template)) => {
                let violations = crate::query::safety::validate_reader_sql(template);
                if !violations.is_empty() {
                    return Err(OpsError::new(
                        ErrorCode::SqlBlocked,
                        violations.join("; "),
                    ));
                }
                (
                    crate::query::bind_named(template, &params, &[])?,
                    tool.source_ref.clone(),
                )
            }
            (None, None) => {
                return Err(OpsError::new(
                    ErrorCode::ConfigurationError,
                    format!("tool '{}' has neither query_ref nor query_template", tool.name),
                ))
            }
        };
        let source_ref = ctx
            .source_override
            .clone()
            .or(source_ref)
            .ok_or_else(|| {
                OpsError::new(
                    ErrorCode::ConfigurationError,
                    format!("tool '{}' has no resolvable source_ref", tool.name),
                )
            })?;

        #[cfg(feature = "postgres")]
        {
            let connection = self.pools.open_sql(&source_ref, &ctx.tenant_id).await?;
            let result = connection.execute(&bound.sql, &bound.params).await?;
            if result.row_count() > tool.capabilities.max_rows as usize {
                return Err(OpsError::new(
                    ErrorCode::MaxRowsExceeded,
                    format!(
                        "tool '{}' returned {} rows (limit {})",
                        tool.name,
                        result.row_count(),
                        tool.capabilities.max_rows
                    ),
                ));
            }
            Ok(DispatchOutput {
                data: result.into_value(),
                references: vec![Reference {
                    kind: ReferenceKind::Sql,
                    locator: bound.sql,
                    title: None,
                    tool: Some(tool.name.clone()),
                }],
            })
        }
        #[cfg(not(feature = "postgres"))]
        {
            let _ = (bound, source_ref);
            Err(OpsError::new(
                ErrorCode::ConfigurationError,
                "relational sources require the 'postgres' feature",
            ))
        }
    }

    async fn dispatch_graph(
        &self,
        tool: &ToolSpec,
        inputs: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<DispatchOutput, OpsError> {
        let params = Self::with_tenant(inputs, ctx);
        let (statement, source_ref) = match (&tool.query_ref, &tool.query_template) {
            (Some(query_ref), _) => {
                let resolved = self.resolver.resolve(query_ref, &ctx.tenant_id).await?;
                let source = resolved
                    .source_ref
                    .clone()
                    .or_else(|| tool.source_ref.clone());
                (resolved.statement, source)
            }
            (None, Some(template)) => (template.clone(), tool.source_ref.clone()),
            (None, None) => {
                return Err(OpsError::new(
                    ErrorCode::ConfigurationError,
                    format!("tool '{}' has neither query_ref nor query_template", tool.name),
                ))
            }
        };
        let source_ref = ctx
            .source_override
            .clone()
            .or(source_ref)
            .ok_or_else(|| {
                OpsError::new(
                    ErrorCode::ConfigurationError,
                    format!("tool '{}' has no resolvable source_ref", tool.name),
                )
            })?;

        let connection = self.pools.open_graph(&source_ref, &ctx.tenant_id).await?;
        let result = connection
            .run(&statement, Value::Object(params))
            .await?;
        Ok(DispatchOutput {
            data: result.into_value(),
            references: vec![Reference {
                kind: ReferenceKind::GraphQuery,
                locator: statement,
                title: None,
                tool: Some(tool.name.clone()),
            }],
        })
    }

    async fn dispatch_http(
        &self,
        tool: &ToolSpec,
        inputs: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<DispatchOutput, OpsError> {
        let http = tool.http.as_ref().ok_or_else(|| {
            OpsError::new(
                ErrorCode::ConfigurationError,
                format!("tool '{}' has no http configuration", tool.name),
            )
        })?;
        let params = Self::with_tenant(inputs, ctx);
        let url = TextTemplate::new(&http.url)
            .format_url(&params)
            .map_err(|err| OpsError::new(ErrorCode::ToolBadRequest, err.to_string()))?;
        let body = match &http.body_template {
            Some(template) => Some(
                fill_json_template(template, &params)
                    .map_err(|err| OpsError::new(ErrorCode::ToolBadRequest, err.to_string()))?,
            ),
            None => None,
        };

        let response = match &tool.source_ref {
            Some(source_ref) => {
                let connection = self.pools.open_http(source_ref, &ctx.tenant_id).await?;
                connection
                    .request(&http.method, &url, &http.headers, body.as_ref())
                    .await?
            }
            None => self.direct_request(tool, &http.method, &url, &http.headers, body.as_ref())
                .await?,
        };

        if response.status >= 500 {
            return Err(OpsError::new(
                ErrorCode::UpstreamUnavailable,
                format!("'{}' upstream returned {}", tool.name, response.status),
            ));
        }
        if response.status >= 400 {
            return Err(OpsError::new(
                ErrorCode::ToolBadRequest,
                format!("'{}' upstream rejected the request ({})", tool.name, response.status),
            ));
        }
        Ok(DispatchOutput {
            data: response.body,
            references: vec![Reference {
                kind: ReferenceKind::HttpEndpoint,
                locator: url,
                title: None,
                tool: Some(tool.name.clone()),
            }],
        })
    }

    async fn direct_request(
        &self,
        tool: &ToolSpec,
        method: &str,
        url: &str,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> Result<crate::source::HttpResponse, OpsError> {
        let method: reqwest::Method = method.parse().map_err(|_| {
            OpsError::new(
                ErrorCode::ConfigurationError,
                format!("tool '{}' has invalid method '{method}'", tool.name),
            )
        })?;
        let mut request = self.client.request(method, url).timeout(tool.timeout);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| OpsError::new(ErrorCode::UpstreamUnavailable, err.to_string()))?;
        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|err| OpsError::new(ErrorCode::UpstreamUnavailable, err.to_string()))?;
        let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
        Ok(crate::source::HttpResponse { status, body })
    }

    async fn dispatch_mcp(
        &self,
        tool: &ToolSpec,
        inputs: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<DispatchOutput, OpsError> {
        let mcp = tool.mcp.as_ref().ok_or_else(|| {
            OpsError::new(
                ErrorCode::ConfigurationError,
                format!("tool '{}' has no mcp configuration", tool.name),
            )
        })?;
        let connection = self.pools.open_http(&mcp.server_ref, &ctx.tenant_id).await?;
        let body = serde_json::json!({
            "tool": mcp.tool_name,
            "arguments": Value::Object(inputs.clone()),
        });
        let response = connection
            .request("POST", "/tools/call", &HashMap::new(), Some(&body))
            .await?;
        if response.status >= 400 {
            return Err(OpsError::new(
                ErrorCode::UpstreamUnavailable,
                format!("mcp server '{}' returned {}", mcp.server_ref, response.status),
            ));
        }
        Ok(DispatchOutput {
            data: response.body,
            references: vec![Reference {
                kind: ReferenceKind::HttpEndpoint,
                locator: format!("{}::{}", mcp.server_ref, mcp.tool_name),
                title: None,
                tool: Some(tool.name.clone()),
            }],
        })
    }
}

#[async_trait]
impl ToolDispatcher for BackendDispatcher {
    async fn dispatch(
        &self,
        tool: &ToolSpec,
        inputs: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<DispatchOutput, OpsError> {
        match tool.kind {
            ToolKind::DatabaseQuery => self.dispatch_database(tool, inputs, ctx).await,
            ToolKind::GraphQuery => self.dispatch_graph(tool, inputs, ctx).await,
            ToolKind::HttpApi | ToolKind::Search => self.dispatch_http(tool, inputs, ctx).await,
            ToolKind::Mcp => self.dispatch_mcp(tool, inputs, ctx).await,
        }
    }
}

/// Test and mock-mode dispatcher returning canned outputs per tool name.
#[derive(Default)]
pub struct StaticDispatcher {
    outputs: HashMap<String, Result<Value, OpsError>>,
}

impl StaticDispatcher {
    pub fn with_output(mut self, tool_name: impl Into<String>, data: Value) -> Self {
        self.outputs.insert(tool_name.into(), Ok(data));
        self
    }

    pub fn with_failure(mut self, tool_name: impl Into<String>, error: OpsError) -> Self {
        self.outputs.insert(tool_name.into(), Err(error));
        self
    }
}

#[async_trait]
impl ToolDispatcher for StaticDispatcher {
    async fn dispatch(
        &self,
        tool: &ToolSpec,
        _inputs: &Map<String, Value>,
        _ctx: &ToolContext,
    ) -> Result<DispatchOutput, OpsError> {
        match self.outputs.get(&tool.name) {
            Some(Ok(data)) => Ok(DispatchOutput {
                data: data.clone(),
                references: vec![],
            }),
            Some(Err(error)) => Err(error.clone()),
            None => Err(OpsError::new(
                ErrorCode::DataNotFound,
                format!("no canned output for '{}'", tool.name),
            )),
        }
    }
}
