use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Map, Value};

use crate::breaker::CircuitBreakerManager;
use crate::error::{ErrorCode, OpsError};
use crate::schemas::{Reference, ToolCallRecord};

use super::{
    cache_key, validate_against_schema, DispatchOutput, RateLimiter, ResultCache, ToolContext,
    ToolDispatcher, ToolError, ToolRegistry, ToolSpec,
};

const RATE_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(250);

/// Result of one executed tool call, with the trace record already built.
#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    pub data: Value,
    pub references: Vec<Reference>,
    pub record: ToolCallRecord,
    pub from_cache: bool,
}

/// Uniform execution pipeline over every tool kind: lookup, tenant and
/// capability gates, schema validation, cache, breaker, rate limit,
/// dispatch, record, fallback.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    dispatcher: Arc<dyn ToolDispatcher>,
    cache: Arc<ResultCache>,
    breakers: Arc<CircuitBreakerManager>,
    limiter: RateLimiter,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        dispatcher: Arc<dyn ToolDispatcher>,
        cache: Arc<ResultCache>,
        breakers: Arc<CircuitBreakerManager>,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            cache,
            breakers,
            limiter: RateLimiter::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Executes one tool call. On a retryable failure of a tool that
    /// declares a fallback, the fallback runs once; safety rejections never
    /// fall through.
    pub async fn execute(
        &self,
        tool_name: &str,
        inputs: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<ToolCallOutcome, OpsError> {
        match self.execute_one(tool_name, inputs, ctx).await {
            Ok(outcome) => Ok(outcome),
            Err(error) => {
                let fallback = match self.registry.get(tool_name, &ctx.tenant_id).await {
                    Ok(tool) => tool.fallback_tool.clone(),
                    Err(_) => None,
                };
                match fallback {
                    Some(fallback_name)
                        if error.retryable && !error.code.blocks_fallback() =>
                    {
                        log::warn!(
                            "tool '{tool_name}' failed ({}), retrying with fallback '{fallback_name}'",
                            error.code
                        );
                        self.execute_one(&fallback_name, inputs, ctx).await
                    }
                    _ => Err(error),
                }
            }
        }
    }

    async fn execute_one(
        &self,
        tool_name: &str,
        inputs: &Map<String, Value>,
        ctx: &ToolContext,
    ) -> Result<ToolCallOutcome, OpsError> {
        let started = Instant::now();

        // 1. Lookup.
        let tool = self
            .registry
            .get(tool_name, &ctx.tenant_id)
            .await
            .map_err(OpsError::from)?;

        // 2. Tenant gate.
        if !tool.serves_tenant(&ctx.tenant_id) {
            return Err(ToolError::TenantMismatch {
                tool: tool.name.clone(),
                tenant: ctx.tenant_id.clone(),
            }
            .into());
        }

        // 3. Capability gate: the orchestrator only issues reads.
        if !tool.is_read_only() {
            return Err(ToolError::CapabilityMissing {
                tool: tool.name.clone(),
                capability: "read_only".into(),
            }
            .into());
        }

        // 4. Input validation.
        if let Some(schema) = &tool.input_schema {
            let violations = validate_against_schema(schema, inputs);
            if !violations.is_empty() {
                return Err(ToolError::BadRequest {
                    tool: tool.name.clone(),
                    reason: violations.join("; "),
                }
                .into());
            }
        }

        // 5. Cache. A rerun request bypasses the read but still refreshes
        // the entry on success.
        let key = cache_key(&tool.name, inputs, &ctx.tenant_id);
        if tool.cacheable && !ctx.bypass_cache {
            if let Some(data) = self.cache.get(&key).await {
                log::debug!("cache hit for '{}'", tool.name);
                return Ok(ToolCallOutcome {
                    record: self.record(&tool, inputs, &data, started, None),
                    references: vec![],
                    data,
                    from_cache: true,
                });
            }
        }

        // 6. Circuit breaker gate.
        let breaker = self.breakers.get_or_create(&tool.name);
        if breaker.is_open() {
            return Err(ToolError::CircuitOpen(tool.name.clone()).into());
        }

        // 7. Rate limit token, held for the duration of the dispatch.
        let _permit = self
            .limiter
            .acquire(
                &tool.name,
                tool.capabilities.max_concurrent,
                RATE_ACQUIRE_TIMEOUT,
            )
            .await
            .map_err(OpsError::from)?;

        // 8. Dispatch with the tool's timeout.
        let attempt = tokio::time::timeout(
            tool.timeout,
            self.dispatcher.dispatch(&tool, inputs, ctx),
        )
        .await;

        let result: Result<DispatchOutput, OpsError> = match attempt {
            Ok(result) => result,
            Err(_) => Err(ToolError::Timeout(tool.name.clone(), tool.timeout.as_millis() as u64)
                .into()),
        };

        // 9. Record, update breaker, cache on success.
        match result {
            Ok(output) => {
                breaker.record_success();
                if tool.cacheable {
                    self.cache
                        .put(key, output.data.clone(), tool.cache_ttl)
                        .await;
                }
                Ok(ToolCallOutcome {
                    record: self.record(&tool, inputs, &output.data, started, None),
                    references: output.references,
                    data: output.data,
                    from_cache: false,
                })
            }
            Err(error) => {
                // A rejected request is the caller's fault, not backend
                // health; only backend failures move the breaker.
                if !matches!(
                    error.code,
                    ErrorCode::ToolBadRequest
                        | ErrorCode::SqlBlocked
                        | ErrorCode::InvalidParams
                        | ErrorCode::DataNotFound
                ) {
                    breaker.record_failure();
                }
                log::warn!("tool '{}' failed: {error}", tool.name);
                Err(error.with_details(serde_json::json!({
                    "record": self.failure_record(&tool, inputs, started),
                })))
            }
        }
    }

    fn record(
        &self,
        tool: &ToolSpec,
        inputs: &Map<String, Value>,
        data: &Value,
        started: Instant,
        error: Option<&OpsError>,
    ) -> ToolCallRecord {
        ToolCallRecord {
            tool: tool.name.clone(),
            elapsed_ms: started.elapsed().as_millis() as u64,
            input_params: Value::Object(inputs.clone()),
            output_summary: summarize_output(data),
            error: error.map(|err| err.message.clone()),
            error_code: error.map(|err| err.code),
            created_at: Utc::now(),
        }
    }

    fn failure_record(
        &self,
        tool: &ToolSpec,
        inputs: &Map<String, Value>,
        started: Instant,
    ) -> Value {
        serde_json::json!({
            "tool": tool.name,
            "elapsed_ms": started.elapsed().as_millis() as u64,
            "input_params": Value::Object(inputs.clone()),
        })
    }
}

/// Summaries keep counts and shapes, never payloads: a row count for
/// tabular data, element counts for arrays, key lists for objects.
pub fn summarize_output(data: &Value) -> Value {
    match data {
        Value::Object(object) => {
            if let Some(count) = object.get("row_count") {
                return serde_json::json!({"row_count": count});
            }
            serde_json::json!({
                "keys": object.keys().cloned().collect::<Vec<_>>(),
            })
        }
        Value::Array(items) => serde_json::json!({"items": items.len()}),
        Value::String(text) => serde_json::json!({"chars": text.len()}),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::CircuitBreakerConfig;
    use crate::registry::{AssetRegistry, MemoryAssetStore};
    use crate::schemas::{AssetDraft, AssetKind, ToolKind};
    use crate::tools::StaticDispatcher;
    use serde_json::json;

    async fn publish_tool(
        registry: &AssetRegistry,
        name: &str,
        content: Value,
    ) {
        let draft = registry
            .create_draft(
                AssetDraft {
                    kind: AssetKind::Tool,
                    name: name.into(),
                    scope: "ops".into(),
                    tenant_id: "t1".into(),
                    content,
                    tool_type: Some(ToolKind::HttpApi),
                    is_system: false,
                    description: "test tool".into(),
                    tags: Default::default(),
                },
                "system",
            )
            .await
            .unwrap();
        registry.publish(draft.id, "system").await.unwrap();
    }

    async fn executor_with(dispatcher: StaticDispatcher) -> ToolExecutor {
        let asset_registry = Arc::new(AssetRegistry::new(Arc::new(MemoryAssetStore::new())));
        publish_tool(
            &asset_registry,
            "itsm.tickets",
            json!({
                "http": {"url": "https://api.internal/tickets", "method": "GET"},
                "fallback_tool": "itsm.tickets_replica",
                "timeout_secs": 5
            }),
        )
        .await;
        publish_tool(
            &asset_registry,
            "itsm.tickets_replica",
            json!({
                "http": {"url": "https://replica.internal/tickets", "method": "GET"},
                "timeout_secs": 5
            }),
        )
        .await;

        ToolExecutor::new(
            Arc::new(ToolRegistry::new(asset_registry, "ops")),
            Arc::new(dispatcher),
            Arc::new(ResultCache::new(Duration::from_secs(60))),
            Arc::new(CircuitBreakerManager::new(CircuitBreakerConfig {
                failure_threshold: 2,
                recovery_timeout: Duration::from_secs(60),
                success_threshold: 1,
            })),
        )
    }

    fn ctx() -> ToolContext {
        ToolContext::new("t1")
    }

    #[tokio::test]
    async fn unknown_tool_is_tool_not_found() {
        let executor = executor_with(StaticDispatcher::default()).await;
        let error = executor
            .execute("missing.tool", &Map::new(), &ctx())
            .await
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::ToolNotFound);
    }

    #[tokio::test]
    async fn success_is_cached_and_replayed() {
        let dispatcher =
            StaticDispatcher::default().with_output("itsm.tickets", json!({"tickets": [1, 2]}));
        let executor = executor_with(dispatcher).await;

        let first = executor
            .execute("itsm.tickets", &Map::new(), &ctx())
            .await
            .unwrap();
        assert!(!first.from_cache);

        let second = executor
            .execute("itsm.tickets", &Map::new(), &ctx())
            .await
            .unwrap();
        assert!(second.from_cache);
        assert_eq!(first.data, second.data);
    }

    #[tokio::test]
    async fn retryable_failure_uses_fallback_once() {
        let dispatcher = StaticDispatcher::default()
            .with_failure(
                "itsm.tickets",
                OpsError::new(ErrorCode::UpstreamUnavailable, "primary down"),
            )
            .with_output("itsm.tickets_replica", json!({"tickets": []}));
        let executor = executor_with(dispatcher).await;

        let outcome = executor
            .execute("itsm.tickets", &Map::new(), &ctx())
            .await
            .unwrap();
        assert_eq!(outcome.record.tool, "itsm.tickets_replica");
    }

    #[tokio::test]
    async fn safety_rejection_never_falls_back() {
        let dispatcher = StaticDispatcher::default()
            .with_failure(
                "itsm.tickets",
                OpsError::new(ErrorCode::SqlBlocked, "blocked"),
            )
            .with_output("itsm.tickets_replica", json!({"tickets": []}));
        let executor = executor_with(dispatcher).await;

        let error = executor
            .execute("itsm.tickets", &Map::new(), &ctx())
            .await
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::SqlBlocked);
    }

    #[tokio::test]
    async fn breaker_opens_after_consecutive_failures() {
        let dispatcher = StaticDispatcher::default().with_failure(
            "itsm.tickets_replica",
            OpsError::new(ErrorCode::UpstreamUnavailable, "down"),
        );
        let executor = executor_with(dispatcher).await;

        for _ in 0..2 {
            let error = executor
                .execute("itsm.tickets_replica", &Map::new(), &ctx())
                .await
                .unwrap_err();
            assert_eq!(error.code, ErrorCode::UpstreamUnavailable);
        }
        // Third call fast-fails on the open breaker without dispatching.
        let error = executor
            .execute("itsm.tickets_replica", &Map::new(), &ctx())
            .await
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::CircuitOpen);
    }
}
