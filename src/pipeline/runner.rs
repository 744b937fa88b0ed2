use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedSender;

use crate::chain::{ChainExecutor, ChainStatus, StepStatus};
use crate::config::OpsConfig;
use crate::control::{ControlLoop, ControlLoopPolicy};
use crate::error::{ErrorCode, OpsError};
use crate::planner::Planner;
use crate::schemas::{
    AskRequest, AskResponse, PlanOutput, ProgressEvent, ReplanPatch, ReplanTrigger, SpanStatus,
    StageName, StageSpan, StreamEvent, TraceStatus, TriggerSeverity, TriggerType,
};
use crate::tools::ToolContext;
use crate::tracer::{TraceBuilder, TraceStore};
use crate::validator::PlanValidator;

use super::{compose_blocks, QueryHistoryEntry, QueryHistoryStore, ResponseBuilder};

/// The five-stage sequencer. One instance serves the whole process; each
/// request gets its own trace builder and control loop.
pub struct PipelineRunner {
    planner: Arc<Planner>,
    validator: Arc<PlanValidator>,
    chain: Arc<ChainExecutor>,
    traces: Arc<dyn TraceStore>,
    history: Arc<dyn QueryHistoryStore>,
    config: Arc<OpsConfig>,
}

impl PipelineRunner {
    pub fn new(
        planner: Arc<Planner>,
        validator: Arc<PlanValidator>,
        chain: Arc<ChainExecutor>,
        traces: Arc<dyn TraceStore>,
        history: Arc<dyn QueryHistoryStore>,
        config: Arc<OpsConfig>,
    ) -> Self {
        Self {
            planner,
            validator,
            chain,
            traces,
            history,
            config,
        }
    }

    pub async fn ask(&self, request: AskRequest) -> AskResponse {
        self.run(request, None).await
    }

    pub(crate) async fn run(
        &self,
        request: AskRequest,
        events: Option<UnboundedSender<StreamEvent>>,
    ) -> AskResponse {
        let mut builder = TraceBuilder::start(&request.tenant_id, &request.question);
        let mut ctx = ToolContext::new(&request.tenant_id);
        ctx.source_override = request.source_override.clone();
        ctx.bypass_cache = request.rerun;
        let policy = ControlLoopPolicy {
            max_replans: self.config.max_replans,
            min_interval: self.config.replan_min_interval,
            cooling_period: self.config.replan_cooling_period,
            ..Default::default()
        };
        let mut control = match ControlLoop::new(policy) {
            Ok(control) => control,
            Err(err) => {
                let error = OpsError::new(ErrorCode::ConfigurationError, err.to_string());
                return self.fail(builder, "error", error).await;
            }
        };
        let mut patch: Option<ReplanPatch> = None;

        loop {
            // --- Route ---
            let started = Instant::now();
            let planned = match self
                .planner
                .plan(
                    &request.question,
                    &request.tenant_id,
                    patch.as_ref(),
                    request.resolver_asset.as_deref(),
                )
                .await
            {
                Ok(planned) => planned,
                Err(err) => {
                    let error: OpsError = err.into();
                    builder.record_stage(error_span(
                        StageName::Route,
                        json!({"question": request.question}),
                        &error,
                        started,
                    ));
                    return self.fail(builder, "error", error).await;
                }
            };
            for (name, version) in &planned.applied_assets {
                builder.record_asset_version(name.clone(), *version);
            }
            builder.record_stage(StageSpan {
                stage: StageName::Route,
                input: json!({"question": request.question, "patch": patch}),
                output: json!({
                    "plan": planned.output,
                    "hints": planned.hints,
                    "used_llm": planned.used_llm,
                }),
                elapsed_ms: started.elapsed().as_millis() as u64,
                status: SpanStatus::Ok,
                warnings: vec![],
                errors: vec![],
                references: vec![],
                applied_assets: planned.applied_assets.clone(),
                created_at: Utc::now(),
            });
            emit_progress(&events, &builder, StageName::Route, json!({"used_llm": planned.used_llm}));

            match &planned.output {
                PlanOutput::Reject { reason, confidence } => {
                    let mut response = ResponseBuilder::new("reject");
                    response.answer(reason.clone());
                    response.error(
                        OpsError::new(ErrorCode::PolicyDeny, reason.clone())
                            .with_details(json!({"confidence": confidence})),
                    );
                    return self
                        .present(builder, response, TraceStatus::Ok, &request, &events)
                        .await;
                }
                PlanOutput::DirectAnswer { text, .. } => {
                    let mut response = ResponseBuilder::new("direct");
                    response.answer(text.clone());
                    response.push_block(crate::schemas::Block::Text { text: text.clone() });
                    return self
                        .present(builder, response, TraceStatus::Ok, &request, &events)
                        .await;
                }
                PlanOutput::Plan(_) => {}
            }

            // --- Validate ---
            let started = Instant::now();
            let validated = match self
                .validator
                .validate(planned.output.clone(), &request.tenant_id)
                .await
            {
                Ok(validated) => validated,
                Err(error) => {
                    builder.record_stage(error_span(
                        StageName::Validate,
                        json!({"plan": planned.output}),
                        &error,
                        started,
                    ));
                    return self.fail(builder, "orch", error).await;
                }
            };
            builder.record_stage(StageSpan {
                stage: StageName::Validate,
                input: json!({"plan": planned.output}),
                output: json!({
                    "plan": validated.output,
                    "policy_decisions": validated.decisions.to_value(),
                }),
                elapsed_ms: started.elapsed().as_millis() as u64,
                status: SpanStatus::Ok,
                warnings: vec![],
                errors: vec![],
                references: vec![],
                applied_assets: Default::default(),
                created_at: Utc::now(),
            });
            emit_progress(
                &events,
                &builder,
                StageName::Validate,
                validated.decisions.to_value(),
            );

            let Some(spec) = validated.output.as_plan().cloned() else {
                // The validator never changes the output kind; treat this
                // as an internal inconsistency.
                let error = OpsError::internal("validated plan lost its steps");
                return self.fail(builder, "orch", error).await;
            };

            // --- Execute ---
            let started = Instant::now();
            let outcome = match self
                .chain
                .execute(&spec.steps, &ctx, &validated.chain_config)
                .await
            {
                Ok(outcome) => outcome,
                Err(err) => {
                    let error: OpsError = err.into();
                    builder.record_stage(error_span(
                        StageName::Execute,
                        json!({"steps": spec.steps}),
                        &error,
                        started,
                    ));
                    return self.fail(builder, "orch", error).await;
                }
            };
            for record in outcome.tool_calls() {
                builder.record_tool_call(record);
            }
            builder.record_stage(StageSpan {
                stage: StageName::Execute,
                input: json!({"steps": spec.steps}),
                output: json!({
                    "step_statuses": outcome
                        .results
                        .iter()
                        .map(|result| json!({"step_id": result.step_id, "status": result.status}))
                        .collect::<Vec<_>>(),
                    "chain_status": format!("{:?}", outcome.status),
                }),
                elapsed_ms: started.elapsed().as_millis() as u64,
                status: match outcome.status {
                    ChainStatus::Complete => SpanStatus::Ok,
                    ChainStatus::Partial => SpanStatus::Error,
                },
                warnings: vec![],
                errors: outcome
                    .results
                    .iter()
                    .filter_map(|result| result.error.as_ref().map(|error| error.to_string()))
                    .collect(),
                references: outcome.references(),
                applied_assets: Default::default(),
                created_at: Utc::now(),
            });
            emit_progress(
                &events,
                &builder,
                StageName::Execute,
                json!({"steps_done": outcome.results.len()}),
            );

            // --- Replan decision ---
            if let Some(trigger) = replan_trigger(&outcome) {
                let suggested = ReplanPatch {
                    extra_hints: vec![format!("previous attempt failed: {}", trigger.reason)],
                    ..Default::default()
                };
                let event = control.evaluate(trigger, suggested);
                builder.record_replan(event.clone());
                if event.approved {
                    log::info!("replanning (attempt {})", event.replan_number);
                    patch = Some(event.patch);
                    continue;
                }
            }

            // --- Compose ---
            let started = Instant::now();
            let (blocks, warnings) = compose_blocks(&spec, &outcome);
            builder.record_stage(StageSpan {
                stage: StageName::Compose,
                input: json!({"output_views": spec.output_views}),
                output: json!({"block_count": blocks.len()}),
                elapsed_ms: started.elapsed().as_millis() as u64,
                status: SpanStatus::Ok,
                warnings,
                errors: vec![],
                references: vec![],
                applied_assets: Default::default(),
                created_at: Utc::now(),
            });
            emit_progress(
                &events,
                &builder,
                StageName::Compose,
                json!({"blocks": blocks.len()}),
            );

            // --- Present ---
            let mut response = ResponseBuilder::new("orch");
            response.extend_blocks(blocks);
            response.extend_references(outcome.references());
            for result in &outcome.results {
                if result.record.is_some() {
                    response.used_tool(result.tool_name.clone());
                }
            }
            if spec.graph_spec.is_some() {
                response.next_action(
                    "Widen the view",
                    format!("{} with greater depth", request.question),
                );
            }
            if spec.metric_spec.is_some() {
                response.next_action(
                    "Compare with the previous period",
                    format!("{} compared to the period before", request.question),
                );
            }

            let status = trace_status(&outcome);
            if status != TraceStatus::Ok {
                if let Some(error) = first_step_error(&outcome) {
                    response.error(error);
                }
            }
            return self.present(builder, response, status, &request, &events).await;
        }
    }

    /// Final shaping shared by all exits: the Present span, trace flush and
    /// query-history append.
    async fn present(
        &self,
        mut builder: TraceBuilder,
        response: ResponseBuilder,
        status: TraceStatus,
        request: &AskRequest,
        events: &Option<UnboundedSender<StreamEvent>>,
    ) -> AskResponse {
        let started = Instant::now();
        builder.record_stage(StageSpan {
            stage: StageName::Present,
            input: Value::Null,
            output: json!({"status": status}),
            elapsed_ms: started.elapsed().as_millis() as u64,
            status: SpanStatus::Ok,
            warnings: vec![],
            errors: vec![],
            references: vec![],
            applied_assets: Default::default(),
            created_at: Utc::now(),
        });
        emit_progress(events, &builder, StageName::Present, json!({"status": status}));

        let trace = builder.finish(status);
        if let Err(err) = self.traces.append(trace.clone()).await {
            log::error!("failed to persist trace {}: {err}", trace.trace_id);
        }
        self.history
            .append(QueryHistoryEntry {
                question: request.question.clone(),
                tenant_id: request.tenant_id.clone(),
                plan_summary: json!({"stages": trace.stages.len()}),
                result_summary: json!({"status": status, "tool_calls": trace.tool_calls.len()}),
                trace_id: trace.trace_id,
                created_at: Utc::now(),
            })
            .await;
        response.build(trace)
    }

    /// Hard-failure exit: the response still carries the full trace and
    /// the error code; internals stay out of the message.
    async fn fail(&self, builder: TraceBuilder, route: &str, error: OpsError) -> AskResponse {
        let trace = builder.finish(TraceStatus::Error);
        if let Err(err) = self.traces.append(trace.clone()).await {
            log::error!("failed to persist trace {}: {err}", trace.trace_id);
        }
        let mut response = ResponseBuilder::new(route);
        response.error(error);
        response.build(trace)
    }
}

fn error_span(stage: StageName, input: Value, error: &OpsError, started: Instant) -> StageSpan {
    StageSpan {
        stage,
        input,
        output: error.public(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        status: SpanStatus::Error,
        warnings: vec![],
        errors: vec![error.to_string()],
        references: vec![],
        applied_assets: Default::default(),
        created_at: Utc::now(),
    }
}

fn emit_progress(
    events: &Option<UnboundedSender<StreamEvent>>,
    builder: &TraceBuilder,
    stage: StageName,
    detail: Value,
) {
    if let Some(sender) = events {
        let _ = sender.send(StreamEvent::Progress(ProgressEvent {
            trace_id: builder.trace_id(),
            stage: stage.to_string(),
            detail,
        }));
    }
}

/// A replan is worth asking for when a required step failed with a
/// retryable code, or the chain was cancelled at its deadline.
fn replan_trigger(outcome: &crate::chain::ChainOutcome) -> Option<ReplanTrigger> {
    let cancelled = outcome
        .results
        .iter()
        .any(|result| result.status == StepStatus::Cancelled);
    if cancelled {
        return Some(ReplanTrigger {
            trigger_type: TriggerType::Timeout,
            stage: StageName::Execute,
            reason: "chain deadline cancelled in-flight steps".into(),
            severity: TriggerSeverity::Critical,
            error_code: Some(ErrorCode::ExecuteTimeout),
        });
    }
    outcome.results.iter().find_map(|result| {
        let error = result.error.as_ref()?;
        if !error.retryable || error.code == ErrorCode::DataNotFound {
            return None;
        }
        Some(ReplanTrigger {
            trigger_type: match error.code {
                ErrorCode::ToolTimeout | ErrorCode::ExecuteTimeout => TriggerType::Timeout,
                _ => TriggerType::Error,
            },
            stage: StageName::Execute,
            reason: format!("step '{}' failed: {}", result.step_id, error.code),
            severity: TriggerSeverity::Warning,
            error_code: Some(error.code),
        })
    })
}

/// Not-found failures keep the answer healthy; anything else degrades it.
fn trace_status(outcome: &crate::chain::ChainOutcome) -> TraceStatus {
    if outcome.status == ChainStatus::Complete {
        return TraceStatus::Ok;
    }
    let benign = outcome.results.iter().all(|result| match result.status {
        StepStatus::Ok => true,
        StepStatus::Error => result
            .error
            .as_ref()
            .map(|error| error.code == ErrorCode::DataNotFound)
            .unwrap_or(false),
        StepStatus::SkippedDepFailed | StepStatus::Cancelled => false,
    });
    if benign {
        TraceStatus::Ok
    } else {
        TraceStatus::Partial
    }
}

fn first_step_error(outcome: &crate::chain::ChainOutcome) -> Option<OpsError> {
    outcome
        .results
        .iter()
        .find_map(|result| result.error.clone())
        .filter(|error| error.code != ErrorCode::DataNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::ChainExecutor;
    use crate::breaker::CircuitBreakerManager;
    use crate::config::OpsConfig;
    use crate::llm::FixedLlm;
    use crate::pipeline::MemoryQueryHistoryStore;
    use crate::planner::Planner;
    use crate::registry::policies::{
        PLANNER_KEYWORDS_ASSET, PLAN_BUDGET_ASSET, VIEW_DEPTH_ASSET,
    };
    use crate::registry::{AssetRegistry, MemoryAssetStore, RegistryCaches};
    use crate::schemas::{AssetDraft, AssetKind, Block, ToolKind};
    use crate::tools::{ResultCache, StaticDispatcher, ToolExecutor, ToolRegistry};
    use crate::tracer::MemoryTraceStore;
    use crate::validator::PlanValidator;
    use futures::StreamExt;
    use std::time::Duration;

    async fn publish(
        registry: &AssetRegistry,
        kind: AssetKind,
        name: &str,
        tool_type: Option<ToolKind>,
        content: Value,
    ) {
        let draft = registry
            .create_draft(
                AssetDraft {
                    kind,
                    name: name.into(),
                    scope: "ops".into(),
                    tenant_id: "t1".into(),
                    content,
                    tool_type,
                    is_system: false,
                    description: "seeded".into(),
                    tags: Default::default(),
                },
                "system",
            )
            .await
            .unwrap();
        registry.publish(draft.id, "system").await.unwrap();
    }

    async fn seeded_registry() -> Arc<AssetRegistry> {
        let registry = Arc::new(AssetRegistry::new(Arc::new(MemoryAssetStore::new())));
        publish(
            &registry,
            AssetKind::Policy,
            PLAN_BUDGET_ASSET,
            None,
            json!({
                "max_steps": 6,
                "overall_timeout_secs": 20,
                "max_graph_depth": 5,
                "max_parallel": 3
            }),
        )
        .await;
        publish(
            &registry,
            AssetKind::Policy,
            VIEW_DEPTH_ASSET,
            None,
            json!({
                "views": {
                    "DEPENDENCY": {"max_depth": 3, "default_depth": 2},
                    "SUMMARY": {"max_depth": 1, "default_depth": 1},
                    "COMPOSITION": {"max_depth": 3, "default_depth": 2},
                    "IMPACT": {"max_depth": 3, "default_depth": 2},
                    "PATH": {"max_depth": 4, "default_depth": 2},
                    "NEIGHBORS": {"max_depth": 1, "default_depth": 1}
                }
            }),
        )
        .await;
        publish(
            &registry,
            AssetKind::Mapping,
            PLANNER_KEYWORDS_ASSET,
            None,
            json!({
                "metric_aliases": {"cpu": "cpu_usage"},
                "aggregation_keywords": ["total", "count", "how many"],
                "graph_scope_keywords": {"dependency map": "DEPENDENCY"},
                "list_table_hints": ["list"],
                "filterable_fields": ["zone"]
            }),
        )
        .await;
        for (name, aliases) in [
            ("ci.aggregate_count", json!(["ci"])),
            ("ci.search", json!([])),
            ("ci.suggest", json!([])),
            ("metric.series", json!([])),
            ("graph.query", json!([])),
        ] {
            publish(
                &registry,
                AssetKind::Tool,
                name,
                Some(ToolKind::HttpApi),
                json!({
                    "http": {"url": "https://ops.internal/x", "method": "GET"},
                    "cacheable": false,
                    "timeout_secs": 5,
                    "aliases": aliases
                }),
            )
            .await;
        }
        registry
    }

    async fn runner_with(
        registry: Arc<AssetRegistry>,
        dispatcher: StaticDispatcher,
        llm: FixedLlm,
    ) -> (Arc<PipelineRunner>, Arc<MemoryTraceStore>) {
        let caches = Arc::new(RegistryCaches::new(Arc::clone(&registry), "ops"));
        let tools = Arc::new(ToolRegistry::new(Arc::clone(&registry), "ops"));
        let tool_executor = Arc::new(ToolExecutor::new(
            Arc::clone(&tools),
            Arc::new(dispatcher),
            Arc::new(ResultCache::new(Duration::from_secs(60))),
            Arc::new(CircuitBreakerManager::new(Default::default())),
        ));
        let planner = Arc::new(Planner::new(
            Arc::clone(&registry),
            Arc::clone(&caches),
            Arc::clone(&tools),
            Arc::new(llm),
            "ops",
        ));
        let validator = Arc::new(PlanValidator::new(Arc::clone(&caches), Arc::clone(&tools)));
        let traces = Arc::new(MemoryTraceStore::new());
        let runner = Arc::new(PipelineRunner::new(
            planner,
            validator,
            Arc::new(ChainExecutor::new(tool_executor)),
            traces.clone() as Arc<dyn TraceStore>,
            Arc::new(MemoryQueryHistoryStore::default()),
            Arc::new(OpsConfig::default()),
        ));
        (runner, traces)
    }

    #[tokio::test]
    async fn total_count_question_runs_one_tool() {
        let registry = seeded_registry().await;
        let dispatcher = StaticDispatcher::default().with_output(
            "ci.aggregate_count",
            json!({"columns": ["total"], "rows": [{"total": 128}], "row_count": 1}),
        );
        let (runner, _) = runner_with(registry, dispatcher, FixedLlm::unreachable()).await;

        let response = runner
            .ask(AskRequest::new("Total number of CIs.", "t1"))
            .await;
        assert_eq!(response.meta.route, "orch");
        assert_eq!(response.meta.used_tools, vec!["ci.aggregate_count"]);
        assert!(matches!(
            &response.blocks[0],
            Block::Text { text } if text == "total: 128"
        ));
        assert_eq!(response.trace.status, TraceStatus::Ok);
        assert_eq!(response.trace.tool_calls.len(), 1);
        assert_eq!(response.trace.stages.len(), 5);
    }

    #[tokio::test]
    async fn metric_question_maps_resolved_ids_into_series_step() {
        let registry = seeded_registry().await;
        let dispatcher = StaticDispatcher::default()
            .with_output(
                "ci.search",
                json!({"columns": ["ci_id"], "rows": [{"ci_id": "c-erp-01"}], "row_count": 1}),
            )
            .with_output(
                "metric.series",
                json!({"rows": [
                    {"ts": "2026-07-31T10:00:00Z", "value": 41.5, "ci_id": "c-erp-01"},
                    {"ts": "2026-07-31T11:00:00Z", "value": 47.1, "ci_id": "c-erp-01"}
                ]}),
            );
        let (runner, _) = runner_with(registry, dispatcher, FixedLlm::unreachable()).await;

        let response = runner
            .ask(AskRequest::new(
                "CPU usage of srv-erp-01 over the last 24h",
                "t1",
            ))
            .await;
        assert_eq!(response.trace.status, TraceStatus::Ok);
        assert!(response
            .blocks
            .iter()
            .any(|block| matches!(block, Block::Timeseries { series, .. } if series.len() == 2)));
        assert_eq!(response.trace.tool_calls.len(), 2);
        // The plan recorded in the route span carries the output mapping.
        let route_output = &response.trace.stages[0].output;
        assert!(route_output.to_string().contains("resolve.data.rows.*.ci_id"));
    }

    #[tokio::test]
    async fn parallel_zone_steps_merge_into_one_table() {
        let registry = seeded_registry().await;
        let llm = FixedLlm::default().with_response(
            json!({
                "kind": "plan",
                "steps": [
                    {"step_id": "zone_a", "tool_name": "ci.search",
                     "parameters": {"zone": "zone-a"}},
                    {"step_id": "zone_b", "tool_name": "ci.search",
                     "parameters": {"zone": "zone-b"}}
                ],
                "output_views": ["table"]
            })
            .to_string(),
        );
        let dispatcher = StaticDispatcher::default().with_output(
            "ci.search",
            json!({"columns": ["ci_id", "zone"], "rows": [{"ci_id": "c1", "zone": "a"}], "row_count": 1}),
        );
        let (runner, _) = runner_with(registry, dispatcher, llm).await;

        let response = runner
            .ask(AskRequest::new(
                "which active servers exist across both zones?",
                "t1",
            ))
            .await;
        assert!(response.trace.tool_calls.len() >= 2);
        assert!(response
            .blocks
            .iter()
            .any(|block| matches!(block, Block::Table { rows, .. } if rows.len() == 2)));
    }

    #[tokio::test]
    async fn graph_depth_is_clamped_and_recorded() {
        let registry = seeded_registry().await;
        let dispatcher = StaticDispatcher::default().with_output(
            "graph.query",
            json!({
                "nodes": [{"id": "app-x", "label": "Application"}, {"id": "db-1", "label": "Database"}],
                "edges": [{"source": "app-x", "target": "db-1", "relation": "DEPENDS_ON"}]
            }),
        );
        let (runner, _) = runner_with(registry, dispatcher, FixedLlm::unreachable()).await;

        let response = runner
            .ask(AskRequest::new("Dependency map of app-X depth 10", "t1"))
            .await;
        let graph = response
            .blocks
            .iter()
            .find_map(|block| match block {
                Block::Graph { depth, .. } => Some(*depth),
                _ => None,
            })
            .unwrap();
        assert_eq!(graph, 3);

        let validate_output = &response.trace.stages[1].output;
        assert!(validate_output["policy_decisions"]["depth_clamped"].is_object());
    }

    #[tokio::test]
    async fn destructive_question_rejected_without_tool_calls() {
        let registry = seeded_registry().await;
        let (runner, _) =
            runner_with(registry, StaticDispatcher::default(), FixedLlm::unreachable()).await;

        let response = runner.ask(AskRequest::new("Drop table ci.", "t1")).await;
        assert_eq!(response.meta.error_code, Some(ErrorCode::PolicyDeny));
        assert!(response.trace.tool_calls.is_empty());
        assert_eq!(response.meta.route, "reject");
    }

    #[tokio::test]
    async fn not_found_ci_narrates_with_candidates_and_stays_ok() {
        let registry = seeded_registry().await;
        let llm = FixedLlm::default().with_response(
            json!({
                "kind": "plan",
                "steps": [
                    {"step_id": "lookup", "tool_name": "ci.search",
                     "parameters": {"ci_code": "srv-ghost-99"}},
                    {"step_id": "similar", "tool_name": "ci.suggest",
                     "parameters": {"near": "srv-ghost-99"}}
                ],
                "output_views": ["table"]
            })
            .to_string(),
        );
        let dispatcher = StaticDispatcher::default()
            .with_failure(
                "ci.search",
                OpsError::new(ErrorCode::DataNotFound, "no CI matches srv-ghost-99"),
            )
            .with_output(
                "ci.suggest",
                json!({"columns": ["ci_code"], "rows": [
                    {"ci_code": "srv-erp-01"}, {"ci_code": "srv-erp-02"}
                ], "row_count": 2}),
            );
        let (runner, _) = runner_with(registry, dispatcher, llm).await;

        let response = runner
            .ask(AskRequest::new("details of srv-ghost-99 please", "t1"))
            .await;
        assert_eq!(response.trace.status, TraceStatus::Ok);
        assert!(response.meta.error_code.is_none());
        assert!(matches!(
            &response.blocks[0],
            Block::Text { text } if text.contains("No match")
        ));
        assert!(response
            .blocks
            .iter()
            .any(|block| matches!(block, Block::Table { title: Some(title), .. } if title == "Did you mean")));
    }

    #[tokio::test]
    async fn retryable_failure_replans_until_policy_denies() {
        let registry = seeded_registry().await;
        let dispatcher = StaticDispatcher::default().with_failure(
            "ci.aggregate_count",
            OpsError::new(ErrorCode::UpstreamUnavailable, "backend down"),
        );
        let (runner, _) = runner_with(registry, dispatcher, FixedLlm::unreachable()).await;

        let response = runner
            .ask(AskRequest::new("Total number of CIs.", "t1"))
            .await;
        // One replan approved, the retry fails again, the next request is
        // denied by the minimum-interval rule, and the partial answer is
        // surfaced with the error code.
        assert!(!response.trace.replan_events.is_empty());
        assert!(response.trace.replan_events[0].approved);
        assert!(!response.trace.replan_events.last().unwrap().approved);
        assert_eq!(response.trace.status, TraceStatus::Partial);
        assert_eq!(
            response.meta.error_code,
            Some(ErrorCode::UpstreamUnavailable)
        );
    }

    #[tokio::test]
    async fn stream_emits_progress_then_complete() {
        let registry = seeded_registry().await;
        let dispatcher = StaticDispatcher::default().with_output(
            "ci.aggregate_count",
            json!({"columns": ["total"], "rows": [{"total": 7}], "row_count": 1}),
        );
        let (runner, _) = runner_with(registry, dispatcher, FixedLlm::unreachable()).await;

        let events: Vec<StreamEvent> = crate::pipeline::ask_stream(
            runner,
            AskRequest::new("Total number of CIs.", "t1"),
        )
        .collect()
        .await;

        assert!(events.len() >= 2);
        assert!(matches!(events[0], StreamEvent::Progress(_)));
        let StreamEvent::Complete(response) = events.last().unwrap() else {
            panic!("expected terminal complete event");
        };
        assert_eq!(response.meta.used_tools, vec!["ci.aggregate_count"]);
        // Every event renders to a well-formed SSE frame.
        for event in &events {
            let frame = event.to_sse_frame().unwrap();
            assert!(frame.starts_with("event: "));
            assert!(frame.ends_with("\n\n"));
        }
    }

    #[tokio::test]
    async fn traces_are_persisted_and_queryable() {
        let registry = seeded_registry().await;
        let dispatcher = StaticDispatcher::default().with_output(
            "ci.aggregate_count",
            json!({"columns": ["total"], "rows": [{"total": 3}], "row_count": 1}),
        );
        let (runner, traces) = runner_with(registry, dispatcher, FixedLlm::unreachable()).await;

        let response = runner
            .ask(AskRequest::new("Total number of CIs.", "t1"))
            .await;
        let stored = traces
            .get(response.trace.trace_id)
            .await
            .unwrap()
            .expect("trace persisted");
        assert_eq!(stored.question, "Total number of CIs.");
        assert!(stored.finished_at.is_some());
        assert!(stored.created_at <= stored.finished_at.unwrap());
    }
}
