use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use indoc::indoc;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::llm::Llm;
use crate::registry::policies::{PLANNER_KEYWORDS_ASSET, PLANNER_PROMPT_ASSET};
use crate::registry::{AssetRegistry, RegistryCaches};
use crate::schemas::{
    AssetKind, GraphSpec, MetricSpec, OutputView, PlanOutput, PlanSpec, PlanStep, ReplanPatch,
    TimeRange,
};
use crate::template::TextTemplate;
use crate::tools::ToolRegistry;

use super::{extract_depth, scan_question, Intent, PlannerError, PrepassHints};

/// Canonical tool names the deterministic pre-pass plans with. The alias
/// table maps them onto whatever tools a tenant actually publishes.
#[derive(Debug, Clone)]
pub struct PlannerToolNames {
    pub aggregate: String,
    pub search: String,
    pub metric: String,
    pub graph: String,
    pub history: String,
    pub health: String,
}

impl Default for PlannerToolNames {
    fn default() -> Self {
        Self {
            aggregate: "ci.aggregate_count".into(),
            search: "ci.search".into(),
            metric: "metric.series".into(),
            graph: "graph.query".into(),
            history: "ci.history".into(),
            health: "ops.health_summary".into(),
        }
    }
}

const DEFAULT_SYSTEM_PROMPT: &str = indoc! {"
    You are an operations planner. Given a question about IT
    infrastructure, produce a JSON execution plan. Respond with a single
    JSON object of kind direct_answer, reject, or plan.
"};

const DEFAULT_USER_PROMPT: &str = indoc! {"
    Question: {question}

    Deterministic hints: {hints}

    Available tools: {tools}

    Respond with JSON only.
"};

fn destructive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(drop|truncate|delete|alter|create)\s+(table|index|database|from)\b")
            .unwrap()
    })
}

/// What planning produced, plus everything the tracer wants to know about
/// how it was produced.
#[derive(Debug, Clone)]
pub struct PlannerOutcome {
    pub output: PlanOutput,
    pub hints: PrepassHints,
    pub used_llm: bool,
    pub applied_assets: HashMap<String, i64>,
}

/// LLM-assisted structured plan generation with a deterministic keyword
/// pre-pass. Simple questions never reach the model.
pub struct Planner {
    registry: Arc<AssetRegistry>,
    caches: Arc<RegistryCaches>,
    tools: Arc<ToolRegistry>,
    llm: Arc<dyn Llm>,
    scope: String,
    tool_names: PlannerToolNames,
}

impl Planner {
    pub fn new(
        registry: Arc<AssetRegistry>,
        caches: Arc<RegistryCaches>,
        tools: Arc<ToolRegistry>,
        llm: Arc<dyn Llm>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            caches,
            tools,
            llm,
            scope: scope.into(),
            tool_names: PlannerToolNames::default(),
        }
    }

    pub fn with_tool_names(mut self, tool_names: PlannerToolNames) -> Self {
        self.tool_names = tool_names;
        self
    }

    pub async fn plan(
        &self,
        question: &str,
        tenant_id: &str,
        patch: Option<&ReplanPatch>,
        resolver_asset: Option<&str>,
    ) -> Result<PlannerOutcome, PlannerError> {
        let mut applied_assets = HashMap::new();

        if destructive_re().is_match(question) {
            log::warn!("rejecting destructive request: {question}");
            return Ok(PlannerOutcome {
                output: PlanOutput::Reject {
                    reason: "destructive operations are not executed".into(),
                    confidence: 1.0,
                },
                hints: PrepassHints::default(),
                used_llm: false,
                applied_assets,
            });
        }

        let mappings = self.caches.keyword_mappings(tenant_id).await?;
        let defaults = self.caches.planner_defaults(tenant_id).await?;
        if let Some(asset) = self
            .registry
            .get(AssetKind::Mapping, &self.scope, PLANNER_KEYWORDS_ASSET, tenant_id)
            .await?
        {
            applied_assets.insert(PLANNER_KEYWORDS_ASSET.to_string(), asset.version);
        }

        let hints = scan_question(question, &mappings);
        log::debug!(
            "prepass confidence {:.2}, intent {:?}",
            hints.confidence,
            hints.primary_intent()
        );

        if hints.confidence >= defaults.prepass_confidence_threshold {
            if let Some(output) = self.plan_from_hints(question, &hints, patch) {
                let output = self.postpass(output, tenant_id).await;
                return Ok(PlannerOutcome {
                    output,
                    hints,
                    used_llm: false,
                    applied_assets,
                });
            }
        }

        match self
            .plan_with_llm(question, tenant_id, &hints, resolver_asset, &mut applied_assets)
            .await
        {
            Ok(output) => {
                let output = self.postpass(output, tenant_id).await;
                Ok(PlannerOutcome {
                    output,
                    hints,
                    used_llm: true,
                    applied_assets,
                })
            }
            Err(PlannerError::LlmError(err)) => {
                // Provider down: fall back to the pre-pass even below the
                // confidence threshold, or refuse with the reason.
                log::warn!("llm unreachable ({err}); planning from pre-pass only");
                let output = match self.plan_from_hints(question, &hints, patch) {
                    Some(output) => self.postpass(output, tenant_id).await,
                    None => PlanOutput::Reject {
                        reason: "planner unavailable and the question has no deterministic plan"
                            .into(),
                        confidence: 0.3,
                    },
                };
                Ok(PlannerOutcome {
                    output,
                    hints,
                    used_llm: false,
                    applied_assets,
                })
            }
            Err(other) => Err(other),
        }
    }

    /// Builds a plan purely from the pre-pass hints.
    fn plan_from_hints(
        &self,
        question: &str,
        hints: &PrepassHints,
        patch: Option<&ReplanPatch>,
    ) -> Option<PlanOutput> {
        let intent = hints.primary_intent()?;
        let names = &self.tool_names;
        let filters: Map<String, Value> = hints
            .filters
            .iter()
            .map(|(field, value)| (field.clone(), Value::String(value.clone())))
            .collect();

        let mut spec = match intent {
            Intent::Aggregate => {
                let mut step = PlanStep::new("agg", &names.aggregate).required();
                step.parameters = filters;
                PlanSpec {
                    steps: vec![step],
                    output_views: vec![OutputView::Text],
                    ..Default::default()
                }
            }
            Intent::List => {
                let mut step = PlanStep::new("list", &names.search).required();
                step.parameters = filters;
                PlanSpec {
                    steps: vec![step],
                    output_views: vec![OutputView::Table],
                    ..Default::default()
                }
            }
            Intent::Metric => {
                let metric = hints.metric.clone()?;
                let mut resolve = PlanStep::new("resolve", &names.search).required();
                resolve.parameters = filters;
                resolve
                    .parameters
                    .insert("query".into(), Value::String(question.to_string()));
                let mut series = PlanStep::new("metric", &names.metric)
                    .with_depends_on("resolve")
                    .with_mapping("ci_ids", "resolve.data.rows.*.ci_id")
                    .with_param("metric_name", Value::String(metric.clone()));
                if let Some(range) = &hints.time_range {
                    series
                        .parameters
                        .insert("time_range".into(), Value::String(range.clone()));
                }
                PlanSpec {
                    steps: vec![resolve, series],
                    output_views: vec![OutputView::Timeseries, OutputView::References],
                    metric_spec: Some(MetricSpec {
                        metric_name: metric,
                        time_range: hints.time_range.clone().map(TimeRange::Named),
                        agg: None,
                    }),
                    ..Default::default()
                }
            }
            Intent::Graph => {
                let view = hints.graph_view?;
                let depth = patch
                    .and_then(|patch| patch.depth)
                    .or_else(|| extract_depth(question));
                let mut step = PlanStep::new("graph", &names.graph).required();
                step.parameters
                    .insert("view".into(), Value::String(view.to_string()));
                if let Some(depth) = depth {
                    step.parameters.insert("depth".into(), json!(depth));
                }
                step.parameters
                    .insert("query".into(), Value::String(question.to_string()));
                PlanSpec {
                    steps: vec![step],
                    output_views: vec![OutputView::Graph],
                    graph_spec: Some(GraphSpec {
                        view,
                        depth,
                        direction: None,
                        relation_types: vec![],
                    }),
                    ..Default::default()
                }
            }
            Intent::History => {
                let mut step = PlanStep::new("history", &names.history).required();
                step.parameters = filters;
                if let Some(range) = &hints.time_range {
                    step.parameters
                        .insert("time_range".into(), Value::String(range.clone()));
                }
                PlanSpec {
                    steps: vec![step],
                    output_views: vec![OutputView::Table],
                    ..Default::default()
                }
            }
            Intent::AutoHealth => {
                let mut step = PlanStep::new("health", &names.health).required();
                step.parameters = filters;
                PlanSpec {
                    steps: vec![step],
                    output_views: vec![OutputView::Markdown],
                    auto_spec: Some(crate::schemas::AutoSpec { health_focus: true }),
                    ..Default::default()
                }
            }
        };

        if let Some(patch) = patch {
            for step in &mut spec.steps {
                if let Some(replacement) = patch.swap_tools.get(&step.tool_name) {
                    step.tool_name = replacement.clone();
                }
            }
        }
        Some(PlanOutput::Plan(spec))
    }

    async fn plan_with_llm(
        &self,
        question: &str,
        tenant_id: &str,
        hints: &PrepassHints,
        resolver_asset: Option<&str>,
        applied_assets: &mut HashMap<String, i64>,
    ) -> Result<PlanOutput, PlannerError> {
        let prompt_name = resolver_asset.unwrap_or(PLANNER_PROMPT_ASSET);
        let (system, user) = match self
            .registry
            .get(AssetKind::Prompt, &self.scope, prompt_name, tenant_id)
            .await?
        {
            Some(asset) => {
                applied_assets.insert(prompt_name.to_string(), asset.version);
                let system = asset
                    .content
                    .get("system")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_SYSTEM_PROMPT)
                    .to_string();
                let user = asset
                    .content
                    .get("user")
                    .and_then(Value::as_str)
                    .unwrap_or(DEFAULT_USER_PROMPT)
                    .to_string();
                (system, user)
            }
            None => (
                DEFAULT_SYSTEM_PROMPT.to_string(),
                DEFAULT_USER_PROMPT.to_string(),
            ),
        };

        let tool_names = self
            .tools
            .list_names(tenant_id)
            .await
            .map_err(|err| PlannerError::PlanningError(err.to_string()))?;
        let mut inputs = Map::new();
        inputs.insert("question".into(), Value::String(question.to_string()));
        inputs.insert(
            "hints".into(),
            serde_json::to_value(hints).unwrap_or(Value::Null),
        );
        inputs.insert("tools".into(), json!(tool_names));
        let user = TextTemplate::new(user)
            .format(&inputs)
            .map_err(|err| PlannerError::PlanningError(err.to_string()))?;

        let completion = self.llm.complete(&system, &user).await?;
        match parse_plan_json(&completion) {
            Ok(output) => Ok(output),
            Err(first_error) => {
                log::warn!("malformed plan JSON ({first_error}); one repair retry");
                let repair = format!(
                    "{user}\n\nThe previous response was not valid JSON \
                     ({first_error}). Respond again with ONLY the JSON object."
                );
                let retry = self.llm.complete(&system, &repair).await?;
                parse_plan_json(&retry).map_err(|err| {
                    PlannerError::PlanningError(format!(
                        "model returned malformed plan JSON after repair retry: {err}"
                    ))
                })
            }
        }
    }

    /// Rewrites plan tool names through the registry's alias table. Names
    /// the registry cannot resolve are left for the validator to reject.
    async fn postpass(&self, output: PlanOutput, tenant_id: &str) -> PlanOutput {
        let PlanOutput::Plan(mut spec) = output else {
            return output;
        };
        for step in &mut spec.steps {
            match self.tools.resolve_name(&step.tool_name, tenant_id).await {
                Ok(canonical) => step.tool_name = canonical,
                Err(_) => {
                    log::warn!("planner chose unknown tool '{}'", step.tool_name);
                }
            }
        }
        PlanOutput::Plan(spec)
    }
}

/// Extracts and parses the first JSON object in a completion, tolerating
/// code fences and prose around it.
fn parse_plan_json(completion: &str) -> Result<PlanOutput, String> {
    let trimmed = completion.trim();
    let candidate = if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        &trimmed[start..=end]
    } else {
        trimmed
    };
    serde_json::from_str(candidate).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::FixedLlm;
    use crate::registry::MemoryAssetStore;
    use crate::schemas::AssetDraft;
    use crate::schemas::GraphView;

    async fn seeded() -> (Arc<AssetRegistry>, Planner) {
        let registry = Arc::new(AssetRegistry::new(Arc::new(MemoryAssetStore::new())));
        let draft = registry
            .create_draft(
                AssetDraft {
                    kind: AssetKind::Mapping,
                    name: PLANNER_KEYWORDS_ASSET.into(),
                    scope: "ops".into(),
                    tenant_id: "t1".into(),
                    content: json!({
                        "metric_aliases": {"cpu": "cpu_usage"},
                        "aggregation_keywords": ["total", "count"],
                        "graph_scope_keywords": {"dependency map": "DEPENDENCY"},
                        "list_table_hints": ["list"],
                        "filterable_fields": ["zone"]
                    }),
                    tool_type: None,
                    is_system: false,
                    description: String::new(),
                    tags: Default::default(),
                },
                "system",
            )
            .await
            .unwrap();
        registry.publish(draft.id, "system").await.unwrap();

        for name in ["ci.aggregate_count", "ci.search", "metric.series", "graph.query"] {
            let draft = registry
                .create_draft(
                    AssetDraft {
                        kind: AssetKind::Tool,
                        name: name.into(),
                        scope: "ops".into(),
                        tenant_id: "t1".into(),
                        content: json!({
                            "http": {"url": "https://api.internal/x", "method": "GET"}
                        }),
                        tool_type: Some(crate::schemas::ToolKind::HttpApi),
                        is_system: false,
                        description: "tool".into(),
                        tags: Default::default(),
                    },
                    "system",
                )
                .await
                .unwrap();
            registry.publish(draft.id, "system").await.unwrap();
        }

        let caches = Arc::new(RegistryCaches::new(Arc::clone(&registry), "ops"));
        let tools = Arc::new(ToolRegistry::new(Arc::clone(&registry), "ops"));
        let planner = Planner::new(
            Arc::clone(&registry),
            caches,
            tools,
            Arc::new(FixedLlm::unreachable()),
            "ops",
        );
        (registry, planner)
    }

    #[tokio::test]
    async fn aggregate_question_plans_without_llm() {
        let (_registry, planner) = seeded().await;
        let outcome = planner.plan("Total number of CIs.", "t1", None, None).await.unwrap();
        assert!(!outcome.used_llm);
        let spec = outcome.output.as_plan().unwrap();
        assert_eq!(spec.steps.len(), 1);
        assert_eq!(spec.steps[0].tool_name, "ci.aggregate_count");
    }

    #[tokio::test]
    async fn metric_question_plans_resolve_then_series() {
        let (_registry, planner) = seeded().await;
        let outcome = planner
            .plan("CPU usage of srv-erp-01 over the last 24h", "t1", None, None)
            .await
            .unwrap();
        let spec = outcome.output.as_plan().unwrap();
        assert_eq!(spec.steps.len(), 2);
        assert_eq!(spec.steps[1].depends_on, vec!["resolve"]);
        assert_eq!(
            spec.steps[1].output_mapping.get("ci_ids").unwrap(),
            "resolve.data.rows.*.ci_id"
        );
        assert!(spec.metric_spec.is_some());
    }

    #[tokio::test]
    async fn destructive_question_is_rejected() {
        let (_registry, planner) = seeded().await;
        let outcome = planner.plan("Drop table ci.", "t1", None, None).await.unwrap();
        assert!(matches!(outcome.output, PlanOutput::Reject { .. }));
    }

    #[tokio::test]
    async fn graph_question_carries_requested_depth() {
        let (_registry, planner) = seeded().await;
        let outcome = planner
            .plan("Dependency map of app-X depth 10", "t1", None, None)
            .await
            .unwrap();
        let spec = outcome.output.as_plan().unwrap();
        let graph_spec = spec.graph_spec.as_ref().unwrap();
        assert_eq!(graph_spec.view, GraphView::Dependency);
        assert_eq!(graph_spec.depth, Some(10));
    }

    #[tokio::test]
    async fn llm_unreachable_on_ambiguous_question_rejects() {
        let (_registry, planner) = seeded().await;
        let outcome = planner
            .plan("what do you think about our setup?", "t1", None, None)
            .await
            .unwrap();
        assert!(matches!(outcome.output, PlanOutput::Reject { .. }));
        assert!(!outcome.used_llm);
    }

    #[tokio::test]
    async fn llm_json_is_parsed_with_fence_tolerance() {
        let (registry, _) = seeded().await;
        let caches = Arc::new(RegistryCaches::new(Arc::clone(&registry), "ops"));
        let tools = Arc::new(ToolRegistry::new(Arc::clone(&registry), "ops"));
        let llm = FixedLlm::default().with_response(
            "Here is the plan:\n```json\n{\"kind\": \"direct_answer\", \"text\": \"42\", \"confidence\": 0.7}\n```",
        );
        let planner = Planner::new(registry, caches, tools, Arc::new(llm), "ops");

        let outcome = planner
            .plan("something ambiguous", "t1", None, None)
            .await
            .unwrap();
        assert!(outcome.used_llm);
        assert!(matches!(outcome.output, PlanOutput::DirectAnswer { .. }));
    }

    #[tokio::test]
    async fn replan_patch_overrides_depth() {
        let (_registry, planner) = seeded().await;
        let patch = ReplanPatch {
            depth: Some(2),
            ..Default::default()
        };
        let outcome = planner
            .plan("Dependency map of app-X depth 10", "t1", Some(&patch), None)
            .await
            .unwrap();
        let spec = outcome.output.as_plan().unwrap();
        assert_eq!(spec.graph_spec.as_ref().unwrap().depth, Some(2));
    }
}
