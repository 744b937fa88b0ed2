use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::chain::ChainConfig;
use crate::error::{ErrorCode, OpsError};
use crate::query::safety::scan_template_keywords;
use crate::registry::RegistryCaches;
use crate::schemas::{GraphView, PlanOutput, PlanSpec};
use crate::tools::ToolRegistry;

/// Every clamp and rejection the validator applied, recorded into the
/// trace so operators can see why a plan changed shape.
#[derive(Debug, Clone, Default)]
pub struct PolicyDecisions {
    entries: HashMap<String, Value>,
}

impl PolicyDecisions {
    pub fn record(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_value(&self) -> Value {
        json!(self.entries)
    }
}

#[derive(Debug, Clone)]
pub struct ValidatedPlan {
    pub output: PlanOutput,
    pub decisions: PolicyDecisions,
    pub chain_config: ChainConfig,
}

/// Applies policy to a raw plan: budget clamps, view depth clamps,
/// relation allowlists, tenant isolation, tool existence and per-kind
/// safety checks, in that order.
pub struct PlanValidator {
    caches: Arc<RegistryCaches>,
    tools: Arc<ToolRegistry>,
}

impl PlanValidator {
    pub fn new(caches: Arc<RegistryCaches>, tools: Arc<ToolRegistry>) -> Self {
        Self { caches, tools }
    }

    pub async fn validate(
        &self,
        output: PlanOutput,
        tenant_id: &str,
    ) -> Result<ValidatedPlan, OpsError> {
        let budget = self.caches.budget_policy(tenant_id).await?;
        let chain_config = ChainConfig {
            max_parallel: budget.max_parallel,
            deadline: Duration::from_secs(budget.overall_timeout_secs),
        };

        let PlanOutput::Plan(mut spec) = output else {
            // Direct answers and rejections carry nothing to clamp.
            return Ok(ValidatedPlan {
                output,
                decisions: PolicyDecisions::default(),
                chain_config,
            });
        };
        let mut decisions = PolicyDecisions::default();

        // 1. Structural checks.
        if spec.steps.is_empty() {
            return Err(OpsError::new(ErrorCode::PlanInvalid, "plan has no steps"));
        }

        // 2. Budget: step count and graph depth ceilings.
        if spec.steps.len() > budget.max_steps {
            decisions.record(
                "steps_truncated",
                json!({"from": spec.steps.len(), "to": budget.max_steps}),
            );
            log::warn!(
                "plan truncated from {} to {} steps by budget policy",
                spec.steps.len(),
                budget.max_steps
            );
            spec.steps.truncate(budget.max_steps);
        }

        // 3. View policy: clamp depth into [1, max_depth(view)], default
        // the direction.
        let mut clamped_depth = None;
        if let Some(graph_spec) = &mut spec.graph_spec {
            let view_policy = self.caches.view_depth_policy(tenant_id).await?;
            let policy = view_policy.view(graph_spec.view).ok_or_else(|| {
                OpsError::new(
                    ErrorCode::ConfigurationError,
                    format!("view_depth policy has no entry for {}", graph_spec.view),
                )
            })?;
            let requested = graph_spec.depth;
            let ceiling = policy.max_depth.min(budget.max_graph_depth).max(1);
            let effective = requested.unwrap_or(policy.default_depth).clamp(1, ceiling);
            if requested.is_some() && requested != Some(effective) {
                decisions.record(
                    "depth_clamped",
                    json!({
                        "view": graph_spec.view,
                        "requested": requested,
                        "clamped": effective,
                    }),
                );
            }
            graph_spec.depth = Some(effective);
            if graph_spec.direction.is_none() {
                graph_spec.direction = Some(policy.default_direction);
            }
            clamped_depth = Some(effective);

            // 4. Relation allowlist intersection.
            let allowlist = self.caches.relation_allowlist(tenant_id).await?;
            if let Some(allowed) = allowlist.allowed_for(graph_spec.view) {
                if graph_spec.relation_types.is_empty() {
                    graph_spec.relation_types = allowed;
                } else {
                    let before = graph_spec.relation_types.len();
                    graph_spec
                        .relation_types
                        .retain(|relation| allowed.contains(relation));
                    if graph_spec.relation_types.len() != before {
                        decisions.record(
                            "relations_filtered",
                            json!({
                                "view": graph_spec.view,
                                "allowed": graph_spec.relation_types,
                            }),
                        );
                    }
                }
            } else if !graph_spec.relation_types.is_empty()
                && !allowlist.exclude_rel_types.is_empty()
            {
                graph_spec
                    .relation_types
                    .retain(|relation| !allowlist.exclude_rel_types.contains(relation));
            }
        }
        if let Some(effective) = clamped_depth {
            clamp_step_depths(&mut spec, effective);
        }

        // 5. Tenant isolation: explicit tenant parameters must match the
        // caller.
        for step in &spec.steps {
            if let Some(explicit) = step.parameters.get("tenant_id").and_then(Value::as_str) {
                if explicit != tenant_id {
                    return Err(OpsError::new(
                        ErrorCode::TenantMismatch,
                        format!(
                            "step '{}' names tenant '{explicit}' but the caller is '{tenant_id}'",
                            step.step_id
                        ),
                    ));
                }
            }
        }

        // 6 & 7. Tool existence and per-kind pre-safety.
        for step in &spec.steps {
            let tool = match self.tools.get(&step.tool_name, tenant_id).await {
                Ok(tool) => tool,
                Err(_) => {
                    decisions.record(
                        "unknown_tool",
                        json!({"step": step.step_id, "tool": step.tool_name}),
                    );
                    return Err(OpsError::new(
                        ErrorCode::PlanInvalid,
                        format!(
                            "step '{}' references unpublished tool '{}'",
                            step.step_id, step.tool_name
                        ),
                    ));
                }
            };
            if let Some(template) = &tool.query_template {
                let violations = scan_template_keywords(template);
                if !violations.is_empty() {
                    return Err(OpsError::new(
                        ErrorCode::SqlBlocked,
                        violations.join("; "),
                    ));
                }
            }
        }

        Ok(ValidatedPlan {
            output: PlanOutput::Plan(spec),
            decisions,
            chain_config,
        })
    }
}

/// Graph steps carry the clamped depth in their parameters too, so the
/// dispatched query sees the same ceiling the spec records.
fn clamp_step_depths(spec: &mut PlanSpec, effective: u32) {
    for step in &mut spec.steps {
        if let Some(depth) = step.parameters.get("depth").and_then(Value::as_u64) {
            if depth as u32 != effective {
                step.parameters.insert("depth".into(), json!(effective));
            }
        }
    }
}

/// Depth clamp helper shared with tests and the graph tools.
pub fn clamp_depth(requested: Option<u32>, default_depth: u32, max_depth: u32) -> u32 {
    requested.unwrap_or(default_depth).clamp(1, max_depth)
}

/// `view` must be one of the predefined shapes.
pub fn parse_view_name(name: &str) -> Option<GraphView> {
    GraphView::ALL
        .into_iter()
        .find(|view| view.as_str().eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::policies::{PLAN_BUDGET_ASSET, VIEW_DEPTH_ASSET};
    use crate::registry::{AssetRegistry, MemoryAssetStore};
    use crate::schemas::{AssetDraft, AssetKind, GraphSpec, PlanStep, ToolKind};

    async fn publish(registry: &AssetRegistry, kind: AssetKind, name: &str, tool_type: Option<ToolKind>, content: Value) {
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
                    description: "asset".into(),
                    tags: Default::default(),
                },
                "system",
            )
            .await
            .unwrap();
        registry.publish(draft.id, "system").await.unwrap();
    }

    async fn validator() -> PlanValidator {
        let registry = Arc::new(AssetRegistry::new(Arc::new(MemoryAssetStore::new())));
        publish(
            &registry,
            AssetKind::Policy,
            PLAN_BUDGET_ASSET,
            None,
            json!({
                "max_steps": 3,
                "overall_timeout_secs": 30,
                "max_graph_depth": 5,
                "max_parallel": 2
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
                    "SUMMARY": {"max_depth": 1, "default_depth": 1}
                }
            }),
        )
        .await;
        publish(
            &registry,
            AssetKind::Tool,
            "graph.query",
            Some(ToolKind::GraphQuery),
            json!({"source_ref": "graph_main", "query_ref": "graph_view"}),
        )
        .await;
        let caches = Arc::new(RegistryCaches::new(Arc::clone(&registry), "ops"));
        let tools = Arc::new(ToolRegistry::new(registry, "ops"));
        PlanValidator::new(caches, tools)
    }

    fn graph_plan(depth: Option<u32>) -> PlanOutput {
        let mut step = PlanStep::new("graph", "graph.query").required();
        if let Some(depth) = depth {
            step.parameters.insert("depth".into(), json!(depth));
        }
        PlanOutput::Plan(PlanSpec {
            steps: vec![step],
            graph_spec: Some(GraphSpec {
                view: GraphView::Dependency,
                depth,
                direction: None,
                relation_types: vec![],
            }),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn depth_above_max_is_clamped_and_recorded() {
        let validator = validator().await;
        let validated = validator.validate(graph_plan(Some(10)), "t1").await.unwrap();

        let spec = validated.output.as_plan().unwrap();
        let graph_spec = spec.graph_spec.as_ref().unwrap();
        assert_eq!(graph_spec.depth, Some(3));
        assert_eq!(spec.steps[0].parameters["depth"], json!(3));

        let clamp = validated.decisions.get("depth_clamped").unwrap();
        assert_eq!(clamp["requested"], json!(10));
        assert_eq!(clamp["clamped"], json!(3));
    }

    #[tokio::test]
    async fn validation_is_idempotent() {
        let validator = validator().await;
        let once = validator.validate(graph_plan(Some(10)), "t1").await.unwrap();
        let twice = validator.validate(once.output.clone(), "t1").await.unwrap();
        assert_eq!(once.output, twice.output);
        // The second pass sees an in-policy depth, so no clamp is recorded.
        assert!(twice.decisions.get("depth_clamped").is_none());
    }

    #[tokio::test]
    async fn unset_depth_uses_view_default() {
        let validator = validator().await;
        let validated = validator.validate(graph_plan(None), "t1").await.unwrap();
        let spec = validated.output.as_plan().unwrap();
        assert_eq!(spec.graph_spec.as_ref().unwrap().depth, Some(2));
        assert!(validated.decisions.get("depth_clamped").is_none());
    }

    #[tokio::test]
    async fn foreign_tenant_parameter_is_rejected() {
        let validator = validator().await;
        let mut step = PlanStep::new("graph", "graph.query");
        step.parameters.insert("tenant_id".into(), json!("t9"));
        let output = PlanOutput::Plan(PlanSpec {
            steps: vec![step],
            ..Default::default()
        });
        let error = validator.validate(output, "t1").await.unwrap_err();
        assert_eq!(error.code, ErrorCode::TenantMismatch);
    }

    #[tokio::test]
    async fn unknown_tool_is_plan_invalid() {
        let validator = validator().await;
        let output = PlanOutput::Plan(PlanSpec {
            steps: vec![PlanStep::new("x", "ghost.tool")],
            ..Default::default()
        });
        let error = validator.validate(output, "t1").await.unwrap_err();
        assert_eq!(error.code, ErrorCode::PlanInvalid);
    }

    #[tokio::test]
    async fn step_count_clamped_to_budget() {
        let validator = validator().await;
        let steps = (0..5)
            .map(|index| PlanStep::new(format!("s{index}"), "graph.query"))
            .collect();
        let output = PlanOutput::Plan(PlanSpec {
            steps,
            ..Default::default()
        });
        let validated = validator.validate(output, "t1").await.unwrap();
        assert_eq!(validated.output.as_plan().unwrap().steps.len(), 3);
        assert!(validated.decisions.get("steps_truncated").is_some());
    }

    #[tokio::test]
    async fn direct_answer_passes_through() {
        let validator = validator().await;
        let output = PlanOutput::DirectAnswer {
            text: "42".into(),
            confidence: 0.9,
        };
        let validated = validator.validate(output.clone(), "t1").await.unwrap();
        assert_eq!(validated.output, output);
        assert!(validated.decisions.is_empty());
    }
}
