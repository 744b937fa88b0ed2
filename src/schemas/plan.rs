use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The typed result of planning: answer directly, refuse, or execute a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanOutput {
    DirectAnswer { text: String, confidence: f64 },
    Reject { reason: String, confidence: f64 },
    Plan(PlanSpec),
}

impl PlanOutput {
    pub fn is_plan(&self) -> bool {
        matches!(self, PlanOutput::Plan(_))
    }

    pub fn as_plan(&self) -> Option<&PlanSpec> {
        match self {
            PlanOutput::Plan(spec) => Some(spec),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSpec {
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub output_views: Vec<OutputView>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregate_spec: Option<AggregateSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_spec: Option<GraphSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric_spec: Option<MetricSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_spec: Option<HistorySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_spec: Option<AutoSpec>,
}

impl PlanSpec {
    pub fn step(&self, step_id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

/// One tool invocation inside a plan. `output_mapping` routes fields from
/// earlier step results into this step's parameters before execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub step_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// target parameter name -> `"<step_id>.<path>"` source path.
    #[serde(default)]
    pub output_mapping: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_order: Option<u32>,
    /// A failed required step marks its dependents `SKIPPED_DEP_FAILED`;
    /// failures of non-required steps substitute null downstream.
    #[serde(default)]
    pub required: bool,
}

impl PlanStep {
    pub fn new(step_id: impl Into<String>, tool_name: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            tool_name: tool_name.into(),
            parameters: Map::new(),
            depends_on: Vec::new(),
            output_mapping: HashMap::new(),
            execution_order: None,
            required: false,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    pub fn with_mapping(mut self, target: impl Into<String>, source: impl Into<String>) -> Self {
        self.output_mapping.insert(target.into(), source.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

/// Semantic shape of a composed answer block requested by the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputView {
    Text,
    Table,
    Timeseries,
    Graph,
    References,
    Markdown,
}

/// The predefined graph-query shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphView {
    Summary,
    Composition,
    Dependency,
    Impact,
    Path,
    Neighbors,
}

impl GraphView {
    pub const ALL: [GraphView; 6] = [
        GraphView::Summary,
        GraphView::Composition,
        GraphView::Dependency,
        GraphView::Impact,
        GraphView::Path,
        GraphView::Neighbors,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            GraphView::Summary => "SUMMARY",
            GraphView::Composition => "COMPOSITION",
            GraphView::Dependency => "DEPENDENCY",
            GraphView::Impact => "IMPACT",
            GraphView::Path => "PATH",
            GraphView::Neighbors => "NEIGHBORS",
        }
    }
}

impl std::fmt::Display for GraphView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphDirection {
    Incoming,
    Outgoing,
    Both,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSpec {
    pub view: GraphView,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<GraphDirection>,
    #[serde(default)]
    pub relation_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    pub metric_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agg: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSpec {
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub metrics: Vec<AggregateMetric>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetric {
    pub column: String,
    pub agg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AutoSpec {
    #[serde(default)]
    pub health_focus: bool,
}

/// Abstract time window extracted from question text (`last_24h`,
/// `last_7d`, ...) or explicit bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeRange {
    Named(String),
    Bounded {
        from: chrono::DateTime<chrono::Utc>,
        to: chrono::DateTime<chrono::Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plan_output_kind_tag() {
        let direct: PlanOutput = serde_json::from_value(json!({
            "kind": "direct_answer",
            "text": "42 configuration items",
            "confidence": 0.9
        }))
        .unwrap();
        assert!(matches!(direct, PlanOutput::DirectAnswer { .. }));

        let reject: PlanOutput = serde_json::from_value(json!({
            "kind": "reject",
            "reason": "destructive request",
            "confidence": 1.0
        }))
        .unwrap();
        assert!(matches!(reject, PlanOutput::Reject { .. }));
    }

    #[test]
    fn plan_steps_deserialize_with_defaults() {
        let output: PlanOutput = serde_json::from_value(json!({
            "kind": "plan",
            "steps": [
                {"step_id": "agg", "tool_name": "ci.aggregate", "parameters": {"zone": "a"}},
                {
                    "step_id": "metric",
                    "tool_name": "metric.series",
                    "depends_on": ["agg"],
                    "output_mapping": {"ci_ids": "agg.data.rows.*.ci_id"}
                }
            ],
            "output_views": ["timeseries"]
        }))
        .unwrap();

        let spec = output.as_plan().unwrap();
        assert_eq!(spec.steps.len(), 2);
        assert!(!spec.steps[0].required);
        assert_eq!(spec.steps[1].depends_on, vec!["agg"]);
        assert_eq!(
            spec.steps[1].output_mapping.get("ci_ids").unwrap(),
            "agg.data.rows.*.ci_id"
        );
    }

    #[test]
    fn graph_view_uses_upper_case_wire_names() {
        assert_eq!(
            serde_json::to_string(&GraphView::Dependency).unwrap(),
            "\"DEPENDENCY\""
        );
        let view: GraphView = serde_json::from_str("\"NEIGHBORS\"").unwrap();
        assert_eq!(view, GraphView::Neighbors);
    }

    #[test]
    fn named_time_range_round_trips() {
        let range = TimeRange::Named("last_24h".into());
        let json = serde_json::to_value(&range).unwrap();
        assert_eq!(json, json!("last_24h"));
        let back: TimeRange = serde_json::from_value(json).unwrap();
        assert_eq!(back, range);
    }
}
