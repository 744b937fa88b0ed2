use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::schemas::{Asset, GraphDirection, GraphView};

use super::RegistryError;

/// Asset names of the policies and mappings the runtime consumes.
pub const PLAN_BUDGET_ASSET: &str = "plan_budget";
pub const VIEW_DEPTH_ASSET: &str = "view_depth";
pub const DISCOVERY_CONFIG_ASSET: &str = "discovery_config";
pub const PLANNER_KEYWORDS_ASSET: &str = "planner_keywords";
pub const PLANNER_PROMPT_ASSET: &str = "planner";
pub const PLANNER_DEFAULTS_ASSET: &str = "planner_defaults";
pub const RELATION_ALLOWLIST_ASSET: &str = "graph_relation_allowlist";

fn parse_content<T: serde::de::DeserializeOwned>(asset: &Asset) -> Result<T, RegistryError> {
    serde_json::from_value(asset.content.clone())
        .map_err(|err| RegistryError::MalformedContent(asset.name.clone(), err.to_string()))
}

/// Execution budget clamps applied to every validated plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetPolicy {
    pub max_steps: usize,
    pub overall_timeout_secs: u64,
    pub max_graph_depth: u32,
    pub max_parallel: usize,
    #[serde(default = "default_step_timeout")]
    pub default_step_timeout_secs: u64,
}

fn default_step_timeout() -> u64 {
    30
}

impl BudgetPolicy {
    pub fn from_asset(asset: &Asset) -> Result<Self, RegistryError> {
        parse_content(asset)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewPolicy {
    pub max_depth: u32,
    pub default_depth: u32,
    #[serde(default = "default_direction")]
    pub default_direction: GraphDirection,
}

fn default_direction() -> GraphDirection {
    GraphDirection::Both
}

/// Per-view depth limits and direction defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewDepthPolicy {
    pub views: HashMap<GraphView, ViewPolicy>,
}

impl ViewDepthPolicy {
    pub fn from_asset(asset: &Asset) -> Result<Self, RegistryError> {
        parse_content(asset)
    }

    pub fn view(&self, view: GraphView) -> Option<&ViewPolicy> {
        self.views.get(&view)
    }
}

/// Keyword mappings driving the deterministic planner pre-pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordMappings {
    /// Surface form -> canonical metric name ("cpu" -> "cpu_usage").
    #[serde(default)]
    pub metric_aliases: HashMap<String, String>,
    #[serde(default)]
    pub aggregation_keywords: Vec<String>,
    /// Surface form -> abstract range name ("last 24 hours" -> "last_24h").
    #[serde(default)]
    pub time_window_keywords: HashMap<String, String>,
    #[serde(default)]
    pub list_table_hints: Vec<String>,
    #[serde(default)]
    pub cep_keywords: Vec<String>,
    /// Surface form -> graph view name ("dependency map" -> "DEPENDENCY").
    #[serde(default)]
    pub graph_scope_keywords: HashMap<String, String>,
    #[serde(default)]
    pub auto_health_keywords: Vec<String>,
    #[serde(default)]
    pub history_keywords: Vec<String>,
    #[serde(default)]
    pub filterable_fields: Vec<String>,
}

impl KeywordMappings {
    pub fn from_asset(asset: &Asset) -> Result<Self, RegistryError> {
        parse_content(asset)
    }
}

/// Output-type priorities and pre-pass confidence threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerDefaults {
    #[serde(default)]
    pub output_type_priorities: Vec<String>,
    #[serde(default = "default_confidence_threshold")]
    pub prepass_confidence_threshold: f64,
}

fn default_confidence_threshold() -> f64 {
    0.8
}

impl Default for PlannerDefaults {
    fn default() -> Self {
        Self {
            output_type_priorities: Vec::new(),
            prepass_confidence_threshold: default_confidence_threshold(),
        }
    }
}

impl PlannerDefaults {
    pub fn from_asset(asset: &Asset) -> Result<Self, RegistryError> {
        parse_content(asset)
    }
}

/// Relation-type allowlists per graph view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelationAllowlist {
    #[serde(default)]
    pub summary_neighbors_allowlist: Vec<String>,
    /// View name -> allowed relation types for that view.
    #[serde(default)]
    pub views: HashMap<GraphView, Vec<String>>,
    #[serde(default)]
    pub exclude_rel_types: Vec<String>,
}

impl RelationAllowlist {
    pub fn from_asset(asset: &Asset) -> Result<Self, RegistryError> {
        parse_content(asset)
    }

    /// Allowed relation types for a view: the view's explicit list when
    /// present, otherwise the summary/neighbors allowlist for those two
    /// views, otherwise everything minus the exclusions (empty = no
    /// restriction beyond exclusions).
    pub fn allowed_for(&self, view: GraphView) -> Option<Vec<String>> {
        if let Some(explicit) = self.views.get(&view) {
            if !explicit.is_empty() {
                return Some(explicit.clone());
            }
        }
        if matches!(view, GraphView::Summary | GraphView::Neighbors)
            && !self.summary_neighbors_allowlist.is_empty()
        {
            return Some(self.summary_neighbors_allowlist.clone());
        }
        None
    }
}
