use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::registry::policies::KeywordMappings;
use crate::schemas::GraphView;

/// Deterministic signal extracted from the question text before any model
/// is consulted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PrepassHints {
    pub wants_aggregate: bool,
    pub wants_list: bool,
    pub wants_history: bool,
    pub auto_health: bool,
    pub metric: Option<String>,
    pub time_range: Option<String>,
    pub graph_view: Option<GraphView>,
    /// `(field, value)` pairs recognized from the filterable-fields list.
    pub filters: Vec<(String, String)>,
    pub confidence: f64,
}

impl PrepassHints {
    /// Which output shape the hints point at, if any single one dominates.
    pub fn primary_intent(&self) -> Option<Intent> {
        if self.graph_view.is_some() {
            return Some(Intent::Graph);
        }
        if self.metric.is_some() {
            return Some(Intent::Metric);
        }
        if self.wants_history {
            return Some(Intent::History);
        }
        if self.auto_health {
            return Some(Intent::AutoHealth);
        }
        if self.wants_list {
            return Some(Intent::List);
        }
        if self.wants_aggregate {
            return Some(Intent::Aggregate);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Aggregate,
    List,
    Metric,
    History,
    Graph,
    AutoHealth,
}

fn relative_window_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)last\s+(\d+)\s*(h|hour|hours|d|day|days|m|min|minutes)").unwrap())
}

fn depth_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)depth\s+(\d+)").unwrap())
}

/// Scans the question against the published keyword mappings. Purely
/// lexical: the same question always yields the same hints.
pub fn scan_question(question: &str, mappings: &KeywordMappings) -> PrepassHints {
    let lower = question.to_lowercase();
    let mut hints = PrepassHints::default();
    let mut matches = 0usize;

    for keyword in &mappings.aggregation_keywords {
        if lower.contains(&keyword.to_lowercase()) {
            hints.wants_aggregate = true;
            matches += 1;
            break;
        }
    }
    for keyword in &mappings.list_table_hints {
        if lower.contains(&keyword.to_lowercase()) {
            hints.wants_list = true;
            matches += 1;
            break;
        }
    }
    for keyword in &mappings.history_keywords {
        if lower.contains(&keyword.to_lowercase()) {
            hints.wants_history = true;
            matches += 1;
            break;
        }
    }
    for keyword in &mappings.auto_health_keywords {
        if lower.contains(&keyword.to_lowercase()) {
            hints.auto_health = true;
            matches += 1;
            break;
        }
    }

    for (surface, canonical) in &mappings.metric_aliases {
        if lower.contains(&surface.to_lowercase()) {
            hints.metric = Some(canonical.clone());
            matches += 1;
            break;
        }
    }

    for (surface, range) in &mappings.time_window_keywords {
        if lower.contains(&surface.to_lowercase()) {
            hints.time_range = Some(range.clone());
            matches += 1;
            break;
        }
    }
    if hints.time_range.is_none() {
        if let Some(capture) = relative_window_re().captures(&lower) {
            let amount = &capture[1];
            let unit = match capture[2].chars().next() {
                Some('h') => "h",
                Some('d') => "d",
                _ => "m",
            };
            hints.time_range = Some(format!("last_{amount}{unit}"));
            matches += 1;
        }
    }

    for (surface, view_name) in &mappings.graph_scope_keywords {
        if lower.contains(&surface.to_lowercase()) {
            hints.graph_view = parse_view(view_name);
            if hints.graph_view.is_some() {
                matches += 1;
            }
            break;
        }
    }

    for field in &mappings.filterable_fields {
        if let Some(value) = extract_filter_value(&lower, field) {
            hints.filters.push((field.clone(), value));
            matches += 1;
        }
    }

    // One clear signal is a confident parse; conflicting or absent
    // signals defer to the model.
    hints.confidence = match (matches, hints.primary_intent()) {
        (0, _) => 0.0,
        (_, None) => 0.2,
        (1, Some(_)) => 0.9,
        (2, Some(_)) => 0.85,
        _ => 0.6,
    };
    hints
}

fn parse_view(name: &str) -> Option<GraphView> {
    match name.to_uppercase().as_str() {
        "SUMMARY" => Some(GraphView::Summary),
        "COMPOSITION" => Some(GraphView::Composition),
        "DEPENDENCY" => Some(GraphView::Dependency),
        "IMPACT" => Some(GraphView::Impact),
        "PATH" => Some(GraphView::Path),
        "NEIGHBORS" => Some(GraphView::Neighbors),
        _ => None,
    }
}

/// Extracts `field <value>` or `field: <value>` or `in <value>` shaped
/// filters for a known filterable field.
fn extract_filter_value(lower_question: &str, field: &str) -> Option<String> {
    let field_lower = field.to_lowercase();
    let position = lower_question.find(&field_lower)?;
    let tail = &lower_question[position + field_lower.len()..];
    let token = tail
        .trim_start_matches([':', '=', ' '])
        .split([' ', ',', '?', '.'])
        .next()?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Requested graph depth mentioned explicitly in the question.
pub fn extract_depth(question: &str) -> Option<u32> {
    depth_re()
        .captures(question)
        .and_then(|capture| capture[1].parse().ok())
}
