use serde_json::Value;

use crate::chain::{ChainOutcome, StepStatus};
use crate::error::ErrorCode;
use crate::schemas::{
    Block, GraphEdge, GraphNode, OutputView, PlanSpec, SeriesPoint,
};

/// Composes the semantic blocks a plan's `output_views` ask for out of the
/// chain's step results.
pub fn compose_blocks(spec: &PlanSpec, chain: &ChainOutcome) -> (Vec<Block>, Vec<String>) {
    let mut blocks = Vec::new();
    let mut warnings = Vec::new();

    // Not-found steps compose to an explicit empty-result narrative
    // instead of failing the answer.
    for result in &chain.results {
        if let Some(error) = &result.error {
            if error.code == ErrorCode::DataNotFound {
                blocks.push(Block::Text {
                    text: format!(
                        "No match found for step '{}'. Check the identifier and try again.",
                        result.step_id
                    ),
                });
                if let Some(candidates) = candidate_table(chain) {
                    blocks.push(candidates);
                }
            }
        }
    }

    for view in &spec.output_views {
        match view {
            OutputView::Text => {
                if let Some(block) = text_block(chain) {
                    blocks.push(block);
                }
            }
            OutputView::Table => {
                if let Some(block) = table_block(chain) {
                    blocks.push(block);
                } else {
                    warnings.push("no tabular data for table view".into());
                }
            }
            OutputView::Timeseries => {
                if let Some(block) = timeseries_block(spec, chain) {
                    blocks.push(block);
                } else {
                    warnings.push("no series data for timeseries view".into());
                }
            }
            OutputView::Graph => {
                if let Some(block) = graph_block(spec, chain) {
                    blocks.push(block);
                } else {
                    warnings.push("no graph data for graph view".into());
                }
            }
            OutputView::References => {
                let references = chain.references();
                if !references.is_empty() {
                    blocks.push(Block::References { references });
                }
            }
            OutputView::Markdown => {
                if let Some(block) = markdown_block(chain) {
                    blocks.push(block);
                }
            }
        }
    }

    if blocks.is_empty() {
        if let Some(block) = text_block(chain) {
            blocks.push(block);
        }
    }
    (blocks, warnings)
}

fn rows_of(result_data: &Value) -> Option<&Vec<Value>> {
    result_data.get("rows").and_then(Value::as_array)
}

/// A single-row single-column result reads as "label: value"; anything
/// else reads as a row count.
fn text_block(chain: &ChainOutcome) -> Option<Block> {
    let result = chain
        .results
        .iter()
        .find(|result| result.status == StepStatus::Ok)?;
    let rows = rows_of(&result.data)?;
    let text = match rows.first().and_then(Value::as_object) {
        Some(first) if rows.len() == 1 && first.len() == 1 => {
            let (column, value) = first.iter().next()?;
            format!("{column}: {value}")
        }
        _ => format!("{} rows returned", rows.len()),
    };
    Some(Block::Text { text })
}

/// Merges tabular results from every successful step that shares the first
/// step's columns; parallel siblings with the same shape land in one
/// table.
fn table_block(chain: &ChainOutcome) -> Option<Block> {
    let mut columns: Option<Vec<String>> = None;
    let mut merged: Vec<Vec<Value>> = Vec::new();

    for result in &chain.results {
        if result.status != StepStatus::Ok {
            continue;
        }
        let Some(rows) = rows_of(&result.data) else {
            continue;
        };
        let Some(step_columns) = result
            .data
            .get("columns")
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect::<Vec<String>>()
            })
            .or_else(|| {
                rows.first()
                    .and_then(Value::as_object)
                    .map(|first| first.keys().cloned().collect())
            })
        else {
            continue;
        };

        match &columns {
            None => columns = Some(step_columns.clone()),
            Some(existing) if existing != &step_columns => continue,
            Some(_) => {}
        }
        for row in rows {
            let Some(object) = row.as_object() else { continue };
            merged.push(
                step_columns
                    .iter()
                    .map(|column| object.get(column).cloned().unwrap_or(Value::Null))
                    .collect(),
            );
        }
    }

    columns.map(|columns| Block::Table {
        columns,
        rows: merged,
        title: None,
    })
}

fn timeseries_block(spec: &PlanSpec, chain: &ChainOutcome) -> Option<Block> {
    let metric = spec
        .metric_spec
        .as_ref()
        .map(|metric_spec| metric_spec.metric_name.clone())
        .unwrap_or_else(|| "metric".into());

    let mut series = Vec::new();
    for result in &chain.results {
        if result.status != StepStatus::Ok {
            continue;
        }
        let Some(rows) = rows_of(&result.data) else {
            continue;
        };
        for row in rows {
            let Some(object) = row.as_object() else { continue };
            let ts = object
                .get("ts")
                .or_else(|| object.get("timestamp"))
                .and_then(Value::as_str)
                .and_then(|text| text.parse::<chrono::DateTime<chrono::Utc>>().ok());
            let value = object
                .get("value")
                .or_else(|| object.get("avg_value"))
                .and_then(Value::as_f64);
            if let (Some(ts), Some(value)) = (ts, value) {
                series.push(SeriesPoint {
                    ts,
                    value,
                    ci_id: object
                        .get("ci_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            }
        }
    }
    if series.is_empty() {
        return None;
    }
    Some(Block::Timeseries {
        metric,
        unit: None,
        series,
    })
}

fn graph_block(spec: &PlanSpec, chain: &ChainOutcome) -> Option<Block> {
    let depth = spec
        .graph_spec
        .as_ref()
        .and_then(|graph_spec| graph_spec.depth)
        .unwrap_or(1);

    for result in &chain.results {
        if result.status != StepStatus::Ok {
            continue;
        }
        // Native shape from a graph tool.
        if let (Some(nodes), Some(edges)) = (
            result.data.get("nodes").and_then(Value::as_array),
            result.data.get("edges").and_then(Value::as_array),
        ) {
            let nodes = nodes
                .iter()
                .filter_map(|node| {
                    let object = node.as_object()?;
                    Some(GraphNode {
                        id: object.get("id")?.as_str()?.to_string(),
                        label: object
                            .get("label")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        properties: object
                            .get("properties")
                            .cloned()
                            .unwrap_or(Value::Null),
                    })
                })
                .collect();
            let edges = edges
                .iter()
                .filter_map(|edge| {
                    let object = edge.as_object()?;
                    Some(GraphEdge {
                        source: object.get("source")?.as_str()?.to_string(),
                        target: object.get("target")?.as_str()?.to_string(),
                        relation: object
                            .get("relation")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    })
                })
                .collect();
            return Some(Block::Graph {
                nodes,
                edges,
                depth,
            });
        }
        // Tabular fallback: source/target/relation columns.
        if let Some(rows) = rows_of(&result.data) {
            let mut nodes: Vec<GraphNode> = Vec::new();
            let mut edges = Vec::new();
            for row in rows {
                let Some(object) = row.as_object() else { continue };
                let (Some(source), Some(target)) = (
                    object.get("source").and_then(Value::as_str),
                    object.get("target").and_then(Value::as_str),
                ) else {
                    continue;
                };
                for id in [source, target] {
                    if !nodes.iter().any(|node: &GraphNode| node.id == id) {
                        nodes.push(GraphNode {
                            id: id.to_string(),
                            label: id.to_string(),
                            properties: Value::Null,
                        });
                    }
                }
                edges.push(GraphEdge {
                    source: source.to_string(),
                    target: target.to_string(),
                    relation: object
                        .get("relation")
                        .and_then(Value::as_str)
                        .unwrap_or("RELATED_TO")
                        .to_string(),
                });
            }
            if !edges.is_empty() {
                return Some(Block::Graph {
                    nodes,
                    edges,
                    depth,
                });
            }
        }
    }
    None
}

fn markdown_block(chain: &ChainOutcome) -> Option<Block> {
    let mut sections = Vec::new();
    for result in &chain.results {
        if result.status != StepStatus::Ok {
            continue;
        }
        if let Some(text) = result.data.get("markdown").and_then(Value::as_str) {
            sections.push(text.to_string());
        } else if let Some(rows) = rows_of(&result.data) {
            sections.push(format!("**{}**: {} rows", result.step_id, rows.len()));
        }
    }
    if sections.is_empty() {
        None
    } else {
        Some(Block::Markdown {
            markdown: sections.join("\n\n"),
        })
    }
}

/// A small candidate list drawn from whichever step did return rows, shown
/// next to a not-found narrative.
fn candidate_table(chain: &ChainOutcome) -> Option<Block> {
    for result in &chain.results {
        if result.status != StepStatus::Ok {
            continue;
        }
        let Some(rows) = rows_of(&result.data) else {
            continue;
        };
        if rows.is_empty() {
            continue;
        }
        let mut table = table_block_for_rows(rows)?;
        if let Block::Table { title, .. } = &mut table {
            *title = Some("Did you mean".into());
        }
        return Some(table);
    }
    None
}

fn table_block_for_rows(rows: &[Value]) -> Option<Block> {
    let columns: Vec<String> = rows
        .first()?
        .as_object()?
        .keys()
        .cloned()
        .collect();
    let data = rows
        .iter()
        .filter_map(Value::as_object)
        .take(5)
        .map(|object| {
            columns
                .iter()
                .map(|column| object.get(column).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect();
    Some(Block::Table {
        columns,
        rows: data,
        title: None,
    })
}
