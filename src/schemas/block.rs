use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A pointer to source material that backed part of an answer: a bound SQL
/// statement, a graph query, a document, an HTTP endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub kind: ReferenceKind,
    /// Stable locator: statement text, URL, document id.
    pub locator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Sql,
    GraphQuery,
    HttpEndpoint,
    Document,
}

impl Reference {
    /// Dedup key: two references to the same locator of the same kind are
    /// the same reference regardless of which tool produced them.
    pub fn dedup_key(&self) -> (ReferenceKind, &str) {
        (self.kind, self.locator.as_str())
    }
}

/// One semantic block of a composed answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "block_type", rename_all = "snake_case")]
pub enum Block {
    Text {
        text: String,
    },
    Markdown {
        markdown: String,
    },
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },
    Timeseries {
        metric: String,
        unit: Option<String>,
        series: Vec<SeriesPoint>,
    },
    Graph {
        nodes: Vec<GraphNode>,
        edges: Vec<GraphEdge>,
        depth: u32,
    },
    References {
        references: Vec<Reference>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub ts: chrono::DateTime<chrono::Utc>,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ci_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub properties: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub relation: String,
}

/// Suggested follow-up the caller can offer the user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextAction {
    pub label: String,
    pub question: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_type_tagging() {
        let block = Block::Text {
            text: "42 items".into(),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["block_type"], "text");

        let table: Block = serde_json::from_value(serde_json::json!({
            "block_type": "table",
            "columns": ["ci_id", "name"],
            "rows": [["c1", "srv-erp-01"]]
        }))
        .unwrap();
        assert!(matches!(table, Block::Table { .. }));
    }

    #[test]
    fn reference_dedup_ignores_tool() {
        let a = Reference {
            kind: ReferenceKind::Sql,
            locator: "SELECT count(*) FROM ci".into(),
            title: None,
            tool: Some("ci.aggregate".into()),
        };
        let b = Reference {
            tool: None,
            ..a.clone()
        };
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
