use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Uniform tabular result returned by SQL and graph connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Rows as objects keyed by column name.
    pub fn to_objects(&self) -> Vec<Map<String, Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect()
            })
            .collect()
    }

    /// The wire shape tool outputs carry: object rows plus counts.
    pub fn into_value(self) -> Value {
        let objects: Vec<Value> = self
            .to_objects()
            .into_iter()
            .map(Value::Object)
            .collect();
        let row_count = objects.len();
        serde_json::json!({
            "columns": self.columns,
            "rows": objects,
            "row_count": row_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objects_zip_columns_with_rows() {
        let result = QueryResult {
            columns: vec!["ci_id".into(), "name".into()],
            rows: vec![vec![json!("c1"), json!("srv-erp-01")]],
        };
        let objects = result.to_objects();
        assert_eq!(objects[0]["ci_id"], json!("c1"));

        let value = result.into_value();
        assert_eq!(value["row_count"], 1);
        assert_eq!(value["rows"][0]["name"], json!("srv-erp-01"));
    }
}
