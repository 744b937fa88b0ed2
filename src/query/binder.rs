use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::QueryError;

/// A statement with every parameter bound positionally. No value is ever
/// interpolated into the SQL text.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Declares a clause that is removed entirely when its guard parameter
/// binds an empty list, instead of binding an always-false predicate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmptyGuard {
    pub param: String,
    pub clause: String,
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)\}").unwrap())
}

fn in_clause_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)IN\s*\(\s*$").unwrap())
}

fn is_empty_list(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Array(items)) => items.is_empty(),
        _ => false,
    }
}

/// Binds named `{param}` placeholders to positional `$n` parameters.
///
/// - A list parameter directly inside an `IN (...)` expands to one
///   placeholder per element.
/// - A list parameter anywhere else binds as a single native array value
///   (the `= ANY($n)` form).
/// - Guarded clauses vanish when their parameter is an empty list.
pub fn bind_named(
    statement: &str,
    params: &Map<String, Value>,
    guards: &[EmptyGuard],
) -> Result<BoundStatement, QueryError> {
    let mut sql_template = statement.to_string();
    let mut suppressed: Vec<&str> = Vec::new();
    for guard in guards {
        if is_empty_list(params.get(&guard.param)) {
            if let Some(position) = sql_template.find(&guard.clause) {
                sql_template.replace_range(position..position + guard.clause.len(), "");
                suppressed.push(guard.param.as_str());
            }
        }
    }

    let mut sql = String::with_capacity(sql_template.len());
    let mut bound: Vec<Value> = Vec::new();
    let mut cursor = 0usize;

    for capture in placeholder_re().captures_iter(&sql_template) {
        let whole = capture.get(0).expect("capture group 0 always present");
        let name = &capture[1];
        sql.push_str(&sql_template[cursor..whole.start()]);
        cursor = whole.end();

        if suppressed.contains(&name) {
            return Err(QueryError::InvalidParams(format!(
                "parameter '{name}' appears outside its guarded clause"
            )));
        }
        let value = params.get(name).ok_or_else(|| {
            QueryError::InvalidParams(format!("missing required parameter '{name}'"))
        })?;

        match value {
            Value::Array(items) if in_clause_re().is_match(&sql) => {
                if items.is_empty() {
                    return Err(QueryError::InvalidParams(format!(
                        "empty list for IN parameter '{name}'; declare an empty guard"
                    )));
                }
                let placeholders: Vec<String> = items
                    .iter()
                    .map(|item| {
                        bound.push(item.clone());
                        format!("${}", bound.len())
                    })
                    .collect();
                sql.push_str(&placeholders.join(", "));
            }
            other => {
                bound.push(other.clone());
                sql.push_str(&format!("${}", bound.len()));
            }
        }
    }
    sql.push_str(&sql_template[cursor..]);

    Ok(BoundStatement {
        sql: sql.split_whitespace().collect::<Vec<_>>().join(" "),
        params: bound,
    })
}
