use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::TemplateError;

fn variable_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)\}").unwrap())
}

/// An f-string style template: `{variable}` placeholders substituted from a
/// JSON object. Used for planner prompts, HTTP URL templates and body
/// templates.
#[derive(Debug, Clone)]
pub struct TextTemplate {
    template: String,
    variables: HashSet<String>,
}

impl TextTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        let template = template.into();
        let variables = variable_re()
            .captures_iter(&template)
            .map(|capture| capture[1].to_string())
            .collect();
        Self {
            template,
            variables,
        }
    }

    pub fn variables(&self) -> &HashSet<String> {
        &self.variables
    }

    /// Substitutes every placeholder. A missing variable is an error;
    /// non-string values substitute as compact JSON.
    pub fn format(&self, inputs: &Map<String, Value>) -> Result<String, TemplateError> {
        let mut content = self.template.clone();
        for key in &self.variables {
            let value = inputs
                .get(key)
                .ok_or_else(|| TemplateError::MissingVariable(key.clone()))?;
            content = content.replace(&format!("{{{key}}}"), &value_to_text(value));
        }
        Ok(content)
    }

    /// Like `format`, but every substituted value is percent-encoded. For
    /// URL templates.
    pub fn format_url(&self, inputs: &Map<String, Value>) -> Result<String, TemplateError> {
        let mut content = self.template.clone();
        for key in &self.variables {
            let value = inputs
                .get(key)
                .ok_or_else(|| TemplateError::MissingVariable(key.clone()))?;
            let encoded = urlencoding::encode(&value_to_text(value)).into_owned();
            content = content.replace(&format!("{{{key}}}"), &encoded);
        }
        Ok(content)
    }
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Recursively substitutes placeholders inside a JSON body template. A
/// string that is exactly one placeholder is replaced by the raw JSON
/// value, preserving its type.
pub fn fill_json_template(
    template: &Value,
    inputs: &Map<String, Value>,
) -> Result<Value, TemplateError> {
    Ok(match template {
        Value::String(text) => {
            let trimmed = text.trim();
            let whole = variable_re()
                .captures(trimmed)
                .filter(|capture| capture[0].len() == trimmed.len());
            if let Some(capture) = whole {
                let key = &capture[1];
                inputs
                    .get(key)
                    .cloned()
                    .ok_or_else(|| TemplateError::MissingVariable(key.to_string()))?
            } else {
                Value::String(TextTemplate::new(text.clone()).format(inputs)?)
            }
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| fill_json_template(item, inputs))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(object) => Value::Object(
            object
                .iter()
                .map(|(key, value)| Ok((key.clone(), fill_json_template(value, inputs)?)))
                .collect::<Result<_, TemplateError>>()?,
        ),
        other => other.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn inputs(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn extracts_variables() {
        let template = TextTemplate::new("CPU of {ci_code} over {window}");
        assert!(template.variables().contains("ci_code"));
        assert!(template.variables().contains("window"));
    }

    #[test]
    fn formats_with_json_values() {
        let template = TextTemplate::new("limit={limit} zones={zones}");
        let text = template
            .format(&inputs(&[
                ("limit", json!(10)),
                ("zones", json!(["a", "b"])),
            ]))
            .unwrap();
        assert_eq!(text, r#"limit=10 zones=["a","b"]"#);
    }

    #[test]
    fn missing_variable_is_an_error() {
        let template = TextTemplate::new("hello {name}");
        assert!(matches!(
            template.format(&Map::new()),
            Err(TemplateError::MissingVariable(_))
        ));
    }

    #[test]
    fn url_values_are_percent_encoded() {
        let template = TextTemplate::new("/cis?q={query}");
        let url = template
            .format_url(&inputs(&[("query", json!("srv erp/01"))]))
            .unwrap();
        assert_eq!(url, "/cis?q=srv%20erp%2F01");
    }

    #[test]
    fn whole_placeholder_keeps_json_type() {
        let body = json!({
            "ci_ids": "{ci_ids}",
            "note": "window is {window}"
        });
        let filled = fill_json_template(
            &body,
            &inputs(&[
                ("ci_ids", json!(["c1", "c2"])),
                ("window", json!("last_24h")),
            ]),
        )
        .unwrap();
        assert_eq!(filled["ci_ids"], json!(["c1", "c2"]));
        assert_eq!(filled["note"], json!("window is last_24h"));
    }
}
