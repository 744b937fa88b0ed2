use serde_json::{Map, Value};

/// Field-name fragments that mark a value as sensitive.
const SENSITIVE_PATTERNS: [&str; 10] = [
    "password",
    "secret",
    "token",
    "api_key",
    "api_secret",
    "auth",
    "key",
    "credential",
    "bearer",
    "authorization",
];

const MASK: &str = "***MASKED***";

/// A sensitive-named field must hold a reference (`env:`/`vault:`), a
/// template placeholder, a mask, or nothing. Anything else is plaintext.
pub fn is_plaintext_credential(field_name: &str, value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    if value.starts_with('{') && value.ends_with('}') {
        return false;
    }
    if value.starts_with("env:") || value.starts_with("vault:") || value.starts_with("***") {
        return false;
    }
    let field_lower = field_name.to_lowercase();
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| field_lower.contains(pattern))
}

fn scan_object(prefix: &str, object: &Map<String, Value>, errors: &mut Vec<String>) {
    for (name, value) in object {
        let path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}.{name}")
        };
        match value {
            Value::String(text) => {
                if is_plaintext_credential(name, text) {
                    errors.push(format!(
                        "plaintext credential in {path}: use a reference instead \
                         (e.g. 'env:{}')",
                        name.to_uppercase()
                    ));
                }
            }
            Value::Object(nested) => scan_object(&path, nested, errors),
            _ => {}
        }
    }
}

/// Returns one error per plaintext credential found anywhere in the config
/// (headers and nested objects included).
pub fn validate_no_plaintext_credentials(config: &Value) -> Vec<String> {
    let mut errors = Vec::new();
    if let Some(object) = config.as_object() {
        scan_object("", object, &mut errors);
    }
    errors
}

/// Deep copy of the config with every plaintext-credential value masked,
/// for display surfaces.
pub fn sanitize_config(config: &Value) -> Value {
    match config {
        Value::Object(object) => Value::Object(
            object
                .iter()
                .map(|(name, value)| {
                    let masked = match value {
                        Value::String(text) if is_plaintext_credential(name, text) => {
                            Value::String(MASK.to_string())
                        }
                        Value::Object(_) => sanitize_config(value),
                        other => other.clone(),
                    };
                    (name.clone(), masked)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// All credential references (`env:*`, `vault:*`) present in the config,
/// keyed by their dotted path.
pub fn extract_credential_refs(config: &Value) -> Vec<(String, String)> {
    fn walk(prefix: &str, value: &Value, refs: &mut Vec<(String, String)>) {
        if let Some(object) = value.as_object() {
            for (name, value) in object {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}.{name}")
                };
                match value {
                    Value::String(text)
                        if text.starts_with("env:") || text.starts_with("vault:") =>
                    {
                        refs.push((path, text.clone()));
                    }
                    Value::Object(_) => walk(&path, value, refs),
                    _ => {}
                }
            }
        }
    }
    let mut refs = Vec::new();
    walk("", config, &mut refs);
    refs
}
