use serde_json::Value;

/// Extracts a value by dotted path. `a.b.c` walks nested fields; a `*`
/// segment maps the rest of the path over a list, producing a list. Any
/// missing intermediate yields null; the consuming step's schema decides
/// whether null is acceptable.
pub fn extract_path(root: &Value, path: &str) -> Value {
    if path.is_empty() {
        return root.clone();
    }
    let segments: Vec<&str> = path.split('.').collect();
    extract_segments(root, &segments)
}

fn extract_segments(value: &Value, segments: &[&str]) -> Value {
    let Some((head, rest)) = segments.split_first() else {
        return value.clone();
    };
    match *head {
        "*" => match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| extract_segments(item, rest))
                    .collect(),
            ),
            _ => Value::Null,
        },
        field => {
            let next = match value {
                Value::Object(object) => object.get(field),
                Value::Array(items) => field
                    .parse::<usize>()
                    .ok()
                    .and_then(|index| items.get(index)),
                _ => None,
            };
            match next {
                Some(next) => extract_segments(next, rest),
                None => Value::Null,
            }
        }
    }
}

/// Splits a mapping source `"<step_id>.<path>"` into its step and the
/// in-result path (which may be empty).
pub fn split_source(source: &str) -> (&str, &str) {
    match source.split_once('.') {
        Some((step_id, path)) => (step_id, path),
        None => (source, ""),
    }
}
