use std::sync::OnceLock;

use regex::Regex;

/// Keywords whose presence in a reader-tool statement fails validation with
/// `SQL_BLOCKED`, unless they appear inside a `{...}` template placeholder.
pub const DANGEROUS_SQL_KEYWORDS: [&str; 9] = [
    "DROP", "DELETE", "TRUNCATE", "ALTER", "CREATE", "EXEC", "EXECUTE", "GRANT", "REVOKE",
];

const DDL_KEYWORDS: [&str; 6] = ["CREATE", "ALTER", "DROP", "TRUNCATE", "RENAME", "COMMENT"];

const DML_WRITE_KEYWORDS: [&str; 7] = [
    "INSERT", "UPDATE", "DELETE", "MERGE", "CALL", "EXECUTE", "EXEC",
];

const DCL_KEYWORDS: [&str; 2] = ["GRANT", "REVOKE"];

/// Cypher clauses that mutate the graph; rejected on read-only graph
/// connections.
const CYPHER_WRITE_KEYWORDS: [&str; 7] = [
    "CREATE", "MERGE", "DELETE", "DETACH", "SET", "REMOVE", "DROP",
];

fn line_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"--[^\n]*").unwrap())
}

fn block_comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)/\*.*?\*/").unwrap())
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{[^}]*\}").unwrap())
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\w+\b").unwrap())
}

/// Strips comments and collapses whitespace before keyword analysis.
pub fn normalize_sql(query: &str) -> String {
    let without_line = line_comment_re().replace_all(query, " ");
    let without_block = block_comment_re().replace_all(&without_line, " ");
    without_block.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Uppercased keywords of the statement, with `{...}` placeholder contents
/// excluded: a template variable is allowed to mention anything.
pub fn extract_keywords(query: &str) -> Vec<String> {
    let normalized = normalize_sql(query);
    let masked = placeholder_re().replace_all(&normalized, " ");
    word_re()
        .find_iter(&masked)
        .map(|word| word.as_str().to_uppercase())
        .collect()
}

/// Violations of the read-only constraint (DML write keywords).
pub fn check_read_only(query: &str) -> Vec<String> {
    for keyword in extract_keywords(query) {
        if DML_WRITE_KEYWORDS.contains(&keyword.as_str()) {
            return vec![format!(
                "DML write keyword '{keyword}' violates read-only constraint"
            )];
        }
    }
    Vec::new()
}

pub fn check_ddl_blocked(query: &str) -> Vec<String> {
    for keyword in extract_keywords(query) {
        if DDL_KEYWORDS.contains(&keyword.as_str()) {
            return vec![format!("DDL keyword '{keyword}' is blocked")];
        }
    }
    Vec::new()
}

pub fn check_dcl_blocked(query: &str) -> Vec<String> {
    for keyword in extract_keywords(query) {
        if DCL_KEYWORDS.contains(&keyword.as_str()) {
            return vec![format!("DCL keyword '{keyword}' is blocked")];
        }
    }
    Vec::new()
}

/// Full safety gate for a reader-tool statement. Empty result means safe.
pub fn validate_reader_sql(query: &str) -> Vec<String> {
    let mut violations = check_read_only(query);
    violations.extend(check_ddl_blocked(query));
    violations.extend(check_dcl_blocked(query));
    violations
}

/// Template-level scan used at tool publication: any dangerous keyword
/// outside a placeholder blocks the template.
pub fn scan_template_keywords(template: &str) -> Vec<String> {
    let mut violations = Vec::new();
    let keywords = extract_keywords(template);
    for dangerous in DANGEROUS_SQL_KEYWORDS {
        if keywords.iter().any(|keyword| keyword == dangerous) {
            violations.push(format!(
                "dangerous SQL keyword '{dangerous}' found in query template; \
                 use parameterized queries instead"
            ));
            break;
        }
    }
    violations
}

/// Write-clause scan for read-only Cypher.
pub fn validate_reader_cypher(query: &str) -> Vec<String> {
    for keyword in extract_keywords(query) {
        if CYPHER_WRITE_KEYWORDS.contains(&keyword.as_str()) {
            return vec![format!("Cypher write clause '{keyword}' is blocked")];
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_comments() {
        let sql = "SELECT a -- DROP TABLE x\nFROM t /* DELETE */ WHERE b = 1";
        let normalized = normalize_sql(sql);
        assert!(!normalized.contains("DROP"));
        assert!(!normalized.contains("DELETE"));
        assert!(normalized.contains("SELECT a FROM t"));
    }

    #[test]
    fn select_passes_all_gates() {
        let sql = "SELECT ci_id, name FROM ci WHERE tenant_id = $1";
        assert!(validate_reader_sql(sql).is_empty());
        assert!(scan_template_keywords(sql).is_empty());
    }

    #[test]
    fn drop_is_blocked_even_lowercase() {
        let violations = validate_reader_sql("drop table ci");
        assert!(!violations.is_empty());
        assert!(violations[0].contains("DROP"));
    }

    #[test]
    fn dml_write_violates_read_only() {
        assert!(!check_read_only("DELETE FROM ci WHERE ci_id = $1").is_empty());
        assert!(!check_read_only("update ci set name = $1").is_empty());
        assert!(check_read_only("SELECT updated_at FROM ci").is_empty());
    }

    #[test]
    fn placeholder_contents_are_exempt() {
        let template = "SELECT * FROM metrics WHERE window = '{DROP_WINDOW}'";
        assert!(scan_template_keywords(template).is_empty());
        let bare = "SELECT * FROM metrics; DROP TABLE metrics";
        assert!(!scan_template_keywords(bare).is_empty());
    }

    #[test]
    fn dcl_blocked() {
        assert!(!check_dcl_blocked("GRANT ALL ON ci TO public").is_empty());
    }

    #[test]
    fn cypher_write_clauses_rejected() {
        assert!(!validate_reader_cypher("MATCH (n) DETACH DELETE n").is_empty());
        assert!(validate_reader_cypher(
            "MATCH (a:CI {code: $code})-[r:DEPENDS_ON*1..3]->(b) RETURN a, r, b"
        )
        .is_empty());
    }

    #[test]
    fn word_boundaries_avoid_false_positives() {
        // "created_at" contains CREATE as a substring but not as a word.
        assert!(check_ddl_blocked("SELECT created_at FROM ci").is_empty());
        assert!(check_read_only("SELECT last_update FROM ci").is_empty());
    }
}
