//! Helpers for rendering queries in log events.
//!
//! Query text may carry user data, so events record a sanitized, truncated
//! form together with the statement's leading keyword:
//!
//! - `operation`: `SELECT`, `INSERT`, ... or `OTHER`
//! - `statement`: literals replaced by a placeholder, capped in length
//!
//! ## Usage
//!
//! ```rust,ignore
//! use asql_pool::instrumentation::{SanitizationConfig, extract_operation};
//!
//! let config = SanitizationConfig::default();
//! tracing::debug!(
//!     operation = extract_operation(sql),
//!     statement = %config.sanitize(sql),
//!     "dispatching query"
//! );
//! ```

/// Span names used by the pool.
pub mod span_names {
    /// Span wrapping one connection attempt.
    pub const CONNECT: &str = "asql.connect";
    /// Span wrapping one query on one connection.
    pub const QUERY: &str = "asql.query";
}

/// Configuration for SQL statement sanitization.
#[derive(Debug, Clone)]
pub struct SanitizationConfig {
    /// Whether to replace literals.
    pub enabled: bool,
    /// Maximum length of the rendered statement.
    pub max_length: usize,
    /// Placeholder substituted for literal values.
    pub placeholder: String,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_length: 256,
            placeholder: "?".to_string(),
        }
    }
}

impl SanitizationConfig {
    /// Render statements verbatim, without truncation.
    #[must_use]
    pub fn no_sanitization() -> Self {
        Self {
            enabled: false,
            max_length: usize::MAX,
            placeholder: String::new(),
        }
    }

    /// Render a statement according to the configuration.
    #[must_use]
    pub fn sanitize(&self, sql: &str) -> String {
        if !self.enabled {
            return truncate_string(sql, self.max_length);
        }

        let sanitized = sanitize_sql(sql, &self.placeholder);
        truncate_string(&sanitized, self.max_length)
    }
}

/// Replace string and numeric literals with `placeholder`.
fn sanitize_sql(sql: &str, placeholder: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                // doubled quote is an escaped quote
                if chars.peek() == Some(&q) {
                    chars.next();
                    continue;
                }
                quote = None;
                result.push_str(placeholder);
            }
            continue;
        }

        if c == '\'' || c == '"' {
            quote = Some(c);
            continue;
        }

        if c.is_ascii_digit() && !result.ends_with(|ch: char| ch.is_alphanumeric() || ch == '_') {
            while chars
                .peek()
                .is_some_and(|ch| ch.is_ascii_digit() || *ch == '.')
            {
                chars.next();
            }
            result.push_str(placeholder);
            continue;
        }

        result.push(c);
    }

    if quote.is_some() {
        result.push_str(placeholder);
    }

    result
}

/// Cap `s` at `max_len` bytes, ending with `...` when cut.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }

    let budget = max_len.saturating_sub(3);
    let end = s
        .char_indices()
        .map(|(i, _)| i)
        .take_while(|&i| i <= budget)
        .last()
        .unwrap_or(0);
    format!("{}...", &s[..end])
}

/// Extract the leading keyword of a statement.
#[must_use]
pub fn extract_operation(sql: &str) -> &'static str {
    let keyword = sql
        .trim_start()
        .split(|c: char| !c.is_ascii_alphabetic())
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();

    match keyword.as_str() {
        "SELECT" => "SELECT",
        "INSERT" => "INSERT",
        "UPDATE" => "UPDATE",
        "DELETE" => "DELETE",
        "REPLACE" => "REPLACE",
        "CALL" => "CALL",
        "WITH" => "WITH",
        "BEGIN" | "START" => "BEGIN",
        "COMMIT" => "COMMIT",
        "ROLLBACK" => "ROLLBACK",
        "CREATE" => "CREATE",
        "ALTER" => "ALTER",
        "DROP" => "DROP",
        _ => "OTHER",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_literals() {
        let config = SanitizationConfig::default();
        assert_eq!(
            config.sanitize("SELECT * FROM users WHERE name = 'O''Brien' AND id = 42"),
            "SELECT * FROM users WHERE name = ? AND id = ?"
        );
        assert_eq!(config.sanitize("SELECT SLEEP(0.25)"), "SELECT SLEEP(?)");
    }

    #[test]
    fn test_identifiers_with_digits_survive() {
        let config = SanitizationConfig::default();
        assert_eq!(config.sanitize("SELECT col1 FROM t2"), "SELECT col1 FROM t2");
    }

    #[test]
    fn test_unterminated_string() {
        assert_eq!(sanitize_sql("SELECT 'abc", "?"), "SELECT ?");
    }

    #[test]
    fn test_no_sanitization_keeps_text() {
        let config = SanitizationConfig::no_sanitization();
        assert_eq!(config.sanitize("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("abcdefghij", 8), "abcde...");
        // 'é' is two bytes; the cut must not split it
        let cut = truncate_string("ééééé", 6);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 7);
    }

    #[test]
    fn test_extract_operation() {
        assert_eq!(extract_operation("  select 1"), "SELECT");
        assert_eq!(extract_operation("INSERT INTO t VALUES (1)"), "INSERT");
        assert_eq!(extract_operation("start transaction"), "BEGIN");
        assert_eq!(extract_operation("WITH x AS (SELECT 1) SELECT * FROM x"), "WITH");
        assert_eq!(extract_operation("SHOW TABLES"), "OTHER");
        assert_eq!(extract_operation(""), "OTHER");
    }
}
