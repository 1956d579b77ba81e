//! Gate for model-generated SQL.
//!
//! Runs before a generated or repaired statement is classified. It rejects
//! text that matches a known injection shape and statements whose leading
//! keyword is outside the allowlist. Syntax is not checked here, so a
//! malformed statement still reaches the repair loop.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Injection shapes that are never accepted from the model.
const BLOCKED_PATTERNS: &[(&str, &str)] = &[
    (r";\s*--", "statement terminator followed by a comment"),
    (r"\bunion\s+select\b", "UNION SELECT"),
    (r"\bxp_\w+", "extended stored procedure"),
    (r"\bsp_\w+", "system stored procedure"),
    (r"\bexec(?:ute)?\s*\(", "dynamic EXEC"),
];

/// Leading keywords a generated statement may start with.
const ALLOWED_LEADING_KEYWORDS: &[&str] = &[
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "TRUNCATE",
];

static BLOCKED: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    BLOCKED_PATTERNS
        .iter()
        .map(|(pattern, label)| (Regex::new(&format!("(?i){pattern}")).unwrap(), *label))
        .collect()
});

/// Why generated SQL was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    BlockedPattern(&'static str),
    KeywordNotAllowed(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty SQL statement"),
            Self::BlockedPattern(label) => write!(f, "Blocked SQL pattern detected: {label}"),
            Self::KeywordNotAllowed(keyword) => {
                write!(f, "Operation '{keyword}' is not allowed")
            }
        }
    }
}

/// Checks model-generated SQL against the blocked patterns and the keyword
/// allowlist.
pub fn validate_generated(sql: &str) -> Result<(), Rejection> {
    let sql = sql.trim();
    if sql.is_empty() {
        return Err(Rejection::Empty);
    }

    if let Some((_, label)) = BLOCKED.iter().find(|(re, _)| re.is_match(sql)) {
        return Err(Rejection::BlockedPattern(label));
    }

    let keyword = sql
        .trim_start_matches('(')
        .split(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if !ALLOWED_LEADING_KEYWORDS.contains(&keyword.as_str()) {
        return Err(Rejection::KeywordNotAllowed(keyword));
    }

    Ok(())
}
