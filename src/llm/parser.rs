//! Response parsing for LLM outputs.
//!
//! Extracts SQL from replies that may wrap it in markdown code blocks or
//! surround it with prose.

use regex::Regex;
use std::sync::LazyLock;

/// Keywords a SQL statement may start with.
const SQL_STARTERS: &[&str] = &[
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "TRUNCATE",
    "SHOW", "EXPLAIN", "VALUES", "GRANT", "REVOKE",
];

/// Openings of replies that talk about SQL instead of being SQL.
const NATURAL_LANGUAGE_PREFIXES: &[&str] = &[
    "here's",
    "here is",
    "sure,",
    "sure!",
    "of course",
    "the query",
    "based on",
    "to fix",
    "i can't",
    "i cannot",
    "i'm sorry",
    "i am sorry",
    "unfortunately",
];

/// Lines that end the SQL when it is followed by an explanation.
const EXPLANATION_STARTERS: &[&str] = &[
    "the ", "this ", "here", "below", "above", "note", "warning", "explanation",
];

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+-]*)[ \t]*\r?\n(.*?)```").unwrap());

static STATEMENT_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?im)(?:^|:\s*)\s*((?:{})\b)",
        SQL_STARTERS.join("|")
    ))
    .unwrap()
});

/// Extracts a SQL statement from an LLM response.
///
/// Tries, in order: the first ```sql block, the first unlabeled block that
/// starts like SQL, then text starting at a SQL keyword at the beginning of a
/// line or after a colon. Returns `None` when nothing SQL-like is found.
pub fn extract_sql(response: &str) -> Option<String> {
    let candidate = fenced_block(response, |lang| lang.eq_ignore_ascii_case("sql"))
        .or_else(|| fenced_block(response, str::is_empty).filter(|block| starts_like_sql(block)))
        .or_else(|| statement_in_text(response))?;

    let sql = clean(&candidate);
    if sql.is_empty() {
        None
    } else {
        Some(sql)
    }
}

/// Returns true when `text` reads as prose rather than a SQL statement.
pub fn is_natural_language(text: &str) -> bool {
    let lowered = text.trim_start().to_lowercase();
    NATURAL_LANGUAGE_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
        || !starts_like_sql(text)
}

fn fenced_block(text: &str, accept_lang: impl Fn(&str) -> bool) -> Option<String> {
    FENCED_BLOCK
        .captures_iter(text)
        .find(|caps| accept_lang(caps.get(1).map_or("", |m| m.as_str())))
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str().to_string())
}

fn statement_in_text(text: &str) -> Option<String> {
    let start = STATEMENT_START.captures(text)?.get(1)?.start();

    let mut lines = Vec::new();
    for line in text[start..].lines() {
        let lowered = line.trim_start().to_lowercase();
        if !lines.is_empty()
            && EXPLANATION_STARTERS
                .iter()
                .any(|starter| lowered.starts_with(starter))
        {
            break;
        }
        lines.push(line);
    }

    Some(lines.join("\n"))
}

fn starts_like_sql(text: &str) -> bool {
    let first_word = text
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or("")
        .to_uppercase();
    SQL_STARTERS.contains(&first_word.as_str())
}

/// Trims whitespace and trailing semicolons or stray backticks.
fn clean(sql: &str) -> String {
    sql.trim()
        .trim_end_matches(|c: char| c == ';' || c == '`' || c.is_whitespace())
        .to_string()
}
