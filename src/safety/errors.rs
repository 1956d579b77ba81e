//! Database error classification.
//!
//! Maps raw error text to an [`ErrorKind`] by ordered pattern matching and
//! pulls out the relation and column names the database complained about.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Minimum similarity for a table to be offered as "did you mean".
const SIMILARITY_THRESHOLD: f64 = 0.5;
/// Similarity credited when one name contains the other.
const CONTAINMENT_SCORE: f64 = 0.8;

static MISSING_RELATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:relation|table|view)\s+(?:"[^"]*"|\S+)\s+(?:does not|doesn't)\s+exist|no such table"#,
    )
    .unwrap()
});
static MISSING_COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bcolumn\b.*\b(?:does not|doesn't)\s+exist|no such column|unknown column"#)
        .unwrap()
});
static PERMISSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)permission denied|insufficient privilege|must be owner|access denied").unwrap()
});
static SYNTAX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)syntax error|at or near").unwrap());

static RELATION_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(?:relation|table|view)\s+"([^"]+)""#).unwrap()
});
static QUOTED_COLUMN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bcolumn\s+"([^"]+)""#).unwrap());
static BARE_COLUMN_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bcolumn\s+([\w.]+)\s+does not exist").unwrap());

/// Category of an execution failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingRelation,
    MissingColumn,
    SyntaxError,
    PermissionDenied,
    Other,
}

impl ErrorKind {
    /// Returns true if a repair may fix this kind of failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::MissingRelation | Self::MissingColumn | Self::SyntaxError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingRelation => "missing-relation",
            Self::MissingColumn => "missing-column",
            Self::SyntaxError => "syntax-error",
            Self::PermissionDenied => "permission-denied",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies error text. First matching rule wins:
/// missing relation, missing column, permission, syntax, other.
pub fn classify_error(error_text: &str) -> ErrorKind {
    if is_missing_relation(error_text) {
        ErrorKind::MissingRelation
    } else if MISSING_COLUMN.is_match(error_text) {
        ErrorKind::MissingColumn
    } else if PERMISSION.is_match(error_text) {
        ErrorKind::PermissionDenied
    } else if SYNTAX.is_match(error_text) {
        ErrorKind::SyntaxError
    } else {
        ErrorKind::Other
    }
}

/// `column "x" of relation "y" does not exist` names a relation that does
/// exist, so matches preceded by "of" are ignored.
fn is_missing_relation(text: &str) -> bool {
    MISSING_RELATION.find_iter(text).any(|m| {
        !text[..m.start()]
            .trim_end()
            .to_ascii_lowercase()
            .ends_with(" of")
    })
}

/// Error kind plus the names extracted from the error text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDiagnosis {
    pub kind: ErrorKind,
    pub message: String,
    pub relation: Option<String>,
    pub column: Option<String>,
}

impl ErrorDiagnosis {
    pub fn from_error_text(error_text: &str) -> Self {
        let kind = classify_error(error_text);
        let relation = RELATION_NAME
            .captures(error_text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());
        let column = QUOTED_COLUMN_NAME
            .captures(error_text)
            .or_else(|| BARE_COLUMN_NAME.captures(error_text))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        Self {
            kind,
            message: error_text.to_string(),
            relation,
            column,
        }
    }

    /// Renders a user-facing description in place of the raw driver message
    /// where the names are known.
    pub fn describe(&self, database: &str) -> String {
        match self.kind {
            ErrorKind::MissingRelation => format!(
                "Table '{}' does not exist in database '{}'.",
                self.relation.as_deref().unwrap_or("unknown"),
                database
            ),
            ErrorKind::MissingColumn => format!(
                "Column '{}' not found.",
                self.column.as_deref().unwrap_or("unknown")
            ),
            _ => self.message.clone(),
        }
    }
}

/// Finds the available table most similar to `name`, if any is close enough.
pub fn closest_table(name: &str, available: &[String]) -> Option<String> {
    let needle = name.to_lowercase();
    let mut best: Option<(f64, &String)> = None;

    for table in available {
        let candidate = table.to_lowercase();
        let mut score = strsim::normalized_levenshtein(&needle, &candidate);
        if candidate.contains(&needle) || needle.contains(&candidate) {
            score = score.max(CONTAINMENT_SCORE);
        }
        if best.map_or(true, |(best_score, _)| score > best_score) {
            best = Some((score, table));
        }
    }

    best.filter(|(score, _)| *score >= SIMILARITY_THRESHOLD)
        .map(|(_, table)| table.clone())
}
