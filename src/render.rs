//! Natural-language rendering of lifecycle outcomes.

use crate::db::{QueryResult, Value};
use crate::lifecycle::{
    ConfirmationDecision, LifecycleOutcome, PendingConfirmation, Success, TerminalFailure,
};
use crate::safety::{SqlStatement, StatementKind};

/// Results with more rows than this are summarized instead of listed.
const MAX_LISTED_ROWS: usize = 5;

/// Columns shown per row in listings and summaries.
const MAX_LISTED_COLUMNS: usize = 3;

/// Rows shown under a summary.
const SUMMARY_SAMPLE_ROWS: usize = 3;

const POSITIVE_ANSWERS: &[&str] = &[
    "yes", "y", "yeah", "sure", "go ahead", "proceed", "do it", "execute",
];

/// Renders any outcome as text for the end user.
pub fn render_outcome(outcome: &LifecycleOutcome) -> String {
    match outcome {
        LifecycleOutcome::Succeeded(success) => render_success(success),
        LifecycleOutcome::Blocked { reason, .. } => format!("Blocked: {}", reason),
        LifecycleOutcome::DeniedByUser { .. } => "Operation cancelled. Nothing was executed.".to_string(),
        LifecycleOutcome::AwaitingConfirmation(pending) => render_confirmation(pending),
        LifecycleOutcome::TerminalFailure(failure) => render_failure(failure),
    }
}

/// Renders a success, including the correction note and any advisory.
pub fn render_success(success: &Success) -> String {
    let mut out = String::new();

    if success.corrected {
        out.push_str(&format!(
            "Note: the SQL was automatically corrected to:\n{}\n\n",
            success.statement.sql()
        ));
    }
    if let Some(advisory) = &success.advisory {
        out.push_str(&format!("Warning: {}\n\n", advisory.message));
    }

    out.push_str(&render_result(&success.statement, &success.result));
    out
}

/// Describes a query result according to the kind of statement that produced it.
pub fn render_result(statement: &SqlStatement, result: &QueryResult) -> String {
    let affected = result.rows_affected.unwrap_or(result.row_count as u64);

    match statement.kind() {
        StatementKind::Insert => format!("Successfully inserted {} row(s).", affected),
        StatementKind::Update => format!("Successfully updated {} row(s).", affected),
        StatementKind::Delete => format!("Successfully deleted {} row(s).", affected),
        StatementKind::Create => "Successfully created the table (or other object).".to_string(),
        StatementKind::DropTable => "Successfully dropped the table.".to_string(),
        _ if result.has_result_set() => summarize_rows(result),
        StatementKind::Read => "Query executed successfully. No rows returned.".to_string(),
        StatementKind::DropDatabase | StatementKind::Other => match result.rows_affected {
            Some(n) => format!("Query executed successfully. {} row(s) affected.", n),
            None => "Query executed successfully.".to_string(),
        },
    }
}

/// Turns rows into a sentence, a short listing, or a summary.
pub fn summarize_rows(result: &QueryResult) -> String {
    if result.rows.is_empty() {
        return "No results found for your query.".to_string();
    }
    if result.columns.is_empty() {
        return "Query executed successfully but returned no columns.".to_string();
    }

    let columns = &result.columns;
    let mut out = if result.rows.len() == 1 {
        let row = &result.rows[0];
        if columns.len() == 1 {
            format!("The result is: {}", cell(row, 0))
        } else {
            let items: Vec<String> = columns
                .iter()
                .enumerate()
                .filter(|(i, _)| row.get(*i).is_some_and(|v| !v.is_null()))
                .map(|(i, col)| format!("{}: {}", col.name, cell(row, i)))
                .collect();
            format!("The result is: {}", items.join(", "))
        }
    } else if result.rows.len() <= MAX_LISTED_ROWS {
        let mut out = format!("Found {} results:\n\n", result.rows.len());
        for (n, row) in result.rows.iter().enumerate() {
            let items: Vec<String> = columns
                .iter()
                .take(MAX_LISTED_COLUMNS)
                .enumerate()
                .map(|(i, col)| format!("{}: {}", col.name, cell(row, i)))
                .collect();
            out.push_str(&format!("{}. {}\n", n + 1, items.join(", ")));
        }
        if columns.len() > MAX_LISTED_COLUMNS {
            out.push_str(&format!(
                "\n(Note: {} more columns not shown)",
                columns.len() - MAX_LISTED_COLUMNS
            ));
        }
        out
    } else {
        summarize_many(result)
    };

    if let Some(warning) = result.truncation_warning() {
        out.push_str(&format!("\n{}", warning));
    }
    out
}

fn summarize_many(result: &QueryResult) -> String {
    let mut out = format!("Found {} rows. Here's a summary:\n\n", result.rows.len());

    for (i, col) in result.columns.iter().enumerate() {
        let numbers: Vec<f64> = result
            .rows
            .iter()
            .filter_map(|row| match row.get(i) {
                Some(Value::Int(n)) => Some(*n as f64),
                Some(Value::Float(f)) => Some(*f),
                _ => None,
            })
            .collect();
        if numbers.is_empty() {
            continue;
        }
        let total: f64 = numbers.iter().sum();
        let average = total / numbers.len() as f64;
        out.push_str(&format!(
            "- {}: total={}, average={:.2}\n",
            col.name,
            format_number(total),
            average
        ));
    }

    out.push_str("\nFirst few rows:\n");
    for row in result.rows.iter().take(SUMMARY_SAMPLE_ROWS) {
        let items: Vec<String> = (0..result.columns.len().min(MAX_LISTED_COLUMNS))
            .map(|i| cell(row, i))
            .collect();
        out.push_str(&format!("- {}\n", items.join(" | ")));
    }
    if result.rows.len() > SUMMARY_SAMPLE_ROWS {
        out.push_str(&format!(
            "\n... and {} more rows",
            result.rows.len() - SUMMARY_SAMPLE_ROWS
        ));
    }
    out
}

/// Prints whole numbers without a fractional part.
fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{:.2}", n)
    }
}

fn cell(row: &[Value], index: usize) -> String {
    row.get(index)
        .map(Value::to_display_string)
        .unwrap_or_else(|| "N/A".to_string())
}

/// Renders the question put to the user before a risky statement runs.
pub fn render_confirmation(pending: &PendingConfirmation) -> String {
    let mut out = String::new();
    if pending.is_corrected() {
        out.push_str("The SQL was automatically corrected and needs your approval.\n");
    }
    out.push_str(&format!(
        "{}\n\nGenerated SQL:\n```sql\n{}\n```\n\nDo you want to proceed? (yes/no)",
        pending.reason(),
        pending.statement().sql()
    ));
    out
}

/// Renders a terminal failure with the SQL tried and any table suggestions.
pub fn render_failure(failure: &TerminalFailure) -> String {
    let mut out = failure.message.clone();

    if let Some(tables) = &failure.suggestions {
        if tables.is_empty() {
            out.push_str("\nNo tables found in this database.");
        } else {
            out.push_str(&format!("\nAvailable tables: {}", tables.join(", ")));
        }
    }

    out.push_str(&format!(
        "\n\nLast SQL attempted ({}):\n```sql\n{}\n```",
        failure.error_kind, failure.last_sql
    ));
    out
}

/// Interprets the user's answer to a confirmation prompt. Anything that is
/// not a clear yes counts as a denial.
pub fn parse_permission(answer: &str) -> ConfirmationDecision {
    let normalized = answer
        .trim()
        .trim_end_matches(['.', '!'])
        .to_lowercase();

    if POSITIVE_ANSWERS.contains(&normalized.as_str()) {
        ConfirmationDecision::Approve
    } else {
        ConfirmationDecision::Deny
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ColumnInfo;
    use crate::lifecycle::{Advisory, FailureReason};
    use crate::safety::ErrorKind;
    use pretty_assertions::assert_eq;

    fn success(sql: &str, result: QueryResult) -> Success {
        Success {
            statement: SqlStatement::new(sql),
            result,
            advisory: None,
            corrected: false,
            attempts: 1,
            repairs: vec![],
        }
    }

    fn users(rows: usize) -> QueryResult {
        QueryResult::with_data(
            vec![ColumnInfo::new("id", "int4"), ColumnInfo::new("name", "text")],
            (1..=rows)
                .map(|i| vec![Value::Int(i as i64), Value::String(format!("user{}", i))])
                .collect(),
        )
    }

    #[test]
    fn test_single_value() {
        let result = QueryResult::with_data(
            vec![ColumnInfo::new("count", "int8")],
            vec![vec![Value::Int(7)]],
        );
        assert_eq!(
            render_result(&SqlStatement::new("SELECT COUNT(*) FROM orders"), &result),
            "The result is: 7"
        );
    }

    #[test]
    fn test_single_row_skips_nulls() {
        let result = QueryResult::with_data(
            vec![ColumnInfo::new("id", "int4"), ColumnInfo::new("email", "text")],
            vec![vec![Value::Int(1), Value::Null]],
        );
        assert_eq!(summarize_rows(&result), "The result is: id: 1");
    }

    #[test]
    fn test_short_listing() {
        let text = summarize_rows(&users(2));
        assert_eq!(text, "Found 2 results:\n\n1. id: 1, name: user1\n2. id: 2, name: user2\n");
    }

    #[test]
    fn test_long_result_is_summarized() {
        let text = summarize_rows(&users(8));
        assert!(text.starts_with("Found 8 rows. Here's a summary:"));
        assert!(text.contains("- id: total=36, average=4.50"));
        assert!(text.contains("- 1 | user1"));
        assert!(text.contains("... and 5 more rows"));
    }

    #[test]
    fn test_empty_result() {
        let result = QueryResult::with_data(vec![ColumnInfo::new("id", "int4")], vec![]);
        assert_eq!(
            render_result(&SqlStatement::new("SELECT id FROM users"), &result),
            "No results found for your query."
        );
    }

    #[test]
    fn test_modification_messages() {
        let result = QueryResult::affected(3);
        assert_eq!(
            render_result(&SqlStatement::new("UPDATE users SET active = true"), &result),
            "Successfully updated 3 row(s)."
        );
        assert_eq!(
            render_result(&SqlStatement::new("DELETE FROM orders WHERE id = 1"), &result),
            "Successfully deleted 3 row(s)."
        );
        assert_eq!(
            render_result(&SqlStatement::new("INSERT INTO users (id) VALUES (4)"), &QueryResult::affected(1)),
            "Successfully inserted 1 row(s)."
        );
    }

    #[test]
    fn test_success_with_correction_and_advisory() {
        let mut success = success("UPDATE users SET active = true", QueryResult::affected(3));
        success.corrected = true;
        success.advisory = Some(Advisory {
            message: "UPDATE affected 3 row(s).".to_string(),
            rows_affected: Some(3),
        });

        let text = render_success(&success);
        assert!(text.starts_with("Note: the SQL was automatically corrected to:\nUPDATE users"));
        assert!(text.contains("Warning: UPDATE affected 3 row(s)."));
        assert!(text.ends_with("Successfully updated 3 row(s)."));
    }

    #[test]
    fn test_failure_lists_tables() {
        let failure = TerminalFailure {
            error_kind: ErrorKind::MissingRelation,
            last_sql: "SELECT * FROM usres".to_string(),
            message: "Table 'usres' does not exist in database 'demo'. Did you mean 'users'?"
                .to_string(),
            error_text: "relation \"usres\" does not exist".to_string(),
            reason: FailureReason::ExecutionBudgetExhausted,
            suggestions: Some(vec!["orders".to_string(), "users".to_string()]),
            closest_table: Some("users".to_string()),
            attempts: 3,
            repairs: vec![],
        };

        let text = render_failure(&failure);
        assert!(text.contains("Did you mean 'users'?"));
        assert!(text.contains("Available tables: orders, users"));
        assert!(text.contains("Last SQL attempted (missing-relation):\n```sql\nSELECT * FROM usres\n```"));
    }

    #[test]
    fn test_parse_permission() {
        for answer in ["yes", "Y", "sure", "Go ahead!", " proceed ", "do it."] {
            assert_eq!(parse_permission(answer), ConfirmationDecision::Approve, "{answer}");
        }
        for answer in ["no", "deny", "", "yes please delete everything", "nope"] {
            assert_eq!(parse_permission(answer), ConfirmationDecision::Deny, "{answer}");
        }
    }
}
