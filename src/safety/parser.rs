//! Statement kind detection.
//!
//! Uses sqlparser-rs with the PostgreSQL dialect to find the most dangerous
//! operation in a piece of SQL. Text the parser rejects is still given a kind
//! from its leading keyword, so broken queries can reach the database and the
//! repair loop.

use sqlparser::ast::{
    ObjectType, Query, Select, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

use super::StatementKind;

/// Detects the statement kind of a SQL string.
///
/// With several statements the most dangerous kind wins.
pub fn detect_kind(sql: &str) -> StatementKind {
    let dialect = PostgreSqlDialect {};

    // DROP DATABASE has to be caught even when the parser cannot represent it.
    if contains_drop_database(&dialect, sql) {
        return StatementKind::DropDatabase;
    }

    match Parser::parse_sql(&dialect, sql) {
        Ok(statements) if !statements.is_empty() => statements
            .iter()
            .map(classify_statement)
            .fold(StatementKind::Read, StatementKind::max),
        Ok(_) => StatementKind::Other,
        Err(_) => classify_by_keywords(sql),
    }
}

/// Returns true if the PostgreSQL parser accepts `sql` as one or more statements.
pub fn is_parseable(sql: &str) -> bool {
    Parser::parse_sql(&PostgreSqlDialect {}, sql).is_ok_and(|statements| !statements.is_empty())
}

/// Checks every statement in the text for a leading `DROP DATABASE`.
fn contains_drop_database(dialect: &PostgreSqlDialect, sql: &str) -> bool {
    let tokens = match Tokenizer::new(dialect, sql).tokenize() {
        Ok(tokens) => tokens,
        Err(_) => {
            return sql.split(';').any(|part| {
                let mut words = part.split_whitespace().map(str::to_ascii_uppercase);
                words.next().as_deref() == Some("DROP")
                    && words.next().as_deref() == Some("DATABASE")
            })
        }
    };

    let mut leading: Vec<String> = Vec::with_capacity(2);
    for token in tokens {
        match token {
            Token::SemiColon => leading.clear(),
            Token::Whitespace(_) => {}
            Token::Word(word) if leading.len() < 2 => {
                leading.push(word.value.to_ascii_uppercase());
                if leading.len() == 2 && leading[0] == "DROP" && leading[1] == "DATABASE" {
                    return true;
                }
            }
            _ if leading.len() < 2 => leading.push(String::new()),
            _ => {}
        }
    }
    false
}

/// Classifies a single parsed statement.
fn classify_statement(statement: &Statement) -> StatementKind {
    match statement {
        // Queries may contain data-modifying CTEs, so recurse
        Statement::Query(query) => classify_query(query),
        Statement::Explain {
            analyze, statement, ..
        } => {
            if *analyze {
                // EXPLAIN ANALYZE runs the statement
                classify_statement(statement)
            } else {
                StatementKind::Read
            }
        }
        Statement::ShowVariable { .. }
        | Statement::ShowTables { .. }
        | Statement::ShowColumns { .. }
        | Statement::ShowCreate { .. }
        | Statement::ShowFunctions { .. } => StatementKind::Read,

        Statement::Insert { .. } => StatementKind::Insert,
        Statement::Update { .. } => StatementKind::Update,
        Statement::Delete { .. } => StatementKind::Delete,

        Statement::CreateTable { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateView { .. }
        | Statement::CreateSchema { .. }
        | Statement::CreateDatabase { .. }
        | Statement::CreateSequence { .. }
        | Statement::CreateType { .. }
        | Statement::CreateFunction { .. } => StatementKind::Create,

        Statement::Drop { object_type, .. } => match object_type {
            ObjectType::Table => StatementKind::DropTable,
            _ => StatementKind::Other,
        },

        // TRUNCATE, ALTER, GRANT, REVOKE, MERGE and everything unknown
        _ => StatementKind::Other,
    }
}

/// Classifies a Query, returning the most dangerous kind found in its CTEs and body.
fn classify_query(query: &Query) -> StatementKind {
    let mut kind = StatementKind::Read;

    if let Some(with) = &query.with {
        for cte in &with.cte_tables {
            kind = kind.max(classify_query(&cte.query));
        }
    }

    kind.max(classify_set_expr(&query.body))
}

fn classify_set_expr(set_expr: &SetExpr) -> StatementKind {
    match set_expr {
        SetExpr::Select(select) => classify_select(select),
        SetExpr::Query(query) => classify_query(query),
        SetExpr::SetOperation { left, right, .. } => {
            classify_set_expr(left).max(classify_set_expr(right))
        }
        SetExpr::Insert(stmt) | SetExpr::Update(stmt) => classify_statement(stmt),
        SetExpr::Values(_) | SetExpr::Table(_) => StatementKind::Read,
        // Remaining variants wrap a data-modifying statement; render it back and
        // read its leading keyword.
        other => classify_by_keywords(&other.to_string()),
    }
}

fn classify_select(select: &Select) -> StatementKind {
    select
        .from
        .iter()
        .map(classify_table_with_joins)
        .fold(StatementKind::Read, StatementKind::max)
}

fn classify_table_with_joins(twj: &TableWithJoins) -> StatementKind {
    twj.joins
        .iter()
        .map(|join| classify_table_factor(&join.relation))
        .fold(classify_table_factor(&twj.relation), StatementKind::max)
}

fn classify_table_factor(factor: &TableFactor) -> StatementKind {
    match factor {
        TableFactor::Derived { subquery, .. } => {
            classify_query(subquery).max(nested_modification(&subquery.to_string()))
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => classify_table_with_joins(table_with_joins),
        _ => StatementKind::Read,
    }
}

/// Fallback for text the parser rejects: classify each statement by its
/// leading keyword.
fn classify_by_keywords(sql: &str) -> StatementKind {
    let mut kind: Option<StatementKind> = None;
    for part in sql.split(';') {
        let words: Vec<String> = part
            .split_whitespace()
            .map(|w| {
                w.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '_')
                    .to_ascii_uppercase()
            })
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            continue;
        }
        // Data-modifying CTEs and subqueries the parser rejects hide behind a
        // leading SELECT or WITH.
        let part_kind = match classify_words(&words) {
            StatementKind::Read => nested_modification(part),
            kind => kind,
        };
        kind = Some(match kind {
            Some(k) => k.max(part_kind),
            None => part_kind,
        });
    }
    kind.unwrap_or(StatementKind::Other)
}

fn classify_words(words: &[String]) -> StatementKind {
    match words[0].as_str() {
        "SELECT" | "SHOW" | "VALUES" | "TABLE" => StatementKind::Read,
        "EXPLAIN" => {
            if words.get(1).map(String::as_str) == Some("ANALYZE") && words.len() > 2 {
                classify_words(&words[2..])
            } else {
                StatementKind::Read
            }
        }
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "CREATE" => StatementKind::Create,
        "DROP" => match words.get(1).map(String::as_str) {
            Some("TABLE") => StatementKind::DropTable,
            Some("DATABASE") => StatementKind::DropDatabase,
            _ => StatementKind::Other,
        },
        "WITH" => StatementKind::Read,
        _ => StatementKind::Other,
    }
}

/// Most dangerous statement opened directly after a parenthesis, as in
/// `WITH d AS (DELETE ...)` or `FROM (INSERT ...)`. String literals and quoted
/// identifiers are skipped by the tokenizer.
fn nested_modification(sql: &str) -> StatementKind {
    let Ok(tokens) = Tokenizer::new(&PostgreSqlDialect {}, sql).tokenize() else {
        return StatementKind::Read;
    };

    let mut kind = StatementKind::Read;
    let mut after_paren = false;
    for token in tokens {
        match token {
            Token::Whitespace(_) => continue,
            Token::LParen => {
                after_paren = true;
                continue;
            }
            Token::Word(word) if after_paren && word.quote_style.is_none() => {
                kind = kind.max(match word.value.to_ascii_uppercase().as_str() {
                    "DELETE" => StatementKind::Delete,
                    "UPDATE" => StatementKind::Update,
                    "INSERT" => StatementKind::Insert,
                    _ => StatementKind::Read,
                });
            }
            _ => {}
        }
        after_paren = false;
    }
    kind
}
