//! Prompt construction for LLM requests.
//!
//! Builds the generation prompt with database schema context and the repair
//! prompt sent after a statement failed.

use crate::db::Schema;
use crate::lifecycle::RepairRequest;
use crate::llm::types::Message;

/// System prompt template for SQL generation.
const GENERATION_PROMPT_TEMPLATE: &str = r#"You are a SQL assistant for a PostgreSQL database. Generate SQL queries based on user questions.

DATABASE: {database}

{schema}

INSTRUCTIONS:
- Generate only valid PostgreSQL SQL
- Return ONLY the SQL query, no explanations
- Generate a single statement
- Use appropriate JOINs based on foreign keys
- Never generate DROP DATABASE or similar destructive operations
- If the query is ambiguous, make a reasonable assumption based on the schema

OUTPUT FORMAT:
Return the SQL query wrapped in ```sql code blocks."#;

/// System prompt for repairs.
const REPAIR_SYSTEM_PROMPT: &str = "You are a PostgreSQL expert who corrects failed SQL queries.";

/// User prompt template for repairs.
const REPAIR_PROMPT_TEMPLATE: &str = r#"Generate a new SQL query from scratch.

ORIGINAL USER REQUEST:
{request}

FAILED SQL:
{failed_sql}

ERROR ({error_kind}):
{error}

DATABASE: {database}
AVAILABLE TABLES:
{tables}

INSTRUCTIONS:
1. Generate a new SQL query based on the original request
2. Use available tables only
3. Return ONLY valid SQL, no explanations
4. Single statement only
5. Use proper PostgreSQL syntax

SQL QUERY:"#;

/// Builds the system prompt with the database schema injected.
pub fn build_system_prompt(schema: &Schema, database: &str) -> String {
    GENERATION_PROMPT_TEMPLATE
        .replace("{database}", database)
        .replace("{schema}", &schema.format_for_llm())
}

/// Builds the message list that asks the model to answer `question` with SQL.
pub fn build_generation_messages(question: &str, schema: &Schema, database: &str) -> Vec<Message> {
    vec![
        Message::system(build_system_prompt(schema, database)),
        Message::user(question),
    ]
}

/// Builds the message list that asks the model to correct failed SQL.
///
/// Without a natural-language question the original SQL stands in as the
/// request.
pub fn build_repair_messages(
    request: &RepairRequest,
    available_tables: Option<&[String]>,
) -> Vec<Message> {
    let original = match &request.question {
        Some(question) => question.clone(),
        None => format!("Run this SQL: {}", request.original_sql),
    };
    let tables = match available_tables {
        Some(tables) if !tables.is_empty() => tables.join(", "),
        Some(_) => "No tables found".to_string(),
        None => "Unknown".to_string(),
    };

    let prompt = REPAIR_PROMPT_TEMPLATE
        .replace("{request}", &original)
        .replace("{failed_sql}", &request.failed_sql)
        .replace("{error_kind}", request.error_kind.as_str())
        .replace("{error}", &request.error_text)
        .replace("{database}", &request.database)
        .replace("{tables}", &tables);

    vec![Message::system(REPAIR_SYSTEM_PROMPT), Message::user(prompt)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Column, ForeignKey, Table};
    use crate::llm::types::Role;
    use crate::safety::ErrorKind;

    fn sample_schema() -> Schema {
        Schema {
            tables: vec![
                Table::new("users")
                    .with_column(Column::new("id", "integer").nullable(false))
                    .with_column(Column::new("email", "varchar(255)").nullable(false))
                    .with_primary_key(&["id"]),
                Table::new("orders")
                    .with_column(Column::new("id", "integer").nullable(false))
                    .with_column(Column::new("user_id", "integer").nullable(false))
                    .with_primary_key(&["id"]),
            ],
            foreign_keys: vec![ForeignKey::new(
                "orders",
                vec!["user_id".to_string()],
                "users",
                vec!["id".to_string()],
            )],
        }
    }

    fn repair_request(question: Option<&str>) -> RepairRequest {
        RepairRequest {
            original_sql: "SELECT * FROM usres".to_string(),
            failed_sql: "SELECT * FROM usres".to_string(),
            error_text: "relation \"usres\" does not exist".to_string(),
            error_kind: ErrorKind::MissingRelation,
            database: "shop".to_string(),
            question: question.map(str::to_string),
        }
    }

    #[test]
    fn test_build_system_prompt_contains_schema() {
        let prompt = build_system_prompt(&sample_schema(), "shop");

        assert!(prompt.contains("Table: users"));
        assert!(prompt.contains("Table: orders"));
        assert!(prompt.contains("id: integer"));
        assert!(prompt.contains("DATABASE: shop"));
        assert!(prompt.contains("```sql"));
        assert!(prompt.contains("DROP DATABASE"));
    }

    #[test]
    fn test_build_generation_messages() {
        let messages = build_generation_messages("Show me all users", &Schema::default(), "shop");

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1], Message::user("Show me all users"));
    }

    #[test]
    fn test_build_repair_messages_includes_context() {
        let tables = vec!["orders".to_string(), "users".to_string()];
        let messages =
            build_repair_messages(&repair_request(Some("list the users")), Some(&tables));

        assert_eq!(messages.len(), 2);
        let prompt = &messages[1].content;
        assert!(prompt.contains("ORIGINAL USER REQUEST:\nlist the users"));
        assert!(prompt.contains("FAILED SQL:\nSELECT * FROM usres"));
        assert!(prompt.contains("ERROR (missing-relation):"));
        assert!(prompt.contains("DATABASE: shop"));
        assert!(prompt.contains("orders, users"));
    }

    #[test]
    fn test_build_repair_messages_without_question_or_tables() {
        let messages = build_repair_messages(&repair_request(None), None);
        let prompt = &messages[1].content;

        assert!(prompt.contains("Run this SQL: SELECT * FROM usres"));
        assert!(prompt.contains("AVAILABLE TABLES:\nUnknown"));

        let messages = build_repair_messages(&repair_request(None), Some(&[]));
        assert!(messages[1].content.contains("No tables found"));
    }
}
