//! PostgreSQL adapters - Database implementations for repository ports.
//!
//! - `PostgresFlowRepository` - flow instances with version compare-and-swap
//! - `PostgresConversationRepository` - append-only transcripts
//!
//! [`apply_schema`] creates the tables idempotently.

mod conversation_repository;
mod flow_repository;

pub use conversation_repository::PostgresConversationRepository;
pub use flow_repository::PostgresFlowRepository;

use sqlx::PgPool;

/// Table and index definitions for both repositories.
pub const SCHEMA: &str = include_str!("../../../migrations/0001_flows_and_conversations.sql");

/// Runs [`SCHEMA`] statement by statement. Safe to call on every start.
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    for statement in SCHEMA
        .split(';')
        .map(strip_comments)
        .filter(|s| !s.is_empty())
    {
        sqlx::query(&statement).execute(pool).await?;
    }
    Ok(())
}

fn strip_comments(chunk: &str) -> String {
    chunk
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}
