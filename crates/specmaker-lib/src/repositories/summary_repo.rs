// Summary Repository
// Handles database operations for tiered context summaries

use rusqlite::params;

use super::conversation_repo::parse_timestamp;
use crate::models::ContextSummary;
use crate::utils::database::Database;

/// Repository for context summary data access
#[derive(Clone)]
pub struct SummaryRepository {
    db: Database,
}

impl SummaryRepository {
    /// Create a new SummaryRepository
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a new summary; earlier rows are kept for history
    pub fn insert_summary(&self, summary: &ContextSummary) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO context_summaries
                    (id, conversation_id, summary, first_message_id, last_message_id,
                     range_start, range_end, token_count, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
                params![
                    summary.id,
                    summary.conversation_id,
                    summary.summary,
                    summary.first_message_id,
                    summary.last_message_id,
                    summary.range_start,
                    summary.range_end,
                    summary.token_count,
                    summary.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| format!("Failed to create summary: {}", e))?;
            Ok(())
        })
    }

    /// List summaries, widest coverage first
    ///
    /// Ordered by `range_end` descending, then by `range_start` ascending so
    /// the first row is the summary every other row is superseded by.
    pub fn list_summaries(&self, conversation_id: &str) -> Result<Vec<ContextSummary>, String> {
        self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, conversation_id, summary, first_message_id, last_message_id,
                           range_start, range_end, token_count, created_at
                    FROM context_summaries
                    WHERE conversation_id = ?1
                    ORDER BY range_end DESC, range_start ASC, created_at DESC
                    "#,
                )
                .map_err(|e| format!("Failed to prepare statement: {}", e))?;

            let rows = stmt
                .query_map(params![conversation_id], |row| {
                    Ok(SummaryRow {
                        id: row.get(0)?,
                        conversation_id: row.get(1)?,
                        summary: row.get(2)?,
                        first_message_id: row.get(3)?,
                        last_message_id: row.get(4)?,
                        range_start: row.get(5)?,
                        range_end: row.get(6)?,
                        token_count: row.get(7)?,
                        created_at: row.get(8)?,
                    })
                })
                .map_err(|e| format!("Failed to query summaries: {}", e))?;

            let mut summaries = Vec::new();
            for row in rows {
                let row = row.map_err(|e| format!("Failed to read row: {}", e))?;
                summaries.push(row.into_summary()?);
            }

            Ok(summaries)
        })
    }
}

struct SummaryRow {
    id: String,
    conversation_id: String,
    summary: String,
    first_message_id: String,
    last_message_id: String,
    range_start: i64,
    range_end: i64,
    token_count: i64,
    created_at: String,
}

impl SummaryRow {
    fn into_summary(self) -> Result<ContextSummary, String> {
        Ok(ContextSummary {
            id: self.id,
            conversation_id: self.conversation_id,
            summary: self.summary,
            first_message_id: self.first_message_id,
            last_message_id: self.last_message_id,
            range_start: self.range_start,
            range_end: self.range_end,
            token_count: self.token_count,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}
