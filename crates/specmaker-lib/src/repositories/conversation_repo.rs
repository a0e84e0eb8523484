// Conversation Repository
// Handles all database operations for conversations and their messages

use chrono::{DateTime, Utc};
use rusqlite::params;

use crate::models::{Conversation, ConversationPhase, Message, MessageRole, NewMessage};
use crate::utils::database::Database;

/// Repository for conversation data access
#[derive(Clone)]
pub struct ConversationRepository {
    db: Database,
}

impl ConversationRepository {
    /// Create a new ConversationRepository
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    /// Create a new conversation
    pub fn create_conversation(&self, conversation: &Conversation) -> Result<(), String> {
        self.db.with_connection(|conn| {
            conn.execute(
                r#"
                INSERT INTO conversations (id, project_id, phase, created_at)
                VALUES (?1, ?2, ?3, ?4)
                "#,
                params![
                    conversation.id,
                    conversation.project_id,
                    conversation.phase.as_str(),
                    conversation.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| format!("Failed to create conversation: {}", e))?;
            Ok(())
        })
    }

    /// Get a conversation by ID
    pub fn get_conversation(&self, id: &str) -> Result<Option<Conversation>, String> {
        self.db.with_connection(|conn| {
            let result = conn.query_row(
                r#"
                SELECT id, project_id, phase, created_at
                FROM conversations
                WHERE id = ?1
                "#,
                params![id],
                |row| {
                    Ok(ConversationRow {
                        id: row.get(0)?,
                        project_id: row.get(1)?,
                        phase: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            );

            match result {
                Ok(row) => Ok(Some(row.into_conversation()?)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(format!("Failed to get conversation: {}", e)),
            }
        })
    }

    /// Update the conversation phase
    pub fn update_phase(&self, id: &str, phase: ConversationPhase) -> Result<bool, String> {
        self.db.with_connection(|conn| {
            let rows_affected = conn
                .execute(
                    "UPDATE conversations SET phase = ?1 WHERE id = ?2",
                    params![phase.as_str(), id],
                )
                .map_err(|e| format!("Failed to update conversation phase: {}", e))?;
            Ok(rows_affected > 0)
        })
    }

    /// Delete a conversation (messages and summaries are deleted via CASCADE)
    pub fn delete_conversation(&self, id: &str) -> Result<bool, String> {
        self.db.with_connection(|conn| {
            let rows_affected = conn
                .execute("DELETE FROM conversations WHERE id = ?1", params![id])
                .map_err(|e| format!("Failed to delete conversation: {}", e))?;
            Ok(rows_affected > 0)
        })
    }

    // =========================================================================
    // Messages
    // =========================================================================

    /// Append a message, assigning the next sequence in the same statement
    pub fn insert_message(&self, message: NewMessage) -> Result<Message, String> {
        self.db.with_transaction(|conn| {
            let metadata_json = message
                .metadata
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| format!("Failed to serialize metadata: {}", e))?;

            conn.execute(
                r#"
                INSERT INTO messages (id, conversation_id, role, content, metadata, sequence, created_at)
                SELECT ?1, ?2, ?3, ?4, ?5, COALESCE(MAX(sequence), 0) + 1, ?6
                FROM messages
                WHERE conversation_id = ?2
                "#,
                params![
                    message.id,
                    message.conversation_id,
                    message.role.as_str(),
                    message.content,
                    metadata_json,
                    message.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| format!("Failed to create message: {}", e))?;

            let sequence: i64 = conn
                .query_row(
                    "SELECT sequence FROM messages WHERE id = ?1",
                    params![message.id],
                    |row| row.get(0),
                )
                .map_err(|e| format!("Failed to read message sequence: {}", e))?;

            Ok(message.into_message(sequence))
        })
    }

    /// Get messages with sequence strictly after `after` (all when `None`),
    /// ordered by sequence
    pub fn get_messages_after(
        &self,
        conversation_id: &str,
        after: Option<i64>,
    ) -> Result<Vec<Message>, String> {
        self.db.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    r#"
                    SELECT id, conversation_id, role, content, metadata, sequence, created_at
                    FROM messages
                    WHERE conversation_id = ?1 AND sequence > ?2
                    ORDER BY sequence ASC
                    "#,
                )
                .map_err(|e| format!("Failed to prepare statement: {}", e))?;

            let rows = stmt
                .query_map(params![conversation_id, after.unwrap_or(0)], MessageRow::from_row)
                .map_err(|e| format!("Failed to query messages: {}", e))?;

            let mut messages = Vec::new();
            for row in rows {
                let row = row.map_err(|e| format!("Failed to read row: {}", e))?;
                messages.push(row.into_message()?);
            }

            Ok(messages)
        })
    }
}

// ============================================================================
// Helper structs for row mapping
// ============================================================================

struct ConversationRow {
    id: String,
    project_id: String,
    phase: String,
    created_at: String,
}

impl ConversationRow {
    fn into_conversation(self) -> Result<Conversation, String> {
        let phase: ConversationPhase = self.phase.parse()?;

        Ok(Conversation {
            id: self.id,
            project_id: self.project_id,
            phase,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

struct MessageRow {
    id: String,
    conversation_id: String,
    role: String,
    content: String,
    metadata: Option<String>,
    sequence: i64,
    created_at: String,
}

impl MessageRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role: row.get(2)?,
            content: row.get(3)?,
            metadata: row.get(4)?,
            sequence: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_message(self) -> Result<Message, String> {
        let role: MessageRole = self.role.parse()?;

        let metadata: Option<serde_json::Value> = self
            .metadata
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| format!("Invalid metadata JSON: {}", e))?;

        Ok(Message {
            id: self.id,
            conversation_id: self.conversation_id,
            role,
            content: self.content,
            metadata,
            sequence: self.sequence,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("Invalid timestamp {:?}: {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::database::Database;

    fn setup_repo() -> ConversationRepository {
        let db = Database::new_in_memory().expect("Failed to create test database");
        ConversationRepository::new(db)
    }

    #[test]
    fn test_create_and_get_conversation() {
        let repo = setup_repo();

        let conversation = Conversation::new("project-1".to_string());
        repo.create_conversation(&conversation).expect("Failed to create conversation");

        let fetched = repo
            .get_conversation(&conversation.id)
            .expect("Failed to get conversation")
            .expect("Conversation not found");

        assert_eq!(fetched.id, conversation.id);
        assert_eq!(fetched.project_id, "project-1");
        assert_eq!(fetched.phase, ConversationPhase::InitialAnalysis);
        assert!(repo.get_conversation("missing").unwrap().is_none());
    }

    #[test]
    fn test_update_phase() {
        let repo = setup_repo();
        let conversation = Conversation::new("p".to_string());
        repo.create_conversation(&conversation).unwrap();

        assert!(repo.update_phase(&conversation.id, ConversationPhase::Consultation).unwrap());
        assert!(!repo.update_phase("missing", ConversationPhase::Consultation).unwrap());

        let fetched = repo.get_conversation(&conversation.id).unwrap().unwrap();
        assert_eq!(fetched.phase, ConversationPhase::Consultation);
    }

    #[test]
    fn test_messages_are_ordered_by_insertion() {
        let repo = setup_repo();
        let conversation = Conversation::new("p".to_string());
        repo.create_conversation(&conversation).unwrap();

        let mut inserted = Vec::new();
        for i in 0..20 {
            let message = if i % 2 == 0 {
                NewMessage::user(&conversation.id, format!("question {}", i))
            } else {
                NewMessage::assistant(&conversation.id, format!("answer {}", i))
            };
            inserted.push(repo.insert_message(message).expect("Failed to insert"));
        }

        let messages = repo.get_messages_after(&conversation.id, None).unwrap();
        assert_eq!(messages.len(), 20);
        for (i, (stored, original)) in messages.iter().zip(&inserted).enumerate() {
            assert_eq!(stored.sequence, i as i64 + 1);
            assert_eq!(stored.id, original.id);
        }
        assert!(messages.windows(2).all(|w| w[0].sequence < w[1].sequence));
    }

    #[test]
    fn test_get_messages_after_boundary() {
        let repo = setup_repo();
        let conversation = Conversation::new("p".to_string());
        repo.create_conversation(&conversation).unwrap();

        for i in 0..10 {
            repo.insert_message(NewMessage::user(&conversation.id, format!("m{}", i)))
                .unwrap();
        }

        let tail = repo.get_messages_after(&conversation.id, Some(7)).unwrap();
        assert_eq!(tail.iter().map(|m| m.sequence).collect::<Vec<_>>(), vec![8, 9, 10]);
    }

    #[test]
    fn test_sequences_are_independent_per_conversation() {
        let repo = setup_repo();
        let a = Conversation::new("p".to_string());
        let b = Conversation::new("p".to_string());
        repo.create_conversation(&a).unwrap();
        repo.create_conversation(&b).unwrap();

        repo.insert_message(NewMessage::user(&a.id, "a1".to_string())).unwrap();
        repo.insert_message(NewMessage::user(&a.id, "a2".to_string())).unwrap();
        let b1 = repo.insert_message(NewMessage::user(&b.id, "b1".to_string())).unwrap();

        assert_eq!(b1.sequence, 1);
    }

    #[test]
    fn test_metadata_round_trip() {
        let repo = setup_repo();
        let conversation = Conversation::new("p".to_string());
        repo.create_conversation(&conversation).unwrap();

        let message = NewMessage::assistant(&conversation.id, "reply".to_string())
            .with_metadata(serde_json::json!({"model": "llama3.1:8b", "tokenCount": 12}));
        let stored = repo.insert_message(message).unwrap();

        let fetched = repo
            .get_messages_after(&conversation.id, None)
            .unwrap()
            .pop()
            .unwrap();
        assert_eq!(fetched.id, stored.id);
        assert_eq!(fetched.metadata, stored.metadata);
        assert_eq!(fetched.role, MessageRole::Assistant);
    }

    #[test]
    fn test_insert_into_missing_conversation_fails() {
        let repo = setup_repo();
        let result = repo.insert_message(NewMessage::user("missing", "hi".to_string()));
        assert!(result.is_err());
    }

    #[test]
    fn test_delete_conversation_cascades_messages() {
        let repo = setup_repo();
        let conversation = Conversation::new("p".to_string());
        repo.create_conversation(&conversation).unwrap();

        repo.insert_message(NewMessage::user(&conversation.id, "Test message".to_string()))
            .unwrap();

        assert!(repo.delete_conversation(&conversation.id).unwrap());
        assert!(repo
            .get_messages_after(&conversation.id, None)
            .unwrap()
            .is_empty());
    }
}
