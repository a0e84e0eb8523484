// Conversation Store
// Async persistence boundary for the generation core
//
// SQLite access is synchronous; every call runs on the blocking pool so the
// streaming path never waits on disk I/O from a runtime worker.

use async_trait::async_trait;

use crate::models::{ContextSummary, Conversation, ConversationPhase, Message, NewMessage};
use crate::repositories::{ConversationRepository, SummaryRepository};
use crate::services::ai::{GenerationError, GenerationResult};
use crate::utils::database::Database;

/// Persistence operations consumed by the assembler and orchestrator
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, conversation: Conversation) -> GenerationResult<Conversation>;

    async fn get_conversation(&self, id: &str) -> GenerationResult<Option<Conversation>>;

    /// Fails with `ConversationNotFound` when the conversation is missing
    async fn update_phase(&self, id: &str, phase: ConversationPhase) -> GenerationResult<()>;

    async fn delete_conversation(&self, id: &str) -> GenerationResult<bool>;

    /// Append a message; the store assigns its sequence
    async fn insert_message(&self, message: NewMessage) -> GenerationResult<Message>;

    /// Messages with sequence strictly after `after` (all when `None`),
    /// ordered by sequence
    async fn list_messages_after(
        &self,
        conversation_id: &str,
        after: Option<i64>,
    ) -> GenerationResult<Vec<Message>>;

    async fn insert_summary(&self, summary: ContextSummary) -> GenerationResult<()>;

    /// Summaries ordered by range end, descending
    async fn list_summaries(&self, conversation_id: &str) -> GenerationResult<Vec<ContextSummary>>;
}

/// SQLite-backed store
#[derive(Clone)]
pub struct SqliteConversationStore {
    conversations: ConversationRepository,
    summaries: SummaryRepository,
}

impl SqliteConversationStore {
    pub fn new(db: Database) -> Self {
        Self {
            conversations: ConversationRepository::new(db.clone()),
            summaries: SummaryRepository::new(db),
        }
    }
}

/// Run a repository call on the blocking pool
async fn blocking<T, F>(f: F) -> GenerationResult<T>
where
    F: FnOnce() -> Result<T, String> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| GenerationError::Storage(format!("Storage task failed: {}", e)))?
        .map_err(GenerationError::Storage)
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    async fn create_conversation(&self, conversation: Conversation) -> GenerationResult<Conversation> {
        let repo = self.conversations.clone();
        blocking(move || {
            repo.create_conversation(&conversation)?;
            Ok(conversation)
        })
        .await
    }

    async fn get_conversation(&self, id: &str) -> GenerationResult<Option<Conversation>> {
        let repo = self.conversations.clone();
        let id = id.to_string();
        blocking(move || repo.get_conversation(&id)).await
    }

    async fn update_phase(&self, id: &str, phase: ConversationPhase) -> GenerationResult<()> {
        let repo = self.conversations.clone();
        let owned_id = id.to_string();
        let updated = blocking(move || repo.update_phase(&owned_id, phase)).await?;

        if updated {
            Ok(())
        } else {
            Err(GenerationError::ConversationNotFound(id.to_string()))
        }
    }

    async fn delete_conversation(&self, id: &str) -> GenerationResult<bool> {
        let repo = self.conversations.clone();
        let id = id.to_string();
        blocking(move || repo.delete_conversation(&id)).await
    }

    async fn insert_message(&self, message: NewMessage) -> GenerationResult<Message> {
        let repo = self.conversations.clone();
        blocking(move || repo.insert_message(message)).await
    }

    async fn list_messages_after(
        &self,
        conversation_id: &str,
        after: Option<i64>,
    ) -> GenerationResult<Vec<Message>> {
        let repo = self.conversations.clone();
        let conversation_id = conversation_id.to_string();
        blocking(move || repo.get_messages_after(&conversation_id, after)).await
    }

    async fn insert_summary(&self, summary: ContextSummary) -> GenerationResult<()> {
        let repo = self.summaries.clone();
        blocking(move || repo.insert_summary(&summary)).await
    }

    async fn list_summaries(&self, conversation_id: &str) -> GenerationResult<Vec<ContextSummary>> {
        let repo = self.summaries.clone();
        let conversation_id = conversation_id.to_string();
        blocking(move || repo.list_summaries(&conversation_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteConversationStore {
        SqliteConversationStore::new(Database::new_in_memory().expect("Failed to create test database"))
    }

    #[tokio::test]
    async fn test_conversation_lifecycle() {
        let store = store();
        let conversation = store
            .create_conversation(Conversation::new("project-1".to_string()))
            .await
            .unwrap();

        store
            .update_phase(&conversation.id, ConversationPhase::Consultation)
            .await
            .unwrap();
        let fetched = store.get_conversation(&conversation.id).await.unwrap().unwrap();
        assert_eq!(fetched.phase, ConversationPhase::Consultation);

        assert!(store.delete_conversation(&conversation.id).await.unwrap());
        assert!(store.get_conversation(&conversation.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_phase_of_missing_conversation() {
        let store = store();
        let result = store.update_phase("missing", ConversationPhase::Consultation).await;
        assert!(matches!(result, Err(GenerationError::ConversationNotFound(_))));
    }

    #[tokio::test]
    async fn test_message_order_matches_insertion() {
        let store = store();
        let conversation = store
            .create_conversation(Conversation::new("p".to_string()))
            .await
            .unwrap();

        let mut ids = Vec::new();
        for i in 0..25 {
            let message = store
                .insert_message(NewMessage::user(&conversation.id, format!("message {}", i)))
                .await
                .unwrap();
            ids.push(message.id);
        }

        let listed = store.list_messages_after(&conversation.id, None).await.unwrap();
        assert_eq!(listed.iter().map(|m| m.id.clone()).collect::<Vec<_>>(), ids);

        let after = store.list_messages_after(&conversation.id, Some(20)).await.unwrap();
        assert_eq!(after.len(), 5);
        assert_eq!(after[0].sequence, 21);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_get_distinct_sequences() {
        let store = store();
        let conversation = store
            .create_conversation(Conversation::new("p".to_string()))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..10 {
            let store = store.clone();
            let conversation_id = conversation.id.clone();
            tasks.push(tokio::spawn(async move {
                store
                    .insert_message(NewMessage::user(&conversation_id, format!("m{}", i)))
                    .await
            }));
        }

        let mut sequences = Vec::new();
        for task in tasks {
            sequences.push(task.await.unwrap().unwrap().sequence);
        }
        sequences.sort_unstable();
        assert_eq!(sequences, (1..=10).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn test_storage_error_is_mapped() {
        let store = store();
        let result = store
            .insert_message(NewMessage::user("missing", "hi".to_string()))
            .await;
        assert!(matches!(result, Err(GenerationError::Storage(_))));
    }
}
