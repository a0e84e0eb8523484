// Context Assembler
//
// Builds the exact ordered message list sent to the model:
//   [system preamble, summary (if any), raw tail, new user message]
// and keeps it under the context budget by summarizing older history.

use std::sync::Arc;

use serde::Serialize;

use super::prompt_builder::SystemPromptBuilder;
use super::summarizer::Summarizer;
use super::token_estimator::{estimate, estimate_message, MESSAGE_OVERHEAD_TOKENS};
use crate::models::{ChatMessage, ContextSummary, Conversation, GenerationConfig, Message};
use crate::services::ai::{GenerationError, GenerationResult};
use crate::services::store::ConversationStore;

/// Ordered request payload plus diagnostics
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssembledContext {
    /// Messages in send order
    pub messages: Vec<ChatMessage>,
    /// Estimated tokens of `messages`
    pub total_tokens: usize,
    /// Budget the payload was assembled against
    pub budget: usize,
    /// Summary included in the payload
    pub summary_id: Option<String>,
    /// Whether a new summary was persisted during assembly
    pub summary_created: bool,
    /// Raw messages left out by truncation
    pub dropped_messages: usize,
}

/// Context assembler
pub struct ContextAssembler {
    store: Arc<dyn ConversationStore>,
    summarizer: Arc<dyn Summarizer>,
    budget: usize,
    keep_recent_messages: usize,
}

impl ContextAssembler {
    pub fn new(
        store: Arc<dyn ConversationStore>,
        summarizer: Arc<dyn Summarizer>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            store,
            summarizer,
            budget: config.context_budget,
            keep_recent_messages: config.keep_recent_messages,
        }
    }

    /// Assemble the request for a persisted user message
    ///
    /// Returns a payload within budget or fails with `ContextOverflow`.
    pub async fn assemble(
        &self,
        conversation_id: &str,
        user_message: &Message,
    ) -> GenerationResult<AssembledContext> {
        let conversation = self.load_conversation(conversation_id).await?;
        let preamble = preamble_for(&conversation);
        let user = ChatMessage::from(user_message);

        let fixed = estimate_message(&preamble) + estimate_message(&user);
        if fixed > self.budget {
            return Err(GenerationError::ContextOverflow {
                required: fixed,
                budget: self.budget,
            });
        }

        let mut summary = self.active_summary(conversation_id).await?;
        let mut summary_created = false;
        let mut first_attempt = true;

        loop {
            let tail: Vec<Message> = self
                .store
                .list_messages_after(conversation_id, summary.as_ref().map(|s| s.range_end))
                .await?
                .into_iter()
                .filter(|m| m.id != user_message.id)
                .collect();

            let messages = compose(&preamble, summary.as_ref(), &tail, Some(&user));
            let total = payload_tokens(&preamble, summary.as_ref(), &tail, Some(&user));

            if total <= self.budget {
                log::debug!(
                    "[{}] Assembled {} messages, {} / {} tokens",
                    conversation_id,
                    messages.len(),
                    total,
                    self.budget
                );
                return Ok(AssembledContext {
                    messages,
                    total_tokens: total,
                    budget: self.budget,
                    summary_id: summary.map(|s| s.id),
                    summary_created,
                    dropped_messages: 0,
                });
            }

            if tail.is_empty() {
                // Only the summary is left to give up; preamble + user fit
                log::warn!(
                    "[{}] Summary does not fit next to the new message ({} / {} tokens), dropping it",
                    conversation_id,
                    total,
                    self.budget
                );
                let mut context =
                    fit_by_truncation(&preamble, summary.as_ref(), &tail, Some(&user), self.budget)?;
                context.summary_created = summary_created;
                return Ok(context);
            }

            let keep = if first_attempt {
                self.keep_recent_messages.min(tail.len())
            } else {
                0
            };
            first_attempt = false;

            let split = match tail.len() - keep {
                0 => tail.len(),
                n => n,
            };

            match self.summarizer.summarize(&tail[..split], summary.as_ref()).await {
                Ok(new_summary) => {
                    log::info!(
                        "[{}] Summarized messages {}-{} ({} tokens)",
                        conversation_id,
                        new_summary.range_start,
                        new_summary.range_end,
                        new_summary.token_count
                    );
                    self.store.insert_summary(new_summary.clone()).await?;
                    summary = Some(new_summary);
                    summary_created = true;
                }
                Err(e) => {
                    log::warn!(
                        "[{}] Summarization failed, truncating raw history: {}",
                        conversation_id,
                        e
                    );
                    let mut context =
                        fit_by_truncation(&preamble, summary.as_ref(), &tail, Some(&user), self.budget)?;
                    context.summary_created = summary_created;
                    return Ok(context);
                }
            }
        }
    }

    /// Read-only view of the context the next request would start from
    ///
    /// Never persists or calls the model; older raw messages are truncated
    /// instead of summarized.
    pub async fn preview(&self, conversation_id: &str) -> GenerationResult<AssembledContext> {
        let conversation = self.load_conversation(conversation_id).await?;
        let preamble = preamble_for(&conversation);
        let summary = self.active_summary(conversation_id).await?;
        let tail = self
            .store
            .list_messages_after(conversation_id, summary.as_ref().map(|s| s.range_end))
            .await?;

        fit_by_truncation(&preamble, summary.as_ref(), &tail, None, self.budget)
    }

    async fn load_conversation(&self, conversation_id: &str) -> GenerationResult<Conversation> {
        self.store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| GenerationError::ConversationNotFound(conversation_id.to_string()))
    }

    /// The widest summary; superseded ones are ignored
    async fn active_summary(&self, conversation_id: &str) -> GenerationResult<Option<ContextSummary>> {
        let summaries = self.store.list_summaries(conversation_id).await?;
        Ok(summaries
            .into_iter()
            .max_by(|a, b| {
                a.range_end
                    .cmp(&b.range_end)
                    .then(b.range_start.cmp(&a.range_start))
            }))
    }
}

fn preamble_for(conversation: &Conversation) -> ChatMessage {
    ChatMessage::system(
        SystemPromptBuilder::new(conversation.phase)
            .with_project(conversation.project_id.clone())
            .build(),
    )
}

fn summary_header(summary: &ContextSummary) -> String {
    format!(
        "Summary of earlier conversation (messages {}-{}):\n\n",
        summary.range_start, summary.range_end
    )
}

/// Synthetic system message carrying a summary
pub fn summary_message(summary: &ContextSummary) -> ChatMessage {
    ChatMessage::system(format!("{}{}", summary_header(summary), summary.summary))
}

/// Cost of the summary message; the body uses the stored count
fn summary_tokens(summary: &ContextSummary) -> usize {
    let body = usize::try_from(summary.token_count).unwrap_or(0);
    MESSAGE_OVERHEAD_TOKENS + estimate(&summary_header(summary)) + body
}

fn payload_tokens(
    preamble: &ChatMessage,
    summary: Option<&ContextSummary>,
    tail: &[Message],
    user: Option<&ChatMessage>,
) -> usize {
    estimate_message(preamble)
        + summary.map(summary_tokens).unwrap_or(0)
        + tail
            .iter()
            .map(|m| estimate_message(&ChatMessage::from(m)))
            .sum::<usize>()
        + user.map(estimate_message).unwrap_or(0)
}

fn compose(
    preamble: &ChatMessage,
    summary: Option<&ContextSummary>,
    tail: &[Message],
    user: Option<&ChatMessage>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(tail.len() + 3);
    messages.push(preamble.clone());
    if let Some(summary) = summary {
        messages.push(summary_message(summary));
    }
    messages.extend(tail.iter().map(ChatMessage::from));
    if let Some(user) = user {
        messages.push(user.clone());
    }
    messages
}

/// Drop raw messages oldest-first until the payload fits; the summary goes
/// only once no raw message is left
fn fit_by_truncation(
    preamble: &ChatMessage,
    summary: Option<&ContextSummary>,
    tail: &[Message],
    user: Option<&ChatMessage>,
    budget: usize,
) -> GenerationResult<AssembledContext> {
    let fixed = estimate_message(preamble) + user.map(estimate_message).unwrap_or(0);
    let summary_cost = summary.map(summary_tokens).unwrap_or(0);
    let costs: Vec<usize> = tail
        .iter()
        .map(|m| estimate_message(&ChatMessage::from(m)))
        .collect();

    let mut tail_cost: usize = costs.iter().sum();
    let mut start = 0;
    while start < tail.len() && fixed + summary_cost + tail_cost > budget {
        tail_cost -= costs[start];
        start += 1;
    }

    let summary = if fixed + summary_cost + tail_cost > budget {
        None
    } else {
        summary
    };

    let messages = compose(preamble, summary, &tail[start..], user);
    let total = payload_tokens(preamble, summary, &tail[start..], user);
    if total > budget {
        return Err(GenerationError::ContextOverflow {
            required: total,
            budget,
        });
    }

    Ok(AssembledContext {
        messages,
        total_tokens: total,
        budget,
        summary_id: summary.map(|s| s.id.clone()),
        summary_created: false,
        dropped_messages: start,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConversationPhase, MessageRole, NewMessage};
    use crate::services::context::summarizer::TieredSummarizer;
    use crate::services::store::SqliteConversationStore;
    use crate::utils::database::Database;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSummarizer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(
            &self,
            _messages: &[Message],
            _prior: Option<&ContextSummary>,
        ) -> GenerationResult<ContextSummary> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(GenerationError::ModelError("summarizer offline".to_string()))
        }
    }

    fn config(budget: usize) -> GenerationConfig {
        GenerationConfig {
            context_budget: budget,
            ..GenerationConfig::default()
        }
    }

    async fn setup(config: &GenerationConfig) -> (Arc<SqliteConversationStore>, ContextAssembler, String) {
        let store = Arc::new(SqliteConversationStore::new(
            Database::new_in_memory().expect("Failed to create test database"),
        ));
        let conversation = store
            .create_conversation(Conversation::new("project-1".to_string()))
            .await
            .unwrap();
        let assembler = ContextAssembler::new(
            store.clone(),
            Arc::new(TieredSummarizer::new(config)),
            config,
        );
        (store, assembler, conversation.id)
    }

    async fn add_messages(store: &SqliteConversationStore, conversation_id: &str, count: usize, content: &str) {
        for i in 0..count {
            let message = if i % 2 == 0 {
                NewMessage::user(conversation_id, content.to_string())
            } else {
                NewMessage::assistant(conversation_id, content.to_string())
            };
            store.insert_message(message).await.unwrap();
        }
    }

    async fn add_user(store: &SqliteConversationStore, conversation_id: &str, content: &str) -> Message {
        store
            .insert_message(NewMessage::user(conversation_id, content.to_string()))
            .await
            .unwrap()
    }

    fn summary(conversation_id: &str, id: &str, start: i64, end: i64) -> ContextSummary {
        ContextSummary {
            id: id.to_string(),
            conversation_id: conversation_id.to_string(),
            summary: format!("## Overview\nMessages {}-{}", start, end),
            first_message_id: format!("m{}", start),
            last_message_id: format!("m{}", end),
            range_start: start,
            range_end: end,
            token_count: 8,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_empty_conversation_sends_preamble_and_user_message() {
        let config = config(100_000);
        let (store, assembler, conversation_id) = setup(&config).await;
        let user = add_user(&store, &conversation_id, "Describe a todo app.").await;

        let context = assembler.assemble(&conversation_id, &user).await.unwrap();

        assert_eq!(context.messages.len(), 2);
        assert_eq!(context.messages[0].role, MessageRole::System);
        assert!(context.messages[0].content.contains("Initial Analysis"));
        assert_eq!(context.messages[1], ChatMessage::user("Describe a todo app."));
        assert!(context.summary_id.is_none());
        assert!(!context.summary_created);
        assert!(store.list_summaries(&conversation_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_over_budget_history_is_summarized_once() {
        let config = config(2000);
        let (store, assembler, conversation_id) = setup(&config).await;
        add_messages(&store, &conversation_id, 500, "ok thanks").await;
        let user = add_user(&store, &conversation_id, "Describe a todo app.").await;
        assert_eq!(user.sequence, 501);

        let context = assembler.assemble(&conversation_id, &user).await.unwrap();

        let summaries = store.list_summaries(&conversation_id).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!((summaries[0].range_start, summaries[0].range_end), (1, 500));
        assert!(context.summary_created);
        assert!(context.total_tokens <= 2000);
        assert_eq!(context.messages.len(), 3);
        assert_eq!(context.messages.last(), Some(&ChatMessage::user("Describe a todo app.")));

        // Next turn reuses the summary and sends messages from 501 on
        store
            .insert_message(NewMessage::assistant(&conversation_id, "Sure.".to_string()))
            .await
            .unwrap();
        let next_user = add_user(&store, &conversation_id, "Add reminders.").await;

        let next = assembler.assemble(&conversation_id, &next_user).await.unwrap();
        assert!(!next.summary_created);
        assert_eq!(next.summary_id.as_deref(), Some(summaries[0].id.as_str()));
        assert_eq!(
            next.messages[2..].to_vec(),
            vec![
                ChatMessage::user("Describe a todo app."),
                ChatMessage::assistant("Sure."),
                ChatMessage::user("Add reminders."),
            ]
        );
        assert_eq!(store.list_summaries(&conversation_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_only_widest_summary_is_used() {
        let config = config(100_000);
        let (store, assembler, conversation_id) = setup(&config).await;
        add_messages(&store, &conversation_id, 400, "history").await;
        store.insert_summary(summary(&conversation_id, "narrow", 1, 200)).await.unwrap();
        store.insert_summary(summary(&conversation_id, "wide", 1, 350)).await.unwrap();
        let user = add_user(&store, &conversation_id, "Next question").await;

        let context = assembler.assemble(&conversation_id, &user).await.unwrap();

        assert_eq!(context.summary_id.as_deref(), Some("wide"));
        assert!(context.messages[1].content.contains("messages 1-350"));
        // preamble + summary + messages 351..=400 + user
        assert_eq!(context.messages.len(), 2 + 50 + 1);
    }

    #[tokio::test]
    async fn test_keep_recent_messages_on_first_attempt() {
        let config = GenerationConfig {
            keep_recent_messages: 2,
            ..config(1500)
        };
        let (store, assembler, conversation_id) = setup(&config).await;
        add_messages(&store, &conversation_id, 300, "ok thanks").await;
        store
            .insert_message(NewMessage::user(&conversation_id, "What about sync?".to_string()))
            .await
            .unwrap();
        store
            .insert_message(NewMessage::assistant(&conversation_id, "Sync runs hourly.".to_string()))
            .await
            .unwrap();
        let user = add_user(&store, &conversation_id, "Make it every 5 minutes.").await;

        let context = assembler.assemble(&conversation_id, &user).await.unwrap();

        let summaries = store.list_summaries(&conversation_id).await.unwrap();
        assert_eq!(summaries[0].range_end, 300);
        assert_eq!(
            context.messages[2..].to_vec(),
            vec![
                ChatMessage::user("What about sync?"),
                ChatMessage::assistant("Sync runs hourly."),
                ChatMessage::user("Make it every 5 minutes."),
            ]
        );
    }

    #[tokio::test]
    async fn test_oversized_user_message_overflows_without_summarizing() {
        let config = config(300);
        let store = Arc::new(SqliteConversationStore::new(Database::new_in_memory().unwrap()));
        let conversation = store
            .create_conversation(Conversation::new("p".to_string()))
            .await
            .unwrap();
        let summarizer = Arc::new(FailingSummarizer {
            calls: AtomicUsize::new(0),
        });
        let assembler = ContextAssembler::new(store.clone(), summarizer.clone(), &config);
        add_messages(&store, &conversation.id, 10, "ok").await;
        let user = add_user(&store, &conversation.id, &"word ".repeat(2000)).await;

        let result = assembler.assemble(&conversation.id, &user).await;

        assert!(matches!(result, Err(GenerationError::ContextOverflow { .. })));
        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_summarizer_failure_falls_back_to_truncation() {
        let config = config(1000);
        let store = Arc::new(SqliteConversationStore::new(Database::new_in_memory().unwrap()));
        let conversation = store
            .create_conversation(Conversation::new("p".to_string()))
            .await
            .unwrap();
        let summarizer = Arc::new(FailingSummarizer {
            calls: AtomicUsize::new(0),
        });
        let assembler = ContextAssembler::new(store.clone(), summarizer.clone(), &config);

        for i in 0..200 {
            store
                .insert_message(NewMessage::user(&conversation.id, format!("note number {}", i)))
                .await
                .unwrap();
        }
        let user = add_user(&store, &conversation.id, "Summarize please").await;

        let context = assembler.assemble(&conversation.id, &user).await.unwrap();

        assert_eq!(summarizer.calls.load(Ordering::SeqCst), 1);
        assert!(context.total_tokens <= 1000);
        assert!(context.dropped_messages > 0);
        assert!(!context.summary_created);
        assert!(store.list_summaries(&conversation.id).await.unwrap().is_empty());
        // newest raw history survives, oldest goes first
        let n = context.messages.len();
        assert_eq!(context.messages[n - 2].content, "note number 199");
        assert_eq!(context.messages[n - 1].content, "Summarize please");
        assert!(!context.messages.iter().any(|m| m.content == "note number 0"));
    }

    #[tokio::test]
    async fn test_summary_dropped_when_only_preamble_and_user_fit() {
        let config = config(2000);
        let (store, assembler, conversation_id) = setup(&config).await;
        for i in 0..60 {
            store
                .insert_message(NewMessage::user(
                    &conversation_id,
                    format!(
                        "Requirement {}: the app must support offline sync and users must be able \
                         to export every list within 5 seconds",
                        i
                    ),
                ))
                .await
                .unwrap();
        }
        let user = add_user(&store, &conversation_id, &"word ".repeat(900)).await;

        let context = assembler.assemble(&conversation_id, &user).await.unwrap();

        assert!(context.total_tokens <= 2000);
        assert!(context.summary_created);
        assert_eq!(store.list_summaries(&conversation_id).await.unwrap().len(), 1);
        assert_eq!(context.messages.last(), Some(&ChatMessage::user("word ".repeat(900))));
        if context.summary_id.is_none() {
            assert_eq!(context.messages.len(), 2);
        }
    }

    #[tokio::test]
    async fn test_stored_summary_token_count_is_trusted() {
        let config = config(1000);
        let (store, assembler, conversation_id) = setup(&config).await;
        add_messages(&store, &conversation_id, 4, "ok").await;

        // Short text, but the stored count says it cannot fit
        let mut inflated = summary(&conversation_id, "inflated", 1, 4);
        inflated.token_count = 5000;
        store.insert_summary(inflated).await.unwrap();
        let user = add_user(&store, &conversation_id, "Next").await;

        let context = assembler.assemble(&conversation_id, &user).await.unwrap();
        assert!(context.summary_id.is_none());
        assert_eq!(context.messages.len(), 2);
        assert_eq!(context.messages[1], ChatMessage::user("Next"));

        // An honest count is used as stored
        let honest = summary(&conversation_id, "honest", 1, 5);
        store.insert_summary(honest.clone()).await.unwrap();
        let context = assembler.preview(&conversation_id).await.unwrap();
        assert_eq!(context.summary_id.as_deref(), Some("honest"));
        assert_eq!(
            context.total_tokens,
            estimate_message(&context.messages[0]) + summary_tokens(&honest)
        );
        assert_eq!(
            summary_tokens(&honest),
            MESSAGE_OVERHEAD_TOKENS + estimate(&summary_header(&honest)) + 8
        );
    }

    #[tokio::test]
    async fn test_preview_is_read_only_and_idempotent() {
        let config = config(1000);
        let (store, assembler, conversation_id) = setup(&config).await;
        add_messages(&store, &conversation_id, 300, "ok thanks").await;

        let first = assembler.preview(&conversation_id).await.unwrap();
        let second = assembler.preview(&conversation_id).await.unwrap();

        assert_eq!(first.messages, second.messages);
        assert_eq!(first.total_tokens, second.total_tokens);
        assert!(first.total_tokens <= 1000);
        assert!(first.dropped_messages > 0);
        assert!(store.list_summaries(&conversation_id).await.unwrap().is_empty());
        assert_eq!(
            store.list_messages_after(&conversation_id, None).await.unwrap().len(),
            300
        );
    }

    #[tokio::test]
    async fn test_preamble_follows_phase() {
        let config = config(100_000);
        let (store, assembler, conversation_id) = setup(&config).await;
        store
            .update_phase(&conversation_id, ConversationPhase::Consultation)
            .await
            .unwrap();

        let context = assembler.preview(&conversation_id).await.unwrap();
        assert!(context.messages[0].content.contains("## Current Phase: Consultation"));
        assert!(context.messages[0].content.contains("project-1"));
    }

    #[tokio::test]
    async fn test_unknown_conversation() {
        let config = config(1000);
        let (_store, assembler, _) = setup(&config).await;
        let result = assembler.preview("missing").await;
        assert!(matches!(result, Err(GenerationError::ConversationNotFound(_))));
    }
}
