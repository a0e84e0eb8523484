// Generation Orchestrator
//
// Per-conversation state machine driving one turn at a time:
//   Idle -> Assembling -> Streaming -> Persisting -> Idle
// with Failed and Cancelled ending a single request. Turns run on their own
// tokio task; the caller consumes events through a GenerationHandle.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::stream::{GenerationHandle, StreamManager};
use crate::models::{
    ContextSummary, Conversation, ConversationPhase, GenerationConfig, GenerationEvent,
    GenerationState, Message, NewMessage,
};
use crate::services::ai::{GenerationError, GenerationResult, ModelClient, OllamaClient};
use crate::services::context::token_estimator::estimate;
use crate::services::context::{AssembledContext, ContextAssembler, Summarizer, TieredSummarizer};
use crate::services::store::{ConversationStore, SqliteConversationStore};
use crate::utils::database::Database;

type StateMap = Arc<Mutex<HashMap<String, GenerationState>>>;

fn lock_states(states: &StateMap) -> MutexGuard<'_, HashMap<String, GenerationState>> {
    match states.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Claim on a conversation for the duration of one turn
///
/// Dropping the guard returns the conversation to `Idle`.
struct TurnGuard {
    states: StateMap,
    conversation_id: String,
}

impl TurnGuard {
    /// Claim an idle conversation, or fail with `Busy`
    fn claim(states: &StateMap, conversation_id: &str) -> GenerationResult<Self> {
        let mut map = lock_states(states);
        if map.contains_key(conversation_id) {
            return Err(GenerationError::Busy(conversation_id.to_string()));
        }
        map.insert(conversation_id.to_string(), GenerationState::Assembling);

        Ok(Self {
            states: states.clone(),
            conversation_id: conversation_id.to_string(),
        })
    }

    fn transition(&self, next: GenerationState) {
        let mut map = lock_states(&self.states);
        if let Some(state) = map.get_mut(&self.conversation_id) {
            if state.can_transition_to(next) {
                log::debug!("[{}] {} -> {}", self.conversation_id, state, next);
                *state = next;
            } else {
                log::warn!(
                    "[{}] Ignoring invalid transition {} -> {}",
                    self.conversation_id,
                    state,
                    next
                );
            }
        }
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        lock_states(&self.states).remove(&self.conversation_id);
    }
}

/// Everything a spawned turn needs
#[derive(Clone)]
struct TurnContext {
    store: Arc<dyn ConversationStore>,
    model: Arc<dyn ModelClient>,
    assembler: Arc<ContextAssembler>,
    streams: StreamManager,
}

/// Generation orchestrator
pub struct GenerationOrchestrator {
    turn: TurnContext,
    states: StateMap,
    config: GenerationConfig,
}

impl GenerationOrchestrator {
    /// Create an orchestrator whose summarizer asks `model` for overviews
    pub fn new(
        store: Arc<dyn ConversationStore>,
        model: Arc<dyn ModelClient>,
        config: GenerationConfig,
    ) -> GenerationResult<Self> {
        let summarizer = Arc::new(TieredSummarizer::new(&config).with_model(model.clone()));
        Self::with_summarizer(store, model, summarizer, config)
    }

    /// Create an orchestrator with an explicit summarizer
    pub fn with_summarizer(
        store: Arc<dyn ConversationStore>,
        model: Arc<dyn ModelClient>,
        summarizer: Arc<dyn Summarizer>,
        config: GenerationConfig,
    ) -> GenerationResult<Self> {
        config.validate().map_err(GenerationError::InvalidConfig)?;

        let assembler = Arc::new(ContextAssembler::new(store.clone(), summarizer, &config));

        Ok(Self {
            turn: TurnContext {
                store,
                model,
                assembler,
                streams: StreamManager::new(),
            },
            states: Arc::new(Mutex::new(HashMap::new())),
            config,
        })
    }

    /// SQLite store plus an Ollama client built from `config`
    pub fn from_database(db: Database, config: GenerationConfig) -> GenerationResult<Self> {
        let model = Arc::new(OllamaClient::from_config(&config));
        Self::new(Arc::new(SqliteConversationStore::new(db)), model, config)
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.config
    }

    /// Current state of a conversation
    pub fn state(&self, conversation_id: &str) -> GenerationState {
        lock_states(&self.states)
            .get(conversation_id)
            .copied()
            .unwrap_or(GenerationState::Idle)
    }

    fn ensure_idle(&self, conversation_id: &str) -> GenerationResult<()> {
        if lock_states(&self.states).contains_key(conversation_id) {
            Err(GenerationError::Busy(conversation_id.to_string()))
        } else {
            Ok(())
        }
    }

    // =========================================================================
    // Turns
    // =========================================================================

    /// Persist a user message and start generating the reply
    ///
    /// Fails with `Busy` before doing anything when a turn is already
    /// running for the conversation.
    pub async fn submit_user_turn(
        &self,
        conversation_id: &str,
        text: &str,
    ) -> GenerationResult<GenerationHandle> {
        if text.trim().is_empty() {
            return Err(GenerationError::InvalidInput(
                "Message cannot be empty".to_string(),
            ));
        }

        let guard = TurnGuard::claim(&self.states, conversation_id)?;

        let conversation = self.get_conversation(conversation_id).await?;
        let user_message = self
            .turn
            .store
            .insert_message(NewMessage::user(conversation_id, text.to_string()))
            .await?;

        let (session_id, cancel) = self.turn.streams.create_session(conversation_id).await;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        log::info!(
            "[{}] Starting generation {} for message {}",
            conversation_id,
            session_id,
            user_message.sequence
        );

        let turn = self.turn.clone();
        let task_message = user_message.clone();
        let task_session = session_id.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            turn.run(
                guard,
                conversation.phase,
                task_session,
                task_message,
                task_cancel,
                events_tx,
            )
            .await;
        });

        Ok(GenerationHandle::new(session_id, user_message, cancel, events_rx))
    }

    /// Cancel the turn behind a handle
    pub async fn cancel(&self, handle: &GenerationHandle) {
        handle.cancel();
        let _ = self.turn.streams.cancel_session(handle.id()).await;
    }

    /// Cancel a turn by handle id; `false` when no such turn is running
    pub async fn cancel_generation(&self, handle_id: &str) -> bool {
        match self.turn.streams.cancel_session(handle_id).await {
            Ok(()) => {
                log::info!("Cancelled generation {}", handle_id);
                true
            }
            Err(_) => false,
        }
    }

    /// Diagnostic view of the next request's context; read-only
    pub async fn assembled_context_preview(
        &self,
        conversation_id: &str,
    ) -> GenerationResult<AssembledContext> {
        self.turn.assembler.preview(conversation_id).await
    }

    // =========================================================================
    // Conversations
    // =========================================================================

    pub async fn create_conversation(&self, project_id: &str) -> GenerationResult<Conversation> {
        if project_id.trim().is_empty() {
            return Err(GenerationError::InvalidInput(
                "Project id cannot be empty".to_string(),
            ));
        }

        let conversation = self
            .turn
            .store
            .create_conversation(Conversation::new(project_id.to_string()))
            .await?;
        log::info!("[{}] Created conversation for project {}", conversation.id, project_id);
        Ok(conversation)
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> GenerationResult<Conversation> {
        self.turn
            .store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| GenerationError::ConversationNotFound(conversation_id.to_string()))
    }

    /// Full message history in sequence order
    pub async fn conversation_messages(&self, conversation_id: &str) -> GenerationResult<Vec<Message>> {
        self.get_conversation(conversation_id).await?;
        self.turn.store.list_messages_after(conversation_id, None).await
    }

    /// Every summary produced for the conversation, widest first
    pub async fn summary_history(&self, conversation_id: &str) -> GenerationResult<Vec<ContextSummary>> {
        self.get_conversation(conversation_id).await?;
        self.turn.store.list_summaries(conversation_id).await
    }

    /// Move a conversation to another phase
    pub async fn advance_phase(
        &self,
        conversation_id: &str,
        next: ConversationPhase,
    ) -> GenerationResult<Conversation> {
        self.ensure_idle(conversation_id)?;

        let mut conversation = self.get_conversation(conversation_id).await?;
        if !conversation.phase.can_advance_to(next) {
            return Err(GenerationError::InvalidPhaseTransition {
                from: conversation.phase,
                to: next,
            });
        }

        self.turn.store.update_phase(conversation_id, next).await?;
        log::info!("[{}] Phase {} -> {}", conversation_id, conversation.phase, next);

        conversation.phase = next;
        Ok(conversation)
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> GenerationResult<()> {
        self.ensure_idle(conversation_id)?;

        if self.turn.store.delete_conversation(conversation_id).await? {
            Ok(())
        } else {
            Err(GenerationError::ConversationNotFound(conversation_id.to_string()))
        }
    }

    pub async fn check_model_connection(&self) -> GenerationResult<bool> {
        self.turn.model.check_connection().await
    }
}

impl TurnContext {
    async fn run(
        self,
        guard: TurnGuard,
        phase: ConversationPhase,
        session_id: String,
        user_message: Message,
        cancel: CancellationToken,
        events: mpsc::UnboundedSender<GenerationEvent>,
    ) {
        let conversation_id = user_message.conversation_id.clone();

        let terminal = match self
            .execute(&guard, phase, &user_message, &cancel, &events)
            .await
        {
            Ok((message_id, full_text)) => {
                log::info!(
                    "[{}] Generation {} completed ({} chars)",
                    conversation_id,
                    session_id,
                    full_text.len()
                );
                GenerationEvent::Completed {
                    message_id,
                    full_text,
                }
            }
            Err(GenerationError::Cancelled) => {
                guard.transition(GenerationState::Cancelled);
                log::info!("[{}] Generation {} cancelled", conversation_id, session_id);
                GenerationEvent::Cancelled
            }
            Err(e) => {
                guard.transition(GenerationState::Failed);
                log::error!("[{}] Generation {} failed: {}", conversation_id, session_id, e);
                GenerationEvent::Failed {
                    kind: e.kind().as_str().to_string(),
                    message: e.to_string(),
                    retryable: e.is_retryable(),
                }
            }
        };

        self.streams.remove_session(&session_id).await;
        // Back to Idle before the caller sees the terminal event
        drop(guard);

        if events.send(terminal).is_err() {
            log::debug!("[{}] Handle dropped before the turn ended", conversation_id);
        }
    }

    async fn execute(
        &self,
        guard: &TurnGuard,
        phase: ConversationPhase,
        user_message: &Message,
        cancel: &CancellationToken,
        events: &mpsc::UnboundedSender<GenerationEvent>,
    ) -> GenerationResult<(String, String)> {
        let conversation_id = &user_message.conversation_id;

        let context = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            context = self.assembler.assemble(conversation_id, user_message) => context?,
        };
        log::debug!(
            "[{}] Sending {} messages ({} tokens, {} dropped)",
            conversation_id,
            context.messages.len(),
            context.total_tokens,
            context.dropped_messages
        );

        guard.transition(GenerationState::Streaming);

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            stream = self.model.stream_generate(context.messages, cancel.clone()) => stream?,
        };

        let mut full_text = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
                next = stream.next() => next,
            };

            let Some(chunk) = next else { break };
            let chunk = chunk?;
            full_text.push_str(&chunk);
            let _ = events.send(GenerationEvent::Chunk { text: chunk });
        }

        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        guard.transition(GenerationState::Persisting);

        let metadata = serde_json::json!({
            "model": self.model.model(),
            "tokenCount": estimate(&full_text),
        });
        let assistant = self
            .store
            .insert_message(NewMessage::assistant(conversation_id, full_text.clone()).with_metadata(metadata))
            .await?;

        if phase == ConversationPhase::InitialAnalysis {
            match self
                .store
                .update_phase(conversation_id, ConversationPhase::Consultation)
                .await
            {
                Ok(()) => log::info!("[{}] Phase initial_analysis -> consultation", conversation_id),
                Err(e) => log::warn!("[{}] Failed to advance phase: {}", conversation_id, e),
            }
        }

        guard.transition(GenerationState::Idle);
        Ok((assistant.id, full_text))
    }
}
