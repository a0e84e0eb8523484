// Stream Manager
//
// Tracks in-flight generations so they can be cancelled by id, and defines
// the handle a caller uses to consume a turn's events:
// - Chunk events as model output arrives
// - A single terminal event (completed, failed or cancelled)

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{GenerationEvent, Message};

/// Manages active generation sessions
#[derive(Clone)]
pub struct StreamManager {
    /// Active sessions (session_id -> cancellation token)
    sessions: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl StreamManager {
    /// Create a new StreamManager
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create a new session for a conversation
    /// Returns (session_id, cancellation token)
    pub async fn create_session(&self, conversation_id: &str) -> (String, CancellationToken) {
        let session_id = format!("gen_{}", Uuid::new_v4().simple());
        let cancel = CancellationToken::new();

        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id.clone(), cancel.clone());
        log::debug!("[{}] Created generation session {}", conversation_id, session_id);

        (session_id, cancel)
    }

    /// Cancel a session
    pub async fn cancel_session(&self, session_id: &str) -> Result<(), String> {
        let mut sessions = self.sessions.write().await;

        if let Some(cancel) = sessions.remove(session_id) {
            cancel.cancel();
            Ok(())
        } else {
            Err(format!("Session not found: {}", session_id))
        }
    }

    /// Remove a session (called when the turn ends)
    pub async fn remove_session(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
    }
}

impl Default for StreamManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Caller side of one generation turn
pub struct GenerationHandle {
    id: String,
    conversation_id: String,
    user_message: Message,
    cancel: CancellationToken,
    events: mpsc::UnboundedReceiver<GenerationEvent>,
}

impl GenerationHandle {
    pub(crate) fn new(
        id: String,
        user_message: Message,
        cancel: CancellationToken,
        events: mpsc::UnboundedReceiver<GenerationEvent>,
    ) -> Self {
        Self {
            id,
            conversation_id: user_message.conversation_id.clone(),
            user_message,
            cancel,
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// The persisted user message that started the turn
    pub fn user_message(&self) -> &Message {
        &self.user_message
    }

    /// Request cancellation; the turn ends with a `Cancelled` event unless
    /// the assistant message was already written
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event, `None` once the turn has ended and all events are read
    pub async fn next_event(&mut self) -> Option<GenerationEvent> {
        self.events.recv().await
    }

    /// Skip chunks and wait for the terminal event
    pub async fn finish(&mut self) -> Option<GenerationEvent> {
        while let Some(event) = self.events.recv().await {
            if event.is_terminal() {
                return Some(event);
            }
        }
        None
    }

    /// Consume the handle as a stream of events
    pub fn into_stream(self) -> UnboundedReceiverStream<GenerationEvent> {
        UnboundedReceiverStream::new(self.events)
    }
}
