// Generation data models
// Wire-level chat messages, turn state machine and caller-facing events

use serde::{Deserialize, Serialize};

use super::conversation::{Message, MessageRole};

/// Role-tagged message as sent to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Sampling options forwarded to the inference server
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

// ============================================================================
// Turn State Machine
// ============================================================================

/// Per-conversation generation state
///
/// `Failed` and `Cancelled` are terminal for a single request; both fall
/// back to `Idle` so the user can resubmit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GenerationState {
    Idle,
    Assembling,
    Streaming,
    Persisting,
    Failed,
    Cancelled,
}

impl GenerationState {
    pub fn can_transition_to(&self, next: GenerationState) -> bool {
        use GenerationState::*;

        matches!(
            (self, next),
            (Idle, Assembling)
                | (Assembling, Streaming)
                | (Assembling, Failed)
                | (Assembling, Cancelled)
                | (Streaming, Persisting)
                | (Streaming, Failed)
                | (Streaming, Cancelled)
                | (Persisting, Idle)
                | (Persisting, Failed)
                | (Persisting, Cancelled)
                | (Failed, Idle)
                | (Cancelled, Idle)
        )
    }

    pub fn is_idle(&self) -> bool {
        *self == GenerationState::Idle
    }
}

impl std::fmt::Display for GenerationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            GenerationState::Idle => "idle",
            GenerationState::Assembling => "assembling",
            GenerationState::Streaming => "streaming",
            GenerationState::Persisting => "persisting",
            GenerationState::Failed => "failed",
            GenerationState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Events
// ============================================================================

/// Event pushed to the subscriber of a generation handle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GenerationEvent {
    /// Incremental output fragment
    #[serde(rename = "chunk")]
    Chunk { text: String },
    /// Assistant message persisted
    #[serde(rename = "completed")]
    Completed {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "fullText")]
        full_text: String,
    },
    /// Turn failed; nothing was persisted for the assistant
    #[serde(rename = "failed")]
    Failed {
        kind: String,
        message: String,
        retryable: bool,
    },
    /// Turn cancelled by the caller; partial output discarded
    #[serde(rename = "cancelled")]
    Cancelled,
}

impl GenerationEvent {
    /// Whether this event ends the stream
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GenerationEvent::Chunk { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_transitions() {
        use GenerationState::*;

        assert!(Idle.can_transition_to(Assembling));
        assert!(Assembling.can_transition_to(Failed));
        assert!(Streaming.can_transition_to(Cancelled));
        assert!(Persisting.can_transition_to(Idle));
        assert!(Failed.can_transition_to(Idle));

        assert!(!Idle.can_transition_to(Streaming));
        assert!(!Assembling.can_transition_to(Persisting));
        assert!(!Failed.can_transition_to(Streaming));
    }

    #[test]
    fn test_event_serialization() {
        let event = GenerationEvent::Completed {
            message_id: "m1".to_string(),
            full_text: "done".to_string(),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "completed");
        assert_eq!(json["messageId"], "m1");
        assert_eq!(json["fullText"], "done");

        let cancelled = serde_json::to_value(GenerationEvent::Cancelled).expect("serialize");
        assert_eq!(cancelled["type"], "cancelled");
    }

    #[test]
    fn test_terminal_events() {
        assert!(!GenerationEvent::Chunk { text: "a".to_string() }.is_terminal());
        assert!(GenerationEvent::Cancelled.is_terminal());
    }
}
