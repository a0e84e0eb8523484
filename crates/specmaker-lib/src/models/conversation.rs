// Conversation data models
// Conversations, append-only messages and tiered context summaries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Core Entities
// ============================================================================

/// Conversation entity - one engagement between the user and the model for a project
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Owning project reference
    pub project_id: String,
    /// Current document-production phase
    pub phase: ConversationPhase,
    /// When conversation started
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new conversation in the initial analysis phase
    pub fn new(project_id: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            project_id,
            phase: ConversationPhase::InitialAnalysis,
            created_at: Utc::now(),
        }
    }
}

/// Message entity - individual message within a conversation
///
/// Messages are append-only. `sequence` is assigned by the store at insert
/// time and is strictly increasing within a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Parent conversation ID
    pub conversation_id: String,
    /// Message author role
    pub role: MessageRole,
    /// Message text content
    pub content: String,
    /// Free-form metadata (token count, model id, ...)
    pub metadata: Option<serde_json::Value>,
    /// Position within the conversation, starting at 1
    pub sequence: i64,
    /// When message was created
    pub created_at: DateTime<Utc>,
}

/// A message that has not been written yet; the store assigns its
/// `sequence` on insert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub content: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    fn with_role(conversation_id: &str, role: MessageRole, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            role,
            content,
            metadata: None,
            created_at: Utc::now(),
        }
    }

    /// Create a new user message
    pub fn user(conversation_id: &str, content: String) -> Self {
        Self::with_role(conversation_id, MessageRole::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(conversation_id: &str, content: String) -> Self {
        Self::with_role(conversation_id, MessageRole::Assistant, content)
    }

    /// Attach metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Turn into a stored message once the store has assigned a sequence
    pub fn into_message(self, sequence: i64) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            role: self.role,
            content: self.content,
            metadata: self.metadata,
            sequence,
            created_at: self.created_at,
        }
    }
}

/// Compact, sectioned summary of a contiguous message range
///
/// A summary whose range contains another summary's range supersedes it.
/// Superseded rows stay in storage but are never used for assembly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContextSummary {
    /// Unique identifier (UUID v4)
    pub id: String,
    /// Parent conversation ID
    pub conversation_id: String,
    /// Sectioned summary text
    pub summary: String,
    /// First covered message (inclusive)
    pub first_message_id: String,
    /// Last covered message (inclusive)
    pub last_message_id: String,
    /// Sequence of the first covered message
    pub range_start: i64,
    /// Sequence of the last covered message
    pub range_end: i64,
    /// Estimated token cost of `summary`
    pub token_count: i64,
    /// When the summary was produced
    pub created_at: DateTime<Utc>,
}

impl ContextSummary {
    /// Whether this summary's range fully contains `other`'s range
    pub fn supersedes(&self, other: &ContextSummary) -> bool {
        self.id != other.id
            && self.range_start <= other.range_start
            && self.range_end >= other.range_end
    }
}

// ============================================================================
// Enums
// ============================================================================

/// Message author role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            _ => Err(format!("Invalid message role: {}", s)),
        }
    }
}

/// Document-production phase of a conversation
///
/// Phases only move through `can_advance_to`; the orchestrator is the only
/// writer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    InitialAnalysis,
    Consultation,
    ContextBuilding,
    Generation,
    Refinement,
}

impl ConversationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationPhase::InitialAnalysis => "initial_analysis",
            ConversationPhase::Consultation => "consultation",
            ConversationPhase::ContextBuilding => "context_building",
            ConversationPhase::Generation => "generation",
            ConversationPhase::Refinement => "refinement",
        }
    }

    /// The phase that normally follows this one
    pub fn next(&self) -> Option<ConversationPhase> {
        match self {
            ConversationPhase::InitialAnalysis => Some(ConversationPhase::Consultation),
            ConversationPhase::Consultation => Some(ConversationPhase::ContextBuilding),
            ConversationPhase::ContextBuilding => Some(ConversationPhase::Generation),
            ConversationPhase::Generation => Some(ConversationPhase::Refinement),
            ConversationPhase::Refinement => None,
        }
    }

    /// Forward by exactly one step, or back from refinement to generation
    /// to regenerate a document.
    pub fn can_advance_to(&self, next: ConversationPhase) -> bool {
        self.next() == Some(next)
            || (*self == ConversationPhase::Refinement && next == ConversationPhase::Generation)
    }
}

impl std::fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConversationPhase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "initial_analysis" => Ok(ConversationPhase::InitialAnalysis),
            "consultation" => Ok(ConversationPhase::Consultation),
            "context_building" => Ok(ConversationPhase::ContextBuilding),
            "generation" => Ok(ConversationPhase::Generation),
            "refinement" => Ok(ConversationPhase::Refinement),
            _ => Err(format!("Invalid conversation phase: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_round_trips_through_str() {
        for phase in [
            ConversationPhase::InitialAnalysis,
            ConversationPhase::Consultation,
            ConversationPhase::ContextBuilding,
            ConversationPhase::Generation,
            ConversationPhase::Refinement,
        ] {
            let parsed: ConversationPhase = phase.as_str().parse().expect("valid phase");
            assert_eq!(parsed, phase);
        }
        assert!("drafting".parse::<ConversationPhase>().is_err());
    }

    #[test]
    fn test_phase_transitions() {
        use ConversationPhase::*;

        assert!(InitialAnalysis.can_advance_to(Consultation));
        assert!(Generation.can_advance_to(Refinement));
        assert!(Refinement.can_advance_to(Generation));

        assert!(!InitialAnalysis.can_advance_to(Generation));
        assert!(!Consultation.can_advance_to(InitialAnalysis));
        assert!(!Consultation.can_advance_to(Consultation));
    }

    #[test]
    fn test_summary_supersedes() {
        let base = ContextSummary {
            id: "a".to_string(),
            conversation_id: "c".to_string(),
            summary: String::new(),
            first_message_id: "m1".to_string(),
            last_message_id: "m200".to_string(),
            range_start: 1,
            range_end: 200,
            token_count: 10,
            created_at: Utc::now(),
        };
        let wider = ContextSummary {
            id: "b".to_string(),
            last_message_id: "m350".to_string(),
            range_end: 350,
            ..base.clone()
        };

        assert!(wider.supersedes(&base));
        assert!(!base.supersedes(&wider));
        assert!(!base.supersedes(&base));
    }

    #[test]
    fn test_message_role_serde() {
        let json = serde_json::to_string(&MessageRole::Assistant).expect("serialize");
        assert_eq!(json, "\"assistant\"");
        assert_eq!("USER".parse::<MessageRole>(), Ok(MessageRole::User));
    }
}
