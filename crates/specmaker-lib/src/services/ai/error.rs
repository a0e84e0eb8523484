// Generation Error Types
// Shared by the model client, the context pipeline and the orchestrator

use thiserror::Error;

use crate::models::ConversationPhase;

/// Generation core error
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Inference server unreachable
    #[error("Cannot connect to model server: {0}")]
    Unavailable(String),

    /// Malformed or truncated stream
    #[error("Malformed model response: {0}")]
    ProtocolError(String),

    /// Error payload returned by the server
    #[error("Model error: {0}")]
    ModelError(String),

    /// No data within the idle timeout
    #[error("Model server did not respond in time")]
    Timeout,

    /// Context cannot be reduced under the budget
    #[error("Context exceeds the token budget ({required} > {budget} tokens)")]
    ContextOverflow { required: usize, budget: usize },

    /// A generation is already running for the conversation
    #[error("A generation is already running for conversation {0}")]
    Busy(String),

    /// Cancelled by the caller
    #[error("Generation cancelled")]
    Cancelled,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Cannot move conversation from {from} to {to}")]
    InvalidPhaseTransition {
        from: ConversationPhase,
        to: ConversationPhase,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Timeout
        } else if err.is_connect() {
            GenerationError::Unavailable(err.to_string())
        } else {
            GenerationError::ProtocolError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for GenerationError {
    fn from(err: serde_json::Error) -> Self {
        GenerationError::ProtocolError(err.to_string())
    }
}

/// Result type for generation operations
pub type GenerationResult<T> = Result<T, GenerationError>;

/// Stable error codes reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unavailable,
    ProtocolError,
    ModelError,
    Timeout,
    ContextOverflow,
    Busy,
    Cancelled,
    ConversationNotFound,
    InvalidInput,
    InvalidPhaseTransition,
    InvalidConfig,
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Unavailable => "GENERATION_UNAVAILABLE",
            ErrorKind::ProtocolError => "GENERATION_PROTOCOL_ERROR",
            ErrorKind::ModelError => "GENERATION_MODEL_ERROR",
            ErrorKind::Timeout => "GENERATION_TIMEOUT",
            ErrorKind::ContextOverflow => "GENERATION_CONTEXT_OVERFLOW",
            ErrorKind::Busy => "GENERATION_BUSY",
            ErrorKind::Cancelled => "GENERATION_CANCELLED",
            ErrorKind::ConversationNotFound => "CONVERSATION_NOT_FOUND",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::InvalidPhaseTransition => "INVALID_PHASE_TRANSITION",
            ErrorKind::InvalidConfig => "INVALID_CONFIG",
            ErrorKind::Storage => "STORAGE_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl GenerationError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GenerationError::Unavailable(_) => ErrorKind::Unavailable,
            GenerationError::ProtocolError(_) => ErrorKind::ProtocolError,
            GenerationError::ModelError(_) => ErrorKind::ModelError,
            GenerationError::Timeout => ErrorKind::Timeout,
            GenerationError::ContextOverflow { .. } => ErrorKind::ContextOverflow,
            GenerationError::Busy(_) => ErrorKind::Busy,
            GenerationError::Cancelled => ErrorKind::Cancelled,
            GenerationError::ConversationNotFound(_) => ErrorKind::ConversationNotFound,
            GenerationError::InvalidInput(_) => ErrorKind::InvalidInput,
            GenerationError::InvalidPhaseTransition { .. } => ErrorKind::InvalidPhaseTransition,
            GenerationError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            GenerationError::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Whether resubmitting the same turn may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GenerationError::Unavailable(_)
                | GenerationError::ProtocolError(_)
                | GenerationError::Timeout
                | GenerationError::Busy(_)
        )
    }
}

impl From<GenerationError> for String {
    fn from(err: GenerationError) -> Self {
        err.to_string()
    }
}
