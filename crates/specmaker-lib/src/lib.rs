// SpecMaker Library
// Generation core shared by front ends: conversation storage, context
// assembly and summarization, and streaming turns against a local model

pub mod models;
pub mod repositories;
pub mod services;
pub mod utils;

pub use models::*;
pub use services::ai::{ErrorKind, GenerationError, GenerationResult, ModelClient, OllamaClient};
pub use services::context::{AssembledContext, ContextAssembler, TieredSummarizer};
pub use services::generation::{GenerationHandle, GenerationOrchestrator};
pub use services::{ConversationStore, SqliteConversationStore};
pub use utils::database::Database;
