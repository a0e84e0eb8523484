// Services module
// Model access, context pipeline and generation orchestration

pub mod ai;
pub mod context;
pub mod generation;
pub mod store;

pub use store::{ConversationStore, SqliteConversationStore};
