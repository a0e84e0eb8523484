// Repository Layer
// Provides data access abstractions for SQLite database

pub mod conversation_repo;
pub mod settings_repo;
pub mod summary_repo;

// Re-export commonly used repositories
pub use conversation_repo::ConversationRepository;
pub use settings_repo::SettingsRepository;
pub use summary_repo::SummaryRepository;
