// Data models module
// Entities, wire types and configuration shared by the generation core

pub mod config;
pub mod conversation;
pub mod generation;

// Re-export all models for convenience
pub use config::*;
pub use conversation::*;
pub use generation::*;
