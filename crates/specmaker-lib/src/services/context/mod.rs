// Context Pipeline Module
//
// This module keeps long conversations inside the model's context window:
// - Token estimation
// - Tiered, incremental summarization
// - Phase-aware system preamble
// - Budgeted context assembly

pub mod assembler;
pub mod prompt_builder;
pub mod summarizer;
pub mod token_estimator;

// Re-export main types
pub use assembler::{AssembledContext, ContextAssembler};
pub use prompt_builder::{build_system_prompt, SystemPromptBuilder};
pub use summarizer::{Section, Summarizer, Tier, TieredSummarizer};
