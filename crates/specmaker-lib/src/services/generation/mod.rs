// Generation Orchestrator Module
// Drives user turns end to end: context assembly, streaming, persistence

pub mod orchestrator;
pub mod stream;

pub use orchestrator::GenerationOrchestrator;
pub use stream::{GenerationHandle, StreamManager};
