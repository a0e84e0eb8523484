// Model Client Module
// Streaming access to a locally hosted inference server

pub mod error;
pub mod ollama;

use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

pub use error::{ErrorKind, GenerationError, GenerationResult};
pub use ollama::OllamaClient;

use crate::models::ChatMessage;

/// Lazy, consume-once sequence of output fragments
///
/// Ends after the last fragment, or after yielding a single error.
pub type ChunkStream = Pin<Box<dyn Stream<Item = GenerationResult<String>> + Send>>;

/// Trait for model clients
///
/// Input must already fit the model's context window; implementations never
/// truncate.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Get the client name
    fn name(&self) -> &str;

    /// Model identifier recorded on assistant messages
    fn model(&self) -> &str;

    /// Start a streaming generation
    ///
    /// Once `cancel` fires the stream yields `GenerationError::Cancelled`
    /// and releases the connection.
    async fn stream_generate(
        &self,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> GenerationResult<ChunkStream>;

    /// Test the connection to the inference server
    ///
    /// `Ok(false)` when the server answers with an error status.
    async fn check_connection(&self) -> GenerationResult<bool>;

    /// Run a generation to completion and return the concatenated output
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> GenerationResult<String> {
        let mut stream = self.stream_generate(messages, cancel).await?;
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            output.push_str(&chunk?);
        }
        Ok(output)
    }
}
