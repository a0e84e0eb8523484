// Ollama Client Implementation
//
// Streams `/api/chat` responses as newline-delimited JSON frames.
// No API key required.
// Default endpoint: http://127.0.0.1:11434

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{ChunkStream, GenerationError, GenerationResult, ModelClient};
use crate::models::{ChatMessage, ChatOptions, GenerationConfig};

/// Timeout for the connection check
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Ollama Client
pub struct OllamaClient {
    endpoint: String,
    model: String,
    options: ChatOptions,
    idle_timeout: Duration,
    client: Client,
}

impl OllamaClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        options: ChatOptions,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            options,
            idle_timeout,
            client: Client::new(),
        }
    }

    /// Build a client from the generation config
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            ChatOptions {
                temperature: config.temperature,
                max_tokens: Some(config.max_output_tokens),
            },
            config.idle_timeout(),
        )
    }

    fn api_url(&self, path: &str) -> String {
        let base = self.endpoint.trim_end_matches('/');
        format!("{}{}", base, path)
    }
}

// Ollama API types
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

/// One NDJSON frame of a streaming chat response
#[derive(Debug, Deserialize)]
struct OllamaStreamFrame {
    #[serde(default)]
    message: Option<OllamaResponseMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OllamaResponseMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct OllamaErrorBody {
    error: String,
}

/// Splits a byte stream into complete lines
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append bytes and drain every complete line
    fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.pending.drain(..=pos).collect();
            line.pop();
            lines.push(line);
        }
        lines
    }

    /// Whatever is left once the body ends (a final line without `\n`)
    fn finish(&mut self) -> Vec<Vec<u8>> {
        if self.pending.is_empty() {
            Vec::new()
        } else {
            vec![std::mem::take(&mut self.pending)]
        }
    }
}

/// Parse one line, `None` for blank lines
fn decode_frame(line: &[u8]) -> GenerationResult<Option<OllamaStreamFrame>> {
    let text = std::str::from_utf8(line)
        .map_err(|e| GenerationError::ProtocolError(format!("Invalid UTF-8 in frame: {}", e)))?
        .trim();

    if text.is_empty() {
        return Ok(None);
    }

    serde_json::from_str(text)
        .map(Some)
        .map_err(|e| GenerationError::ProtocolError(format!("Invalid frame {:?}: {}", text, e)))
}

/// Error message for a non-2xx response, preferring the server's own text
fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<OllamaErrorBody>(body) {
        Ok(parsed) => parsed.error,
        Err(_) => format!("Ollama API error ({}): {}", status, body.trim()),
    }
}

enum Step<T> {
    Cancelled,
    TimedOut,
    Item(Option<T>),
}

#[async_trait]
impl ModelClient for OllamaClient {
    fn name(&self) -> &str {
        "Ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream_generate(
        &self,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> GenerationResult<ChunkStream> {
        let url = self.api_url("/api/chat");

        let request = OllamaChatRequest {
            model: self.model.clone(),
            messages: messages
                .into_iter()
                .map(|m| OllamaMessage {
                    role: m.role.as_str().to_string(),
                    content: m.content,
                })
                .collect(),
            stream: true,
            options: OllamaOptions {
                temperature: self.options.temperature,
                num_predict: self.options.max_tokens,
            },
        };

        let send = self.client.post(&url).json(&request).send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
            result = tokio::time::timeout(self.idle_timeout, send) => match result {
                Ok(response) => response?,
                Err(_) => return Err(GenerationError::Timeout),
            },
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = tokio::time::timeout(self.idle_timeout, response.text())
                .await
                .ok()
                .and_then(|r| r.ok())
                .unwrap_or_default();
            return Err(GenerationError::ModelError(error_message(status, &body)));
        }

        let idle_timeout = self.idle_timeout;
        let stream = async_stream::stream! {
            let mut body = response.bytes_stream();
            let mut buffer = LineBuffer::default();

            loop {
                let step = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Step::Cancelled,
                    next = tokio::time::timeout(idle_timeout, body.next()) => match next {
                        Ok(item) => Step::Item(item),
                        Err(_) => Step::TimedOut,
                    },
                };

                let (lines, eof) = match step {
                    Step::Cancelled => {
                        log::debug!("Ollama stream cancelled, dropping response body");
                        yield Err(GenerationError::Cancelled);
                        return;
                    }
                    Step::TimedOut => {
                        log::warn!("Ollama stream idle for {:?}", idle_timeout);
                        yield Err(GenerationError::Timeout);
                        return;
                    }
                    Step::Item(Some(Ok(bytes))) => (buffer.push(&bytes), false),
                    Step::Item(Some(Err(e))) => {
                        yield Err(GenerationError::from(e));
                        return;
                    }
                    Step::Item(None) => (buffer.finish(), true),
                };

                for line in lines {
                    match decode_frame(&line) {
                        Ok(None) => {}
                        Ok(Some(frame)) => {
                            if let Some(error) = frame.error {
                                yield Err(GenerationError::ModelError(error));
                                return;
                            }
                            if let Some(message) = frame.message {
                                if !message.content.is_empty() {
                                    yield Ok(message.content);
                                }
                            }
                            if frame.done {
                                return;
                            }
                        }
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }

                if eof {
                    yield Err(GenerationError::ProtocolError(
                        "Stream closed before the final frame".to_string(),
                    ));
                    return;
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn check_connection(&self) -> GenerationResult<bool> {
        let url = self.api_url("/api/tags");

        let response = self
            .client
            .get(&url)
            .timeout(CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout
                } else {
                    GenerationError::Unavailable(format!(
                        "Cannot connect to Ollama service ({}): {}",
                        self.endpoint, e
                    ))
                }
            })?;

        let status = response.status();
        if status.is_success() {
            log::info!("Ollama connection successful ({})", self.endpoint);
        } else {
            log::warn!("Ollama at {} answered {}", self.endpoint, status);
        }
        Ok(status.is_success())
    }
}
