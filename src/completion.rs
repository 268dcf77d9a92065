//! Streaming chat completions from a hosted, OpenAI-compatible provider.
//!
//! The provider answers with server-sent events; [`SseDecoder`] turns the raw
//! byte chunks into token fragments, and [`CompletionClient::stream`] relays
//! those fragments through a channel as they arrive.

use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, instrument, warn};

use crate::constants;
use crate::Message;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("HTTP request to completion provider failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Completion provider returned status {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Completion stream interrupted: {0}")]
    Stream(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionRequest {
    pub model: String,
    pub stream: bool,
    pub messages: Vec<Message>,
}

/// The conversation as sent to the provider: the fixed system prompt first,
/// then the caller's messages unchanged.
pub fn with_system_prompt(messages: Vec<Message>) -> Vec<Message> {
    let mut full = Vec::with_capacity(messages.len() + 1);
    full.push(Message::system(constants::SYSTEM_PROMPT));
    full.extend(messages);
    full
}

#[derive(Debug, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Token(String),
    Done,
}

/// Incremental decoder for `data:` lines. Bytes after the last newline are
/// kept until the next chunk completes the line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = Self::decode_line(line.trim()) {
                events.push(event);
            }
        }
        events
    }

    fn decode_line(line: &str) -> Option<SseEvent> {
        let data = line.strip_prefix("data:")?.trim_start();
        if data == "[DONE]" {
            return Some(SseEvent::Done);
        }
        match serde_json::from_str::<CompletionChunk>(data) {
            Ok(chunk) => chunk
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.delta.content)
                .filter(|content| !content.is_empty())
                .map(SseEvent::Token),
            Err(e) => {
                warn!("Failed to parse completion chunk: {} - Error: {}", data, e);
                None
            }
        }
    }
}

pub type TokenStream = UnboundedReceiverStream<Result<String, CompletionError>>;

#[derive(Debug, Clone)]
pub struct CompletionClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl CompletionClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn request_for(&self, messages: Vec<Message>) -> CompletionRequest {
        CompletionRequest {
            model: self.model.clone(),
            stream: true,
            messages: with_system_prompt(messages),
        }
    }

    /// Starts a streamed completion. Fails if the provider cannot be reached
    /// or rejects the request; after that, fragments are relayed as they
    /// arrive and the stream ends at `[DONE]` or when the upstream closes.
    #[instrument(skip(self, messages), fields(model = %self.model, messages = messages.len()))]
    pub async fn stream(&self, messages: Vec<Message>) -> Result<TokenStream, CompletionError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = self.request_for(messages);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            error!(%status, %body, "Completion provider request failed");
            return Err(CompletionError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        info!("Relaying completion stream");
        let mut upstream = response.bytes_stream();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut decoder = SseDecoder::new();
            let mut relayed = 0usize;
            while let Some(chunk) = upstream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        error!("Completion stream error: {}", e);
                        let _ = tx.send(Err(CompletionError::Stream(e.to_string())));
                        return;
                    }
                };
                for event in decoder.push(&bytes) {
                    match event {
                        SseEvent::Token(text) => {
                            relayed += 1;
                            if tx.send(Ok(text)).is_err() {
                                debug!("Client went away, dropping completion stream");
                                return;
                            }
                        }
                        SseEvent::Done => {
                            debug!(relayed, "Completion stream finished");
                            return;
                        }
                    }
                }
            }
            debug!(relayed, "Completion upstream closed");
        });

        Ok(UnboundedReceiverStream::new(rx))
    }
}
