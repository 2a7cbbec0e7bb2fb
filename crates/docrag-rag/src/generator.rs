//! Chat-completion client for answer generation.
//!
//! Talks to an OpenAI-compatible `/chat/completions` endpoint. Streaming
//! responses arrive as server-sent events; each `data:` line carries a JSON
//! chunk with a content delta, terminated by `data: [DONE]`.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use docrag_core::{GenerateError, GenerationOutput, GenerationRequest, Generator, TextStream, TokenUsage};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for the generation client.
#[derive(Debug, Clone)]
pub struct GenClientConfig {
    /// Provider base URL, e.g. `https://api.openai.com/v1`
    pub base_url: String,
    /// Bearer token
    pub api_key: String,
    /// Request deadline (covers the whole stream)
    pub timeout: Duration,
}

/// OpenAI-compatible chat generation client.
pub struct OpenAiGenerator {
    client: reqwest::Client,
    config: GenClientConfig,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<UsageBody>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct UsageBody {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(config: GenClientConfig) -> Result<Self, GenerateError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerateError::Unavailable(format!("http client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn post_chat(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<reqwest::Response, GenerateError> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerateError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerateError::Unavailable(format!(
                "provider returned {status}: {body}"
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationOutput, GenerateError> {
        debug!("generating with {}", request.model);
        let response = self.post_chat(request, false).await?;

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| GenerateError::InvalidResponse(e.to_string()))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerateError::InvalidResponse("no completion choices".to_string()))?;

        let usage = parsed
            .usage
            .map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
                total_tokens: u.total_tokens,
            })
            .unwrap_or_default();

        Ok(GenerationOutput { text, usage })
    }

    async fn generate_stream(
        &self,
        request: &GenerationRequest,
    ) -> Result<TextStream, GenerateError> {
        debug!("streaming with {}", request.model);
        let response = self.post_chat(request, true).await?;

        let byte_stream = response
            .bytes_stream()
            .map(|r| r.map(|b| b.to_vec()).map_err(|e| e.to_string()))
            .boxed();
        let state = SseState {
            bytes: byte_stream,
            buffer: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(fragment) = state.pending.pop_front() {
                    return Some((Ok(fragment), state));
                }
                if state.done {
                    return None;
                }

                match state.bytes.next().await {
                    Some(Ok(chunk)) => {
                        state.buffer.extend_from_slice(&chunk);
                        drain_sse_lines(&mut state);
                    }
                    Some(Err(e)) => {
                        state.done = true;
                        return Some((Err(GenerateError::Stream(e)), state));
                    }
                    None => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

struct SseState {
    bytes: BoxStream<'static, Result<Vec<u8>, String>>,
    /// Raw bytes carried across network chunk boundaries
    buffer: Vec<u8>,
    /// Parsed content deltas not yet yielded
    pending: VecDeque<String>,
    done: bool,
}

/// Split complete lines out of the buffer and collect content deltas.
fn drain_sse_lines(state: &mut SseState) {
    while let Some(pos) = state.buffer.iter().position(|b| *b == b'\n') {
        let line: Vec<u8> = state.buffer.drain(..=pos).collect();
        let Ok(line) = std::str::from_utf8(&line[..line.len() - 1]) else {
            continue;
        };
        let line = line.trim();

        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();

        if data == "[DONE]" {
            state.done = true;
            return;
        }

        if let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) {
            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    if !content.is_empty() {
                        state.pending.push_back(content);
                    }
                }
            }
        }
    }
}
