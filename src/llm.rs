//! Streaming chat-completion backends.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ModelConfig;
use crate::error::{RelayError, Result};
use crate::message::Message;

/// Lazy, finite sequence of assistant text fragments. Ends when the model
/// finishes its turn; an error, if any, is the last item.
pub type TextStream = BoxStream<'static, Result<String>>;

/// Minimal abstraction around a streaming chat completion provider.
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn stream_chat(&self, system_prompt: &str, messages: &[Message]) -> Result<TextStream>;
}

pub(crate) fn coalesce_error(status: reqwest::StatusCode, body: &str, provider: &str) -> RelayError {
    let parsed = serde_json::from_str::<OpenAiErrorEnvelope>(body).ok();
    let code = parsed.as_ref().and_then(|envelope| envelope.error.code.clone());
    let detail = parsed
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|| body.to_string());
    let message = if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        format!("rate limit exceeded: {detail}")
    } else {
        detail
    };
    RelayError::Upstream {
        provider: provider.to_string(),
        status: status.as_u16(),
        code,
        message,
    }
}

pub(crate) fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|err| RelayError::Config(format!("http client error: {err}")))
}

#[derive(Clone)]
pub struct OpenAIClient {
    http: reqwest::Client,
    model: String,
    api_key: String,
    base_url: String,
    organization: Option<String>,
}

impl OpenAIClient {
    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let api_key = cfg.api_key.clone().ok_or_else(|| {
            RelayError::Config("missing OpenAI API key in model config".into())
        })?;
        Ok(Self {
            http: http_client(cfg.request_timeout_secs)?,
            model: cfg.model.clone(),
            api_key,
            base_url: cfg
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            organization: cfg.organization.clone(),
        })
    }

    fn to_openai_messages(&self, system_prompt: &str, messages: &[Message]) -> Vec<OpenAiMessage> {
        let mut built = Vec::with_capacity(messages.len() + 1);
        built.push(OpenAiMessage {
            role: "system".to_string(),
            content: system_prompt.to_string(),
        });
        built.extend(messages.iter().map(|message| OpenAiMessage {
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
        }));
        built
    }
}

#[async_trait]
impl ChatModel for OpenAIClient {
    async fn stream_chat(&self, system_prompt: &str, messages: &[Message]) -> Result<TextStream> {
        let payload = json!({
            "model": self.model,
            "messages": self.to_openai_messages(system_prompt, messages),
            "stream": true,
        });

        let mut builder = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            );
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        let resp = builder
            .json(&payload)
            .send()
            .await
            .map_err(|err| RelayError::LanguageModel(format!("OpenAI request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "openai"));
        }

        tracing::debug!(model = %self.model, "chat completion stream opened");
        Ok(fragment_stream(
            resp.bytes_stream()
                .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
                .boxed(),
        ))
    }
}

struct StreamState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

fn fragment_stream(body: BoxStream<'static, reqwest::Result<Vec<u8>>>) -> TextStream {
    let state = StreamState {
        body,
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.body.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(&chunk);
                    state.absorb(events);
                }
                Some(Err(err)) => {
                    state.finished = true;
                    state.pending.push_back(Err(RelayError::LanguageModel(format!(
                        "OpenAI stream error: {err}"
                    ))));
                }
                None => {
                    let events = state.decoder.finish();
                    state.absorb(events);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

impl StreamState {
    fn absorb(&mut self, events: Vec<String>) {
        for data in events {
            if self.finished {
                return;
            }
            if data == "[DONE]" {
                self.finished = true;
                return;
            }
            match serde_json::from_str::<OpenAiStreamChunk>(&data) {
                Ok(parsed) => {
                    for choice in parsed.choices {
                        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                            self.pending.push_back(Ok(content));
                        }
                    }
                }
                Err(err) => {
                    self.finished = true;
                    self.pending.push_back(Err(RelayError::LanguageModel(format!(
                        "OpenAI stream parse error `{data}`: {err}"
                    ))));
                }
            }
        }
    }
}

/// Incremental parser for `data:` lines of a server-sent event body.
/// Lines may be split across network chunks.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    // Bytes of `buffer` already known to hold no newline.
    scanned: usize,
}

impl SseDecoder {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut line_start = 0;
        let mut cursor = self.scanned;
        while let Some(offset) = self.buffer[cursor..].iter().position(|b| *b == b'\n') {
            let end = cursor + offset;
            if let Some(data) = Self::data_of(&self.buffer[line_start..=end]) {
                events.push(data);
            }
            line_start = end + 1;
            cursor = line_start;
        }
        self.buffer.drain(..line_start);
        self.scanned = self.buffer.len();
        events
    }

    pub(crate) fn finish(&mut self) -> Vec<String> {
        let line = std::mem::take(&mut self.buffer);
        self.scanned = 0;
        Self::data_of(&line).into_iter().collect()
    }

    fn data_of(line: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim_end_matches(['\r', '\n']);
        let data = text.strip_prefix("data:")?;
        let data = data.trim();
        if data.is_empty() {
            None
        } else {
            Some(data.to_string())
        }
    }
}

/// A deterministic model used for tests and demos. Each call consumes one
/// scripted reply and streams it word by word; once the script is spent the
/// fallback reply, if any, is used.
pub struct StubModel {
    responses: Mutex<VecDeque<String>>,
    fallback: Option<String>,
    received: Mutex<Vec<Vec<Message>>>,
}

impl StubModel {
    pub fn new(responses: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            fallback: None,
            received: Mutex::new(Vec::new()),
        })
    }

    pub fn always(reply: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(VecDeque::new()),
            fallback: Some(reply.into()),
            received: Mutex::new(Vec::new()),
        })
    }

    /// Every message list the model has been called with, oldest first.
    pub fn received(&self) -> Vec<Vec<Message>> {
        self.received.lock().expect("stub model poisoned").clone()
    }
}

#[async_trait]
impl ChatModel for StubModel {
    async fn stream_chat(&self, _system_prompt: &str, messages: &[Message]) -> Result<TextStream> {
        self.received
            .lock()
            .expect("stub model poisoned")
            .push(messages.to_vec());
        let reply = self
            .responses
            .lock()
            .expect("stub model poisoned")
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| {
                RelayError::LanguageModel("StubModel ran out of scripted responses".into())
            })?;
        let fragments: Vec<Result<String>> = reply
            .split_inclusive(' ')
            .map(|piece| Ok(piece.to_string()))
            .collect();
        Ok(stream::iter(fragments).boxed())
    }
}

/// Builds the chat backend named by `model.provider`.
pub fn chat_model_from_config(cfg: &ModelConfig) -> Result<Arc<dyn ChatModel>> {
    let model: Arc<dyn ChatModel> = match cfg.provider.as_str() {
        "openai" => Arc::new(OpenAIClient::from_config(cfg)?),
        "stub" => StubModel::always("Hi, I'm Pizza AI! What can I get started for you today?"),
        other => {
            return Err(RelayError::Config(format!(
                "unknown model provider `{other}`"
            )))
        }
    };
    Ok(model)
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    choices: Vec<OpenAiDeltaChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDeltaChoice {
    delta: OpenAiDelta,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiErrorEnvelope {
    pub(crate) error: OpenAiErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OpenAiErrorBody {
    pub(crate) message: String,
    #[serde(default)]
    pub(crate) code: Option<String>,
}
