//! Speech-to-text backends and the relay that turns an uploaded recording
//! into text for the chat.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::audio::decode_audio_payload;
use crate::config::{ModelConfig, TranscriptionConfig};
use crate::error::{RelayError, Result};
use crate::llm::{coalesce_error, http_client};
use crate::telemetry::TelemetryCollector;

pub const EMPTY_AUDIO_MESSAGE: &str = "The audio provided was empty. Please try again";
pub const AUDIO_TOO_SHORT_MESSAGE: &str =
    "The audio is too short. minimum audio length should be at least 0.1 seconds";
pub const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error";

const AUDIO_TOO_SHORT_CODE: &str = "audio_too_short";

/// Body returned to the UI for every transcription request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionReply {
    pub text: String,
}

impl TranscriptionReply {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// True when the text is one of the fixed placeholder messages rather
    /// than something the user said.
    pub fn is_fallback(&self) -> bool {
        [EMPTY_AUDIO_MESSAGE, AUDIO_TOO_SHORT_MESSAGE, UNKNOWN_ERROR_MESSAGE].contains(&self.text.as_str())
    }
}

#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe_file(&self, path: &Path) -> Result<String>;
}

#[derive(Clone)]
pub struct WhisperClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    organization: Option<String>,
    model: String,
    language: String,
    temperature: f32,
}

impl WhisperClient {
    pub fn from_config(model: &ModelConfig, cfg: &TranscriptionConfig) -> Result<Self> {
        let api_key = model.api_key.clone().ok_or_else(|| {
            RelayError::Config("missing OpenAI API key in model config".into())
        })?;
        Ok(Self {
            http: http_client(model.request_timeout_secs)?,
            api_key,
            base_url: model
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            organization: model.organization.clone(),
            model: cfg.model.clone(),
            language: cfg.language.clone(),
            temperature: cfg.temperature,
        })
    }
}

#[async_trait]
impl SpeechToText for WhisperClient {
    async fn transcribe_file(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input.wav".to_string());
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/wav")
            .map_err(|err| RelayError::Transcription(format!("invalid mime type: {err}")))?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("temperature", self.temperature.to_string());

        let mut builder = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            );
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        let resp = builder
            .multipart(form)
            .send()
            .await
            .map_err(|err| RelayError::Transcription(format!("OpenAI request error: {err}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(coalesce_error(status, &body, "openai"));
        }

        let body: WhisperResponse = resp.json().await.map_err(|err| {
            RelayError::Transcription(format!("OpenAI response parse error: {err}"))
        })?;
        Ok(body.text)
    }
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
}

/// What a `StubTranscriber` saw when it was called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedUpload {
    pub path: PathBuf,
    pub existed: bool,
    pub bytes: Vec<u8>,
}

/// Scripted speech-to-text backend for tests and demos.
pub struct StubTranscriber {
    outcomes: Mutex<VecDeque<Result<String>>>,
    fallback: Option<String>,
    observed: Mutex<Vec<ObservedUpload>>,
}

impl StubTranscriber {
    pub fn new(outcomes: Vec<Result<String>>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(outcomes.into()),
            fallback: None,
            observed: Mutex::new(Vec::new()),
        })
    }

    pub fn always(text: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            outcomes: Mutex::new(VecDeque::new()),
            fallback: Some(text.into()),
            observed: Mutex::new(Vec::new()),
        })
    }

    pub fn observed(&self) -> Vec<ObservedUpload> {
        self.observed.lock().expect("stub transcriber poisoned").clone()
    }
}

#[async_trait]
impl SpeechToText for StubTranscriber {
    async fn transcribe_file(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await.unwrap_or_default();
        self.observed
            .lock()
            .expect("stub transcriber poisoned")
            .push(ObservedUpload {
                path: path.to_path_buf(),
                existed: path.exists(),
                bytes,
            });
        let next = self
            .outcomes
            .lock()
            .expect("stub transcriber poisoned")
            .pop_front();
        match next {
            Some(outcome) => outcome,
            None => self.fallback.clone().ok_or_else(|| {
                RelayError::Transcription("StubTranscriber ran out of scripted outcomes".into())
            }),
        }
    }
}

/// Builds the speech-to-text backend named by `model.provider`.
pub fn transcriber_from_config(
    model: &ModelConfig,
    cfg: &TranscriptionConfig,
) -> Result<Arc<dyn SpeechToText>> {
    let backend: Arc<dyn SpeechToText> = match model.provider.as_str() {
        "openai" => Arc::new(WhisperClient::from_config(model, cfg)?),
        "stub" => StubTranscriber::always("I'd like a large pepperoni pizza"),
        other => {
            return Err(RelayError::Config(format!(
                "unknown model provider `{other}`"
            )))
        }
    };
    Ok(backend)
}

/// Maps a failed transcription to the text shown to the user.
pub fn failure_message(err: &RelayError) -> &'static str {
    match err.upstream_code() {
        Some(AUDIO_TOO_SHORT_CODE) => AUDIO_TOO_SHORT_MESSAGE,
        _ => UNKNOWN_ERROR_MESSAGE,
    }
}

pub struct TranscriptionRelay {
    backend: Arc<dyn SpeechToText>,
    temp_dir: PathBuf,
    telemetry: Option<TelemetryCollector>,
}

impl TranscriptionRelay {
    pub fn new(backend: Arc<dyn SpeechToText>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            temp_dir: temp_dir.into(),
            telemetry: None,
        }
    }

    pub fn from_config(model: &ModelConfig, cfg: &TranscriptionConfig) -> Result<Self> {
        let temp_dir = cfg.resolved_temp_dir();
        std::fs::create_dir_all(&temp_dir)?;
        Ok(Self::new(transcriber_from_config(model, cfg)?, temp_dir))
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Never fails: errors are logged and folded into a user-facing reply.
    pub async fn transcribe(&self, payload: &str) -> TranscriptionReply {
        match self.relay(payload).await {
            // Whisper returns whitespace for silence, which is as empty as "".
            Ok(text) if text.trim().is_empty() => {
                info!("transcription came back empty");
                self.record("transcription_empty");
                TranscriptionReply::new(EMPTY_AUDIO_MESSAGE)
            }
            Ok(text) => {
                self.record("transcription_completed");
                TranscriptionReply::new(text)
            }
            Err(err) => {
                if err.upstream_code() == Some(AUDIO_TOO_SHORT_CODE) {
                    error!(error = %err, "audio file is too short, minimum audio length is 0.1 seconds");
                } else {
                    error!(error = %err, "unknown error transcribing audio");
                }
                if let Some(t) = &self.telemetry {
                    t.record_failure("transcription", err.to_string());
                }
                TranscriptionReply::new(failure_message(&err))
            }
        }
    }

    async fn relay(&self, payload: &str) -> Result<String> {
        let bytes = decode_audio_payload(payload)?;
        // Removed on drop, so every early return and cancellation cleans up.
        let file = tempfile::Builder::new()
            .prefix("pizza-input-")
            .suffix(".wav")
            .tempfile_in(&self.temp_dir)?;
        tokio::fs::write(file.path(), &bytes).await?;

        let outcome = self.backend.transcribe_file(file.path()).await;
        if let Err(err) = file.close() {
            warn!(error = %err, "failed to remove temporary audio file");
        }
        outcome
    }

    fn record(&self, kind: &str) {
        if let Some(t) = &self.telemetry {
            t.record(kind, json!({}));
        }
    }
}
