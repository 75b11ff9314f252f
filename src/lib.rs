//! Streaming relay behind the Pizza AI ordering assistant.
//!
//! The crate provides:
//! - A conversation relay (`ConversationRelay`) that prefixes the chat
//!   history with the Pizza AI system prompt and streams the model's reply.
//! - A transcription relay (`TranscriptionRelay`) that turns an uploaded
//!   recording into text through a speech-to-text backend.
//! - Client-side state (`ChatSession`, `RecordingSession`) and, with the
//!   `server` feature, an axum server serving the chat page.

mod audio;
mod config;
mod error;
mod llm;
mod message;
mod prompt;
mod relay;
#[cfg(feature = "server")]
mod server;
mod session;
mod telemetry;
mod transcribe;

pub use audio::{decode_audio_payload, AudioBlob, RecordingSession, DEFAULT_AUDIO_MIME};
pub use config::{AppConfig, ModelConfig, ServerConfig, TelemetryConfig, TranscriptionConfig};
pub use error::{RelayError, Result};
pub use llm::{chat_model_from_config, ChatModel, OpenAIClient, StubModel, TextStream};
pub use message::{Message, Role};
pub use prompt::PIZZA_SYSTEM_PROMPT;
pub use relay::ConversationRelay;
#[cfg(feature = "server")]
pub use server::RelayServer;
pub use session::ChatSession;
pub use telemetry::{init_tracing, FailureRecord, TelemetryCollector, TelemetryEvent};
pub use transcribe::{
    failure_message, transcriber_from_config, ObservedUpload, SpeechToText, StubTranscriber,
    TranscriptionRelay, TranscriptionReply, WhisperClient, AUDIO_TOO_SHORT_MESSAGE,
    EMPTY_AUDIO_MESSAGE, UNKNOWN_ERROR_MESSAGE,
};
