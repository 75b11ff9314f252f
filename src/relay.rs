use std::sync::Arc;

use serde_json::json;
use tracing::info;

use crate::config::ModelConfig;
use crate::error::{RelayError, Result};
use crate::llm::{chat_model_from_config, ChatModel, TextStream};
use crate::message::{Message, Role};
use crate::prompt::PIZZA_SYSTEM_PROMPT;
use crate::telemetry::TelemetryCollector;

/// Forwards a conversation, prefixed with the system prompt, to the chat
/// model and hands back its reply as a fragment stream.
pub struct ConversationRelay {
    model: Arc<dyn ChatModel>,
    system_prompt: String,
    telemetry: Option<TelemetryCollector>,
}

impl ConversationRelay {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self {
            model,
            system_prompt: PIZZA_SYSTEM_PROMPT.to_string(),
            telemetry: None,
        }
    }

    pub fn from_config(cfg: &ModelConfig) -> Result<Self> {
        let relay = Self::new(chat_model_from_config(cfg)?);
        Ok(match &cfg.system_prompt {
            Some(prompt) => relay.with_system_prompt(prompt.clone()),
            None => relay,
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_telemetry(mut self, telemetry: TelemetryCollector) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub async fn continue_conversation(&self, messages: &[Message]) -> Result<TextStream> {
        match messages.last() {
            None => {
                return Err(RelayError::InvalidConversation(
                    "conversation has no messages".into(),
                ))
            }
            Some(last) if last.role != Role::User => {
                return Err(RelayError::InvalidConversation(
                    "conversation must end with a user message".into(),
                ))
            }
            Some(_) => {}
        }

        info!(messages = messages.len(), "relaying conversation");
        if let Some(t) = &self.telemetry {
            t.record("chat_started", json!({ "messages": messages.len() }));
        }

        match self.model.stream_chat(&self.system_prompt, messages).await {
            Ok(stream) => Ok(stream),
            Err(err) => {
                if let Some(t) = &self.telemetry {
                    t.record_failure("chat", err.to_string());
                }
                Err(err)
            }
        }
    }
}
