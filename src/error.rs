use thiserror::Error;

pub type Result<T> = std::result::Result<T, RelayError>;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{provider} request failed with {status}: {message}")]
    Upstream {
        provider: String,
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("language model error: {0}")]
    LanguageModel(String),

    #[error("transcription error: {0}")]
    Transcription(String),

    #[error("invalid conversation: {0}")]
    InvalidConversation(String),

    #[error("invalid audio payload: {0}")]
    InvalidAudio(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl RelayError {
    /// Machine-readable error code reported by the upstream API, if any.
    pub fn upstream_code(&self) -> Option<&str> {
        match self {
            RelayError::Upstream { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_upstream_code() {
        let err = RelayError::Upstream {
            provider: "openai".into(),
            status: 400,
            code: Some("audio_too_short".into()),
            message: "Audio file is too short".into(),
        };
        assert_eq!(err.upstream_code(), Some("audio_too_short"));
        assert_eq!(
            err.to_string(),
            "openai request failed with 400: Audio file is too short"
        );
        assert_eq!(RelayError::Config("x".into()).upstream_code(), None);
    }
}
