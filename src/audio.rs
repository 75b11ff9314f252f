//! Audio capture buffers and the base64 payload format exchanged with the UI.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use crate::error::{RelayError, Result};

pub const DEFAULT_AUDIO_MIME: &str = "audio/wav";

// Decoding accepts padded and unpadded input alike.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// One finished recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlob {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl AudioBlob {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

/// Chunk buffer for a hold-to-talk recording. Chunks are reset on every
/// `start` and consumed into one blob on `stop`.
#[derive(Debug, Clone)]
pub struct RecordingSession {
    mime_type: String,
    chunks: Vec<Vec<u8>>,
    recording: bool,
}

impl Default for RecordingSession {
    fn default() -> Self {
        Self::new(DEFAULT_AUDIO_MIME)
    }
}

impl RecordingSession {
    pub fn new(mime_type: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            chunks: Vec::new(),
            recording: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn start(&mut self) {
        self.chunks.clear();
        self.recording = true;
    }

    /// Returns false when the chunk was dropped because no recording is active.
    pub fn push_chunk(&mut self, chunk: impl Into<Vec<u8>>) -> bool {
        if !self.recording {
            return false;
        }
        self.chunks.push(chunk.into());
        true
    }

    pub fn stop(&mut self) -> Option<AudioBlob> {
        if !self.recording {
            return None;
        }
        self.recording = false;
        let bytes = std::mem::take(&mut self.chunks).concat();
        Some(AudioBlob::new(self.mime_type.clone(), bytes))
    }
}

/// Decodes either raw base64 or a `data:<mime>;base64,<payload>` URL.
/// Padding is optional and embedded whitespace such as line wrapping is
/// skipped.
pub fn decode_audio_payload(payload: &str) -> Result<Vec<u8>> {
    let trimmed = payload.trim();
    let encoded = match trimmed.strip_prefix("data:") {
        Some(rest) => {
            let (header, body) = rest
                .split_once(',')
                .ok_or_else(|| RelayError::InvalidAudio("data URL without payload".into()))?;
            if !header.ends_with(";base64") {
                return Err(RelayError::InvalidAudio(format!(
                    "data URL is not base64 encoded: {header}"
                )));
            }
            body
        }
        None => trimmed,
    };
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    LENIENT
        .decode(compact)
        .map_err(|err| RelayError::InvalidAudio(err.to_string()))
}
