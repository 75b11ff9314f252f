use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RelayError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".into()
}

fn default_port() -> u16 {
    3000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Replaces the built-in Pizza AI prompt when set.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_chat_model(),
            api_key: None,
            base_url: None,
            organization: None,
            request_timeout_secs: default_request_timeout(),
            system_prompt: None,
        }
    }
}

fn default_provider() -> String {
    "openai".into()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".into()
}

fn default_request_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptionConfig {
    #[serde(default = "default_transcription_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: default_transcription_model(),
            language: default_language(),
            temperature: 0.0,
            temp_dir: None,
        }
    }
}

impl TranscriptionConfig {
    pub fn resolved_temp_dir(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(env::temp_dir)
    }
}

fn default_transcription_model() -> String {
    "whisper-1".into()
}

fn default_language() -> String {
    "en".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            json_logs: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".into()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        let cfg: Self = toml::from_str(&raw)
            .map_err(|err| RelayError::Config(format!("Failed to parse configuration: {err}")))?;
        Ok(cfg)
    }

    /// Loads `path` when it exists (defaults otherwise) and applies
    /// environment overrides on top.
    pub fn from_env_or_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut cfg = if path.exists() {
            Self::from_file(path)?
        } else {
            Self::default()
        };
        cfg.apply_overrides(|key| env::var(key).ok());
        Ok(cfg)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("PIZZA_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PIZZA_PORT") {
            if let Ok(parsed) = port.parse::<u16>() {
                self.server.port = parsed;
            }
        }
        if let Some(provider) = lookup("PIZZA_PROVIDER") {
            self.model.provider = provider.to_ascii_lowercase();
        }
        if let Some(model) = lookup("PIZZA_MODEL") {
            self.model.model = model;
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.model.api_key = Some(key);
        }
        if let Some(base_url) = lookup("PIZZA_OPENAI_BASE_URL") {
            self.model.base_url = Some(base_url);
        }
        if let Some(org) = lookup("PIZZA_OPENAI_ORG") {
            self.model.organization = Some(org);
        }
        if let Some(model) = lookup("PIZZA_TRANSCRIPTION_MODEL") {
            self.transcription.model = model;
        }
        if let Some(language) = lookup("PIZZA_TRANSCRIPTION_LANGUAGE") {
            self.transcription.language = language;
        }
        if let Some(dir) = lookup("PIZZA_TEMP_DIR") {
            self.transcription.temp_dir = Some(PathBuf::from(dir));
        }
        if let Some(filter) = lookup("PIZZA_LOG") {
            self.telemetry.log_filter = filter;
        }
        if let Some(json) = lookup("PIZZA_LOG_JSON") {
            if let Ok(parsed) = json.parse::<bool>() {
                self.telemetry.json_logs = parsed;
            }
        }
    }

    pub fn listen_addr(&self) -> Result<std::net::SocketAddr> {
        format!("{}:{}", self.server.host, self.server.port)
            .parse()
            .map_err(|err| RelayError::Config(format!("invalid listen address: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_and_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[server]\nhost='0.0.0.0'\nport=9000\n[model]\nprovider='stub'\n[transcription]\nlanguage='fr'"
        )
        .unwrap();

        let mut cfg = AppConfig::from_file(file.path()).unwrap();
        let vars: HashMap<&str, &str> = [
            ("PIZZA_PORT", "9100"),
            ("OPENAI_API_KEY", "sk-test"),
            ("PIZZA_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();
        cfg.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(cfg.server.port, 9100);
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.model.provider, "stub");
        assert_eq!(cfg.model.model, "gpt-4o-mini");
        assert_eq!(cfg.model.api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.transcription.language, "fr");
        assert_eq!(cfg.transcription.model, "whisper-1");
        assert!(cfg.telemetry.json_logs);
    }

    #[test]
    fn ignores_malformed_overrides() {
        let mut cfg = AppConfig::default();
        cfg.apply_overrides(|key| match key {
            "PIZZA_PORT" => Some("not-a-port".into()),
            "PIZZA_LOG_JSON" => Some("maybe".into()),
            _ => None,
        });
        assert_eq!(cfg.server.port, 3000);
        assert!(!cfg.telemetry.json_logs);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppConfig::from_env_or_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.transcription.temperature, 0.0);
        assert_eq!(cfg.model.request_timeout_secs, 30);
    }

    #[test]
    fn rejects_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server\nport=").unwrap();
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }
}
