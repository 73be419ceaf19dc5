//! Configuration for the voice session and its providers.
//!
//! Layered: JSON file (optional) → environment → CLI flags. Every section is
//! `#[serde(default)]`, so a partial file only overrides what it names.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use voxlink_core::types::ReplayPolicy;

pub const ENV_SPEECH_KEY: &str = "VOXLINK_SPEECH_KEY";
pub const ENV_SPEECH_REGION: &str = "VOXLINK_SPEECH_REGION";
pub const ENV_DIRECTLINE_SECRET: &str = "VOXLINK_DIRECTLINE_SECRET";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing {0}")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub speech: SpeechConfig,
    pub backend: BackendConfig,
    pub session: SessionConfig,
    pub server: ServerConfig,
}

/// Azure Speech settings shared by recognition and synthesis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub region: String,
    pub key: Option<String>,
    pub recognition_language: String,
    pub synthesis_language: String,
    pub voice: String,
    /// Must be a `riff-*` format; playback decodes WAV only.
    pub output_format: String,
    /// Overrides the region-derived recognition URL.
    pub stt_endpoint: Option<String>,
    /// Overrides the region-derived synthesis URL.
    pub tts_endpoint: Option<String>,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            region: "eastus".to_string(),
            key: None,
            recognition_language: "de-DE".to_string(),
            synthesis_language: "de-DE".to_string(),
            voice: "de-DE-KatjaNeural".to_string(),
            output_format: "riff-16khz-16bit-mono-pcm".to_string(),
            stt_endpoint: None,
            tts_endpoint: None,
        }
    }
}

impl SpeechConfig {
    pub fn stt_url(&self) -> String {
        self.stt_endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://{}.stt.speech.microsoft.com/speech/recognition/conversation/cognitiveservices/v1",
                self.region
            )
        })
    }

    pub fn tts_url(&self) -> String {
        self.tts_endpoint.clone().unwrap_or_else(|| {
            format!(
                "https://{}.tts.speech.microsoft.com/cognitiveservices/v1",
                self.region
            )
        })
    }
}

/// Bot Framework Direct Line settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub directline_url: String,
    pub secret: Option<String>,
    pub user_id: String,
    pub poll_interval_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            directline_url: "https://directline.botframework.com/v3/directline".to_string(),
            secret: None,
            user_id: "voxlink-user".to_string(),
            poll_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub replay_policy: ReplayPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2003,
        }
    }
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl VoiceConfig {
    /// Load from `path`, or defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let Some(path) = path else {
            info!("no config file given, using defaults");
            return Ok(Self::default());
        };
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&contents)?;
        info!("config loaded from {}", path.display());
        Ok(config)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Apply environment overrides. `lookup` is `std::env::var(..).ok()` in
    /// production; tests pass a map.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(key) = non_empty(ENV_SPEECH_KEY) {
            self.speech.key = Some(key);
        }
        if let Some(region) = non_empty(ENV_SPEECH_REGION) {
            self.speech.region = region;
        }
        if let Some(secret) = non_empty(ENV_DIRECTLINE_SECRET) {
            self.backend.secret = Some(secret);
        }
    }

    /// Check what the speech providers need. A missing Direct Line secret is
    /// not an error here: the session runs without a conversation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.speech.key.as_deref().is_none_or(str::is_empty) {
            return Err(ConfigError::Missing("speech key (VOXLINK_SPEECH_KEY)"));
        }
        if self.speech.region.trim().is_empty() {
            return Err(ConfigError::Missing("speech region"));
        }
        if !self.speech.output_format.starts_with("riff-") {
            return Err(ConfigError::Missing("riff-* speech output format"));
        }
        Ok(())
    }
}
