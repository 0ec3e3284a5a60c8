//! Configuration management
//!
//! Server, upstream-service and pipeline settings loaded from a TOML file
//! with environment-variable overrides for secrets and endpoints.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP/WebSocket listener settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream speech recognizer
    #[serde(default)]
    pub asr: AsrConfig,
    /// Upstream speech synthesizer
    #[serde(default)]
    pub tts: TtsConfig,
    /// Upstream chat model
    #[serde(default)]
    pub llm: LlmConfig,
    /// Object storage for recorded segments
    #[serde(default)]
    pub storage: StorageConfig,
    /// Per-session pipeline tunables
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsrConfig {
    /// Streaming recognizer WebSocket endpoint
    #[serde(default = "default_asr_ws_url")]
    pub ws_url: String,
    /// One-shot recognizer HTTP endpoint (VAD-batch path)
    #[serde(default = "default_asr_http_url")]
    pub http_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_asr_model")]
    pub model: String,
}

fn default_asr_ws_url() -> String {
    "wss://openai.qiniu.com/v1/voice/asr".to_string()
}

fn default_asr_http_url() -> String {
    "https://openai.qiniu.com/v1/voice/asr".to_string()
}

fn default_asr_model() -> String {
    "asr".to_string()
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            ws_url: default_asr_ws_url(),
            http_url: default_asr_http_url(),
            api_key: String::new(),
            model: default_asr_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TtsConfig {
    /// Streaming synthesizer WebSocket endpoint
    #[serde(default = "default_tts_ws_url")]
    pub ws_url: String,
    #[serde(default)]
    pub api_key: String,
    /// Voice used when the role does not carry one
    #[serde(default = "default_voice_type")]
    pub voice_type: String,
    #[serde(default = "default_speed_ratio")]
    pub speed_ratio: f64,
}

fn default_tts_ws_url() -> String {
    "wss://openai.qiniu.com/v1/voice/tts".to_string()
}

fn default_voice_type() -> String {
    "qiniu_zh_female_wwxkjx".to_string()
}

fn default_speed_ratio() -> f64 {
    1.0
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            ws_url: default_tts_ws_url(),
            api_key: String::new(),
            voice_type: default_voice_type(),
            speed_ratio: default_speed_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// OpenAI-compatible base URL (chat/completions is appended)
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_llm_base_url() -> String {
    "https://openai.qiniu.com/v1".to_string()
}

fn default_llm_model() -> String {
    "deepseek-v3".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            api_key: String::new(),
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Public endpoint used to build segment URLs
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

fn default_bucket() -> String {
    "voice-segments".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { endpoint: String::new(), bucket: default_bucket() }
    }
}

/// Which ingestion loop a session runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Continuous streaming ASR with debounced finalization
    Streaming,
    /// VAD segmentation with record, upload and batch transcription
    Vad,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_mode")]
    pub mode: IngestMode,
    /// Inactivity interval before a partial is promoted to final (ms).
    /// Deployments that gate the streaming recognizer behind client-side
    /// voice detection usually raise this to 500.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Trailing silent frames before a segment is cut (50 frames = 1 s)
    #[serde(default = "default_silence_cut_frames")]
    pub silence_cut_frames: u32,
    /// Voice detector aggressiveness, 0-3
    #[serde(default = "default_vad_aggressiveness")]
    pub vad_aggressiveness: u8,
    /// Bound on the lossy inbound audio channel
    #[serde(default = "default_audio_channel_capacity")]
    pub audio_channel_capacity: usize,
    /// Identity defaults when the upgrade carries no query parameters
    #[serde(default = "default_user_id")]
    pub default_user_id: String,
    #[serde(default = "default_role_id")]
    pub default_role_id: i64,
}

fn default_mode() -> IngestMode {
    IngestMode::Streaming
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_silence_cut_frames() -> u32 {
    50
}

fn default_vad_aggressiveness() -> u8 {
    3
}

fn default_audio_channel_capacity() -> usize {
    200
}

fn default_user_id() -> String {
    "anonymous".to_string()
}

fn default_role_id() -> i64 {
    1
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            debounce_ms: default_debounce_ms(),
            silence_cut_frames: default_silence_cut_frames(),
            vad_aggressiveness: default_vad_aggressiveness(),
            audio_channel_capacity: default_audio_channel_capacity(),
            default_user_id: default_user_id(),
            default_role_id: default_role_id(),
        }
    }
}

impl Config {
    /// Load configuration: TOML file if present, then env overrides
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let contents = std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read config file {}", p.display()))?;
                toml::from_str(&contents).context("Failed to parse config file")?
            }
            None => {
                let default_path = Path::new("voice-roleplay.toml");
                if default_path.exists() {
                    let contents = std::fs::read_to_string(default_path)
                        .context("Failed to read voice-roleplay.toml")?;
                    toml::from_str(&contents).context("Failed to parse voice-roleplay.toml")?
                } else {
                    Config::default()
                }
            }
        };
        config.apply_env();
        Ok(config)
    }

    /// Environment overrides; one API key serves all upstreams unless
    /// a service-specific key is set in the file
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("VOICE_API_KEY") {
            if self.asr.api_key.is_empty() {
                self.asr.api_key = key.clone();
            }
            if self.tts.api_key.is_empty() {
                self.tts.api_key = key.clone();
            }
            if self.llm.api_key.is_empty() {
                self.llm.api_key = key;
            }
        }
        if let Ok(url) = std::env::var("VOICE_ASR_WS_URL") {
            self.asr.ws_url = url;
        }
        if let Ok(url) = std::env::var("VOICE_ASR_HTTP_URL") {
            self.asr.http_url = url;
        }
        if let Ok(url) = std::env::var("VOICE_TTS_WS_URL") {
            self.tts.ws_url = url;
        }
        if let Ok(url) = std::env::var("VOICE_LLM_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Ok(endpoint) = std::env::var("VOICE_OSS_ENDPOINT") {
            self.storage.endpoint = endpoint;
        }
        if let Ok(bucket) = std::env::var("VOICE_OSS_BUCKET") {
            self.storage.bucket = bucket;
        }
        if let Ok(port) = std::env::var("VOICE_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
    }

    /// Dump the effective configuration as TOML (keys redacted)
    pub fn to_display_toml(&self) -> String {
        let mut shown = self.clone();
        for key in [&mut shown.asr.api_key, &mut shown.tts.api_key, &mut shown.llm.api_key] {
            if !key.is_empty() {
                *key = "<redacted>".to_string();
            }
        }
        toml::to_string_pretty(&shown).unwrap_or_else(|_| "# unrenderable\n".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.pipeline.mode, IngestMode::Streaming);
        assert_eq!(config.pipeline.debounce_ms, 200);
        assert_eq!(config.pipeline.silence_cut_frames, 50);
        assert_eq!(config.pipeline.audio_channel_capacity, 200);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            mode = "vad"
            silence_cut_frames = 25
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.mode, IngestMode::Vad);
        assert_eq!(config.pipeline.silence_cut_frames, 25);
        // untouched sections keep their defaults
        assert_eq!(config.tts.speed_ratio, 1.0);
    }

    #[test]
    fn test_load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voice-roleplay.toml");
        std::fs::write(&path, "[server]\nport = 9999\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.server.port, 9999);
    }

    #[test]
    fn test_load_rejects_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "server = \"not a table\"").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_redacted_display() {
        let mut config = Config::default();
        config.llm.api_key = "sk-secret".to_string();
        let shown = config.to_display_toml();
        assert!(!shown.contains("sk-secret"));
        assert!(shown.contains("<redacted>"));
    }
}
