//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - Built-in defaults (the `Default` impl below)
//! - An optional `config.toml` in the working directory
//! - Environment variables with the `STT__` prefix
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (deployment platforms)
//! 2. Environment variables (`STT__SERVER__PORT`, `STT__MODEL__PATH`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values
//!
//! Nested keys are separated by a double underscore because several field
//! names (`max_frame_size`, `stats_interval`) contain single underscores.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Sample rate the recognizer and the wire protocol are fixed to.
pub const SAMPLE_RATE: u32 = 16_000;

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub websocket: WebSocketConfig,
    pub model: ModelConfig,
    pub session: SessionConfig,
    pub recognizer: RecognizerConfig,
}

/// Where the listener binds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Transport policy applied before frames ever reach a session.
///
/// ## Fields:
/// - `ping_interval_secs`: how often the server pings an idle client
/// - `ping_timeout_secs`: how long past a missed ping the connection is dropped
/// - `max_frame_size`: largest accepted message in bytes; bigger frames are
///   rejected by the codec
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebSocketConfig {
    pub ping_interval_secs: u64,
    pub ping_timeout_secs: u64,
    pub max_frame_size: usize,
}

/// Which Whisper model to load and where from.
///
/// ## Fields:
/// - `size`: "tiny", "base", "small", "medium" or "large"
/// - `path`: optional local directory holding `config.json`,
///   `tokenizer.json` and `model.safetensors`; when unset the model is
///   fetched from the Hugging Face Hub
/// - `language`: ISO 639-1 language hint for decoding
/// - `device`: "auto", "cpu", "cuda" or "metal"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub size: String,
    pub path: Option<PathBuf>,
    pub language: Option<String>,
    pub device: String,
}

/// Per-session behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub sample_rate: u32,
    /// Emit a counters summary every this many frames
    pub stats_interval: u64,
    /// Send `{"error": ...}` to the client before closing on a recognition fault
    pub notify_faults: bool,
}

/// Endpointing and partial-result tuning for the Whisper recognizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    /// RMS level (0.0..1.0) above which a window counts as speech
    pub speech_threshold: f32,
    /// Trailing silence that ends an utterance
    pub endpoint_silence_ms: u32,
    /// Minimum voiced audio for a buffer to count as an utterance
    pub min_speech_ms: u32,
    /// Minimum new audio between two partial decodes
    pub partial_interval_ms: u32,
    /// Utterances are force-ended at this length
    pub max_utterance_secs: u32,
    /// Audio kept from before the first voiced window
    pub preroll_ms: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "localhost".to_string(),
                port: 2700,
            },
            websocket: WebSocketConfig {
                ping_interval_secs: 20,
                ping_timeout_secs: 10,
                max_frame_size: 10 * 1024 * 1024,
            },
            model: ModelConfig {
                size: "tiny".to_string(),
                path: None,
                language: Some("en".to_string()),
                device: "auto".to_string(),
            },
            session: SessionConfig {
                sample_rate: SAMPLE_RATE,
                stats_interval: 100,
                notify_faults: true,
            },
            recognizer: RecognizerConfig::default(),
        }
    }
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            speech_threshold: 0.015,
            endpoint_silence_ms: 700,
            min_speech_ms: 120,
            partial_interval_ms: 1000,
            max_utterance_secs: 25,
            preroll_ms: 300,
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `STT__SERVER__PORT=9000`
    /// - `STT__MODEL__PATH=/models/whisper-tiny.en`
    /// - `STT__WEBSOCKET__MAX_FRAME_SIZE=1048576`
    /// - `PORT=3000`: special case for deployment platforms
    pub fn load() -> Result<Self, config::ConfigError> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("STT").prefix_separator("__").separator("__"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.websocket.ping_interval_secs == 0 {
            return Err(anyhow::anyhow!("WebSocket ping interval must be greater than 0"));
        }

        if self.websocket.max_frame_size == 0 {
            return Err(anyhow::anyhow!("Maximum frame size must be greater than 0"));
        }

        if self.session.sample_rate != SAMPLE_RATE {
            return Err(anyhow::anyhow!(
                "Unsupported sample rate {} (only {} Hz PCM is accepted)",
                self.session.sample_rate,
                SAMPLE_RATE
            ));
        }

        if self.session.stats_interval == 0 {
            return Err(anyhow::anyhow!("Stats interval must be greater than 0"));
        }

        let recognizer = &self.recognizer;
        if !(recognizer.speech_threshold > 0.0 && recognizer.speech_threshold < 1.0) {
            return Err(anyhow::anyhow!("Speech threshold must be within (0, 1)"));
        }

        if recognizer.endpoint_silence_ms == 0 || recognizer.partial_interval_ms == 0 {
            return Err(anyhow::anyhow!(
                "Endpoint silence and partial interval must be greater than 0"
            ));
        }

        if recognizer.max_utterance_secs == 0 || recognizer.max_utterance_secs > 30 {
            return Err(anyhow::anyhow!(
                "Maximum utterance length must be between 1 and 30 seconds"
            ));
        }

        Ok(())
    }

    /// The socket address string the listener binds to.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebSocketConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    /// Silence from the client longer than this drops the connection.
    pub fn client_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs + self.ping_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "localhost");
        assert_eq!(config.server.port, 2700);
        assert_eq!(config.websocket.max_frame_size, 10 * 1024 * 1024);
        assert_eq!(config.session.stats_interval, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.sample_rate = 44_100;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.recognizer.max_utterance_secs = 45;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.session.stats_interval = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keep_alive_durations() {
        let config = AppConfig::default();
        assert_eq!(config.websocket.ping_interval(), Duration::from_secs(20));
        assert_eq!(config.websocket.client_timeout(), Duration::from_secs(30));
        assert_eq!(config.bind_address(), "localhost:2700");
    }
}
