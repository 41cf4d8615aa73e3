//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment variables (`HOST`, `PORT`, `OPENAI_API_KEY`)
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_AUDIO__FRAME_SIZE`, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)
//!
//! Nested keys are separated by a double underscore so that field names
//! containing a single underscore (`frame_size`, `api_key`) stay intact.

use crate::audio::accumulator::{DEFAULT_FRAME_SIZE, MAX_FRAME_SIZE};
use crate::audio::registry::{self, PCM_FRAME_ACCUMULATOR};
use crate::error::AppResult;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// ## Rust Concepts:
/// - **#[derive(...)]**: Automatically implements common traits:
///   - `Debug`: Allows printing with {:?} for debugging
///   - `Clone`: Allows making copies of the struct
///   - `Serialize` / `Deserialize`: Converts to and from TOML, JSON, etc.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub judge: JudgeConfig,
    pub database: DatabaseConfig,
    pub performance: PerformanceConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Audio capture settings used for every new WebSocket session.
///
/// ## Fields:
/// - `frame_size`: Samples per emitted PCM frame (4096 ≈ 85ms at 48kHz)
/// - `processor`: Registered processor name instantiated per connection
/// - `channel_capacity`: Frames that may wait for the socket before new ones are dropped
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub frame_size: usize,
    pub processor: String,
    pub channel_capacity: usize,
}

/// Upper bound for `audio.channel_capacity`.
pub const MAX_CHANNEL_CAPACITY: usize = 1024;

/// Upstream language model used by the judging endpoint.
///
/// ## Fields:
/// - `api_base_url`: OpenAI-compatible base URL (without `/chat/completions`)
/// - `model`: Model identifier sent with every request
/// - `api_key`: Bearer token; usually supplied through `OPENAI_API_KEY`
/// - `timeout_secs`: Request timeout before the cat "falls asleep"
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeConfig {
    pub api_base_url: String,
    pub model: String,
    pub api_key: String,
    pub timeout_secs: u64,
}

/// Location of the pre-generated game content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path, or `:memory:`
    pub path: String,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig {
                frame_size: DEFAULT_FRAME_SIZE,
                processor: PCM_FRAME_ACCUMULATOR.to_string(),
                channel_capacity: 32,
            },
            judge: JudgeConfig {
                api_base_url: "https://api.openai.com/v1".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key: String::new(),
                timeout_secs: 20,
            },
            database: DatabaseConfig {
                path: "learncat.db".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 50,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__HOST=0.0.0.0`: Override server host
    /// - `APP_AUDIO__FRAME_SIZE=2048`: Override frame size
    /// - `APP_JUDGE__MODEL=gpt-4o`: Override the judging model
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    /// - `OPENAI_API_KEY=sk-...`: Judge API key
    ///
    /// Source and deserialization failures surface as `AppError::ConfigError`.
    pub fn load() -> AppResult<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(api_key) = env::var("OPENAI_API_KEY") {
            settings = settings.set_override("judge.api_key", api_key)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.frame_size == 0 || self.audio.frame_size > MAX_FRAME_SIZE {
            return Err(anyhow::anyhow!(
                "Audio frame size must be between 1 and {}",
                MAX_FRAME_SIZE
            ));
        }

        if self.audio.channel_capacity == 0 || self.audio.channel_capacity > MAX_CHANNEL_CAPACITY {
            return Err(anyhow::anyhow!(
                "Audio channel capacity must be between 1 and {}",
                MAX_CHANNEL_CAPACITY
            ));
        }

        if !registry::is_registered(&self.audio.processor) {
            return Err(anyhow::anyhow!(
                "Unknown audio processor '{}'",
                self.audio.processor
            ));
        }

        if self.judge.timeout_secs == 0 {
            return Err(anyhow::anyhow!("Judge timeout must be greater than 0"));
        }

        if self.judge.api_base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("Judge API base URL cannot be empty"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!("Max concurrent sessions must be greater than 0"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// Only the fields present in the JSON are changed, e.g.
    /// `{"audio": {"frame_size": 2048}}` changes nothing else. Server address
    /// and database path are fixed at startup and ignored here. The updated
    /// configuration is validated before returning.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(audio) = partial_config.get("audio") {
            if let Some(frame_size) = audio.get("frame_size").and_then(|v| v.as_u64()) {
                self.audio.frame_size = frame_size as usize;
            }
            if let Some(processor) = audio.get("processor").and_then(|v| v.as_str()) {
                self.audio.processor = processor.to_string();
            }
            if let Some(capacity) = audio.get("channel_capacity").and_then(|v| v.as_u64()) {
                self.audio.channel_capacity = capacity as usize;
            }
        }

        if let Some(judge) = partial_config.get("judge") {
            if let Some(model) = judge.get("model").and_then(|v| v.as_str()) {
                self.judge.model = model.to_string();
            }
            if let Some(timeout) = judge.get("timeout_secs").and_then(|v| v.as_u64()) {
                self.judge.timeout_secs = timeout;
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.frame_size, 4096);
        assert_eq!(config.audio.processor, PCM_FRAME_ACCUMULATOR);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.frame_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.processor = "echo".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.frame_size = MAX_FRAME_SIZE;
        assert!(config.validate().is_ok());
        config.audio.frame_size = MAX_FRAME_SIZE + 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.channel_capacity = MAX_CHANNEL_CAPACITY + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"audio": {"frame_size": 2048}, "judge": {"model": "gpt-4o"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.audio.frame_size, 2048);
        assert_eq!(config.judge.model, "gpt-4o");
        assert_eq!(config.audio.channel_capacity, 32);
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_config_update_rejects_invalid_values() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"audio": {"frame_size": 0}}"#).is_err());
        assert!(config
            .update_from_json(r#"{"audio": {"frame_size": 18446744073709551615}}"#)
            .is_err());
        assert!(config
            .update_from_json(r#"{"audio": {"channel_capacity": 18446744073709551615}}"#)
            .is_err());
        assert!(config.update_from_json("not json").is_err());
    }

    #[test]
    fn test_load_reports_config_error() {
        std::env::set_var("APP_AUDIO__FRAME_SIZE", "lots");
        let result = AppConfig::load();
        std::env::remove_var("APP_AUDIO__FRAME_SIZE");

        assert!(matches!(result, Err(crate::error::AppError::ConfigError(_))));
    }
}
