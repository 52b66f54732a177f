//! Configuration for the realtime engine and its CLI.
//!
//! Configuration comes from .env files, environment variables and an optional
//! YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use aime_realtime::config::EngineConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = EngineConfig::from_env()?;
//!
//! // Load from YAML file with environment variable base
//! let config = EngineConfig::from_file(&PathBuf::from("config.yaml"))?;
//! println!("Token service at {}", config.api_base_url);
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

mod env;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::realtime::{
    DEFAULT_API_BASE_URL, DEFAULT_DATA_CHANNEL_LABEL, DEFAULT_INSTRUCTIONS, DEFAULT_TEMPERATURE,
    RealtimeConfig, RealtimeModel, RealtimeVoice, StreamingConfig, TimerConfig,
};
use crate::core::tools::{ToolBackends, ToolCallError};
use crate::utils::UrlValidationError;

/// Default base URL of the putt solver service.
pub const DEFAULT_SOLVER_URL: &str = "http://localhost:8000";

/// Default STUN server.
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Failed to parse YAML config: {0}")]
    Parse(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid URL for {key}: {source}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: UrlValidationError,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Engine configuration
///
/// Contains everything needed to run a session from the CLI:
/// - Service endpoints (token/negotiation service, putt solver)
/// - Model, voice, persona and sampling temperature
/// - ICE servers for the peer connection
/// - Session timers
/// - Tool call timeout
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_base_url: String,
    pub solver_base_url: String,
    pub http_timeout: Duration,

    pub model: RealtimeModel,
    pub voice: RealtimeVoice,
    pub instructions: String,
    pub temperature: f32,
    pub data_channel_label: String,
    pub ice_servers: Vec<String>,

    pub max_session_duration: Duration,
    pub buffer_clear_interval: Duration,
    pub restart_delay: Duration,
    pub response_grace: Duration,

    pub tool_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let timers = TimerConfig::default();
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            solver_base_url: DEFAULT_SOLVER_URL.to_string(),
            http_timeout: Duration::from_secs(15),
            model: RealtimeModel::default(),
            voice: RealtimeVoice::default(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            max_session_duration: timers.max_session_duration,
            buffer_clear_interval: timers.buffer_clear_interval,
            restart_delay: timers.restart_delay,
            response_grace: timers.response_grace,
            tool_timeout: Duration::from_secs(10),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables over defaults.
    ///
    /// The .env file is loaded in main.rs at startup, so its values are
    /// already visible here as environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        env::apply_env(&mut config)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variables as the base.
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;

        let mut config = Self::default();
        env::apply_env(&mut config)?;
        yaml_config.apply(&mut config)?;

        validation::validate(&config)?;
        Ok(config)
    }

    /// Session settings for [`RealtimeSession::spawn`](crate::core::realtime::RealtimeSession::spawn).
    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            api_base_url: self.api_base_url.clone(),
            model: self.model,
            voice: self.voice,
            instructions: self.instructions.clone(),
            temperature: self.temperature,
            data_channel_label: self.data_channel_label.clone(),
            http_timeout: self.http_timeout,
            tool_timeout: self.tool_timeout,
            timers: TimerConfig {
                max_session_duration: self.max_session_duration,
                buffer_clear_interval: self.buffer_clear_interval,
                restart_delay: self.restart_delay,
                response_grace: self.response_grace,
            },
            streaming: StreamingConfig::default(),
        }
    }

    /// Tool backends sharing one HTTP client.
    pub fn tool_backends(&self) -> Result<ToolBackends, ToolCallError> {
        ToolBackends::new(&self.api_base_url, &self.solver_base_url, self.http_timeout)
    }

    /// Human-readable dump of the resolved configuration. The persona is
    /// abbreviated to its first line.
    pub fn summary(&self) -> Vec<(&'static str, String)> {
        let persona = self.instructions.lines().next().unwrap_or_default();
        let persona = if persona.chars().count() > 60 {
            format!("{}...", persona.chars().take(60).collect::<String>())
        } else {
            persona.to_string()
        };
        vec![
            ("api.base_url", self.api_base_url.clone()),
            ("api.solver_url", self.solver_base_url.clone()),
            ("api.http_timeout_secs", self.http_timeout.as_secs().to_string()),
            ("realtime.model", self.model.to_string()),
            ("realtime.voice", self.voice.to_string()),
            ("realtime.instructions", persona),
            ("realtime.temperature", self.temperature.to_string()),
            ("realtime.data_channel_label", self.data_channel_label.clone()),
            ("realtime.ice_servers", self.ice_servers.join(",")),
            (
                "session.max_duration_secs",
                self.max_session_duration.as_secs().to_string(),
            ),
            (
                "session.buffer_clear_interval_secs",
                self.buffer_clear_interval.as_secs().to_string(),
            ),
            (
                "session.restart_delay_ms",
                self.restart_delay.as_millis().to_string(),
            ),
            (
                "session.response_grace_ms",
                self.response_grace.as_millis().to_string(),
            ),
            ("tools.timeout_secs", self.tool_timeout.as_secs().to_string()),
        ]
    }
}

/// Read a persona file, rejecting empty files.
pub(crate) fn read_instructions(path: &Path) -> Result<String, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let trimmed = contents.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!(
            "instructions file {} is empty",
            path.display()
        )));
    }
    Ok(trimmed.to_string())
}
