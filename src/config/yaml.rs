use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::{ConfigError, EngineConfig, read_instructions};
use crate::core::realtime::{RealtimeModel, RealtimeVoice};

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present
/// here override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// api:
///   base_url: "http://localhost:3001/api"
///   solver_url: "http://localhost:8000"
///   http_timeout_secs: 15
///
/// realtime:
///   model: "gpt-4o-realtime-preview-2024-12-17"
///   voice: "alloy"
///   instructions_path: "/etc/aime/persona.txt"
///   temperature: 0.8
///   data_channel_label: "oai-events"
///   ice_servers:
///     - "stun:stun.l.google.com:19302"
///
/// session:
///   max_duration_secs: 1800
///   buffer_clear_interval_secs: 180
///   restart_delay_ms: 1000
///   response_grace_ms: 1000
///
/// tools:
///   timeout_secs: 10
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub api: Option<ApiYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub session: Option<SessionYaml>,
    pub tools: Option<ToolsYaml>,
}

/// Service endpoints from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ApiYaml {
    pub base_url: Option<String>,
    pub solver_url: Option<String>,
    pub http_timeout_secs: Option<u64>,
}

/// Model settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub model: Option<String>,
    pub voice: Option<String>,
    /// Inline persona; wins over `instructions_path`
    pub instructions: Option<String>,
    pub instructions_path: Option<PathBuf>,
    pub temperature: Option<f32>,
    pub data_channel_label: Option<String>,
    pub ice_servers: Option<Vec<String>>,
}

/// Session timers from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub max_duration_secs: Option<u64>,
    pub buffer_clear_interval_secs: Option<u64>,
    pub restart_delay_ms: Option<u64>,
    pub response_grace_ms: Option<u64>,
}

/// Tool settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ToolsYaml {
    pub timeout_secs: Option<u64>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Overlay every value present in this file onto `config`.
    pub fn apply(self, config: &mut EngineConfig) -> Result<(), ConfigError> {
        if let Some(api) = self.api {
            if let Some(url) = api.base_url {
                config.api_base_url = url;
            }
            if let Some(url) = api.solver_url {
                config.solver_base_url = url;
            }
            if let Some(secs) = api.http_timeout_secs {
                config.http_timeout = Duration::from_secs(secs);
            }
        }

        if let Some(realtime) = self.realtime {
            if let Some(model) = realtime.model {
                config.model = RealtimeModel::from_str_or_default(&model);
            }
            if let Some(voice) = realtime.voice {
                config.voice = RealtimeVoice::from_str_or_default(&voice);
            }
            match (realtime.instructions, realtime.instructions_path) {
                (Some(inline), _) => config.instructions = inline.trim().to_string(),
                (None, Some(path)) => config.instructions = read_instructions(&path)?,
                (None, None) => {}
            }
            if let Some(temperature) = realtime.temperature {
                config.temperature = temperature;
            }
            if let Some(label) = realtime.data_channel_label {
                config.data_channel_label = label;
            }
            if let Some(servers) = realtime.ice_servers {
                config.ice_servers = servers;
            }
        }

        if let Some(session) = self.session {
            if let Some(secs) = session.max_duration_secs {
                config.max_session_duration = Duration::from_secs(secs);
            }
            if let Some(secs) = session.buffer_clear_interval_secs {
                config.buffer_clear_interval = Duration::from_secs(secs);
            }
            if let Some(ms) = session.restart_delay_ms {
                config.restart_delay = Duration::from_millis(ms);
            }
            if let Some(ms) = session.response_grace_ms {
                config.response_grace = Duration::from_millis(ms);
            }
        }

        if let Some(secs) = self.tools.and_then(|tools| tools.timeout_secs) {
            config.tool_timeout = Duration::from_secs(secs);
        }

        Ok(())
    }
}
