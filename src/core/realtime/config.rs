//! Realtime session configuration.
//!
//! This module contains:
//! - Model selection
//! - Voice selection
//! - [`RealtimeConfig`], everything a session needs besides its transports
//! - Construction of the `session.update` payload

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::base::{SessionError, SessionResult};
use super::messages::{SessionConfig, ToolDef};
use super::streamer::StreamingConfig;
use super::timers::TimerConfig;

/// Label of the event channel negotiated with the remote model.
pub const DEFAULT_DATA_CHANNEL_LABEL: &str = "oai-events";

/// Default base URL of the token and negotiation service.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3001/api";

/// Default sampling temperature.
pub const DEFAULT_TEMPERATURE: f32 = 0.8;

/// Built-in caddie persona.
pub const DEFAULT_INSTRUCTIONS: &str = "\
You are Aime, an experienced golf caddie who knows golf courses around the world. \
You are talking with a golfer during their round.

You can look up:
- Current weather for a location, to judge wind and temperature for club selection
- Hole layouts: par, handicap, distances from every tee, green size and yardage markers
- Putt solutions: aim line, starting speed and ball path from ball and cup positions

How to talk:
- Keep answers short, two or three sentences at most
- Sound like a caddie on the bag, direct and conversational
- Give concrete advice: a club, a target, a miss to avoid
- Only mention weather factors that matter for the shot
- Share hole details only when asked";

// =============================================================================
// Models
// =============================================================================

/// Supported realtime models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RealtimeModel {
    /// GPT-4o Realtime Preview 2024-12-17
    #[default]
    #[serde(rename = "gpt-4o-realtime-preview-2024-12-17")]
    Gpt4oRealtimePreview20241217,
    /// GPT-4o Realtime Preview (rolling)
    #[serde(rename = "gpt-4o-realtime-preview")]
    Gpt4oRealtimePreview,
    /// GPT-4o Mini Realtime Preview 2024-12-17
    #[serde(rename = "gpt-4o-mini-realtime-preview-2024-12-17")]
    Gpt4oMiniRealtimePreview20241217,
}

impl RealtimeModel {
    /// Convert to the `model` query parameter value.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gpt4oRealtimePreview20241217 => "gpt-4o-realtime-preview-2024-12-17",
            Self::Gpt4oRealtimePreview => "gpt-4o-realtime-preview",
            Self::Gpt4oMiniRealtimePreview20241217 => "gpt-4o-mini-realtime-preview-2024-12-17",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "gpt-4o-realtime-preview" => Self::Gpt4oRealtimePreview,
            "gpt-4o-mini-realtime-preview-2024-12-17" => Self::Gpt4oMiniRealtimePreview20241217,
            _ => Self::default(),
        }
    }
}

impl std::fmt::Display for RealtimeModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Voices
// =============================================================================

/// Output voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RealtimeVoice {
    #[default]
    Alloy,
    Ash,
    Ballad,
    Coral,
    Echo,
    Sage,
    Shimmer,
    Verse,
}

impl RealtimeVoice {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alloy => "alloy",
            Self::Ash => "ash",
            Self::Ballad => "ballad",
            Self::Coral => "coral",
            Self::Echo => "echo",
            Self::Sage => "sage",
            Self::Shimmer => "shimmer",
            Self::Verse => "verse",
        }
    }

    /// Parse from string, with fallback to default.
    pub fn from_str_or_default(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "ash" => Self::Ash,
            "ballad" => Self::Ballad,
            "coral" => Self::Coral,
            "echo" => Self::Echo,
            "sage" => Self::Sage,
            "shimmer" => Self::Shimmer,
            "verse" => Self::Verse,
            _ => Self::Alloy,
        }
    }

    pub fn all() -> &'static [RealtimeVoice] {
        &[
            Self::Alloy,
            Self::Ash,
            Self::Ballad,
            Self::Coral,
            Self::Echo,
            Self::Sage,
            Self::Shimmer,
            Self::Verse,
        ]
    }
}

impl std::fmt::Display for RealtimeVoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Session Configuration
// =============================================================================

/// Everything a session needs besides its transports and tool backends.
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Base URL of the token and negotiation service (`<base>/token`, `<base>/realtime`)
    pub api_base_url: String,
    pub model: RealtimeModel,
    pub voice: RealtimeVoice,
    pub instructions: String,
    pub temperature: f32,
    pub data_channel_label: String,
    /// Timeout for the token and negotiation requests
    pub http_timeout: Duration,
    /// Upper bound on a single tool invocation
    pub tool_timeout: Duration,
    pub timers: TimerConfig,
    pub streaming: StreamingConfig,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            model: RealtimeModel::default(),
            voice: RealtimeVoice::default(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            data_channel_label: DEFAULT_DATA_CHANNEL_LABEL.to_string(),
            http_timeout: Duration::from_secs(15),
            tool_timeout: Duration::from_secs(10),
            timers: TimerConfig::default(),
            streaming: StreamingConfig::default(),
        }
    }
}

impl RealtimeConfig {
    pub fn validate(&self) -> SessionResult<()> {
        if self.api_base_url.trim().is_empty() {
            return Err(SessionError::InvalidConfiguration(
                "api_base_url is required".to_string(),
            ));
        }
        if self.data_channel_label.trim().is_empty() {
            return Err(SessionError::InvalidConfiguration(
                "data_channel_label is required".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(SessionError::InvalidConfiguration(format!(
                "temperature must be between 0.0 and 2.0, got {}",
                self.temperature
            )));
        }
        if self.timers.buffer_clear_interval.is_zero() || self.timers.max_session_duration.is_zero() {
            return Err(SessionError::InvalidConfiguration(
                "session timers must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// The `session.update` payload declaring modalities, persona and tools.
    pub fn session_config(&self, tools: Vec<ToolDef>) -> SessionConfig {
        SessionConfig {
            modalities: Some(vec!["text".to_string(), "audio".to_string()]),
            instructions: Some(self.instructions.clone()),
            voice: Some(self.voice.as_str().to_string()),
            tools: Some(tools),
            tool_choice: Some("auto".to_string()),
            temperature: Some(self.temperature),
        }
    }
}
