use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use super::{ConfigError, EngineConfig, read_instructions};
use crate::core::realtime::{RealtimeModel, RealtimeVoice};

pub(super) const AIME_API_URL: &str = "AIME_API_URL";
pub(super) const AIME_SOLVER_URL: &str = "AIME_SOLVER_URL";
pub(super) const AIME_HTTP_TIMEOUT_SECS: &str = "AIME_HTTP_TIMEOUT_SECS";
pub(super) const AIME_REALTIME_MODEL: &str = "AIME_REALTIME_MODEL";
pub(super) const AIME_REALTIME_VOICE: &str = "AIME_REALTIME_VOICE";
pub(super) const AIME_INSTRUCTIONS_PATH: &str = "AIME_INSTRUCTIONS_PATH";
pub(super) const AIME_TEMPERATURE: &str = "AIME_TEMPERATURE";
pub(super) const AIME_ICE_SERVERS: &str = "AIME_ICE_SERVERS";
pub(super) const AIME_SESSION_MAX_DURATION_SECS: &str = "AIME_SESSION_MAX_DURATION_SECS";
pub(super) const AIME_BUFFER_CLEAR_INTERVAL_SECS: &str = "AIME_BUFFER_CLEAR_INTERVAL_SECS";
pub(super) const AIME_TOOL_TIMEOUT_SECS: &str = "AIME_TOOL_TIMEOUT_SECS";

#[cfg(test)]
pub(super) const ENV_KEYS: [&str; 11] = [
    AIME_API_URL,
    AIME_SOLVER_URL,
    AIME_HTTP_TIMEOUT_SECS,
    AIME_REALTIME_MODEL,
    AIME_REALTIME_VOICE,
    AIME_INSTRUCTIONS_PATH,
    AIME_TEMPERATURE,
    AIME_ICE_SERVERS,
    AIME_SESSION_MAX_DURATION_SECS,
    AIME_BUFFER_CLEAR_INTERVAL_SECS,
    AIME_TOOL_TIMEOUT_SECS,
];

/// Non-empty, trimmed value of an environment variable.
fn env_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env_var(key) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(None),
    }
}

fn parse_secs(key: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_env::<u64>(key)?.map(Duration::from_secs))
}

/// Split a comma-separated list, dropping empty entries.
pub(super) fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Overlay environment variables onto `config`.
pub(super) fn apply_env(config: &mut EngineConfig) -> Result<(), ConfigError> {
    if let Some(url) = env_var(AIME_API_URL) {
        config.api_base_url = url;
    }
    if let Some(url) = env_var(AIME_SOLVER_URL) {
        config.solver_base_url = url;
    }
    if let Some(timeout) = parse_secs(AIME_HTTP_TIMEOUT_SECS)? {
        config.http_timeout = timeout;
    }

    if let Some(model) = env_var(AIME_REALTIME_MODEL) {
        config.model = RealtimeModel::from_str_or_default(&model);
    }
    if let Some(voice) = env_var(AIME_REALTIME_VOICE) {
        config.voice = RealtimeVoice::from_str_or_default(&voice);
    }
    if let Some(path) = env_var(AIME_INSTRUCTIONS_PATH) {
        config.instructions = read_instructions(&PathBuf::from(path))?;
    }
    if let Some(temperature) = parse_env::<f32>(AIME_TEMPERATURE)? {
        config.temperature = temperature;
    }
    if let Some(servers) = env_var(AIME_ICE_SERVERS) {
        config.ice_servers = split_list(&servers);
    }

    if let Some(duration) = parse_secs(AIME_SESSION_MAX_DURATION_SECS)? {
        config.max_session_duration = duration;
    }
    if let Some(interval) = parse_secs(AIME_BUFFER_CLEAR_INTERVAL_SECS)? {
        config.buffer_clear_interval = interval;
    }
    if let Some(timeout) = parse_secs(AIME_TOOL_TIMEOUT_SECS)? {
        config.tool_timeout = timeout;
    }

    Ok(())
}
