use super::{ConfigError, EngineConfig};
use crate::utils::validate_base_url;

/// Validate a merged configuration.
///
/// Checks:
/// - Service base URLs are http(s) with a host
/// - Temperature is within the model's accepted range
/// - Session timers and timeouts are non-zero
/// - ICE servers use a `stun:`/`turn:`/`turns:` scheme
pub(super) fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    validate_base_url(&config.api_base_url).map_err(|source| ConfigError::InvalidUrl {
        key: "api.base_url",
        source,
    })?;
    validate_base_url(&config.solver_base_url).map_err(|source| ConfigError::InvalidUrl {
        key: "api.solver_url",
        source,
    })?;

    if !(0.0..=2.0).contains(&config.temperature) {
        return Err(ConfigError::InvalidValue {
            key: "realtime.temperature",
            value: config.temperature.to_string(),
        });
    }

    if config.data_channel_label.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "realtime.data_channel_label must not be empty".to_string(),
        ));
    }
    if config.instructions.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "realtime.instructions must not be empty".to_string(),
        ));
    }

    for (key, value) in [
        ("session.max_duration_secs", config.max_session_duration),
        ("session.buffer_clear_interval_secs", config.buffer_clear_interval),
        ("api.http_timeout_secs", config.http_timeout),
        ("tools.timeout_secs", config.tool_timeout),
    ] {
        if value.is_zero() {
            return Err(ConfigError::Invalid(format!("{key} must be greater than zero")));
        }
    }

    for server in &config.ice_servers {
        let lower = server.to_ascii_lowercase();
        if !(lower.starts_with("stun:") || lower.starts_with("turn:") || lower.starts_with("turns:")) {
            return Err(ConfigError::InvalidValue {
                key: "realtime.ice_servers",
                value: server.clone(),
            });
        }
    }

    Ok(())
}
