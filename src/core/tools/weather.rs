//! `get_current_weather` backend.

use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error};

use super::{ToolCallError, ToolResolution, ToolResult};
use crate::core::realtime::local_timestamp;

#[derive(Debug, Deserialize)]
pub struct WeatherArgs {
    pub location: String,
}

/// Client for the weather service (`GET <base>/weather?city=<location>`).
#[derive(Debug, Clone)]
pub struct WeatherClient {
    http: reqwest::Client,
    base_url: String,
}

impl WeatherClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch current conditions. The service's JSON is passed through unchanged.
    pub async fn current(&self, location: &str) -> ToolResult<Value> {
        let url = format!("{}/weather", self.base_url);
        debug!(%location, "Fetching weather");

        let response = self
            .http
            .get(&url)
            .query(&[("city", location)])
            .send()
            .await
            .map_err(|e| ToolCallError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolCallError::Status {
                status: status.as_u16(),
                message: format!("Weather API error: {}", status.as_u16()),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| ToolCallError::Decode(e.to_string()))
    }

    /// Resolve a raw invocation: parse arguments, call the service, fall back on error.
    pub async fn resolve(&self, arguments: &str) -> (Value, ToolResolution) {
        let args: WeatherArgs = match serde_json::from_str(arguments) {
            Ok(args) => args,
            Err(e) => {
                let err = ToolCallError::InvalidArguments(e.to_string());
                error!(error = %err, "Invalid weather arguments");
                return (fallback("unknown", &err), ToolResolution::Fallback);
            }
        };
        match self.current(&args.location).await {
            Ok(weather) => (weather, ToolResolution::Success),
            Err(err) => {
                error!(error = %err, location = %args.location, "Error fetching weather data");
                (fallback(&args.location, &err), ToolResolution::Fallback)
            }
        }
    }
}

/// Stand-in conditions returned to the model when the service fails.
pub fn fallback(location: &str, error: &ToolCallError) -> Value {
    json!({
        "temperature": 72,
        "unit": "fahrenheit",
        "description": "unavailable (API error)",
        "location": location,
        "timestamp": local_timestamp(),
        "error": error.to_string(),
    })
}
