use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, warn};

use super::hole_layout::{self, HoleLayoutDirectory};
use super::putt::{self, PuttSolverClient};
use super::weather::{self, WeatherClient};
use super::{ToolCallError, ToolInvocation, ToolName, ToolOutcome, ToolResolution};

/// The backends behind each tool.
#[derive(Debug, Clone)]
pub struct ToolBackends {
    pub weather: WeatherClient,
    pub holes: HoleLayoutDirectory,
    pub putt: PuttSolverClient,
}

impl ToolBackends {
    /// Backends sharing one HTTP client with the given request timeout.
    pub fn new(api_base_url: &str, solver_base_url: &str, timeout: Duration) -> Result<Self, ToolCallError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ToolCallError::Request(format!("HTTP client: {e}")))?;
        Ok(Self {
            weather: WeatherClient::new(http.clone(), api_base_url),
            holes: HoleLayoutDirectory::new(),
            putt: PuttSolverClient::new(http, solver_base_url),
        })
    }

    /// Run one invocation to completion, applying the tool's fallback on any failure.
    pub async fn run(&self, tool: ToolName, arguments: &str) -> (Value, ToolResolution) {
        match tool {
            ToolName::CurrentWeather => self.weather.resolve(arguments).await,
            ToolName::HoleLayout => self.holes.resolve(arguments),
            ToolName::SolvePutt => self.putt.resolve(arguments).await,
        }
    }
}

/// Dispatches model function calls to their backends.
///
/// Each invocation runs on its own task so the session keeps handling events
/// while a backend is slow. Outcomes come back on the channel given to
/// [`ToolCallRouter::new`], tagged with the session generation.
#[derive(Clone)]
pub struct ToolCallRouter {
    backends: Arc<ToolBackends>,
    timeout: Duration,
    outcomes: mpsc::UnboundedSender<ToolOutcome>,
}

impl ToolCallRouter {
    pub fn new(
        backends: ToolBackends,
        timeout: Duration,
        outcomes: mpsc::UnboundedSender<ToolOutcome>,
    ) -> Self {
        Self {
            backends: Arc::new(backends),
            timeout,
            outcomes,
        }
    }

    pub fn backends(&self) -> &ToolBackends {
        &self.backends
    }

    /// Start resolving `invocation`. Returns false for tools this router does not know;
    /// those are logged and produce no outbound events.
    pub fn dispatch(&self, invocation: ToolInvocation, generation: u64) -> bool {
        let Some(tool) = ToolName::parse(&invocation.name) else {
            warn!(name = %invocation.name, call_id = %invocation.call_id, "Unrecognized tool call, ignoring");
            return false;
        };
        info!(tool = %tool, call_id = %invocation.call_id, "Tool call received");

        let backends = self.backends.clone();
        let timeout = self.timeout;
        let outcomes = self.outcomes.clone();
        tokio::spawn(
            async move {
                debug!(tool = %tool, "Tool call dispatched");
                let (output, resolution) =
                    match tokio::time::timeout(timeout, backends.run(tool, &invocation.arguments)).await {
                        Ok(resolved) => resolved,
                        Err(_) => {
                            let err = ToolCallError::Timeout(timeout);
                            warn!(tool = %tool, error = %err, "Tool call timed out");
                            (fallback_for(tool, &invocation.arguments, &err), ToolResolution::Fallback)
                        }
                    };
                let outcome = ToolOutcome {
                    call_id: invocation.call_id,
                    tool,
                    output,
                    resolution,
                    generation,
                };
                if outcomes.send(outcome).is_err() {
                    debug!(tool = %tool, "Session gone before tool call resolved");
                }
            }
            .in_current_span(),
        );
        true
    }
}

/// The fallback payload each tool returns when its backend fails.
pub(super) fn fallback_for(tool: ToolName, arguments: &str, error: &ToolCallError) -> Value {
    match tool {
        ToolName::CurrentWeather => {
            let location = serde_json::from_str::<Value>(arguments)
                .ok()
                .and_then(|v| v.get("location").and_then(Value::as_str).map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());
            weather::fallback(&location, error)
        }
        ToolName::HoleLayout => hole_layout::fallback(arguments, error),
        ToolName::SolvePutt => putt::fallback(error),
    }
}
