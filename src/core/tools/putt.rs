//! `solve_putt` backend.
//!
//! Forwards the ball and cup positions to the putt solver service
//! (`POST <solver>/api/solve_putt`) and returns its answer as-is.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info};

use super::{ToolCallError, ToolResolution, ToolResult};

/// WGS84 coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLon {
    pub lat: f64,
    pub lon: f64,
}

/// Arguments of `solve_putt`, forwarded verbatim to the solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvePuttRequest {
    pub course_id: String,
    pub hole_id: u32,
    pub ball_wgs84: LatLon,
    pub cup_wgs84: LatLon,
    pub stimp: f64,
}

/// One point of the predicted ball path, in green-local metres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlotPoint {
    pub x: f64,
    pub y: f64,
    pub t: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolvePuttResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aim_line_deg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_speed_mph: Option<f64>,
    #[serde(default)]
    pub plot_points_local: Vec<PlotPoint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SolverErrorBody {
    error: Option<String>,
}

/// Client for the putt solver service.
#[derive(Debug, Clone)]
pub struct PuttSolverClient {
    http: reqwest::Client,
    base_url: String,
}

impl PuttSolverClient {
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn solve(&self, request: &SolvePuttRequest) -> ToolResult<SolvePuttResponse> {
        let url = format!("{}/api/solve_putt", self.base_url);
        info!(
            course_id = %request.course_id,
            hole_id = request.hole_id,
            stimp = request.stimp,
            "Solving putt"
        );

        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ToolCallError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<SolverErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(ToolCallError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let solution: SolvePuttResponse = response
            .json()
            .await
            .map_err(|e| ToolCallError::Decode(e.to_string()))?;
        info!(
            success = solution.success,
            aim_deg = ?solution.aim_line_deg,
            speed_mph = ?solution.initial_speed_mph,
            "Putt solution received"
        );
        Ok(solution)
    }

    /// Resolve a raw invocation, falling back to `{success: false, error}`.
    pub async fn resolve(&self, arguments: &str) -> (Value, ToolResolution) {
        let request: SolvePuttRequest = match serde_json::from_str(arguments) {
            Ok(request) => request,
            Err(e) => {
                let err = ToolCallError::InvalidArguments(e.to_string());
                error!(error = %err, "Invalid solve_putt arguments");
                return (fallback(&err), ToolResolution::Fallback);
            }
        };
        let solved = self
            .solve(&request)
            .await
            .and_then(|solution| serde_json::to_value(solution).map_err(|e| ToolCallError::Decode(e.to_string())));
        match solved {
            Ok(value) => (value, ToolResolution::Success),
            Err(err) => {
                error!(error = %err, course_id = %request.course_id, "Error solving putt");
                (fallback(&err), ToolResolution::Fallback)
            }
        }
    }
}

pub fn fallback(error: &ToolCallError) -> Value {
    json!({
        "success": false,
        "error": error.to_string(),
    })
}
