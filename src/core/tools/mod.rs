//! Tool calls requested by the model.
//!
//! The model asks for a tool in `response.done`. The [`ToolCallRouter`] runs
//! the matching backend off the session task and reports a [`ToolOutcome`];
//! the session then sends the result back as a `function_call_output`
//! followed by `response.create`. Backend failures never surface as errors:
//! each tool has a fallback payload so the conversation continues.
//!
//! # Tools
//!
//! - `get_current_weather` - weather service lookup ([`weather`])
//! - `display_hole_layout` - static hole layout ([`hole_layout`])
//! - `solve_putt` - putt solver service ([`putt`])

pub mod hole_layout;
pub mod putt;
mod router;
pub mod weather;

use serde_json::{Value, json};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

use crate::core::realtime::{ClientEvent, ConversationItem, Outbound, SessionResult, ToolDef};

pub use hole_layout::{HoleLayout, HoleLayoutDirectory, TeeDistance};
pub use putt::{LatLon, PlotPoint, PuttSolverClient, SolvePuttRequest, SolvePuttResponse};
pub use router::{ToolBackends, ToolCallRouter};
pub use weather::WeatherClient;

// =============================================================================
// Error Types
// =============================================================================

/// Errors from tool backends. Always converted to a fallback payload.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolCallError {
    /// The model sent arguments that do not match the tool schema
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The backend request could not be completed
    #[error("{0}")]
    Request(String),

    /// The backend answered with a non-success status
    #[error("{message}")]
    Status { status: u16, message: String },

    /// The backend answered with an unreadable body
    #[error("Invalid response: {0}")]
    Decode(String),

    /// The backend did not answer in time
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),
}

pub type ToolResult<T> = Result<T, ToolCallError>;

// =============================================================================
// Invocations
// =============================================================================

/// Tools the model may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolName {
    CurrentWeather,
    HoleLayout,
    SolvePutt,
}

impl ToolName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CurrentWeather => "get_current_weather",
            Self::HoleLayout => "display_hole_layout",
            Self::SolvePutt => "solve_putt",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "get_current_weather" => Some(Self::CurrentWeather),
            "display_hole_layout" => Some(Self::HoleLayout),
            "solve_putt" => Some(Self::SolvePutt),
            _ => None,
        }
    }

    pub fn all() -> &'static [ToolName] {
        &[Self::CurrentWeather, Self::HoleLayout, Self::SolvePutt]
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One function call requested by the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub name: String,
    /// JSON-encoded arguments as sent by the model
    pub arguments: String,
    pub call_id: String,
}

/// How an invocation was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolResolution {
    Success,
    Fallback,
}

/// A resolved invocation, tagged with the session generation that dispatched it.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub call_id: String,
    pub tool: ToolName,
    pub output: Value,
    pub resolution: ToolResolution,
    pub generation: u64,
}

// =============================================================================
// Outbound helpers
// =============================================================================

/// Send the result pair for one invocation: `function_call_output`, then `response.create`.
pub fn emit_outcome(outbound: &Outbound, outcome: &ToolOutcome) -> SessionResult<()> {
    outbound.emit(ClientEvent::ConversationItemCreate {
        item: ConversationItem::function_output(&outcome.call_id, &outcome.output),
    })?;
    outbound.emit(ClientEvent::ResponseCreate)?;
    info!(
        tool = %outcome.tool,
        call_id = %outcome.call_id,
        resolution = ?outcome.resolution,
        "Tool result sent"
    );
    Ok(())
}

/// Ask the model to drop buffered input audio. Best effort; returns whether it was sent.
pub fn clear_input_buffer(outbound: &Outbound) -> bool {
    match outbound.emit(ClientEvent::InputAudioBufferClear) {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "Failed to clear input audio buffer");
            false
        }
    }
}

// =============================================================================
// Tool schemas
// =============================================================================

fn lat_lon_schema(description: &str) -> Value {
    json!({
        "type": "object",
        "description": description,
        "properties": {
            "lat": {"type": "number", "description": "Latitude in decimal degrees"},
            "lon": {"type": "number", "description": "Longitude in decimal degrees"}
        },
        "required": ["lat", "lon"]
    })
}

/// Schemas of every tool, as declared in `session.update`.
pub fn tool_definitions() -> Vec<ToolDef> {
    vec![
        ToolDef::function(
            ToolName::CurrentWeather.as_str(),
            "Get current weather for any US location to provide golf-relevant conditions.",
            json!({
                "type": "object",
                "properties": {
                    "location": {
                        "type": "string",
                        "description": "US location as a ZIP code ('90210, US'), golf course ('Augusta National, GA'), or city ('San Francisco, CA')."
                    }
                },
                "required": ["location"]
            }),
        ),
        ToolDef::function(
            ToolName::HoleLayout.as_str(),
            "Display the layout and information for a specific golf hole.",
            json!({
                "type": "object",
                "properties": {
                    "course": {"type": "string", "description": "The name of the golf course (e.g., 'Stanford Golf Course')"},
                    "hole_number": {"type": "integer", "description": "The hole number to display"}
                },
                "required": ["course", "hole_number"]
            }),
        ),
        ToolDef::function(
            ToolName::SolvePutt.as_str(),
            "Solve a putt from ball and cup locations and green speed. Returns aim direction, initial speed, and ball path.",
            json!({
                "type": "object",
                "properties": {
                    "course_id": {"type": "string", "description": "Course identifier in lowercase_snake_case (e.g., 'riverside_country_club')"},
                    "hole_id": {"type": "integer", "description": "Hole number (1-18)"},
                    "ball_wgs84": lat_lon_schema("Ball position in GPS coordinates"),
                    "cup_wgs84": lat_lon_schema("Cup position in GPS coordinates"),
                    "stimp": {"type": "number", "description": "Green stimp meter reading (typically 8-14)"}
                },
                "required": ["course_id", "hole_id", "ball_wgs84", "cup_wgs84", "stimp"]
            }),
        ),
    ]
}
