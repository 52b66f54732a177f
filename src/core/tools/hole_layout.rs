//! `display_hole_layout` backend.
//!
//! Layouts are static: every lookup returns the reference hole (Stanford #5)
//! under the requested course name and number.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info};

use super::{ToolCallError, ToolResolution};

#[derive(Debug, Deserialize)]
pub struct HoleLayoutArgs {
    pub course: String,
    pub hole_number: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeeDistance {
    pub name: String,
    pub yards: u32,
}

/// Layout shown to the golfer and returned to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HoleLayout {
    pub course: String,
    pub hole_number: u32,
    pub par: u8,
    pub handicap: String,
    pub tee_distances: Vec<TeeDistance>,
    /// Yards
    pub green_depth: u32,
    /// Yards
    pub green_width: u32,
    /// Distances to the green marked on the fairway
    pub yardage_markers: Vec<u32>,
}

/// Static hole-layout lookup.
#[derive(Debug, Clone, Default)]
pub struct HoleLayoutDirectory;

impl HoleLayoutDirectory {
    pub fn new() -> Self {
        Self
    }

    pub fn lookup(&self, course: &str, hole_number: u32) -> HoleLayout {
        let tee = |name: &str, yards| TeeDistance {
            name: name.to_string(),
            yards,
        };
        HoleLayout {
            course: course.to_string(),
            hole_number,
            par: 4,
            handicap: "5/5/9".to_string(),
            tee_distances: vec![
                tee("Cardinal", 447),
                tee("Black", 396),
                tee("White", 356),
                tee("Blue", 342),
            ],
            green_depth: 38,
            green_width: 30,
            yardage_markers: vec![80, 100, 115, 150, 164, 175, 200, 235],
        }
    }

    /// Resolve a raw invocation. Unparseable arguments produce an error payload.
    pub fn resolve(&self, arguments: &str) -> (Value, ToolResolution) {
        match serde_json::from_str::<HoleLayoutArgs>(arguments) {
            Ok(args) => {
                info!(course = %args.course, hole = args.hole_number, "Displaying hole layout");
                let layout = self.lookup(&args.course, args.hole_number);
                match serde_json::to_value(layout) {
                    Ok(value) => (value, ToolResolution::Success),
                    Err(e) => (
                        fallback(arguments, &ToolCallError::Decode(e.to_string())),
                        ToolResolution::Fallback,
                    ),
                }
            }
            Err(e) => {
                let err = ToolCallError::InvalidArguments(e.to_string());
                error!(error = %err, "Error handling hole layout call");
                (fallback(arguments, &err), ToolResolution::Fallback)
            }
        }
    }
}

/// Error payload echoing whatever course and hole could be recovered.
pub fn fallback(arguments: &str, error: &ToolCallError) -> Value {
    let raw: Value = serde_json::from_str(arguments).unwrap_or(Value::Null);
    json!({
        "error": error.to_string(),
        "course": raw.get("course").cloned().unwrap_or(Value::Null),
        "holeNumber": raw.get("hole_number").cloned().unwrap_or(Value::Null),
    })
}
