//! JSON status payloads.

use pivot_common::shared::AxisSnapshot;
use pivot_common::state::now_us;
use serde::{Deserialize, Serialize};

/// Per-axis status published on `{prefix}/{axis}/state`.
///
/// Optional fields are omitted rather than null so hub templates can use
/// plain existence checks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisStatusPayload {
    pub axis: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_percent: Option<f64>,
    pub stale: bool,
    pub calibrated: bool,
    pub timestamp_us: u64,
}

impl AxisStatusPayload {
    pub fn from_snapshot(name: &str, snapshot: &AxisSnapshot) -> Self {
        Self {
            axis: name.to_string(),
            state: snapshot.state.as_str().to_string(),
            fault: snapshot.fault.map(|f| f.as_str().to_string()),
            position_percent: snapshot.reading.map(|r| round1(r.position_percent)),
            target_percent: snapshot.target_percent.map(round1),
            stale: snapshot.reading.is_some_and(|r| r.stale),
            calibrated: snapshot.calibrated,
            timestamp_us: now_us(),
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

/// One decimal place is plenty for a percent scale and keeps payloads
/// stable across jittery readings.
fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
