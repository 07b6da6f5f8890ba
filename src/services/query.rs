//! Read-only accessors for whatever serves readings to operators.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::devices::PowerReading;
use crate::services::telemetry_state::TelemetryState;
use crate::storage::PowerSnapshotFile;
use crate::utils::round_to;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlowData {
    pub flow_lpm: f64,
    pub total_liters: f64,
}

#[derive(Debug, Clone)]
pub struct QuerySurface {
    state: TelemetryState,
    snapshot: PowerSnapshotFile,
}

impl QuerySurface {
    pub fn new(state: TelemetryState, snapshot: PowerSnapshotFile) -> Self {
        Self { state, snapshot }
    }

    /// Flow rate to 4 decimals, total to 6.
    pub fn flow_data(&self) -> FlowData {
        let snapshot = self.state.snapshot();
        FlowData {
            flow_lpm: round_to(snapshot.flow_lpm, 4),
            total_liters: round_to(snapshot.total_liters, 6),
        }
    }

    pub fn power_data(&self) -> PowerReading {
        self.state.power_reading()
    }

    /// The snapshot file as last written by the poller, or an explicit
    /// `{"error": ...}` payload when it cannot be read.
    pub fn power_data_response(&self) -> serde_json::Value {
        match self.snapshot.read_value() {
            Ok(value) => value,
            Err(e) => json!({ "error": e.to_string() }),
        }
    }
}
