use log::{debug, info};
use std::time::Duration;
use tokio::time::sleep;

use crate::devices::power_meter::{TOTAL_ACTIVE_POWER, TOTAL_POS_ACTIVE_ENERGY};
use crate::output::display::RefreshTrigger;
use crate::services::telemetry_state::TelemetryState;
use crate::storage::PowerSnapshotFile;
use crate::utils::error::GatewayError;

/// Carries power and energy from the meter snapshot file into the shared
/// state. A cycle that cannot read both values leaves the state untouched.
pub struct ReadingBridge {
    snapshot: PowerSnapshotFile,
    state: TelemetryState,
    display: Option<RefreshTrigger>,
    interval: Duration,
}

impl ReadingBridge {
    pub fn new(snapshot: PowerSnapshotFile, state: TelemetryState, interval: Duration) -> Self {
        Self {
            snapshot,
            state,
            display: None,
            interval,
        }
    }

    pub fn with_display(mut self, trigger: RefreshTrigger) -> Self {
        self.display = Some(trigger);
        self
    }

    /// Returns the forwarded `(power_kw, energy_kwh)`.
    pub fn forward_once(&self) -> Result<(f64, f64), GatewayError> {
        let reading = self.snapshot.read()?;
        let field = |name: &str| {
            reading
                .get(name)
                .map(f64::from)
                .ok_or_else(|| GatewayError::Decode(format!("{} missing from snapshot", name)))
        };
        let power = field(TOTAL_ACTIVE_POWER)?;
        let energy = field(TOTAL_POS_ACTIVE_ENERGY)?;

        self.state.update_power(power, energy);
        if let Some(display) = &self.display {
            display.request();
        }
        Ok((power, energy))
    }

    pub async fn run(self) {
        info!("🔗 Reading bridge started: {} every {:?}", self.snapshot.path().display(), self.interval);
        loop {
            if let Err(e) = self.forward_once() {
                debug!("Bridge cycle skipped: {}", e);
            }
            sleep(self.interval).await;
        }
    }
}
