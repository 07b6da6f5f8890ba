use log::{debug, error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::FlowConfig;
use crate::devices::{PulseCounter, PulseWindow};
use crate::output::display::RefreshTrigger;
use crate::services::telemetry_state::TelemetryState;
use crate::storage::TotalizerStore;

/// Values derived from one measurement window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSample {
    pub frequency_hz: f64,
    pub flow_lpm: f64,
    pub volume_delta_liters: f64,
}

impl FlowSample {
    /// `calibration_factor` is pulses per second at 1 L/min.
    pub fn from_window(window: PulseWindow, calibration_factor: f64) -> Self {
        let elapsed = window.elapsed.as_secs_f64();
        if elapsed <= 0.0 {
            return Self {
                frequency_hz: 0.0,
                flow_lpm: 0.0,
                volume_delta_liters: 0.0,
            };
        }

        let frequency_hz = window.count as f64 / elapsed;
        let flow_lpm = frequency_hz / calibration_factor;
        let volume_delta_liters = (flow_lpm / 60.0) * elapsed;
        Self {
            frequency_hz,
            flow_lpm,
            volume_delta_liters,
        }
    }
}

/// Samples the pulse counter on a fixed cadence and owns the totalizer.
pub struct FlowIntegrator {
    counter: Arc<PulseCounter>,
    state: TelemetryState,
    store: TotalizerStore,
    display: Option<RefreshTrigger>,
    calibration_factor: f64,
    interval: Duration,
    checkpoint_interval: Duration,
    total_liters: f64,
    last_checkpoint: Instant,
}

impl FlowIntegrator {
    /// Loads the persisted total; a bad or missing file starts at zero.
    pub fn new(
        config: &FlowConfig,
        counter: Arc<PulseCounter>,
        state: TelemetryState,
        store: TotalizerStore,
    ) -> Self {
        let total_liters = store.load();
        state.update_flow(0.0, 0.0, total_liters);

        Self {
            counter,
            state,
            store,
            display: None,
            calibration_factor: config.calibration_factor,
            interval: config.measure_interval,
            checkpoint_interval: config.checkpoint_interval,
            total_liters,
            last_checkpoint: Instant::now(),
        }
    }

    pub fn with_display(mut self, trigger: RefreshTrigger) -> Self {
        self.display = Some(trigger);
        self
    }

    pub fn total_liters(&self) -> f64 {
        self.total_liters
    }

    /// One window: reset, wait, read back with the actual elapsed time.
    pub async fn measure_window(&self) -> PulseWindow {
        self.counter.reset();
        let start = Instant::now();
        sleep(self.interval).await;
        let elapsed = start.elapsed();
        PulseWindow::new(self.counter.count(), elapsed)
    }

    /// Folds a window into the totalizer and shared state, checkpointing
    /// when the checkpoint interval has passed.
    pub fn integrate(&mut self, window: PulseWindow, now: Instant) -> FlowSample {
        let sample = FlowSample::from_window(window, self.calibration_factor);
        self.total_liters += sample.volume_delta_liters;
        self.state
            .update_flow(sample.frequency_hz, sample.flow_lpm, self.total_liters);

        debug!(
            "💧 {} pulses in {:.3}s: {:.2} Hz, {:.2} L/min, total {:.3} L",
            window.count,
            window.elapsed.as_secs_f64(),
            sample.frequency_hz,
            sample.flow_lpm,
            self.total_liters
        );

        if now.duration_since(self.last_checkpoint) > self.checkpoint_interval {
            self.checkpoint();
            self.last_checkpoint = now;
        }

        if let Some(display) = &self.display {
            display.request();
        }
        sample
    }

    /// A failed write is logged and retried at the next checkpoint.
    pub fn checkpoint(&self) {
        match self.store.save(self.total_liters) {
            Ok(()) => debug!("Totalizer checkpoint: {:.3} L", self.total_liters),
            Err(e) => error!("❌ Error saving totalizer: {}", e),
        }
    }

    pub async fn run(mut self) {
        info!(
            "🚰 Flow integrator started: {:?} windows, {} pulses/s per L/min, total {:.3} L",
            self.interval, self.calibration_factor, self.total_liters
        );
        loop {
            let window = self.measure_window().await;
            self.integrate(window, Instant::now());
        }
    }
}
