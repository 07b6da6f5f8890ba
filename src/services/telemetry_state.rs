use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::devices::PowerReading;

/// Latest readings from every source, always read as one consistent copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub frequency_hz: f64,
    pub flow_lpm: f64,
    pub total_liters: f64,
    pub power_kw: f64,
    pub energy_kwh: f64,
}

#[derive(Debug, Default)]
struct Inner {
    snapshot: Mutex<TelemetrySnapshot>,
    power_reading: RwLock<PowerReading>,
}

/// Cloneable handle to the gateway's shared state. Flow fields belong to the
/// flow integrator and power/energy to the reading bridge; both go through
/// the same lock so a reader never sees a half-applied update.
#[derive(Debug, Clone, Default)]
pub struct TelemetryState {
    inner: Arc<Inner>,
}

impl TelemetryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        *self.inner.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update_flow(&self, frequency_hz: f64, flow_lpm: f64, total_liters: f64) {
        let mut snapshot = self.inner.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.frequency_hz = frequency_hz;
        snapshot.flow_lpm = flow_lpm;
        snapshot.total_liters = total_liters;
    }

    pub fn update_power(&self, power_kw: f64, energy_kwh: f64) {
        let mut snapshot = self.inner.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        snapshot.power_kw = power_kw;
        snapshot.energy_kwh = energy_kwh;
    }

    pub fn power_reading(&self) -> PowerReading {
        self.inner
            .power_reading
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Applies `f` to the reading map under the write lock.
    pub fn with_power_reading<R>(&self, f: impl FnOnce(&mut PowerReading) -> R) -> R {
        let mut reading = self
            .inner
            .power_reading
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut reading)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_updates_touch_only_owned_fields() {
        let state = TelemetryState::new();
        state.update_flow(4800.0, 1000.0, 16.6);
        state.update_power(1.5, 42.0);
        state.update_flow(0.0, 0.0, 16.6);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.frequency_hz, 0.0);
        assert_eq!(snapshot.total_liters, 16.6);
        assert_eq!(snapshot.power_kw, 1.5);
        assert_eq!(snapshot.energy_kwh, 42.0);
    }

    #[test]
    fn test_readers_never_see_partial_updates() {
        let state = TelemetryState::new();
        let writer_state = state.clone();

        // Every write keeps all three flow fields equal to each other
        let writer = thread::spawn(move || {
            for i in 0..20_000u32 {
                let v = i as f64;
                writer_state.update_flow(v, v, v);
            }
        });

        for _ in 0..20_000 {
            let s = state.snapshot();
            assert_eq!(s.frequency_hz, s.flow_lpm);
            assert_eq!(s.flow_lpm, s.total_liters);
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_power_reading_is_shared_between_clones() {
        let state = TelemetryState::new();
        let other = state.clone();
        other.with_power_reading(|reading| {
            reading.apply([("frequency".to_string(), Some(50.0))].into_iter().collect())
        });
        assert_eq!(state.power_reading().get("frequency"), Some(50.0));
    }
}
