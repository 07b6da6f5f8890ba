use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Edge counter shared between the interrupt callback and the flow integrator.
///
/// `record` is the only thing the interrupt path ever calls: a single atomic
/// increment, no allocation, no locking, nothing that can fail.
#[derive(Debug, Default)]
pub struct PulseCounter {
    count: AtomicU64,
}

impl PulseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Starts a new measurement window.
    pub fn reset(&self) {
        self.count.store(0, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Pulses accumulated over one measurement interval.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PulseWindow {
    pub count: u64,
    pub elapsed: Duration,
}

impl PulseWindow {
    pub fn new(count: u64, elapsed: Duration) -> Self {
        Self { count, elapsed }
    }
}
