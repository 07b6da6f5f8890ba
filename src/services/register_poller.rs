use log::{debug, error, info, warn};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::MeterConfig;
use crate::devices::power_meter::{decode_registers, PowerReading, RegisterField, POWER_METER_REGISTER_MAP};
use crate::modbus::RegisterBus;
use crate::services::telemetry_state::TelemetryState;
use crate::storage::PowerSnapshotFile;
use crate::utils::error::GatewayError;

/// What one poll cycle ended with, and so how long to wait before the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Updated,
    Unavailable,
    ReadFailed,
    Reconnecting,
}

/// Owns the meter bus connection and keeps the shared reading map current.
pub struct RegisterPoller {
    bus: Box<dyn RegisterBus>,
    state: TelemetryState,
    snapshot: PowerSnapshotFile,
    config: MeterConfig,
    map: &'static [RegisterField],
}

impl RegisterPoller {
    pub fn new(bus: Box<dyn RegisterBus>, state: TelemetryState, config: MeterConfig) -> Self {
        let snapshot = PowerSnapshotFile::new(&config.snapshot_path);
        Self {
            bus,
            state,
            snapshot,
            config,
            map: POWER_METER_REGISTER_MAP,
        }
    }

    /// Connect if needed, read the block, decode and apply it. On error the
    /// reading map is left exactly as it was.
    pub async fn poll_once(&mut self) -> Result<PowerReading, GatewayError> {
        if !self.bus.is_connected() {
            self.bus.connect().await?;
        }

        let registers = self
            .bus
            .read_register_block(self.config.slave_id, self.config.start_register, self.config.register_count)
            .await?;

        let decoded = decode_registers(&registers, self.map);
        let nulls = decoded.values().filter(|v| v.is_none()).count();
        if nulls > 0 {
            warn!("⚠️  {} of {} meter fields failed to decode", nulls, decoded.len());
        }

        let reading = self.state.with_power_reading(|reading| {
            reading.apply(decoded);
            reading.clone()
        });

        // The in-memory map stays authoritative when the disk write fails
        if let Err(e) = self.snapshot.write(&reading) {
            error!("❌ Error writing power snapshot {}: {}", self.snapshot.path().display(), e);
        }
        Ok(reading)
    }

    pub async fn cycle(&mut self) -> PollOutcome {
        if !self.bus.is_reachable() {
            warn!("⚠️  Meter port {} not available", self.config.serial_port);
            return PollOutcome::Unavailable;
        }

        match self.poll_once().await {
            Ok(reading) => {
                debug!("📊 Meter poll ok, {} fields", reading.len());
                PollOutcome::Updated
            }
            Err(e) if e.is_transient() => {
                warn!("⚠️  Meter read failed: {}", e);
                PollOutcome::ReadFailed
            }
            Err(e) => {
                error!("❌ Meter link error: {}, reconnecting", e);
                self.bus.close();
                PollOutcome::Reconnecting
            }
        }
    }

    pub fn delay_after(&self, outcome: PollOutcome) -> Duration {
        match outcome {
            PollOutcome::Updated => self.config.poll_interval,
            PollOutcome::ReadFailed => self.config.read_failure_backoff,
            PollOutcome::Unavailable | PollOutcome::Reconnecting => self.config.unavailable_backoff,
        }
    }

    pub async fn run(mut self) {
        info!(
            "⚡ Meter poller started: slave {} registers {}..+{} on {}",
            self.config.slave_id, self.config.start_register, self.config.register_count, self.config.serial_port
        );
        loop {
            let outcome = self.cycle().await;
            sleep(self.delay_after(outcome)).await;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::devices::power_meter::{TOTAL_ACTIVE_POWER, TOTAL_POS_ACTIVE_ENERGY};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub struct BusLog {
        pub connects: usize,
        pub closes: usize,
        pub reads: Vec<(u8, u16, u16)>,
    }

    /// Register bus fed from a queue of canned responses.
    pub struct MemoryBus {
        pub reachable: bool,
        pub connected: bool,
        pub fail_connect: bool,
        pub responses: VecDeque<Result<Vec<u16>, GatewayError>>,
        pub log: Arc<Mutex<BusLog>>,
    }

    impl MemoryBus {
        pub fn new(responses: Vec<Result<Vec<u16>, GatewayError>>) -> Self {
            Self {
                reachable: true,
                connected: false,
                fail_connect: false,
                responses: responses.into(),
                log: Arc::new(Mutex::new(BusLog::default())),
            }
        }
    }

    #[async_trait]
    impl RegisterBus for MemoryBus {
        fn is_reachable(&self) -> bool {
            self.reachable
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn connect(&mut self) -> Result<(), GatewayError> {
            self.log.lock().unwrap().connects += 1;
            if self.fail_connect {
                return Err(GatewayError::Transport("no such device".into()));
            }
            self.connected = true;
            Ok(())
        }

        fn close(&mut self) {
            self.log.lock().unwrap().closes += 1;
            self.connected = false;
        }

        async fn read_register_block(
            &mut self,
            slave_id: u8,
            start_addr: u16,
            count: u16,
        ) -> Result<Vec<u16>, GatewayError> {
            self.log.lock().unwrap().reads.push((slave_id, start_addr, count));
            self.responses
                .pop_front()
                .unwrap_or(Err(GatewayError::Timeout))
        }
    }

    pub fn registers_with(values: &[(usize, f32)]) -> Vec<u16> {
        let mut registers = vec![0u16; 88];
        for &(offset, value) in values {
            let bits = value.to_bits();
            registers[offset] = (bits >> 16) as u16;
            registers[offset + 1] = (bits & 0xFFFF) as u16;
        }
        registers
    }

    fn poller(dir: &tempfile::TempDir, bus: MemoryBus) -> (RegisterPoller, TelemetryState) {
        let state = TelemetryState::new();
        let config = MeterConfig {
            snapshot_path: dir.path().join("power_data.json"),
            ..MeterConfig::default()
        };
        (RegisterPoller::new(Box::new(bus), state.clone(), config), state)
    }

    #[tokio::test]
    async fn test_successful_cycle_updates_map_and_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let bus = MemoryBus::new(vec![Ok(registers_with(&[(10, 1.234), (20, 42.5)]))]);
        let log = bus.log.clone();
        let (mut poller, state) = poller(&dir, bus);

        assert_eq!(poller.cycle().await, PollOutcome::Updated);
        assert_eq!(log.lock().unwrap().reads, vec![(1, 66, 88)]);

        let reading = state.power_reading();
        assert_eq!(reading.len(), POWER_METER_REGISTER_MAP.len());
        assert_eq!(reading.get(TOTAL_ACTIVE_POWER), Some(1.234));
        assert_eq!(reading.get(TOTAL_POS_ACTIVE_ENERGY), Some(42.5));

        let on_disk = PowerSnapshotFile::new(dir.path().join("power_data.json")).read().unwrap();
        assert_eq!(on_disk, reading);
    }

    #[tokio::test]
    async fn test_failed_read_keeps_stale_values() {
        let dir = tempfile::tempdir().unwrap();
        let bus = MemoryBus::new(vec![
            Ok(registers_with(&[(10, 2.0)])),
            Err(GatewayError::Timeout),
            Err(GatewayError::CrcMismatch { expected: 1, received: 2 }),
        ]);
        let log = bus.log.clone();
        let (mut poller, state) = poller(&dir, bus);

        assert_eq!(poller.cycle().await, PollOutcome::Updated);
        let before = state.power_reading();

        assert_eq!(poller.cycle().await, PollOutcome::ReadFailed);
        assert_eq!(poller.cycle().await, PollOutcome::ReadFailed);
        assert_eq!(state.power_reading(), before);
        assert_eq!(state.power_reading().get(TOTAL_ACTIVE_POWER), Some(2.0));
        // Transient failures do not drop the link
        assert_eq!(log.lock().unwrap().closes, 0);
        assert_eq!(log.lock().unwrap().connects, 1);
        assert_eq!(poller.delay_after(PollOutcome::ReadFailed), Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_undecodable_field_is_null_others_update() {
        let dir = tempfile::tempdir().unwrap();
        let mut registers = registers_with(&[(10, 3.5)]);
        registers[18] = 0x7FC0;
        let (mut poller, state) = poller(&dir, MemoryBus::new(vec![Ok(registers)]));

        poller.cycle().await;
        let reading = state.power_reading();
        assert!(reading.contains("frequency"));
        assert_eq!(reading.get("frequency"), None);
        assert_eq!(reading.get(TOTAL_ACTIVE_POWER), Some(3.5));
    }

    #[tokio::test]
    async fn test_unreachable_port_skips_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let mut bus = MemoryBus::new(vec![]);
        bus.reachable = false;
        let log = bus.log.clone();
        let (mut poller, _) = poller(&dir, bus);

        assert_eq!(poller.cycle().await, PollOutcome::Unavailable);
        assert_eq!(log.lock().unwrap().connects, 0);
        assert_eq!(poller.delay_after(PollOutcome::Unavailable), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_link_error_closes_and_reconnects() {
        let dir = tempfile::tempdir().unwrap();
        let bus = MemoryBus::new(vec![
            Err(GatewayError::Transport("port vanished".into())),
            Ok(registers_with(&[(10, 1.0)])),
        ]);
        let log = bus.log.clone();
        let (mut poller, state) = poller(&dir, bus);

        assert_eq!(poller.cycle().await, PollOutcome::Reconnecting);
        assert_eq!(log.lock().unwrap().closes, 1);

        assert_eq!(poller.cycle().await, PollOutcome::Updated);
        assert_eq!(log.lock().unwrap().connects, 2);
        assert_eq!(state.power_reading().get(TOTAL_ACTIVE_POWER), Some(1.0));
    }

    #[tokio::test]
    async fn test_connect_failure_backs_off() {
        let dir = tempfile::tempdir().unwrap();
        let mut bus = MemoryBus::new(vec![]);
        bus.fail_connect = true;
        let (mut poller, state) = poller(&dir, bus);

        let outcome = poller.cycle().await;
        assert_eq!(outcome, PollOutcome::Reconnecting);
        assert_eq!(poller.delay_after(outcome), Duration::from_secs(5));
        assert!(state.power_reading().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_write_failure_still_updates_memory() {
        let dir = tempfile::tempdir().unwrap();
        let state = TelemetryState::new();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let config = MeterConfig {
            snapshot_path: blocker.join("power_data.json"),
            ..MeterConfig::default()
        };
        let bus = MemoryBus::new(vec![Ok(registers_with(&[(10, 7.0)]))]);
        let mut poller = RegisterPoller::new(Box::new(bus), state.clone(), config);

        assert_eq!(poller.cycle().await, PollOutcome::Updated);
        assert_eq!(state.power_reading().get(TOTAL_ACTIVE_POWER), Some(7.0));
    }
}
