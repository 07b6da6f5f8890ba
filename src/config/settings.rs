use clap::ArgMatches;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::error::GatewayError;
use crate::utils::link::{millis, BackoffPolicy};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub flow: FlowConfig,
    pub display: DisplayConfig,
    pub meter: MeterConfig,
    pub bridge: BridgeConfig,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub pin: u8,                        // Header pin carrying the sensor pulses
    #[serde(with = "millis")]
    pub measure_interval: Duration,
    pub calibration_factor: f64,        // Pulses per second for 1 L/min
    #[serde(with = "millis")]
    pub checkpoint_interval: Duration,
    #[serde(with = "millis")]
    pub pull_refresh_interval: Duration,
    pub totalizer_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub serial_port: String,
    pub baud_rate: u32,
    pub reopen_backoff: BackoffPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    pub serial_port: String,
    pub baud_rate: u32,
    pub slave_id: u8,
    pub start_register: u16,
    pub register_count: u16,
    #[serde(with = "millis")]
    pub timeout: Duration,
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    #[serde(with = "millis")]
    pub read_failure_backoff: Duration,
    #[serde(with = "millis")]
    pub unavailable_backoff: Duration,
    pub snapshot_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    #[serde(with = "millis")]
    pub interval: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    #[serde(with = "millis")]
    pub keep_alive: Duration,
    #[serde(with = "millis")]
    pub publish_interval: Duration,
    pub connect_backoff: BackoffPolicy,
    pub reconnect_backoff: BackoffPolicy,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            pin: 2,
            measure_interval: Duration::from_secs(1),
            calibration_factor: 4.8,
            checkpoint_interval: Duration::from_secs(10),
            pull_refresh_interval: Duration::from_secs(600),
            totalizer_path: PathBuf::from("/root/flow-sensor-app/flow_total.json"),
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyS5".to_string(),
            baud_rate: 9600,
            reopen_backoff: BackoffPolicy::fixed(Duration::from_secs(5)),
        }
    }
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            slave_id: 1,
            start_register: 66,
            register_count: 88,
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_secs(3),
            read_failure_backoff: Duration::from_secs(3),
            unavailable_backoff: Duration::from_secs(5),
            snapshot_path: PathBuf::from("/root/flow-sensor-app/power_data.json"),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker: "broker.hivemq.com".to_string(),
            port: 1883,
            topic: "sensor/flow_energy/data".to_string(),
            client_id: "flow_energy_publisher".to_string(),
            keep_alive: Duration::from_secs(60),
            publish_interval: Duration::from_secs(5),
            connect_backoff: BackoffPolicy::fixed(Duration::from_secs(5)),
            reconnect_backoff: BackoffPolicy::exponential(
                Duration::from_secs(2),
                Duration::from_secs(5),
                2.0,
            ),
        }
    }
}

impl GatewayConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            GatewayError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        let config: GatewayConfig = toml::from_str(&content)?;
        config.validate()?;

        info!("⚙️  Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    /// Falls back to the built-in installation defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, GatewayError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Command line values win over the file.
    pub fn apply_matches(&mut self, matches: &ArgMatches) -> Result<(), GatewayError> {
        if let Some(port) = matches.get_one::<String>("meter-port") {
            self.meter.serial_port = port.clone();
        }
        if let Some(port) = matches.get_one::<String>("display-port") {
            self.display.serial_port = port.clone();
        }
        if let Some(broker) = matches.get_one::<String>("broker") {
            self.mqtt.broker = broker.clone();
        }
        self.validate()
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), GatewayError> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GatewayError::Persistence(format!("create dir: {}", e)))?;
        }

        std::fs::write(path, self.to_toml()?)
            .map_err(|e| GatewayError::Persistence(format!("write config: {}", e)))?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, GatewayError> {
        toml::to_string_pretty(self).map_err(|e| GatewayError::Config(format!("TOML error: {}", e)))
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if !(self.flow.calibration_factor.is_finite() && self.flow.calibration_factor > 0.0) {
            return Err(GatewayError::Config(format!(
                "calibration_factor must be positive, got {}",
                self.flow.calibration_factor
            )));
        }

        let intervals = [
            ("flow.measure_interval", self.flow.measure_interval),
            ("flow.checkpoint_interval", self.flow.checkpoint_interval),
            ("flow.pull_refresh_interval", self.flow.pull_refresh_interval),
            ("meter.poll_interval", self.meter.poll_interval),
            ("meter.timeout", self.meter.timeout),
            ("bridge.interval", self.bridge.interval),
            ("mqtt.publish_interval", self.mqtt.publish_interval),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(GatewayError::Config(format!("{} must be non-zero", name)));
        }

        // 125 registers is the largest block a single 0x03 request may carry
        if self.meter.register_count == 0 || self.meter.register_count > 125 {
            return Err(GatewayError::Config(format!(
                "meter.register_count must be within 1..=125, got {}",
                self.meter.register_count
            )));
        }

        if self.mqtt.topic.is_empty() {
            return Err(GatewayError::Config("mqtt.topic cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_installation() {
        let config = GatewayConfig::default();
        assert_eq!(config.flow.calibration_factor, 4.8);
        assert_eq!(config.meter.start_register, 66);
        assert_eq!(config.meter.register_count, 88);
        assert_eq!(config.mqtt.topic, "sensor/flow_energy/data");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.toml");
        std::fs::write(&path, "[flow]\ncalibration_factor = 7.5\n\n[mqtt]\nport = 8883\n").unwrap();

        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(config.flow.calibration_factor, 7.5);
        assert_eq!(config.flow.pin, 2);
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.broker, "broker.hivemq.com");
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gateway.toml");

        let mut config = GatewayConfig::default();
        config.meter.slave_id = 7;
        config.save_to_file(&path).unwrap();

        let reloaded = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(reloaded.meter.slave_id, 7);
        assert_eq!(reloaded.mqtt.reconnect_backoff, config.mqtt.reconnect_backoff);
    }

    #[test]
    fn test_command_line_overrides_file_values() {
        let matches = crate::cli::build_cli()
            .try_get_matches_from(["flow-gateway", "--meter-port", "/dev/ttyUSB3", "--broker", "10.0.0.5"])
            .unwrap();
        let mut config = GatewayConfig::default();
        config.apply_matches(&matches).unwrap();
        assert_eq!(config.meter.serial_port, "/dev/ttyUSB3");
        assert_eq!(config.mqtt.broker, "10.0.0.5");
        assert_eq!(config.display.serial_port, "/dev/ttyS5");
    }

    #[test]
    fn test_rejects_bad_calibration_factor() {
        let mut config = GatewayConfig::default();
        config.flow.calibration_factor = 0.0;
        assert!(matches!(config.validate(), Err(GatewayError::Config(_))));
    }

    #[test]
    fn test_rejects_oversize_register_block() {
        let mut config = GatewayConfig::default();
        config.meter.register_count = 200;
        assert!(config.validate().is_err());
    }
}
