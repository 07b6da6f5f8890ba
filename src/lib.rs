//! Edge telemetry gateway for a flow sensor and a three-phase power meter.
//!
//! Pulses from the flow sensor are integrated into a flow rate and a
//! crash-safe volume total, the meter is polled over Modbus RTU, and the
//! combined readings are pushed to an operator display and an MQTT broker.

pub mod cli;
pub mod config;
pub mod devices;
pub mod modbus;
pub mod output;
pub mod services;
pub mod storage;
pub mod utils;

// Re-export commonly used types
pub use config::GatewayConfig;
pub use devices::{PowerReading, PulseCounter};
pub use modbus::{ModbusClient, RegisterBus};
pub use output::{DisplayDriver, MessageBus, MqttBus, Publisher};
pub use services::{FlowIntegrator, QuerySurface, ReadingBridge, RegisterPoller, TelemetryState};
pub use storage::{PowerSnapshotFile, TotalizerStore};
pub use utils::error::GatewayError;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
