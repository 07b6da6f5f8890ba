pub mod client;
pub mod protocol;
pub mod crc;

pub use client::{ModbusClient, RegisterBus};
pub use protocol::ReadHoldingRequest;
pub use crc::crc16_modbus;
