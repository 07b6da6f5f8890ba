use async_trait::async_trait;
use log::{debug, error, info};
use serialport::{ClearBuffer, SerialPort};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Duration;
use tokio::task::spawn_blocking;

use super::protocol::{is_exception_header, ReadHoldingRequest, EXCEPTION_FRAME_LEN};
use crate::config::MeterConfig;
use crate::utils::error::GatewayError;
use crate::utils::link::{LinkState, LinkStatus};

/// Narrow capability the register poller needs from a field bus.
#[async_trait]
pub trait RegisterBus: Send {
    /// Cheap check that the underlying transport exists at all.
    fn is_reachable(&self) -> bool;

    fn is_connected(&self) -> bool;

    async fn connect(&mut self) -> Result<(), GatewayError>;

    fn close(&mut self);

    async fn read_register_block(
        &mut self,
        slave_id: u8,
        start_addr: u16,
        count: u16,
    ) -> Result<Vec<u16>, GatewayError>;
}

/// Blocking byte stream one request/response exchange runs over.
pub trait FrameTransport: Read + Write + Send {
    /// Drops late bytes left over from an earlier timed-out exchange.
    fn discard_input(&mut self) -> io::Result<()>;
}

impl FrameTransport for Box<dyn SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

/// Reads one reply: header first, then the rest as announced, never more
/// than the request can legally produce.
pub(crate) fn read_frame<R: Read + ?Sized>(port: &mut R, request: &ReadHoldingRequest) -> Result<Vec<u8>, GatewayError> {
    let mut frame = vec![0u8; 3];
    port.read_exact(&mut frame)?;

    let remaining = if is_exception_header(&frame) {
        EXCEPTION_FRAME_LEN - frame.len()
    } else {
        // byte count + CRC
        let announced = frame[2] as usize + 2;
        announced.min(request.expected_response_len() - frame.len())
    };

    let start = frame.len();
    frame.resize(start + remaining, 0);
    port.read_exact(&mut frame[start..])?;
    Ok(frame)
}

fn exchange(port: &mut dyn FrameTransport, request: &ReadHoldingRequest, frame: &[u8]) -> Result<Vec<u8>, GatewayError> {
    port.discard_input()?;
    port.write_all(frame)?;
    port.flush()?;
    read_frame(port, request)
}

/// Modbus RTU master over a local serial port, 8N1. Port I/O runs on the
/// blocking pool so a silent meter never holds a runtime worker.
pub struct ModbusClient {
    port_name: String,
    baud_rate: u32,
    timeout: Duration,
    port: Option<Box<dyn FrameTransport>>,
    status: LinkStatus,
}

impl ModbusClient {
    pub fn new(port_name: &str, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
            timeout,
            port: None,
            status: LinkStatus::new("meter-bus"),
        }
    }

    pub fn from_config(config: &MeterConfig) -> Self {
        Self::new(&config.serial_port, config.baud_rate, config.timeout)
    }

    #[cfg(test)]
    fn with_transport(port_name: &str, transport: Box<dyn FrameTransport>) -> Self {
        let mut client = Self::new(port_name, 9600, Duration::from_secs(2));
        client.port = Some(transport);
        client.status.set(LinkState::Connected);
        client
    }
}

#[async_trait]
impl RegisterBus for ModbusClient {
    fn is_reachable(&self) -> bool {
        Path::new(&self.port_name).exists()
    }

    fn is_connected(&self) -> bool {
        self.port.is_some() && self.status.is_connected()
    }

    async fn connect(&mut self) -> Result<(), GatewayError> {
        if self.is_connected() {
            return Ok(());
        }

        self.status.set(LinkState::Connecting);
        info!("🔌 Connecting to Modbus RTU port: {} ({} baud, 8N1)", self.port_name, self.baud_rate);

        let builder = serialport::new(&self.port_name, self.baud_rate)
            .timeout(self.timeout)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);

        let opened = spawn_blocking(move || builder.open())
            .await
            .map_err(|e| GatewayError::Transport(format!("open task failed: {}", e)))
            .and_then(|result| result.map_err(GatewayError::from));

        match opened {
            Ok(port) => {
                self.port = Some(Box::new(port));
                self.status.set(LinkState::Connected);
                info!("Modbus RTU connection established on {}", self.port_name);
                Ok(())
            }
            Err(e) => {
                error!("❌ Failed to open serial port {}: {}", self.port_name, e);
                self.status.set(LinkState::Disconnected);
                Err(GatewayError::Transport(format!("Failed to open {}: {}", self.port_name, e)))
            }
        }
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            info!("Closed Modbus RTU port {}", self.port_name);
        }
        self.status.set(LinkState::Disconnected);
    }

    async fn read_register_block(
        &mut self,
        slave_id: u8,
        start_addr: u16,
        count: u16,
    ) -> Result<Vec<u16>, GatewayError> {
        let mut port = self
            .port
            .take()
            .ok_or_else(|| GatewayError::LinkDown(format!("{} is not open", self.port_name)))?;

        let request = ReadHoldingRequest::new(slave_id, start_addr, count);
        let frame = request.encode();
        debug!("📤 TX [{}] {}", slave_id, hex::encode(&frame));

        let joined = spawn_blocking(move || {
            let result = exchange(port.as_mut(), &request, &frame);
            (port, result)
        })
        .await;

        let response = match joined {
            Ok((port, result)) => {
                self.port = Some(port);
                result?
            }
            Err(e) => {
                // The port went down with the task
                self.status.set(LinkState::Disconnected);
                return Err(GatewayError::Transport(format!("serial exchange task failed: {}", e)));
            }
        };
        debug!("📥 RX [{}] {}", slave_id, hex::encode(&response));

        request.decode_response(&response)
    }
}
