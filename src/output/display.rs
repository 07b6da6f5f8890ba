//! Operator HMI (Nextion-style) driver.
//!
//! Each field update is an ASCII assignment such as
//! `txtFlow.txt="12.50 L/min"` followed by three `0xFF` bytes.

use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, error, info, warn};
use serialport::SerialPort;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::spawn_blocking;

use crate::config::DisplayConfig;
use crate::services::telemetry_state::{TelemetrySnapshot, TelemetryState};
use crate::utils::error::GatewayError;
use crate::utils::link::{Backoff, BackoffPolicy, LinkState, LinkStatus};

pub const COMMAND_TERMINATOR: [u8; 3] = [0xFF, 0xFF, 0xFF];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMetric {
    Frequency,
    FlowRate,
    TotalVolume,
    Power,
    Energy,
}

/// Widgets refreshed on every trigger, in send order.
pub const DISPLAY_FIELDS: [DisplayMetric; 5] = [
    DisplayMetric::Frequency,
    DisplayMetric::FlowRate,
    DisplayMetric::TotalVolume,
    DisplayMetric::Power,
    DisplayMetric::Energy,
];

impl DisplayMetric {
    pub fn widget(&self) -> &'static str {
        match self {
            DisplayMetric::Frequency => "txtFreq",
            DisplayMetric::FlowRate => "txtFlow",
            DisplayMetric::TotalVolume => "txtTotal",
            DisplayMetric::Power => "txtPower",
            DisplayMetric::Energy => "txtEnergy",
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            DisplayMetric::Frequency => "Hz",
            DisplayMetric::FlowRate => "L/min",
            DisplayMetric::TotalVolume => "L",
            DisplayMetric::Power => "kW",
            DisplayMetric::Energy => "kWh",
        }
    }

    fn decimals(&self) -> usize {
        match self {
            DisplayMetric::Frequency | DisplayMetric::FlowRate => 2,
            _ => 3,
        }
    }

    pub fn value(&self, snapshot: &TelemetrySnapshot) -> f64 {
        match self {
            DisplayMetric::Frequency => snapshot.frequency_hz,
            DisplayMetric::FlowRate => snapshot.flow_lpm,
            DisplayMetric::TotalVolume => snapshot.total_liters,
            DisplayMetric::Power => snapshot.power_kw,
            DisplayMetric::Energy => snapshot.energy_kwh,
        }
    }

    pub fn format_text(&self, snapshot: &TelemetrySnapshot) -> String {
        format!(
            "{}.txt=\"{:.*} {}\"",
            self.widget(),
            self.decimals(),
            self.value(snapshot),
            self.unit()
        )
    }
}

/// One complete command frame, terminator included.
pub fn encode_command(text: &str) -> Bytes {
    let mut frame = BytesMut::with_capacity(text.len() + COMMAND_TERMINATOR.len());
    frame.put_slice(text.as_bytes());
    frame.put_slice(&COMMAND_TERMINATOR);
    frame.freeze()
}

pub fn refresh_frames(snapshot: &TelemetrySnapshot) -> Vec<Bytes> {
    DISPLAY_FIELDS
        .iter()
        .map(|metric| encode_command(&metric.format_text(snapshot)))
        .collect()
}

/// Blocking byte sink for one open HMI port.
pub trait DisplayLink: Send {
    fn send(&mut self, frame: &[u8]) -> Result<(), GatewayError>;
}

/// Blocking open of the HMI port. Called from the blocking pool.
pub trait DisplayOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn DisplayLink>, GatewayError>;
    fn describe(&self) -> String;
}

struct SerialDisplayLink {
    port: Box<dyn SerialPort>,
}

impl DisplayLink for SerialDisplayLink {
    fn send(&mut self, frame: &[u8]) -> Result<(), GatewayError> {
        self.port.write_all(frame)?;
        self.port.flush()?;
        Ok(())
    }
}

/// Opens the HMI serial port at 8N1.
pub struct SerialDisplayOpener {
    port_name: String,
    baud_rate: u32,
}

impl SerialDisplayOpener {
    pub fn new(port_name: &str, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.to_string(),
            baud_rate,
        }
    }
}

impl DisplayOpener for SerialDisplayOpener {
    fn open(&self) -> Result<Box<dyn DisplayLink>, GatewayError> {
        let port = serialport::new(&self.port_name, self.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .timeout(Duration::from_millis(1000))
            .open()?;
        Ok(Box::new(SerialDisplayLink { port }))
    }

    fn describe(&self) -> String {
        format!("{} @ {}", self.port_name, self.baud_rate)
    }
}

/// Sends every frame in order; a failed frame does not stop the rest.
fn send_frames(link: &mut dyn DisplayLink, frames: &[Bytes]) -> usize {
    let mut failures = 0;
    for frame in frames {
        if let Err(e) = link.send(frame) {
            error!("❌ Display send error: {}", e);
            failures += 1;
        }
    }
    failures
}

/// Wakes the display task. Requests made while a refresh is running are
/// coalesced into a single follow-up refresh.
#[derive(Debug, Clone, Default)]
pub struct RefreshTrigger {
    notify: Arc<Notify>,
}

impl RefreshTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.notify.notify_one();
    }

    pub async fn wait(&self) {
        self.notify.notified().await;
    }
}

/// Owns the HMI link. Opens and writes go through `spawn_blocking`, so a
/// wedged port only ever holds a blocking-pool thread.
pub struct DisplayDriver {
    opener: Arc<dyn DisplayOpener>,
    link: Option<Box<dyn DisplayLink>>,
    status: LinkStatus,
    backoff: Backoff,
    state: TelemetryState,
    trigger: RefreshTrigger,
}

impl DisplayDriver {
    pub fn new(opener: Arc<dyn DisplayOpener>, state: TelemetryState, reopen: BackoffPolicy) -> Self {
        Self {
            opener,
            link: None,
            status: LinkStatus::new("display"),
            backoff: Backoff::new(reopen),
            state,
            trigger: RefreshTrigger::new(),
        }
    }

    pub fn from_config(config: &DisplayConfig, state: TelemetryState) -> Self {
        Self::new(
            Arc::new(SerialDisplayOpener::new(&config.serial_port, config.baud_rate)),
            state,
            config.reopen_backoff,
        )
    }

    pub fn trigger(&self) -> RefreshTrigger {
        self.trigger.clone()
    }

    pub fn status(&self) -> LinkStatus {
        self.status.clone()
    }

    /// Single open attempt; true once a link is held.
    pub async fn try_open(&mut self) -> bool {
        if self.link.is_some() {
            return true;
        }

        self.status.set(LinkState::Connecting);
        let opener = self.opener.clone();
        let opened = spawn_blocking(move || opener.open())
            .await
            .map_err(|e| GatewayError::Transport(format!("display open task failed: {}", e)))
            .and_then(|result| result);

        match opened {
            Ok(link) => {
                info!("🖥️  Display link opened on {}", self.opener.describe());
                self.link = Some(link);
                self.status.set(LinkState::Connected);
                self.backoff.reset();
                true
            }
            Err(e) => {
                self.status.set(LinkState::Disconnected);
                warn!("Display open failed on {}: {}", self.opener.describe(), e);
                false
            }
        }
    }

    /// Keeps retrying until the display link comes up.
    pub async fn ensure_link(&mut self) {
        while !self.try_open().await {
            self.backoff.wait().await;
        }
    }

    /// Pushes all fields from one snapshot. Returns how many sends failed.
    pub async fn refresh(&mut self) -> usize {
        let mut link = match self.link.take() {
            Some(link) => link,
            None => {
                debug!("Display refresh skipped, link not open");
                return DISPLAY_FIELDS.len();
            }
        };

        let frames = refresh_frames(&self.state.snapshot());
        let joined = spawn_blocking(move || {
            let failures = send_frames(link.as_mut(), &frames);
            (link, failures)
        })
        .await;

        let failures = match joined {
            Ok((link, failures)) if failures < DISPLAY_FIELDS.len() => {
                self.link = Some(link);
                return failures;
            }
            Ok((_, failures)) => failures,
            Err(e) => {
                error!("❌ Display write task failed: {}", e);
                DISPLAY_FIELDS.len()
            }
        };

        // Nothing got through: treat the port as gone and reopen it
        warn!("Display link unresponsive, closing {}", self.opener.describe());
        self.status.set(LinkState::Disconnected);
        failures
    }

    pub async fn run(mut self) {
        loop {
            self.ensure_link().await;
            self.trigger.wait().await;
            self.refresh().await;
        }
    }
}
