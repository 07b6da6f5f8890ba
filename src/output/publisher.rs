use async_trait::async_trait;
use log::{debug, error, info, warn};
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::config::MqttConfig;
use crate::devices::PowerReading;
use crate::services::query::{FlowData, QuerySurface};
use crate::utils::error::GatewayError;
use crate::utils::link::{Backoff, BackoffPolicy, LinkState, LinkStatus};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Narrow capability the publisher needs from a message broker.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Returns once a session is up; retries internally until then.
    async fn connect(&mut self) -> Result<(), GatewayError>;

    fn is_connected(&self) -> bool;

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<(), GatewayError>;
}

/// MQTT session over rumqttc. The event loop runs in its own task and
/// reconnects on its own after the first successful connect.
pub struct MqttBus {
    broker: String,
    port: u16,
    client_id: String,
    keep_alive: Duration,
    connect_backoff: BackoffPolicy,
    reconnect_backoff: BackoffPolicy,
    client: Option<AsyncClient>,
    status: LinkStatus,
    event_task: Option<JoinHandle<()>>,
}

impl MqttBus {
    pub fn from_config(config: &MqttConfig) -> Self {
        Self {
            broker: config.broker.clone(),
            port: config.port,
            client_id: config.client_id.clone(),
            keep_alive: config.keep_alive,
            connect_backoff: config.connect_backoff,
            reconnect_backoff: config.reconnect_backoff,
            client: None,
            status: LinkStatus::new("broker"),
            event_task: None,
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.broker, self.port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options
    }

    /// Drives the event loop until the broker acknowledges the session.
    async fn await_connack(eventloop: &mut EventLoop) -> Result<(), GatewayError> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(GatewayError::Transport(format!("MQTT connect: {}", e))),
            }
        }
    }

    async fn drive_event_loop(mut eventloop: EventLoop, status: LinkStatus, policy: BackoffPolicy) {
        let mut backoff = Backoff::new(policy);
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    if status.set(LinkState::Connected) != LinkState::Connected {
                        info!("✅ Reconnected to MQTT broker");
                    }
                    backoff.reset();
                }
                Ok(notification) => debug!("MQTT event: {:?}", notification),
                Err(e) => {
                    if status.set(LinkState::Connecting) == LinkState::Connected {
                        warn!("⚠️  MQTT disconnected: {}, retrying...", e);
                    }
                    let delay = backoff.next_delay();
                    debug!("MQTT reconnect attempt {} in {:?}", backoff.attempts(), delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn connect(&mut self) -> Result<(), GatewayError> {
        if self.client.is_some() {
            return Ok(());
        }

        let mut backoff = Backoff::new(self.connect_backoff);
        loop {
            self.status.set(LinkState::Connecting);
            let (client, mut eventloop) = AsyncClient::new(self.options(), 10);
            match Self::await_connack(&mut eventloop).await {
                Ok(()) => {
                    self.status.set(LinkState::Connected);
                    info!("📡 Connected to MQTT broker {}:{}", self.broker, self.port);
                    self.event_task = Some(tokio::spawn(Self::drive_event_loop(
                        eventloop,
                        self.status.clone(),
                        self.reconnect_backoff,
                    )));
                    self.client = Some(client);
                    return Ok(());
                }
                Err(e) => {
                    self.status.set(LinkState::Disconnected);
                    error!("❌ MQTT connect error: {}", e);
                    backoff.wait().await;
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.status.is_connected()
    }

    async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<(), GatewayError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| GatewayError::LinkDown("MQTT session not started".to_string()))?;
        if !self.status.is_connected() {
            return Err(GatewayError::LinkDown(format!("broker {} is {}", self.broker, self.status.get())));
        }
        client.try_publish(topic, qos, retain, payload)?;
        Ok(())
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        if let Some(task) = self.event_task.take() {
            task.abort();
        }
    }
}

/// Message body published on every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishPayload {
    pub flow: FlowData,
    pub power: PowerReading,
    pub timestamp: String,
}

impl PublishPayload {
    pub fn now(flow: FlowData, power: PowerReading) -> Self {
        Self {
            flow,
            power,
            timestamp: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}

pub struct Publisher {
    bus: Box<dyn MessageBus>,
    topic: String,
    interval: Duration,
}

impl Publisher {
    pub fn new(bus: Box<dyn MessageBus>, topic: &str, interval: Duration) -> Self {
        Self {
            bus,
            topic: topic.to_string(),
            interval,
        }
    }

    pub async fn connect(&mut self) -> Result<(), GatewayError> {
        self.bus.connect().await
    }

    /// At-least-once and retained, so a new subscriber gets the last value.
    ///
    /// Nothing is queued while the broker session is reconnecting: the call
    /// fails with `LinkDown` and that snapshot is dropped. The next publish
    /// after reconnect replaces the retained value.
    pub async fn publish(&self, flow: FlowData, power: PowerReading) -> Result<(), GatewayError> {
        let payload = serde_json::to_vec(&PublishPayload::now(flow, power))?;
        self.bus.publish(&self.topic, payload, QoS::AtLeastOnce, true).await?;
        debug!("📤 Published to {}", self.topic);
        Ok(())
    }

    pub async fn run(mut self, query: QuerySurface) {
        if let Err(e) = self.connect().await {
            error!("❌ MQTT publisher could not start: {}", e);
            return;
        }

        info!("📤 Publishing to {} every {:?}", self.topic, self.interval);
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.publish(query.flow_data(), query.power_data()).await {
                warn!("⚠️  Publish error: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::power_meter::TOTAL_ACTIVE_POWER;
    use crate::services::telemetry_state::TelemetryState;
    use crate::storage::PowerSnapshotFile;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    struct Sent {
        topic: String,
        payload: Vec<u8>,
        qos: QoS,
        retain: bool,
    }

    #[derive(Default)]
    struct RecordingBus {
        connected: Arc<AtomicBool>,
        connects: Arc<Mutex<usize>>,
        sent: Arc<Mutex<Vec<Sent>>>,
    }

    #[async_trait]
    impl MessageBus for RecordingBus {
        async fn connect(&mut self) -> Result<(), GatewayError> {
            *self.connects.lock().unwrap() += 1;
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected.load(Ordering::SeqCst)
        }

        async fn publish(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<(), GatewayError> {
            if !self.is_connected() {
                return Err(GatewayError::LinkDown("test bus".into()));
            }
            self.sent.lock().unwrap().push(Sent {
                topic: topic.to_string(),
                payload,
                qos,
                retain,
            });
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_published_message_round_trips() {
        let bus = RecordingBus::default();
        let sent = bus.sent.clone();
        let mut publisher = Publisher::new(Box::new(bus), "sensor/flow_energy/data", Duration::from_secs(5));
        publisher.connect().await.unwrap();

        let flow = FlowData {
            flow_lpm: 2.5,
            total_liters: 10.123456,
        };
        let power: PowerReading = [(TOTAL_ACTIVE_POWER.to_string(), Some(1.234))].into_iter().collect();
        publisher.publish(flow, power).await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].topic, "sensor/flow_energy/data");
        assert_eq!(sent[0].qos, QoS::AtLeastOnce);
        assert!(sent[0].retain);

        let message: serde_json::Value = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(message["flow"], json!({"flow_lpm": 2.5, "total_liters": 10.123456}));
        assert_eq!(message["power"], json!({"total_active_power": 1.234}));

        let timestamp = message["timestamp"].as_str().unwrap();
        assert_eq!(timestamp.len(), 19);
        assert!(chrono::NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).is_ok());
    }

    #[tokio::test]
    async fn test_publish_without_session_is_link_down() {
        let publisher = Publisher::new(Box::new(RecordingBus::default()), "t", Duration::from_secs(5));
        let flow = FlowData {
            flow_lpm: 0.0,
            total_liters: 0.0,
        };
        let result = publisher.publish(flow, PowerReading::new()).await;
        assert!(matches!(result, Err(GatewayError::LinkDown(_))));
    }

    #[tokio::test]
    async fn test_snapshots_during_outage_are_not_replayed() {
        let bus = RecordingBus::default();
        let link = bus.connected.clone();
        let sent = bus.sent.clone();
        let mut publisher = Publisher::new(Box::new(bus), "t", Duration::from_secs(5));
        publisher.connect().await.unwrap();

        let flow = |total_liters| FlowData {
            flow_lpm: 1.0,
            total_liters,
        };
        publisher.publish(flow(1.0), PowerReading::new()).await.unwrap();

        link.store(false, Ordering::SeqCst);
        let dropped = publisher.publish(flow(2.0), PowerReading::new()).await;
        assert!(matches!(dropped, Err(GatewayError::LinkDown(_))));

        link.store(true, Ordering::SeqCst);
        publisher.publish(flow(3.0), PowerReading::new()).await.unwrap();

        let totals: Vec<f64> = sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| serde_json::from_slice::<PublishPayload>(&m.payload).unwrap().flow.total_liters)
            .collect();
        assert_eq!(totals, vec![1.0, 3.0]);
    }

    #[tokio::test]
    async fn test_mqtt_bus_refuses_publish_before_connect() {
        let bus = MqttBus::from_config(&MqttConfig::default());
        assert!(!bus.is_connected());
        let result = bus.publish("t", b"{}".to_vec(), QoS::AtLeastOnce, true).await;
        assert!(matches!(result, Err(GatewayError::LinkDown(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_publishes_on_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let state = TelemetryState::new();
        state.update_flow(10.0, 2.083333333, 5.5);
        let query = QuerySurface::new(state, PowerSnapshotFile::new(dir.path().join("power_data.json")));

        let bus = RecordingBus::default();
        let sent = bus.sent.clone();
        let connects = bus.connects.clone();
        let publisher = Publisher::new(Box::new(bus), "sensor/flow_energy/data", Duration::from_secs(5));
        let task = tokio::spawn(publisher.run(query));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(*connects.lock().unwrap(), 1);

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 3);
        let message: PublishPayload = serde_json::from_slice(&sent[2].payload).unwrap();
        assert_eq!(message.flow.flow_lpm, 2.0833);
        assert_eq!(message.flow.total_liters, 5.5);
        assert!(message.power.is_empty());
        drop(sent);
        task.abort();
    }
}
