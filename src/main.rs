use anyhow::{anyhow, Context, Result};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;

use flow_gateway::cli::{build_cli, handle_subcommands};
use flow_gateway::config::{FlowConfig, GatewayConfig};
use flow_gateway::devices::PulseCounter;
use flow_gateway::modbus::ModbusClient;
use flow_gateway::output::{DisplayDriver, MqttBus, Publisher};
use flow_gateway::services::{FlowIntegrator, QuerySurface, ReadingBridge, RegisterPoller, TelemetryState};
use flow_gateway::storage::{PowerSnapshotFile, TotalizerStore};
use flow_gateway::VERSION;

fn init_logging(level: Option<&String>) {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.parse_filters(level);
    }
    builder.init();
}

#[cfg(feature = "gpio")]
fn start_pulse_input(config: &FlowConfig, counter: Arc<PulseCounter>, tasks: &mut JoinSet<()>) {
    use flow_gateway::devices::{run_pull_refresh, EdgeSource, GpioEdgeSource};
    use std::sync::Mutex;

    let mut source = match GpioEdgeSource::new(config.pin) {
        Ok(source) => source,
        Err(e) => {
            error!("❌ Flow input unavailable: {}", e);
            return;
        }
    };
    if let Err(e) = source.attach(counter) {
        error!("❌ Failed to arm {}: {}", source.describe(), e);
        return;
    }
    info!("💧 Counting falling edges on {}", source.describe());

    let source: Arc<Mutex<dyn EdgeSource>> = Arc::new(Mutex::new(source));
    tasks.spawn(run_pull_refresh(source, config.pull_refresh_interval));
}

#[cfg(not(feature = "gpio"))]
fn start_pulse_input(config: &FlowConfig, _counter: Arc<PulseCounter>, _tasks: &mut JoinSet<()>) {
    warn!(
        "⚠️  Built without the `gpio` feature: no pulse input on pin {}, flow will read zero",
        config.pin
    );
}

async fn run_gateway(config: GatewayConfig) -> Result<()> {
    info!("🚀 flow-gateway {} starting", VERSION);

    let state = TelemetryState::new();
    let counter = Arc::new(PulseCounter::new());
    let snapshot = PowerSnapshotFile::new(&config.meter.snapshot_path);
    let mut tasks = JoinSet::new();

    let display = DisplayDriver::from_config(&config.display, state.clone());
    let refresh = display.trigger();

    start_pulse_input(&config.flow, counter.clone(), &mut tasks);

    let integrator = FlowIntegrator::new(
        &config.flow,
        counter,
        state.clone(),
        TotalizerStore::new(&config.flow.totalizer_path),
    )
    .with_display(refresh.clone());

    let poller = RegisterPoller::new(
        Box::new(ModbusClient::from_config(&config.meter)),
        state.clone(),
        config.meter.clone(),
    );

    let bridge = ReadingBridge::new(snapshot.clone(), state.clone(), config.bridge.interval)
        .with_display(refresh);

    let publisher = Publisher::new(
        Box::new(MqttBus::from_config(&config.mqtt)),
        &config.mqtt.topic,
        config.mqtt.publish_interval,
    );
    let query = QuerySurface::new(state, snapshot);

    tasks.spawn(display.run());
    tasks.spawn(integrator.run());
    tasks.spawn(poller.run());
    tasks.spawn(bridge.run());
    tasks.spawn(publisher.run(query));

    // Every loop runs for the life of the process; getting here means one died
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(()) => warn!("⚠️  A gateway task exited"),
            Err(e) => {
                error!("❌ Gateway task failed: {}", e);
                return Err(anyhow!("gateway task failed: {}", e));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    init_logging(matches.get_one::<String>("log-level"));

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = GatewayConfig::load(config_path.as_deref()).context("loading configuration")?;
    config
        .apply_matches(&matches)
        .context("applying command line overrides")?;

    if handle_subcommands(&matches, &config).await? {
        return Ok(());
    }

    run_gateway(config).await
}
