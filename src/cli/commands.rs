use clap::ArgMatches;
use log::info;

use crate::config::GatewayConfig;
use crate::devices::PowerReading;
use crate::modbus::{ModbusClient, RegisterBus};
use crate::services::{RegisterPoller, TelemetryState};
use crate::storage::TotalizerStore;
use crate::utils::error::GatewayError;

/// Runs a one-shot subcommand. Returns `false` when the gateway itself
/// should start.
pub async fn handle_subcommands(matches: &ArgMatches, config: &GatewayConfig) -> Result<bool, GatewayError> {
    match matches.subcommand_name() {
        Some("reset-totalizer") => {
            info!("🔄 Executing reset-totalizer...");
            reset_totalizer(config)?;
            println!("✅ Totalizer at {} reset to 0 L", config.flow.totalizer_path.display());
            Ok(true)
        }
        Some("read-meter") => {
            info!("🔍 Executing read-meter...");
            let reading = read_meter(config).await?;
            println!("{}", serde_json::to_string_pretty(&reading)?);
            Ok(true)
        }
        Some("show-config") => {
            print!("{}", config.to_toml()?);
            Ok(true)
        }
        _ => Ok(false),
    }
}

/// The only path that may move the total backwards.
pub fn reset_totalizer(config: &GatewayConfig) -> Result<(), GatewayError> {
    TotalizerStore::new(&config.flow.totalizer_path).save(0.0)
}

pub async fn read_meter(config: &GatewayConfig) -> Result<PowerReading, GatewayError> {
    let client = ModbusClient::from_config(&config.meter);
    if !client.is_reachable() {
        return Err(GatewayError::LinkDown(format!("{} not available", config.meter.serial_port)));
    }

    let mut poller = RegisterPoller::new(Box::new(client), TelemetryState::new(), config.meter.clone());
    poller.poll_once().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::build_cli;

    fn config_in(dir: &tempfile::TempDir) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.flow.totalizer_path = dir.path().join("flow_total.json");
        config.meter.serial_port = dir.path().join("ttyUSB-missing").display().to_string();
        config
    }

    #[tokio::test]
    async fn test_reset_totalizer_writes_zero() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let store = TotalizerStore::new(&config.flow.totalizer_path);
        store.save(1234.5).unwrap();

        let matches = build_cli()
            .try_get_matches_from(["flow-gateway", "reset-totalizer"])
            .unwrap();
        assert!(handle_subcommands(&matches, &config).await.unwrap());
        assert_eq!(store.load(), 0.0);
    }

    #[tokio::test]
    async fn test_read_meter_without_port_is_link_down() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        assert!(matches!(read_meter(&config).await, Err(GatewayError::LinkDown(_))));
    }

    #[tokio::test]
    async fn test_run_is_not_a_one_shot_command() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        for args in [vec!["flow-gateway"], vec!["flow-gateway", "run"]] {
            let matches = build_cli().try_get_matches_from(args).unwrap();
            assert!(!handle_subcommands(&matches, &config).await.unwrap());
        }
    }
}
