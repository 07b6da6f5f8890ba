pub mod commands;

use clap::{Arg, Command};

pub use commands::handle_subcommands;

pub fn build_cli() -> Command {
    Command::new("flow-gateway")
        .version(crate::VERSION)
        .about("Flow and power telemetry gateway")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file (built-in defaults when omitted)")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .help("Log filter, overrides RUST_LOG")
                .global(true),
        )
        .arg(
            Arg::new("meter-port")
                .long("meter-port")
                .value_name("PATH")
                .help("Serial device of the power meter bus")
                .global(true),
        )
        .arg(
            Arg::new("display-port")
                .long("display-port")
                .value_name("PATH")
                .help("Serial device of the HMI")
                .global(true),
        )
        .arg(
            Arg::new("broker")
                .long("broker")
                .value_name("HOST")
                .help("MQTT broker host")
                .global(true),
        )
        .subcommand(Command::new("run").about("Run the gateway (default)"))
        .subcommand(Command::new("reset-totalizer").about("Reset the persisted volume total to zero"))
        .subcommand(Command::new("read-meter").about("Poll the power meter once and print the decoded fields"))
        .subcommand(Command::new("show-config").about("Print the effective configuration as TOML"))
}
