use std::{path::PathBuf, process::ExitCode, sync::atomic::AtomicBool};

use clap::Parser;
use e3631_psud::{
    Error, Result,
    config::Config,
    control::Controller,
    psu::E3631,
    serial::{SerialPortLine, find_device},
    storage::MemoryStorage,
    types::CommandKind,
};
use strum::IntoEnumIterator;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "psud", version, about = "Agilent E3631 power supply daemon")]
struct Args {
    /// YAML configuration file. Built-in defaults are used without one.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial device, or `auto` to search every port.
    #[arg(short, long)]
    port: Option<String>,

    /// Log filter used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Queue a command before the loop starts, e.g. `--command "SET VOLTAGE=3.3"`.
    #[arg(long = "command", value_name = "KIND=VALUE", value_parser = parse_command)]
    commands: Vec<(CommandKind, String)>,
}

fn parse_command(arg: &str) -> core::result::Result<(CommandKind, String), String> {
    let (kind, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected KIND=VALUE, got `{arg}`"))?;
    let kind = kind.trim();
    let kind = kind.parse::<CommandKind>().map_err(|_| {
        let known: Vec<String> = CommandKind::iter().map(|k| k.to_string()).collect();
        format!("unknown command kind `{kind}`, expected one of: {}", known.join(", "))
    })?;
    Ok((kind, value.trim().to_string()))
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "psud terminated");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(port) = args.port {
        config.port = port;
    }

    if config.is_auto_port() {
        config.port = find_device(config.baud_rate)
            .ok_or_else(|| Error::Config("no E3631 found on any serial port".into()))?;
    }
    info!(port = %config.port, baud_rate = config.baud_rate, "starting");

    let line = SerialPortLine::open(&config.port, config.baud_rate)?;
    let psu: E3631<SerialPortLine> = E3631::connect(line, &config)?;

    let mut storage = MemoryStorage::new();
    for (kind, value) in args.commands {
        let id = storage.submit(kind, value);
        info!(id, %kind, "command queued");
    }

    // Stopping is left to the process supervisor's signal.
    let shutdown = AtomicBool::new(false);
    Controller::from_config(psu, storage, &config).run(&shutdown)
}
