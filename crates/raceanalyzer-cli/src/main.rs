//! `raceanalyzer` command-line tool
//!
//! Thin front end over `raceanalyzer_core`: resolves connection settings
//! from the saved config file and command-line flags, then runs one
//! script operation against the logger.

mod cli;

use std::fs;
use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use raceanalyzer_core::protocol::{list_ports, Connection, ConnectionConfig};
use raceanalyzer_core::sim::SimulatedDevice;

use crate::cli::{Cli, Command, ConnectionArgs, ReadArgs, WriteArgs};

/// Port name used for the in-process simulated logger
const SIMULATED_PORT: &str = "sim0";

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("error: {error:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ports => print_ports(cli.connection.simulate),
        Command::Read(args) => read_script(&connect(&cli.connection)?, args),
        Command::Write(args) => write_script(&connect(&cli.connection)?, args),
        Command::Reload => connect(&cli.connection)?
            .reload_script()
            .context("failed to reload script"),
    }
}

fn read_script(conn: &Connection, args: ReadArgs) -> Result<()> {
    let script = conn.read_script().context("failed to read script")?;
    info!("read {} bytes of script", script.len());
    match args.output {
        Some(path) => {
            fs::write(&path, &script).with_context(|| format!("failed to write {}", path.display()))
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(script.as_bytes())?;
            stdout.flush()?;
            Ok(())
        }
    }
}

fn write_script(conn: &Connection, args: WriteArgs) -> Result<()> {
    let script = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    conn.write_script(&script).context("failed to write script")?;
    info!(
        "wrote {} of {} bytes",
        script.len(),
        conn.config().limits.capacity()
    );
    if args.reload {
        conn.reload_script().context("failed to reload script")?;
    }
    Ok(())
}

/// Saved settings with command-line overrides applied
fn resolve_config(args: &ConnectionArgs) -> Result<ConnectionConfig> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => ConnectionConfig::default_path().context("no config directory")?,
    };
    let mut config = ConnectionConfig::load_or_default(&path)
        .with_context(|| format!("failed to load {}", path.display()))?;

    if let Some(port) = &args.port {
        config.port_name = port.clone();
    }
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    debug!("connection settings: {:?}", config);
    Ok(config)
}

fn connect(args: &ConnectionArgs) -> Result<Connection> {
    let mut config = resolve_config(args)?;

    let conn = if args.simulate {
        config.port_name = SIMULATED_PORT.to_string();
        let device = SimulatedDevice::new(config.limits);
        Connection::with_opener(config, device.opener())
    } else {
        Connection::new(config)
    };

    if let Some(index) = args.port_index {
        conn.set_channel_index(usize::from(index))
            .context("invalid port index")?;
    }
    Ok(conn)
}

fn print_ports(simulate: bool) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if simulate {
        writeln!(stdout, "{SIMULATED_PORT}\tsimulated logger")?;
        return Ok(());
    }

    let ports = list_ports();
    if ports.is_empty() {
        eprintln!("no serial ports found");
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => writeln!(
                stdout,
                "{}\t{:04x}:{:04x}\t{}",
                port.name,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            )?,
            _ => writeln!(stdout, "{}", port.name)?,
        }
    }
    Ok(())
}
