//! Command-line interface definition.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Read, write and reload the script stored on a RaceAnalyzer logger.
#[derive(Parser, Debug)]
#[command(name = "raceanalyzer")]
#[command(about = "Script transfer for RaceAnalyzer data loggers")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Settings that override the saved connection file.
#[derive(Args, Debug, Default)]
pub struct ConnectionArgs {
    /// Serial device, e.g. /dev/ttyUSB0 or COM3.
    #[arg(long, global = true, conflicts_with = "port_index")]
    pub port: Option<String>,

    /// Zero-based port number (COM1 is 0 on Windows, /dev/ttyS0 elsewhere).
    #[arg(long, global = true, value_parser = clap::value_parser!(u8).range(0..20))]
    pub port_index: Option<u8>,

    /// Baud rate.
    #[arg(long, global = true)]
    pub baud: Option<u32>,

    /// Per-line timeout in milliseconds.
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    /// Connection settings file (defaults to the user config directory).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Talk to an in-process simulated logger instead of a serial port.
    #[arg(long, global = true)]
    pub simulate: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List serial ports.
    Ports,

    /// Read the script from the logger.
    Read(ReadArgs),

    /// Write a script file to the logger.
    Write(WriteArgs),

    /// Ask the logger to restart its script.
    Reload,
}

/// Arguments for `read`.
#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Write the script here instead of stdout.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Arguments for `write`.
#[derive(Args, Debug)]
pub struct WriteArgs {
    /// Script file to upload.
    pub file: PathBuf,

    /// Reload the script after writing it.
    #[arg(long)]
    pub reload: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn verify_cli_structure() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_read_with_port_and_output() {
        let cli = Cli::try_parse_from([
            "raceanalyzer",
            "--port",
            "/dev/ttyUSB0",
            "read",
            "-o",
            "script.lua",
        ])
        .unwrap();
        assert_eq!(cli.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        match cli.command {
            Command::Read(args) => assert_eq!(args.output, Some(PathBuf::from("script.lua"))),
            other => panic!("expected read command, got {:?}", other),
        }
    }

    #[test]
    fn parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "raceanalyzer",
            "write",
            "new.lua",
            "--reload",
            "--port-index",
            "2",
            "--timeout-ms",
            "500",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.connection.port_index, Some(2));
        assert_eq!(cli.connection.timeout_ms, Some(500));
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Write(args) => {
                assert_eq!(args.file, PathBuf::from("new.lua"));
                assert!(args.reload);
            }
            other => panic!("expected write command, got {:?}", other),
        }
    }

    #[test]
    fn reject_port_index_out_of_range() {
        assert!(Cli::try_parse_from(["raceanalyzer", "--port-index", "20", "reload"]).is_err());
    }

    #[test]
    fn reject_port_and_port_index_together() {
        let result =
            Cli::try_parse_from(["raceanalyzer", "--port", "COM3", "--port-index", "1", "reload"]);
        assert!(result.is_err());
    }

    #[test]
    fn write_requires_file() {
        assert!(Cli::try_parse_from(["raceanalyzer", "write"]).is_err());
    }

    #[test]
    fn parse_simulate_ports() {
        let cli = Cli::try_parse_from(["raceanalyzer", "--simulate", "ports"]).unwrap();
        assert!(cli.connection.simulate);
        assert!(matches!(cli.command, Command::Ports));
    }
}
