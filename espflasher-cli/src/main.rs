//! espflasher CLI - flash ESP-series chips and keep a flash logbook.
//!
//! The command line stands in for the tabs of the original desktop
//! tool: `flash` and `read-mac` for the main panel, `config` for the
//! settings panel, `log` for the manual logbook save.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use env_logger::Env;
use espflasher::{BaudRate, Error, FlashMode, FlashSettings};
use log::debug;
use std::env;
use std::path::PathBuf;

mod commands;
mod serial;

use commands::{cmd_config, cmd_flash, cmd_list_ports, cmd_log, cmd_read_mac};

/// espflasher - flash ESP8266/ESP32 boards via esptool.
///
/// Environment variables:
///   ESPFLASHER_PORT        - Default serial port
///   ESPFLASHER_BAUD        - Default baud rate
///   ESPFLASHER_MODE        - Default flash mode (qio, dio, dout)
///   ESPFLASHER_LOG_DIR     - Default logbook destination directory
///   ESPFLASHER_CONFIG_DIR  - Override the per-user config directory
#[derive(Parser)]
#[command(name = "espflasher")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Serial port to use (saved/auto-detected if not specified).
    #[arg(short, long, global = true, env = "ESPFLASHER_PORT")]
    pub port: Option<String>,

    /// Baud rate for data transfer.
    #[arg(short, long, global = true, env = "ESPFLASHER_BAUD")]
    pub baud: Option<BaudRate>,

    /// SPI flash mode.
    #[arg(short, long, global = true, env = "ESPFLASHER_MODE")]
    pub mode: Option<FlashMode>,

    /// Erase the whole flash before writing.
    #[arg(long, global = true, value_enum, value_name = "YES|NO")]
    pub erase: Option<EraseArg>,

    /// Override the per-user configuration directory.
    #[arg(long, global = true, value_name = "PATH", env = "ESPFLASHER_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "ESPFLASHER_NON_INTERACTIVE")]
    pub non_interactive: bool,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Erase-flash selection, mirroring the persisted "Yes"/"No" literal.
#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum EraseArg {
    /// Erase all flash before writing.
    Yes,
    /// Keep existing flash contents outside the written region.
    No,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Flash a firmware image and read the device MAC.
    Flash {
        /// Path to the firmware binary.
        firmware: PathBuf,

        /// Append the flash event to the logbook on success.
        #[arg(long)]
        save_log: bool,

        /// Destination directory for the logbook file.
        #[arg(long, value_name = "DIR", env = "ESPFLASHER_LOG_DIR")]
        log_dir: Option<PathBuf>,

        /// How long the full progress bar lingers before "Done
        /// Uploading" (milliseconds).
        #[arg(long, default_value = "1000", value_name = "MS")]
        settle_delay: u64,
    },

    /// Read the device MAC address without flashing.
    ReadMac,

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Inspect or persist flash settings.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Append a logbook row by hand.
    Log {
        /// Device MAC address to record.
        #[arg(long)]
        mac: String,

        /// Firmware file name to record.
        #[arg(long, value_name = "NAME")]
        firmware: String,

        /// Destination directory for the logbook file.
        #[arg(long, value_name = "DIR", env = "ESPFLASHER_LOG_DIR")]
        log_dir: Option<PathBuf>,
    },
}

/// Config subcommand actions.
#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective settings.
    Show,
    /// Print the config directory path.
    Path,
    /// Persist the current port/baud/mode/erase selection.
    Set,
}

/// CLI-layer errors that map to distinct exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Operator/setup problem, exit code 2.
    #[error("{0}")]
    Usage(String),
    /// Interactive prompt cancelled, exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

/// Exit code for usage/setup errors.
const EXIT_USAGE: i32 = 2;
/// Exit code when the operator cancels a prompt.
const EXIT_CANCELLED: i32 = 130;

fn main() {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(None)
        .init();

    if env::var("NO_COLOR").is_ok() || !console::Term::stderr().is_term() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    debug!("espflasher v{}", env!("CARGO_PKG_VERSION"));

    if let Err(err) = run(&cli) {
        match err.downcast_ref::<CliError>() {
            Some(CliError::Usage(message)) => {
                eprintln!("{} {message}", style("Error:").red().bold());
                std::process::exit(EXIT_USAGE);
            },
            Some(CliError::Cancelled(message)) => {
                eprintln!("{message}");
                std::process::exit(EXIT_CANCELLED);
            },
            None => {
                eprintln!("{} {err:#}", style("Error:").red().bold());
                std::process::exit(1);
            },
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Flash {
            firmware,
            save_log,
            log_dir,
            settle_delay,
        } => cmd_flash(cli, firmware, *save_log, log_dir.as_deref(), *settle_delay),
        Commands::ReadMac => cmd_read_mac(cli),
        Commands::ListPorts { json } => cmd_list_ports(*json),
        Commands::Config { action } => cmd_config(cli, action),
        Commands::Log {
            mac,
            firmware,
            log_dir,
        } => cmd_log(cli, mac, firmware, log_dir.as_deref()),
    }
}

/// Resolve the config directory, honoring the `--config-dir` override.
pub fn config_dir(cli: &Cli) -> Result<PathBuf> {
    match &cli.config_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(espflasher::config_dir()?),
    }
}

/// Load persisted settings and apply CLI overrides for this run.
///
/// Overrides are per-invocation only; nothing is written back unless
/// the operator runs `config set`.
pub fn effective_settings(cli: &Cli) -> Result<FlashSettings> {
    let dir = config_dir(cli)?;
    let mut settings = FlashSettings::load_from(&dir).map_err(map_settings_error)?;

    if cli.port.is_some() {
        settings.port = cli.port.clone();
    }
    if let Some(baud) = cli.baud {
        settings.baud = baud;
    }
    if let Some(mode) = cli.mode {
        settings.mode = mode;
    }
    if let Some(erase) = cli.erase {
        settings.erase = matches!(erase, EraseArg::Yes);
    }
    Ok(settings)
}

/// Malformed settings files are operator-fixable, so they map to the
/// usage exit code rather than a generic failure.
fn map_settings_error(err: Error) -> anyhow::Error {
    match err {
        Error::MissingField(_) => CliError::Usage(err.to_string()).into(),
        other => other.into(),
    }
}
