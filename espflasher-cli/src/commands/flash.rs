//! Flash and read-mac command implementations.

use anyhow::Result;
use console::style;
use espflasher::{
    Error, Esptool, FlashEvent, Logbook, UploadEvent, Uploader,
};
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use std::path::Path;
use std::thread;
use std::time::Duration;

use crate::serial::resolve_port;
use crate::{Cli, CliError, config_dir, effective_settings};

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    firmware: &Path,
    save_log: bool,
    log_dir: Option<&Path>,
    settle_delay: u64,
) -> Result<()> {
    if !firmware.is_file() {
        return Err(CliError::Usage(format!(
            "firmware file not found: {}",
            firmware.display()
        ))
        .into());
    }

    let mut settings = effective_settings(cli)?;
    settings.port = Some(resolve_port(
        cli.port.as_deref(),
        &settings,
        cli.non_interactive,
    )?);
    settings.firmware = Some(firmware.to_path_buf());

    if !cli.quiet {
        eprintln!(
            "{} Flashing {} via {} at {} baud ({} mode{})",
            style("📦").cyan(),
            firmware.display(),
            settings.port.as_deref().unwrap_or("?"),
            settings.baud,
            settings.mode,
            if settings.erase { ", full erase" } else { "" }
        );
    }

    let uploader = Uploader::new();
    let handle = uploader.start(&settings).map_err(map_upload_error)?;

    // Progress bar fed by workflow events
    let pb = if cli.quiet || !console::Term::stderr().is_term() {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(100);
        #[allow(clippy::unwrap_used)] // Static template string
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );
        pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        pb
    };

    for event in handle.events().iter() {
        match event {
            UploadEvent::Progress(percent) => pb.set_position(u64::from(percent)),
            UploadEvent::Output { text, .. } => {
                // The raw tool output is visible at -v; the replace flag
                // is irrelevant there since each line logs once.
                if !text.trim().is_empty() {
                    debug!("esptool: {text}");
                }
            },
            UploadEvent::Completed { .. } | UploadEvent::Failed { .. } => {},
        }
    }

    match handle.wait() {
        Ok(outcome) => {
            pb.set_position(100);
            pb.set_message("complete");
            // UX smoothing: let the full bar register before it clears.
            thread::sleep(Duration::from_millis(settle_delay));
            pb.finish_and_clear();

            if !cli.quiet {
                eprintln!("{} Done Uploading", style("✓").green().bold());
            }
            println!("MAC: {}", outcome.mac);

            if save_log {
                let dest = log_dir.unwrap_or_else(|| Path::new("."));
                let logbook = Logbook::new(config_dir(cli)?);
                let sequence = logbook.append(&FlashEvent::from_outcome(&outcome), dest)?;
                if !cli.quiet {
                    eprintln!(
                        "{} Logged entry {} in {}",
                        style("✓").green(),
                        sequence,
                        Logbook::log_path(dest).display()
                    );
                }
            }
            Ok(())
        },
        Err(err) => {
            pb.abandon();
            Err(map_upload_error(err))
        },
    }
}

/// Read-mac command implementation.
pub(crate) fn cmd_read_mac(cli: &Cli) -> Result<()> {
    let settings = effective_settings(cli)?;
    let port = resolve_port(cli.port.as_deref(), &settings, cli.non_interactive)?;

    if !cli.quiet {
        eprintln!(
            "{} Reading MAC via {} at {} baud",
            style("🔌").cyan(),
            port,
            settings.baud
        );
    }

    let tool = Esptool::locate().map_err(map_upload_error)?;
    let mac = tool.read_mac(&port, settings.baud)?;
    println!("{mac}");
    Ok(())
}

/// Map operator-fixable workflow errors to the usage exit code.
fn map_upload_error(err: Error) -> anyhow::Error {
    match err {
        Error::NoPortSelected
        | Error::NoFirmwareSelected
        | Error::ToolNotFound
        | Error::UploadInProgress => CliError::Usage(err.to_string()).into(),
        other => other.into(),
    }
}
