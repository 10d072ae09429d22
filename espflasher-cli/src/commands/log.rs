//! Manual logbook append command.

use anyhow::Result;
use console::style;
use espflasher::{FlashEvent, Logbook, normalize_mac};
use std::path::Path;

use crate::{Cli, CliError, config_dir};

/// Log command implementation.
pub(crate) fn cmd_log(
    cli: &Cli,
    mac: &str,
    firmware: &str,
    log_dir: Option<&Path>,
) -> Result<()> {
    let mac = normalize_mac(mac).ok_or_else(|| {
        CliError::Usage(format!(
            "invalid MAC address '{mac}' (expected e.g. 24:0A:C4:01:AB:EF)"
        ))
    })?;

    let event = FlashEvent {
        mac,
        firmware_file_name: firmware.to_string(),
        date: chrono::Local::now().date_naive(),
    };

    let dest = log_dir.unwrap_or_else(|| Path::new("."));
    let logbook = Logbook::new(config_dir(cli)?);
    let sequence = logbook.append(&event, dest)?;

    if !cli.quiet {
        eprintln!(
            "{} Logged entry {} in {}",
            style("✓").green(),
            sequence,
            Logbook::log_path(dest).display()
        );
    }
    Ok(())
}
