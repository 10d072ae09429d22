//! Serial port resolution for the CLI.
//!
//! Priority: explicit `--port` flag, then the saved setting, then
//! auto-selection when exactly one recognized board is attached, then
//! an interactive prompt. Non-interactive mode never prompts; an
//! ambiguous or empty port list is a usage error there.

use crate::CliError;
use anyhow::Result;
use console::style;
use dialoguer::{Error as DialoguerError, Select, theme::ColorfulTheme};
use espflasher::{DetectedPort, FlashSettings, detect_ports};
use log::{debug, info};
use std::io::IsTerminal;

/// Resolve the serial port to use for a device operation.
pub fn resolve_port(
    explicit: Option<&str>,
    settings: &FlashSettings,
    non_interactive: bool,
) -> Result<String> {
    if let Some(port) = explicit {
        return Ok(port.to_string());
    }

    if let Some(port) = &settings.port {
        debug!("Using saved port: {port}");
        return Ok(port.clone());
    }

    let ports = detect_ports();
    if ports.is_empty() {
        return Err(usage_err(
            "no serial ports found; connect a board or pass --port",
        ));
    }

    // Prefer recognized ESP-board bridges when narrowing candidates.
    let known: Vec<&DetectedPort> = ports
        .iter()
        .filter(|p| p.bridge.is_known())
        .collect();

    if known.len() == 1 {
        let port = known[0];
        info!("Auto-selected port: {} [{}]", port.name, port.bridge.name());
        return Ok(port.name.clone());
    }

    if non_interactive {
        if ports.len() == 1 {
            return Ok(ports[0].name.clone());
        }
        return Err(usage_err(
            "multiple serial ports found; pass --port to choose one",
        ));
    }

    ensure_interactive_terminal()?;
    select_port_interactive(&ports)
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "port selection needs a terminal; pass --port or --non-interactive",
        ))
    }
}

fn select_port_interactive(ports: &[DetectedPort]) -> Result<String> {
    let labels: Vec<String> = ports.iter().map(port_label).collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&labels)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => Ok(ports[index].name.clone()),
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Display label for one detected port.
pub fn port_label(port: &DetectedPort) -> String {
    let bridge = if port.bridge.is_known() {
        format!(" [{}]", style(port.bridge.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{}{bridge}{product}", port.name)
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("port selection prompt failed")
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use espflasher::BridgeKind;

    fn port(name: &str, bridge: BridgeKind) -> DetectedPort {
        let mut port = DetectedPort::unknown(name);
        port.bridge = bridge;
        port
    }

    #[test]
    fn test_explicit_port_wins() {
        let mut settings = FlashSettings::default();
        settings.port = Some("/dev/ttyUSB1".to_string());
        let resolved = resolve_port(Some("COM7"), &settings, true).unwrap();
        assert_eq!(resolved, "COM7");
    }

    #[test]
    fn test_saved_port_used_when_no_flag() {
        let mut settings = FlashSettings::default();
        settings.port = Some("/dev/ttyUSB1".to_string());
        let resolved = resolve_port(None, &settings, true).unwrap();
        assert_eq!(resolved, "/dev/ttyUSB1");
    }

    #[test]
    fn test_port_label_shows_bridge_name() {
        let label = port_label(&port("/dev/ttyUSB0", BridgeKind::Cp210x));
        assert!(label.starts_with("/dev/ttyUSB0"));
        assert!(label.contains("CP210x"));
    }

    #[test]
    fn test_port_label_unknown_without_usb_metadata() {
        let label = port_label(&port("/dev/ttyS0", BridgeKind::Unknown));
        assert_eq!(label, "/dev/ttyS0");
    }
}
