//! List-ports command implementation.

use anyhow::Result;
use console::style;
use espflasher::detect_ports;
use serde_json::json;

use crate::serial::port_label;

/// List-ports command implementation.
pub(crate) fn cmd_list_ports(json: bool) -> Result<()> {
    let ports = detect_ports();

    if json {
        let entries: Vec<_> = ports
            .iter()
            .map(|port| {
                json!({
                    "name": port.name,
                    "bridge": port.bridge.name(),
                    "vid": port.vid,
                    "pid": port.pid,
                    "manufacturer": port.manufacturer,
                    "product": port.product,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if ports.is_empty() {
        eprintln!("{} No serial ports found", style("ℹ").blue());
        return Ok(());
    }

    eprintln!("{} {} serial port(s) found:", style("ℹ").blue(), ports.len());
    for port in &ports {
        println!("  {}", port_label(port));
    }
    Ok(())
}
