//! Serial port discovery and classification.
//!
//! Enumeration is a read-only OS query with no side effects; an empty
//! result is a valid answer (no boards attached), not an error.

use log::{debug, trace};

/// Known USB devices commonly found on ESP development boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeKind {
    /// Espressif native USB (USB-Serial/JTAG peripheral).
    Espressif,
    /// CH340/CH341 USB-to-Serial converter.
    Ch340,
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// FTDI FT232/FT2232 USB-to-Serial converter.
    Ftdi,
    /// Prolific PL2303 USB-to-Serial converter.
    Prolific,
    /// Unknown device.
    Unknown,
}

/// Known USB VID/PID pairs for bridges shipped on ESP boards.
const KNOWN_USB_DEVICES: &[(u16, &[u16], BridgeKind)] = &[
    (0x303A, &[], BridgeKind::Espressif),
    (
        0x1A86,
        &[0x7523, 0x7522, 0x5523, 0x55D4],
        BridgeKind::Ch340,
    ),
    (0x10C4, &[0xEA60, 0xEA70, 0xEA71], BridgeKind::Cp210x),
    (0x0403, &[0x6001, 0x6010, 0x6014, 0x6015], BridgeKind::Ftdi),
    (0x067B, &[0x2303, 0x23A3, 0x23C3], BridgeKind::Prolific),
];

impl BridgeKind {
    /// Classify a USB VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, kind) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *kind;
            }
        }
        Self::Unknown
    }

    /// Human-readable name for display.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Espressif => "Espressif",
            Self::Ch340 => "CH340/CH341",
            Self::Cp210x => "CP210x",
            Self::Ftdi => "FTDI",
            Self::Prolific => "PL2303",
            Self::Unknown => "Unknown",
        }
    }

    /// Whether this is a recognized ESP-board bridge.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// A discovered serial port with USB metadata where available.
#[derive(Debug, Clone)]
pub struct DetectedPort {
    /// Port path (e.g. "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified bridge kind.
    pub bridge: BridgeKind,
    /// USB Vendor ID, if a USB port.
    pub vid: Option<u16>,
    /// USB Product ID, if a USB port.
    pub pid: Option<u16>,
    /// Manufacturer string, if reported.
    pub manufacturer: Option<String>,
    /// Product string, if reported.
    pub product: Option<String>,
}

impl DetectedPort {
    /// A port known only by name (e.g. user-specified, not enumerated).
    pub fn unknown(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bridge: BridgeKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
        }
    }
}

/// Detect all attached serial ports, sorted by name.
pub fn detect_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let mut detected = DetectedPort::unknown(info.port_name);
                if let serialport::SerialPortType::UsbPort(usb) = info.port_type {
                    detected.bridge = BridgeKind::from_vid_pid(usb.vid, usb.pid);
                    detected.vid = Some(usb.vid);
                    detected.pid = Some(usb.pid);
                    detected.manufacturer = usb.manufacturer;
                    detected.product = usb.product;
                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, {:?})",
                        detected.name,
                        usb.vid,
                        usb.pid,
                        detected.bridge
                    );
                }
                result.push(detected);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    result.sort_by(|a, b| a.name.cmp(&b.name));
    result
}

/// Names of all attached serial ports in ascending lexical order.
pub fn list_port_names() -> Vec<String> {
    detect_ports()
        .into_iter()
        .map(|port| port.name)
        .collect()
}
