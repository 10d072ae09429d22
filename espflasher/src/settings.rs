//! Persisted flash settings and the logbook row counter.
//!
//! Two small JSON records live in the per-user config directory
//! (resolved via `directories`):
//!
//! - `settings.json` — `{ "port": string|null, "baud": string|number,
//!   "mode": "qio"|"dio"|"dout", "erase": "Yes"|"No" }`
//! - `counter.json` — `{ "row": integer }`
//!
//! A missing file loads as defaults. A present file must carry every
//! required key or loading fails hard with [`Error::MissingField`];
//! there is no silent fallback to defaults for malformed files.

use crate::error::{Error, Result};
use log::debug;
use serde_json::{Value, json};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// File name of the persisted settings record.
pub const SETTINGS_FILE: &str = "settings.json";
/// File name of the persisted row-counter record.
pub const COUNTER_FILE: &str = "counter.json";

/// Serial baud rates supported by the flasher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BaudRate {
    /// 9600 baud.
    B9600,
    /// 57600 baud.
    B57600,
    /// 74880 baud (ESP8266 boot log rate).
    B74880,
    /// 115200 baud.
    B115200,
    /// 230400 baud.
    B230400,
    /// 460800 baud.
    B460800,
    /// 921600 baud (default).
    #[default]
    B921600,
}

impl BaudRate {
    /// All supported rates, ascending.
    pub const ALL: &'static [Self] = &[
        Self::B9600,
        Self::B57600,
        Self::B74880,
        Self::B115200,
        Self::B230400,
        Self::B460800,
        Self::B921600,
    ];

    /// The numeric rate.
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            Self::B9600 => 9600,
            Self::B57600 => 57600,
            Self::B74880 => 74880,
            Self::B115200 => 115200,
            Self::B230400 => 230400,
            Self::B460800 => 460800,
            Self::B921600 => 921600,
        }
    }

    /// Look up a supported rate by its numeric value.
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|rate| rate.as_u32() == value)
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u32())
    }
}

impl FromStr for BaudRate {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let value: u32 = s
            .trim()
            .parse()
            .map_err(|_| format!("invalid baud rate: '{s}'"))?;
        Self::from_u32(value).ok_or_else(|| {
            format!(
                "unsupported baud rate {value} (supported: {})",
                BaudRate::ALL
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })
    }
}

/// SPI flash mode passed to esptool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashMode {
    /// Quad I/O.
    Qio,
    /// Dual I/O (default, widest compatibility).
    #[default]
    Dio,
    /// Dual output.
    Dout,
}

impl FlashMode {
    /// The mode string esptool expects.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Qio => "qio",
            Self::Dio => "dio",
            Self::Dout => "dout",
        }
    }
}

impl fmt::Display for FlashMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlashMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "qio" => Ok(Self::Qio),
            "dio" => Ok(Self::Dio),
            "dout" => Ok(Self::Dout),
            other => Err(format!("invalid flash mode: '{other}' (qio, dio, dout)")),
        }
    }
}

/// User-selected flash settings.
///
/// Port, baud, mode and erase flag are persisted; the firmware path is
/// per-run state and is never written to disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlashSettings {
    /// Selected serial port, if any.
    pub port: Option<String>,
    /// Transfer baud rate.
    pub baud: BaudRate,
    /// SPI flash mode.
    pub mode: FlashMode,
    /// Erase the whole flash before writing.
    pub erase: bool,
    /// Firmware image to flash, if any.
    pub firmware: Option<PathBuf>,
}

impl FlashSettings {
    /// Load settings from the per-user config directory.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_dir()?)
    }

    /// Load settings from `dir`. A missing file yields defaults.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        if !path.exists() {
            debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let text =
            fs::read_to_string(&path).map_err(|e| Error::file_access(&path, e))?;
        let data: Value = serde_json::from_str(&text)
            .map_err(|e| Error::MissingField(format!("invalid JSON: {e}")))?;

        let port = match require_field(&data, "port")? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => {
                return Err(Error::MissingField(format!(
                    "field 'port' must be a string or null, got {other}"
                )));
            },
        };

        // Historical files stored the baud as a string; accept both.
        let baud = match require_field(&data, "baud")? {
            Value::Number(n) => n
                .as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .and_then(BaudRate::from_u32),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| Error::MissingField("field 'baud' is not a supported rate".into()))?;

        let mode = require_field(&data, "mode")?
            .as_str()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| Error::MissingField("field 'mode' is not qio/dio/dout".into()))?;

        let erase = match require_field(&data, "erase")?.as_str() {
            Some("Yes") => true,
            Some("No") => false,
            _ => {
                return Err(Error::MissingField(
                    "field 'erase' must be \"Yes\" or \"No\"".into(),
                ));
            },
        };

        debug!("Loaded settings from {}", path.display());
        Ok(Self {
            port,
            baud,
            mode,
            erase,
            firmware: None,
        })
    }

    /// Persist the four settings fields to the per-user config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_dir()?)
    }

    /// Persist the four settings fields under `dir`, overwriting.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| Error::file_access(dir, e))?;
        let path = dir.join(SETTINGS_FILE);
        let data = json!({
            "port": self.port,
            "baud": self.baud.as_u32(),
            "mode": self.mode.as_str(),
            "erase": if self.erase { "Yes" } else { "No" },
        });
        fs::write(&path, data.to_string()).map_err(|e| Error::file_access(&path, e))?;
        debug!("Saved settings to {}", path.display());
        Ok(())
    }
}

/// Persisted logbook row counter.
///
/// Row 1 of the log file is the header; `next_row` starts at 2 and
/// strictly increases by 1 after every successful append. It only ever
/// resets when the log file itself is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogCounter {
    /// Next writable row index (>= 2).
    pub next_row: u32,
}

/// First data row in the log file (row 1 holds the header).
pub const FIRST_DATA_ROW: u32 = 2;

impl Default for LogCounter {
    fn default() -> Self {
        Self {
            next_row: FIRST_DATA_ROW,
        }
    }
}

impl LogCounter {
    /// Load the counter from the per-user config directory.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_dir()?)
    }

    /// Load the counter from `dir`. A missing file starts at row 2.
    pub fn load_from(dir: &Path) -> Result<Self> {
        let path = dir.join(COUNTER_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let text =
            fs::read_to_string(&path).map_err(|e| Error::file_access(&path, e))?;
        let data: Value = serde_json::from_str(&text)
            .map_err(|e| Error::MissingField(format!("invalid JSON: {e}")))?;
        let row = require_field(&data, "row")?
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| Error::MissingField("field 'row' is not an integer".into()))?;

        Ok(Self {
            next_row: row.max(FIRST_DATA_ROW),
        })
    }

    /// Persist the counter to the per-user config directory.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_dir()?)
    }

    /// Persist the counter under `dir`, overwriting.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).map_err(|e| Error::file_access(dir, e))?;
        let path = dir.join(COUNTER_FILE);
        let data = json!({ "row": self.next_row });
        fs::write(&path, data.to_string()).map_err(|e| Error::file_access(&path, e))?;
        Ok(())
    }
}

/// Per-user configuration directory for espflasher.
pub fn config_dir() -> Result<PathBuf> {
    directories::ProjectDirs::from("", "", "espflasher")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .ok_or_else(|| Error::MissingField("no home directory for config path".into()))
}

fn require_field<'a>(data: &'a Value, name: &str) -> Result<&'a Value> {
    data.get(name)
        .ok_or_else(|| Error::MissingField(format!("missing field '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let settings = FlashSettings::default();
        assert!(settings.port.is_none());
        assert_eq!(settings.baud, BaudRate::B921600);
        assert_eq!(settings.mode, FlashMode::Dio);
        assert!(!settings.erase);
        assert!(settings.firmware.is_none());
    }

    #[test]
    fn test_load_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = FlashSettings::load_from(dir.path()).unwrap();
        assert_eq!(settings, FlashSettings::default());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempdir().unwrap();
        let settings = FlashSettings {
            port: Some("COM3".to_string()),
            baud: BaudRate::B115200,
            mode: FlashMode::Qio,
            erase: true,
            firmware: Some(PathBuf::from("/tmp/app.bin")),
        };
        settings.save_to(dir.path()).unwrap();

        let loaded = FlashSettings::load_from(dir.path()).unwrap();
        assert_eq!(loaded.port.as_deref(), Some("COM3"));
        assert_eq!(loaded.baud, BaudRate::B115200);
        assert_eq!(loaded.mode, FlashMode::Qio);
        assert!(loaded.erase);
        // The firmware path is per-run state, never persisted.
        assert!(loaded.firmware.is_none());
    }

    #[test]
    fn test_load_accepts_string_baud() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"port": null, "baud": "460800", "mode": "dout", "erase": "No"}"#,
        )
        .unwrap();

        let loaded = FlashSettings::load_from(dir.path()).unwrap();
        assert_eq!(loaded.baud, BaudRate::B460800);
        assert_eq!(loaded.mode, FlashMode::Dout);
        assert!(!loaded.erase);
    }

    #[test]
    fn test_load_missing_key_is_hard_failure() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"port": "COM1", "baud": 115200, "mode": "dio"}"#,
        )
        .unwrap();

        let err = FlashSettings::load_from(dir.path()).unwrap_err();
        assert!(matches!(err, Error::MissingField(msg) if msg.contains("erase")));
    }

    #[test]
    fn test_load_rejects_invalid_json() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(SETTINGS_FILE), "not json at all").unwrap();
        let err = FlashSettings::load_from(dir.path()).unwrap_err();
        assert!(matches!(err, Error::MissingField(_)));
    }

    #[test]
    fn test_load_rejects_unsupported_baud() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"port": null, "baud": 1234, "mode": "dio", "erase": "No"}"#,
        )
        .unwrap();
        let err = FlashSettings::load_from(dir.path()).unwrap_err();
        assert!(matches!(err, Error::MissingField(_)));
    }

    #[test]
    fn test_baud_rate_parse() {
        assert_eq!("921600".parse::<BaudRate>().unwrap(), BaudRate::B921600);
        assert_eq!("74880".parse::<BaudRate>().unwrap(), BaudRate::B74880);
        assert!("12345".parse::<BaudRate>().is_err());
        assert!("fast".parse::<BaudRate>().is_err());
    }

    #[test]
    fn test_flash_mode_parse() {
        assert_eq!("qio".parse::<FlashMode>().unwrap(), FlashMode::Qio);
        assert_eq!("DIO".parse::<FlashMode>().unwrap(), FlashMode::Dio);
        assert!("qqio".parse::<FlashMode>().is_err());
    }

    #[test]
    fn test_counter_defaults_to_first_data_row() {
        let dir = tempdir().unwrap();
        let counter = LogCounter::load_from(dir.path()).unwrap();
        assert_eq!(counter.next_row, 2);
    }

    #[test]
    fn test_counter_roundtrip() {
        let dir = tempdir().unwrap();
        let counter = LogCounter { next_row: 17 };
        counter.save_to(dir.path()).unwrap();
        assert_eq!(LogCounter::load_from(dir.path()).unwrap().next_row, 17);
    }

    #[test]
    fn test_counter_never_below_first_data_row() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join(COUNTER_FILE), r#"{"row": 0}"#).unwrap();
        assert_eq!(LogCounter::load_from(dir.path()).unwrap().next_row, 2);
    }
}
