//! Adapter around the external esptool program.
//!
//! The flashing protocol itself is owned entirely by esptool; this
//! module only locates the binary, derives its argument set from the
//! user's settings, and runs it with the output stream routed into an
//! explicit [`ProgressSink`]. Tool failures surface verbatim, never
//! parsed or retried.

use crate::error::{Error, Result};
use crate::progress::{ProgressExtractor, ProgressSink};
use crate::settings::{BaudRate, FlashSettings};
use log::{debug, info};
use std::io::{self, Read};
use std::process::{Command, Stdio};
use std::thread;

/// Flash base address for full-image writes.
pub const FLASH_BASE_ADDR: &str = "0x00000";

/// Binary names probed on PATH, in order.
const TOOL_CANDIDATES: &[&str] = &["esptool.py", "esptool"];

/// Build the esptool `write_flash` argument vector for `settings`.
///
/// Validation lives here: a missing port or firmware path fails before
/// any tool invocation.
pub fn build_flash_args(settings: &FlashSettings) -> Result<Vec<String>> {
    let port = settings
        .port
        .as_deref()
        .ok_or(Error::NoPortSelected)?;
    let firmware = settings
        .firmware
        .as_deref()
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or(Error::NoFirmwareSelected)?;

    let mut args = vec![
        "--port".to_string(),
        port.to_string(),
        "--baud".to_string(),
        settings.baud.as_u32().to_string(),
        "--after".to_string(),
        "hard_reset".to_string(),
        "write_flash".to_string(),
        "--flash_size".to_string(),
        "detect".to_string(),
        "--flash_mode".to_string(),
        settings.mode.as_str().to_string(),
        FLASH_BASE_ADDR.to_string(),
        firmware.display().to_string(),
    ];
    if settings.erase {
        args.push("--erase-all".to_string());
    }
    Ok(args)
}

/// Handle to a located esptool installation.
#[derive(Debug, Clone)]
pub struct Esptool {
    program: String,
}

impl Esptool {
    /// Locate esptool on PATH.
    pub fn locate() -> Result<Self> {
        for candidate in TOOL_CANDIDATES {
            let probe = Command::new(candidate)
                .arg("version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
            if probe.map(|status| status.success()).unwrap_or(false) {
                debug!("Using flashing tool: {candidate}");
                return Ok(Self {
                    program: (*candidate).to_string(),
                });
            }
        }
        Err(Error::ToolNotFound)
    }

    /// Wrap an explicit program path without probing.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Connect to the device on `port`, detect the chip and read its
    /// hardware MAC address, rendered as colon-separated uppercase hex.
    pub fn read_mac(&self, port: &str, baud: BaudRate) -> Result<String> {
        let output = Command::new(&self.program)
            .args([
                "--port",
                port,
                "--baud",
                &baud.as_u32().to_string(),
                "read_mac",
            ])
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.map_spawn_error(e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(classify_tool_failure(&stdout, &stderr));
        }

        stdout
            .lines()
            .find_map(|line| line.trim().strip_prefix("MAC:"))
            .and_then(|rest| normalize_mac(rest.trim()))
            .map(|mac| {
                info!("Device MAC: {mac}");
                mac
            })
            .ok_or_else(|| {
                Error::ChipDetection("esptool reported no MAC address".to_string())
            })
    }

    /// Run the flash invocation, streaming console output into `sink`.
    pub fn write_flash(&self, args: &[String], sink: &mut dyn ProgressSink) -> Result<()> {
        info!("Command: {} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.map_spawn_error(e))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::FlashTool("esptool stdout unavailable".to_string()))?;

        // Drain stderr concurrently; a full stderr pipe would otherwise
        // block the child while this thread waits on stdout.
        let stderr_reader = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text);
                text
            })
        });

        let mut extractor = ProgressExtractor::new();
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = [0u8; 512];
        loop {
            let n = stdout.read(&mut buf)?;
            if n == 0 {
                break;
            }
            pending.extend_from_slice(&buf[..n]);
            let text = drain_utf8_lossy(&mut pending);
            if !text.is_empty() {
                extractor.push(&text, sink);
            }
        }
        extractor.finish(sink);

        let stderr_text = stderr_reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        let status = child.wait()?;

        if !status.success() {
            let message = if stderr_text.trim().is_empty() {
                format!("esptool exited with {status}")
            } else {
                stderr_text.trim().to_string()
            };
            return Err(Error::FlashTool(message));
        }
        Ok(())
    }

    fn map_spawn_error(&self, err: io::Error) -> Error {
        if err.kind() == io::ErrorKind::NotFound {
            Error::ToolNotFound
        } else {
            Error::Io(err)
        }
    }
}

/// Classify a failed device interaction from the tool's own text.
///
/// Port-open failures are distinct from chip-detection failures so the
/// operator knows whether to check the cable or the board.
fn classify_tool_failure(stdout: &str, stderr: &str) -> Error {
    let combined = format!("{stdout}\n{stderr}");
    let lowered = combined.to_lowercase();
    let message = combined.trim().to_string();

    if lowered.contains("could not open port") || lowered.contains("serialexception") {
        Error::SerialPort(message)
    } else {
        Error::ChipDetection(message)
    }
}

/// Normalize a MAC string to 6 colon-separated uppercase hex bytes.
/// Returns `None` when `raw` is not a valid 6-byte MAC.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 6 {
        return None;
    }
    let mut bytes = Vec::with_capacity(6);
    for part in parts {
        bytes.push(u8::from_str_radix(part, 16).ok()?);
    }
    Some(
        bytes
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

/// Drain buffered bytes into displayable UTF-8 text without stalling on
/// invalid bytes. An incomplete multi-byte suffix stays in `buffer` for
/// the next read.
fn drain_utf8_lossy(buffer: &mut Vec<u8>) -> String {
    let mut output = String::new();

    loop {
        match std::str::from_utf8(buffer) {
            Ok(valid) => {
                output.push_str(valid);
                buffer.clear();
                break;
            },
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                if valid_up_to > 0 {
                    if let Ok(valid) = std::str::from_utf8(&buffer[..valid_up_to]) {
                        output.push_str(valid);
                    }
                }

                match err.error_len() {
                    Some(invalid_len) => {
                        output.push('\u{FFFD}');
                        let drain_to =
                            valid_up_to.saturating_add(invalid_len).min(buffer.len());
                        buffer.drain(..drain_to);
                    },
                    None => {
                        if valid_up_to > 0 {
                            buffer.drain(..valid_up_to);
                        }
                        break;
                    },
                }
            },
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::FlashMode;
    use std::path::PathBuf;

    fn settings(port: Option<&str>, firmware: Option<&str>) -> FlashSettings {
        FlashSettings {
            port: port.map(String::from),
            baud: BaudRate::B115200,
            mode: FlashMode::Dio,
            erase: false,
            firmware: firmware.map(PathBuf::from),
        }
    }

    #[test]
    fn test_build_flash_args_full_vector() {
        let mut s = settings(Some("COM3"), Some("/tmp/app.bin"));
        s.erase = true;
        let args = build_flash_args(&s).unwrap();
        assert_eq!(
            args,
            vec![
                "--port",
                "COM3",
                "--baud",
                "115200",
                "--after",
                "hard_reset",
                "write_flash",
                "--flash_size",
                "detect",
                "--flash_mode",
                "dio",
                "0x00000",
                "/tmp/app.bin",
                "--erase-all",
            ]
        );
    }

    #[test]
    fn test_build_flash_args_without_erase() {
        let args = build_flash_args(&settings(Some("/dev/ttyUSB0"), Some("fw.bin"))).unwrap();
        assert!(!args.contains(&"--erase-all".to_string()));
        assert_eq!(args.last().unwrap(), "fw.bin");
    }

    #[test]
    fn test_build_flash_args_requires_port() {
        let err = build_flash_args(&settings(None, Some("fw.bin"))).unwrap_err();
        assert!(matches!(err, Error::NoPortSelected));
    }

    #[test]
    fn test_build_flash_args_requires_firmware() {
        let err = build_flash_args(&settings(Some("COM3"), None)).unwrap_err();
        assert!(matches!(err, Error::NoFirmwareSelected));

        let err = build_flash_args(&settings(Some("COM3"), Some(""))).unwrap_err();
        assert!(matches!(err, Error::NoFirmwareSelected));
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(
            normalize_mac("24:0a:c4:12:34:56").as_deref(),
            Some("24:0A:C4:12:34:56")
        );
        assert_eq!(normalize_mac("24:0a:c4:12:34").as_deref(), None);
        assert_eq!(normalize_mac("not a mac").as_deref(), None);
    }

    #[test]
    fn test_classify_port_failure() {
        let err = classify_tool_failure(
            "",
            "serial.serialutil.SerialException: could not open port '/dev/ttyUSB0'",
        );
        assert!(matches!(err, Error::SerialPort(_)));
    }

    #[test]
    fn test_classify_chip_failure() {
        let err = classify_tool_failure(
            "A fatal error occurred: Failed to connect to Espressif device",
            "",
        );
        assert!(matches!(err, Error::ChipDetection(_)));
    }

    #[test]
    fn test_drain_utf8_lossy_keeps_incomplete_suffix() {
        let mut buf = vec![b'o', b'k', 0xE4, 0xBD];
        assert_eq!(drain_utf8_lossy(&mut buf), "ok");
        assert_eq!(buf, vec![0xE4, 0xBD]);
        buf.push(0xA0);
        assert_eq!(drain_utf8_lossy(&mut buf), "\u{4F60}");
        assert!(buf.is_empty());
    }

    #[cfg(unix)]
    mod with_fake_tool {
        use super::*;
        use crate::progress::ProgressSink;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::tempdir;

        #[derive(Default)]
        struct Recorder {
            percents: Vec<u8>,
            lines: Vec<String>,
        }

        impl ProgressSink for Recorder {
            fn progress(&mut self, percent: u8) {
                self.percents.push(percent);
            }

            fn output(&mut self, line: &str, _replace_last: bool) {
                self.lines.push(line.to_string());
            }
        }

        fn fake_tool(dir: &std::path::Path, script: &str) -> String {
            let path = dir.join("esptool");
            fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            path.display().to_string()
        }

        #[test]
        fn test_write_flash_streams_progress() {
            let dir = tempdir().unwrap();
            let tool = Esptool::with_program(fake_tool(
                dir.path(),
                r#"printf 'Connecting....\n'
printf '\rWriting at 0x00010000... (45 %%)'
printf '\rWriting at 0x00014000... (90 %%)'
printf '\nLeaving...\n'"#,
            ));

            let mut sink = Recorder::default();
            tool.write_flash(&["ignored".to_string()], &mut sink).unwrap();
            assert_eq!(sink.percents, vec![45, 90]);
            assert!(sink.lines.iter().any(|l| l.starts_with("Connecting")));
        }

        #[test]
        fn test_write_flash_survives_stderr_larger_than_pipe_buffer() {
            let dir = tempdir().unwrap();
            // Well past the 64 KiB pipe capacity, written before any
            // stdout appears.
            let tool = Esptool::with_program(fake_tool(
                dir.path(),
                r#"yes 'DeprecationWarning: write_flash option' | head -n 8192 >&2
printf 'Writing at 0x00000000... (45 %%)\nLeaving...\n'"#,
            ));

            let mut sink = Recorder::default();
            tool.write_flash(&["ignored".to_string()], &mut sink).unwrap();
            assert_eq!(sink.percents, vec![45]);
        }

        #[test]
        fn test_write_flash_failure_carries_tool_text_verbatim() {
            let dir = tempdir().unwrap();
            let tool = Esptool::with_program(fake_tool(
                dir.path(),
                "echo 'A fatal error occurred: MD5 of file does not match' >&2; exit 2",
            ));

            let mut sink = Recorder::default();
            let err = tool.write_flash(&[], &mut sink).unwrap_err();
            match err {
                Error::FlashTool(msg) => {
                    assert!(msg.contains("MD5 of file does not match"));
                },
                other => panic!("expected FlashTool error, got {other:?}"),
            }
        }

        #[test]
        fn test_read_mac_parses_and_uppercases() {
            let dir = tempdir().unwrap();
            let tool = Esptool::with_program(fake_tool(
                dir.path(),
                "echo 'Detecting chip type... ESP8266'; echo 'MAC: 24:0a:c4:01:ab:ef'",
            ));

            let mac = tool.read_mac("/dev/null", BaudRate::B115200).unwrap();
            assert_eq!(mac, "24:0A:C4:01:AB:EF");
        }

        #[test]
        fn test_read_mac_serial_failure_classified() {
            let dir = tempdir().unwrap();
            let tool = Esptool::with_program(fake_tool(
                dir.path(),
                "echo 'serial.serialutil.SerialException: could not open port' >&2; exit 1",
            ));

            let err = tool.read_mac("/dev/ttyUSB9", BaudRate::B115200).unwrap_err();
            assert!(matches!(err, Error::SerialPort(_)));
        }

        #[test]
        fn test_spawn_missing_program_is_tool_not_found() {
            let tool = Esptool::with_program("/nonexistent/esptool-missing");
            let err = tool.read_mac("/dev/null", BaudRate::B115200).unwrap_err();
            assert!(matches!(err, Error::ToolNotFound));
        }
    }
}
