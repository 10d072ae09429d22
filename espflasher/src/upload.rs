//! The upload workflow: validate, read the MAC, flash, report.
//!
//! One background thread per attempt. The thread owns a settings
//! snapshot taken at start, so later mutation by the caller never
//! affects an in-flight flash. All status flows back through an
//! [`UploadEvent`] channel; there is no shared mutable state to poll
//! and no cancellation once a flash is running.

use crate::error::{Error, Result};
use crate::esptool::{Esptool, build_flash_args};
use crate::progress::ProgressSink;
use crate::settings::{BaudRate, FlashSettings};
use log::{debug, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Workflow state of an upload attempt, as observable through its
/// handle.
///
/// Precondition checks run synchronously inside [`Uploader::start`],
/// before any handle exists; an attempt that fails validation never
/// reaches any of these states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Read-MAC and flash invocation in progress.
    Flashing,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

/// Events delivered from the background thread to the caller.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// A console output line from the flashing tool. `replace_last`
    /// carries the tool's overwrite-in-place semantics.
    Output {
        /// The line text, without its terminator.
        text: String,
        /// Overwrite the previously displayed line instead of appending.
        replace_last: bool,
    },
    /// Write progress in percent, `0..=100`.
    Progress(u8),
    /// The flash finished; the device is reset and running.
    Completed {
        /// Device MAC, colon-separated uppercase hex.
        mac: String,
        /// File name (not path) of the flashed image.
        firmware_file_name: String,
    },
    /// The attempt failed. The message is user-displayable.
    Failed {
        /// Error text, suitable for the UI surface.
        message: String,
    },
}

/// The result of a completed flash-and-read-mac cycle.
#[derive(Debug, Clone)]
pub struct FlashOutcome {
    /// Device MAC, colon-separated uppercase hex.
    pub mac: String,
    /// File name of the flashed image, for the logbook.
    pub firmware_file_name: String,
}

/// Handle to an in-flight upload.
#[derive(Debug)]
pub struct UploadHandle {
    events: Receiver<UploadEvent>,
    state: Arc<Mutex<UploadState>>,
    thread: JoinHandle<Result<FlashOutcome>>,
}

impl UploadHandle {
    /// The event channel; iterate it to render progress live.
    pub fn events(&self) -> &Receiver<UploadEvent> {
        &self.events
    }

    /// Current workflow state.
    pub fn state(&self) -> UploadState {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Block until the attempt finishes and return its outcome.
    pub fn wait(self) -> Result<FlashOutcome> {
        self.thread
            .join()
            .map_err(|_| Error::FlashTool("upload thread panicked".to_string()))?
    }
}

/// Starts upload attempts, one at a time.
#[derive(Debug, Default)]
pub struct Uploader {
    in_flight: Arc<AtomicBool>,
}

impl Uploader {
    /// Create an idle uploader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether an attempt is currently running.
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Validate `settings` and start a flash attempt in the background.
    ///
    /// Fails with [`Error::NoPortSelected`] / [`Error::NoFirmwareSelected`]
    /// before the tool is ever invoked, and with
    /// [`Error::UploadInProgress`] while an earlier attempt is running.
    pub fn start(&self, settings: &FlashSettings) -> Result<UploadHandle> {
        let tool = Esptool::locate()?;
        self.start_with_tool(settings, tool)
    }

    /// As [`Uploader::start`], with an explicit tool handle.
    pub fn start_with_tool(
        &self,
        settings: &FlashSettings,
        tool: Esptool,
    ) -> Result<UploadHandle> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            return Err(Error::UploadInProgress);
        }
        let guard = InFlightGuard(Arc::clone(&self.in_flight));

        // Validating: precondition failures never reach the tool.
        let args = match build_flash_args(settings) {
            Ok(args) => args,
            Err(err) => {
                drop(guard);
                return Err(err);
            },
        };
        let firmware_file_name = settings
            .firmware
            .as_deref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let port = settings.port.clone().unwrap_or_default();
        let baud = settings.baud;

        let (sender, events) = channel();
        let state = Arc::new(Mutex::new(UploadState::Flashing));
        let thread_state = Arc::clone(&state);

        let thread = thread::spawn(move || {
            let _guard = guard;
            let result = run_attempt(&tool, &port, baud, &args, firmware_file_name, &sender);
            let final_state = if result.is_ok() {
                UploadState::Completed
            } else {
                UploadState::Failed
            };
            set_state(&thread_state, final_state);
            result
        });

        Ok(UploadHandle {
            events,
            state,
            thread,
        })
    }
}

fn run_attempt(
    tool: &Esptool,
    port: &str,
    baud: BaudRate,
    args: &[String],
    firmware_file_name: String,
    sender: &Sender<UploadEvent>,
) -> Result<FlashOutcome> {
    // Read-MAC first; its failure is terminal for the attempt.
    let mac = match tool.read_mac(port, baud) {
        Ok(mac) => mac,
        Err(err) => {
            send(sender, UploadEvent::Failed {
                message: err.to_string(),
            });
            return Err(err);
        },
    };
    debug!("Read MAC {mac} from {port}, starting flash");

    let mut sink = ChannelSink { sender };
    if let Err(err) = tool.write_flash(args, &mut sink) {
        send(sender, UploadEvent::Failed {
            message: err.to_string(),
        });
        return Err(err);
    }

    let outcome = FlashOutcome {
        mac,
        firmware_file_name,
    };
    send(sender, UploadEvent::Completed {
        mac: outcome.mac.clone(),
        firmware_file_name: outcome.firmware_file_name.clone(),
    });
    Ok(outcome)
}

/// Clears the in-flight flag when the attempt ends, panics included.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct ChannelSink<'a> {
    sender: &'a Sender<UploadEvent>,
}

impl ProgressSink for ChannelSink<'_> {
    fn progress(&mut self, percent: u8) {
        send(self.sender, UploadEvent::Progress(percent));
    }

    fn output(&mut self, line: &str, replace_last: bool) {
        send(self.sender, UploadEvent::Output {
            text: line.to_string(),
            replace_last,
        });
    }
}

fn send(sender: &Sender<UploadEvent>, event: UploadEvent) {
    // A dropped receiver only means nobody is rendering anymore.
    if sender.send(event).is_err() {
        warn!("upload event receiver dropped");
    }
}

fn set_state(state: &Mutex<UploadState>, value: UploadState) {
    *state
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{BaudRate, FlashMode};
    use std::path::PathBuf;

    fn valid_settings() -> FlashSettings {
        FlashSettings {
            port: Some("/dev/null".to_string()),
            baud: BaudRate::B115200,
            mode: FlashMode::Dio,
            erase: false,
            firmware: Some(PathBuf::from("/tmp/app.bin")),
        }
    }

    #[test]
    fn test_start_without_port_fails_before_tool_runs() {
        let uploader = Uploader::new();
        let mut settings = valid_settings();
        settings.port = None;

        // A tool pointing nowhere proves validation short-circuits.
        let tool = Esptool::with_program("/nonexistent/esptool-missing");
        let err = uploader.start_with_tool(&settings, tool).unwrap_err();
        assert!(matches!(err, Error::NoPortSelected));
        assert!(!uploader.is_in_flight());
    }

    #[test]
    fn test_start_without_firmware_fails_before_tool_runs() {
        let uploader = Uploader::new();
        let mut settings = valid_settings();
        settings.firmware = None;

        let tool = Esptool::with_program("/nonexistent/esptool-missing");
        let err = uploader.start_with_tool(&settings, tool).unwrap_err();
        assert!(matches!(err, Error::NoFirmwareSelected));
        assert!(!uploader.is_in_flight());
    }

    #[cfg(unix)]
    mod with_fake_tool {
        use super::*;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;
        use tempfile::tempdir;

        fn fake_tool(dir: &std::path::Path, script: &str) -> Esptool {
            let path = dir.join("esptool");
            fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            Esptool::with_program(path.display().to_string())
        }

        /// Fake that answers `read_mac` and the flash call in turn.
        fn happy_tool(dir: &std::path::Path) -> Esptool {
            fake_tool(
                dir,
                r#"case "$*" in
*read_mac*)
    echo 'MAC: 24:0a:c4:01:ab:ef'
    ;;
*)
    printf '\rWriting at 0x00000000... (50 %%)'
    printf '\rWriting at 0x00004000... (99 %%)'
    printf '\nLeaving...\n'
    ;;
esac"#,
            )
        }

        #[test]
        fn test_successful_upload_reads_mac_then_flashes() {
            let dir = tempdir().unwrap();
            let uploader = Uploader::new();
            let handle = uploader
                .start_with_tool(&valid_settings(), happy_tool(dir.path()))
                .unwrap();

            let events: Vec<UploadEvent> = handle.events().iter().collect();
            let outcome = handle.wait().unwrap();

            assert_eq!(outcome.mac, "24:0A:C4:01:AB:EF");
            assert_eq!(outcome.firmware_file_name, "app.bin");
            assert!(
                events
                    .iter()
                    .any(|e| matches!(e, UploadEvent::Progress(50)))
            );
            assert!(
                events
                    .iter()
                    .any(|e| matches!(e, UploadEvent::Completed { .. }))
            );
            assert!(!uploader.is_in_flight());
        }

        #[test]
        fn test_state_reaches_completed() {
            let dir = tempdir().unwrap();
            let uploader = Uploader::new();
            let handle = uploader
                .start_with_tool(&valid_settings(), happy_tool(dir.path()))
                .unwrap();

            let early = handle.state();
            assert!(matches!(
                early,
                UploadState::Flashing | UploadState::Completed
            ));

            // The channel closes only after the final state is stored,
            // so a drained handle reports the terminal state.
            for _ in handle.events().iter() {}
            assert_eq!(handle.state(), UploadState::Completed);
            handle.wait().unwrap();
        }

        #[test]
        fn test_mac_failure_is_terminal_and_skips_flash() {
            let dir = tempdir().unwrap();
            let tool = fake_tool(
                dir.path(),
                r#"case "$*" in
*read_mac*)
    echo 'A fatal error occurred: Failed to connect' >&2
    exit 2
    ;;
*)
    touch "$(dirname "$0")/flash-ran.marker"
    ;;
esac"#,
            );

            let uploader = Uploader::new();
            let handle = uploader
                .start_with_tool(&valid_settings(), tool)
                .unwrap();

            let events: Vec<UploadEvent> = handle.events().iter().collect();
            let err = handle.wait().unwrap_err();

            assert!(matches!(err, Error::ChipDetection(_)));
            assert!(
                events
                    .iter()
                    .any(|e| matches!(e, UploadEvent::Failed { .. }))
            );
            assert!(!dir.path().join("flash-ran.marker").exists());
        }

        #[test]
        fn test_reentrant_start_is_rejected() {
            let dir = tempdir().unwrap();
            let tool = fake_tool(
                dir.path(),
                r#"case "$*" in
*read_mac*) sleep 1; echo 'MAC: 00:11:22:33:44:55' ;;
*) : ;;
esac"#,
            );

            let uploader = Uploader::new();
            let handle = uploader
                .start_with_tool(&valid_settings(), tool.clone())
                .unwrap();

            let err = uploader
                .start_with_tool(&valid_settings(), tool)
                .unwrap_err();
            assert!(matches!(err, Error::UploadInProgress));

            handle.wait().unwrap();
            assert!(!uploader.is_in_flight());
        }

        #[test]
        fn test_settings_snapshot_taken_at_start() {
            let dir = tempdir().unwrap();
            let uploader = Uploader::new();
            let mut settings = valid_settings();
            let handle = uploader
                .start_with_tool(&settings, happy_tool(dir.path()))
                .unwrap();

            // Mutating after start must not affect the in-flight attempt.
            settings.firmware = Some(PathBuf::from("/tmp/other.bin"));
            settings.port = None;

            let outcome = handle.wait().unwrap();
            assert_eq!(outcome.firmware_file_name, "app.bin");
        }
    }
}
