//! Progress extraction from esptool console output.
//!
//! esptool reports write progress by repeatedly overwriting one console
//! line: it emits a carriage return followed by
//! `Writing at 0x00010000... (45 %)`. The extractor consumes the raw
//! output stream in chunks, reassembles lines, turns the percentage into
//! progress events and preserves the overwrite semantics so a renderer
//! can redraw in place instead of spamming scrollback.

/// Receives extracted output lines and progress updates.
///
/// Implemented by the CLI renderer; test code supplies its own recorder.
pub trait ProgressSink {
    /// A write percentage in `0..=100` was parsed from the output.
    fn progress(&mut self, percent: u8);

    /// A complete output line. When `replace_last` is set the line was
    /// carriage-return-led: the consumer should overwrite from the last
    /// line break onward rather than append.
    fn output(&mut self, line: &str, replace_last: bool);
}

/// Marker prefix of esptool's write-progress lines.
const WRITING_PREFIX: &str = "Writing at";

/// Parse the percentage out of a `Writing at ... (NN %)` line.
///
/// The percentage is the 3-character window at a fixed offset from the
/// line end (the `NN ` inside `(NN %)`). Anything unparseable is not an
/// error, just an uninteresting line.
pub fn parse_write_percent(line: &str) -> Option<u8> {
    if !line.starts_with(WRITING_PREFIX) {
        return None;
    }
    let bytes = line.as_bytes();
    if bytes.len() < 6 {
        return None;
    }
    let window = std::str::from_utf8(&bytes[bytes.len() - 5..bytes.len() - 2]).ok()?;
    // Single-digit percentages drag the '(' into the fixed window.
    let digits = window.trim_matches(|c: char| !c.is_ascii_digit());
    let percent: u8 = digits.parse().ok()?;
    (percent <= 100).then_some(percent)
}

/// Incremental splitter for esptool's console stream.
///
/// Push raw chunks as they arrive; lines are emitted on `\n`, and on
/// `\r` the following line is flagged as replacing the previous one.
#[derive(Debug, Default)]
pub struct ProgressExtractor {
    pending: String,
    replace_next: bool,
    last_was_cr: bool,
}

impl ProgressExtractor {
    /// Create an extractor with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of raw output, emitting any completed lines.
    pub fn push(&mut self, chunk: &str, sink: &mut dyn ProgressSink) {
        for ch in chunk.chars() {
            match ch {
                '\n' => {
                    if self.last_was_cr && self.pending.is_empty() {
                        // CRLF pair: the \r already flushed the line and
                        // the newline cancels the overwrite.
                        self.replace_next = false;
                    } else {
                        self.flush_line(sink);
                    }
                    self.last_was_cr = false;
                },
                '\r' => {
                    if !self.pending.is_empty() {
                        self.flush_line(sink);
                    }
                    self.replace_next = true;
                    self.last_was_cr = true;
                },
                _ => {
                    self.pending.push(ch);
                    self.last_was_cr = false;
                },
            }
        }
    }

    /// Flush any unterminated trailing line at end of stream.
    pub fn finish(&mut self, sink: &mut dyn ProgressSink) {
        if !self.pending.is_empty() {
            self.flush_line(sink);
        }
    }

    fn flush_line(&mut self, sink: &mut dyn ProgressSink) {
        if let Some(percent) = parse_write_percent(&self.pending) {
            sink.progress(percent);
        }
        sink.output(&self.pending, self.replace_next);
        self.pending.clear();
        self.replace_next = false;
    }
}
