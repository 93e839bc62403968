// SnapStep - Step-by-step program state recorder
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Target output capture and interleaving with step records.
//!
//! The target's stdout is read on a dedicated pump thread and forwarded as decoded text
//! chunks over an unbounded channel. The session drains whatever has arrived before
//! building each record, without ever blocking on the target.

use std::{
    fmt,
    io::{self, Read},
    str::FromStr,
    thread::{self, JoinHandle},
};

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

const PUMP_CHUNK_SIZE: usize = 4096;

/// Non-blocking source of captured target output
pub trait OutputSource {
    /// Append everything available right now to `buffer`
    fn drain_into(&mut self, buffer: &mut String);
}

/// Output arriving over a channel, typically fed by [`spawn_output_pump`]
#[derive(Debug)]
pub struct ChannelOutput {
    rx: UnboundedReceiver<String>,
}

impl ChannelOutput {
    /// Wrap an existing receiver
    pub fn new(rx: UnboundedReceiver<String>) -> Self {
        Self { rx }
    }

    /// Create a connected sender and output source
    pub fn channel() -> (UnboundedSender<String>, Self) {
        let (tx, rx) = unbounded_channel();
        (tx, Self::new(rx))
    }
}

impl OutputSource for ChannelOutput {
    fn drain_into(&mut self, buffer: &mut String) {
        while let Ok(chunk) = self.rx.try_recv() {
            buffer.push_str(&chunk);
        }
    }
}

/// A target that produces no output
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOutput;

impl OutputSource for NoOutput {
    fn drain_into(&mut self, _buffer: &mut String) {}
}

/// Start a thread forwarding everything read from `reader` to `tx` as text.
///
/// Multi-byte characters split across reads are held back until complete; invalid
/// bytes are replaced with U+FFFD. The thread ends at end of stream or once the
/// receiving side is dropped.
pub fn spawn_output_pump<R>(
    mut reader: R,
    tx: UnboundedSender<String>,
) -> io::Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    thread::Builder::new().name("snapstep-stdout".to_string()).spawn(move || {
        let mut pending = Vec::new();
        let mut chunk = [0u8; PUMP_CHUNK_SIZE];
        loop {
            let read = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(read) => read,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(error = %e, "Target output stream failed");
                    break;
                }
            };
            pending.extend_from_slice(&chunk[..read]);
            let text = take_utf8_prefix(&mut pending);
            if !text.is_empty() {
                trace!(bytes = text.len(), "Captured target output");
                if tx.send(text).is_err() {
                    return;
                }
            }
        }
        if !pending.is_empty() {
            let _ = tx.send(String::from_utf8_lossy(&pending).into_owned());
        }
        debug!("Target output stream closed");
    })
}

/// Decode the longest prefix of `bytes` that cannot change with more input
fn take_utf8_prefix(bytes: &mut Vec<u8>) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => {
            let text = text.to_string();
            bytes.clear();
            text
        }
        Err(e) => {
            let valid = e.valid_up_to();
            match e.error_len() {
                // Incomplete sequence at the end, wait for the rest
                None => {
                    let text = String::from_utf8_lossy(&bytes[..valid]).into_owned();
                    bytes.drain(..valid);
                    text
                }
                Some(invalid) => {
                    let consumed = valid + invalid;
                    let mut text = String::from_utf8_lossy(&bytes[..consumed]).into_owned();
                    bytes.drain(..consumed);
                    text.push_str(&take_utf8_prefix(bytes));
                    text
                }
            }
        }
    }
}

/// How captured output is attached to step records
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CaptureMode {
    /// Every record carries all output produced so far
    #[default]
    Cumulative,
    /// Every record carries only output not attached to an earlier record
    Delta,
}

impl fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cumulative => f.write_str("cumulative"),
            Self::Delta => f.write_str("delta"),
        }
    }
}

impl FromStr for CaptureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cumulative" => Ok(Self::Cumulative),
            "delta" => Ok(Self::Delta),
            other => Err(format!("unknown capture mode: {other}")),
        }
    }
}

/// Accumulates target output and decides what each record carries
#[derive(Debug)]
pub struct OutputInterleaver<S> {
    source: S,
    buffer: String,
    attached: usize,
    mode: CaptureMode,
}

impl<S: OutputSource> OutputInterleaver<S> {
    /// Create an interleaver over `source`
    pub fn new(source: S, mode: CaptureMode) -> Self {
        Self { source, buffer: String::new(), attached: 0, mode }
    }

    /// Pull everything the source has right now into the buffer
    pub fn drain(&mut self) {
        self.source.drain_into(&mut self.buffer);
    }

    /// Output the next record would carry, without marking it attached
    pub fn pending(&self) -> String {
        match self.mode {
            CaptureMode::Cumulative => self.buffer.clone(),
            CaptureMode::Delta => self.buffer[self.attached..].to_string(),
        }
    }

    /// Mark the current buffer as attached to an emitted record
    pub fn mark_attached(&mut self) {
        self.attached = self.buffer.len();
    }

    /// Output for the next record, marking it attached
    pub fn attach(&mut self) -> String {
        let output = self.pending();
        self.mark_attached();
        output
    }

    /// Output to flush once the session is over, if any
    pub fn trailing(&mut self) -> Option<String> {
        let output = self.attach();
        (!output.is_empty()).then_some(output)
    }

    /// Everything captured so far
    pub fn buffered(&self) -> &str {
        &self.buffer
    }

    /// Capture mode in use
    pub fn mode(&self) -> CaptureMode {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Chunks(Vec<&'static str>);

    impl OutputSource for Chunks {
        fn drain_into(&mut self, buffer: &mut String) {
            for chunk in self.0.drain(..) {
                buffer.push_str(chunk);
            }
        }
    }

    #[test]
    fn test_cumulative_attach() {
        let mut output = OutputInterleaver::new(Chunks(vec!["a"]), CaptureMode::Cumulative);
        output.drain();
        assert_eq!(output.attach(), "a");
        output.source.0.push("b");
        output.drain();
        assert_eq!(output.attach(), "ab");
        assert_eq!(output.trailing().as_deref(), Some("ab"));
    }

    #[test]
    fn test_delta_attach() {
        let mut output = OutputInterleaver::new(Chunks(vec!["a"]), CaptureMode::Delta);
        output.drain();
        assert_eq!(output.pending(), "a");
        assert_eq!(output.attach(), "a");
        assert_eq!(output.attach(), "");
        output.source.0.push("b\n");
        output.drain();
        assert_eq!(output.trailing().as_deref(), Some("b\n"));
        assert_eq!(output.trailing(), None);
        assert_eq!(output.buffered(), "ab\n");
    }

    #[test]
    fn test_empty_trailing() {
        let mut output = OutputInterleaver::new(NoOutput, CaptureMode::Cumulative);
        output.drain();
        assert_eq!(output.trailing(), None);
    }

    #[test]
    fn test_take_utf8_prefix_holds_split_character() {
        // "é" is 0xC3 0xA9
        let mut bytes = vec![b'a', 0xC3];
        assert_eq!(take_utf8_prefix(&mut bytes), "a");
        assert_eq!(bytes, vec![0xC3]);
        bytes.push(0xA9);
        assert_eq!(take_utf8_prefix(&mut bytes), "é");
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_take_utf8_prefix_replaces_invalid_bytes() {
        let mut bytes = vec![b'a', 0xFF, b'b'];
        assert_eq!(take_utf8_prefix(&mut bytes), "a\u{FFFD}b");
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_pump_forwards_stream() {
        let (tx, mut output) = ChannelOutput::channel();
        let data = "héllo\nworld\n".as_bytes().to_vec();
        let handle = spawn_output_pump(io::Cursor::new(data), tx).unwrap();
        handle.join().unwrap();

        let mut buffer = String::new();
        output.drain_into(&mut buffer);
        assert_eq!(buffer, "héllo\nworld\n");
    }

    #[test]
    fn test_capture_mode_parse() {
        assert_eq!("delta".parse::<CaptureMode>().unwrap(), CaptureMode::Delta);
        assert_eq!("Cumulative".parse::<CaptureMode>().unwrap(), CaptureMode::Cumulative);
        assert!("both".parse::<CaptureMode>().is_err());
        assert_eq!(CaptureMode::default().to_string(), "cumulative");
    }
}
