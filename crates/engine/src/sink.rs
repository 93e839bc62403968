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

//! Destinations for emitted records.

use std::io::Write;

use auto_impl::auto_impl;
use eyre::{Result, WrapErr};
use snapstep_common::types::Record;

/// Consumer of the record stream
#[auto_impl(&mut, Box)]
pub trait RecordSink {
    /// Deliver one record
    fn emit(&mut self, record: &Record) -> Result<()>;
}

/// Writes one JSON object per line and flushes after every record
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    /// Create a sink over `writer`
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Recover the underlying writer
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> RecordSink for JsonLinesSink<W> {
    fn emit(&mut self, record: &Record) -> Result<()> {
        let mut line = serde_json::to_vec(record).wrap_err("failed to serialize record")?;
        line.push(b'\n');
        self.writer.write_all(&line).wrap_err("failed to write record")?;
        self.writer.flush().wrap_err("failed to flush record")?;
        Ok(())
    }
}

impl RecordSink for Vec<Record> {
    fn emit(&mut self, record: &Record) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_lines_sink() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.emit(&Record::start("Main", 1)).unwrap();
        sink.emit(&Record::End).unwrap();

        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(
            lines,
            vec![r#"{"type":"start","className":"Main","files":1}"#, r#"{"type":"end"}"#]
        );
        assert!(text.ends_with('\n'));
    }

    #[test]
    fn test_vec_sink_collects() {
        let mut records: Vec<Record> = Vec::new();
        records.emit(&Record::stdout("hi")).unwrap();
        assert_eq!(records, vec![Record::stdout("hi")]);
    }
}
