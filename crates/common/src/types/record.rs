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

//! Step records and the envelope written to the output channel.
//!
//! Every line SnapStep writes is one [`Record`], tagged by its `type` field. The field
//! names are the ones the visualizer consumes, hence the camelCase renames.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{HeapTable, ValueDescriptor};

/// Named values of a snapshot, in the order the target reported them
pub type ValueMap = IndexMap<String, ValueDescriptor>;

/// One call-stack entry belonging to the inspected scope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
    /// Declaring scope of the frame (always the entry scope)
    pub class_name: String,
    /// Method executing in this frame
    pub method_name: String,
    /// Current source line of the frame
    pub line: i64,
    /// Call arguments in short form
    pub params: IndexMap<String, String>,
}

/// Snapshot of the target at one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    /// 1-based step index
    pub step: u64,
    /// Source line the target is suspended at
    pub line: i64,
    /// Scope declaring the current location
    pub class_name: String,
    /// Method declaring the current location
    pub method_name: String,
    /// In-scope frames, innermost first
    pub call_stack: Vec<Frame>,
    /// Variables visible in the innermost frame
    pub variables: ValueMap,
    /// Static fields of the declaring scope
    pub statics: ValueMap,
    /// Objects referenced from `variables` and `statics`
    pub heap: HeapTable,
    /// Target output attached to this step
    pub stdout: String,
}

/// One message on the output channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Record {
    /// The target compiled and the session is about to start
    Start {
        /// Entry scope
        #[serde(rename = "className")]
        class_name: String,
        /// Number of compiled source files
        files: usize,
    },
    /// A step snapshot
    Frame(StepRecord),
    /// Output not attached to any step record
    Stdout {
        /// Captured output
        output: String,
    },
    /// A terminal error
    Error {
        /// Human readable message
        message: String,
    },
    /// The compiler rejected the target
    CompileError {
        /// Compiler diagnostics
        message: String,
    },
    /// The session is over
    End,
}

impl Record {
    /// Error record emitted when the step ceiling is crossed
    pub fn step_limit_exceeded(limit: u64) -> Self {
        Self::Error { message: format!("Execution exceeded maximum step limit ({limit})") }
    }

    /// Generic error record
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error { message: message.into() }
    }

    /// Compiler diagnostics record
    pub fn compile_error(message: impl Into<String>) -> Self {
        Self::CompileError { message: message.into() }
    }

    /// Trailing output record
    pub fn stdout(output: impl Into<String>) -> Self {
        Self::Stdout { output: output.into() }
    }

    /// Session start record
    pub fn start(class_name: impl Into<String>, files: usize) -> Self {
        Self::Start { class_name: class_name.into(), files }
    }

    /// The step snapshot, if this is one
    pub fn as_step(&self) -> Option<&StepRecord> {
        match self {
            Self::Frame(step) => Some(step),
            _ => None,
        }
    }

    /// Whether this is an error or compile error record
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::CompileError { .. })
    }
}

impl From<StepRecord> for Record {
    fn from(step: StepRecord) -> Self {
        Self::Frame(step)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HeapEntry, PrimitiveValue, RefId};

    fn sample_step() -> StepRecord {
        let mut variables = ValueMap::new();
        variables.insert("x".into(), ValueDescriptor::Primitive(PrimitiveValue::Int(5)));
        variables.insert(
            "arr".into(),
            ValueDescriptor::Reference { type_name: "int[]".into(), id: RefId(9) },
        );
        let mut heap = HeapTable::new();
        heap.insert(
            RefId(9),
            HeapEntry::Array { type_name: "int[]".into(), elements: vec!["1".into()] },
        );
        let mut params = IndexMap::new();
        params.insert("args".into(), "@3".into());

        StepRecord {
            step: 1,
            line: 3,
            class_name: "Add".into(),
            method_name: "main".into(),
            call_stack: vec![Frame {
                class_name: "Add".into(),
                method_name: "main".into(),
                line: 3,
                params,
            }],
            variables,
            statics: ValueMap::new(),
            heap,
            stdout: String::new(),
        }
    }

    #[test]
    fn test_frame_record_wire_shape() {
        let json = serde_json::to_value(Record::from(sample_step())).unwrap();
        assert_eq!(json["type"], "frame");
        assert_eq!(json["step"], 1);
        assert_eq!(json["className"], "Add");
        assert_eq!(json["methodName"], "main");
        assert_eq!(json["callStack"][0]["params"]["args"], "@3");
        assert_eq!(json["variables"]["x"]["value"], "5");
        assert_eq!(json["variables"]["arr"]["id"], "ref@9");
        assert_eq!(json["heap"]["ref@9"]["elements"][0], "1");
        assert_eq!(json["stdout"], "");
    }

    #[test]
    fn test_record_line_round_trip() {
        let record = Record::from(sample_step());
        let line = serde_json::to_string(&record).unwrap();
        let back: Record = serde_json::from_str(&line).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_envelope_records() {
        let json = serde_json::to_string(&Record::step_limit_exceeded(500)).unwrap();
        assert_eq!(
            json,
            r#"{"type":"error","message":"Execution exceeded maximum step limit (500)"}"#
        );
        assert_eq!(serde_json::to_string(&Record::End).unwrap(), r#"{"type":"end"}"#);
        assert_eq!(
            serde_json::to_string(&Record::start("Add", 2)).unwrap(),
            r#"{"type":"start","className":"Add","files":2}"#
        );
        assert_eq!(
            serde_json::to_string(&Record::compile_error("boom")).unwrap(),
            r#"{"type":"compile_error","message":"boom"}"#
        );
        assert!(Record::compile_error("boom").is_error());
        assert!(Record::stdout("5\n").as_step().is_none());
    }
}
