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

//! Debug/introspection interface driven by the session controller.
//!
//! A [`DebugTarget`] is a suspended-on-event view of the program under inspection. It
//! delivers event sets, accepts step requests, and answers structural questions about
//! the suspended thread: frames, visible variables, fields, and array elements.
//!
//! Backends only translate. Which frames to keep, how values render, and what goes
//! on the heap are decided by the [`SnapshotBuilder`](crate::SnapshotBuilder).

use std::{fmt, io, time::Duration};

use auto_impl::auto_impl;
use snapstep_common::types::{PrimitiveValue, RefId, ValueDescriptor};
use thiserror::Error;

/// Identity of a target thread
pub type ThreadId = u64;

/// A loaded type of the target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    /// Backend handle of the type
    pub id: u64,
    /// Fully qualified name, e.g. `java.lang.String` or `Main`
    pub name: String,
}

impl TypeRef {
    /// Create a type reference
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self { id, name: name.into() }
    }
}

/// A code location the target can be suspended at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Type declaring the executing method
    pub declaring_type: TypeRef,
    /// Executing method name
    pub method: String,
    /// Source line, or `-1` when the method carries no line table
    pub line: i64,
}

impl Location {
    /// Create a location
    pub fn new(declaring_type: TypeRef, method: impl Into<String>, line: i64) -> Self {
        Self { declaring_type, method: method.into(), line }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.declaring_type.name, self.method, self.line)
    }
}

/// One frame of a suspended thread's stack.
///
/// Only valid until the target is resumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrameRef {
    /// Owning thread
    pub thread: ThreadId,
    /// Backend handle of the frame
    pub id: u64,
    /// Where the frame is executing
    pub location: Location,
}

/// A variable visible in a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    /// Source name
    pub name: String,
    /// Whether the variable is a method argument
    pub is_argument: bool,
    /// Backend slot of the variable
    pub slot: u32,
    /// Backend type signature, empty if the backend does not need one
    pub signature: String,
}

impl Variable {
    /// A local variable
    pub fn local(name: impl Into<String>, slot: u32) -> Self {
        Self { name: name.into(), is_argument: false, slot, signature: String::new() }
    }

    /// A method argument
    pub fn argument(name: impl Into<String>, slot: u32) -> Self {
        Self { is_argument: true, ..Self::local(name, slot) }
    }
}

/// A field of a type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Source name
    pub name: String,
    /// Whether the field is shared by all instances
    pub is_static: bool,
    /// Backend handle of the field
    pub id: u64,
}

impl Field {
    /// An instance field
    pub fn instance(name: impl Into<String>, id: u64) -> Self {
        Self { name: name.into(), is_static: false, id }
    }

    /// A static field
    pub fn shared(name: impl Into<String>, id: u64) -> Self {
        Self { name: name.into(), is_static: true, id }
    }
}

/// Handle on a heap object of the target
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Identity of the object, stable for its lifetime
    pub id: u64,
    /// Runtime type name, e.g. `int[]` or `Node`
    pub type_name: String,
}

impl ObjectRef {
    /// Create an object handle
    pub fn new(id: u64, type_name: impl Into<String>) -> Self {
        Self { id, type_name: type_name.into() }
    }
}

/// A value read from the target
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    /// The null reference
    Null,
    /// A primitive
    Primitive(PrimitiveValue),
    /// A string, read eagerly
    Text(String),
    /// Reference to an array
    Array(ObjectRef),
    /// Reference to any other object
    Object(ObjectRef),
}

impl RuntimeValue {
    /// The referenced object, if this value is a non-string reference
    pub fn object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Array(object) | Self::Object(object) => Some(object),
            _ => None,
        }
    }
}

impl From<RuntimeValue> for ValueDescriptor {
    fn from(value: RuntimeValue) -> Self {
        match value {
            RuntimeValue::Null => Self::Null,
            RuntimeValue::Primitive(value) => Self::Primitive(value),
            RuntimeValue::Text(text) => Self::Text(text),
            RuntimeValue::Array(object) | RuntimeValue::Object(object) => {
                Self::Reference { type_name: object.type_name, id: RefId(object.id) }
            }
        }
    }
}

/// Event reported by the target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DebugEvent {
    /// The VM started; the initial thread is suspended
    VmStart {
        /// Initial thread
        thread: ThreadId,
    },
    /// A type was loaded and prepared
    ClassPrepare {
        /// Thread that triggered the load
        thread: ThreadId,
        /// Name of the prepared type
        type_name: String,
    },
    /// A step request completed
    Step {
        /// Stepping thread
        thread: ThreadId,
        /// Location reached
        location: Location,
    },
    /// The VM terminated
    VmDeath,
    /// The connection to the target was lost
    VmDisconnect,
    /// Anything the session does not act on
    Other,
}

/// Events delivered together; the target stays suspended until resumed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventSet {
    /// Events in delivery order
    pub events: Vec<DebugEvent>,
}

impl EventSet {
    /// Create an event set
    pub fn new(events: Vec<DebugEvent>) -> Self {
        Self { events }
    }
}

impl From<DebugEvent> for EventSet {
    fn from(event: DebugEvent) -> Self {
        Self { events: vec![event] }
    }
}

/// Errors reported by a [`DebugTarget`]
#[derive(Debug, Error)]
pub enum TargetError {
    /// The target has no debug information for the requested item
    #[error("debug information is absent")]
    AbsentInformation,

    /// The target sent something that does not follow the protocol
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The target rejected a command
    #[error("target rejected command with error code {0}")]
    Rejected(u16),

    /// Transport failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The target is gone
    #[error("target disconnected")]
    Disconnected,

    /// The target did not answer in time
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The target could not be started
    #[error("failed to launch target: {0}")]
    Launch(String),

    /// The backend cannot answer this request
    #[error("unsupported request: {0}")]
    Unsupported(String),
}

/// Introspection interface of a suspended target.
///
/// All structural queries are only meaningful while the target is suspended by the
/// last delivered event set.
#[auto_impl(&mut, Box)]
pub trait DebugTarget {
    /// Ask for class-prepare events of types matching `scope`
    fn watch_class_prepare(&mut self, scope: &str) -> Result<(), TargetError>;

    /// Install a line-granularity, step-into request on `thread`, filtered to `scope`
    fn enable_line_steps(&mut self, thread: ThreadId, scope: &str) -> Result<(), TargetError>;

    /// Wait at most `timeout` for the next event set; `None` on timeout
    fn next_event_set(&mut self, timeout: Duration) -> Result<Option<EventSet>, TargetError>;

    /// Resume the target after an event set
    fn resume(&mut self) -> Result<(), TargetError>;

    /// Terminate the target with `exit_code`
    fn terminate(&mut self, exit_code: i32) -> Result<(), TargetError>;

    /// Frames of a suspended thread, innermost first
    fn frames(&mut self, thread: ThreadId) -> Result<Vec<StackFrameRef>, TargetError>;

    /// Variables visible at the frame's current location
    fn visible_variables(&mut self, frame: &StackFrameRef) -> Result<Vec<Variable>, TargetError>;

    /// Current value of a visible variable
    fn variable_value(
        &mut self,
        frame: &StackFrameRef,
        variable: &Variable,
    ) -> Result<RuntimeValue, TargetError>;

    /// Static fields visible through a type, inherited ones included
    fn static_fields(&mut self, ty: &TypeRef) -> Result<Vec<Field>, TargetError>;

    /// Current value of a static field
    fn static_value(&mut self, ty: &TypeRef, field: &Field) -> Result<RuntimeValue, TargetError>;

    /// Instance fields of an object's runtime type, inherited ones included
    fn instance_fields(&mut self, object: &ObjectRef) -> Result<Vec<Field>, TargetError>;

    /// Current value of an instance field
    fn instance_value(
        &mut self,
        object: &ObjectRef,
        field: &Field,
    ) -> Result<RuntimeValue, TargetError>;

    /// All elements of an array, in index order
    fn array_elements(&mut self, array: &ObjectRef) -> Result<Vec<RuntimeValue>, TargetError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        let location = Location::new(TypeRef::new(1, "Main"), "main", 3);
        assert_eq!(location.to_string(), "Main.main:3");
    }

    #[test]
    fn test_runtime_value_object() {
        let array = RuntimeValue::Array(ObjectRef::new(4, "int[]"));
        assert_eq!(array.object().map(|o| o.id), Some(4));
        assert!(RuntimeValue::Text("hi".into()).object().is_none());
        assert!(RuntimeValue::Null.object().is_none());
    }

    #[test]
    fn test_runtime_value_descriptor() {
        let descriptor = ValueDescriptor::from(RuntimeValue::Object(ObjectRef::new(12, "Node")));
        assert_eq!(descriptor.short_form(), "@12");
        assert_eq!(descriptor.type_name(), "Node");
        assert_eq!(ValueDescriptor::from(RuntimeValue::Text("a".into())).short_form(), "\"a\"");
    }

    #[test]
    fn test_variable_constructors() {
        assert!(Variable::argument("args", 0).is_argument);
        assert!(!Variable::local("x", 1).is_argument);
        assert!(Field::shared("count", 7).is_static);
    }
}
