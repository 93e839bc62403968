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

//! Snapshot builder.
//!
//! Turns one suspended step of a [`DebugTarget`] into a self-contained [`StepRecord`]:
//!
//! - **Call stack**: every frame executing in the entry scope, with its arguments in
//!   short form
//! - **Locals**: every variable visible in the innermost frame
//! - **Statics**: static fields of the type declaring the current location
//! - **Heap**: objects referenced from locals and statics, one level deep
//!
//! Individual unreadable items are left out of the record. Only a stack that cannot
//! be read at all fails the build.

use std::collections::HashSet;

use indexmap::IndexMap;
use snapstep_common::types::{
    Frame, HeapEntry, HeapTable, RefId, StepRecord, ValueDescriptor, ValueMap,
};
use thiserror::Error;
use tracing::debug;

use crate::{DebugTarget, Location, ObjectRef, RuntimeValue, StackFrameRef, TargetError, ThreadId};

/// Errors that prevent a step record from being built
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The stack of the stepping thread could not be read
    #[error("failed to read the call stack: {0}")]
    Stack(#[from] TargetError),

    /// The stepping thread reported no frames
    #[error("thread {0} has no frames")]
    EmptyStack(ThreadId),
}

/// Object reached from a local or a static, waiting to be materialized
#[derive(Debug)]
enum HeapRoot {
    Array(ObjectRef),
    Object(ObjectRef),
}

/// Builds the [`StepRecord`] of one suspended step
pub struct SnapshotBuilder<'a, T: ?Sized> {
    target: &'a mut T,
    entry_scope: &'a str,
    registered: HashSet<RefId>,
    roots: Vec<HeapRoot>,
}

impl<'a, T> SnapshotBuilder<'a, T>
where
    T: DebugTarget + ?Sized,
{
    /// Create a builder reading from `target`, keeping frames of `entry_scope`
    pub fn new(target: &'a mut T, entry_scope: &'a str) -> Self {
        Self { target, entry_scope, registered: HashSet::new(), roots: Vec::new() }
    }

    /// Build the record of step number `step`, suspended at `location` on `thread`
    pub fn build(
        mut self,
        thread: ThreadId,
        location: &Location,
        step: u64,
        stdout: String,
    ) -> Result<StepRecord, SnapshotError> {
        let frames = self.target.frames(thread)?;
        let top = frames.first().ok_or(SnapshotError::EmptyStack(thread))?;

        let call_stack = self.call_stack(&frames);
        let variables = self.locals(top);
        let statics = self.statics(location);
        let heap = self.materialize_heap();

        Ok(StepRecord {
            step,
            line: location.line,
            class_name: location.declaring_type.name.clone(),
            method_name: location.method.clone(),
            call_stack,
            variables,
            statics,
            heap,
            stdout,
        })
    }

    /// In-scope frames, innermost first, with arguments in short form
    fn call_stack(&mut self, frames: &[StackFrameRef]) -> Vec<Frame> {
        let scope = self.entry_scope;
        frames
            .iter()
            .filter(|frame| frame.location.declaring_type.name == scope)
            .map(|frame| Frame {
                class_name: frame.location.declaring_type.name.clone(),
                method_name: frame.location.method.clone(),
                line: frame.location.line,
                params: self.arguments(frame),
            })
            .collect()
    }

    fn arguments(&mut self, frame: &StackFrameRef) -> IndexMap<String, String> {
        let mut params = IndexMap::new();
        let variables = match self.target.visible_variables(frame) {
            Ok(variables) => variables,
            Err(e) => {
                debug!(frame = %frame.location, error = %e, "Frame arguments unavailable");
                return params;
            }
        };

        for variable in variables.iter().filter(|v| v.is_argument) {
            match self.target.variable_value(frame, variable) {
                Ok(value) => {
                    params.insert(variable.name.clone(), ValueDescriptor::from(value).short_form());
                }
                Err(e) => debug!(name = %variable.name, error = %e, "Skipping unreadable argument"),
            }
        }
        params
    }

    fn locals(&mut self, frame: &StackFrameRef) -> ValueMap {
        let mut locals = ValueMap::new();
        let variables = match self.target.visible_variables(frame) {
            Ok(variables) => variables,
            Err(e) => {
                debug!(frame = %frame.location, error = %e, "Locals unavailable");
                return locals;
            }
        };

        for variable in &variables {
            match self.target.variable_value(frame, variable) {
                Ok(value) => {
                    let descriptor = self.describe(value);
                    locals.insert(variable.name.clone(), descriptor);
                }
                Err(e) => debug!(name = %variable.name, error = %e, "Skipping unreadable local"),
            }
        }
        locals
    }

    fn statics(&mut self, location: &Location) -> ValueMap {
        let mut statics = ValueMap::new();
        let ty = &location.declaring_type;
        let fields = match self.target.static_fields(ty) {
            Ok(fields) => fields,
            Err(e) => {
                debug!(ty = %ty.name, error = %e, "Statics unavailable");
                return statics;
            }
        };

        for field in fields.iter().filter(|f| f.is_static) {
            match self.target.static_value(ty, field) {
                Ok(value) => {
                    let descriptor = self.describe(value);
                    statics.insert(field.name.clone(), descriptor);
                }
                Err(e) => debug!(name = %field.name, error = %e, "Skipping unreadable static"),
            }
        }
        statics
    }

    /// Full descriptor of a value; arrays and objects are registered for the heap
    fn describe(&mut self, value: RuntimeValue) -> ValueDescriptor {
        match &value {
            RuntimeValue::Array(object) => self.register(HeapRoot::Array(object.clone())),
            RuntimeValue::Object(object) => self.register(HeapRoot::Object(object.clone())),
            _ => {}
        }
        ValueDescriptor::from(value)
    }

    fn register(&mut self, root: HeapRoot) {
        let (HeapRoot::Array(object) | HeapRoot::Object(object)) = &root;
        if self.registered.insert(RefId(object.id)) {
            self.roots.push(root);
        }
    }

    fn materialize_heap(&mut self) -> HeapTable {
        let mut heap = HeapTable::new();
        for root in std::mem::take(&mut self.roots) {
            let (id, entry) = match root {
                HeapRoot::Array(array) => (RefId(array.id), self.array_entry(array)),
                HeapRoot::Object(object) => (RefId(object.id), self.object_entry(object)),
            };
            match entry {
                Ok(entry) => {
                    heap.insert(id, entry);
                }
                Err(e) => debug!(%id, error = %e, "Omitting unreadable heap entry"),
            }
        }
        heap
    }

    fn array_entry(&mut self, array: ObjectRef) -> Result<HeapEntry, TargetError> {
        let elements = self
            .target
            .array_elements(&array)?
            .into_iter()
            .map(|value| ValueDescriptor::from(value).short_form())
            .collect();
        Ok(HeapEntry::Array { type_name: array.type_name, elements })
    }

    fn object_entry(&mut self, object: ObjectRef) -> Result<HeapEntry, TargetError> {
        let mut fields = IndexMap::new();
        for field in self.target.instance_fields(&object)?.iter().filter(|f| !f.is_static) {
            match self.target.instance_value(&object, field) {
                Ok(value) => {
                    fields.insert(field.name.clone(), ValueDescriptor::from(value).short_form());
                }
                Err(e) => debug!(name = %field.name, error = %e, "Skipping unreadable field"),
            }
        }
        Ok(HeapEntry::Object { type_name: object.type_name, fields })
    }
}
