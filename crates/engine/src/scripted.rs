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

//! In-memory [`DebugTarget`] replaying a script.
//!
//! A [`ScriptedTarget`] delivers a queue of event sets. Each set can carry a new
//! [`ScriptedWorld`] (the stacks, statics and heap visible while suspended there) and
//! the output the program printed before reaching it. Individual variables, fields,
//! objects and whole stacks can be made unreadable to exercise failure handling.

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use tokio::sync::mpsc::UnboundedSender;

use crate::{
    ChannelOutput, DebugEvent, DebugTarget, EventSet, Field, Location, ObjectRef, RuntimeValue,
    StackFrameRef, TargetError, ThreadId, TypeRef, Variable,
};

/// One frame of a scripted stack
#[derive(Debug, Clone)]
pub struct ScriptedFrame {
    location: Location,
    variables: Option<Vec<(Variable, Option<RuntimeValue>)>>,
}

impl ScriptedFrame {
    /// Frame executing `method` of `class_name` at `line`
    pub fn new(class_name: &str, method: &str, line: i64) -> Self {
        Self {
            location: Location::new(TypeRef::new(0, class_name), method, line),
            variables: Some(Vec::new()),
        }
    }

    /// Add a method argument
    pub fn argument(self, name: &str, value: RuntimeValue) -> Self {
        self.variable(name, true, Some(value))
    }

    /// Add a local variable
    pub fn local(self, name: &str, value: RuntimeValue) -> Self {
        self.variable(name, false, Some(value))
    }

    /// Add a local variable whose value cannot be read
    pub fn unreadable_local(self, name: &str) -> Self {
        self.variable(name, false, None)
    }

    /// Make the frame report absent debug information
    pub fn without_debug_info(mut self) -> Self {
        self.variables = None;
        self
    }

    fn variable(mut self, name: &str, is_argument: bool, value: Option<RuntimeValue>) -> Self {
        if let Some(variables) = self.variables.as_mut() {
            let slot = variables.len() as u32;
            let variable =
                Variable { name: name.into(), is_argument, slot, signature: String::new() };
            variables.push((variable, value));
        }
        self
    }
}

#[derive(Debug, Clone)]
enum ScriptedObject {
    Array(Option<Vec<RuntimeValue>>),
    Object(Option<Vec<(Field, Option<RuntimeValue>)>>),
}

/// Target state visible while suspended at one event set
#[derive(Debug, Clone, Default)]
pub struct ScriptedWorld {
    stacks: HashMap<ThreadId, Vec<ScriptedFrame>>,
    statics: HashMap<String, Vec<(Field, Option<RuntimeValue>)>>,
    objects: HashMap<u64, ScriptedObject>,
    unreadable_stacks: bool,
    next_field_id: u64,
}

impl ScriptedWorld {
    /// Empty world
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a frame on `thread`; frames are added innermost first
    pub fn frame(mut self, thread: ThreadId, frame: ScriptedFrame) -> Self {
        self.stacks.entry(thread).or_default().push(frame);
        self
    }

    /// Add a static field to `class_name`
    pub fn static_field(mut self, class_name: &str, name: &str, value: RuntimeValue) -> Self {
        let field = self.field(name, true);
        self.statics.entry(class_name.into()).or_default().push((field, Some(value)));
        self
    }

    /// Add a static field whose value cannot be read
    pub fn unreadable_static(mut self, class_name: &str, name: &str) -> Self {
        let field = self.field(name, true);
        self.statics.entry(class_name.into()).or_default().push((field, None));
        self
    }

    /// Define the elements of array `id`
    pub fn array(mut self, id: u64, elements: Vec<RuntimeValue>) -> Self {
        self.objects.insert(id, ScriptedObject::Array(Some(elements)));
        self
    }

    /// Define the instance fields of object `id`, in declaration order
    pub fn object(mut self, id: u64, fields: Vec<(&str, RuntimeValue)>) -> Self {
        let fields = fields
            .into_iter()
            .map(|(name, value)| (self.field(name, false), Some(value)))
            .collect();
        self.objects.insert(id, ScriptedObject::Object(Some(fields)));
        self
    }

    /// Make the contents of object or array `id` unreadable
    pub fn unreadable_object(mut self, id: u64) -> Self {
        self.objects.insert(id, ScriptedObject::Object(None));
        self
    }

    /// Make every stack unreadable
    pub fn without_stacks(mut self) -> Self {
        self.unreadable_stacks = true;
        self
    }

    fn field(&mut self, name: &str, is_static: bool) -> Field {
        self.next_field_id += 1;
        Field { name: name.into(), is_static, id: self.next_field_id }
    }

    fn top_location(&self, thread: ThreadId) -> Location {
        self.stacks
            .get(&thread)
            .and_then(|stack| stack.first())
            .map(|frame| frame.location.clone())
            .unwrap_or_else(|| Location::new(TypeRef::new(0, ""), "", -1))
    }

    fn scripted_frame(&self, frame: &StackFrameRef) -> Result<&ScriptedFrame, TargetError> {
        self.stacks
            .get(&frame.thread)
            .and_then(|stack| stack.get(frame.id as usize))
            .ok_or_else(|| TargetError::Protocol(format!("frame {} is no longer valid", frame.id)))
    }
}

#[derive(Debug)]
enum ScriptItem {
    Events { set: EventSet, output: String, world: Option<ScriptedWorld> },
    Timeout,
    Failure(String),
}

/// A scripted, in-memory debug target
#[derive(Debug, Default)]
pub struct ScriptedTarget {
    items: VecDeque<ScriptItem>,
    world: ScriptedWorld,
    output: Option<UnboundedSender<String>>,
    pending_output: String,
    fail_step_requests: bool,

    suspended: bool,
    suspended_waits: u64,
    resumes: u64,
    terminated: Option<i32>,
    watched_scopes: Vec<String>,
    step_requests: Vec<(ThreadId, String)>,
}

impl ScriptedTarget {
    /// Target whose output goes nowhere
    pub fn new() -> Self {
        Self::default()
    }

    /// Target and the source of the output it prints
    pub fn with_output() -> (Self, ChannelOutput) {
        let (tx, output) = ChannelOutput::channel();
        (Self { output: Some(tx), ..Self::default() }, output)
    }

    /// The VM starts on `thread`
    pub fn vm_start(&mut self, thread: ThreadId) -> &mut Self {
        self.events(DebugEvent::VmStart { thread })
    }

    /// `type_name` gets prepared on `thread`
    pub fn class_prepare(&mut self, thread: ThreadId, type_name: &str) -> &mut Self {
        self.events(DebugEvent::ClassPrepare { thread, type_name: type_name.into() })
    }

    /// A step on `thread` lands at the top frame of `world`
    pub fn step(&mut self, thread: ThreadId, world: ScriptedWorld) -> &mut Self {
        let location = world.top_location(thread);
        let set = EventSet::from(DebugEvent::Step { thread, location });
        self.push(ScriptItem::Events { set, output: String::new(), world: Some(world) })
    }

    /// The VM dies
    pub fn vm_death(&mut self) -> &mut Self {
        self.events(DebugEvent::VmDeath)
    }

    /// Deliver an arbitrary event set
    pub fn events(&mut self, set: impl Into<EventSet>) -> &mut Self {
        self.push(ScriptItem::Events { set: set.into(), output: String::new(), world: None })
    }

    /// The program prints `text` before the next scripted item is delivered
    pub fn print(&mut self, text: &str) -> &mut Self {
        self.pending_output.push_str(text);
        self
    }

    /// The next wait times out
    pub fn timeout(&mut self) -> &mut Self {
        self.push(ScriptItem::Timeout)
    }

    /// The next wait fails
    pub fn failure(&mut self, message: &str) -> &mut Self {
        self.push(ScriptItem::Failure(message.into()))
    }

    /// Reject every step request
    pub fn reject_step_requests(&mut self) -> &mut Self {
        self.fail_step_requests = true;
        self
    }

    fn push(&mut self, mut item: ScriptItem) -> &mut Self {
        if let ScriptItem::Events { output, .. } = &mut item {
            *output = std::mem::take(&mut self.pending_output);
        }
        self.items.push_back(item);
        self
    }

    /// Whether the last delivered event set has not been resumed
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Waits started while the target was still suspended
    pub fn suspended_waits(&self) -> u64 {
        self.suspended_waits
    }

    /// Number of resumes
    pub fn resumes(&self) -> u64 {
        self.resumes
    }

    /// Exit code, if the target was terminated
    pub fn terminated(&self) -> Option<i32> {
        self.terminated
    }

    /// Scopes watched for class prepare
    pub fn watched_scopes(&self) -> &[String] {
        &self.watched_scopes
    }

    /// Installed step requests
    pub fn step_requests(&self) -> &[(ThreadId, String)] {
        &self.step_requests
    }

    /// Scripted items not delivered yet
    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    fn ensure_running(&self) -> Result<(), TargetError> {
        match self.terminated {
            Some(_) => Err(TargetError::Disconnected),
            None => Ok(()),
        }
    }

    fn object(&self, object: &ObjectRef) -> Result<&ScriptedObject, TargetError> {
        self.world
            .objects
            .get(&object.id)
            .ok_or_else(|| TargetError::Protocol(format!("unknown object {}", object.id)))
    }
}

fn unreadable(name: &str) -> TargetError {
    TargetError::Protocol(format!("{name} is unreadable"))
}

impl DebugTarget for ScriptedTarget {
    fn watch_class_prepare(&mut self, scope: &str) -> Result<(), TargetError> {
        self.ensure_running()?;
        self.watched_scopes.push(scope.into());
        Ok(())
    }

    fn enable_line_steps(&mut self, thread: ThreadId, scope: &str) -> Result<(), TargetError> {
        self.ensure_running()?;
        if self.fail_step_requests {
            return Err(TargetError::Rejected(21));
        }
        self.step_requests.push((thread, scope.into()));
        Ok(())
    }

    fn next_event_set(&mut self, _timeout: Duration) -> Result<Option<EventSet>, TargetError> {
        self.ensure_running()?;
        if self.suspended {
            self.suspended_waits += 1;
        }

        match self.items.pop_front() {
            None | Some(ScriptItem::Timeout) => Ok(None),
            Some(ScriptItem::Failure(message)) => Err(TargetError::Protocol(message)),
            Some(ScriptItem::Events { set, output, world }) => {
                if let (Some(tx), false) = (&self.output, output.is_empty()) {
                    let _ = tx.send(output);
                }
                if let Some(world) = world {
                    self.world = world;
                }
                self.suspended = true;
                Ok(Some(set))
            }
        }
    }

    fn resume(&mut self) -> Result<(), TargetError> {
        self.ensure_running()?;
        self.suspended = false;
        self.resumes += 1;
        Ok(())
    }

    fn terminate(&mut self, exit_code: i32) -> Result<(), TargetError> {
        self.terminated = Some(exit_code);
        self.suspended = false;
        Ok(())
    }

    fn frames(&mut self, thread: ThreadId) -> Result<Vec<StackFrameRef>, TargetError> {
        if self.world.unreadable_stacks {
            return Err(TargetError::Protocol("stack is unreadable".into()));
        }
        let stack = self.world.stacks.get(&thread).map(Vec::as_slice).unwrap_or_default();
        Ok(stack
            .iter()
            .enumerate()
            .map(|(id, frame)| StackFrameRef {
                thread,
                id: id as u64,
                location: frame.location.clone(),
            })
            .collect())
    }

    fn visible_variables(&mut self, frame: &StackFrameRef) -> Result<Vec<Variable>, TargetError> {
        let scripted = self.world.scripted_frame(frame)?;
        let variables = scripted.variables.as_ref().ok_or(TargetError::AbsentInformation)?;
        Ok(variables.iter().map(|(variable, _)| variable.clone()).collect())
    }

    fn variable_value(
        &mut self,
        frame: &StackFrameRef,
        variable: &Variable,
    ) -> Result<RuntimeValue, TargetError> {
        let scripted = self.world.scripted_frame(frame)?;
        scripted
            .variables
            .as_ref()
            .and_then(|variables| variables.iter().find(|(v, _)| v.name == variable.name))
            .and_then(|(_, value)| value.clone())
            .ok_or_else(|| unreadable(&variable.name))
    }

    fn static_fields(&mut self, ty: &TypeRef) -> Result<Vec<Field>, TargetError> {
        Ok(self
            .world
            .statics
            .get(&ty.name)
            .map(|fields| fields.iter().map(|(field, _)| field.clone()).collect())
            .unwrap_or_default())
    }

    fn static_value(&mut self, ty: &TypeRef, field: &Field) -> Result<RuntimeValue, TargetError> {
        self.world
            .statics
            .get(&ty.name)
            .and_then(|fields| fields.iter().find(|(f, _)| f.id == field.id))
            .and_then(|(_, value)| value.clone())
            .ok_or_else(|| unreadable(&field.name))
    }

    fn instance_fields(&mut self, object: &ObjectRef) -> Result<Vec<Field>, TargetError> {
        match self.object(object)? {
            ScriptedObject::Object(Some(fields)) => {
                Ok(fields.iter().map(|(field, _)| field.clone()).collect())
            }
            ScriptedObject::Array(_) => Ok(Vec::new()),
            ScriptedObject::Object(None) => Err(unreadable(&object.type_name)),
        }
    }

    fn instance_value(
        &mut self,
        object: &ObjectRef,
        field: &Field,
    ) -> Result<RuntimeValue, TargetError> {
        match self.object(object)? {
            ScriptedObject::Object(Some(fields)) => fields
                .iter()
                .find(|(f, _)| f.id == field.id)
                .and_then(|(_, value)| value.clone())
                .ok_or_else(|| unreadable(&field.name)),
            _ => Err(unreadable(&field.name)),
        }
    }

    fn array_elements(&mut self, array: &ObjectRef) -> Result<Vec<RuntimeValue>, TargetError> {
        match self.object(array)? {
            ScriptedObject::Array(Some(elements)) => Ok(elements.clone()),
            _ => Err(unreadable(&array.type_name)),
        }
    }
}
