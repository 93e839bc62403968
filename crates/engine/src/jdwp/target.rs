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

//! [`DebugTarget`] over a JDWP connection.
//!
//! Structural data that never changes while the VM lives (type names, method tables,
//! line and variable tables, field lists, object types) is cached per id. Frame
//! handles are only remembered until the next resume.

use std::{
    collections::{HashMap, HashSet},
    process::Child,
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use super::{
    codec::{
        event_kind, signature_to_name, tag, IdSizes, PacketReader, WireEvent, WireLocation,
        WireValue,
    },
    connection::Connection,
};
use crate::{
    DebugEvent, DebugTarget, EventSet, Field, Location, ObjectRef, RuntimeValue, StackFrameRef,
    TargetError, ThreadId, TypeRef, Variable,
};

/// Command sets and commands used by the backend
mod command {
    pub(super) const VM_ID_SIZES: (u8, u8) = (1, 7);
    pub(super) const VM_RESUME: (u8, u8) = (1, 9);
    pub(super) const VM_EXIT: (u8, u8) = (1, 10);
    pub(super) const TYPE_SIGNATURE: (u8, u8) = (2, 1);
    pub(super) const TYPE_FIELDS: (u8, u8) = (2, 4);
    pub(super) const TYPE_METHODS: (u8, u8) = (2, 5);
    pub(super) const TYPE_GET_VALUES: (u8, u8) = (2, 6);
    pub(super) const TYPE_INTERFACES: (u8, u8) = (2, 10);
    pub(super) const CLASS_SUPERCLASS: (u8, u8) = (3, 1);
    pub(super) const METHOD_LINE_TABLE: (u8, u8) = (6, 1);
    pub(super) const METHOD_VARIABLE_TABLE: (u8, u8) = (6, 2);
    pub(super) const OBJECT_REFERENCE_TYPE: (u8, u8) = (9, 1);
    pub(super) const OBJECT_GET_VALUES: (u8, u8) = (9, 2);
    pub(super) const STRING_VALUE: (u8, u8) = (10, 1);
    pub(super) const THREAD_FRAMES: (u8, u8) = (11, 6);
    pub(super) const ARRAY_LENGTH: (u8, u8) = (13, 1);
    pub(super) const ARRAY_GET_VALUES: (u8, u8) = (13, 2);
    pub(super) const EVENT_REQUEST_SET: (u8, u8) = (15, 1);
    pub(super) const FRAME_GET_VALUES: (u8, u8) = (16, 1);
}

const SUSPEND_ALL: u8 = 2;
const MOD_CLASS_MATCH: u8 = 5;
const MOD_STEP: u8 = 10;
const STEP_LINE: i32 = 1;
const STEP_INTO: i32 = 0;

const ACC_STATIC: i32 = 0x0008;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
struct VariableSlot {
    name: String,
    signature: String,
    start: u64,
    length: u64,
    slot: u32,
}

#[derive(Debug)]
struct VariableTable {
    argument_count: u32,
    slots: Vec<VariableSlot>,
}

impl VariableTable {
    /// Variables in scope at `index`; the innermost declaration of a name wins
    fn visible_at(&self, index: u64) -> Vec<Variable> {
        let mut visible: Vec<&VariableSlot> = Vec::new();
        for slot in self.slots.iter().filter(|s| s.start <= index && index < s.start + s.length) {
            if is_internal_name(&slot.name) {
                continue;
            }
            match visible.iter_mut().find(|v| v.name == slot.name) {
                Some(existing) if slot.start > existing.start => *existing = slot,
                Some(_) => {}
                None => visible.push(slot),
            }
        }
        visible.sort_by_key(|slot| slot.slot);
        visible
            .into_iter()
            .map(|slot| Variable {
                name: slot.name.clone(),
                is_argument: slot.slot < self.argument_count,
                slot: slot.slot,
                signature: slot.signature.clone(),
            })
            .collect()
    }
}

/// Compiler-generated receiver names that are not source variables
fn is_internal_name(name: &str) -> bool {
    name == "this" || name.starts_with("this$") || name.starts_with("this+")
}

/// A field together with the type declaring it
#[derive(Debug, Clone, PartialEq, Eq)]
struct DeclaredField {
    holder: u64,
    field: Field,
}

/// Combine a type's own fields with the visible fields of its direct supertypes.
///
/// Own fields hide inherited fields of the same name. A name inherited as two
/// different fields is ambiguous and left out.
fn merge_visible_fields(
    own: Vec<DeclaredField>,
    supertypes: &[Arc<Vec<DeclaredField>>],
) -> Vec<DeclaredField> {
    let mut inherited: Vec<DeclaredField> = Vec::new();
    let mut ambiguous: HashSet<String> = HashSet::new();
    for candidate in supertypes.iter().flat_map(|fields| fields.iter()) {
        if ambiguous.contains(&candidate.field.name) {
            continue;
        }
        match inherited.iter().position(|f| f.field.name == candidate.field.name) {
            None => inherited.push(candidate.clone()),
            Some(index) if inherited[index] != *candidate => {
                ambiguous.insert(candidate.field.name.clone());
                inherited.remove(index);
            }
            // The same interface field reached along two paths
            Some(_) => {}
        }
    }

    inherited.retain(|f| !own.iter().any(|o| o.field.name == f.field.name));
    let mut fields = own;
    fields.extend(inherited);
    fields
}

/// A JVM under JDWP control
#[derive(Debug)]
pub struct JdwpTarget {
    conn: Connection,
    child: Option<Child>,
    pump: Option<JoinHandle<()>>,
    alive: bool,
    type_names: HashMap<u64, String>,
    methods: HashMap<u64, HashMap<u64, String>>,
    line_tables: HashMap<(u64, u64), Option<Arc<Vec<(u64, i64)>>>>,
    variable_tables: HashMap<(u64, u64), Option<Arc<VariableTable>>>,
    fields: HashMap<u64, Arc<Vec<DeclaredField>>>,
    object_types: HashMap<u64, u64>,
    frame_locations: HashMap<u64, WireLocation>,
}

impl JdwpTarget {
    /// Handshake over an accepted connection and negotiate id sizes.
    ///
    /// `child` is killed when the target is dropped; `pump` is the thread forwarding the
    /// child's stdout and is joined once the VM is gone.
    pub fn attach(
        stream: std::net::TcpStream,
        mut child: Option<Child>,
        pump: Option<JoinHandle<()>>,
    ) -> Result<Self, TargetError> {
        let conn = match Self::negotiate(stream) {
            Ok(conn) => conn,
            Err(e) => {
                if let Some(child) = child.as_mut() {
                    let _ = child.kill();
                    let _ = child.wait();
                }
                return Err(e);
            }
        };

        Ok(Self {
            conn,
            child,
            pump,
            alive: true,
            type_names: HashMap::new(),
            methods: HashMap::new(),
            line_tables: HashMap::new(),
            variable_tables: HashMap::new(),
            fields: HashMap::new(),
            object_types: HashMap::new(),
            frame_locations: HashMap::new(),
        })
    }

    fn negotiate(stream: std::net::TcpStream) -> Result<Connection, TargetError> {
        let mut conn = Connection::handshake(stream, HANDSHAKE_TIMEOUT)?;
        let (set, cmd) = command::VM_ID_SIZES;
        let sizes = IdSizes::decode(&mut conn.request(set, cmd, Bytes::new())?)?;
        conn.set_sizes(sizes);
        debug!(?sizes, "Negotiated JDWP id sizes");
        Ok(conn)
    }

    fn request(&mut self, (set, cmd): (u8, u8), data: Bytes) -> Result<PacketReader, TargetError> {
        if !self.alive {
            return Err(TargetError::Disconnected);
        }
        let result = self.conn.request(set, cmd, data);
        // A VM that stops answering is treated as gone so teardown never waits on it
        if matches!(result, Err(TargetError::Disconnected | TargetError::Timeout(_))) {
            self.alive = false;
        }
        result
    }

    fn type_name(&mut self, type_id: u64) -> Result<String, TargetError> {
        if let Some(name) = self.type_names.get(&type_id) {
            return Ok(name.clone());
        }
        let data = self.conn.writer().reference_type_id(type_id).finish();
        let signature = self.request(command::TYPE_SIGNATURE, data)?.string()?;
        let name = signature_to_name(&signature);
        self.type_names.insert(type_id, name.clone());
        Ok(name)
    }

    fn method_name(&mut self, type_id: u64, method_id: u64) -> Result<String, TargetError> {
        if !self.methods.contains_key(&type_id) {
            let data = self.conn.writer().reference_type_id(type_id).finish();
            let mut reply = self.request(command::TYPE_METHODS, data)?;
            let mut methods = HashMap::new();
            for _ in 0..reply.count()? {
                let id = reply.method_id()?;
                let name = reply.string()?;
                let _signature = reply.string()?;
                let _modifiers = reply.i32()?;
                methods.insert(id, name);
            }
            self.methods.insert(type_id, methods);
        }
        self.methods
            .get(&type_id)
            .and_then(|methods| methods.get(&method_id))
            .cloned()
            .ok_or_else(|| TargetError::Protocol(format!("unknown method {method_id}")))
    }

    fn line_of(&mut self, location: &WireLocation) -> Result<i64, TargetError> {
        let key = (location.class_id, location.method_id);
        let table = match self.line_tables.get(&key) {
            Some(table) => table.clone(),
            None => {
                let table = self.load_line_table(key)?;
                self.line_tables.insert(key, table.clone());
                table
            }
        };
        let Some(table) = table else { return Ok(-1) };
        Ok(table
            .iter()
            .take_while(|(index, _)| *index <= location.index)
            .last()
            .map(|(_, line)| *line)
            .unwrap_or(-1))
    }

    fn load_line_table(
        &mut self,
        (type_id, method_id): (u64, u64),
    ) -> Result<Option<Arc<Vec<(u64, i64)>>>, TargetError> {
        let data = self.conn.writer().reference_type_id(type_id).method_id(method_id).finish();
        let mut reply = match self.request(command::METHOD_LINE_TABLE, data) {
            Ok(reply) => reply,
            Err(TargetError::AbsentInformation) => return Ok(None),
            Err(e) => return Err(e),
        };
        let _start = reply.i64()?;
        let _end = reply.i64()?;
        let mut lines = Vec::new();
        for _ in 0..reply.count()? {
            let index = reply.i64()? as u64;
            let line = reply.i32()?;
            lines.push((index, i64::from(line)));
        }
        lines.sort_by_key(|(index, _)| *index);
        Ok(Some(Arc::new(lines)))
    }

    fn variable_table(
        &mut self,
        type_id: u64,
        method_id: u64,
    ) -> Result<Arc<VariableTable>, TargetError> {
        let key = (type_id, method_id);
        if let Some(table) = self.variable_tables.get(&key) {
            return table.clone().ok_or(TargetError::AbsentInformation);
        }

        let data = self.conn.writer().reference_type_id(type_id).method_id(method_id).finish();
        let table = match self.request(command::METHOD_VARIABLE_TABLE, data) {
            Ok(mut reply) => {
                let argument_count = reply.i32()?.max(0) as u32;
                let mut slots = Vec::new();
                for _ in 0..reply.count()? {
                    slots.push(VariableSlot {
                        start: reply.i64()? as u64,
                        name: reply.string()?,
                        signature: reply.string()?,
                        length: reply.i32()?.max(0) as u64,
                        slot: reply.i32()?.max(0) as u32,
                    });
                }
                Some(Arc::new(VariableTable { argument_count, slots }))
            }
            Err(TargetError::AbsentInformation) => None,
            Err(e) => return Err(e),
        };
        self.variable_tables.insert(key, table.clone());
        table.ok_or(TargetError::AbsentInformation)
    }

    /// Visible fields of a type: its own fields, then the inherited ones it does not
    /// hide, collected from the superclass and every superinterface
    fn visible_fields(&mut self, type_id: u64) -> Result<Arc<Vec<DeclaredField>>, TargetError> {
        if let Some(fields) = self.fields.get(&type_id) {
            return Ok(fields.clone());
        }

        let own = self.declared_fields(type_id)?;
        let mut inherited = Vec::new();
        for parent in self.inherited_types(type_id)? {
            inherited.push(self.visible_fields(parent)?);
        }

        let fields = Arc::new(merge_visible_fields(own, &inherited));
        self.fields.insert(type_id, fields.clone());
        Ok(fields)
    }

    /// Fields declared by the type itself, synthetic ones included
    fn declared_fields(&mut self, type_id: u64) -> Result<Vec<DeclaredField>, TargetError> {
        let data = self.conn.writer().reference_type_id(type_id).finish();
        let mut reply = self.request(command::TYPE_FIELDS, data)?;
        let mut fields = Vec::new();
        for _ in 0..reply.count()? {
            let id = reply.field_id()?;
            let name = reply.string()?;
            let _signature = reply.string()?;
            let modifiers = reply.i32()?;
            fields.push(DeclaredField {
                holder: type_id,
                field: Field { name, is_static: modifiers & ACC_STATIC != 0, id },
            });
        }
        Ok(fields)
    }

    /// Direct supertypes: the superclass first, then the direct superinterfaces
    fn inherited_types(&mut self, type_id: u64) -> Result<Vec<u64>, TargetError> {
        let mut types = Vec::new();

        let data = self.conn.writer().reference_type_id(type_id).finish();
        match self.request(command::CLASS_SUPERCLASS, data) {
            Ok(mut reply) => match reply.reference_type_id()? {
                0 => {}
                superclass => types.push(superclass),
            },
            // Interfaces and array types have no superclass
            Err(TargetError::Rejected(_)) => {}
            Err(e) => return Err(e),
        }

        let data = self.conn.writer().reference_type_id(type_id).finish();
        let mut reply = self.request(command::TYPE_INTERFACES, data)?;
        for _ in 0..reply.count()? {
            types.push(reply.reference_type_id()?);
        }
        Ok(types)
    }

    fn object_type(&mut self, object_id: u64) -> Result<u64, TargetError> {
        if let Some(type_id) = self.object_types.get(&object_id) {
            return Ok(*type_id);
        }
        let data = self.conn.writer().object_id(object_id).finish();
        let mut reply = self.request(command::OBJECT_REFERENCE_TYPE, data)?;
        let _type_tag = reply.u8()?;
        let type_id = reply.reference_type_id()?;
        self.object_types.insert(object_id, type_id);
        Ok(type_id)
    }

    fn string_value(&mut self, object_id: u64) -> Result<String, TargetError> {
        let data = self.conn.writer().object_id(object_id).finish();
        self.request(command::STRING_VALUE, data)?.string()
    }

    fn runtime_value(&mut self, value: WireValue) -> Result<RuntimeValue, TargetError> {
        match value {
            WireValue::Void | WireValue::Object { id: 0, .. } => Ok(RuntimeValue::Null),
            WireValue::Primitive(primitive) => Ok(RuntimeValue::Primitive(primitive)),
            WireValue::Object { tag: tag::STRING, id } => {
                Ok(RuntimeValue::Text(self.string_value(id)?))
            }
            WireValue::Object { tag: kind, id } => {
                let type_id = self.object_type(id)?;
                let object = ObjectRef::new(id, self.type_name(type_id)?);
                Ok(if kind == tag::ARRAY {
                    RuntimeValue::Array(object)
                } else {
                    RuntimeValue::Object(object)
                })
            }
        }
    }

    /// Read a reply carrying a single tagged value
    fn single_value(&mut self, mut reply: PacketReader) -> Result<RuntimeValue, TargetError> {
        if reply.count()? != 1 {
            return Err(TargetError::Protocol("expected exactly one value".into()));
        }
        let value = reply.tagged_value()?;
        self.runtime_value(value)
    }

    fn resolve_location(&mut self, location: &WireLocation) -> Result<Location, TargetError> {
        let name = self.type_name(location.class_id)?;
        let method = self.method_name(location.class_id, location.method_id)?;
        let line = self.line_of(location)?;
        Ok(Location::new(TypeRef::new(location.class_id, name), method, line))
    }

    fn translate(&mut self, event: WireEvent) -> DebugEvent {
        match event {
            WireEvent::VmStart { thread } => DebugEvent::VmStart { thread },
            WireEvent::ClassPrepare { thread, type_id, signature } => {
                let type_name = signature_to_name(&signature);
                self.type_names.insert(type_id, type_name.clone());
                DebugEvent::ClassPrepare { thread, type_name }
            }
            WireEvent::Located { kind: event_kind::SINGLE_STEP, thread, location } => {
                match self.resolve_location(&location) {
                    Ok(location) => DebugEvent::Step { thread, location },
                    Err(e) => {
                        warn!(error = %e, "Failed to resolve step location");
                        DebugEvent::Other
                    }
                }
            }
            WireEvent::VmDeath => {
                self.settle();
                DebugEvent::VmDeath
            }
            other => {
                trace!(event = ?other, "Unhandled JDWP event");
                DebugEvent::Other
            }
        }
    }

    /// The VM is going away: wait for the process and its output to finish
    fn settle(&mut self) {
        self.alive = false;
        self.frame_locations.clear();

        let Some(child) = self.child.as_mut() else { return };
        let deadline = Instant::now() + SETTLE_TIMEOUT;
        let exited = loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    info!(%status, "Target exited");
                    break true;
                }
                Ok(None) if Instant::now() < deadline => thread::sleep(Duration::from_millis(10)),
                Ok(None) => break false,
                Err(e) => {
                    debug!(error = %e, "Failed to poll target process");
                    break false;
                }
            }
        };

        if exited {
            if let Some(pump) = self.pump.take() {
                if pump.join().is_err() {
                    debug!("Output pump panicked");
                }
            }
        }
    }
}

impl DebugTarget for JdwpTarget {
    fn watch_class_prepare(&mut self, scope: &str) -> Result<(), TargetError> {
        let data = self
            .conn
            .writer()
            .u8(event_kind::CLASS_PREPARE)
            .u8(SUSPEND_ALL)
            .i32(1)
            .u8(MOD_CLASS_MATCH)
            .string(scope)
            .finish();
        let request_id = self.request(command::EVENT_REQUEST_SET, data)?.i32()?;
        debug!(scope, request_id, "Watching class prepare");
        Ok(())
    }

    fn enable_line_steps(&mut self, thread: ThreadId, scope: &str) -> Result<(), TargetError> {
        let data = self
            .conn
            .writer()
            .u8(event_kind::SINGLE_STEP)
            .u8(SUSPEND_ALL)
            .i32(2)
            .u8(MOD_STEP)
            .object_id(thread)
            .i32(STEP_LINE)
            .i32(STEP_INTO)
            .u8(MOD_CLASS_MATCH)
            .string(scope)
            .finish();
        let request_id = self.request(command::EVENT_REQUEST_SET, data)?.i32()?;
        debug!(thread, scope, request_id, "Installed line step request");
        Ok(())
    }

    fn next_event_set(&mut self, timeout: Duration) -> Result<Option<EventSet>, TargetError> {
        if !self.alive {
            return Ok(Some(DebugEvent::VmDisconnect.into()));
        }
        let mut reader = match self.conn.next_event(timeout) {
            Ok(Some(reader)) => reader,
            Ok(None) => return Ok(None),
            Err(TargetError::Disconnected) => {
                self.settle();
                return Ok(Some(DebugEvent::VmDisconnect.into()));
            }
            Err(e) => return Err(e),
        };

        let events =
            reader.composite_events()?.into_iter().map(|event| self.translate(event)).collect();
        Ok(Some(EventSet::new(events)))
    }

    fn resume(&mut self) -> Result<(), TargetError> {
        self.frame_locations.clear();
        self.request(command::VM_RESUME, Bytes::new())?;
        Ok(())
    }

    fn terminate(&mut self, exit_code: i32) -> Result<(), TargetError> {
        if !self.alive {
            return Ok(());
        }
        let data = self.conn.writer().i32(exit_code).finish();
        match self.request(command::VM_EXIT, data) {
            Ok(_) | Err(TargetError::Disconnected) => {}
            Err(e) => return Err(e),
        }
        info!(exit_code, "Target terminated");
        self.settle();
        self.conn.close();
        Ok(())
    }

    fn frames(&mut self, thread: ThreadId) -> Result<Vec<StackFrameRef>, TargetError> {
        let data = self.conn.writer().object_id(thread).i32(0).i32(-1).finish();
        let mut reply = self.request(command::THREAD_FRAMES, data)?;
        let mut raw = Vec::new();
        for _ in 0..reply.count()? {
            raw.push((reply.frame_id()?, reply.location()?));
        }

        let mut frames = Vec::with_capacity(raw.len());
        for (id, wire) in raw {
            self.frame_locations.insert(id, wire);
            let location = match self.resolve_location(&wire) {
                Ok(location) => location,
                Err(e) => {
                    debug!(frame = id, error = %e, "Unresolvable frame location");
                    Location::new(TypeRef::new(wire.class_id, String::new()), String::new(), -1)
                }
            };
            frames.push(StackFrameRef { thread, id, location });
        }
        Ok(frames)
    }

    fn visible_variables(&mut self, frame: &StackFrameRef) -> Result<Vec<Variable>, TargetError> {
        let location = *self
            .frame_locations
            .get(&frame.id)
            .ok_or_else(|| {
                TargetError::Protocol(format!("frame {} is no longer valid", frame.id))
            })?;
        let table = self.variable_table(location.class_id, location.method_id)?;
        Ok(table.visible_at(location.index))
    }

    fn variable_value(
        &mut self,
        frame: &StackFrameRef,
        variable: &Variable,
    ) -> Result<RuntimeValue, TargetError> {
        let signature_tag = variable.signature.bytes().next().unwrap_or(tag::OBJECT);
        let data = self
            .conn
            .writer()
            .object_id(frame.thread)
            .frame_id(frame.id)
            .i32(1)
            .i32(variable.slot as i32)
            .u8(signature_tag)
            .finish();
        let reply = self.request(command::FRAME_GET_VALUES, data)?;
        self.single_value(reply)
    }

    fn static_fields(&mut self, ty: &TypeRef) -> Result<Vec<Field>, TargetError> {
        let fields = self.visible_fields(ty.id)?;
        Ok(fields.iter().map(|f| &f.field).filter(|f| f.is_static).cloned().collect())
    }

    fn static_value(&mut self, ty: &TypeRef, field: &Field) -> Result<RuntimeValue, TargetError> {
        let data = self.conn.writer().reference_type_id(ty.id).i32(1).field_id(field.id).finish();
        let reply = self.request(command::TYPE_GET_VALUES, data)?;
        self.single_value(reply)
    }

    fn instance_fields(&mut self, object: &ObjectRef) -> Result<Vec<Field>, TargetError> {
        let type_id = self.object_type(object.id)?;
        let fields = self.visible_fields(type_id)?;
        Ok(fields.iter().map(|f| &f.field).filter(|f| !f.is_static).cloned().collect())
    }

    fn instance_value(
        &mut self,
        object: &ObjectRef,
        field: &Field,
    ) -> Result<RuntimeValue, TargetError> {
        let data = self.conn.writer().object_id(object.id).i32(1).field_id(field.id).finish();
        let reply = self.request(command::OBJECT_GET_VALUES, data)?;
        self.single_value(reply)
    }

    fn array_elements(&mut self, array: &ObjectRef) -> Result<Vec<RuntimeValue>, TargetError> {
        let data = self.conn.writer().object_id(array.id).finish();
        let length = self.request(command::ARRAY_LENGTH, data)?.i32()?;
        if length <= 0 {
            return Ok(Vec::new());
        }

        let data = self.conn.writer().object_id(array.id).i32(0).i32(length).finish();
        let mut reply = self.request(command::ARRAY_GET_VALUES, data)?;
        let element_tag = reply.u8()?;
        let count = reply.count()?;
        let primitive = !matches!(
            element_tag,
            tag::OBJECT
                | tag::ARRAY
                | tag::STRING
                | tag::THREAD
                | tag::THREAD_GROUP
                | tag::CLASS_LOADER
                | tag::CLASS_OBJECT
        );

        let mut wire = Vec::with_capacity(count);
        for _ in 0..count {
            let value =
                if primitive { reply.untagged_value(element_tag)? } else { reply.tagged_value()? };
            wire.push(value);
        }
        wire.into_iter().map(|value| self.runtime_value(value)).collect()
    }
}

impl Drop for JdwpTarget {
    fn drop(&mut self) {
        self.conn.close();
        if let Some(mut child) = self.child.take() {
            if matches!(child.try_wait(), Ok(None)) {
                debug!("Killing target process");
                let _ = child.kill();
            }
            let _ = child.wait();
        }
    }
}
