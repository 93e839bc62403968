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

//! JDWP wire format.
//!
//! Every packet starts with an 11-byte header: length (u32, header included), id
//! (u32), flags (u8), then either a command set and command (u8, u8) or a reply error
//! code (u16). All integers are big-endian. Object, type, method, field and frame ids
//! have VM-specific widths negotiated through `VirtualMachine.IDSizes`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use snapstep_common::types::PrimitiveValue;

use crate::TargetError;

/// Handshake both peers exchange before the first packet
pub const HANDSHAKE: &[u8] = b"JDWP-Handshake";

/// Length of a packet header
pub const HEADER_LEN: usize = 11;

const REPLY_FLAG: u8 = 0x80;

/// Value and signature tags
pub mod tag {
    #![allow(missing_docs)]
    pub const ARRAY: u8 = b'[';
    pub const BYTE: u8 = b'B';
    pub const CHAR: u8 = b'C';
    pub const OBJECT: u8 = b'L';
    pub const FLOAT: u8 = b'F';
    pub const DOUBLE: u8 = b'D';
    pub const INT: u8 = b'I';
    pub const LONG: u8 = b'J';
    pub const SHORT: u8 = b'S';
    pub const VOID: u8 = b'V';
    pub const BOOLEAN: u8 = b'Z';
    pub const STRING: u8 = b's';
    pub const THREAD: u8 = b't';
    pub const THREAD_GROUP: u8 = b'g';
    pub const CLASS_LOADER: u8 = b'l';
    pub const CLASS_OBJECT: u8 = b'c';
}

/// Event kinds
pub mod event_kind {
    #![allow(missing_docs)]
    pub const SINGLE_STEP: u8 = 1;
    pub const BREAKPOINT: u8 = 2;
    pub const EXCEPTION: u8 = 4;
    pub const THREAD_START: u8 = 6;
    pub const THREAD_DEATH: u8 = 7;
    pub const CLASS_PREPARE: u8 = 8;
    pub const CLASS_UNLOAD: u8 = 9;
    pub const METHOD_ENTRY: u8 = 40;
    pub const METHOD_EXIT: u8 = 41;
    pub const VM_START: u8 = 90;
    pub const VM_DEATH: u8 = 99;
}

/// Widths of the variable-size ids, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdSizes {
    /// Field id width
    pub field: usize,
    /// Method id width
    pub method: usize,
    /// Object id width
    pub object: usize,
    /// Reference type id width
    pub reference_type: usize,
    /// Frame id width
    pub frame: usize,
}

impl Default for IdSizes {
    fn default() -> Self {
        Self { field: 8, method: 8, object: 8, reference_type: 8, frame: 8 }
    }
}

impl IdSizes {
    /// Decode a `VirtualMachine.IDSizes` reply
    pub fn decode(reader: &mut PacketReader) -> Result<Self, TargetError> {
        let mut next = || -> Result<usize, TargetError> {
            let size = reader.i32()?;
            match size {
                1..=8 => Ok(size as usize),
                _ => Err(TargetError::Protocol(format!("unsupported id size {size}"))),
            }
        };
        Ok(Self {
            field: next()?,
            method: next()?,
            object: next()?,
            reference_type: next()?,
            frame: next()?,
        })
    }
}

/// A decoded packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    /// A command, sent by the debugger or by the VM (events)
    Command {
        /// Packet id
        id: u32,
        /// Command set
        command_set: u8,
        /// Command within the set
        command: u8,
        /// Payload
        data: Bytes,
    },
    /// A reply to an earlier command
    Reply {
        /// Id of the answered command
        id: u32,
        /// Zero on success
        error_code: u16,
        /// Payload
        data: Bytes,
    },
}

impl Packet {
    /// Encode a command packet
    pub fn command(id: u32, command_set: u8, command: u8, data: &[u8]) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + data.len());
        buf.put_u32((HEADER_LEN + data.len()) as u32);
        buf.put_u32(id);
        buf.put_u8(0);
        buf.put_u8(command_set);
        buf.put_u8(command);
        buf.put_slice(data);
        buf.freeze()
    }

    /// Decode a whole packet, header included
    pub fn decode(mut frame: Bytes) -> Result<Self, TargetError> {
        if frame.len() < HEADER_LEN {
            return Err(TargetError::Protocol(format!("packet of {} bytes", frame.len())));
        }
        let length = frame.get_u32() as usize;
        if length != frame.len() + 4 {
            return Err(TargetError::Protocol(format!(
                "packet length {length} does not match {} received bytes",
                frame.len() + 4
            )));
        }
        let id = frame.get_u32();
        let flags = frame.get_u8();
        if flags & REPLY_FLAG != 0 {
            let error_code = frame.get_u16();
            Ok(Self::Reply { id, error_code, data: frame })
        } else {
            let command_set = frame.get_u8();
            let command = frame.get_u8();
            Ok(Self::Command { id, command_set, command, data: frame })
        }
    }
}

/// Builds a command payload
#[derive(Debug)]
pub struct PacketWriter {
    buf: BytesMut,
    sizes: IdSizes,
}

impl PacketWriter {
    /// Create an empty payload
    pub fn new(sizes: IdSizes) -> Self {
        Self { buf: BytesMut::new(), sizes }
    }

    /// Append a byte
    pub fn u8(mut self, value: u8) -> Self {
        self.buf.put_u8(value);
        self
    }

    /// Append a signed 32-bit integer
    pub fn i32(mut self, value: i32) -> Self {
        self.buf.put_i32(value);
        self
    }

    /// Append a signed 64-bit integer
    pub fn i64(mut self, value: i64) -> Self {
        self.buf.put_i64(value);
        self
    }

    /// Append an object id
    pub fn object_id(mut self, id: u64) -> Self {
        self.buf.put_uint(id, self.sizes.object);
        self
    }

    /// Append a reference type id
    pub fn reference_type_id(mut self, id: u64) -> Self {
        self.buf.put_uint(id, self.sizes.reference_type);
        self
    }

    /// Append a method id
    pub fn method_id(mut self, id: u64) -> Self {
        self.buf.put_uint(id, self.sizes.method);
        self
    }

    /// Append a field id
    pub fn field_id(mut self, id: u64) -> Self {
        self.buf.put_uint(id, self.sizes.field);
        self
    }

    /// Append a frame id
    pub fn frame_id(mut self, id: u64) -> Self {
        self.buf.put_uint(id, self.sizes.frame);
        self
    }

    /// Append a length-prefixed UTF-8 string
    pub fn string(mut self, value: &str) -> Self {
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value.as_bytes());
        self
    }

    /// Finished payload
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// A code location as sent on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireLocation {
    /// Type tag of the declaring type
    pub type_tag: u8,
    /// Declaring type id
    pub class_id: u64,
    /// Method id
    pub method_id: u64,
    /// Code index within the method
    pub index: u64,
}

/// A value as sent on the wire
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WireValue {
    /// No value
    Void,
    /// A primitive
    Primitive(PrimitiveValue),
    /// A reference; id 0 is null
    Object {
        /// Reference tag: `L`, `[`, `s`, `t`, `g`, `l` or `c`
        tag: u8,
        /// Object id
        id: u64,
    },
}

/// One decoded event of a composite event packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    /// The VM started
    VmStart {
        /// Initial thread
        thread: u64,
    },
    /// A step, breakpoint or method entry/exit landed at a location
    Located {
        /// Event kind
        kind: u8,
        /// Thread
        thread: u64,
        /// Location
        location: WireLocation,
    },
    /// A type was prepared
    ClassPrepare {
        /// Triggering thread
        thread: u64,
        /// Prepared type id
        type_id: u64,
        /// Type signature
        signature: String,
    },
    /// A thread started or ended
    Thread {
        /// Event kind
        kind: u8,
        /// Thread
        thread: u64,
    },
    /// The VM died
    VmDeath,
    /// Any other event kind; it ends decoding of the packet
    Unsupported(u8),
}

/// Reads a reply or event payload
#[derive(Debug, Clone)]
pub struct PacketReader {
    buf: Bytes,
    sizes: IdSizes,
}

impl PacketReader {
    /// Read from `buf` with the given id widths
    pub fn new(buf: Bytes, sizes: IdSizes) -> Self {
        Self { buf, sizes }
    }

    /// Bytes not read yet
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    fn ensure(&self, needed: usize) -> Result<(), TargetError> {
        if self.buf.remaining() < needed {
            return Err(TargetError::Protocol(format!(
                "truncated packet: needed {needed} bytes, {} left",
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    /// Read a byte
    pub fn u8(&mut self) -> Result<u8, TargetError> {
        self.ensure(1)?;
        Ok(self.buf.get_u8())
    }

    /// Read a signed 32-bit integer
    pub fn i32(&mut self) -> Result<i32, TargetError> {
        self.ensure(4)?;
        Ok(self.buf.get_i32())
    }

    /// Read a signed 64-bit integer
    pub fn i64(&mut self) -> Result<i64, TargetError> {
        self.ensure(8)?;
        Ok(self.buf.get_i64())
    }

    /// Read a non-negative count
    pub fn count(&mut self) -> Result<usize, TargetError> {
        let count = self.i32()?;
        usize::try_from(count).map_err(|_| TargetError::Protocol(format!("negative count {count}")))
    }

    fn id(&mut self, width: usize) -> Result<u64, TargetError> {
        self.ensure(width)?;
        Ok(self.buf.get_uint(width))
    }

    /// Read an object id
    pub fn object_id(&mut self) -> Result<u64, TargetError> {
        self.id(self.sizes.object)
    }

    /// Read a reference type id
    pub fn reference_type_id(&mut self) -> Result<u64, TargetError> {
        self.id(self.sizes.reference_type)
    }

    /// Read a method id
    pub fn method_id(&mut self) -> Result<u64, TargetError> {
        self.id(self.sizes.method)
    }

    /// Read a field id
    pub fn field_id(&mut self) -> Result<u64, TargetError> {
        self.id(self.sizes.field)
    }

    /// Read a frame id
    pub fn frame_id(&mut self) -> Result<u64, TargetError> {
        self.id(self.sizes.frame)
    }

    /// Read a length-prefixed string
    pub fn string(&mut self) -> Result<String, TargetError> {
        let len = self.count()?;
        self.ensure(len)?;
        let bytes = self.buf.split_to(len);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read a location
    pub fn location(&mut self) -> Result<WireLocation, TargetError> {
        Ok(WireLocation {
            type_tag: self.u8()?,
            class_id: self.reference_type_id()?,
            method_id: self.method_id()?,
            index: self.i64()? as u64,
        })
    }

    /// Read a tag byte followed by its value
    pub fn tagged_value(&mut self) -> Result<WireValue, TargetError> {
        let tag = self.u8()?;
        self.untagged_value(tag)
    }

    /// Read a value whose tag is known from context
    pub fn untagged_value(&mut self, tag: u8) -> Result<WireValue, TargetError> {
        let primitive = match tag {
            tag::VOID => return Ok(WireValue::Void),
            tag::BOOLEAN => PrimitiveValue::Boolean(self.u8()? != 0),
            tag::BYTE => PrimitiveValue::Byte(self.u8()? as i8),
            tag::CHAR => {
                self.ensure(2)?;
                PrimitiveValue::Char(self.buf.get_u16())
            }
            tag::SHORT => {
                self.ensure(2)?;
                PrimitiveValue::Short(self.buf.get_i16())
            }
            tag::INT => PrimitiveValue::Int(self.i32()?),
            tag::LONG => PrimitiveValue::Long(self.i64()?),
            tag::FLOAT => {
                self.ensure(4)?;
                PrimitiveValue::Float(self.buf.get_f32())
            }
            tag::DOUBLE => {
                self.ensure(8)?;
                PrimitiveValue::Double(self.buf.get_f64())
            }
            tag::OBJECT
            | tag::ARRAY
            | tag::STRING
            | tag::THREAD
            | tag::THREAD_GROUP
            | tag::CLASS_LOADER
            | tag::CLASS_OBJECT => return Ok(WireValue::Object { tag, id: self.object_id()? }),
            other => {
                return Err(TargetError::Protocol(format!("unknown value tag {:?}", other as char)))
            }
        };
        Ok(WireValue::Primitive(primitive))
    }

    /// Decode an `Event.Composite` payload into its events
    pub fn composite_events(&mut self) -> Result<Vec<WireEvent>, TargetError> {
        let _suspend_policy = self.u8()?;
        let count = self.count()?;
        let mut events = Vec::with_capacity(count);
        for _ in 0..count {
            let kind = self.u8()?;
            let _request_id = self.i32()?;
            let event = match kind {
                event_kind::VM_START => WireEvent::VmStart { thread: self.object_id()? },
                event_kind::SINGLE_STEP
                | event_kind::BREAKPOINT
                | event_kind::METHOD_ENTRY
                | event_kind::METHOD_EXIT => {
                    let thread = self.object_id()?;
                    WireEvent::Located { kind, thread, location: self.location()? }
                }
                event_kind::EXCEPTION => {
                    let thread = self.object_id()?;
                    let location = self.location()?;
                    let _exception = self.tagged_value()?;
                    let _catch_location = self.location()?;
                    WireEvent::Located { kind, thread, location }
                }
                event_kind::THREAD_START | event_kind::THREAD_DEATH => {
                    WireEvent::Thread { kind, thread: self.object_id()? }
                }
                event_kind::CLASS_PREPARE => {
                    let thread = self.object_id()?;
                    let _type_tag = self.u8()?;
                    let type_id = self.reference_type_id()?;
                    let signature = self.string()?;
                    let _status = self.i32()?;
                    WireEvent::ClassPrepare { thread, type_id, signature }
                }
                event_kind::CLASS_UNLOAD => {
                    let _signature = self.string()?;
                    WireEvent::Thread { kind, thread: 0 }
                }
                event_kind::VM_DEATH => WireEvent::VmDeath,
                other => {
                    events.push(WireEvent::Unsupported(other));
                    break;
                }
            };
            events.push(event);
        }
        Ok(events)
    }
}

/// Convert a type signature to a source-level type name.
///
/// `I` becomes `int`, `[I` becomes `int[]`, `Ljava/lang/String;` becomes
/// `java.lang.String`.
pub fn signature_to_name(signature: &str) -> String {
    let dims = signature.bytes().take_while(|b| *b == tag::ARRAY).count();
    let base = &signature[dims..];
    let mut name = match base {
        "Z" => "boolean".to_string(),
        "B" => "byte".to_string(),
        "C" => "char".to_string(),
        "S" => "short".to_string(),
        "I" => "int".to_string(),
        "J" => "long".to_string(),
        "F" => "float".to_string(),
        "D" => "double".to_string(),
        "V" => "void".to_string(),
        other => other
            .strip_prefix('L')
            .and_then(|class| class.strip_suffix(';'))
            .unwrap_or(other)
            .replace('/', "."),
    };
    for _ in 0..dims {
        name.push_str("[]");
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_to_name() {
        assert_eq!(signature_to_name("I"), "int");
        assert_eq!(signature_to_name("[I"), "int[]");
        assert_eq!(signature_to_name("[[D"), "double[][]");
        assert_eq!(signature_to_name("Ljava/lang/String;"), "java.lang.String");
        assert_eq!(signature_to_name("[Ljava/lang/String;"), "java.lang.String[]");
        assert_eq!(signature_to_name("LMain$Node;"), "Main$Node");
    }

    #[test]
    fn test_command_packet_layout() {
        let data = PacketWriter::new(IdSizes::default()).object_id(7).i32(-1).finish();
        let packet = Packet::command(3, 11, 6, &data);
        assert_eq!(packet.len(), HEADER_LEN + 12);
        assert_eq!(&packet[..4], &[0, 0, 0, 23]);
        assert_eq!(&packet[4..8], &[0, 0, 0, 3]);
        assert_eq!(packet[8], 0);
        assert_eq!(packet[9], 11);
        assert_eq!(packet[10], 6);

        let decoded = Packet::decode(packet).unwrap();
        assert_eq!(
            decoded,
            Packet::Command { id: 3, command_set: 11, command: 6, data }
        );
    }

    #[test]
    fn test_reply_decoding() {
        let mut raw = BytesMut::new();
        raw.put_u32(HEADER_LEN as u32 + 4);
        raw.put_u32(9);
        raw.put_u8(REPLY_FLAG);
        raw.put_u16(0);
        raw.put_i32(42);

        match Packet::decode(raw.freeze()).unwrap() {
            Packet::Reply { id, error_code, data } => {
                assert_eq!((id, error_code), (9, 0));
                let mut reader = PacketReader::new(data, IdSizes::default());
                assert_eq!(reader.i32().unwrap(), 42);
                assert_eq!(reader.remaining(), 0);
            }
            other => panic!("expected reply, got {other:?}"),
        }
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let mut raw = BytesMut::new();
        raw.put_u32(99);
        raw.put_u32(1);
        raw.put_u8(0);
        raw.put_u8(1);
        raw.put_u8(1);
        assert!(matches!(Packet::decode(raw.freeze()), Err(TargetError::Protocol(_))));
    }

    #[test]
    fn test_narrow_ids_and_values() {
        let sizes = IdSizes { field: 4, method: 4, object: 4, reference_type: 4, frame: 4 };
        let mut raw = BytesMut::new();
        raw.put_u8(tag::INT);
        raw.put_i32(-5);
        raw.put_u8(tag::CHAR);
        raw.put_u16(0x41);
        raw.put_u8(tag::ARRAY);
        raw.put_u32(77);
        raw.put_u8(tag::DOUBLE);
        raw.put_f64(1.5);

        let mut reader = PacketReader::new(raw.freeze(), sizes);
        assert_eq!(reader.tagged_value().unwrap(), WireValue::Primitive(PrimitiveValue::Int(-5)));
        assert_eq!(
            reader.tagged_value().unwrap(),
            WireValue::Primitive(PrimitiveValue::Char(0x41))
        );
        assert_eq!(reader.tagged_value().unwrap(), WireValue::Object { tag: tag::ARRAY, id: 77 });
        assert_eq!(
            reader.tagged_value().unwrap(),
            WireValue::Primitive(PrimitiveValue::Double(1.5))
        );
        assert!(reader.u8().is_err());
    }

    #[test]
    fn test_composite_events() {
        let mut raw = BytesMut::new();
        raw.put_u8(2);
        raw.put_i32(3);
        // class prepare
        raw.put_u8(event_kind::CLASS_PREPARE);
        raw.put_i32(1);
        raw.put_u64(5);
        raw.put_u8(1);
        raw.put_u64(100);
        raw.put_u32(6);
        raw.put_slice(b"LMain;");
        raw.put_i32(7);
        // single step
        raw.put_u8(event_kind::SINGLE_STEP);
        raw.put_i32(2);
        raw.put_u64(5);
        raw.put_u8(1);
        raw.put_u64(100);
        raw.put_u64(200);
        raw.put_u64(4);
        // vm death
        raw.put_u8(event_kind::VM_DEATH);
        raw.put_i32(0);

        let events =
            PacketReader::new(raw.freeze(), IdSizes::default()).composite_events().unwrap();
        assert_eq!(
            events,
            vec![
                WireEvent::ClassPrepare { thread: 5, type_id: 100, signature: "LMain;".into() },
                WireEvent::Located {
                    kind: event_kind::SINGLE_STEP,
                    thread: 5,
                    location: WireLocation { type_tag: 1, class_id: 100, method_id: 200, index: 4 },
                },
                WireEvent::VmDeath,
            ]
        );
    }

    #[test]
    fn test_unknown_event_stops_decoding() {
        let mut raw = BytesMut::new();
        raw.put_u8(0);
        raw.put_i32(2);
        raw.put_u8(20);
        raw.put_i32(0);
        raw.put_u64(1);

        let events =
            PacketReader::new(raw.freeze(), IdSizes::default()).composite_events().unwrap();
        assert_eq!(events, vec![WireEvent::Unsupported(20)]);
    }
}
