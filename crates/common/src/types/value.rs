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

//! Tagged runtime value representation used inside step records.
//!
//! A [`ValueDescriptor`] is what a local variable or a static field resolves to in a
//! snapshot. Primitive values carry their canonical textual form, strings are inlined,
//! and arrays/objects are never inlined: they carry a [`RefId`] that is resolved in the
//! heap table of the same record.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors raised while parsing the textual form of a value
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueParseError {
    /// The literal is not a valid rendering of the given primitive kind
    #[error("invalid {kind} literal: {text:?}")]
    InvalidLiteral {
        /// Expected primitive kind
        kind: PrimitiveKind,
        /// Offending text
        text: String,
    },

    /// A heap reference key did not have the `ref@<n>` form
    #[error("invalid reference id: {0:?}")]
    InvalidRefId(String),
}

/// Primitive kinds a target value may have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    /// `boolean`
    Boolean,
    /// 8-bit signed integer
    Byte,
    /// 16-bit signed integer
    Short,
    /// 32-bit signed integer
    Int,
    /// 64-bit signed integer
    Long,
    /// 32-bit IEEE 754 float
    Float,
    /// 64-bit IEEE 754 float
    Double,
    /// UTF-16 code unit
    Char,
}

impl PrimitiveKind {
    /// Every primitive kind, in declaration order
    pub const ALL: [Self; 8] = [
        Self::Boolean,
        Self::Byte,
        Self::Short,
        Self::Int,
        Self::Long,
        Self::Float,
        Self::Double,
        Self::Char,
    ];

    /// Wire name of the kind (the target language's keyword)
    pub fn name(self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Char => "char",
        }
    }

    /// Look a kind up by its wire name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A primitive value read from the target
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PrimitiveValue {
    /// Boolean value
    Boolean(bool),
    /// 8-bit signed integer
    Byte(i8),
    /// 16-bit signed integer
    Short(i16),
    /// 32-bit signed integer
    Int(i32),
    /// 64-bit signed integer
    Long(i64),
    /// 32-bit float
    Float(f32),
    /// 64-bit float
    Double(f64),
    /// A single UTF-16 code unit (may be an unpaired surrogate)
    Char(u16),
}

impl PrimitiveValue {
    /// Kind of this value
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Self::Boolean(_) => PrimitiveKind::Boolean,
            Self::Byte(_) => PrimitiveKind::Byte,
            Self::Short(_) => PrimitiveKind::Short,
            Self::Int(_) => PrimitiveKind::Int,
            Self::Long(_) => PrimitiveKind::Long,
            Self::Float(_) => PrimitiveKind::Float,
            Self::Double(_) => PrimitiveKind::Double,
            Self::Char(_) => PrimitiveKind::Char,
        }
    }

    /// Canonical textual form of the value.
    ///
    /// Integers are decimal, floats use the shortest representation that parses back
    /// to the same bits (`NaN`, `Infinity` and `-Infinity` for the special values), and
    /// characters are wrapped in single quotes.
    pub fn render(&self) -> String {
        match *self {
            Self::Boolean(v) => v.to_string(),
            Self::Byte(v) => v.to_string(),
            Self::Short(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Long(v) => v.to_string(),
            Self::Float(v) => render_float(f64::from(v), || format!("{v:?}")),
            Self::Double(v) => render_float(v, || format!("{v:?}")),
            Self::Char(unit) => match char::from_u32(u32::from(unit)) {
                Some(c) => format!("'{c}'"),
                None => format!("'\\u{unit:04X}'"),
            },
        }
    }

    /// Parse the output of [`PrimitiveValue::render`] back into a value of `kind`
    pub fn parse(kind: PrimitiveKind, text: &str) -> Result<Self, ValueParseError> {
        let invalid = || ValueParseError::InvalidLiteral { kind, text: text.to_string() };

        let value = match kind {
            PrimitiveKind::Boolean => Self::Boolean(text.parse().map_err(|_| invalid())?),
            PrimitiveKind::Byte => Self::Byte(text.parse().map_err(|_| invalid())?),
            PrimitiveKind::Short => Self::Short(text.parse().map_err(|_| invalid())?),
            PrimitiveKind::Int => Self::Int(text.parse().map_err(|_| invalid())?),
            PrimitiveKind::Long => Self::Long(text.parse().map_err(|_| invalid())?),
            PrimitiveKind::Float => Self::Float(match text {
                "NaN" => f32::NAN,
                "Infinity" => f32::INFINITY,
                "-Infinity" => f32::NEG_INFINITY,
                other => other.parse().map_err(|_| invalid())?,
            }),
            PrimitiveKind::Double => Self::Double(match text {
                "NaN" => f64::NAN,
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                other => other.parse().map_err(|_| invalid())?,
            }),
            PrimitiveKind::Char => {
                let inner = text
                    .strip_prefix('\'')
                    .and_then(|rest| rest.strip_suffix('\''))
                    .ok_or_else(invalid)?;
                let mut chars = inner.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => {
                        Self::Char(u16::try_from(u32::from(c)).map_err(|_| invalid())?)
                    }
                    _ => {
                        let hex = inner.strip_prefix("\\u").ok_or_else(invalid)?;
                        if hex.len() != 4 {
                            return Err(invalid());
                        }
                        Self::Char(u16::from_str_radix(hex, 16).map_err(|_| invalid())?)
                    }
                }
            }
        };

        Ok(value)
    }
}

/// Special values get their target-language spelling, finite values the shortest
/// representation that round-trips
fn render_float(value: f64, finite: impl FnOnce() -> String) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "Infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        finite()
    }
}

impl fmt::Display for PrimitiveValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Identity-derived id of a heap object, stable for the lifetime of the object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RefId(pub u64);

impl RefId {
    /// Prefix of the heap table key form
    pub const KEY_PREFIX: &'static str = "ref@";

    /// Opaque short-form tag, `@<n>`
    pub fn tag(&self) -> String {
        format!("@{}", self.0)
    }
}

impl fmt::Display for RefId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::KEY_PREFIX, self.0)
    }
}

impl FromStr for RefId {
    type Err = ValueParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix(Self::KEY_PREFIX)
            .and_then(|n| n.parse().ok())
            .map(Self)
            .ok_or_else(|| ValueParseError::InvalidRefId(s.to_string()))
    }
}

impl Serialize for RefId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RefId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Resolved value of a local variable or static field
#[derive(Debug, Clone, PartialEq)]
pub enum ValueDescriptor {
    /// The null reference
    Null,
    /// A primitive value
    Primitive(PrimitiveValue),
    /// A string, inlined
    Text(String),
    /// An array or object, resolved through the record's heap table
    Reference {
        /// Declared (runtime) type name of the referenced object
        type_name: String,
        /// Heap table key
        id: RefId,
    },
}

impl ValueDescriptor {
    /// Type tag used on the wire
    pub fn type_name(&self) -> &str {
        match self {
            Self::Null => "null",
            Self::Primitive(value) => value.kind().name(),
            Self::Text(_) => "String",
            Self::Reference { type_name, .. } => type_name,
        }
    }

    /// Compact, non-recursive rendering used for call-stack arguments and heap fields
    pub fn short_form(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Primitive(value) => value.render(),
            Self::Text(text) => format!("\"{text}\""),
            Self::Reference { id, .. } => id.tag(),
        }
    }

    /// Heap id, if this is a reference
    pub fn ref_id(&self) -> Option<RefId> {
        match self {
            Self::Reference { id, .. } => Some(*id),
            _ => None,
        }
    }
}

/// Wire shape of a [`ValueDescriptor`]
#[derive(Serialize, Deserialize)]
struct SerializedValueDescriptor {
    #[serde(rename = "type")]
    ty: String,
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<RefId>,
}

impl From<&ValueDescriptor> for SerializedValueDescriptor {
    fn from(value: &ValueDescriptor) -> Self {
        Self { ty: value.type_name().to_string(), value: value.short_form(), id: value.ref_id() }
    }
}

impl TryFrom<SerializedValueDescriptor> for ValueDescriptor {
    type Error = String;

    fn try_from(value: SerializedValueDescriptor) -> Result<Self, Self::Error> {
        let SerializedValueDescriptor { ty, value, id } = value;

        if let Some(id) = id {
            return Ok(Self::Reference { type_name: ty, id });
        }

        match ty.as_str() {
            "null" => Ok(Self::Null),
            "String" => value
                .strip_prefix('"')
                .and_then(|rest| rest.strip_suffix('"'))
                .map(|text| Self::Text(text.to_string()))
                .ok_or_else(|| format!("unquoted string value: {value:?}")),
            other => {
                let kind = PrimitiveKind::from_name(other)
                    .ok_or_else(|| format!("reference type {other:?} without an id"))?;
                PrimitiveValue::parse(kind, &value).map(Self::Primitive).map_err(|e| e.to_string())
            }
        }
    }
}

impl Serialize for ValueDescriptor {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        SerializedValueDescriptor::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ValueDescriptor {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let serialized = SerializedValueDescriptor::deserialize(deserializer)?;
        Self::try_from(serialized).map_err(de::Error::custom)
    }
}
