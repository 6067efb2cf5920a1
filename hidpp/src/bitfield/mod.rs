//! A declarative model for packed binary messages.
//!
//! Every HID++ payload, register value and event is described by a static
//! [`Schema`]: an ordered list of [`FieldDescriptor`]s, each with a bit length
//! and optional validators. A [`BitMessage`] holds one value per field and
//! converts between these values and their bit-exact wire representation.
//!
//! Fields are serialized in declaration order, most significant bit first,
//! and packed into whole bytes. Integer fields may span any number of bits up
//! to 64, byte-string fields any whole number of bytes, and a field may itself
//! hold a nested message.
//!
//! ```
//! use hidpp::bitfield::{BitMessage, FieldDescriptor, Schema};
//!
//! static PING: Schema = Schema::new("Ping", &[
//!     FieldDescriptor::new(0xfa, 16, "Zero", "zero"),
//!     FieldDescriptor::new(0xf9, 8, "Ping Data", "ping_data").with_aliases(&["pingData"]),
//! ]);
//!
//! let msg = BitMessage::new(&PING).with("pingData", 0x5au8).unwrap();
//! assert_eq!(msg.serialize().unwrap(), vec![0x00, 0x00, 0x5a]);
//! assert_eq!(BitMessage::parse(&PING, &[0x00, 0x00, 0x5a]).unwrap(), msg);
//! ```

mod bits;
mod timestamp;

use std::fmt;

use bits::{BitReader, BitWriter};
use thiserror::Error;
pub use timestamp::Timestamp;

use crate::error::{ConstraintViolation, ProtocolError};

/// Represents an error that occurred while building, serializing or parsing a
/// [`BitMessage`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// The raw bytes did not have the size the schema requires.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A field value violated one of its validators.
    #[error(transparent)]
    Constraint(#[from] ConstraintViolation),
}

/// A validator attached to a field.
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub enum Check {
    /// The integer value must lie within `min..=max`.
    Range { min: u64, max: u64 },

    /// The value must be a byte string of exactly this length.
    ByteLength(usize),

    /// The integer value must be one of the listed values.
    OneOf(&'static [u64]),
}

/// The semantic type of a field, derived from its length and validators.
#[derive(Clone, Copy, Debug)]
pub enum FieldKind {
    /// An unsigned integer of at most 64 bits.
    Uint,

    /// A fixed-length byte string.
    Bytes,

    /// A nested message.
    Nested(&'static Schema),
}

/// Describes a single field of a [`Schema`].
#[derive(Clone, Copy, Debug)]
pub struct FieldDescriptor {
    /// The stable identifier of the field. Identifiers are keys, not
    /// positions, and stay the same when fields are renamed.
    pub fid: u8,

    /// The width of the field in bits.
    pub bits: u16,

    /// The human-readable title used in reports.
    pub title: &'static str,

    /// The programmatic name used for lookups.
    pub name: &'static str,

    /// Former names that are still accepted for lookups.
    pub aliases: &'static [&'static str],

    /// The value a freshly built message holds for this field.
    pub default: Option<u64>,

    /// The validators run on every checked assignment and on parse.
    pub checks: &'static [Check],

    /// The schema of the message this field holds, for nested fields.
    pub nested: Option<&'static Schema>,
}

impl FieldDescriptor {
    /// Describes a field without aliases, default or validators.
    pub const fn new(fid: u8, bits: u16, title: &'static str, name: &'static str) -> Self {
        Self {
            fid,
            bits,
            title,
            name,
            aliases: &[],
            default: None,
            checks: &[],
            nested: None,
        }
    }

    /// Adds names that are accepted as well as [`Self::name`].
    pub const fn with_aliases(self, aliases: &'static [&'static str]) -> Self {
        Self { aliases, ..self }
    }

    /// Sets the value of the field in freshly built messages.
    pub const fn with_default(self, default: u64) -> Self {
        Self {
            default: Some(default),
            ..self
        }
    }

    /// Sets the validators of the field.
    pub const fn with_checks(self, checks: &'static [Check]) -> Self {
        Self { checks, ..self }
    }

    /// Declares a field holding a nested message of the given schema. Its
    /// values must be messages of exactly that schema.
    pub const fn nested(fid: u8, title: &'static str, name: &'static str, schema: &'static Schema) -> Self {
        Self {
            fid,
            bits: schema.bit_len() as u16,
            title,
            name,
            aliases: &[],
            default: None,
            checks: &[],
            nested: Some(schema),
        }
    }

    /// The semantic type of the field.
    pub fn kind(&self) -> FieldKind {
        if let Some(schema) = self.nested {
            return FieldKind::Nested(schema);
        }

        if self.bits > 64 || self.checks.iter().any(|check| matches!(check, Check::ByteLength(_))) {
            FieldKind::Bytes
        } else {
            FieldKind::Uint
        }
    }

    /// The number of bytes needed to hold the field.
    pub fn byte_len(&self) -> usize {
        usize::from(self.bits).div_ceil(8)
    }

    /// Whether the field can be looked up by the given name.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.aliases.contains(&name)
    }

    fn default_value(&self) -> FieldValue {
        match self.kind() {
            FieldKind::Uint => FieldValue::Uint(self.default.unwrap_or(0)),
            FieldKind::Bytes => {
                let len = self.byte_len();
                let mut bytes = vec![0; len];
                if let Some(default) = self.default {
                    let n = len.min(8);
                    bytes[len - n..].copy_from_slice(&default.to_be_bytes()[8 - n..]);
                }
                FieldValue::Bytes(bytes)
            },
            FieldKind::Nested(schema) => FieldValue::Nested(Box::new(BitMessage::new(schema))),
        }
    }

    /// Converts a value into the representation of this field, enforcing its
    /// width. Validators are only run if `checked` is set.
    fn normalize(
        &self,
        schema: &Schema,
        value: FieldValue,
        checked: bool,
    ) -> Result<FieldValue, ConstraintViolation> {
        let value = match (self.kind(), value) {
            (FieldKind::Uint, FieldValue::Uint(value)) => {
                if self.bits < 64 && value >> self.bits != 0 {
                    return Err(schema.violation(
                        self.name,
                        format!("{value:#x} does not fit into {} bits", self.bits),
                    ));
                }
                FieldValue::Uint(value)
            },
            (FieldKind::Uint, FieldValue::Bytes(bytes)) => {
                if bytes.len() > 8 {
                    return Err(schema.violation(
                        self.name,
                        format!("{} bytes do not fit into an integer field", bytes.len()),
                    ));
                }
                let value = bytes
                    .iter()
                    .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
                return self.normalize(schema, FieldValue::Uint(value), checked);
            },
            (FieldKind::Bytes, FieldValue::Bytes(bytes)) => {
                if bytes.len() != self.byte_len() {
                    return Err(schema.violation(
                        self.name,
                        format!("expected {} bytes but got {}", self.byte_len(), bytes.len()),
                    ));
                }
                FieldValue::Bytes(bytes)
            },
            (FieldKind::Bytes, FieldValue::Uint(value)) => {
                let len = self.byte_len();
                if len < 8 && value >> (len * 8) != 0 {
                    return Err(schema.violation(
                        self.name,
                        format!("{value:#x} does not fit into {len} bytes"),
                    ));
                }
                let mut bytes = vec![0; len];
                let n = len.min(8);
                bytes[len - n..].copy_from_slice(&value.to_be_bytes()[8 - n..]);
                FieldValue::Bytes(bytes)
            },
            (FieldKind::Nested(expected), FieldValue::Nested(msg)) => {
                if msg.schema.name != expected.name {
                    return Err(schema.violation(
                        self.name,
                        format!("expected a `{}` message but got `{}`", expected.name, msg.schema.name),
                    ));
                }
                FieldValue::Nested(msg)
            },
            (_, other) => {
                return Err(schema.violation(self.name, format!("the field cannot hold {other}")));
            },
        };

        if checked {
            self.check(schema, &value)?;
        }
        Ok(value)
    }

    /// Runs the validators of the field against a normalized value.
    fn check(&self, schema: &Schema, value: &FieldValue) -> Result<(), ConstraintViolation> {
        for check in self.checks {
            match (check, value) {
                (Check::Range { min, max }, FieldValue::Uint(value)) if !(*min..=*max).contains(value) => {
                    return Err(schema.violation(
                        self.name,
                        format!("{value:#x} is outside of {min:#x}..={max:#x}"),
                    ));
                },
                (Check::OneOf(allowed), FieldValue::Uint(value)) if !allowed.contains(value) => {
                    return Err(schema.violation(
                        self.name,
                        format!("{value:#x} is not one of {allowed:#x?}"),
                    ));
                },
                (Check::ByteLength(len), FieldValue::Bytes(bytes)) if bytes.len() != *len => {
                    return Err(schema.violation(
                        self.name,
                        format!("expected {len} bytes but got {}", bytes.len()),
                    ));
                },
                _ => {},
            }
        }
        Ok(())
    }
}

/// An ordered list of fields describing a packed binary message.
#[derive(Debug)]
pub struct Schema {
    /// The name of the message, used in errors and textual representations.
    pub name: &'static str,

    /// The fields in wire order.
    pub fields: &'static [FieldDescriptor],
}

impl Schema {
    /// Declares a schema.
    pub const fn new(name: &'static str, fields: &'static [FieldDescriptor]) -> Self {
        Self { name, fields }
    }

    /// The total width of all fields in bits.
    pub const fn bit_len(&self) -> usize {
        let mut total = 0;
        let mut i = 0;
        while i < self.fields.len() {
            total += self.fields[i].bits as usize;
            i += 1;
        }
        total
    }

    /// The number of bytes a serialized message of this schema occupies.
    pub const fn byte_len(&self) -> usize {
        self.bit_len().div_ceil(8)
    }

    /// Looks up a field by its name or one of its aliases.
    pub fn field(&self, name: &str) -> Option<(usize, &'static FieldDescriptor)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, field)| field.answers_to(name))
    }

    /// Looks up a field by its identifier.
    pub fn field_by_fid(&self, fid: u8) -> Option<(usize, &'static FieldDescriptor)> {
        self.fields.iter().enumerate().find(|(_, field)| field.fid == fid)
    }

    /// Checks that the declaration is self-consistent: identifiers and names
    /// are unique, byte strings cover whole bytes and nested fields are exactly
    /// as wide as their schema.
    pub fn validate_layout(&self) -> Result<(), String> {
        for (i, field) in self.fields.iter().enumerate() {
            for other in &self.fields[..i] {
                if other.fid == field.fid {
                    return Err(format!("{}: duplicate field identifier {:#04x}", self.name, field.fid));
                }
                if other.name == field.name || field.aliases.iter().any(|alias| other.answers_to(alias)) {
                    return Err(format!("{}: duplicate field name `{}`", self.name, field.name));
                }
            }

            match field.kind() {
                FieldKind::Bytes if field.bits % 8 != 0 => {
                    return Err(format!("{}.{}: byte strings must cover whole bytes", self.name, field.name));
                },
                FieldKind::Nested(schema) => {
                    if usize::from(field.bits) != schema.bit_len() {
                        return Err(format!(
                            "{}.{}: field is {} bits wide but `{}` needs {}",
                            self.name,
                            field.name,
                            field.bits,
                            schema.name,
                            schema.bit_len()
                        ));
                    }
                    schema.validate_layout()?;
                },
                _ => {},
            }

            if field.bits == 0 {
                return Err(format!("{}.{}: fields must not be empty", self.name, field.name));
            }
        }
        Ok(())
    }

    fn violation(&self, field: &str, reason: impl Into<String>) -> ConstraintViolation {
        ConstraintViolation {
            schema: self.name,
            field: field.to_owned(),
            reason: reason.into(),
        }
    }
}

/// The value of a single field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    /// The value of an integer field.
    Uint(u64),

    /// The value of a byte-string field.
    Bytes(Vec<u8>),

    /// The value of a nested-message field.
    Nested(Box<BitMessage>),
}

impl FieldValue {
    /// Returns the integer if this is an integer value.
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Uint(value) => Some(*value),
            _ => None,
        }
    }

    /// Returns the bytes if this is a byte-string value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uint(value) => write!(f, "{value:#x}"),
            Self::Bytes(bytes) => {
                write!(f, "[")?;
                for (i, byte) in bytes.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{byte:02x}")?;
                }
                write!(f, "]")
            },
            Self::Nested(msg) => write!(f, "{msg}"),
        }
    }
}

macro_rules! impl_uint_value {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self {
                    Self::Uint(u64::from(value))
                }
            }
        )*
    };
}

impl_uint_value!(bool, u8, u16, u32, u64);

impl From<Vec<u8>> for FieldValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<&[u8]> for FieldValue {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl<const N: usize> From<[u8; N]> for FieldValue {
    fn from(value: [u8; N]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<BitMessage> for FieldValue {
    fn from(value: BitMessage) -> Self {
        Self::Nested(Box::new(value))
    }
}

/// A message built from a [`Schema`], holding one value per field.
///
/// Equality compares the schema and the field values; the timestamp is not
/// part of the message identity.
#[derive(Clone)]
pub struct BitMessage {
    schema: &'static Schema,
    values: Vec<FieldValue>,
    timestamp: Timestamp,
}

impl BitMessage {
    /// Builds a message holding the default value of every field.
    pub fn new(schema: &'static Schema) -> Self {
        Self {
            schema,
            values: schema.fields.iter().map(FieldDescriptor::default_value).collect(),
            timestamp: Timestamp::now(),
        }
    }

    /// Builds a message from named field values. Fields not mentioned keep
    /// their default.
    pub fn from_fields<V: Into<FieldValue>>(
        schema: &'static Schema,
        fields: impl IntoIterator<Item = (&'static str, V)>,
    ) -> Result<Self, MessageError> {
        let mut msg = Self::new(schema);
        for (name, value) in fields {
            msg.set(name, value)?;
        }
        Ok(msg)
    }

    /// Sets a field and returns the message, for building messages in a
    /// single expression.
    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Result<Self, MessageError> {
        self.set(name, value)?;
        Ok(self)
    }

    /// The schema this message was built from.
    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    /// The instant this message was built or parsed.
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    /// Iterates over all fields and their current values in wire order.
    pub fn fields(&self) -> impl Iterator<Item = (&'static FieldDescriptor, &FieldValue)> {
        self.schema.fields.iter().zip(self.values.iter())
    }

    fn index_of(&self, name: &str) -> Result<usize, ConstraintViolation> {
        self.schema
            .field(name)
            .map(|(index, _)| index)
            .ok_or_else(|| self.schema.violation(name, "no such field"))
    }

    fn index_of_fid(&self, fid: u8) -> Result<usize, ConstraintViolation> {
        self.schema
            .field_by_fid(fid)
            .map(|(index, _)| index)
            .ok_or_else(|| self.schema.violation(&format!("#{fid:#04x}"), "no such field"))
    }

    fn assign(&mut self, index: usize, value: FieldValue, checked: bool) -> Result<(), MessageError> {
        let field = &self.schema.fields[index];
        self.values[index] = field.normalize(self.schema, value, checked)?;
        Ok(())
    }

    /// Sets a field by name or alias, running its validators.
    pub fn set(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<(), MessageError> {
        let index = self.index_of(name)?;
        self.assign(index, value.into(), true)
    }

    /// Sets a field by name or alias without running its validators.
    ///
    /// The value must still fit into the field. This is how requests with
    /// deliberately invalid arguments are built.
    pub fn set_unchecked(&mut self, name: &str, value: impl Into<FieldValue>) -> Result<(), MessageError> {
        let index = self.index_of(name)?;
        self.assign(index, value.into(), false)
    }

    /// Sets a field by its identifier, running its validators.
    pub fn set_fid(&mut self, fid: u8, value: impl Into<FieldValue>) -> Result<(), MessageError> {
        let index = self.index_of_fid(fid)?;
        self.assign(index, value.into(), true)
    }

    /// Returns the value of a field by name or alias.
    pub fn get(&self, name: &str) -> Result<&FieldValue, MessageError> {
        Ok(&self.values[self.index_of(name)?])
    }

    /// Returns the value of a field by its identifier.
    pub fn get_fid(&self, fid: u8) -> Result<&FieldValue, MessageError> {
        Ok(&self.values[self.index_of_fid(fid)?])
    }

    /// Returns an integer field, or a byte-string field of at most 8 bytes
    /// read as a big-endian integer.
    pub fn uint(&self, name: &str) -> Result<u64, MessageError> {
        match self.get(name)? {
            FieldValue::Uint(value) => Ok(*value),
            FieldValue::Bytes(bytes) if bytes.len() <= 8 => Ok(bytes
                .iter()
                .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))),
            other => Err(self
                .schema
                .violation(name, format!("{other} cannot be read as an integer"))
                .into()),
        }
    }

    /// Returns a byte-string field, or an integer field as big-endian bytes.
    pub fn bytes(&self, name: &str) -> Result<Vec<u8>, MessageError> {
        let index = self.index_of(name)?;
        match &self.values[index] {
            FieldValue::Bytes(bytes) => Ok(bytes.clone()),
            FieldValue::Uint(value) => {
                let len = self.schema.fields[index].byte_len();
                Ok(value.to_be_bytes()[8 - len..].to_vec())
            },
            FieldValue::Nested(msg) => Ok(msg.serialize()?),
        }
    }

    /// Returns a nested-message field.
    pub fn nested(&self, name: &str) -> Result<&BitMessage, MessageError> {
        match self.get(name)? {
            FieldValue::Nested(msg) => Ok(msg),
            other => Err(self
                .schema
                .violation(name, format!("{other} is not a nested message"))
                .into()),
        }
    }

    /// Returns the raw unsigned encoding of a field, whatever its semantic
    /// type. Fields wider than 128 bits have no absolute value.
    pub fn absolute_value(&self, name: &str) -> Result<u128, MessageError> {
        let index = self.index_of(name)?;
        let field = &self.schema.fields[index];
        if field.bits > 128 {
            return Err(self
                .schema
                .violation(name, format!("{} bits do not fit into an absolute value", field.bits))
                .into());
        }

        let mut writer = BitWriter::new();
        write_value(&mut writer, field, &self.values[index]);
        let bytes = writer.into_bytes();
        let raw = bytes
            .iter()
            .fold(0u128, |acc, byte| (acc << 8) | u128::from(*byte));
        Ok(raw >> (bytes.len() * 8 - usize::from(field.bits)))
    }

    /// Serializes the message into the smallest number of whole bytes.
    pub fn serialize(&self) -> Result<Vec<u8>, MessageError> {
        let mut writer = BitWriter::new();
        self.write_into(&mut writer)?;
        Ok(writer.into_bytes())
    }

    /// Serializes the message and pads it with zeroes up to `len` bytes.
    pub fn serialize_padded(&self, len: usize) -> Result<Vec<u8>, MessageError> {
        let mut bytes = self.serialize()?;
        if bytes.len() > len {
            return Err(ProtocolError::SizeMismatch {
                expected: len,
                actual: bytes.len(),
            }
            .into());
        }
        bytes.resize(len, 0);
        Ok(bytes)
    }

    fn write_into(&self, writer: &mut BitWriter) -> Result<(), MessageError> {
        for (field, value) in self.fields() {
            // Values were normalized on assignment; this re-check only fails
            // for nested messages built from a different schema revision.
            let value = field.normalize(self.schema, value.clone(), false)?;
            write_value(writer, field, &value);
        }
        Ok(())
    }

    /// Parses a message from raw bytes.
    ///
    /// Bytes beyond the schema's length are treated as padding. Fewer bytes
    /// than the schema needs are rejected as a short frame.
    pub fn parse(schema: &'static Schema, data: &[u8]) -> Result<Self, MessageError> {
        let needed = schema.byte_len();
        if data.len() < needed {
            return Err(ProtocolError::ShortFrame {
                expected: needed,
                actual: data.len(),
            }
            .into());
        }

        let mut reader = BitReader::new(data);
        Ok(Self::read_from(schema, &mut reader)?)
    }

    /// Parses a message from raw bytes that must be exactly as long as the
    /// schema.
    pub fn parse_exact(schema: &'static Schema, data: &[u8]) -> Result<Self, MessageError> {
        if data.len() != schema.byte_len() {
            return Err(ProtocolError::SizeMismatch {
                expected: schema.byte_len(),
                actual: data.len(),
            }
            .into());
        }
        Self::parse(schema, data)
    }

    fn read_from(schema: &'static Schema, reader: &mut BitReader<'_>) -> Result<Self, ConstraintViolation> {
        let timestamp = Timestamp::now();
        let mut values = Vec::with_capacity(schema.fields.len());

        for field in schema.fields {
            if reader.remaining() < usize::from(field.bits) {
                return Err(schema.violation(field.name, "frame ends inside this field"));
            }

            let value = match field.kind() {
                FieldKind::Uint => FieldValue::Uint(reader.read_uint(field.bits)),
                FieldKind::Bytes => FieldValue::Bytes(reader.read_bytes(field.byte_len())),
                FieldKind::Nested(nested) => FieldValue::Nested(Box::new(Self::read_from(nested, reader)?)),
            };
            field.check(schema, &value)?;
            values.push(value);
        }

        Ok(Self {
            schema,
            values,
            timestamp,
        })
    }
}

fn write_value(writer: &mut BitWriter, field: &FieldDescriptor, value: &FieldValue) {
    match value {
        FieldValue::Uint(value) => writer.push_uint(*value, field.bits),
        FieldValue::Bytes(bytes) => writer.push_bytes(bytes),
        FieldValue::Nested(msg) => {
            for (field, value) in msg.fields() {
                write_value(writer, field, value);
            }
        },
    }
}

impl PartialEq for BitMessage {
    fn eq(&self, other: &Self) -> bool {
        self.schema.name == other.schema.name && self.values == other.values
    }
}

impl Eq for BitMessage {}

impl fmt::Debug for BitMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct(self.schema.name);
        for (field, value) in self.fields() {
            dbg.field(field.name, value);
        }
        dbg.finish()
    }
}

impl fmt::Display for BitMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.schema.name)?;
        for (i, (field, value)) in self.fields().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {}: {value}", field.name)?;
        }
        write!(f, " }}")
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    static FLAGS: Schema = Schema::new("Flags", &[
        FieldDescriptor::new(0xfa, 3, "Reserved", "reserved"),
        FieldDescriptor::new(0xf9, 1, "Enabled", "enabled"),
        FieldDescriptor::new(0xf8, 4, "Mode", "mode").with_checks(&[Check::OneOf(&[0, 1, 4])]),
    ]);

    static SAMPLE: Schema = Schema::new("Sample", &[
        FieldDescriptor::new(0xfa, 12, "Level", "level")
            .with_aliases(&["lvl"])
            .with_checks(&[Check::Range { min: 0, max: 1000 }]),
        FieldDescriptor::new(0xf9, 4, "Unit", "unit").with_default(0x3),
        FieldDescriptor::nested(0xf8, "Flags", "flags", &FLAGS),
        FieldDescriptor::new(0xf7, 32, "Serial", "serial").with_checks(&[Check::ByteLength(4)]),
        FieldDescriptor::new(0xf6, 8, "Padding", "padding"),
    ]);

    #[test]
    fn layouts_are_consistent() {
        SAMPLE.validate_layout().unwrap();
        assert_eq!(SAMPLE.bit_len(), 64);
        assert_eq!(SAMPLE.byte_len(), 8);
    }

    #[test]
    fn defaults_are_applied() {
        let msg = BitMessage::new(&SAMPLE);
        assert_eq!(msg.uint("unit").unwrap(), 0x3);
        assert_eq!(msg.bytes("serial").unwrap(), vec![0, 0, 0, 0]);
        assert_eq!(msg.serialize().unwrap(), vec![0x00, 0x03, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn serializes_msb_first_across_fields() {
        let flags = BitMessage::new(&FLAGS).with("enabled", true).unwrap().with("mode", 4u8).unwrap();
        let msg = BitMessage::new(&SAMPLE)
            .with("lvl", 0x3e8u16)
            .unwrap()
            .with("unit", 0x1u8)
            .unwrap()
            .with("flags", flags)
            .unwrap()
            .with("serial", [0xde, 0xad, 0xbe, 0xef])
            .unwrap();

        assert_eq!(msg.serialize().unwrap(), vec![0x3e, 0x81, 0x14, 0xde, 0xad, 0xbe, 0xef, 0x00]);
        assert_eq!(msg.serialize_padded(16).unwrap().len(), 16);
        assert_eq!(msg.nested("flags").unwrap().uint("mode").unwrap(), 4);
    }

    #[test]
    fn lookup_by_alias_and_field_identifier() {
        let mut msg = BitMessage::new(&SAMPLE);
        msg.set_fid(0xfa, 7u8).unwrap();
        assert_eq!(msg.uint("level").unwrap(), 7);
        assert_eq!(msg.get("lvl").unwrap(), &FieldValue::Uint(7));
        assert_eq!(msg.get_fid(0xf9).unwrap(), &FieldValue::Uint(3));
    }

    #[test]
    fn out_of_range_values_name_the_field() {
        let mut msg = BitMessage::new(&SAMPLE);

        let MessageError::Constraint(err) = msg.set("level", 1001u16).unwrap_err() else {
            panic!("expected a constraint violation");
        };
        assert_eq!(err.schema, "Sample");
        assert_eq!(err.field, "level");

        let MessageError::Constraint(err) = msg.set("unit", 0x10u8).unwrap_err() else {
            panic!("expected a constraint violation");
        };
        assert_eq!(err.field, "unit");

        assert!(msg.set("serial", vec![1, 2, 3]).is_err());
        assert!(msg.set("missing", 1u8).is_err());
    }

    #[test]
    fn unchecked_assignment_skips_validators_but_not_width() {
        let mut msg = BitMessage::new(&SAMPLE);
        msg.set_unchecked("level", 0xfffu16).unwrap();
        assert_eq!(msg.uint("level").unwrap(), 0xfff);
        assert!(msg.set_unchecked("level", 0x1000u16).is_err());
    }

    #[test]
    fn parse_rejects_short_frames_and_validates() {
        assert_eq!(
            BitMessage::parse(&SAMPLE, &[0x00; 5]).unwrap_err(),
            MessageError::Protocol(ProtocolError::ShortFrame {
                expected: 8,
                actual: 5
            })
        );
        assert_eq!(
            BitMessage::parse_exact(&SAMPLE, &[0x00; 9]).unwrap_err(),
            MessageError::Protocol(ProtocolError::SizeMismatch {
                expected: 8,
                actual: 9
            })
        );

        // Mode 2 is not an accepted value.
        let err = BitMessage::parse(&SAMPLE, &[0x00, 0x00, 0x02, 0, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, MessageError::Constraint(ConstraintViolation { field, .. }) if field == "mode"));
    }

    #[test]
    fn parse_accepts_trailing_padding() {
        let mut data = vec![0x00, 0x13, 0x10, 1, 2, 3, 4, 0];
        data.resize(16, 0);
        let msg = BitMessage::parse(&SAMPLE, &data).unwrap();
        assert_eq!(msg.uint("unit").unwrap(), 3);
        assert_eq!(msg.nested("flags").unwrap().uint("enabled").unwrap(), 1);
        assert_eq!(msg.bytes("serial").unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn absolute_value_reads_raw_encoding() {
        let msg = BitMessage::parse(&SAMPLE, &[0x00, 0x13, 0x14, 1, 2, 3, 4, 0]).unwrap();
        assert_eq!(msg.absolute_value("serial").unwrap(), 0x0102_0304);
        assert_eq!(msg.absolute_value("flags").unwrap(), 0x14);
        assert_eq!(msg.absolute_value("unit").unwrap(), 0x3);
    }

    #[test]
    fn textual_representation_is_stable() {
        let msg = BitMessage::new(&FLAGS).with("enabled", true).unwrap();
        assert_eq!(msg.to_string(), "Flags { reserved: 0x0, enabled: 0x1, mode: 0x0 }");
    }

    proptest! {
        #[test]
        fn parse_inverts_serialize(level in 0u64..=1000, unit in 0u64..16, enabled: bool, mode in prop::sample::select(vec![0u64, 1, 4]), serial: [u8; 4], padding: u8) {
            let flags = BitMessage::new(&FLAGS).with("enabled", enabled).unwrap().with("mode", mode).unwrap();
            let msg = BitMessage::new(&SAMPLE)
                .with("level", level).unwrap()
                .with("unit", unit).unwrap()
                .with("flags", flags).unwrap()
                .with("serial", serial).unwrap()
                .with("padding", padding).unwrap();

            let bytes = msg.serialize().unwrap();
            let parsed = BitMessage::parse(&SAMPLE, &bytes).unwrap();
            prop_assert_eq!(&parsed, &msg);
            prop_assert_eq!(parsed.serialize().unwrap(), bytes);
        }
    }
}
