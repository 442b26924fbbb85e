use std::fmt::Display;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::errdata;
use crate::errinput;

/// The field types a column can be declared with.
///
/// Integer types have their on-disk width fixed by the tag (little-endian,
/// signed or unsigned). Strings are stored as a two-byte little-endian byte
/// length followed by UTF-8 bytes, padded to the declared column width; the
/// declared width includes the two length bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    Str,
    Uint32,
    Int32,
    Uint16,
    Int16,
    Uint8,
    Int8,
}

impl FieldType {
    /// Stable wire id used in the file header block.
    pub fn id(self) -> u8 {
        match self {
            FieldType::Str => 0,
            FieldType::Uint32 => 1,
            FieldType::Int32 => 2,
            FieldType::Uint16 => 3,
            FieldType::Int16 => 4,
            FieldType::Uint8 => 5,
            FieldType::Int8 => 6,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(FieldType::Str),
            1 => Ok(FieldType::Uint32),
            2 => Ok(FieldType::Int32),
            3 => Ok(FieldType::Uint16),
            4 => Ok(FieldType::Int16),
            5 => Ok(FieldType::Uint8),
            6 => Ok(FieldType::Int8),
            id => errdata!("unknown field type id {id}"),
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "string" => Ok(FieldType::Str),
            "uint32" => Ok(FieldType::Uint32),
            "int32" => Ok(FieldType::Int32),
            "uint16" => Ok(FieldType::Uint16),
            "int16" => Ok(FieldType::Int16),
            "uint8" => Ok(FieldType::Uint8),
            "int8" => Ok(FieldType::Int8),
            name => errinput!("unknown field type {name:?}"),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldType::Str => "string",
            FieldType::Uint32 => "uint32",
            FieldType::Int32 => "int32",
            FieldType::Uint16 => "uint16",
            FieldType::Int16 => "int16",
            FieldType::Uint8 => "uint8",
            FieldType::Int8 => "int8",
        }
    }

    /// The on-disk width implied by the tag, or None for strings, whose
    /// width comes from the column declaration.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            FieldType::Str => None,
            FieldType::Uint32 | FieldType::Int32 => Some(4),
            FieldType::Uint16 | FieldType::Int16 => Some(2),
            FieldType::Uint8 | FieldType::Int8 => Some(1),
        }
    }

    pub fn is_fixed(self) -> bool {
        self.fixed_width().is_some()
    }

    /// Inclusive value range for integer types.
    fn range(self) -> (i64, i64) {
        match self {
            FieldType::Str => unreachable!("strings have no integer range"),
            FieldType::Uint32 => (0, u32::MAX as i64),
            FieldType::Int32 => (i32::MIN as i64, i32::MAX as i64),
            FieldType::Uint16 => (0, u16::MAX as i64),
            FieldType::Int16 => (i16::MIN as i64, i16::MAX as i64),
            FieldType::Uint8 => (0, u8::MAX as i64),
            FieldType::Int8 => (i8::MIN as i64, i8::MAX as i64),
        }
    }

    /// Checks that a value is representable in this type at the given
    /// column width.
    pub fn validate(self, width: usize, value: &Value) -> Result<()> {
        match (self, value) {
            (FieldType::Str, Value::Str(s)) => {
                if s.len() > width - 2 {
                    return errinput!(
                        "string of {} bytes exceeds column capacity of {} bytes",
                        s.len(),
                        width - 2
                    );
                }
                Ok(())
            }
            (FieldType::Str, other) => errinput!("expected a string value, got {other}"),
            (ty, Value::Int(i)) => {
                let (min, max) = ty.range();
                if *i < min || *i > max {
                    return errinput!("value {i} out of range [{min}, {max}] for {}", ty.name());
                }
                Ok(())
            }
            (ty, other) => errinput!("expected an integer value for {}, got {other}", ty.name()),
        }
    }

    /// Encodes a value into its fixed-width slot at `offset`. The value must
    /// already have been validated; padding bytes past a string's length are
    /// left as-is.
    pub fn write(self, buf: &mut [u8], offset: usize, value: &Value) -> Result<()> {
        match (self, value) {
            (FieldType::Str, Value::Str(s)) => {
                let bytes = s.as_bytes();
                LittleEndian::write_u16(&mut buf[offset..offset + 2], bytes.len() as u16);
                buf[offset + 2..offset + 2 + bytes.len()].copy_from_slice(bytes);
            }
            (FieldType::Uint32, Value::Int(i)) => {
                LittleEndian::write_u32(&mut buf[offset..offset + 4], *i as u32)
            }
            (FieldType::Int32, Value::Int(i)) => {
                LittleEndian::write_i32(&mut buf[offset..offset + 4], *i as i32)
            }
            (FieldType::Uint16, Value::Int(i)) => {
                LittleEndian::write_u16(&mut buf[offset..offset + 2], *i as u16)
            }
            (FieldType::Int16, Value::Int(i)) => {
                LittleEndian::write_i16(&mut buf[offset..offset + 2], *i as i16)
            }
            (FieldType::Uint8, Value::Int(i)) => buf[offset] = *i as u8,
            (FieldType::Int8, Value::Int(i)) => buf[offset] = *i as i8 as u8,
            (ty, value) => return errinput!("cannot encode {value} as {}", ty.name()),
        }
        Ok(())
    }

    /// Decodes the value stored in the slot at `offset`.
    pub fn read(self, buf: &[u8], offset: usize, width: usize) -> Result<Value> {
        match self {
            FieldType::Str => {
                let len = LittleEndian::read_u16(&buf[offset..offset + 2]) as usize;
                if len > width - 2 {
                    return errdata!("string length {len} exceeds column capacity {}", width - 2);
                }
                let bytes = buf[offset + 2..offset + 2 + len].to_vec();
                let s = String::from_utf8(bytes)
                    .map_err(|e| crate::error::Error::InvalidData(e.to_string()))?;
                Ok(Value::Str(s))
            }
            FieldType::Uint32 => Ok(Value::Int(
                LittleEndian::read_u32(&buf[offset..offset + 4]) as i64
            )),
            FieldType::Int32 => Ok(Value::Int(
                LittleEndian::read_i32(&buf[offset..offset + 4]) as i64
            )),
            FieldType::Uint16 => Ok(Value::Int(
                LittleEndian::read_u16(&buf[offset..offset + 2]) as i64
            )),
            FieldType::Int16 => Ok(Value::Int(
                LittleEndian::read_i16(&buf[offset..offset + 2]) as i64
            )),
            FieldType::Uint8 => Ok(Value::Int(buf[offset] as i64)),
            FieldType::Int8 => Ok(Value::Int(buf[offset] as i8 as i64)),
        }
    }
}

impl Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A field value: either text or a whole number. Integer columns of every
/// width share the Int variant; range checks happen at validation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Str(String),
    Int(i64),
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Int(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<u32> for Value {
    fn from(i: u32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<i16> for Value {
    fn from(i: i16) -> Self {
        Value::Int(i as i64)
    }
}

impl From<u16> for Value {
    fn from(i: u16) -> Self {
        Value::Int(i as i64)
    }
}

impl From<u8> for Value {
    fn from(i: u8) -> Self {
        Value::Int(i as i64)
    }
}

impl From<i8> for Value {
    fn from(i: i8) -> Self {
        Value::Int(i as i64)
    }
}
