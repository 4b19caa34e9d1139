//! Field-tagged wire format.
//!
//! ```text
//! ┌──────────────────────────┬─────────────────────────────┐
//! │ key: varint              │ value                       │
//! │ (field << 3) | wire_type │ type 0: varint              │
//! │                          │ type 2: varint len + bytes  │
//! └──────────────────────────┴─────────────────────────────┘
//! ```
//!
//! Fields may appear in any order; unknown field numbers are skipped so
//! newer firmware can add fields without breaking older hosts.

use crate::codec::varint;
use crate::error::DecodeError;

pub const WIRE_VARINT: u8 = 0;
pub const WIRE_LEN: u8 = 2;

const WIRE_TYPE_MASK: u64 = 0x07;

/// Builder for an encoded message body.
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: Vec<u8>,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn key(&mut self, field: u32, wire_type: u8) {
        varint::encode((u64::from(field) << 3) | u64::from(wire_type), &mut self.buf);
    }

    pub fn varint(&mut self, field: u32, value: u64) -> &mut Self {
        self.key(field, WIRE_VARINT);
        varint::encode(value, &mut self.buf);
        self
    }

    pub fn bool(&mut self, field: u32, value: bool) -> &mut Self {
        self.varint(field, u64::from(value))
    }

    pub fn bytes(&mut self, field: u32, data: &[u8]) -> &mut Self {
        self.key(field, WIRE_LEN);
        varint::encode(data.len() as u64, &mut self.buf);
        self.buf.extend_from_slice(data);
        self
    }

    pub fn finish(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.buf)
    }
}

/// A decoded field value, borrowing from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
}

impl<'a> FieldValue<'a> {
    pub fn as_u64(self, name: &'static str) -> Result<u64, DecodeError> {
        match self {
            Self::Varint(v) => Ok(v),
            Self::Bytes(_) => Err(DecodeError::InvalidValue(name)),
        }
    }

    pub fn as_u32(self, name: &'static str) -> Result<u32, DecodeError> {
        u32::try_from(self.as_u64(name)?).map_err(|_| DecodeError::InvalidValue(name))
    }

    pub fn as_bool(self, name: &'static str) -> Result<bool, DecodeError> {
        Ok(self.as_u64(name)? != 0)
    }

    pub fn as_bytes(self, name: &'static str) -> Result<&'a [u8], DecodeError> {
        match self {
            Self::Bytes(b) => Ok(b),
            Self::Varint(_) => Err(DecodeError::InvalidValue(name)),
        }
    }
}

/// Iterator over `(field_number, value)` pairs.
///
/// Yields at most one error, after which iteration ends.
pub struct FieldReader<'a> {
    input: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(input: &'a [u8]) -> Self {
        Self { input, pos: 0 }
    }

    fn next_field(&mut self) -> Result<(u32, FieldValue<'a>), DecodeError> {
        let rest = &self.input[self.pos..];
        let (key, used) = varint::decode(rest)?;
        self.pos += used;

        let field = u32::try_from(key >> 3).map_err(|_| DecodeError::InvalidValue("field"))?;
        let wire_type = (key & WIRE_TYPE_MASK) as u8;

        match wire_type {
            WIRE_VARINT => {
                let (value, used) = varint::decode(&self.input[self.pos..])?;
                self.pos += used;
                Ok((field, FieldValue::Varint(value)))
            }
            WIRE_LEN => {
                let (len, used) = varint::decode(&self.input[self.pos..])?;
                self.pos += used;
                let len = usize::try_from(len).map_err(|_| DecodeError::Truncated)?;
                let end = self.pos.checked_add(len).ok_or(DecodeError::Truncated)?;
                if end > self.input.len() {
                    return Err(DecodeError::Truncated);
                }
                let data = &self.input[self.pos..end];
                self.pos = end;
                Ok((field, FieldValue::Bytes(data)))
            }
            other => Err(DecodeError::UnsupportedWireType(other)),
        }
    }
}

impl<'a> Iterator for FieldReader<'a> {
    type Item = Result<(u32, FieldValue<'a>), DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.input.len() {
            return None;
        }
        let item = self.next_field();
        if item.is_err() {
            self.pos = self.input.len();
        }
        Some(item)
    }
}
