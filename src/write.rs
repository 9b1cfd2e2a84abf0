//! [`Write`] — the atomic unit of mutation, and its stable binary encoding.
//!
//! A `Write` is an `ADD` or `REMOVE` of `(key, value)` against a `record`,
//! stamped with a globally monotonic `version`. Writes are created by the
//! engine, appended to the write buffer, and eventually replayed into
//! database blocks as [`Revision`]s — the persisted form is identical to
//! the in-flight form, so `Revision` is simply an alias.
//!
//! The encoding below is the one stable wire format named in §6: every
//! multi-byte integer is big-endian, independent of host architecture.

use thiserror::Error;

use crate::encoding::{self, EncodingError};
use crate::value::{Value, ValueError, ValueType};

/// Maximum key length accepted by [`Write::decode_be`] — guards against a
/// corrupt length prefix causing an unbounded allocation.
pub const MAX_KEY_LEN: usize = 64 * 1024;

/// Maximum value payload length accepted by [`Write::decode_be`].
pub const MAX_VALUE_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Remove = 0,
    Add = 1,
}

impl Operation {
    fn from_byte(b: u8) -> Result<Self, WriteEncodingError> {
        match b {
            0 => Ok(Operation::Remove),
            1 => Ok(Operation::Add),
            other => Err(WriteEncodingError::UnknownOperation(other)),
        }
    }
}

/// A single ADD or REMOVE of `(key, value)` against a `record`, stamped
/// with a monotonic version.
#[derive(Debug, Clone, PartialEq)]
pub struct Write {
    pub operation: Operation,
    pub version: u64,
    pub record: i64,
    pub key: String,
    pub value: Value,
}

/// A `Write` that has been durably transported into a database block.
///
/// Structurally identical to `Write` — the distinction is purely one of
/// lifecycle (§3: "Created on transport; immutable").
pub type Revision = Write;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WriteEncodingError {
    #[error("buffer too short: need at least {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("unknown operation byte: {0}")]
    UnknownOperation(u8),

    #[error("key is not valid UTF-8")]
    InvalidKeyUtf8,

    #[error("key length {0} exceeds maximum {MAX_KEY_LEN}")]
    KeyTooLong(usize),

    #[error("value length {0} exceeds maximum {MAX_VALUE_LEN}")]
    ValueTooLong(usize),

    #[error(transparent)]
    Value(#[from] ValueError),
}

impl Write {
    pub fn add(key: impl Into<String>, value: Value, record: i64, version: u64) -> Self {
        Self {
            operation: Operation::Add,
            version,
            record,
            key: key.into(),
            value,
        }
    }

    pub fn remove(key: impl Into<String>, value: Value, record: i64, version: u64) -> Self {
        Self {
            operation: Operation::Remove,
            version,
            record,
            key: key.into(),
            value,
        }
    }

    pub fn is_add(&self) -> bool {
        matches!(self.operation, Operation::Add)
    }

    /// Encodes this write using the stable big-endian wire format:
    ///
    /// `[op:1][version:8][record:8][key_len:4][key][type:1][value_len:4][value]`
    pub fn encode_be(&self) -> Vec<u8> {
        let key_bytes = self.key.as_bytes();
        let value_bytes = self.value.encode_be();

        let mut out = Vec::with_capacity(1 + 8 + 8 + 4 + key_bytes.len() + 1 + 4 + value_bytes.len());
        out.push(self.operation as u8);
        out.extend_from_slice(&self.version.to_be_bytes());
        out.extend_from_slice(&self.record.to_be_bytes());
        out.extend_from_slice(&(key_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(key_bytes);
        out.push(self.value.value_type() as u8);
        out.extend_from_slice(&(value_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&value_bytes);
        out
    }

    /// Decodes a write from the front of `buf`, returning the write and the
    /// number of bytes consumed.
    pub fn decode_be(buf: &[u8]) -> Result<(Self, usize), WriteEncodingError> {
        const FIXED_HEADER: usize = 1 + 8 + 8 + 4;
        if buf.len() < FIXED_HEADER {
            return Err(WriteEncodingError::Truncated {
                need: FIXED_HEADER,
                have: buf.len(),
            });
        }

        let operation = Operation::from_byte(buf[0])?;
        let version = u64::from_be_bytes(buf[1..9].try_into().unwrap());
        let record = i64::from_be_bytes(buf[9..17].try_into().unwrap());
        let key_len = u32::from_be_bytes(buf[17..21].try_into().unwrap()) as usize;

        if key_len > MAX_KEY_LEN {
            return Err(WriteEncodingError::KeyTooLong(key_len));
        }

        let mut cursor = FIXED_HEADER;
        if buf.len() < cursor + key_len + 1 + 4 {
            return Err(WriteEncodingError::Truncated {
                need: cursor + key_len + 1 + 4,
                have: buf.len(),
            });
        }

        let key = String::from_utf8(buf[cursor..cursor + key_len].to_vec())
            .map_err(|_| WriteEncodingError::InvalidKeyUtf8)?;
        cursor += key_len;

        let value_type = ValueType::from_tag(buf[cursor])?;
        cursor += 1;

        let value_len = u32::from_be_bytes(buf[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;

        if value_len > MAX_VALUE_LEN {
            return Err(WriteEncodingError::ValueTooLong(value_len));
        }
        if buf.len() < cursor + value_len {
            return Err(WriteEncodingError::Truncated {
                need: cursor + value_len,
                have: buf.len(),
            });
        }

        let value = Value::decode_be(value_type, &buf[cursor..cursor + value_len])?;
        cursor += value_len;

        Ok((
            Write {
                operation,
                version,
                record,
                key,
                value,
            },
            cursor,
        ))
    }
}

// ------------------------------------------------------------------------------------------------
// encoding::Encode / encoding::Decode — lets Write ride the crate's generic WAL unmodified.
// ------------------------------------------------------------------------------------------------

impl encoding::Encode for Write {
    fn encode_to(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        buf.extend_from_slice(&self.encode_be());
        Ok(())
    }
}

impl encoding::Decode for Write {
    fn decode_from(buf: &[u8]) -> Result<(Self, usize), EncodingError> {
        Write::decode_be(buf).map_err(|e| EncodingError::Custom(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let w = Write::add("name", Value::String("Ada".to_string()), 42, 7);
        let encoded = w.encode_be();
        let (decoded, consumed) = Write::decode_be(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, w);
    }

    #[test]
    fn decode_truncated_header_errors() {
        let err = Write::decode_be(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, WriteEncodingError::Truncated { .. }));
    }

    #[test]
    fn decode_unknown_operation_errors() {
        let w = Write::add("k", Value::Boolean(true), 1, 1);
        let mut encoded = w.encode_be();
        encoded[0] = 9;
        let err = Write::decode_be(&encoded).unwrap_err();
        assert_eq!(err, WriteEncodingError::UnknownOperation(9));
    }

    #[test]
    fn rides_the_generic_encoding_trait() {
        let w = Write::add("k", Value::Long(9), 3, 5);
        let bytes = encoding::encode_to_vec(&w).unwrap();
        let (decoded, _) = encoding::decode_from_slice::<Write>(&bytes).unwrap();
        assert_eq!(decoded, w);
    }

    #[test]
    fn multiple_writes_back_to_back_decode_independently() {
        let a = Write::add("a", Value::Integer(1), 1, 1);
        let b = Write::remove("b", Value::Integer(2), 2, 2);

        let mut buf = a.encode_be();
        buf.extend(b.encode_be());

        let (decoded_a, n) = Write::decode_be(&buf).unwrap();
        assert_eq!(decoded_a, a);
        let (decoded_b, _) = Write::decode_be(&buf[n..]).unwrap();
        assert_eq!(decoded_b, b);
    }
}
