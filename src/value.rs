//! Typed values (`TObject`) stored against a `(key, record)` pair.
//!
//! A [`Value`] is one of a fixed set of primitive types. Every value has a
//! stable, big-endian binary encoding (see [`Value::encode_be`] /
//! [`Value::decode_be`]) used both on the wire and on disk — this is the
//! one format every block family, the write buffer, and (eventually) a
//! driver must agree on, so it never depends on host endianness.

use std::cmp::Ordering;
use std::fmt;

use thiserror::Error;

/// Type tag byte used in the stable [`Write`](crate::write::Write) encoding
/// and wherever a [`Value`] is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ValueType {
    Boolean = 1,
    Integer = 2,
    Long = 3,
    Float = 4,
    Double = 5,
    String = 6,
    Tag = 7,
    Link = 8,
}

impl ValueType {
    pub fn from_tag(tag: u8) -> Result<Self, ValueError> {
        match tag {
            1 => Ok(Self::Boolean),
            2 => Ok(Self::Integer),
            3 => Ok(Self::Long),
            4 => Ok(Self::Float),
            5 => Ok(Self::Double),
            6 => Ok(Self::String),
            7 => Ok(Self::Tag),
            8 => Ok(Self::Link),
            other => Err(ValueError::UnknownType(other)),
        }
    }
}

/// A typed primitive value.
///
/// `Tag` is a string like `String` but is never broken into search tokens
/// (§6) — it exists for values that should be equality-searchable but not
/// full-text indexed (e.g. category labels). `Link` is a reference to
/// another record by its 64-bit id.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Boolean(bool),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    Tag(String),
    Link(i64),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("unknown value type tag: {0}")]
    UnknownType(u8),

    #[error("truncated value payload: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("value payload is not valid UTF-8")]
    InvalidUtf8,
}

impl Value {
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Boolean(_) => ValueType::Boolean,
            Value::Integer(_) => ValueType::Integer,
            Value::Long(_) => ValueType::Long,
            Value::Float(_) => ValueType::Float,
            Value::Double(_) => ValueType::Double,
            Value::String(_) => ValueType::String,
            Value::Tag(_) => ValueType::Tag,
            Value::Link(_) => ValueType::Link,
        }
    }

    /// Encodes the value's type-specific big-endian payload (the bytes that
    /// follow the 4-byte value length in the stable [`Write`](crate::write::Write)
    /// encoding). Does **not** include the type tag or the length prefix.
    pub fn encode_be(&self) -> Vec<u8> {
        match self {
            Value::Boolean(b) => vec![if *b { 1 } else { 0 }],
            Value::Integer(v) => v.to_be_bytes().to_vec(),
            Value::Long(v) => v.to_be_bytes().to_vec(),
            Value::Float(v) => v.to_be_bytes().to_vec(),
            Value::Double(v) => v.to_be_bytes().to_vec(),
            Value::String(s) => s.as_bytes().to_vec(),
            Value::Tag(s) => s.as_bytes().to_vec(),
            Value::Link(v) => v.to_be_bytes().to_vec(),
        }
    }

    /// Decodes a value payload given its type tag. `payload` must be
    /// exactly `value_len` bytes — the caller is responsible for slicing
    /// it out using the length prefix.
    pub fn decode_be(value_type: ValueType, payload: &[u8]) -> Result<Self, ValueError> {
        fn need(payload: &[u8], n: usize) -> Result<(), ValueError> {
            if payload.len() != n {
                return Err(ValueError::Truncated {
                    need: n,
                    have: payload.len(),
                });
            }
            Ok(())
        }

        Ok(match value_type {
            ValueType::Boolean => {
                need(payload, 1)?;
                Value::Boolean(payload[0] != 0)
            }
            ValueType::Integer => {
                need(payload, 4)?;
                Value::Integer(i32::from_be_bytes(payload.try_into().unwrap()))
            }
            ValueType::Long => {
                need(payload, 8)?;
                Value::Long(i64::from_be_bytes(payload.try_into().unwrap()))
            }
            ValueType::Float => {
                need(payload, 4)?;
                Value::Float(f32::from_be_bytes(payload.try_into().unwrap()))
            }
            ValueType::Double => {
                need(payload, 8)?;
                Value::Double(f64::from_be_bytes(payload.try_into().unwrap()))
            }
            ValueType::String => {
                Value::String(String::from_utf8(payload.to_vec()).map_err(|_| ValueError::InvalidUtf8)?)
            }
            ValueType::Tag => {
                Value::Tag(String::from_utf8(payload.to_vec()).map_err(|_| ValueError::InvalidUtf8)?)
            }
            ValueType::Link => {
                need(payload, 8)?;
                Value::Link(i64::from_be_bytes(payload.try_into().unwrap()))
            }
        })
    }

    /// Lower-cased, non-alphanumeric-delimited search tokens for this value.
    ///
    /// Only `String` values are tokenized for the search (`ctb`) family —
    /// `Tag` is equality/range-searchable via the secondary family but is
    /// never broken into tokens (§6).
    pub fn search_tokens(&self) -> Vec<String> {
        match self {
            Value::String(s) => s
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|t| !t.is_empty())
                .map(|t| t.to_string())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Compares two values for the order-sensitive `find` operators.
    ///
    /// Values of different types are never order-comparable (find against
    /// a mixed-type operand set simply never matches across types).
    pub fn partial_cmp_typed(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Boolean(a), Value::Boolean(b)) => a.partial_cmp(b),
            (Value::Integer(a), Value::Integer(b)) => a.partial_cmp(b),
            (Value::Long(a), Value::Long(b)) => a.partial_cmp(b),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
            (Value::String(a), Value::String(b)) => a.partial_cmp(b),
            (Value::Tag(a), Value::Tag(b)) => a.partial_cmp(b),
            (Value::Link(a), Value::Link(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Tag(s) => write!(f, "{s}"),
            Value::Link(v) => write!(f, "@{v}"),
        }
    }
}
