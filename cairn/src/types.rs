//! Column types and the typed values stored in tuples.

use std::fmt;

use bytes::{Buf, BufMut};

use crate::error::{DbError, Result};

/// Maximum number of bytes a string field keeps. Longer strings are truncated.
pub const STRING_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    String,
}

impl Type {
    /// Serialized width of a value of this type.
    pub fn byte_len(&self) -> usize {
        match self {
            Type::Int => 4,
            // length prefix + fixed payload
            Type::String => 4 + STRING_LEN,
        }
    }

    /// Decodes one value of this type from the front of `buf`.
    pub fn parse(&self, buf: &mut impl Buf) -> Result<Field> {
        if buf.remaining() < self.byte_len() {
            return Err(DbError::Db(format!(
                "need {} bytes to parse {}, have {}",
                self.byte_len(),
                self,
                buf.remaining()
            )));
        }
        match self {
            Type::Int => Ok(Field::Int(buf.get_i32())),
            Type::String => {
                let len = buf.get_u32() as usize;
                if len > STRING_LEN {
                    return Err(DbError::Db(format!(
                        "string length {len} exceeds capacity {STRING_LEN}"
                    )));
                }
                let mut payload = [0u8; STRING_LEN];
                buf.copy_to_slice(&mut payload);
                let value = String::from_utf8_lossy(&payload[..len]).into_owned();
                Ok(Field::String(value))
            }
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int => write!(f, "INT"),
            Type::String => write!(f, "STRING"),
        }
    }
}

/// Comparison operators usable by predicates over fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEq,
    GreaterThan,
    GreaterThanOrEq,
    /// Substring match for strings, equality for integers.
    Like,
}

/// A single immutable typed value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    Int(i32),
    String(String),
}

impl Field {
    pub fn field_type(&self) -> Type {
        match self {
            Field::Int(_) => Type::Int,
            Field::String(_) => Type::String,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Field::Int(v) => Some(*v),
            Field::String(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::String(s) => Some(s),
            Field::Int(_) => None,
        }
    }

    /// Writes the fixed-width encoding of this value.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        match self {
            Field::Int(v) => buf.put_i32(*v),
            Field::String(s) => {
                let bytes = truncate_utf8(s, STRING_LEN);
                buf.put_u32(bytes.len() as u32);
                buf.put_slice(bytes);
                buf.put_bytes(0, STRING_LEN - bytes.len());
            }
        }
    }

    /// Compares two values of the same type. Values of different types never match.
    pub fn compare(&self, op: CompareOp, other: &Field) -> bool {
        match (self, other) {
            (Field::Int(a), Field::Int(b)) => match op {
                CompareOp::Equals | CompareOp::Like => a == b,
                CompareOp::NotEquals => a != b,
                CompareOp::LessThan => a < b,
                CompareOp::LessThanOrEq => a <= b,
                CompareOp::GreaterThan => a > b,
                CompareOp::GreaterThanOrEq => a >= b,
            },
            (Field::String(a), Field::String(b)) => match op {
                CompareOp::Equals => a == b,
                CompareOp::NotEquals => a != b,
                CompareOp::LessThan => a < b,
                CompareOp::LessThanOrEq => a <= b,
                CompareOp::GreaterThan => a > b,
                CompareOp::GreaterThanOrEq => a >= b,
                CompareOp::Like => a.contains(b.as_str()),
            },
            _ => false,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Int(v) => write!(f, "{v}"),
            Field::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<i32> for Field {
    fn from(v: i32) -> Self {
        Field::Int(v)
    }
}

impl From<&str> for Field {
    fn from(s: &str) -> Self {
        Field::String(s.to_string())
    }
}

fn truncate_utf8(s: &str, max: usize) -> &[u8] {
    if s.len() <= max {
        return s.as_bytes();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s.as_bytes()[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_field_is_fixed_width() {
        let mut buf = Vec::new();
        Field::from("abc").serialize(&mut buf);
        assert_eq!(buf.len(), Type::String.byte_len());

        let parsed = Type::String.parse(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed, Field::from("abc"));
    }

    #[test]
    fn test_long_string_is_truncated() {
        let long = "x".repeat(STRING_LEN + 10);
        let mut buf = Vec::new();
        Field::String(long).serialize(&mut buf);
        let parsed = Type::String.parse(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed.as_str().unwrap().len(), STRING_LEN);
    }

    #[test]
    fn test_compare() {
        assert!(Field::Int(1).compare(CompareOp::LessThan, &Field::Int(2)));
        assert!(!Field::Int(1).compare(CompareOp::Equals, &Field::from("1")));
        assert!(Field::from("hello").compare(CompareOp::Like, &Field::from("ell")));
    }

    #[test]
    fn test_parse_short_buffer_fails() {
        let buf = [0u8; 2];
        assert!(Type::Int.parse(&mut &buf[..]).is_err());
    }
}
