//! Nullable scalar values, key tuples, and their canonical byte encoding.
//!
//! The encoding produced here is used both on the wire and as the input to
//! range hashing, so the two ends always digest identical bytes. Key tuples
//! carry the one total order used everywhere: cursor comparison, store
//! ordering, midpoint selection, and test oracles. NULL sorts below every
//! non-null value.

use anyhow::{Context, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single column value. Engine-specific types are projected onto this small
/// set by the store adapter before they reach the sync core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Real(f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// A row in column declaration order.
pub type Row = Vec<Value>;

// Wire tags for the canonical encoding.
const TAG_NULL: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_REAL: u8 = 0x03;
const TAG_TEXT: u8 = 0x04;
const TAG_BYTES: u8 = 0x05;

impl Value {
    /// Size of the canonical encoding in bytes.
    pub fn encoded_len(&self) -> usize {
        match self {
            Value::Null => 1,
            Value::Bool(_) => 2,
            Value::Int(_) | Value::Real(_) => 9,
            Value::Text(s) => 5 + s.len(),
            Value::Bytes(b) => 5 + b.len(),
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Value::Null => buf.put_u8(TAG_NULL),
            Value::Bool(b) => {
                buf.put_u8(TAG_BOOL);
                buf.put_u8(*b as u8);
            }
            Value::Int(n) => {
                buf.put_u8(TAG_INT);
                buf.put_i64(*n);
            }
            Value::Real(f) => {
                buf.put_u8(TAG_REAL);
                buf.put_u64(f.to_bits());
            }
            Value::Text(s) => {
                buf.put_u8(TAG_TEXT);
                buf.put_u32(s.len() as u32);
                buf.put_slice(s.as_bytes());
            }
            Value::Bytes(b) => {
                buf.put_u8(TAG_BYTES);
                buf.put_u32(b.len() as u32);
                buf.put_slice(b);
            }
        }
    }

    pub fn decode(payload: &mut Bytes) -> Result<Self> {
        if payload.remaining() < 1 {
            anyhow::bail!("Value truncated");
        }
        match payload.get_u8() {
            TAG_NULL => Ok(Value::Null),
            TAG_BOOL => {
                if payload.remaining() < 1 {
                    anyhow::bail!("Bool value truncated");
                }
                Ok(Value::Bool(payload.get_u8() != 0))
            }
            TAG_INT => {
                if payload.remaining() < 8 {
                    anyhow::bail!("Int value truncated");
                }
                Ok(Value::Int(payload.get_i64()))
            }
            TAG_REAL => {
                if payload.remaining() < 8 {
                    anyhow::bail!("Real value truncated");
                }
                Ok(Value::Real(f64::from_bits(payload.get_u64())))
            }
            TAG_TEXT => {
                if payload.remaining() < 4 {
                    anyhow::bail!("Text length truncated");
                }
                let len = payload.get_u32() as usize;
                if payload.remaining() < len {
                    anyhow::bail!("Text value truncated: expected {} bytes, got {}", len, payload.remaining());
                }
                let s = String::from_utf8(payload.copy_to_bytes(len).to_vec())
                    .context("Invalid UTF-8 in Text value")?;
                Ok(Value::Text(s))
            }
            TAG_BYTES => {
                if payload.remaining() < 4 {
                    anyhow::bail!("Bytes length truncated");
                }
                let len = payload.get_u32() as usize;
                if payload.remaining() < len {
                    anyhow::bail!("Bytes value truncated: expected {} bytes, got {}", len, payload.remaining());
                }
                Ok(Value::Bytes(payload.copy_to_bytes(len).to_vec()))
            }
            tag => anyhow::bail!("Unknown value tag 0x{:02x}", tag),
        }
    }

    // NULL < Bool < numeric < Text < Bytes; within numeric, Int and Real
    // compare numerically so mixed-width key columns order correctly.
    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Real(_) => 2,
            Value::Text(_) => 3,
            Value::Bytes(_) => 4,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Real(a), Value::Real(b)) => a.total_cmp(b),
            (Value::Int(a), Value::Real(b)) => (*a as f64).total_cmp(b),
            (Value::Real(a), Value::Int(b)) => a.total_cmp(&(*b as f64)),
            (Value::Text(a), Value::Text(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Real(r) => write!(f, "{}", r),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

/// A row's primary key values in key order (which may differ from column
/// declaration order). The empty tuple is a sentinel: "start of table" when
/// used as a cursor, "end of table" when used as a range bound.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyTuple(pub Vec<Value>);

impl KeyTuple {
    pub fn empty() -> Self {
        KeyTuple(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for KeyTuple {
    fn from(values: Vec<Value>) -> Self {
        KeyTuple(values)
    }
}

impl fmt::Display for KeyTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, ")")
    }
}

/// Encode a list of values with a u16 count prefix (rows and key tuples).
pub fn encode_values(buf: &mut BytesMut, values: &[Value]) {
    buf.put_u16(values.len() as u16);
    for v in values {
        v.encode(buf);
    }
}

pub fn decode_values(payload: &mut Bytes) -> Result<Vec<Value>> {
    if payload.remaining() < 2 {
        anyhow::bail!("Value list truncated");
    }
    let count = payload.get_u16() as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        values.push(Value::decode(payload)?);
    }
    Ok(values)
}

pub fn encoded_values_len(values: &[Value]) -> usize {
    2 + values.iter().map(Value::encoded_len).sum::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) -> Value {
        let mut buf = BytesMut::new();
        v.encode(&mut buf);
        assert_eq!(buf.len(), v.encoded_len());
        let mut payload = buf.freeze();
        Value::decode(&mut payload).unwrap()
    }

    #[test]
    fn test_value_roundtrip() {
        assert_eq!(roundtrip(Value::Null), Value::Null);
        assert_eq!(roundtrip(Value::Bool(true)), Value::Bool(true));
        assert_eq!(roundtrip(Value::Int(-42)), Value::Int(-42));
        assert_eq!(roundtrip(Value::Real(1.5)), Value::Real(1.5));
        assert_eq!(
            roundtrip(Value::Text("longer str".into())),
            Value::Text("longer str".into())
        );
        assert_eq!(
            roundtrip(Value::Bytes(vec![0, 255, 1])),
            Value::Bytes(vec![0, 255, 1])
        );
    }

    #[test]
    fn test_null_sorts_first() {
        assert!(Value::Null < Value::Int(i64::MIN));
        assert!(Value::Null < Value::Text(String::new()));
        assert!(Value::Null < Value::Bool(false));
    }

    #[test]
    fn test_numeric_cross_type_ordering() {
        assert!(Value::Int(1) < Value::Real(1.5));
        assert!(Value::Real(0.5) < Value::Int(1));
        assert_eq!(Value::Int(2), Value::Real(2.0));
    }

    #[test]
    fn test_text_orders_bytewise() {
        assert!(Value::Text("aa".into()) < Value::Text("ab".into()));
        assert!(Value::Text("a".into()) < Value::Text("aa".into()));
    }

    #[test]
    fn test_key_tuple_lexicographic() {
        let a = KeyTuple(vec![Value::Text("aa".into()), Value::Int(100)]);
        let b = KeyTuple(vec![Value::Text("aa".into()), Value::Int(968116383)]);
        let c = KeyTuple(vec![Value::Text("ab".into()), Value::Int(101)]);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_null_low_within_tuple() {
        let with_null = KeyTuple(vec![Value::Text("aa".into()), Value::Null]);
        let without = KeyTuple(vec![Value::Text("aa".into()), Value::Int(i64::MIN)]);
        assert!(with_null < without);
    }

    #[test]
    fn test_value_list_roundtrip() {
        let row = vec![Value::Int(2), Value::Null, Value::Text("test".into())];
        let mut buf = BytesMut::new();
        encode_values(&mut buf, &row);
        assert_eq!(buf.len(), encoded_values_len(&row));
        let mut payload = buf.freeze();
        assert_eq!(decode_values(&mut payload).unwrap(), row);
    }

    #[test]
    fn test_serde_json_shapes() {
        let row: Row = serde_json::from_str(r#"[2, null, "test", 1.5, true]"#).unwrap();
        assert_eq!(
            row,
            vec![
                Value::Int(2),
                Value::Null,
                Value::Text("test".into()),
                Value::Real(1.5),
                Value::Bool(true),
            ]
        );
    }
}
