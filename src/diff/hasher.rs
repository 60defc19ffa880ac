//! Content hashing for contiguous row ranges.
//!
//! A range hash digests the canonical encoding of each row, in key order,
//! streamed row by row so large values never force the whole range into
//! memory. Both endpoints hash the same canonical bytes, so equal content
//! means equal digests regardless of the backing engine.

use crate::schema::Table;
use crate::value::{encode_values, KeyTuple, Row};
use bytes::BytesMut;
use std::fmt;

/// Digest of a row range's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowHash(pub Vec<u8>);

impl RowHash {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for RowHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

/// Streaming hasher over a run of rows, counting as it goes.
pub struct RowHasher {
    hasher: blake3::Hasher,
    scratch: BytesMut,
    pub row_count: usize,
}

impl RowHasher {
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
            scratch: BytesMut::new(),
            row_count: 0,
        }
    }

    pub fn update(&mut self, row: &Row) {
        self.scratch.clear();
        encode_values(&mut self.scratch, row);
        self.hasher.update(&self.scratch);
        self.row_count += 1;
    }

    pub fn finish(self) -> RowHash {
        RowHash(self.hasher.finalize().as_bytes().to_vec())
    }
}

impl Default for RowHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hasher that also remembers the key of the last row it saw, so a range scan
/// yields both the digest and the range's end bound in one pass.
pub struct RowHasherAndLastKey<'a> {
    inner: RowHasher,
    table: &'a Table,
    pub last_key: KeyTuple,
}

impl<'a> RowHasherAndLastKey<'a> {
    pub fn new(table: &'a Table) -> Self {
        Self {
            inner: RowHasher::new(),
            table,
            last_key: KeyTuple::empty(),
        }
    }

    pub fn update(&mut self, row: &Row) {
        self.last_key = self.table.key_of(row);
        self.inner.update(row);
    }

    pub fn row_count(&self) -> usize {
        self.inner.row_count
    }

    pub fn finish(self) -> (RowHash, usize, KeyTuple) {
        let count = self.inner.row_count;
        (self.inner.finish(), count, self.last_key)
    }
}

/// Hash a slice of rows in one call. Test oracle and small-range helper; the
/// engine itself streams through [`RowHasher`].
pub fn hash_rows<'r>(rows: impl IntoIterator<Item = &'r Row>) -> RowHash {
    let mut hasher = RowHasher::new();
    for row in rows {
        hasher.update(row);
    }
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn row(key: i64, text: &str) -> Row {
        vec![Value::Int(key), Value::Text(text.into())]
    }

    #[test]
    fn test_equal_content_equal_hash() {
        let a = vec![row(2, "test"), row(4, "foo")];
        let b = vec![row(2, "test"), row(4, "foo")];
        assert_eq!(hash_rows(&a), hash_rows(&b));
    }

    #[test]
    fn test_hash_is_row_order_sensitive() {
        let a = vec![row(2, "test"), row(4, "foo")];
        let b = vec![row(4, "foo"), row(2, "test")];
        assert_ne!(hash_rows(&a), hash_rows(&b));
    }

    #[test]
    fn test_hash_distinguishes_row_boundaries() {
        // Same concatenated text, different row split.
        let a = vec![vec![Value::Text("ab".into())], vec![Value::Text("c".into())]];
        let b = vec![vec![Value::Text("a".into())], vec![Value::Text("bc".into())]];
        assert_ne!(hash_rows(&a), hash_rows(&b));
    }

    #[test]
    fn test_null_and_empty_string_differ() {
        let a = vec![vec![Value::Int(5), Value::Null]];
        let b = vec![vec![Value::Int(5), Value::Text(String::new())]];
        assert_ne!(hash_rows(&a), hash_rows(&b));
    }

    #[test]
    fn test_empty_range_hash_is_stable() {
        let empty: [Row; 0] = [];
        assert_eq!(hash_rows(&empty), hash_rows(&empty));
        assert_ne!(hash_rows(&empty), hash_rows(&[row(1, "x")]));
    }
}
