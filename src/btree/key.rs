//! Key capability for the B+ tree: keys are fixed-width byte strings and
//! ordering is delegated to a comparator over those bytes.

use std::cmp::Ordering;

use super::error::{BTreeError, BTreeResult};

/// Three-way comparison over serialized keys
pub trait KeyComparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

impl<F> KeyComparator for F
where
    F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self(a, b)
    }
}

/// Lexicographic byte order
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl KeyComparator for BytewiseComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Signed little-endian integer stored in the first `width` bytes of the key
#[derive(Debug, Clone, Copy)]
pub struct IntegerComparator {
    width: usize,
}

impl IntegerComparator {
    pub fn i32() -> Self {
        Self { width: 4 }
    }

    pub fn i64() -> Self {
        Self { width: 8 }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Keys shorter than the width are read as if zero padded
    fn decode(&self, key: &[u8]) -> i64 {
        let len = key.len().min(self.width);
        match self.width {
            4 => {
                let mut bytes = [0u8; 4];
                bytes[..len].copy_from_slice(&key[..len]);
                i32::from_le_bytes(bytes) as i64
            }
            _ => {
                let mut bytes = [0u8; 8];
                bytes[..len].copy_from_slice(&key[..len]);
                i64::from_le_bytes(bytes)
            }
        }
    }
}

impl KeyComparator for IntegerComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.decode(a).cmp(&self.decode(b))
    }
}

/// A serialized key of a fixed width
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenericKey {
    bytes: Vec<u8>,
}

impl GenericKey {
    /// Little-endian i64 followed by zero padding
    pub fn from_i64(value: i64, key_size: usize) -> BTreeResult<Self> {
        Self::from_bytes(&value.to_le_bytes(), key_size)
    }

    /// Little-endian i32 followed by zero padding
    pub fn from_i32(value: i32, key_size: usize) -> BTreeResult<Self> {
        Self::from_bytes(&value.to_le_bytes(), key_size)
    }

    /// Copy `bytes` into a zero-padded key of `key_size` bytes
    pub fn from_bytes(bytes: &[u8], key_size: usize) -> BTreeResult<Self> {
        if bytes.len() > key_size {
            return Err(BTreeError::KeySize {
                expected: key_size,
                actual: bytes.len(),
            });
        }

        let mut padded = vec![0u8; key_size];
        padded[..bytes.len()].copy_from_slice(bytes);
        Ok(Self { bytes: padded })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Read back the i64 prefix of a key built by `from_i64`
    pub fn to_i64(key: &[u8]) -> Option<i64> {
        let prefix: [u8; 8] = key.get(..8)?.try_into().ok()?;
        Some(i64::from_le_bytes(prefix))
    }
}

impl AsRef<[u8]> for GenericKey {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}
