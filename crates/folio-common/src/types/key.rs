//! Ordered index keys.
//!
//! [`IndexKey`] is the value stored in every skip-list node. It carries a
//! total order across types so that any mix of keys can live in one index:
//!
//! ```text
//! MinValue < Null < Int64/Double < String < Binary < Boolean < MaxValue
//! ```
//!
//! `Int64` and `Double` compare numerically with each other. Strings compare
//! by their UTF-8 bytes. `MinValue` and `MaxValue` are reserved for the head
//! and tail sentinels of each index.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::constants::MAX_INDEX_KEY_LENGTH;
use crate::error::{FolioError, FolioResult};

const TYPE_MIN_VALUE: u8 = 0;
const TYPE_NULL: u8 = 1;
const TYPE_INT64: u8 = 2;
const TYPE_DOUBLE: u8 = 3;
const TYPE_STRING: u8 = 4;
const TYPE_BINARY: u8 = 5;
const TYPE_BOOLEAN: u8 = 6;
const TYPE_MAX_VALUE: u8 = 7;

/// An ordered index key.
#[derive(Clone, Serialize, Deserialize)]
pub enum IndexKey {
    /// Lower sentinel; sorts before everything.
    MinValue,
    /// Null value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Double(f64),
    /// UTF-8 string.
    String(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// Boolean.
    Boolean(bool),
    /// Upper sentinel; sorts after everything.
    MaxValue,
}

impl IndexKey {
    /// Returns true for the `MinValue`/`MaxValue` sentinels.
    #[must_use]
    pub const fn is_sentinel(&self) -> bool {
        matches!(self, Self::MinValue | Self::MaxValue)
    }

    /// Returns true for `Null`.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Rank of the key's type in the cross-type order.
    const fn type_rank(&self) -> u8 {
        match self {
            Self::MinValue => 0,
            Self::Null => 1,
            Self::Int64(_) | Self::Double(_) => 2,
            Self::String(_) => 3,
            Self::Binary(_) => 4,
            Self::Boolean(_) => 5,
            Self::MaxValue => 6,
        }
    }

    /// Number of bytes the encoded key occupies.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::MinValue | Self::Null | Self::MaxValue => 1,
            Self::Int64(_) | Self::Double(_) => 9,
            Self::Boolean(_) => 2,
            Self::String(s) => 2 + s.len(),
            Self::Binary(b) => 2 + b.len(),
        }
    }

    /// Checks that the key fits in an index node.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::IndexKeyTooLong`] when the encoded key exceeds
    /// [`MAX_INDEX_KEY_LENGTH`].
    pub fn validate_length(&self) -> FolioResult<()> {
        let size = self.encoded_len();
        if size > MAX_INDEX_KEY_LENGTH {
            return Err(FolioError::IndexKeyTooLong {
                size,
                max_size: MAX_INDEX_KEY_LENGTH,
            });
        }
        Ok(())
    }

    /// Encodes the key into `buf` and returns the number of bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::IndexKeyTooLong`] if the key does not fit the
    /// one-byte length prefix.
    ///
    /// # Panics
    ///
    /// Panics if `buf` is shorter than [`IndexKey::encoded_len`].
    pub fn encode(&self, buf: &mut [u8]) -> FolioResult<usize> {
        self.validate_length()?;
        let len = self.encoded_len();
        match self {
            Self::MinValue => buf[0] = TYPE_MIN_VALUE,
            Self::Null => buf[0] = TYPE_NULL,
            Self::MaxValue => buf[0] = TYPE_MAX_VALUE,
            Self::Int64(v) => {
                buf[0] = TYPE_INT64;
                buf[1..9].copy_from_slice(&v.to_le_bytes());
            }
            Self::Double(v) => {
                buf[0] = TYPE_DOUBLE;
                buf[1..9].copy_from_slice(&v.to_le_bytes());
            }
            Self::Boolean(v) => {
                buf[0] = TYPE_BOOLEAN;
                buf[1] = u8::from(*v);
            }
            Self::String(s) => {
                buf[0] = TYPE_STRING;
                buf[1] = s.len() as u8;
                buf[2..len].copy_from_slice(s.as_bytes());
            }
            Self::Binary(b) => {
                buf[0] = TYPE_BINARY;
                buf[1] = b.len() as u8;
                buf[2..len].copy_from_slice(b);
            }
        }
        Ok(len)
    }

    /// Decodes a key from the start of `buf`, returning it with its length.
    ///
    /// # Errors
    ///
    /// Returns [`FolioError::Corruption`] for an unknown type byte or a
    /// truncated buffer.
    pub fn decode(buf: &[u8]) -> FolioResult<(Self, usize)> {
        let truncated = || FolioError::corruption("index key is truncated");
        let type_byte = *buf.first().ok_or_else(truncated)?;

        let key = match type_byte {
            TYPE_MIN_VALUE => (Self::MinValue, 1),
            TYPE_NULL => (Self::Null, 1),
            TYPE_MAX_VALUE => (Self::MaxValue, 1),
            TYPE_INT64 => {
                let raw: [u8; 8] = buf.get(1..9).ok_or_else(truncated)?.try_into().map_err(|_| truncated())?;
                (Self::Int64(i64::from_le_bytes(raw)), 9)
            }
            TYPE_DOUBLE => {
                let raw: [u8; 8] = buf.get(1..9).ok_or_else(truncated)?.try_into().map_err(|_| truncated())?;
                (Self::Double(f64::from_le_bytes(raw)), 9)
            }
            TYPE_BOOLEAN => (Self::Boolean(*buf.get(1).ok_or_else(truncated)? != 0), 2),
            TYPE_STRING => {
                let len = *buf.get(1).ok_or_else(truncated)? as usize;
                let bytes = buf.get(2..2 + len).ok_or_else(truncated)?;
                let s = std::str::from_utf8(bytes)
                    .map_err(|_| FolioError::corruption("index key is not valid UTF-8"))?;
                (Self::String(s.to_string()), 2 + len)
            }
            TYPE_BINARY => {
                let len = *buf.get(1).ok_or_else(truncated)? as usize;
                let bytes = buf.get(2..2 + len).ok_or_else(truncated)?;
                (Self::Binary(bytes.to_vec()), 2 + len)
            }
            other => {
                return Err(FolioError::corruption(format!(
                    "unknown index key type {other}"
                )))
            }
        };
        Ok(key)
    }
}

/// Exact comparison of an integer with a double. Casting the integer to
/// `f64` rounds above 2^53, which would make distinct integers equal to
/// the same double.
fn compare_int_double(int: i64, double: f64) -> Ordering {
    // i64::MIN is exactly -2^63; 2^63 itself is out of range.
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

    if double.is_nan() {
        // Matches `total_cmp`: positive NaN above every number.
        return if double.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if double >= TWO_POW_63 {
        return Ordering::Less;
    }
    if double < -TWO_POW_63 {
        return Ordering::Greater;
    }

    let whole = double.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0f64.partial_cmp(&(double - whole)).unwrap_or(Ordering::Equal),
        unequal => unequal,
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank = self.type_rank().cmp(&other.type_rank());
        if rank != Ordering::Equal {
            return rank;
        }

        match (self, other) {
            (Self::Int64(a), Self::Int64(b)) => a.cmp(b),
            (Self::Double(a), Self::Double(b)) => a.total_cmp(b),
            (Self::Int64(a), Self::Double(b)) => compare_int_double(*a, *b),
            (Self::Double(a), Self::Int64(b)) => compare_int_double(*b, *a).reverse(),
            (Self::String(a), Self::String(b)) => a.as_bytes().cmp(b.as_bytes()),
            (Self::Binary(a), Self::Binary(b)) => a.cmp(b),
            (Self::Boolean(a), Self::Boolean(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl fmt::Debug for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinValue => write!(f, "MinValue"),
            Self::Null => write!(f, "Null"),
            Self::Int64(v) => write!(f, "Int64({v})"),
            Self::Double(v) => write!(f, "Double({v})"),
            Self::String(v) => write!(f, "String({v:?})"),
            Self::Binary(v) => write!(f, "Binary({} bytes)", v.len()),
            Self::Boolean(v) => write!(f, "Boolean({v})"),
            Self::MaxValue => write!(f, "MaxValue"),
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MinValue => write!(f, "MinValue"),
            Self::Null => write!(f, "null"),
            Self::Int64(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "\"{v}\""),
            Self::Binary(v) => {
                for b in v {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Self::Boolean(v) => write!(f, "{v}"),
            Self::MaxValue => write!(f, "MaxValue"),
        }
    }
}

impl From<i64> for IndexKey {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<i32> for IndexKey {
    fn from(v: i32) -> Self {
        Self::Int64(i64::from(v))
    }
}

impl From<f64> for IndexKey {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<bool> for IndexKey {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<&str> for IndexKey {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<Vec<u8>> for IndexKey {
    fn from(v: Vec<u8>) -> Self {
        Self::Binary(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cross_type_order() {
        let ordered = vec![
            IndexKey::MinValue,
            IndexKey::Null,
            IndexKey::Int64(-5),
            IndexKey::Double(2.5),
            IndexKey::Int64(3),
            IndexKey::from("abc"),
            IndexKey::from("abd"),
            IndexKey::Binary(vec![0, 1]),
            IndexKey::Boolean(false),
            IndexKey::Boolean(true),
            IndexKey::MaxValue,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0] < pair[1], "{:?} < {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_numeric_equality() {
        assert_eq!(IndexKey::Int64(10), IndexKey::Double(10.0));
        assert_ne!(IndexKey::Int64(10), IndexKey::from("10"));
    }

    #[test]
    fn test_large_int_against_double() {
        let two_pow_53 = 1i64 << 53;
        let double = IndexKey::Double(two_pow_53 as f64);

        assert_eq!(IndexKey::Int64(two_pow_53), double);
        assert!(IndexKey::Int64(two_pow_53 + 1) > double);
        assert!(double < IndexKey::Int64(two_pow_53 + 1));
        assert_ne!(IndexKey::Int64(two_pow_53 + 1), IndexKey::Int64(two_pow_53));

        assert!(IndexKey::Int64(i64::MAX) < IndexKey::Double(9_223_372_036_854_775_808.0));
        assert_eq!(IndexKey::Int64(i64::MIN), IndexKey::Double(-9_223_372_036_854_775_808.0));
        assert!(IndexKey::Int64(i64::MIN) > IndexKey::Double(f64::NEG_INFINITY));
        assert!(IndexKey::Int64(-2) > IndexKey::Double(-2.5));
        assert!(IndexKey::Int64(2) < IndexKey::Double(2.5));
        assert!(IndexKey::Int64(i64::MAX) < IndexKey::Double(f64::NAN));
    }

    #[test]
    fn test_encode_decode() {
        let keys = [
            IndexKey::MinValue,
            IndexKey::Int64(i64::MIN),
            IndexKey::Double(-0.5),
            IndexKey::from("hello"),
            IndexKey::Binary(vec![9, 8, 7]),
            IndexKey::Boolean(true),
            IndexKey::MaxValue,
        ];
        let mut buf = [0u8; 64];
        for key in keys {
            let written = key.encode(&mut buf).unwrap();
            assert_eq!(written, key.encoded_len());
            let (decoded, read) = IndexKey::decode(&buf).unwrap();
            assert_eq!(read, written);
            assert_eq!(decoded, key);
        }
    }

    #[test]
    fn test_key_too_long() {
        let key = IndexKey::String("x".repeat(300));
        let err = key.validate_length().unwrap_err();
        assert!(matches!(err, FolioError::IndexKeyTooLong { size: 302, .. }));
        assert!(IndexKey::String("x".repeat(253)).validate_length().is_ok());
    }

    #[test]
    fn test_decode_unknown_type() {
        assert!(IndexKey::decode(&[42]).is_err());
        assert!(IndexKey::decode(&[]).is_err());
        assert!(IndexKey::decode(&[TYPE_STRING, 10, b'a']).is_err());
    }
}
