//! Order-preserving key encoding.
//!
//! Emitted keys are encoded so that comparing the encoded bytes
//! lexicographically gives the same order as comparing the keys themselves:
//!
//! ```text
//! 0x01                      null
//! 0x02                      false
//! 0x03                      true
//! 0x04 | 8 bytes            number: IEEE-754 bits, sign-flipped, big-endian
//! 0x05 | utf-8 | 0x00 0x00  string, 0x00 escaped as 0x00 0xFF
//! 0x06 | elements | 0x00    array
//! ```
//!
//! Values of different types order as listed.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{IndexError, IndexResult};

const TAG_NULL: u8 = 0x01;
const TAG_FALSE: u8 = 0x02;
const TAG_TRUE: u8 = 0x03;
const TAG_NUMBER: u8 = 0x04;
const TAG_STRING: u8 = 0x05;
const TAG_ARRAY: u8 = 0x06;
const END: u8 = 0x00;
const ESCAPE: u8 = 0xFF;

/// A key a map function may emit.
#[derive(Clone, Debug, PartialEq)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<KeyValue>),
}

/// The byte form of a [`KeyValue`]. Orders the same way as the key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EncodedKey(#[serde(with = "hex")] Vec<u8>);

impl EncodedKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn decode(&self) -> IndexResult<KeyValue> {
        KeyValue::decode(&self.0)
    }
}

impl fmt::Debug for EncodedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedKey({})", hex::encode(&self.0))
    }
}

impl KeyValue {
    pub fn encode(&self) -> EncodedKey {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        EncodedKey(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            KeyValue::Null => out.push(TAG_NULL),
            KeyValue::Bool(false) => out.push(TAG_FALSE),
            KeyValue::Bool(true) => out.push(TAG_TRUE),
            KeyValue::Number(n) => {
                out.push(TAG_NUMBER);
                out.extend_from_slice(&order_bits(*n).to_be_bytes());
            }
            KeyValue::String(s) => {
                out.push(TAG_STRING);
                for &b in s.as_bytes() {
                    out.push(b);
                    if b == END {
                        out.push(ESCAPE);
                    }
                }
                out.extend_from_slice(&[END, END]);
            }
            KeyValue::Array(items) => {
                out.push(TAG_ARRAY);
                for item in items {
                    item.encode_into(out);
                }
                out.push(END);
            }
        }
    }

    /// Exact inverse of [`KeyValue::encode`].
    pub fn decode(bytes: &[u8]) -> IndexResult<Self> {
        let mut pos = 0;
        let value = decode_at(bytes, &mut pos)?;
        if pos != bytes.len() {
            return Err(IndexError::Key(format!(
                "{} trailing bytes after key",
                bytes.len() - pos
            )));
        }
        Ok(value)
    }

    /// Native JSON form. Integral numbers come back as integers.
    pub fn to_json(&self) -> Value {
        match self {
            KeyValue::Null => Value::Null,
            KeyValue::Bool(b) => Value::Bool(*b),
            KeyValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
                    Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(Value::Number)
                        .unwrap_or(Value::Null)
                }
            }
            KeyValue::String(s) => Value::String(s.clone()),
            KeyValue::Array(items) => Value::Array(items.iter().map(KeyValue::to_json).collect()),
        }
    }

    /// Logical order, consistent with the order of the encodings.
    pub fn logical_cmp(&self, other: &Self) -> Ordering {
        self.encode().cmp(&other.encode())
    }
}

/// Map f64 bits so that unsigned comparison matches numeric order.
fn order_bits(n: f64) -> u64 {
    let n = if n == 0.0 { 0.0 } else { n };
    let bits = n.to_bits();
    if bits >> 63 == 1 {
        !bits
    } else {
        bits ^ (1 << 63)
    }
}

fn from_order_bits(bits: u64) -> f64 {
    if bits >> 63 == 1 {
        f64::from_bits(bits ^ (1 << 63))
    } else {
        f64::from_bits(!bits)
    }
}

fn truncated(at: usize) -> IndexError {
    IndexError::Key(format!("truncated key at byte {at}"))
}

fn decode_at(bytes: &[u8], pos: &mut usize) -> IndexResult<KeyValue> {
    let tag = *bytes.get(*pos).ok_or_else(|| truncated(*pos))?;
    *pos += 1;
    match tag {
        TAG_NULL => Ok(KeyValue::Null),
        TAG_FALSE => Ok(KeyValue::Bool(false)),
        TAG_TRUE => Ok(KeyValue::Bool(true)),
        TAG_NUMBER => {
            let raw: [u8; 8] = bytes
                .get(*pos..*pos + 8)
                .and_then(|s| s.try_into().ok())
                .ok_or_else(|| truncated(*pos))?;
            *pos += 8;
            Ok(KeyValue::Number(from_order_bits(u64::from_be_bytes(raw))))
        }
        TAG_STRING => {
            let mut raw = Vec::new();
            loop {
                let b = *bytes.get(*pos).ok_or_else(|| truncated(*pos))?;
                *pos += 1;
                if b != END {
                    raw.push(b);
                    continue;
                }
                let next = *bytes.get(*pos).ok_or_else(|| truncated(*pos))?;
                *pos += 1;
                match next {
                    END => break,
                    ESCAPE => raw.push(END),
                    other => {
                        return Err(IndexError::Key(format!(
                            "bad string escape 0x{other:02x} at byte {}",
                            *pos - 1
                        )))
                    }
                }
            }
            String::from_utf8(raw)
                .map(KeyValue::String)
                .map_err(|e| IndexError::Key(e.to_string()))
        }
        TAG_ARRAY => {
            let mut items = Vec::new();
            loop {
                match bytes.get(*pos) {
                    None => return Err(truncated(*pos)),
                    Some(&END) => {
                        *pos += 1;
                        return Ok(KeyValue::Array(items));
                    }
                    Some(_) => items.push(decode_at(bytes, pos)?),
                }
            }
        }
        other => Err(IndexError::Key(format!(
            "unknown key tag 0x{other:02x} at byte {}",
            *pos - 1
        ))),
    }
}

impl TryFrom<&Value> for KeyValue {
    type Error = IndexError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        Ok(match value {
            Value::Null => KeyValue::Null,
            Value::Bool(b) => KeyValue::Bool(*b),
            Value::Number(n) => KeyValue::Number(
                n.as_f64()
                    .ok_or_else(|| IndexError::Key(format!("number {n} is not representable")))?,
            ),
            Value::String(s) => KeyValue::String(s.clone()),
            Value::Array(items) => KeyValue::Array(
                items
                    .iter()
                    .map(KeyValue::try_from)
                    .collect::<IndexResult<Vec<_>>>()?,
            ),
            Value::Object(_) => {
                return Err(IndexError::Key("objects cannot be used as keys".into()))
            }
        })
    }
}

impl From<bool> for KeyValue {
    fn from(b: bool) -> Self {
        KeyValue::Bool(b)
    }
}

impl From<f64> for KeyValue {
    fn from(n: f64) -> Self {
        KeyValue::Number(n)
    }
}

macro_rules! number_from {
    ($($t:ty),*) => {
        $(impl From<$t> for KeyValue {
            fn from(n: $t) -> Self {
                KeyValue::Number(n as f64)
            }
        })*
    };
}

number_from!(i32, i64, u32, u64, usize);

impl From<&str> for KeyValue {
    fn from(s: &str) -> Self {
        KeyValue::String(s.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(s: String) -> Self {
        KeyValue::String(s)
    }
}

impl<T: Into<KeyValue>> From<Vec<T>> for KeyValue {
    fn from(items: Vec<T>) -> Self {
        KeyValue::Array(items.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn array_key_roundtrip() {
        let key = KeyValue::Array(vec!["a".into(), 7.into()]);
        assert_eq!(key.encode().decode().unwrap(), key);
        assert_eq!(key.to_json(), json!(["a", 7]));
    }

    #[test]
    fn type_order() {
        let ordered = [
            KeyValue::Null,
            KeyValue::Bool(false),
            KeyValue::Bool(true),
            KeyValue::Number(-1.0),
            KeyValue::String(String::new()),
            KeyValue::Array(Vec::new()),
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].encode() < pair[1].encode(), "{:?} < {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn numbers_order_numerically() {
        let nums = [f64::NEG_INFINITY, -1e9, -2.5, -0.0, 0.0, 1e-9, 2.0, 3.0, 1e12, f64::INFINITY];
        for pair in nums.windows(2) {
            assert!(
                KeyValue::from(pair[0]).encode() <= KeyValue::from(pair[1]).encode(),
                "{} <= {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn negative_zero_encodes_as_zero() {
        assert_eq!(KeyValue::from(-0.0).encode(), KeyValue::from(0.0).encode());
    }

    #[test]
    fn prefix_strings_sort_first() {
        assert!(KeyValue::from("ab").encode() < KeyValue::from("abc").encode());
        assert!(KeyValue::from("a").encode() < KeyValue::from("a\u{0}").encode());
    }

    #[test]
    fn string_with_nul_roundtrips() {
        let key = KeyValue::from("a\u{0}b");
        assert_eq!(key.encode().decode().unwrap(), key);
    }

    #[test]
    fn shorter_array_sorts_first() {
        let short = KeyValue::from(vec![1, 2]);
        let long = KeyValue::from(vec![1, 2, 0]);
        assert!(short.encode() < long.encode());
    }

    #[test]
    fn integral_numbers_become_integers() {
        assert_eq!(KeyValue::from(2).to_json(), json!(2));
        assert_eq!(KeyValue::from(2.5).to_json(), json!(2.5));
    }

    #[test]
    fn object_is_not_a_key() {
        assert!(matches!(
            KeyValue::try_from(&json!({"a": 1})),
            Err(IndexError::Key(_))
        ));
    }

    #[test]
    fn from_json_value() {
        let key = KeyValue::try_from(&json!([null, true, "x", 1.5])).unwrap();
        assert_eq!(
            key,
            KeyValue::Array(vec![
                KeyValue::Null,
                KeyValue::Bool(true),
                KeyValue::from("x"),
                KeyValue::from(1.5)
            ])
        );
    }

    #[test]
    fn malformed_bytes_are_rejected() {
        assert!(KeyValue::decode(&[]).is_err());
        assert!(KeyValue::decode(&[0x09]).is_err());
        assert!(KeyValue::decode(&[TAG_NUMBER, 1, 2]).is_err());
        assert!(KeyValue::decode(&[TAG_STRING, b'a', 0x00, 0x05]).is_err());
        assert!(KeyValue::decode(&[TAG_NULL, TAG_NULL]).is_err());
    }

    #[test]
    fn encoded_key_serializes_as_hex() {
        let encoded = KeyValue::Null.encode();
        assert_eq!(serde_json::to_value(&encoded).unwrap(), json!("01"));
    }

    fn key_strategy() -> impl Strategy<Value = KeyValue> {
        let leaf = prop_oneof![
            Just(KeyValue::Null),
            any::<bool>().prop_map(KeyValue::Bool),
            (-1.0e12f64..1.0e12).prop_map(KeyValue::Number),
            "[a-z\\x00]{0,6}".prop_map(KeyValue::String),
        ];
        leaf.prop_recursive(2, 8, 4, |inner| {
            prop::collection::vec(inner, 0..4).prop_map(KeyValue::Array)
        })
    }

    fn logical(a: &KeyValue, b: &KeyValue) -> Ordering {
        fn rank(k: &KeyValue) -> u8 {
            match k {
                KeyValue::Null => 0,
                KeyValue::Bool(false) => 1,
                KeyValue::Bool(true) => 2,
                KeyValue::Number(_) => 3,
                KeyValue::String(_) => 4,
                KeyValue::Array(_) => 5,
            }
        }
        match (a, b) {
            (KeyValue::Number(x), KeyValue::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
            (KeyValue::String(x), KeyValue::String(y)) => x.as_bytes().cmp(y.as_bytes()),
            (KeyValue::Array(x), KeyValue::Array(y)) => {
                for (l, r) in x.iter().zip(y) {
                    let o = logical(l, r);
                    if o != Ordering::Equal {
                        return o;
                    }
                }
                x.len().cmp(&y.len())
            }
            _ => rank(a).cmp(&rank(b)),
        }
    }

    proptest! {
        #[test]
        fn roundtrip(key in key_strategy()) {
            prop_assert_eq!(key.encode().decode().unwrap(), key);
        }

        #[test]
        fn byte_order_matches_logical_order(a in key_strategy(), b in key_strategy()) {
            prop_assert_eq!(a.encode().cmp(&b.encode()), logical(&a, &b));
        }
    }
}
