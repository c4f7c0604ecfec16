//! Deterministic digests of nested, basic-typed values.
//!
//! Cache keys must survive process restarts, so nothing here may touch
//! `std::hash::Hash` (whose `DefaultHasher` is randomly seeded).  Instead a
//! [`Value`] is encoded into a tagged byte stream and fed through SHA-256.
//!
//! Unordered collections are encoded by sorting the encodings of their
//! elements, so structurally equal sets and maps always produce the same
//! digest regardless of insertion order.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};

const TAG_STR: u8 = 0x00;
const TAG_TRUE: u8 = 0x01;
const TAG_FALSE: u8 = 0x02;
const TAG_INT_POS: u8 = 0x03;
const TAG_INT_NEG: u8 = 0x04;
const TAG_FLOAT: u8 = 0x05;
const TAG_NULL: u8 = 0x06;
const TAG_BYTES: u8 = 0x07;
const TAG_MAP: u8 = 0x08;
const TAG_SET: u8 = 0x09;
const TAG_LIST: u8 = 0x0a;
const TAG_ELEMENT: u8 = 0x0b;

/// A value that can be checksummed.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i128),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    /// Ordered sequence.
    List(Vec<Value>),
    /// Unordered collection; duplicates collapse.
    Set(Vec<Value>),
    /// Unordered mapping.
    Map(Vec<(Value, Value)>),
}

impl Default for Value {
    fn default() -> Self {
        Value::Null
    }
}

impl Value {
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(data.into())
    }

    pub fn set<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::Set(items.into_iter().map(Into::into).collect())
    }

    pub fn map<K: Into<Value>, V: Into<Value>>(items: impl IntoIterator<Item = (K, V)>) -> Self {
        Value::Map(
            items
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Appends the tagged encoding of this value to `out`.
    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Value::Str(s) => {
                out.push(TAG_STR);
                write_len(out, s.len());
                out.extend_from_slice(s.as_bytes());
            }
            Value::Bool(true) => out.push(TAG_TRUE),
            Value::Bool(false) => out.push(TAG_FALSE),
            Value::Int(i) => {
                out.push(if *i >= 0 { TAG_INT_POS } else { TAG_INT_NEG });
                // Digit count, then little-endian base-256 digits of the
                // magnitude, at least one.
                let digits = i.unsigned_abs().to_le_bytes();
                let len = digits.iter().rposition(|&d| d != 0).map_or(1, |last| last + 1);
                write_len(out, len);
                out.extend_from_slice(&digits[..len]);
            }
            Value::Float(f) => {
                out.push(TAG_FLOAT);
                out.extend_from_slice(&f.to_le_bytes());
            }
            Value::Null => out.push(TAG_NULL),
            Value::Bytes(b) => {
                out.push(TAG_BYTES);
                write_len(out, b.len());
                out.extend_from_slice(b);
            }
            Value::Map(entries) => {
                let mut encoded: Vec<(Vec<u8>, Vec<u8>)> = entries
                    .iter()
                    .map(|(k, v)| (k.to_bytes(), v.to_bytes()))
                    .collect();
                encoded.sort();
                encoded.dedup_by(|a, b| a.0 == b.0);
                out.push(TAG_MAP);
                write_len(out, encoded.len());
                for (k, v) in encoded {
                    out.push(TAG_ELEMENT);
                    out.extend_from_slice(&k);
                    out.extend_from_slice(&v);
                }
            }
            Value::Set(items) => {
                let mut encoded: Vec<Vec<u8>> = items.iter().map(Value::to_bytes).collect();
                encoded.sort();
                encoded.dedup();
                out.push(TAG_SET);
                write_len(out, encoded.len());
                for item in encoded {
                    out.push(TAG_ELEMENT);
                    out.extend_from_slice(&item);
                }
            }
            Value::List(items) => {
                out.push(TAG_LIST);
                write_len(out, items.len());
                for item in items {
                    out.push(TAG_ELEMENT);
                    item.encode(out);
                }
            }
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode(&mut out);
        out
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    out.extend_from_slice(&(len as u64).to_le_bytes());
}

macro_rules! value_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(i: $t) -> Self {
                Value::Int(i as i128)
            }
        })*
    };
}
value_from_int!(i8, i16, i32, i64, i128, u8, u16, u32, u64, usize, isize);

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::Str(s.clone())
    }
}

impl From<&Path> for Value {
    fn from(p: &Path) -> Self {
        Value::Str(p.to_string_lossy().into_owned())
    }
}

impl From<&PathBuf> for Value {
    fn from(p: &PathBuf) -> Self {
        Value::from(p.as_path())
    }
}

impl From<PathBuf> for Value {
    fn from(p: PathBuf) -> Self {
        Value::from(p.as_path())
    }
}

impl From<Hash> for Value {
    fn from(h: Hash) -> Self {
        Value::Bytes(h.0.to_vec())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(o: Option<T>) -> Self {
        match o {
            None => Value::Null,
            Some(v) => v.into(),
        }
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<BTreeSet<T>> for Value {
    fn from(s: BTreeSet<T>) -> Self {
        Value::set(s)
    }
}

impl<T: Into<Value>, S> From<HashSet<T, S>> for Value {
    fn from(s: HashSet<T, S>) -> Self {
        Value::set(s)
    }
}

impl<K: Into<Value>, V: Into<Value>> From<BTreeMap<K, V>> for Value {
    fn from(m: BTreeMap<K, V>) -> Self {
        Value::map(m)
    }
}

impl<K: Into<Value>, V: Into<Value>, S> From<HashMap<K, V, S>> for Value {
    fn from(m: HashMap<K, V, S>) -> Self {
        Value::map(m)
    }
}

/// A fixed-size digest, rendered as lowercase hex.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash(pub [u8; 32]);

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash({})", self)
    }
}

impl std::str::FromStr for Hash {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        if s.len() != 64 || !s.is_ascii() {
            anyhow::bail!("bad digest {:?}", s);
        }
        let mut out = [0u8; 32];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|err| anyhow::anyhow!("bad digest {:?}: {}", s, err))?;
        }
        Ok(Hash(out))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Computes the SHA-256 digest of a value's tagged encoding.
pub fn checksum(value: &Value) -> Hash {
    let digest = Sha256::digest(value.to_bytes());
    Hash(digest.into())
}
