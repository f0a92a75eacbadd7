//! The WAMP payload value: a small tagged union shared by every codec,
//! message field, and the conversion layer.
//!
//! This supersedes the teacher's `messages::types::value::Value`, which
//! had no `Bytes` variant and used a plain (unordered) `HashMap` for
//! dictionaries. `Dict` here is order-preserving (`indexmap::IndexMap`)
//! because the wire codecs must round-trip key order.

use std::cmp::Ordering;
use std::fmt;

use indexmap::IndexMap;
use itertools::Itertools;
use serde::Serialize as _;

pub mod cbor;
pub mod convert;
pub mod json;
pub mod msgpack;

pub use convert::{FromValue, ToValue};

use crate::error::{DecodingErrorKind, Error};

/// Depth past which a decoder refuses to recurse further (`decoding::max_nesting_depth_exceeded`).
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 64;

pub type List = Vec<Value>;
pub type Dict = IndexMap<String, Value>;

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(List),
    Dict(Dict),
}

/// Options shared by the JSON/MsgPack/CBOR codecs.
#[derive(Debug, Clone)]
pub struct CodecOptions {
    pub max_nesting_depth: usize,
    /// CBOR-only: pack repeated map keys into a string table.
    pub pack_strings: bool,
    pub float_format: FloatFormat,
    pub precision: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatFormat {
    Shortest,
    Fixed,
}

impl Default for CodecOptions {
    fn default() -> CodecOptions {
        CodecOptions {
            max_nesting_depth: DEFAULT_MAX_NESTING_DEPTH,
            pack_strings: false,
            float_format: FloatFormat::Shortest,
            precision: 17,
        }
    }
}

impl CodecOptions {
    pub fn new() -> CodecOptions {
        CodecOptions::default()
    }

    pub fn with_max_nesting_depth(mut self, depth: usize) -> CodecOptions {
        self.max_nesting_depth = depth;
        self
    }

    pub fn with_pack_strings(mut self, pack: bool) -> CodecOptions {
        self.pack_strings = pack;
        self
    }

    pub fn with_float_format(mut self, format: FloatFormat, precision: usize) -> CodecOptions {
        self.float_format = format;
        self.precision = precision;
        self
    }
}

fn numeric_eq(a: &Value, b: &Value) -> Option<bool> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Some(x == y),
        (Value::UInt(x), Value::UInt(y)) => Some(x == y),
        (Value::Float(x), Value::Float(y)) => Some(x == y),
        (Value::Int(x), Value::UInt(y)) | (Value::UInt(y), Value::Int(x)) => {
            Some(*x >= 0 && *x as u64 == *y)
        }
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => {
            Some((*x as f64) == *y && (*y as i64) == *x)
        }
        (Value::UInt(x), Value::Float(y)) | (Value::Float(y), Value::UInt(x)) => {
            Some((*x as f64) == *y && (*y as u64) == *x)
        }
        _ => None,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        if let Some(eq) = numeric_eq(self, other) {
            return eq;
        }
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Dict(a), Value::Dict(b)) => a == b,
            _ => false,
        }
    }
}

fn rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Int(_) | Value::UInt(_) | Value::Float(_) => 2,
        Value::String(_) => 3,
        Value::Bytes(_) => 4,
        Value::List(_) => 5,
        Value::Dict(_) => 6,
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::UInt(u) => Some(*u as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let (ra, rb) = (rank(self), rank(other));
        if ra != rb {
            return Some(ra.cmp(&rb));
        }
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (a, b) if ra == 2 => as_f64(a).and_then(|x| as_f64(b).and_then(|y| x.partial_cmp(&y))),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::List(a), Value::List(b)) => a.partial_cmp(b),
            (Value::Dict(a), Value::Dict(b)) => {
                let mut a_sorted: Vec<_> = a.iter().collect();
                let mut b_sorted: Vec<_> = b.iter().collect();
                a_sorted.sort_by(|x, y| x.0.cmp(y.0));
                b_sorted.sort_by(|x, y| x.0.cmp(y.0));
                for (x, y) in a_sorted.iter().zip(b_sorted.iter()) {
                    match x.0.cmp(y.0) {
                        Ordering::Equal => match x.1.partial_cmp(y.1) {
                            Some(Ordering::Equal) => continue,
                            other => return other,
                        },
                        other => return Some(other),
                    }
                }
                Some(a_sorted.len().cmp(&b_sorted.len()))
            }
            _ => None,
        }
    }
}

impl Value {
    /// Depth of the deepest nested container, a leaf being depth 1.
    pub fn depth(&self) -> usize {
        match self {
            Value::List(l) => 1 + l.iter().map(Value::depth).max().unwrap_or(0),
            Value::Dict(d) => 1 + d.values().map(Value::depth).max().unwrap_or(0),
            _ => 1,
        }
    }

    pub fn check_nesting_depth(&self, max: usize) -> Result<(), Error> {
        if self.depth() > max {
            Err(Error::decoding(DecodingErrorKind::MaxNestingDepthExceeded))
        } else {
            Ok(())
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// A short, human-readable preview, used in error messages.
    pub fn summarize(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::UInt(u) => u.to_string(),
            Value::Float(f) => f.to_string(),
            Value::String(s) => {
                if s.len() > 50 {
                    s[..50].to_string()
                } else {
                    s.clone()
                }
            }
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
            Value::List(l) => {
                format!("[{}]", l.iter().take(50).map(Value::summarize).join(","))
            }
            Value::Dict(d) => format!(
                "{{{}}}",
                d.iter()
                    .take(50)
                    .map(|(k, v)| format!("{}:{}", k, v.summarize()))
                    .join(",")
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summarize())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Value {
        Value::Int(i)
    }
}

impl From<u64> for Value {
    fn from(u: u64) -> Value {
        Value::UInt(u)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Value {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Value {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::String(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Value {
        Value::Bytes(b)
    }
}

impl From<List> for Value {
    fn from(l: List) -> Value {
        Value::List(l)
    }
}

impl From<Dict> for Value {
    fn from(d: Dict) -> Value {
        Value::Dict(d)
    }
}

pub trait ArgList {
    fn get_int(&self, index: usize) -> Option<i64>;
    fn get_string(&self, index: usize) -> Option<&str>;
    fn verify_len(&self, expected_len: usize) -> bool;
}

pub trait ArgDict {
    fn get_int(&self, key: &str) -> Option<i64>;
    fn get_string<'a>(&'a self, key: &str) -> Option<&'a str>;
}

impl ArgList for List {
    fn get_int(&self, index: usize) -> Option<i64> {
        match self.get(index) {
            Some(Value::Int(i)) => Some(*i),
            Some(Value::UInt(u)) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    fn get_string(&self, index: usize) -> Option<&str> {
        match self.get(index) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    fn verify_len(&self, expected_len: usize) -> bool {
        self.len() >= expected_len
    }
}

impl ArgDict for Dict {
    fn get_int(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(Value::Int(i)) => Some(*i),
            Some(Value::UInt(u)) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    fn get_string<'a>(&'a self, key: &str) -> Option<&'a str> {
        match self.get(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }
}

/// Generic `serde` representation of a [`Value`], used by the MsgPack
/// and CBOR codecs (both have native `bin`/bytes types, so neither needs
/// JSON's base64-sentinel convention — see [`json`]).
impl serde::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeMap;

        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::UInt(u) => serializer.serialize_u64(*u),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Bytes(b) => serializer.serialize_bytes(b),
            Value::List(l) => l.serialize(serializer),
            Value::Dict(d) => {
                let mut map = serializer.serialize_map(Some(d.len()))?;
                for (k, v) in d {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Value, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

impl<'de> serde::de::Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("a WAMP payload value")
    }

    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Int(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
        Ok(Value::UInt(v))
    }

    fn visit_f64<E>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Float(v))
    }

    fn visit_str<E>(self, v: &str) -> Result<Value, E>
    where
        E: serde::de::Error,
    {
        Ok(Value::String(v.to_string()))
    }

    fn visit_string<E>(self, v: String) -> Result<Value, E> {
        Ok(Value::String(v))
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Value, E> {
        Ok(Value::Bytes(v.to_vec()))
    }

    fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Value, E> {
        Ok(Value::Bytes(v))
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Value, A::Error>
    where
        A: serde::de::SeqAccess<'de>,
    {
        let mut values = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(value) = seq.next_element()? {
            values.push(value);
        }
        Ok(Value::List(values))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Value, A::Error>
    where
        A: serde::de::MapAccess<'de>,
    {
        let mut dict = Dict::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry()? {
            dict.insert(key, value);
        }
        Ok(Value::Dict(dict))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn numeric_cross_type_equality() {
        assert_eq!(Value::Int(0), Value::UInt(0));
        assert_eq!(Value::Int(0), Value::Float(0.0));
        assert_eq!(Value::UInt(42), Value::Float(42.0));
        assert_ne!(Value::Int(-1), Value::UInt(0));
    }

    #[test]
    fn total_ordering_by_kind() {
        assert!(Value::Null < Value::Bool(false));
        assert!(Value::Bool(true) < Value::Int(0));
        assert!(Value::Int(1_000_000) < Value::String("".to_string()));
        assert!(Value::String("z".to_string()) < Value::Bytes(vec![]));
        assert!(Value::Bytes(vec![1]) < Value::List(vec![]));
        assert!(Value::List(vec![]) < Value::Dict(Dict::new()));
    }

    #[test]
    fn depth_counts_leaves_as_one() {
        assert_eq!(Value::Null.depth(), 1);
        assert_eq!(Value::List(vec![Value::Null]).depth(), 2);
        let nested = Value::List(vec![Value::List(vec![Value::Null])]);
        assert_eq!(nested.depth(), 3);
    }
}
