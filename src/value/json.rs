//! JSON encoding of [`Value`], including the `bytes` convention: a
//! `bytes` value is carried as a base64 string prefixed with the
//! sentinel codepoint `U+0000`, which cannot appear in a legal WAMP
//! string argument.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::DecodeError;
use base64::Engine;

use crate::error::{DecodingErrorKind, Error};

use super::{CodecOptions, Dict, Value};

const BYTES_SENTINEL: char = '\u{0000}';

pub fn encode(value: &Value, options: &CodecOptions) -> Result<Vec<u8>, Error> {
    value.check_nesting_depth(options.max_nesting_depth)?;
    serde_json::to_vec(&to_json(value)).map_err(Error::from)
}

pub fn decode(input: &[u8], options: &CodecOptions) -> Result<Value, Error> {
    if input.is_empty() {
        return Err(Error::decoding(DecodingErrorKind::EmptyInput));
    }
    let json: serde_json::Value = serde_json::from_slice(input)?;
    let value = from_json(&json)?;
    value.check_nesting_depth(options.max_nesting_depth)?;
    Ok(value)
}

fn to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::UInt(u) => serde_json::Value::from(*u),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Bytes(b) => {
            let mut encoded = String::with_capacity(b.len() * 4 / 3 + 5);
            encoded.push(BYTES_SENTINEL);
            encoded.push_str(&BASE64.encode(b));
            serde_json::Value::String(encoded)
        }
        Value::List(l) => serde_json::Value::Array(l.iter().map(to_json).collect()),
        Value::Dict(d) => {
            serde_json::Value::Object(d.iter().map(|(k, v)| (k.clone(), to_json(v))).collect())
        }
    }
}

fn from_json(json: &serde_json::Value) -> Result<Value, Error> {
    Ok(match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else if let Some(u) = n.as_u64() {
                Value::UInt(u)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                return Err(Error::decoding(DecodingErrorKind::Failed));
            }
        }
        serde_json::Value::String(s) => match s.strip_prefix(BYTES_SENTINEL) {
            Some(rest) => decode_bytes(rest)?,
            None => Value::String(s.clone()),
        },
        serde_json::Value::Array(a) => {
            let mut list = Vec::with_capacity(a.len());
            for element in a {
                list.push(from_json(element)?);
            }
            Value::List(list)
        }
        serde_json::Value::Object(o) => {
            let mut dict = Dict::with_capacity(o.len());
            for (k, v) in o {
                dict.insert(k.clone(), from_json(v)?);
            }
            Value::Dict(dict)
        }
    })
}

fn decode_bytes(encoded: &str) -> Result<Value, Error> {
    match BASE64.decode(encoded) {
        Ok(bytes) => Ok(Value::Bytes(bytes)),
        Err(DecodeError::InvalidByte(_, _)) => {
            Err(Error::decoding(DecodingErrorKind::BadBase64Char))
        }
        Err(DecodeError::InvalidLength(_)) => {
            Err(Error::decoding(DecodingErrorKind::BadBase64Length))
        }
        Err(DecodeError::InvalidLastSymbol(_, _)) | Err(DecodeError::InvalidPadding) => {
            Err(Error::decoding(DecodingErrorKind::BadBase64Padding))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn roundtrip(value: Value) {
        let options = CodecOptions::new();
        let encoded = encode(&value, &options).unwrap();
        let decoded = decode(&encoded, &options).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn roundtrips_scalars() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Int(-42));
        roundtrip(Value::Float(3.14));
        roundtrip(Value::String("hi".to_string()));
    }

    #[test]
    fn roundtrips_bytes_via_base64_sentinel() {
        roundtrip(Value::Bytes(vec![0x42]));
        roundtrip(Value::Bytes(vec![]));
    }

    #[test]
    fn roundtrips_scenario_s1() {
        let mut obj = Dict::new();
        obj.insert("o".to_string(), Value::Int(321));
        let value = Value::List(vec![
            Value::Null,
            Value::Bool(false),
            Value::Bool(true),
            Value::Int(42),
            Value::Int(-42),
            Value::Float(3.14),
            Value::String("hi".to_string()),
            Value::Bytes(vec![0x42]),
            Value::List(vec![Value::String("a".to_string()), Value::Int(123)]),
            Value::Dict(obj),
        ]);
        roundtrip(value);
    }

    #[test]
    fn empty_input_is_an_error() {
        let err = decode(&[], &CodecOptions::new()).unwrap_err();
        matches!(err.kind(), crate::error::ErrorKind::Decoding(_));
    }

    #[test]
    fn bad_base64_character_is_reported() {
        let mut s = String::new();
        s.push(BYTES_SENTINEL);
        s.push_str("not valid base64!!");
        let json = serde_json::Value::String(s);
        let bytes = serde_json::to_vec(&json).unwrap();
        assert!(decode(&bytes, &CodecOptions::new()).is_err());
    }
}
