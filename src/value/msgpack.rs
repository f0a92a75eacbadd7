//! MsgPack encoding of [`Value`]. Unlike JSON, MsgPack has a native
//! binary type, so `Bytes` round-trips directly through
//! `rmp_serde`'s `bin` support with no base64 convention needed.

use crate::error::{DecodingErrorKind, Error};

use super::{CodecOptions, Value};

pub fn encode(value: &Value, options: &CodecOptions) -> Result<Vec<u8>, Error> {
    value.check_nesting_depth(options.max_nesting_depth)?;
    rmp_serde::to_vec(value).map_err(Error::from)
}

pub fn decode(input: &[u8], options: &CodecOptions) -> Result<Value, Error> {
    if input.is_empty() {
        return Err(Error::decoding(DecodingErrorKind::EmptyInput));
    }
    let value: Value = rmp_serde::from_slice(input).map_err(Error::from)?;
    value.check_nesting_depth(options.max_nesting_depth)?;
    Ok(value)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::Dict;

    fn roundtrip(value: Value) {
        let options = CodecOptions::new();
        let encoded = encode(&value, &options).unwrap();
        let decoded = decode(&encoded, &options).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn roundtrips_scalars_and_bytes() {
        roundtrip(Value::Null);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Int(-42));
        roundtrip(Value::UInt(u64::MAX));
        roundtrip(Value::Bytes(vec![0x42, 0x00, 0xff]));
    }

    #[test]
    fn roundtrips_nested_containers() {
        let mut dict = Dict::new();
        dict.insert("a".to_string(), Value::Int(1));
        dict.insert("b".to_string(), Value::List(vec![Value::Bool(false)]));
        roundtrip(Value::Dict(dict));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(decode(&[], &CodecOptions::new()).is_err());
    }
}
