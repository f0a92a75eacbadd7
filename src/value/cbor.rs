//! CBOR encoding of [`Value`]. Like MsgPack, CBOR has a native byte
//! string major type, so `Bytes` needs no base64 convention.

use crate::error::{DecodingErrorKind, Error};

use super::{CodecOptions, Value};

pub fn encode(value: &Value, options: &CodecOptions) -> Result<Vec<u8>, Error> {
    value.check_nesting_depth(options.max_nesting_depth)?;
    serde_cbor::to_vec(value).map_err(Error::from)
}

pub fn decode(input: &[u8], options: &CodecOptions) -> Result<Value, Error> {
    if input.is_empty() {
        return Err(Error::decoding(DecodingErrorKind::EmptyInput));
    }
    let value: Value = serde_cbor::from_slice(input).map_err(Error::from)?;
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
        roundtrip(Value::Bool(false));
        roundtrip(Value::Float(3.14));
        roundtrip(Value::Bytes(vec![]));
        roundtrip(Value::Bytes(vec![1, 2, 3]));
    }

    #[test]
    fn roundtrips_nested_containers() {
        let mut dict = Dict::new();
        dict.insert("x".to_string(), Value::String("y".to_string()));
        roundtrip(Value::List(vec![Value::Dict(dict), Value::Int(7)]));
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(decode(&[], &CodecOptions::new()).is_err());
    }
}
