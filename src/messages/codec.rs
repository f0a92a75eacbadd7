//! Wire encode/decode of a [`Message`], keyed by the serializer the
//! transport handshake agreed on.
//!
//! MsgPack needs the same trick the hand-written message tests use:
//! `Message`'s own derive-free `Serialize` impl is already positional,
//! but the `Options`/`Details` structs it carries are plain `#[derive]`
//! structs, and `rmp_serde` serializes those as arrays unless told
//! otherwise. [`StructMapWriter`] forces them to maps instead, matching
//! how every other WAMP peer expects an Options dict to look on the
//! wire.

use rmp_serde::Serializer as RmpSerializer;
use serde::Serialize;

use crate::error::Error;
use crate::transport::Serializer as WireSerializer;
use crate::utils::StructMapWriter;

use super::Message;

pub fn encode(message: &Message, serializer: WireSerializer) -> Result<Vec<u8>, Error> {
    match serializer {
        WireSerializer::Json => serde_json::to_vec(message).map_err(Error::from),
        WireSerializer::MsgPack => {
            let mut buf = Vec::new();
            message
                .serialize(&mut RmpSerializer::with(&mut buf, StructMapWriter))
                .map_err(Error::from)?;
            Ok(buf)
        }
        WireSerializer::Cbor => serde_cbor::to_vec(message).map_err(Error::from),
    }
}

pub fn decode(input: &[u8], serializer: WireSerializer) -> Result<Message, Error> {
    match serializer {
        WireSerializer::Json => serde_json::from_slice(input).map_err(Error::from),
        WireSerializer::MsgPack => rmp_serde::from_slice(input).map_err(Error::from),
        WireSerializer::Cbor => serde_cbor::from_slice(input).map_err(Error::from),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::messages::{ClientRoles, HelloDetails};
    use crate::uri::URI;

    fn sample() -> Message {
        Message::Hello(
            URI::new("ca.dal.wamp.test"),
            HelloDetails::new(ClientRoles::new()),
        )
    }

    #[test]
    fn json_round_trips() {
        let encoded = encode(&sample(), WireSerializer::Json).unwrap();
        let decoded = decode(&encoded, WireSerializer::Json).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn msgpack_round_trips() {
        let encoded = encode(&sample(), WireSerializer::MsgPack).unwrap();
        let decoded = decode(&encoded, WireSerializer::MsgPack).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn cbor_round_trips() {
        let encoded = encode(&sample(), WireSerializer::Cbor).unwrap();
        let decoded = decode(&encoded, WireSerializer::Cbor).unwrap();
        assert_eq!(decoded, sample());
    }
}
