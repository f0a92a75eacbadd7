//! The raw-socket handshake (spec §4.3).
//!
//! Each peer sends a 4-byte frame within the connection's first moments:
//! `[0x7F][length nibble | serializer nibble][0x00][0x00]`. A successful
//! reply echoes the same shape back; a failing reply instead carries a
//! nonzero error code in byte 1's high nibble (see the literal scenario
//! in `0x7F 0x20 0x00 0x00`, a `max_length_unacceptable` refusal), with
//! bytes 2 and 3 left zero either way.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, TransportErrorKind};

const MAGIC: u8 = 0x7F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serializer {
    Json,
    MsgPack,
    Cbor,
}

impl Serializer {
    fn to_nibble(self) -> u8 {
        match self {
            Serializer::Json => 1,
            Serializer::MsgPack => 2,
            Serializer::Cbor => 3,
        }
    }

    fn from_nibble(nibble: u8) -> Option<Serializer> {
        match nibble {
            1 => Some(Serializer::Json),
            2 => Some(Serializer::MsgPack),
            3 => Some(Serializer::Cbor),
            _ => None,
        }
    }
}

/// The two terms a handshake negotiates: the serializer and the maximum
/// frame length either side is willing to receive, expressed as the
/// `n` in `2^(9+n)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    pub max_length_exponent: u8,
    pub serializer: Serializer,
}

impl HandshakeConfig {
    pub fn new(max_length_exponent: u8, serializer: Serializer) -> HandshakeConfig {
        debug_assert!(max_length_exponent <= 15);
        HandshakeConfig {
            max_length_exponent,
            serializer,
        }
    }

    pub fn max_length(&self) -> usize {
        1usize << (9 + self.max_length_exponent as u32)
    }

    fn to_frame(self) -> [u8; 4] {
        [
            MAGIC,
            (self.max_length_exponent << 4) | self.serializer.to_nibble(),
            0,
            0,
        ]
    }
}

fn error_kind(code: u8) -> TransportErrorKind {
    match code {
        1 => TransportErrorKind::BadSerializer,
        2 => TransportErrorKind::BadLengthLimit,
        3 => TransportErrorKind::BadFeature,
        4 => TransportErrorKind::Saturated,
        _ => TransportErrorKind::BadHandshake,
    }
}

fn error_frame(code: u8) -> [u8; 4] {
    [MAGIC, code << 4, 0, 0]
}

/// Performs the client side: sends `request`, then reads and validates
/// the peer's reply. Returns the config the peer actually agreed to
/// (which may differ from `request` if the peer is more conservative).
pub async fn perform_client<S>(
    stream: &mut S,
    request: HandshakeConfig,
) -> Result<HandshakeConfig, Error>
where
    S: tokio::io::AsyncWrite + tokio::io::AsyncRead + Unpin,
{
    stream.write_all(&request.to_frame()).await?;
    stream.flush().await?;

    let mut reply = [0u8; 4];
    stream
        .read_exact(&mut reply)
        .await
        .map_err(|_| Error::transport(TransportErrorKind::BadHandshake))?;

    if reply[0] != MAGIC {
        return Err(Error::transport(TransportErrorKind::BadHandshake));
    }

    let high = reply[1] >> 4;
    let low = reply[1] & 0x0F;

    // bytes 2-3 are reserved and always zero, whether the reply
    // succeeded or failed; the error code (if any) rides in byte 1.
    if reply[2] != 0 || reply[3] != 0 {
        return Err(Error::transport(TransportErrorKind::BadFeature));
    }

    match Serializer::from_nibble(low) {
        Some(serializer) => Ok(HandshakeConfig::new(high, serializer)),
        None => {
            if high == 0 {
                Err(Error::transport(TransportErrorKind::BadHandshake))
            } else {
                Err(Error::transport(error_kind(high)))
            }
        }
    }
}

/// Performs the server side: reads the peer's request frame, asks
/// `accept` whether to take the requested serializer and length, and
/// writes the matching success or failure reply.
///
/// `accept` receives the peer's requested config and returns `Ok(cfg)`
/// with the config to actually use (letting the server clamp the
/// length down), or `Err(code)` with one of the handshake error codes
/// (1..4) to refuse the connection.
pub async fn perform_server<S, F>(stream: &mut S, accept: F) -> Result<HandshakeConfig, Error>
where
    S: tokio::io::AsyncWrite + tokio::io::AsyncRead + Unpin,
    F: FnOnce(HandshakeConfig) -> Result<HandshakeConfig, u8>,
{
    let mut request = [0u8; 4];
    stream
        .read_exact(&mut request)
        .await
        .map_err(|_| Error::transport(TransportErrorKind::BadHandshake))?;

    if request[0] != MAGIC || request[2] != 0 || request[3] != 0 {
        return Err(Error::transport(TransportErrorKind::BadHandshake));
    }

    let high = request[1] >> 4;
    let low = request[1] & 0x0F;

    let requested = match Serializer::from_nibble(low) {
        Some(serializer) => HandshakeConfig::new(high, serializer),
        None => {
            stream.write_all(&error_frame(1)).await?;
            return Err(Error::transport(TransportErrorKind::BadSerializer));
        }
    };

    match accept(requested) {
        Ok(agreed) => {
            stream.write_all(&agreed.to_frame()).await?;
            Ok(agreed)
        }
        Err(code) => {
            stream.write_all(&error_frame(code)).await?;
            Err(Error::transport(error_kind(code)))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn client_and_server_agree_on_json() {
        let (mut client_io, mut server_io) = duplex(64);
        let request = HandshakeConfig::new(4, Serializer::Json);

        let server = tokio::spawn(async move {
            perform_server(&mut server_io, |requested| Ok(requested)).await
        });
        let client_result = perform_client(&mut client_io, request).await.unwrap();
        let server_result = server.await.unwrap().unwrap();

        assert_eq!(client_result, request);
        assert_eq!(server_result, request);
    }

    #[tokio::test]
    async fn server_can_reject_with_length_unacceptable() {
        let (mut client_io, mut server_io) = duplex(64);
        let request = HandshakeConfig::new(10, Serializer::MsgPack);

        let server = tokio::spawn(async move {
            perform_server(&mut server_io, |_| Err(2u8)).await
        });
        let client_result = perform_client(&mut client_io, request).await;
        let server_result = server.await.unwrap();

        assert!(matches!(
            client_result.unwrap_err().kind(),
            crate::error::ErrorKind::Transport(TransportErrorKind::BadLengthLimit)
        ));
        assert!(server_result.is_err());
    }

    #[tokio::test]
    async fn literal_length_unacceptable_reply_is_recognized() {
        let (mut client_io, mut server_io) = duplex(64);
        let request = HandshakeConfig::new(15, Serializer::Json);

        tokio::spawn(async move {
            let mut buf = [0u8; 4];
            use tokio::io::AsyncReadExt;
            let _ = server_io.read_exact(&mut buf).await;
            use tokio::io::AsyncWriteExt;
            let _ = server_io.write_all(&[0x7F, 0x20, 0x00, 0x00]).await;
        });

        let result = perform_client(&mut client_io, request).await;
        assert!(matches!(
            result.unwrap_err().kind(),
            crate::error::ErrorKind::Transport(TransportErrorKind::BadLengthLimit)
        ));
    }

    #[tokio::test]
    async fn garbage_magic_byte_is_bad_handshake() {
        let (mut client_io, mut server_io) = duplex(64);
        let request = HandshakeConfig::new(4, Serializer::Json);

        tokio::spawn(async move {
            let mut buf = [0u8; 4];
            use tokio::io::AsyncReadExt;
            let _ = server_io.read_exact(&mut buf).await;
            use tokio::io::AsyncWriteExt;
            let _ = server_io.write_all(&[0x00, 0x00, 0x00, 0x00]).await;
        });

        let result = perform_client(&mut client_io, request).await;
        assert!(matches!(
            result.unwrap_err().kind(),
            crate::error::ErrorKind::Transport(TransportErrorKind::BadHandshake)
        ));
    }
}
