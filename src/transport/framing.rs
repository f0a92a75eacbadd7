//! Length-prefixed framing (spec §4.3), used for every message after the
//! handshake completes: `[1 byte kind][3 bytes big-endian length][payload]`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::{Error, TransportErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Regular,
    Ping,
    Pong,
}

impl FrameKind {
    fn to_byte(self) -> u8 {
        match self {
            FrameKind::Regular => 0,
            FrameKind::Ping => 1,
            FrameKind::Pong => 2,
        }
    }

    fn from_byte(b: u8) -> Option<FrameKind> {
        match b {
            0 => Some(FrameKind::Regular),
            1 => Some(FrameKind::Ping),
            2 => Some(FrameKind::Pong),
            _ => None,
        }
    }
}

pub struct Frame {
    pub kind: FrameKind,
    pub payload: Vec<u8>,
}

fn encode_length(len: usize) -> [u8; 3] {
    let len = len as u32;
    [(len >> 16) as u8, (len >> 8) as u8, len as u8]
}

fn decode_length(bytes: [u8; 3]) -> usize {
    ((bytes[0] as usize) << 16) | ((bytes[1] as usize) << 8) | (bytes[2] as usize)
}

/// Reads one frame. A frame whose kind byte isn't 0/1/2 is `bad_command`;
/// one whose declared length exceeds `max_len` is `inbound_too_long`.
/// Both are fatal for the connection (see spec §4.3).
pub async fn read_frame<S>(stream: &mut S, max_len: usize) -> Result<Frame, Error>
where
    S: tokio::io::AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;

    let kind = FrameKind::from_byte(header[0])
        .ok_or_else(|| Error::transport(TransportErrorKind::BadCommand))?;

    let len = decode_length([header[1], header[2], header[3]]);
    if len > max_len {
        return Err(Error::transport(TransportErrorKind::InboundTooLong));
    }

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;

    Ok(Frame { kind, payload })
}

/// Writes one frame. The caller is responsible for keeping `payload`
/// within whatever max length the peer advertised during the handshake.
pub async fn write_frame<S>(stream: &mut S, kind: FrameKind, payload: &[u8]) -> Result<(), Error>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    let mut header = [0u8; 4];
    header[0] = kind.to_byte();
    header[1..4].copy_from_slice(&encode_length(payload.len()));
    stream.write_all(&header).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn round_trips_a_regular_frame() {
        let (mut a, mut b) = duplex(256);
        write_frame(&mut a, FrameKind::Regular, b"hello").await.unwrap();
        let frame = read_frame(&mut b, 1024).await.unwrap();
        assert_eq!(frame.kind, FrameKind::Regular);
        assert_eq!(frame.payload, b"hello");
    }

    #[tokio::test]
    async fn round_trips_ping_and_pong() {
        let (mut a, mut b) = duplex(256);
        write_frame(&mut a, FrameKind::Ping, b"xyz").await.unwrap();
        let frame = read_frame(&mut b, 1024).await.unwrap();
        assert_eq!(frame.kind, FrameKind::Ping);
        assert_eq!(frame.payload, b"xyz");
    }

    #[tokio::test]
    async fn oversized_frame_is_inbound_too_long() {
        let (mut a, mut b) = duplex(256);
        write_frame(&mut a, FrameKind::Regular, &[0u8; 100]).await.unwrap();
        let result = read_frame(&mut b, 10).await;
        assert!(matches!(
            result.unwrap_err().kind(),
            crate::error::ErrorKind::Transport(TransportErrorKind::InboundTooLong)
        ));
    }

    #[tokio::test]
    async fn unknown_kind_byte_is_bad_command() {
        let (mut a, mut b) = duplex(256);
        use tokio::io::AsyncWriteExt;
        a.write_all(&[7, 0, 0, 0]).await.unwrap();
        let result = read_frame(&mut b, 1024).await;
        assert!(matches!(
            result.unwrap_err().kind(),
            crate::error::ErrorKind::Transport(TransportErrorKind::BadCommand)
        ));
    }
}
