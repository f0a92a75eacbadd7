//! The framed transport (spec component C, §4.3).
//!
//! Wraps a raw byte stream with the rawsocket handshake, length-prefixed
//! framing, and ping/pong heartbeat, exposing the three operations the
//! rest of the crate needs: `start`, `send`, `stop`. Everything past
//! the handshake runs on a pair of background tasks — one reading
//! frames off the wire, one owning the write half and serializing
//! outbound sends, pings, and pongs against it — so that `on_rx` is
//! always invoked one frame at a time, in order, as the spec requires.
//!
//! The read side gets its own task rather than a branch inside the main
//! `select!` loop because `framing::read_frame` awaits across more than
//! one I/O operation (header, then payload); racing it inside a
//! `select!` would mean losing already-read header bytes whenever a
//! different branch won. A dedicated task that only ever drives that
//! future to completion sidesteps the problem entirely.

pub mod framing;
pub mod handshake;
pub mod heartbeat;

pub use framing::FrameKind;
pub use handshake::{HandshakeConfig, Serializer};

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{Error, TransportErrorKind};

enum Command {
    Send(FrameKind, Vec<u8>, oneshot::Sender<Result<(), Error>>),
    Stop,
}

enum ReadEvent {
    Frame(Vec<u8>),
    Closed(Error),
}

/// A running transport. Dropping this without calling `stop` leaves the
/// background tasks running; `stop` is the clean shutdown path.
pub struct Transport {
    commands: mpsc::UnboundedSender<Command>,
    reader_task: Option<JoinHandle<()>>,
    writer_task: Option<JoinHandle<()>>,
}

impl Transport {
    /// Performs the client handshake, then starts the read/write tasks.
    /// `on_rx` is called with each regular-frame payload, in order;
    /// `on_unresponsive` is called once if the heartbeat times out.
    /// Both run on the writer task and so must not block.
    pub async fn start<S, Rx, Unresponsive>(
        stream: S,
        request: HandshakeConfig,
        heartbeat_interval: Option<Duration>,
        on_rx: Rx,
        on_unresponsive: Unresponsive,
    ) -> Result<(Transport, HandshakeConfig), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        Rx: FnMut(Vec<u8>) + Send + 'static,
        Unresponsive: FnMut() + Send + 'static,
    {
        let mut stream = stream;
        let agreed = handshake::perform_client(&mut stream, request).await?;
        Ok((Transport::spawn(stream, agreed.max_length(), heartbeat_interval, on_rx, on_unresponsive), agreed))
    }

    /// Performs the server handshake (`accept` decides what serializer
    /// and length limit to agree to, or rejects the request outright),
    /// then starts the read/write tasks exactly as [`Transport::start`]
    /// does.
    pub async fn start_server<S, Accept, Rx, Unresponsive>(
        stream: S,
        accept: Accept,
        heartbeat_interval: Option<Duration>,
        on_rx: Rx,
        on_unresponsive: Unresponsive,
    ) -> Result<(Transport, HandshakeConfig), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        Accept: FnOnce(HandshakeConfig) -> Result<HandshakeConfig, u8>,
        Rx: FnMut(Vec<u8>) + Send + 'static,
        Unresponsive: FnMut() + Send + 'static,
    {
        let mut stream = stream;
        let agreed = handshake::perform_server(&mut stream, accept).await?;
        Ok((Transport::spawn(stream, agreed.max_length(), heartbeat_interval, on_rx, on_unresponsive), agreed))
    }

    fn spawn<S, Rx, Unresponsive>(
        stream: S,
        max_len: usize,
        heartbeat_interval: Option<Duration>,
        mut on_rx: Rx,
        mut on_unresponsive: Unresponsive,
    ) -> Transport
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        Rx: FnMut(Vec<u8>) + Send + 'static,
        Unresponsive: FnMut() + Send + 'static,
    {
        let (mut read_half, mut write_half) = tokio::io::split(stream);

        let (read_tx, mut read_rx) = mpsc::unbounded_channel::<ReadEvent>();
        let reader_task = tokio::spawn(async move {
            loop {
                match framing::read_frame(&mut read_half, max_len).await {
                    Ok(frame) if frame.kind == FrameKind::Regular => {
                        if read_tx.send(ReadEvent::Frame(frame.payload)).is_err() {
                            break;
                        }
                    }
                    Ok(frame) => {
                        // Pings/pongs are handed to the writer task as
                        // raw frames too, tagged by kind, so it alone
                        // owns the write half and the heartbeat state.
                        let tagged = tag_frame(frame.kind, frame.payload);
                        if read_tx.send(ReadEvent::Frame(tagged)).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = read_tx.send(ReadEvent::Closed(e));
                        break;
                    }
                }
            }
        });

        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
        let writer_task = tokio::spawn(async move {
            let mut hb = heartbeat::HeartbeatState::new();
            let mut ticker = heartbeat_interval.map(tokio::time::interval);
            if let Some(t) = ticker.as_mut() {
                t.tick().await;
            }

            loop {
                tokio::select! {
                    maybe_cmd = cmd_rx.recv() => {
                        match maybe_cmd {
                            Some(Command::Send(kind, payload, ack)) => {
                                let result = framing::write_frame(&mut write_half, kind, &payload).await;
                                let _ = ack.send(result);
                                if result_is_fatal(&result) {
                                    break;
                                }
                            }
                            Some(Command::Stop) | None => break,
                        }
                    }
                    event = read_rx.recv() => {
                        match event {
                            Some(ReadEvent::Frame(raw)) => {
                                match untag_frame(raw) {
                                    (FrameKind::Regular, payload) => on_rx(payload),
                                    (FrameKind::Ping, payload) => {
                                        let _ = framing::write_frame(&mut write_half, FrameKind::Pong, &payload).await;
                                    }
                                    (FrameKind::Pong, payload) => {
                                        hb.on_pong(&payload);
                                    }
                                }
                            }
                            Some(ReadEvent::Closed(_)) | None => break,
                        }
                    }
                    _ = tick_or_pending(&mut ticker) => {
                        if hb.has_outstanding() {
                            on_unresponsive();
                            break;
                        }
                        let payload = hb.issue_ping();
                        if framing::write_frame(&mut write_half, FrameKind::Ping, &payload).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Transport {
            commands: cmd_tx,
            reader_task: Some(reader_task),
            writer_task: Some(writer_task),
        }
    }

    /// Sends one regular-frame payload, resolving once it's written (or
    /// the transport has stopped, in which case the send fails with
    /// `disconnected`).
    pub async fn send(&self, payload: Vec<u8>) -> Result<(), Error> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(Command::Send(FrameKind::Regular, payload, ack_tx))
            .map_err(|_| Error::transport(TransportErrorKind::Disconnected))?;
        ack_rx
            .await
            .map_err(|_| Error::transport(TransportErrorKind::Disconnected))?
    }

    /// Stops the transport: no further sends are accepted, the
    /// background tasks exit, and any in-flight send resolves with
    /// `aborted`.
    pub async fn stop(&mut self) {
        let _ = self.commands.send(Command::Stop);
        if let Some(task) = self.reader_task.take() {
            task.abort();
        }
        if let Some(task) = self.writer_task.take() {
            let _ = task.await;
        }
    }
}

fn result_is_fatal(result: &Result<(), Error>) -> bool {
    result.is_err()
}

// The reader task only ever forwards Vec<u8> payloads over the channel,
// so ping/pong frames are tagged with a one-byte prefix the writer task
// strips back off; this keeps `ReadEvent` a single simple variant for
// the common (regular-frame) case while still letting ping/pong travel
// the same channel in frame order.
fn tag_frame(kind: FrameKind, payload: Vec<u8>) -> Vec<u8> {
    let mut tagged = Vec::with_capacity(payload.len() + 1);
    tagged.push(match kind {
        FrameKind::Regular => 0,
        FrameKind::Ping => 1,
        FrameKind::Pong => 2,
    });
    tagged.extend(payload);
    tagged
}

fn untag_frame(mut tagged: Vec<u8>) -> (FrameKind, Vec<u8>) {
    if tagged.is_empty() {
        return (FrameKind::Regular, tagged);
    }
    let tag = tagged.remove(0);
    let kind = match tag {
        1 => FrameKind::Ping,
        2 => FrameKind::Pong,
        _ => FrameKind::Regular,
    };
    (kind, tagged)
}

async fn tick_or_pending(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn client_delivers_regular_frames_in_order() {
        let (client_io, mut server_io) = duplex(4096);
        let config = HandshakeConfig::new(4, Serializer::Json);

        let server_handshake = tokio::spawn(async move {
            handshake::perform_server(&mut server_io, |requested| Ok(requested))
                .await
                .unwrap();
            server_io
        });

        let received = std::sync::Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let received_clone = received.clone();

        let (transport, agreed) = Transport::start(
            client_io,
            config,
            None,
            move |payload| {
                let received = received_clone.clone();
                tokio::spawn(async move {
                    received.lock().await.push(payload);
                });
            },
            || {},
        )
        .await
        .unwrap();
        assert_eq!(agreed, config);

        let mut server_io = server_handshake.await.unwrap();
        framing::write_frame(&mut server_io, FrameKind::Regular, b"one")
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        {
            let guard = received.lock().await;
            assert_eq!(guard.as_slice(), &[b"one".to_vec()]);
        }

        let mut transport = transport;
        transport.stop().await;
    }

    #[tokio::test]
    async fn send_round_trips_to_the_peer() {
        let (client_io, mut server_io) = duplex(4096);
        let config = HandshakeConfig::new(4, Serializer::Json);

        let server_handshake = tokio::spawn(async move {
            handshake::perform_server(&mut server_io, |requested| Ok(requested))
                .await
                .unwrap();
            server_io
        });

        let (transport, _agreed) = Transport::start(client_io, config, None, |_| {}, || {})
            .await
            .unwrap();

        let mut server_io = server_handshake.await.unwrap();
        transport.send(b"ping-payload".to_vec()).await.unwrap();

        let frame = framing::read_frame(&mut server_io, 65536).await.unwrap();
        assert_eq!(frame.kind, FrameKind::Regular);
        assert_eq!(frame.payload, b"ping-payload");
    }
}
