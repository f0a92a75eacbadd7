//! The peer-side session state machine (spec component E).
//!
//! A WAMP session walks through a small set of states from the moment a
//! transport opens to the moment it closes. `Peer` enforces the legal
//! transitions and owns the per-direction request id generator; it
//! knows nothing about sockets or message framing, which live in
//! [`crate::transport`] and [`crate::client`] respectively.

mod chit;
mod completion;
mod pending;

pub use chit::{CallChit, SessionCommand};
pub use completion::{
    completion_channel, CallbackCompletion, ChannelCompletion, CompletionFuture, CompletionHandler,
};
pub use pending::{PendingKind, PendingTable};

use std::collections::HashSet;

use rand::Rng;

use crate::error::{Error, MiscErrorKind};
use crate::ID;

/// The upper bound (exclusive) of a request id: ids are drawn from
/// `1..2^53`, the largest integer that round-trips exactly through an
/// IEEE-754 double (see spec §4.5).
const MAX_ID: u64 = 1u64 << 53;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Closed,
    Establishing,
    Authenticating,
    Established,
    ShuttingDown,
    Failed,
}

/// Generates session-scoped request ids, collision-free against the set
/// of ids currently outstanding.
#[derive(Debug, Default)]
pub struct SessionIds {
    seen: HashSet<ID>,
}

impl SessionIds {
    pub fn new() -> SessionIds {
        SessionIds {
            seen: HashSet::new(),
        }
    }

    /// Draws a fresh id in `1..2^53`, rejecting any already outstanding.
    pub fn next(&mut self) -> ID {
        let mut rng = rand::thread_rng();
        loop {
            let id = rng.gen_range(1..MAX_ID);
            if self.seen.insert(id) {
                return id;
            }
        }
    }

    /// Returns an id to the pool once its pending entry is resolved.
    pub fn release(&mut self, id: ID) {
        self.seen.remove(&id);
    }

    pub fn is_outstanding(&self, id: ID) -> bool {
        self.seen.contains(&id)
    }
}

/// The state machine for one peer-side session, plus its request id
/// generator. Transitions that the spec forbids return
/// `MiscErrorKind::InvalidState` rather than panicking, so a caller
/// driving the session off untrusted input (a stray message from the
/// transport) can turn the violation into a protocol error instead of
/// crashing the session's task.
#[derive(Debug)]
pub struct Peer {
    state: SessionState,
    ids: SessionIds,
}

impl Peer {
    pub fn new() -> Peer {
        Peer {
            state: SessionState::Disconnected,
            ids: SessionIds::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, from: &[SessionState], to: SessionState) -> Result<(), Error> {
        if from.contains(&self.state) {
            self.state = to;
            Ok(())
        } else {
            Err(Error::misc(MiscErrorKind::InvalidState))
        }
    }

    /// The transport has begun connecting.
    pub fn connect(&mut self) -> Result<(), Error> {
        self.transition(&[SessionState::Disconnected, SessionState::Closed], SessionState::Connecting)
    }

    /// The transport handshake completed; a HELLO may now be sent.
    pub fn transport_opened(&mut self) -> Result<(), Error> {
        self.transition(&[SessionState::Connecting], SessionState::Establishing)
    }

    /// A CHALLENGE arrived in reply to HELLO.
    pub fn challenge_received(&mut self) -> Result<(), Error> {
        self.transition(&[SessionState::Establishing], SessionState::Authenticating)
    }

    /// A WELCOME arrived, from either `establishing` or `authenticating`.
    pub fn welcomed(&mut self) -> Result<(), Error> {
        self.transition(
            &[SessionState::Establishing, SessionState::Authenticating],
            SessionState::Established,
        )
    }

    /// An ABORT arrived, or was sent, before the session was established
    /// (spec §4.5: "on Abort, →failed with abort-reason surfaced").
    pub fn aborted(&mut self) -> Result<(), Error> {
        self.transition(
            &[SessionState::Establishing, SessionState::Authenticating],
            SessionState::Failed,
        )
    }

    /// A GOODBYE was sent or received while established.
    pub fn begin_leave(&mut self) -> Result<(), Error> {
        self.transition(&[SessionState::Established], SessionState::ShuttingDown)
    }

    /// The matching GOODBYE reply arrived, completing the close handshake.
    pub fn closed(&mut self) -> Result<(), Error> {
        self.transition(&[SessionState::ShuttingDown], SessionState::Closed)
    }

    /// A decoding or transport error, or a protocol violation, ends the
    /// session unconditionally from any state but `disconnected`.
    pub fn failed(&mut self) {
        if self.state != SessionState::Disconnected {
            self.state = SessionState::Failed;
        }
    }

    pub fn is_established(&self) -> bool {
        self.state == SessionState::Established
    }

    pub fn next_request_id(&mut self) -> ID {
        self.ids.next()
    }

    pub fn release_request_id(&mut self, id: ID) {
        self.ids.release(id);
    }
}

impl Default for Peer {
    fn default() -> Peer {
        Peer::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn happy_path_without_auth() {
        let mut peer = Peer::new();
        peer.connect().unwrap();
        peer.transport_opened().unwrap();
        peer.welcomed().unwrap();
        assert!(peer.is_established());
        peer.begin_leave().unwrap();
        peer.closed().unwrap();
        assert_eq!(peer.state(), SessionState::Closed);
    }

    #[test]
    fn happy_path_with_auth_challenge() {
        let mut peer = Peer::new();
        peer.connect().unwrap();
        peer.transport_opened().unwrap();
        peer.challenge_received().unwrap();
        peer.welcomed().unwrap();
        assert!(peer.is_established());
    }

    #[test]
    fn abort_before_welcome_fails_the_session() {
        let mut peer = Peer::new();
        peer.connect().unwrap();
        peer.transport_opened().unwrap();
        peer.aborted().unwrap();
        assert_eq!(peer.state(), SessionState::Failed);
    }

    #[test]
    fn welcome_without_opening_transport_is_illegal() {
        let mut peer = Peer::new();
        assert!(peer.welcomed().is_err());
    }

    #[test]
    fn leaving_a_session_that_never_established_is_illegal() {
        let mut peer = Peer::new();
        peer.connect().unwrap();
        assert!(peer.begin_leave().is_err());
    }

    #[test]
    fn failed_is_reachable_from_any_live_state() {
        let mut peer = Peer::new();
        peer.connect().unwrap();
        peer.transport_opened().unwrap();
        peer.welcomed().unwrap();
        peer.failed();
        assert_eq!(peer.state(), SessionState::Failed);
    }

    #[test]
    fn request_ids_are_unique_until_released() {
        let mut ids = SessionIds::new();
        let a = ids.next();
        let b = ids.next();
        assert_ne!(a, b);
        assert!(ids.is_outstanding(a));
        ids.release(a);
        assert!(!ids.is_outstanding(a));
    }
}
