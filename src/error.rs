//! The crate's error type.
//!
//! Kept in the teacher's shape — a struct wrapping a `kind` enum, with a
//! hand-written `Display` — but reorganized around the four kinds the
//! spec's error handling design calls for (`misc`, `wamp`, `decoding`,
//! `transport`) instead of the teacher's flat, transport-specific list.

use std::fmt;

use crate::messages::{Dict, List, Reason};

/// A stable error category, independent of the underlying `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Misc,
    Wamp,
    Decoding,
    Transport,
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
}

#[derive(Debug, Clone)]
pub enum ErrorKind {
    Misc(MiscErrorKind),
    Wamp(Reason, Option<List>, Option<Dict>),
    Decoding(DecodingErrorKind),
    Transport(TransportErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiscErrorKind {
    Success,
    Abandoned,
    InvalidArgument,
    InvalidState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodingErrorKind {
    EmptyInput,
    UnexpectedEof,
    BadBase64Char,
    BadBase64Length,
    BadBase64Padding,
    ExpectedStringKey,
    MaxNestingDepthExceeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Aborted,
    Disconnected,
    BadHandshake,
    BadFeature,
    BadLengthLimit,
    Saturated,
    BadSerializer,
    BadCommand,
    InboundTooLong,
    Unresponsive,
    Failed,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Error {
        Error { kind }
    }

    pub fn misc(kind: MiscErrorKind) -> Error {
        Error::new(ErrorKind::Misc(kind))
    }

    pub fn wamp(reason: Reason, args: Option<List>, kwargs: Option<Dict>) -> Error {
        Error::new(ErrorKind::Wamp(reason, args, kwargs))
    }

    pub fn decoding(kind: DecodingErrorKind) -> Error {
        Error::new(ErrorKind::Decoding(kind))
    }

    pub fn transport(kind: TransportErrorKind) -> Error {
        Error::new(ErrorKind::Transport(kind))
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn category(&self) -> Category {
        match self.kind {
            ErrorKind::Misc(_) => Category::Misc,
            ErrorKind::Wamp(..) => Category::Wamp,
            ErrorKind::Decoding(_) => Category::Decoding,
            ErrorKind::Transport(_) => Category::Transport,
        }
    }

    /// Whether this error, received on a session's read loop, requires
    /// the session to transition to `failed` (decoding/transport errors
    /// and protocol violations do; application-level WAMP errors don't).
    pub fn terminates_session(&self) -> bool {
        match &self.kind {
            ErrorKind::Decoding(_) | ErrorKind::Transport(_) => true,
            ErrorKind::Wamp(Reason::ProtocolViolation, _, _) => true,
            ErrorKind::Wamp(_, _, _) => false,
            ErrorKind::Misc(_) => false,
        }
    }

    /// The WAMP error URI this error corresponds to, if any.
    pub fn error_uri(&self) -> Option<String> {
        match &self.kind {
            ErrorKind::Wamp(reason, _, _) => Some(reason.to_string()),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.description())
    }
}

impl std::error::Error for Error {}

impl ErrorKind {
    pub fn description(&self) -> String {
        match self {
            ErrorKind::Misc(k) => k.description().to_string(),
            ErrorKind::Wamp(reason, _, _) => reason.to_string(),
            ErrorKind::Decoding(k) => k.description().to_string(),
            ErrorKind::Transport(k) => k.description().to_string(),
        }
    }
}

impl MiscErrorKind {
    pub fn description(&self) -> &'static str {
        match self {
            MiscErrorKind::Success => "success",
            MiscErrorKind::Abandoned => "abandoned",
            MiscErrorKind::InvalidArgument => "invalid argument",
            MiscErrorKind::InvalidState => "invalid state",
        }
    }
}

impl DecodingErrorKind {
    pub fn description(&self) -> &'static str {
        match self {
            DecodingErrorKind::EmptyInput => "empty input",
            DecodingErrorKind::UnexpectedEof => "unexpected end of input",
            DecodingErrorKind::BadBase64Char => "invalid base64 character",
            DecodingErrorKind::BadBase64Length => "invalid base64 length",
            DecodingErrorKind::BadBase64Padding => "invalid base64 padding",
            DecodingErrorKind::ExpectedStringKey => "expected a string object key",
            DecodingErrorKind::MaxNestingDepthExceeded => "maximum nesting depth exceeded",
            DecodingErrorKind::Failed => "decoding failed",
        }
    }
}

impl TransportErrorKind {
    pub fn description(&self) -> &'static str {
        match self {
            TransportErrorKind::Aborted => "aborted",
            TransportErrorKind::Disconnected => "disconnected",
            TransportErrorKind::BadHandshake => "bad handshake",
            TransportErrorKind::BadFeature => "use of reserved bits",
            TransportErrorKind::BadLengthLimit => "unacceptable max length",
            TransportErrorKind::Saturated => "maximum connections reached",
            TransportErrorKind::BadSerializer => "serializer unsupported",
            TransportErrorKind::BadCommand => "bad frame kind",
            TransportErrorKind::InboundTooLong => "inbound frame too long",
            TransportErrorKind::Unresponsive => "peer unresponsive",
            TransportErrorKind::Failed => "transport failed",
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Error {
        if e.is_eof() {
            Error::decoding(DecodingErrorKind::UnexpectedEof)
        } else {
            Error::decoding(DecodingErrorKind::Failed)
        }
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(_: rmp_serde::decode::Error) -> Error {
        Error::decoding(DecodingErrorKind::Failed)
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(_: rmp_serde::encode::Error) -> Error {
        Error::decoding(DecodingErrorKind::Failed)
    }
}

impl From<serde_cbor::Error> for Error {
    fn from(_: serde_cbor::Error) -> Error {
        Error::decoding(DecodingErrorKind::Failed)
    }
}

impl From<std::io::Error> for Error {
    fn from(_: std::io::Error) -> Error {
        Error::transport(TransportErrorKind::Failed)
    }
}
