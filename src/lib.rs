#![cfg_attr(feature = "cargo-clippy", allow(match_same_arms))]

pub mod client;
mod error;
pub mod messages;
pub mod router;
pub mod session;
pub mod transport;
mod trie;
mod uri;
mod utils;
pub mod value;

pub use client::Client;
pub use error::Error;
pub use messages::{
    ArgDict, ArgList, AuthenticateOptions, CallError, CallOptions, CancelMode, CancelOptions,
    ChallengeDetails, ClientRoles, Dict, ErrorDetails, ErrorType, EventDetails, HelloDetails,
    InterruptOptions, InvocationDetails, InvocationPolicy, List, MatchingPolicy, Message,
    PublishOptions, Reason, RegisterOptions, ResultDetails, RouterRoles, SubscribeOptions, Value,
    WelcomeDetails, YieldOptions,
};
pub use router::Router;
pub use uri::URI;

pub type CallResult<T> = Result<T, CallError>;
pub type WampResult<T> = Result<T, Error>;
pub type ID = u64;
