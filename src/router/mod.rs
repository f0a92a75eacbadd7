//! The router role (spec §4.7, §9): a realm directory plus, per joined
//! realm, a broker and dealer running on their own lane.
//!
//! [`Router`] is a cheap, cloneable handle. Adding a realm spawns a
//! [`RealmActor`] task that owns one [`Realm`](realm::Realm) exclusively
//! and drains a [`RealmCommand`] channel; every connection that joins
//! that realm talks to it only through a [`RealmHandle`], never through
//! a shared lock. `Router` itself keeps a short-lived mutex over the
//! realm *directory* (name → handle) and the pool of session ids handed
//! out at Welcome — bookkeeping outside any single realm's lane.

mod broker;
mod dealer;
pub mod realm;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::poll_fn;
use log::{debug, warn};
use rand::Rng;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::time::delay_queue::Key as DelayKey;
use tokio_util::time::DelayQueue;

use crate::error::{Error, MiscErrorKind, TransportErrorKind};
use crate::messages::{
    AuthenticateOptions, CallOptions, CancelMode, CancelOptions, ChallengeDetails, Dict,
    ErrorDetails, ErrorType, HelloDetails, List, MatchingPolicy, Message, PublishOptions, Reason,
    RegisterOptions, RouterRoles, SubscribeOptions, WelcomeDetails, YieldOptions,
};
use crate::session::{Peer, SessionState};
use crate::transport::{HandshakeConfig, Serializer, Transport};
use crate::uri::URI;
use crate::ID;

use realm::{Realm, SessionHandle, SessionSink};

/// The upper bound (exclusive) a WAMP session id is drawn from (spec
/// §4.5's `1..2^53`, shared by every id space in the protocol).
const MAX_ID: u64 = 1u64 << 53;

/// Extension point for deciding what a HELLO earns: immediate WELCOME,
/// a CHALLENGE to answer, or an outright ABORT. No concrete scheme
/// (ticket, WAMP-CRA, cryptosign) ships with this crate; an embedder
/// wires one up by implementing this trait and handing it to
/// [`Router::set_authenticator`].
pub trait Authenticator: Send + Sync {
    fn on_hello(&self, realm: &URI, details: &HelloDetails) -> HelloDecision;

    fn on_authenticate(&self, signature: &str, options: &AuthenticateOptions) -> AuthDecision;
}

pub enum HelloDecision {
    Welcome(WelcomeDetails),
    Challenge(String, ChallengeDetails),
    Abort(Reason),
}

pub enum AuthDecision {
    Welcome(WelcomeDetails),
    Abort(Reason),
}

fn next_session_id(taken: &mut HashSet<ID>) -> ID {
    let mut rng = rand::thread_rng();
    loop {
        let id = rng.gen_range(1..MAX_ID);
        if taken.insert(id) {
            return id;
        }
    }
}

/// Every operation a joined connection needs from its realm, posted to
/// the realm's own lane. Subscribe/Unsubscribe/Publish/Register/
/// Unregister/Call carry a reply channel since the connection waits on
/// their outcome; Yield/ErrorFromCallee/Cancel are fire-and-forget, same
/// as a callee's or caller's one-way message would be on the wire.
enum RealmCommand {
    Join {
        session_id: ID,
        sink: SessionSink,
        reply: oneshot::Sender<SessionHandle>,
    },
    Leave {
        handle: SessionHandle,
    },
    Subscribe {
        handle: SessionHandle,
        topic: URI,
        policy: MatchingPolicy,
        reply: oneshot::Sender<ID>,
    },
    Unsubscribe {
        handle: SessionHandle,
        subscription_id: ID,
        reply: oneshot::Sender<bool>,
    },
    Publish {
        handle: SessionHandle,
        topic: URI,
        options: PublishOptions,
        args: Option<List>,
        kwargs: Option<Dict>,
        reply: oneshot::Sender<ID>,
    },
    Register {
        handle: SessionHandle,
        procedure: URI,
        policy: MatchingPolicy,
        reply: oneshot::Sender<Result<ID, Reason>>,
    },
    Unregister {
        handle: SessionHandle,
        registration_id: ID,
        reply: oneshot::Sender<bool>,
    },
    Call {
        handle: SessionHandle,
        request_id: ID,
        procedure: URI,
        options: CallOptions,
        args: Option<List>,
        kwargs: Option<Dict>,
        reply: oneshot::Sender<Result<ID, Reason>>,
    },
    Yield {
        handle: SessionHandle,
        invocation_id: ID,
        options: YieldOptions,
        args: Option<List>,
        kwargs: Option<Dict>,
    },
    ErrorFromCallee {
        handle: SessionHandle,
        invocation_id: ID,
        reason: Reason,
        args: Option<List>,
        kwargs: Option<Dict>,
    },
    Cancel {
        handle: SessionHandle,
        request_id: ID,
        mode: CancelMode,
    },
}

/// A cheap, cloneable reference to a running realm's command channel.
#[derive(Clone)]
struct RealmHandle {
    commands: mpsc::UnboundedSender<RealmCommand>,
}

impl RealmHandle {
    async fn join(&self, session_id: ID, sink: SessionSink) -> Result<SessionHandle, Error> {
        let (reply, rx) = oneshot::channel();
        self.post(RealmCommand::Join { session_id, sink, reply })?;
        rx.await.map_err(|_| Error::misc(MiscErrorKind::Abandoned))
    }

    fn leave(&self, handle: SessionHandle) {
        let _ = self.commands.send(RealmCommand::Leave { handle });
    }

    async fn subscribe(&self, handle: SessionHandle, topic: URI, policy: MatchingPolicy) -> Result<ID, Error> {
        let (reply, rx) = oneshot::channel();
        self.post(RealmCommand::Subscribe { handle, topic, policy, reply })?;
        rx.await.map_err(|_| Error::misc(MiscErrorKind::Abandoned))
    }

    async fn unsubscribe(&self, handle: SessionHandle, subscription_id: ID) -> Result<bool, Error> {
        let (reply, rx) = oneshot::channel();
        self.post(RealmCommand::Unsubscribe { handle, subscription_id, reply })?;
        rx.await.map_err(|_| Error::misc(MiscErrorKind::Abandoned))
    }

    async fn publish(
        &self,
        handle: SessionHandle,
        topic: URI,
        options: PublishOptions,
        args: Option<List>,
        kwargs: Option<Dict>,
    ) -> Result<ID, Error> {
        let (reply, rx) = oneshot::channel();
        self.post(RealmCommand::Publish { handle, topic, options, args, kwargs, reply })?;
        rx.await.map_err(|_| Error::misc(MiscErrorKind::Abandoned))
    }

    async fn register(&self, handle: SessionHandle, procedure: URI, policy: MatchingPolicy) -> Result<Result<ID, Reason>, Error> {
        let (reply, rx) = oneshot::channel();
        self.post(RealmCommand::Register { handle, procedure, policy, reply })?;
        rx.await.map_err(|_| Error::misc(MiscErrorKind::Abandoned))
    }

    async fn unregister(&self, handle: SessionHandle, registration_id: ID) -> Result<bool, Error> {
        let (reply, rx) = oneshot::channel();
        self.post(RealmCommand::Unregister { handle, registration_id, reply })?;
        rx.await.map_err(|_| Error::misc(MiscErrorKind::Abandoned))
    }

    #[allow(clippy::too_many_arguments)]
    async fn call(
        &self,
        handle: SessionHandle,
        request_id: ID,
        procedure: URI,
        options: CallOptions,
        args: Option<List>,
        kwargs: Option<Dict>,
    ) -> Result<Result<ID, Reason>, Error> {
        let (reply, rx) = oneshot::channel();
        self.post(RealmCommand::Call { handle, request_id, procedure, options, args, kwargs, reply })?;
        rx.await.map_err(|_| Error::misc(MiscErrorKind::Abandoned))
    }

    fn yield_(&self, handle: SessionHandle, invocation_id: ID, options: YieldOptions, args: Option<List>, kwargs: Option<Dict>) {
        let _ = self.commands.send(RealmCommand::Yield { handle, invocation_id, options, args, kwargs });
    }

    fn error_from_callee(&self, handle: SessionHandle, invocation_id: ID, reason: Reason, args: Option<List>, kwargs: Option<Dict>) {
        let _ = self
            .commands
            .send(RealmCommand::ErrorFromCallee { handle, invocation_id, reason, args, kwargs });
    }

    fn cancel(&self, handle: SessionHandle, request_id: ID, mode: CancelMode) {
        let _ = self.commands.send(RealmCommand::Cancel { handle, request_id, mode });
    }

    fn post(&self, command: RealmCommand) -> Result<(), Error> {
        self.commands
            .send(command)
            .map_err(|_| Error::misc(MiscErrorKind::Abandoned))
    }
}

/// Owns one [`Realm`] exclusively and arms the caller-timeout timers
/// spec §4.5 puts on the dealer's own lane, independent of whatever
/// timeout a caller's own session keeps.
struct RealmActor {
    realm: Realm,
    call_timeouts: DelayQueue<ID>,
    timeout_keys: HashMap<ID, DelayKey>,
}

impl RealmActor {
    fn spawn() -> RealmHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = RealmActor {
            realm: Realm::new(),
            call_timeouts: DelayQueue::new(),
            timeout_keys: HashMap::new(),
        };
        tokio::spawn(actor.run(rx));
        RealmHandle { commands: tx }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<RealmCommand>) {
        loop {
            tokio::select! {
                maybe_cmd = commands.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle(cmd),
                        None => break,
                    }
                }
                Some(expired) = poll_fn(|cx| self.call_timeouts.poll_expired(cx)) => {
                    if let Ok(expired) = expired {
                        let invocation_id = expired.into_inner();
                        self.timeout_keys.remove(&invocation_id);
                        self.realm.timeout_call(invocation_id);
                    }
                }
            }
        }
    }

    fn finish_invocation(&mut self, invocation_id: ID) {
        if let Some(key) = self.timeout_keys.remove(&invocation_id) {
            self.call_timeouts.remove(&key);
        }
    }

    fn handle(&mut self, command: RealmCommand) {
        match command {
            RealmCommand::Join { session_id, sink, reply } => {
                let handle = self.realm.join(session_id, sink);
                let _ = reply.send(handle);
            }
            RealmCommand::Leave { handle } => {
                self.realm.leave(handle);
            }
            RealmCommand::Subscribe { handle, topic, policy, reply } => {
                let subscription_id = self.realm.subscribe(handle, topic, policy);
                let _ = reply.send(subscription_id);
            }
            RealmCommand::Unsubscribe { handle, subscription_id, reply } => {
                let ok = self.realm.unsubscribe(handle, subscription_id);
                let _ = reply.send(ok);
            }
            RealmCommand::Publish { handle, topic, options, args, kwargs, reply } => {
                let publication_id = self.realm.publish(handle, topic, options, args, kwargs);
                let _ = reply.send(publication_id);
            }
            RealmCommand::Register { handle, procedure, policy, reply } => {
                let outcome = self.realm.register(handle, procedure, policy);
                let _ = reply.send(outcome);
            }
            RealmCommand::Unregister { handle, registration_id, reply } => {
                let ok = self.realm.unregister(handle, registration_id);
                let _ = reply.send(ok);
            }
            RealmCommand::Call { handle, request_id, procedure, options, args, kwargs, reply } => {
                let timeout_ms = options.timeout;
                let outcome = self.realm.call(handle, request_id, procedure, &options, args, kwargs);
                if let (Ok(invocation_id), Some(timeout_ms)) = (&outcome, timeout_ms) {
                    let key = self
                        .call_timeouts
                        .insert(*invocation_id, Duration::from_millis(timeout_ms));
                    self.timeout_keys.insert(*invocation_id, key);
                }
                let _ = reply.send(outcome);
            }
            RealmCommand::Yield { handle, invocation_id, options, args, kwargs } => {
                let progress = options.progress;
                self.realm.yield_result(handle, invocation_id, options, args, kwargs);
                if !progress {
                    self.finish_invocation(invocation_id);
                }
            }
            RealmCommand::ErrorFromCallee { handle, invocation_id, reason, args, kwargs } => {
                self.realm.error_from_callee(handle, invocation_id, reason, args, kwargs);
                self.finish_invocation(invocation_id);
            }
            RealmCommand::Cancel { handle, request_id, mode } => {
                self.realm.cancel(handle, request_id, mode);
            }
        }
    }
}

/// A handle to the router. Cloning shares the same realm directory; a
/// realm itself keeps running as long as any session remains joined to
/// it (or forever, once created — realms are never torn down
/// automatically, matching the original router's `add_realm` contract).
#[derive(Clone)]
pub struct Router {
    realms: Arc<Mutex<HashMap<String, RealmHandle>>>,
    session_ids: Arc<Mutex<HashSet<ID>>>,
    authenticator: Option<Arc<dyn Authenticator>>,
}

impl Router {
    #[inline]
    pub fn new() -> Router {
        Router {
            realms: Arc::new(Mutex::new(HashMap::new())),
            session_ids: Arc::new(Mutex::new(HashSet::new())),
            authenticator: None,
        }
    }

    pub fn set_authenticator(&mut self, authenticator: Arc<dyn Authenticator>) {
        self.authenticator = Some(authenticator);
    }

    /// Registers a realm, spawning its actor task. A second call for an
    /// already-registered name is a no-op, matching the original
    /// router's behavior.
    pub fn add_realm(&self, realm: &str) {
        let mut realms = self.realms.lock().unwrap();
        if realms.contains_key(realm) {
            return;
        }
        realms.insert(realm.to_string(), RealmActor::spawn());
        debug!("added realm {}", realm);
    }

    fn realm_handle(&self, realm: &str) -> Option<RealmHandle> {
        self.realms.lock().unwrap().get(realm).cloned()
    }

    /// Binds `addr` and accepts connections until the returned task is
    /// aborted or dropped. Each connection runs the rawsocket handshake
    /// and then its own connection actor on its own task.
    pub async fn listen(&self, addr: &str, heartbeat_interval: Option<Duration>) -> Result<JoinHandle<()>, Error> {
        let listener = TcpListener::bind(addr).await?;
        let router = self.clone();
        Ok(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let router = router.clone();
                        tokio::spawn(async move {
                            if let Err(e) = router.accept(stream, heartbeat_interval).await {
                                warn!("connection setup failed: {}", e);
                            }
                        });
                    }
                    Err(e) => warn!("accept failed: {}", e),
                }
            }
        }))
    }

    /// Runs the server handshake over any `AsyncRead + AsyncWrite`
    /// stream and spawns its connection actor. `listen` is a TCP
    /// convenience wrapper around this; an embedder fronting a
    /// WebSocket or Unix-domain listener calls this directly per spec
    /// §6's byte-stream-only transport contract.
    pub async fn accept<S>(&self, stream: S, heartbeat_interval: Option<Duration>) -> Result<(), Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ActorEvent>();

        let rx_events = event_tx.clone();
        let decode_serializer_cell: Arc<Mutex<Serializer>> = Arc::new(Mutex::new(Serializer::Json));
        let decode_serializer = decode_serializer_cell.clone();
        let on_rx = move |payload: Vec<u8>| {
            let serializer = *decode_serializer.lock().unwrap();
            match crate::messages::codec::decode(&payload, serializer) {
                Ok(message) => {
                    let _ = rx_events.send(ActorEvent::Inbound(message));
                }
                Err(e) => {
                    let _ = rx_events.send(ActorEvent::DecodeError(e));
                }
            }
        };
        let unresponsive_events = event_tx;
        let on_unresponsive = move || {
            let _ = unresponsive_events.send(ActorEvent::Unresponsive);
        };

        let (transport, agreed) =
            Transport::start_server(stream, |requested| Ok(requested), heartbeat_interval, on_rx, on_unresponsive).await?;
        *decode_serializer_cell.lock().unwrap() = agreed.serializer;

        let mut peer = Peer::new();
        peer.connect()?;
        peer.transport_opened()?;

        let connection = ConnectionSession {
            peer,
            transport,
            serializer: agreed.serializer,
            router: self.clone(),
            realm: None,
            handle: None,
            pending_realm: None,
        };
        tokio::spawn(connection.run(event_rx));
        Ok(())
    }
}

impl Default for Router {
    fn default() -> Router {
        Router::new()
    }
}

/// What the transport's background tasks forward to a connection actor.
enum ActorEvent {
    Inbound(Message),
    DecodeError(Error),
    Unresponsive,
}

/// One inbound connection's actor: drives [`Peer`] through session
/// establishment, then relays every realm-facing message to whichever
/// realm it joined and writes back whatever that realm pushes onto its
/// [`SessionSink`].
struct ConnectionSession {
    peer: Peer,
    transport: Transport,
    serializer: Serializer,
    router: Router,
    realm: Option<RealmHandle>,
    handle: Option<SessionHandle>,
    pending_realm: Option<URI>,
}

impl ConnectionSession {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ActorEvent>) {
        let (sink, mut inbox) = mpsc::unbounded_channel::<Message>();
        // `sink` is handed to the realm at Join time; until then it's
        // simply unused, so the first select below also polls it so the
        // receiver is driven even if no realm is ever joined.
        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(ActorEvent::Inbound(message)) => self.handle_inbound(message, &sink).await,
                        Some(ActorEvent::DecodeError(_)) => {
                            let _ = self.send(Message::Abort(ErrorDetails::new(), Reason::ProtocolViolation)).await;
                            self.peer.failed();
                        }
                        Some(ActorEvent::Unresponsive) => {
                            self.peer.failed();
                        }
                        None => break,
                    }
                }
                maybe_msg = inbox.recv() => {
                    if let Some(message) = maybe_msg {
                        let _ = self.send(message).await;
                    }
                }
            }
            if matches!(self.peer.state(), SessionState::Closed | SessionState::Failed) {
                break;
            }
        }
        if let (Some(realm), Some(handle)) = (self.realm.take(), self.handle.take()) {
            realm.leave(handle);
        }
        self.transport.stop().await;
    }

    async fn send(&mut self, message: Message) -> Result<(), Error> {
        let bytes = crate::messages::codec::encode(&message, self.serializer)?;
        self.transport.send(bytes).await
    }

    async fn handle_inbound(&mut self, message: Message, sink: &SessionSink) {
        match message {
            Message::Hello(realm, details) => self.handle_hello(realm, details, sink).await,
            Message::Authenticate(signature, options) => self.handle_authenticate(signature, options, sink).await,
            Message::Goodbye(_details, _reason) => self.handle_goodbye().await,
            _ if !self.peer.is_established() => {
                let _ = self.send(Message::Abort(ErrorDetails::new(), Reason::ProtocolViolation)).await;
                self.peer.failed();
            }
            Message::Subscribe(request_id, options, topic) => self.handle_subscribe(request_id, options, topic).await,
            Message::Unsubscribe(request_id, subscription_id) => self.handle_unsubscribe(request_id, subscription_id).await,
            Message::Publish(request_id, options, topic, args, kwargs) => {
                self.handle_publish(request_id, options, topic, args, kwargs).await
            }
            Message::Register(request_id, options, procedure) => self.handle_register(request_id, options, procedure).await,
            Message::Unregister(request_id, registration_id) => self.handle_unregister(request_id, registration_id).await,
            Message::Call(request_id, options, procedure, args, kwargs) => {
                self.handle_call(request_id, options, procedure, args, kwargs).await
            }
            Message::Cancel(request_id, options) => self.handle_cancel(request_id, options),
            Message::Yield(invocation_id, options, args, kwargs) => self.handle_yield(invocation_id, options, args, kwargs),
            Message::Error(ErrorType::Invocation, invocation_id, _details, reason, args, kwargs) => {
                self.handle_error_from_callee(invocation_id, reason, args, kwargs)
            }
            _ => {
                let _ = self.send(Message::Abort(ErrorDetails::new(), Reason::ProtocolViolation)).await;
                self.peer.failed();
            }
        }
    }

    async fn handle_hello(&mut self, realm: URI, details: HelloDetails, sink: &SessionSink) {
        if self.peer.state() != SessionState::Establishing {
            let _ = self.send(Message::Abort(ErrorDetails::new(), Reason::ProtocolViolation)).await;
            self.peer.failed();
            return;
        }
        match self.router.authenticator.clone() {
            Some(authenticator) => match authenticator.on_hello(&realm, &details) {
                HelloDecision::Welcome(welcome_details) => self.welcome(realm, welcome_details, sink).await,
                HelloDecision::Challenge(method, challenge_details) => {
                    if self.peer.challenge_received().is_ok() {
                        self.pending_realm = Some(realm);
                        let _ = self.send(Message::Challenge(method, challenge_details)).await;
                    }
                }
                HelloDecision::Abort(reason) => {
                    let _ = self.send(Message::Abort(ErrorDetails::new(), reason)).await;
                    let _ = self.peer.aborted();
                }
            },
            None => self.welcome(realm, WelcomeDetails::new(RouterRoles::new()), sink).await,
        }
    }

    async fn handle_authenticate(&mut self, signature: String, options: AuthenticateOptions, sink: &SessionSink) {
        if self.peer.state() != SessionState::Authenticating {
            let _ = self.send(Message::Abort(ErrorDetails::new(), Reason::ProtocolViolation)).await;
            self.peer.failed();
            return;
        }
        let realm = match self.pending_realm.take() {
            Some(realm) => realm,
            None => {
                self.peer.failed();
                return;
            }
        };
        let authenticator = match self.router.authenticator.clone() {
            Some(authenticator) => authenticator,
            None => {
                self.peer.failed();
                return;
            }
        };
        match authenticator.on_authenticate(&signature, &options) {
            AuthDecision::Welcome(welcome_details) => self.welcome(realm, welcome_details, sink).await,
            AuthDecision::Abort(reason) => {
                let _ = self.send(Message::Abort(ErrorDetails::new(), reason)).await;
                let _ = self.peer.aborted();
            }
        }
    }

    async fn welcome(&mut self, realm: URI, details: WelcomeDetails, sink: &SessionSink) {
        let realm_handle = match self.router.realm_handle(&realm.uri) {
            Some(handle) => handle,
            None => {
                let _ = self.send(Message::Abort(ErrorDetails::new(), Reason::NoSuchRealm)).await;
                let _ = self.peer.aborted();
                return;
            }
        };
        let session_id = next_session_id(&mut self.router.session_ids.lock().unwrap());
        let handle = match realm_handle.join(session_id, sink.clone()).await {
            Ok(handle) => handle,
            Err(_) => {
                self.router.session_ids.lock().unwrap().remove(&session_id);
                let _ = self.send(Message::Abort(ErrorDetails::new(), Reason::NoSuchRealm)).await;
                let _ = self.peer.aborted();
                return;
            }
        };
        if self.peer.welcomed().is_ok() {
            self.realm = Some(realm_handle);
            self.handle = Some(handle);
            let _ = self.send(Message::Welcome(session_id, details)).await;
        }
    }

    async fn handle_goodbye(&mut self) {
        if self.peer.begin_leave().is_ok() {
            let _ = self.send(Message::Goodbye(ErrorDetails::new(), Reason::GoodbyeAndOut)).await;
            let _ = self.peer.closed();
        }
    }

    async fn handle_subscribe(&mut self, request_id: ID, options: SubscribeOptions, topic: URI) {
        let (realm, handle) = match self.active_session() {
            Some(pair) => pair,
            None => return,
        };
        match realm.subscribe(handle, topic, options.pattern_match).await {
            Ok(subscription_id) => {
                let _ = self.send(Message::Subscribed(request_id, subscription_id)).await;
            }
            Err(_) => self.fail_session().await,
        }
    }

    async fn handle_unsubscribe(&mut self, request_id: ID, subscription_id: ID) {
        let (realm, handle) = match self.active_session() {
            Some(pair) => pair,
            None => return,
        };
        match realm.unsubscribe(handle, subscription_id).await {
            Ok(true) => {
                let _ = self.send(Message::Unsubscribed(request_id)).await;
            }
            Ok(false) => self.send_error(ErrorType::Unsubscribe, request_id, Reason::NoSuchSubscription).await,
            Err(_) => self.fail_session().await,
        }
    }

    async fn handle_publish(&mut self, request_id: ID, options: PublishOptions, topic: URI, args: Option<List>, kwargs: Option<Dict>) {
        let (realm, handle) = match self.active_session() {
            Some(pair) => pair,
            None => return,
        };
        let acknowledge = options.should_acknowledge();
        match realm.publish(handle, topic, options, args, kwargs).await {
            Ok(publication_id) => {
                if acknowledge {
                    let _ = self.send(Message::Published(request_id, publication_id)).await;
                }
            }
            Err(_) => self.fail_session().await,
        }
    }

    async fn handle_register(&mut self, request_id: ID, options: RegisterOptions, procedure: URI) {
        let (realm, handle) = match self.active_session() {
            Some(pair) => pair,
            None => return,
        };
        match realm.register(handle, procedure, options.pattern_match).await {
            Ok(Ok(registration_id)) => {
                let _ = self.send(Message::Registered(request_id, registration_id)).await;
            }
            Ok(Err(reason)) => self.send_error(ErrorType::Register, request_id, reason).await,
            Err(_) => self.fail_session().await,
        }
    }

    async fn handle_unregister(&mut self, request_id: ID, registration_id: ID) {
        let (realm, handle) = match self.active_session() {
            Some(pair) => pair,
            None => return,
        };
        match realm.unregister(handle, registration_id).await {
            Ok(true) => {
                let _ = self.send(Message::Unregistered(request_id)).await;
            }
            Ok(false) => self.send_error(ErrorType::Unregister, request_id, Reason::NoSuchRegistration).await,
            Err(_) => self.fail_session().await,
        }
    }

    async fn handle_call(&mut self, request_id: ID, options: CallOptions, procedure: URI, args: Option<List>, kwargs: Option<Dict>) {
        let (realm, handle) = match self.active_session() {
            Some(pair) => pair,
            None => return,
        };
        match realm.call(handle, request_id, procedure, options, args, kwargs).await {
            Ok(Ok(_invocation_id)) => {}
            Ok(Err(reason)) => self.send_error(ErrorType::Call, request_id, reason).await,
            Err(_) => self.fail_session().await,
        }
    }

    fn handle_cancel(&mut self, request_id: ID, options: CancelOptions) {
        if let Some((realm, handle)) = self.joined() {
            realm.cancel(handle, request_id, options.mode.unwrap_or(CancelMode::Kill));
        }
    }

    fn handle_yield(&mut self, invocation_id: ID, options: YieldOptions, args: Option<List>, kwargs: Option<Dict>) {
        if let Some((realm, handle)) = self.joined() {
            realm.yield_(handle, invocation_id, options, args, kwargs);
        }
    }

    fn handle_error_from_callee(&mut self, invocation_id: ID, reason: Reason, args: Option<List>, kwargs: Option<Dict>) {
        if let Some((realm, handle)) = self.joined() {
            realm.error_from_callee(handle, invocation_id, reason, args, kwargs);
        }
    }

    fn joined(&self) -> Option<(&RealmHandle, SessionHandle)> {
        match (self.realm.as_ref(), self.handle) {
            (Some(realm), Some(handle)) => Some((realm, handle)),
            _ => None,
        }
    }

    fn active_session(&self) -> Option<(RealmHandle, SessionHandle)> {
        match (self.realm.clone(), self.handle) {
            (Some(realm), Some(handle)) => Some((realm, handle)),
            _ => None,
        }
    }

    async fn send_error(&mut self, error_type: ErrorType, request_id: ID, reason: Reason) {
        let _ = self
            .send(Message::Error(error_type, request_id, Dict::default(), reason, None, None))
            .await;
    }

    async fn fail_session(&mut self) {
        let _ = self.send(Message::Abort(ErrorDetails::new(), Reason::NetworkFailure)).await;
        self.peer.failed();
    }
}
