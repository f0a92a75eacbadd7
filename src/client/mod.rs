//! The client session (spec §4.6): join/leave, subscribe/publish,
//! enroll/call, one actor task per session driving [`Peer`] and
//! [`Transport`].
//!
//! [`Client`] is a cheap, cloneable handle: every operation posts a
//! [`Command`] onto the actor's channel and awaits the reply through a
//! [`CompletionFuture`]. The actor is the session's serializing executor
//! (spec §5) — it alone touches the pending table, the subscription and
//! registration maps, and the transport, so nothing here needs a lock.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::future::poll_fn;
use log::warn;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::time::delay_queue::Key as DelayKey;
use tokio_util::time::DelayQueue;

use crate::error::{Error, MiscErrorKind, TransportErrorKind};
use crate::messages::{
    self, AuthenticateOptions, CallError, CallOptions, CancelMode, CancelOptions, ChallengeDetails,
    Dict, ErrorDetails, ErrorType, EventDetails, HelloDetails, InterruptOptions, InvocationDetails,
    List, MatchingPolicy, Message, PublishOptions, Reason, RegisterOptions, SubscribeOptions,
    WelcomeDetails, YieldOptions,
};
use crate::session::{
    completion_channel, CallChit, CompletionFuture, CompletionHandler, PendingKind, PendingTable,
    Peer, SessionCommand, SessionState,
};
use crate::transport::{HandshakeConfig, Serializer, Transport};
use crate::uri::URI;
use crate::ID;

/// Positional arguments plus keyword arguments, the payload shape every
/// CALL, RESULT, EVENT, and YIELD carries.
pub type CallArgs = (Option<List>, Option<Dict>);

/// What a caller's `call`/`ongoing_call` ultimately resolves with.
pub type CallOutcome = Result<CallArgs, Error>;

/// What a callee's invocation or interrupt handler resolves with; this
/// becomes the YIELD or ERROR sent back to the dealer.
pub type InvocationOutcome = Result<CallArgs, CallError>;

/// A deferred invocation outcome. A handler that can answer immediately
/// still returns one of these, wrapping an already-ready value.
pub type InvocationFuture = Pin<Box<dyn Future<Output = InvocationOutcome> + Send>>;

/// Invoked once per inbound EVENT on a subscription.
pub type EventHandler = Box<dyn FnMut(Option<List>, Option<Dict>, EventDetails) + Send + 'static>;

/// Invoked once per inbound INVOCATION on a registration.
pub type InvocationHandler = Box<
    dyn FnMut(Option<List>, Option<Dict>, InvocationDetails) -> InvocationFuture + Send + 'static,
>;

/// Invoked on an inbound INTERRUPT for an invocation still running.
pub type InterruptHandler =
    Box<dyn FnMut(InterruptOptions) -> InvocationFuture + Send + 'static>;

/// Invoked once per RESULT of an `ongoing_call`, progressive or final.
/// The `bool` is whether more results may still follow.
pub type OngoingCallHandler = Box<dyn FnMut(CallOutcome, bool) + Send + 'static>;

/// Extension point for responding to a CHALLENGE. No concrete
/// authentication scheme ships with this crate; an embedder wires one
/// up (WAMP-CRA, ticket, ...) by implementing this trait and passing it
/// to [`Client::connect`].
pub trait ChallengeResponder: Send {
    fn respond(&mut self, method: &str, details: &ChallengeDetails) -> (String, AuthenticateOptions);
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub topic: URI,
    pub subscription_id: ID,
}

#[derive(Debug, Clone)]
pub struct Registration {
    pub procedure: URI,
    pub registration_id: ID,
}

/// A handle to a running client session. Cloning shares the same actor
/// task; the session's background work ends once every clone is dropped
/// and the actor notices its command channel has closed.
#[derive(Clone)]
pub struct Client {
    commands: mpsc::UnboundedSender<Command>,
    session_commands: mpsc::UnboundedSender<SessionCommand>,
}

impl Client {
    /// Runs the raw-socket handshake over `stream`, then spawns the
    /// session actor. The returned `Client` is usable as soon as this
    /// resolves, but the session isn't established until [`Client::join`]
    /// completes.
    pub async fn connect<S>(
        stream: S,
        handshake: HandshakeConfig,
        heartbeat_interval: Option<Duration>,
        challenge_responder: Option<Box<dyn ChallengeResponder>>,
    ) -> Result<Client, Error>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ActorEvent>();

        // The reader/writer tasks only know the serializer we requested,
        // not necessarily the one the peer agreed to; in practice a
        // rawsocket peer either accepts the requested serializer or
        // refuses the handshake outright, so this is safe in the success
        // case start() returns below.
        let decode_serializer = handshake.serializer;
        let rx_events = event_tx.clone();
        let on_rx = move |payload: Vec<u8>| match messages::codec::decode(&payload, decode_serializer) {
            Ok(message) => {
                let _ = rx_events.send(ActorEvent::Inbound(message));
            }
            Err(e) => {
                let _ = rx_events.send(ActorEvent::DecodeError(e));
            }
        };
        let unresponsive_events = event_tx;
        let on_unresponsive = move || {
            let _ = unresponsive_events.send(ActorEvent::Unresponsive);
        };

        let mut peer = Peer::new();
        peer.connect()?;
        let (transport, agreed) =
            Transport::start(stream, handshake, heartbeat_interval, on_rx, on_unresponsive).await?;
        peer.transport_opened()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel::<Command>();
        let (session_command_tx, session_command_rx) = mpsc::unbounded_channel::<SessionCommand>();

        let session = Session {
            peer,
            transport,
            serializer: agreed.serializer,
            session_id: None,
            join_completion: None,
            leave_completion: None,
            challenge_responder,
            subscriptions: HashMap::new(),
            registrations: HashMap::new(),
            in_flight: HashMap::new(),
            pending: PendingTable::new(),
            call_timeouts: DelayQueue::new(),
            call_timeout_keys: HashMap::new(),
            loopback: command_tx.clone(),
        };

        tokio::spawn(session.run(command_rx, session_command_rx, event_rx));

        Ok(Client {
            commands: command_tx,
            session_commands: session_command_tx,
        })
    }

    /// Sends HELLO for `realm` and waits for WELCOME, ABORT, or a local
    /// authentication failure.
    pub async fn join(&self, realm: URI, details: HelloDetails) -> Result<WelcomeDetails, Error> {
        let (completion, future) = completion_channel();
        self.send_command(Command::Join {
            realm,
            details,
            completion: Box::new(completion),
        })?;
        future.await
    }

    /// Sends GOODBYE and waits for the router's matching reply.
    pub async fn leave(&self, reason: Reason) -> Result<Reason, Error> {
        let (completion, future) = completion_channel();
        self.send_command(Command::Leave {
            reason,
            completion: Box::new(completion),
        })?;
        future.await
    }

    pub async fn subscribe(&self, topic: URI, handler: EventHandler) -> Result<Subscription, Error> {
        self.subscribe_with_pattern(topic, MatchingPolicy::Strict, handler).await
    }

    pub async fn subscribe_with_pattern(
        &self,
        topic: URI,
        policy: MatchingPolicy,
        handler: EventHandler,
    ) -> Result<Subscription, Error> {
        let (completion, future) = completion_channel();
        self.send_command(Command::Subscribe {
            topic,
            policy,
            handler,
            completion: Box::new(completion),
        })?;
        future.await
    }

    pub async fn unsubscribe(&self, subscription: Subscription) -> Result<(), Error> {
        let (completion, future) = completion_channel();
        self.send_command(Command::Unsubscribe {
            subscription_id: subscription.subscription_id,
            completion: Box::new(completion),
        })?;
        future.await
    }

    /// Publishes to `topic`. Resolves with the publication id when
    /// `options` requests acknowledgement, `None` otherwise.
    pub async fn publish(
        &self,
        topic: URI,
        options: PublishOptions,
        args: Option<List>,
        kwargs: Option<Dict>,
    ) -> Result<Option<ID>, Error> {
        if options.should_acknowledge() {
            let (completion, future) = completion_channel::<ID>();
            self.send_command(Command::Publish {
                topic,
                options,
                args,
                kwargs,
                completion: Some(Box::new(completion)),
            })?;
            Ok(Some(future.await?))
        } else {
            self.send_command(Command::Publish {
                topic,
                options,
                args,
                kwargs,
                completion: None,
            })?;
            Ok(None)
        }
    }

    pub async fn enroll(
        &self,
        procedure: URI,
        policy: MatchingPolicy,
        handler: InvocationHandler,
    ) -> Result<Registration, Error> {
        self.enroll_cancellable(procedure, policy, handler, None).await
    }

    /// Like [`Client::enroll`], but also installs a handler for
    /// INTERRUPT, letting the callee answer a cancellation instead of
    /// having it synthesized locally.
    pub async fn enroll_cancellable(
        &self,
        procedure: URI,
        policy: MatchingPolicy,
        handler: InvocationHandler,
        interrupt_handler: Option<InterruptHandler>,
    ) -> Result<Registration, Error> {
        let (completion, future) = completion_channel();
        self.send_command(Command::Enroll {
            procedure,
            policy,
            handler,
            interrupt_handler,
            completion: Box::new(completion),
        })?;
        future.await
    }

    pub async fn unregister(&self, registration: Registration) -> Result<(), Error> {
        let (completion, future) = completion_channel();
        self.send_command(Command::Unregister {
            registration_id: registration.registration_id,
            completion: Box::new(completion),
        })?;
        future.await
    }

    /// Issues a CALL and returns a cancellable chit alongside a future
    /// for its single, final outcome.
    pub async fn call(
        &self,
        procedure: URI,
        options: CallOptions,
        args: Option<List>,
        kwargs: Option<Dict>,
    ) -> Result<(CallChit, CompletionFuture<CallArgs>), Error> {
        let (completion, future) = completion_channel::<CallArgs>();
        let outcome: Box<dyn CallOutcomeHandler> = Box::new(OneShotCall {
            completion: Some(Box::new(completion)),
        });
        let (chit_tx, chit_rx) = oneshot::channel();
        self.send_command(Command::Call {
            procedure,
            options,
            args,
            kwargs,
            outcome,
            kind: PendingKind::OneShot,
            chit_reply: chit_tx,
        })?;
        let request_id = chit_rx
            .await
            .map_err(|_| Error::misc(MiscErrorKind::Abandoned))?;
        Ok((CallChit::new(request_id, self.session_commands.clone()), future))
    }

    /// Issues a CALL with `receive_progress` set, invoking `handler` for
    /// every RESULT (progressive or final) instead of resolving once.
    pub async fn ongoing_call(
        &self,
        procedure: URI,
        mut options: CallOptions,
        args: Option<List>,
        kwargs: Option<Dict>,
        handler: OngoingCallHandler,
    ) -> Result<CallChit, Error> {
        options.receive_progress = true;
        let outcome: Box<dyn CallOutcomeHandler> = Box::new(ProgressiveCall { handler });
        let (chit_tx, chit_rx) = oneshot::channel();
        self.send_command(Command::Call {
            procedure,
            options,
            args,
            kwargs,
            outcome,
            kind: PendingKind::Progressive,
            chit_reply: chit_tx,
        })?;
        let request_id = chit_rx
            .await
            .map_err(|_| Error::misc(MiscErrorKind::Abandoned))?;
        Ok(CallChit::new(request_id, self.session_commands.clone()))
    }

    fn send_command(&self, command: Command) -> Result<(), Error> {
        self.commands
            .send(command)
            .map_err(|_| Error::misc(MiscErrorKind::InvalidState))
    }
}

/// Resolved, possibly more than once, as a CALL's RESULTs arrive. Unlike
/// [`CompletionHandler`], which consumes itself, this is invoked through
/// `&mut self` so a progressive call's handler survives its earlier,
/// non-final invocations.
trait CallOutcomeHandler: Send {
    fn on_result(&mut self, outcome: CallOutcome, progress: bool);
}

/// Adapts a one-shot [`CompletionHandler`] for `call()`: the first
/// (and only) RESULT/ERROR completes it.
struct OneShotCall {
    completion: Option<Box<dyn CompletionHandler<CallArgs>>>,
}

impl CallOutcomeHandler for OneShotCall {
    fn on_result(&mut self, outcome: CallOutcome, _progress: bool) {
        if let Some(completion) = self.completion.take() {
            completion.complete(outcome);
        }
    }
}

/// Adapts an [`OngoingCallHandler`] closure for `ongoing_call()`: every
/// RESULT is delivered, progressive or not.
struct ProgressiveCall {
    handler: OngoingCallHandler,
}

impl CallOutcomeHandler for ProgressiveCall {
    fn on_result(&mut self, outcome: CallOutcome, progress: bool) {
        (self.handler)(outcome, progress);
    }
}

/// Every outstanding request a session actor is waiting on a correlated
/// reply for, keyed by request id in its [`PendingTable`].
enum Pending {
    Subscribe {
        completion: Box<dyn CompletionHandler<Subscription>>,
        topic: URI,
        handler: EventHandler,
    },
    Unsubscribe {
        completion: Box<dyn CompletionHandler<()>>,
        subscription_id: ID,
    },
    Publish(Box<dyn CompletionHandler<ID>>),
    Enroll {
        completion: Box<dyn CompletionHandler<Registration>>,
        procedure: URI,
        handler: InvocationHandler,
        interrupt_handler: Option<InterruptHandler>,
    },
    Unregister {
        completion: Box<dyn CompletionHandler<()>>,
        registration_id: ID,
    },
    Call(Box<dyn CallOutcomeHandler>),
}

/// A request posted onto the session actor's main channel, either from
/// a public `Client` method or as a loopback from a finished invocation
/// task.
enum Command {
    Join {
        realm: URI,
        details: HelloDetails,
        completion: Box<dyn CompletionHandler<WelcomeDetails>>,
    },
    Leave {
        reason: Reason,
        completion: Box<dyn CompletionHandler<Reason>>,
    },
    Subscribe {
        topic: URI,
        policy: MatchingPolicy,
        handler: EventHandler,
        completion: Box<dyn CompletionHandler<Subscription>>,
    },
    Unsubscribe {
        subscription_id: ID,
        completion: Box<dyn CompletionHandler<()>>,
    },
    Publish {
        topic: URI,
        options: PublishOptions,
        args: Option<List>,
        kwargs: Option<Dict>,
        completion: Option<Box<dyn CompletionHandler<ID>>>,
    },
    Enroll {
        procedure: URI,
        policy: MatchingPolicy,
        handler: InvocationHandler,
        interrupt_handler: Option<InterruptHandler>,
        completion: Box<dyn CompletionHandler<Registration>>,
    },
    Unregister {
        registration_id: ID,
        completion: Box<dyn CompletionHandler<()>>,
    },
    Call {
        procedure: URI,
        options: CallOptions,
        args: Option<List>,
        kwargs: Option<Dict>,
        outcome: Box<dyn CallOutcomeHandler>,
        kind: PendingKind,
        chit_reply: oneshot::Sender<ID>,
    },
    InvocationFinished {
        invocation_id: ID,
        outcome: InvocationOutcome,
    },
}

/// What the transport's background tasks forward to the session actor.
enum ActorEvent {
    Inbound(Message),
    DecodeError(Error),
    Unresponsive,
}

/// The session actor: owns the peer state machine, the transport, and
/// every table a running session needs. Nothing outside this struct
/// touches any of it, so none of it needs a lock.
struct Session {
    peer: Peer,
    transport: Transport,
    serializer: Serializer,
    session_id: Option<ID>,
    join_completion: Option<Box<dyn CompletionHandler<WelcomeDetails>>>,
    leave_completion: Option<Box<dyn CompletionHandler<Reason>>>,
    challenge_responder: Option<Box<dyn ChallengeResponder>>,
    subscriptions: HashMap<ID, EventHandler>,
    registrations: HashMap<ID, (InvocationHandler, Option<InterruptHandler>)>,
    in_flight: HashMap<ID, (ID, JoinHandle<()>)>,
    pending: PendingTable<Pending>,
    call_timeouts: DelayQueue<ID>,
    call_timeout_keys: HashMap<ID, DelayKey>,
    loopback: mpsc::UnboundedSender<Command>,
}

impl Session {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut session_commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut events: mpsc::UnboundedReceiver<ActorEvent>,
    ) {
        loop {
            tokio::select! {
                maybe_cmd = commands.recv() => {
                    match maybe_cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                maybe_session_cmd = session_commands.recv() => {
                    if let Some(cmd) = maybe_session_cmd {
                        self.handle_session_command(cmd).await;
                    }
                }
                maybe_event = events.recv() => {
                    match maybe_event {
                        Some(ActorEvent::Inbound(message)) => self.handle_inbound(message).await,
                        Some(ActorEvent::DecodeError(e)) => self.fail_session(e).await,
                        Some(ActorEvent::Unresponsive) => {
                            self.fail_session(Error::transport(TransportErrorKind::Unresponsive)).await;
                        }
                        None => break,
                    }
                }
                Some(expired) = poll_fn(|cx| self.call_timeouts.poll_expired(cx)) => {
                    if let Ok(expired) = expired {
                        let request_id = expired.into_inner();
                        self.call_timeout_keys.remove(&request_id);
                        self.handle_call_timeout(request_id).await;
                    }
                }
            }
        }
        self.transport.stop().await;
    }

    async fn send(&mut self, message: Message) -> Result<(), Error> {
        let bytes = messages::codec::encode(&message, self.serializer)?;
        self.transport.send(bytes).await
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Join { realm, details, completion } => {
                self.join_completion = Some(completion);
                let _ = self.send(Message::Hello(realm, details)).await;
            }
            Command::Leave { reason, completion } => {
                if self.peer.begin_leave().is_ok() {
                    self.leave_completion = Some(completion);
                    let _ = self.send(Message::Goodbye(ErrorDetails::new(), reason)).await;
                } else {
                    completion.complete(Err(Error::misc(MiscErrorKind::InvalidState)));
                }
            }
            Command::Subscribe { topic, policy, handler, completion } => {
                let request_id = self.peer.next_request_id();
                let mut options = SubscribeOptions::new();
                options.pattern_match = policy;
                self.pending.insert(
                    request_id,
                    PendingKind::OneShot,
                    Pending::Subscribe { completion, topic: topic.clone(), handler },
                );
                let _ = self.send(Message::Subscribe(request_id, options, topic)).await;
            }
            Command::Unsubscribe { subscription_id, completion } => {
                let request_id = self.peer.next_request_id();
                self.pending.insert(
                    request_id,
                    PendingKind::OneShot,
                    Pending::Unsubscribe { completion, subscription_id },
                );
                let _ = self.send(Message::Unsubscribe(request_id, subscription_id)).await;
            }
            Command::Publish { topic, options, args, kwargs, completion } => {
                let request_id = self.peer.next_request_id();
                match completion {
                    Some(completion) => {
                        self.pending.insert(request_id, PendingKind::OneShot, Pending::Publish(completion));
                    }
                    None => self.peer.release_request_id(request_id),
                }
                let _ = self.send(Message::Publish(request_id, options, topic, args, kwargs)).await;
            }
            Command::Enroll { procedure, policy, handler, interrupt_handler, completion } => {
                let request_id = self.peer.next_request_id();
                let mut options = RegisterOptions::new();
                options.pattern_match = policy;
                self.pending.insert(
                    request_id,
                    PendingKind::OneShot,
                    Pending::Enroll { completion, procedure: procedure.clone(), handler, interrupt_handler },
                );
                let _ = self.send(Message::Register(request_id, options, procedure)).await;
            }
            Command::Unregister { registration_id, completion } => {
                let request_id = self.peer.next_request_id();
                self.pending.insert(
                    request_id,
                    PendingKind::OneShot,
                    Pending::Unregister { completion, registration_id },
                );
                let _ = self.send(Message::Unregister(request_id, registration_id)).await;
            }
            Command::Call { procedure, options, args, kwargs, outcome, kind, chit_reply } => {
                let request_id = self.peer.next_request_id();
                self.pending.insert(request_id, kind, Pending::Call(outcome));
                if let Some(timeout_ms) = options.timeout {
                    let key = self.call_timeouts.insert(request_id, Duration::from_millis(timeout_ms));
                    self.call_timeout_keys.insert(request_id, key);
                }
                let _ = chit_reply.send(request_id);
                let _ = self.send(Message::Call(request_id, options, procedure, args, kwargs)).await;
            }
            Command::InvocationFinished { invocation_id, outcome } => {
                self.finish_invocation(invocation_id, outcome).await;
            }
        }
    }

    async fn handle_session_command(&mut self, command: SessionCommand) {
        let SessionCommand::Cancel(request_id, mode) = command;
        if !self.pending.contains(request_id) {
            return;
        }
        let _ = self.send(Message::Cancel(request_id, CancelOptions::new(mode))).await;
        if mode != CancelMode::Kill {
            // kill_no_wait/skip: the caller gives up on a reply now
            // instead of waiting for the dealer's eventual ERROR.
            if let Some(Pending::Call(mut handler)) = self.pending.complete(request_id) {
                handler.on_result(Err(Error::wamp(Reason::Cancelled, None, None)), false);
            }
            self.peer.release_request_id(request_id);
            self.cancel_call_timeout(request_id);
        }
    }

    async fn handle_call_timeout(&mut self, request_id: ID) {
        if let Some(Pending::Call(mut handler)) = self.pending.complete(request_id) {
            handler.on_result(Err(Error::wamp(Reason::Cancelled, None, None)), false);
        }
        self.peer.release_request_id(request_id);
        let _ = self.send(Message::Cancel(request_id, CancelOptions::new(CancelMode::Kill))).await;
    }

    fn cancel_call_timeout(&mut self, request_id: ID) {
        if let Some(key) = self.call_timeout_keys.remove(&request_id) {
            self.call_timeouts.remove(&key);
        }
    }

    async fn handle_inbound(&mut self, message: Message) {
        match message {
            Message::Welcome(session_id, details) => {
                if self.peer.welcomed().is_ok() {
                    self.session_id = Some(session_id);
                    if let Some(completion) = self.join_completion.take() {
                        completion.complete(Ok(details));
                    }
                }
            }
            Message::Abort(_details, reason) => {
                let _ = self.peer.aborted();
                if let Some(completion) = self.join_completion.take() {
                    completion.complete(Err(Error::wamp(reason, None, None)));
                }
            }
            Message::Challenge(method, details) => {
                if self.peer.challenge_received().is_ok() {
                    match self.challenge_responder.as_mut() {
                        Some(responder) => {
                            let (signature, options) = responder.respond(&method, &details);
                            let _ = self.send(Message::Authenticate(signature, options)).await;
                        }
                        None => {
                            if let Some(completion) = self.join_completion.take() {
                                completion.complete(Err(Error::wamp(Reason::AuthenticationFailed, None, None)));
                            }
                            let _ = self
                                .send(Message::Abort(ErrorDetails::new(), Reason::AuthenticationFailed))
                                .await;
                            self.peer.failed();
                        }
                    }
                }
            }
            Message::Goodbye(_details, reason) => {
                if self.peer.state() == SessionState::ShuttingDown {
                    let _ = self.peer.closed();
                    if let Some(completion) = self.leave_completion.take() {
                        completion.complete(Ok(reason));
                    }
                } else {
                    let _ = self.send(Message::Goodbye(ErrorDetails::new(), Reason::GoodbyeAndOut)).await;
                    self.fail_session(Error::wamp(reason, None, None)).await;
                }
            }
            Message::Error(_error_type, request_id, _details, reason, args, kwargs) => {
                match self.pending.complete(request_id) {
                    Some(Pending::Subscribe { completion, .. }) => {
                        completion.complete(Err(Error::wamp(reason, args, kwargs)))
                    }
                    Some(Pending::Unsubscribe { completion, .. }) => {
                        completion.complete(Err(Error::wamp(reason, args, kwargs)))
                    }
                    Some(Pending::Publish(completion)) => {
                        completion.complete(Err(Error::wamp(reason, args, kwargs)))
                    }
                    Some(Pending::Enroll { completion, .. }) => {
                        completion.complete(Err(Error::wamp(reason, args, kwargs)))
                    }
                    Some(Pending::Unregister { completion, .. }) => {
                        completion.complete(Err(Error::wamp(reason, args, kwargs)))
                    }
                    Some(Pending::Call(mut handler)) => {
                        handler.on_result(Err(Error::wamp(reason, args, kwargs)), false)
                    }
                    None => {}
                }
                self.peer.release_request_id(request_id);
                self.cancel_call_timeout(request_id);
            }
            Message::Subscribed(request_id, subscription_id) => {
                if let Some(Pending::Subscribe { completion, topic, handler }) = self.pending.complete(request_id) {
                    self.subscriptions.insert(subscription_id, handler);
                    completion.complete(Ok(Subscription { topic, subscription_id }));
                }
                self.peer.release_request_id(request_id);
            }
            Message::Unsubscribed(request_id) => {
                if let Some(Pending::Unsubscribe { completion, subscription_id }) = self.pending.complete(request_id) {
                    self.subscriptions.remove(&subscription_id);
                    completion.complete(Ok(()));
                }
                self.peer.release_request_id(request_id);
            }
            Message::Published(request_id, publication_id) => {
                if let Some(Pending::Publish(completion)) = self.pending.complete(request_id) {
                    completion.complete(Ok(publication_id));
                }
                self.peer.release_request_id(request_id);
            }
            Message::Event(subscription_id, _publication_id, details, args, kwargs) => {
                if let Some(handler) = self.subscriptions.get_mut(&subscription_id) {
                    (handler)(args, kwargs, details);
                }
            }
            Message::Registered(request_id, registration_id) => {
                if let Some(Pending::Enroll { completion, procedure, handler, interrupt_handler }) =
                    self.pending.complete(request_id)
                {
                    self.registrations.insert(registration_id, (handler, interrupt_handler));
                    completion.complete(Ok(Registration { procedure, registration_id }));
                }
                self.peer.release_request_id(request_id);
            }
            Message::Unregistered(request_id) => {
                if let Some(Pending::Unregister { completion, registration_id }) = self.pending.complete(request_id) {
                    self.registrations.remove(&registration_id);
                    completion.complete(Ok(()));
                }
                self.peer.release_request_id(request_id);
            }
            Message::Result(request_id, details, args, kwargs) => {
                let progress = details.progress;
                if let Some(Pending::Call(handler)) = self.pending.get_mut(request_id) {
                    handler.on_result(Ok((args, kwargs)), progress);
                }
                self.pending.retain_progressive(request_id, progress);
                if !self.pending.contains(request_id) {
                    self.peer.release_request_id(request_id);
                    self.cancel_call_timeout(request_id);
                }
            }
            Message::Invocation(invocation_id, registration_id, details, args, kwargs) => {
                match self.registrations.get_mut(&registration_id) {
                    Some((handler, _)) => {
                        let fut = (handler)(args, kwargs, details);
                        let loopback = self.loopback.clone();
                        let task = tokio::spawn(async move {
                            let outcome = fut.await;
                            let _ = loopback.send(Command::InvocationFinished { invocation_id, outcome });
                        });
                        self.in_flight.insert(invocation_id, (registration_id, task));
                    }
                    None => {
                        let _ = self
                            .send(Message::Error(
                                ErrorType::Invocation,
                                invocation_id,
                                Dict::new(),
                                Reason::NoSuchRegistration,
                                None,
                                None,
                            ))
                            .await;
                    }
                }
            }
            Message::Interrupt(invocation_id, options) => {
                self.handle_interrupt(invocation_id, options).await;
            }
            Message::Hello(..)
            | Message::Authenticate(..)
            | Message::Subscribe(..)
            | Message::Unsubscribe(..)
            | Message::Publish(..)
            | Message::Register(..)
            | Message::Unregister(..)
            | Message::Call(..)
            | Message::Cancel(..)
            | Message::Yield(..) => {
                warn!("received a router-only message on the client role");
                self.fail_session(Error::wamp(Reason::ProtocolViolation, None, None)).await;
            }
        }
    }

    async fn handle_interrupt(&mut self, invocation_id: ID, options: InterruptOptions) {
        let registration_id = match self.in_flight.get(&invocation_id) {
            Some((registration_id, _)) => *registration_id,
            None => return,
        };
        if let Some((_, task)) = self.in_flight.get(&invocation_id) {
            task.abort();
        }
        let interrupt_handler = self
            .registrations
            .get_mut(&registration_id)
            .and_then(|(_, interrupt_handler)| interrupt_handler.as_mut());
        match interrupt_handler {
            Some(handler) => {
                let fut = (handler)(options);
                let loopback = self.loopback.clone();
                tokio::spawn(async move {
                    let outcome = fut.await;
                    let _ = loopback.send(Command::InvocationFinished { invocation_id, outcome });
                });
            }
            None => {
                self.finish_invocation(invocation_id, Err(CallError::new(Reason::Cancelled, None, None)))
                    .await;
            }
        }
    }

    async fn finish_invocation(&mut self, invocation_id: ID, outcome: InvocationOutcome) {
        if self.in_flight.remove(&invocation_id).is_none() {
            // Already answered, via the immediate-cancel fast path above.
            return;
        }
        let message = match outcome {
            Ok((args, kwargs)) => Message::Yield(invocation_id, YieldOptions::new(), args, kwargs),
            Err(call_error) => {
                let (reason, args, kwargs) = call_error.into_tuple();
                Message::Error(ErrorType::Invocation, invocation_id, Dict::new(), reason, args, kwargs)
            }
        };
        let _ = self.send(message).await;
    }

    /// Fails the session: every pending request and in-flight
    /// invocation resolves with `error`, and the peer state machine
    /// moves to `failed`.
    async fn fail_session(&mut self, error: Error) {
        self.peer.failed();
        for (_, entry) in self.pending.drain() {
            match entry {
                Pending::Subscribe { completion, .. } => completion.complete(Err(error.clone())),
                Pending::Unsubscribe { completion, .. } => completion.complete(Err(error.clone())),
                Pending::Publish(completion) => completion.complete(Err(error.clone())),
                Pending::Enroll { completion, .. } => completion.complete(Err(error.clone())),
                Pending::Unregister { completion, .. } => completion.complete(Err(error.clone())),
                Pending::Call(mut handler) => handler.on_result(Err(error.clone()), false),
            }
        }
        if let Some(completion) = self.join_completion.take() {
            completion.complete(Err(error.clone()));
        }
        if let Some(completion) = self.leave_completion.take() {
            completion.complete(Err(error));
        }
        for (_, (_, task)) in self.in_flight.drain() {
            task.abort();
        }
        self.subscriptions.clear();
        self.registrations.clear();
    }
}
