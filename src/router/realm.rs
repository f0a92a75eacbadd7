//! The routing namespace a session joins (spec §4.7, §9 design notes).
//!
//! A `Realm` owns the broker, the dealer, and the table of sessions
//! currently joined to it. Sessions are referenced from the broker and
//! dealer's tables by [`SessionHandle`] rather than by a direct
//! connection handle, breaking the realm/session pointer cycle the
//! original router had: a handle that outlives its session is simply a
//! stale slab key, detected by its generation not matching the slot's
//! current occupant, instead of a dangling pointer.
//!
//! `Realm` itself is a plain struct with no internal concurrency; it is
//! meant to be owned by a single task (its "lane", per spec §5) that
//! drains a command channel fed by every joined session's connection
//! task. That wiring lives in [`super`].

use slab::Slab;

use crate::messages::{
    CancelMode, CallOptions, Dict, ErrorType, InterruptOptions, InvocationDetails, List,
    MatchingPolicy, Message, PublishOptions, Reason, ResultDetails, YieldOptions, URI,
};
use crate::ID;

use super::broker::Broker;
use super::dealer::{CancelOutcome, Dealer};

/// A stable reference to a joined session: a slab index plus a
/// generation counter, so a handle captured by the broker or dealer
/// before a session leaves can never alias a later, unrelated session
/// that reuses the same slab slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    key: usize,
    generation: u64,
    session_id: ID,
}

impl SessionHandle {
    /// The WAMP session id this handle refers to, the value eligibility
    /// and exclusion lists on Publish/Call options are expressed in.
    pub fn raw_id(&self) -> ID {
        self.session_id
    }
}

/// Where a realm forwards messages addressed to one of its sessions.
/// The connection task on the other end owns the transport and simply
/// serializes and writes whatever arrives here.
pub type SessionSink = tokio::sync::mpsc::UnboundedSender<Message>;

struct SessionSlot {
    generation: u64,
    session_id: ID,
    sink: SessionSink,
}

/// One realm's session table plus its broker and dealer.
pub struct Realm {
    sessions: Slab<SessionSlot>,
    generation: u64,
    broker: Broker,
    dealer: Dealer,
}

impl Realm {
    pub fn new() -> Realm {
        Realm {
            sessions: Slab::new(),
            generation: 0,
            broker: Broker::new(),
            dealer: Dealer::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Admits a newly welcomed session, returning the handle its
    /// connection task should use for every subsequent realm operation.
    pub fn join(&mut self, session_id: ID, sink: SessionSink) -> SessionHandle {
        self.generation += 1;
        let generation = self.generation;
        let key = self.sessions.insert(SessionSlot {
            generation,
            session_id,
            sink,
        });
        SessionHandle {
            key,
            generation,
            session_id,
        }
    }

    fn slot(&self, handle: SessionHandle) -> Option<&SessionSlot> {
        self.sessions
            .get(handle.key)
            .filter(|slot| slot.generation == handle.generation)
    }

    fn send_to(&self, handle: SessionHandle, message: Message) {
        if let Some(slot) = self.slot(handle) {
            let _ = slot.sink.send(message);
        }
    }

    /// Drops `handle` from the session table and purges its
    /// subscriptions, registrations, and in-flight call roles from the
    /// broker and dealer (spec §4.7's session-leave contract).
    pub fn leave(&mut self, handle: SessionHandle) {
        if self.slot(handle).is_some() {
            self.sessions.remove(handle.key);
        }
        self.broker.purge_session(handle);
        let (caller_notifications, callee_interrupts) = self.dealer.purge_session(handle);
        for (caller, request_id) in caller_notifications {
            self.send_to(
                caller,
                Message::Error(
                    ErrorType::Call,
                    request_id,
                    Default::default(),
                    Reason::Cancelled,
                    None,
                    None,
                ),
            );
        }
        for (callee, invocation_id) in callee_interrupts {
            self.send_to(
                callee,
                Message::Interrupt(invocation_id, InterruptOptions::new(CancelMode::Kill)),
            );
        }
    }

    pub fn subscribe(&mut self, session: SessionHandle, topic: URI, policy: MatchingPolicy) -> ID {
        self.broker.subscribe(session, topic, policy)
    }

    pub fn unsubscribe(&mut self, session: SessionHandle, subscription_id: ID) -> bool {
        self.broker.unsubscribe(session, subscription_id)
    }

    /// Computes deliveries and fans the event out, returning the
    /// publication id (always allocated, used for the Published ack
    /// only when the publisher asked for one).
    pub fn publish(
        &mut self,
        publisher: SessionHandle,
        topic: URI,
        options: PublishOptions,
        args: Option<List>,
        kwargs: Option<Dict>,
    ) -> ID {
        let publication_id = self.broker.next_publication_id();
        for delivery in self.broker.deliveries(publisher, &topic, &options) {
            let details = Broker::event_details(delivery.disclosed_topic);
            self.send_to(
                delivery.session,
                Message::Event(delivery.subscription_id, publication_id, details, args.clone(), kwargs.clone()),
            );
        }
        publication_id
    }

    pub fn register(&mut self, session: SessionHandle, procedure: URI, policy: MatchingPolicy) -> Result<ID, Reason> {
        self.dealer.register(session, procedure, policy)
    }

    pub fn unregister(&mut self, session: SessionHandle, registration_id: ID) -> bool {
        self.dealer.unregister(session, registration_id)
    }

    /// Resolves `procedure` to a registered callee and forwards an
    /// Invocation, or reports why it couldn't.
    pub fn call(
        &mut self,
        caller: SessionHandle,
        request_id: ID,
        procedure: URI,
        _options: &CallOptions,
        args: Option<List>,
        kwargs: Option<Dict>,
    ) -> Result<ID, Reason> {
        let (callee, registration_id, invocation_id) = self.dealer.call(caller, request_id, &procedure)?;
        let details = InvocationDetails {
            procedure: Some(procedure),
        };
        self.send_to(callee, Message::Invocation(invocation_id, registration_id, details, args, kwargs));
        Ok(invocation_id)
    }

    pub fn yield_result(
        &mut self,
        callee: SessionHandle,
        invocation_id: ID,
        options: YieldOptions,
        args: Option<List>,
        kwargs: Option<Dict>,
    ) {
        if let Some((caller, request_id)) = self.dealer.yield_(callee, invocation_id, options.progress) {
            let details = if options.progress {
                ResultDetails::new_progressive()
            } else {
                ResultDetails::new()
            };
            self.send_to(caller, Message::Result(request_id, details, args, kwargs));
        }
    }

    pub fn error_from_callee(
        &mut self,
        callee: SessionHandle,
        invocation_id: ID,
        reason: Reason,
        args: Option<List>,
        kwargs: Option<Dict>,
    ) {
        if let Some((caller, request_id)) = self.dealer.error_from_callee(callee, invocation_id) {
            self.send_to(
                caller,
                Message::Error(ErrorType::Call, request_id, Default::default(), reason, args, kwargs),
            );
        }
    }

    /// A caller's explicit Cancel. Routes Interrupt to the callee unless
    /// `mode` is `skip`, per spec §4.5's cancel-mode table.
    pub fn cancel(&mut self, caller: SessionHandle, request_id: ID, mode: CancelMode) {
        if let Some(CancelOutcome { callee, invocation_id, send_interrupt }) =
            self.dealer.cancel(caller, request_id, mode)
        {
            if send_interrupt {
                self.send_to(callee, Message::Interrupt(invocation_id, InterruptOptions::new(mode)));
            }
        }
    }

    /// A caller-supplied timeout expired on the realm's own lane
    /// (independent of whatever timeout the caller's own session keeps,
    /// per spec §4.5's "the dealer arms a timer" wording). Synthesizes a
    /// kill-mode Cancel addressed to the callee.
    pub fn timeout_call(&mut self, invocation_id: ID) {
        if let Some(callee) = self.dealer.callee_for(invocation_id) {
            self.send_to(callee, Message::Interrupt(invocation_id, InterruptOptions::new(CancelMode::Kill)));
        }
    }
}

impl Default for Realm {
    fn default() -> Realm {
        Realm::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::messages::CallOptions;
    use tokio::sync::mpsc;

    fn joined(realm: &mut Realm, session_id: ID) -> (SessionHandle, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (realm.join(session_id, tx), rx)
    }

    #[test]
    fn join_marks_the_realm_non_empty_and_leave_empties_it_again() {
        let mut realm = Realm::new();
        assert!(realm.is_empty());
        let (handle, _rx) = joined(&mut realm, 1);
        assert!(!realm.is_empty());
        realm.leave(handle);
        assert!(realm.is_empty());
    }

    #[test]
    fn leaving_purges_the_departed_sessions_subscription() {
        let mut realm = Realm::new();
        let (publisher, _publisher_rx) = joined(&mut realm, 1);
        let (subscriber, mut subscriber_rx) = joined(&mut realm, 2);
        realm.subscribe(subscriber, URI::new("ca.dal.topic"), MatchingPolicy::Strict);

        realm.leave(subscriber);
        realm.publish(publisher, URI::new("ca.dal.topic"), PublishOptions::new(false), None, None);
        assert!(subscriber_rx.try_recv().is_err());
    }

    #[test]
    fn leaving_callee_causes_caller_to_be_notified_with_cancelled() {
        let mut realm = Realm::new();
        let (callee, mut callee_rx) = joined(&mut realm, 1);
        let (caller, mut caller_rx) = joined(&mut realm, 2);

        realm.register(callee, URI::new("ca.dal.rpc"), MatchingPolicy::Strict).unwrap();
        realm
            .call(caller, 7, URI::new("ca.dal.rpc"), &CallOptions::new(), None, None)
            .unwrap();
        // drain the Invocation the callee would have received.
        assert!(matches!(callee_rx.try_recv(), Ok(Message::Invocation(..))));

        realm.leave(callee);

        match caller_rx.try_recv() {
            Ok(Message::Error(ErrorType::Call, request_id, _, Reason::Cancelled, None, None)) => {
                assert_eq!(request_id, 7);
            }
            other => panic!("expected a cancelled call error, got {:?}", other),
        }
    }

    #[test]
    fn subscribe_then_publish_delivers_an_event_with_the_publication_id() {
        let mut realm = Realm::new();
        let (publisher, _publisher_rx) = joined(&mut realm, 1);
        let (subscriber, mut subscriber_rx) = joined(&mut realm, 2);

        realm.subscribe(subscriber, URI::new("ca.dal.topic"), MatchingPolicy::Strict);
        let publication_id = realm.publish(
            publisher,
            URI::new("ca.dal.topic"),
            PublishOptions::new(false),
            Some(vec![crate::value::Value::Int(1)]),
            None,
        );

        match subscriber_rx.try_recv() {
            Ok(Message::Event(_subscription_id, received_publication_id, _, args, _)) => {
                assert_eq!(received_publication_id, publication_id);
                assert_eq!(args, Some(vec![crate::value::Value::Int(1)]));
            }
            other => panic!("expected an event, got {:?}", other),
        }
    }

    #[test]
    fn stale_handle_after_session_table_reuse_does_not_alias_the_new_session() {
        let mut realm = Realm::new();
        let (first, _rx) = joined(&mut realm, 1);
        realm.leave(first);
        // A fresh join may reuse the same slab slot, but never the same
        // generation. Publishing under the stale handle must not be
        // mistaken for a publish from the new session reusing that slot
        // (which would wrongly exclude it via `exclude_me`).
        let (second, mut second_rx) = joined(&mut realm, 2);
        realm.subscribe(second, URI::new("ca.dal.topic"), MatchingPolicy::Strict);
        realm.publish(first, URI::new("ca.dal.topic"), PublishOptions::new(false), None, None);
        assert!(matches!(second_rx.try_recv(), Ok(Message::Event(..))));
    }
}
