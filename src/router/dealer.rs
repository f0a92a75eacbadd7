//! The dealer half of a realm (spec §4.7): a URI index from procedure
//! patterns to a single registered callee, plus an in-flight call
//! table keyed by invocation id.
//!
//! The basic profile allows at most one registration per procedure (a
//! second `register` for the same URI is `procedure_already_exists`),
//! so unlike the broker's subscription trie each trie slot holds one
//! [`Registration`] rather than a list.

use std::collections::HashMap;

use rand::Rng;

use crate::messages::{CancelMode, MatchingPolicy, Reason, URI};
use crate::trie::TokenTrie;
use crate::ID;

use super::realm::SessionHandle;

#[derive(Clone, Copy)]
struct Registration {
    session: SessionHandle,
    registration_id: ID,
}

#[derive(Clone, Copy)]
struct InFlightCall {
    caller: SessionHandle,
    request_id: ID,
    callee: SessionHandle,
}

/// What a caller's Cancel should do to the callee, decided by
/// [`Dealer::cancel`] from the requested [`CancelMode`].
pub struct CancelOutcome {
    pub callee: SessionHandle,
    pub invocation_id: ID,
    pub send_interrupt: bool,
}

/// One realm's registration index and in-flight call table.
pub struct Dealer {
    registrations: TokenTrie<Registration>,
    registration_ids: HashMap<ID, (URI, MatchingPolicy)>,
    calls: HashMap<ID, InFlightCall>,
    calls_by_request: HashMap<(ID, ID), ID>,
}

impl Dealer {
    pub fn new() -> Dealer {
        Dealer {
            registrations: TokenTrie::new(),
            registration_ids: HashMap::new(),
            calls: HashMap::new(),
            calls_by_request: HashMap::new(),
        }
    }

    /// Registers `session` as the callee for `procedure`, failing with
    /// `procedure_already_exists` if another registration already
    /// covers it under `policy`'s slot.
    pub fn register(&mut self, session: SessionHandle, procedure: URI, policy: MatchingPolicy) -> Result<ID, Reason> {
        let key = procedure.split();
        let exists = match policy {
            MatchingPolicy::Prefix => self.registrations.find_prefix(&key).is_some(),
            MatchingPolicy::Strict | MatchingPolicy::Wildcard => self.registrations.find(&key).is_some(),
        };
        if exists {
            return Err(Reason::ProcedureAlreadyExists);
        }
        let registration_id = self.next_id();
        let entry = Registration { session, registration_id };
        let inserted = match policy {
            MatchingPolicy::Prefix => self.registrations.insert_prefix(&key, entry),
            MatchingPolicy::Strict | MatchingPolicy::Wildcard => self.registrations.insert(&key, entry),
        };
        debug_assert!(inserted);
        self.registration_ids.insert(registration_id, (procedure, policy));
        Ok(registration_id)
    }

    pub fn unregister(&mut self, session: SessionHandle, registration_id: ID) -> bool {
        let (procedure, policy) = match self.registration_ids.remove(&registration_id) {
            Some(entry) => entry,
            None => return false,
        };
        let key = procedure.split();
        let owned = match policy {
            MatchingPolicy::Prefix => self.registrations.find_prefix(&key).map(|r| r.session == session).unwrap_or(false),
            MatchingPolicy::Strict | MatchingPolicy::Wildcard => self.registrations.find(&key).map(|r| r.session == session).unwrap_or(false),
        };
        if !owned {
            self.registration_ids.insert(registration_id, (procedure, policy));
            return false;
        }
        match policy {
            MatchingPolicy::Prefix => {
                self.registrations.erase_prefix(&key);
            }
            MatchingPolicy::Strict | MatchingPolicy::Wildcard => {
                self.registrations.erase(&key);
            }
        }
        true
    }

    /// Resolves `procedure` to its registered callee and opens an
    /// in-flight call entry, returning `(callee, registration_id,
    /// invocation_id)`.
    pub fn call(&mut self, caller: SessionHandle, request_id: ID, procedure: &URI) -> Result<(SessionHandle, ID, ID), Reason> {
        let key = procedure.split();
        let registration = self
            .registrations
            .match_range(&key)
            .into_iter()
            .next()
            .map(|(_, _, reg)| *reg)
            .ok_or(Reason::NoSuchProcedure)?;
        let invocation_id = self.next_invocation_id();
        self.calls.insert(
            invocation_id,
            InFlightCall {
                caller,
                request_id,
                callee: registration.session,
            },
        );
        self.calls_by_request.insert((caller.raw_id(), request_id), invocation_id);
        Ok((registration.session, registration.registration_id, invocation_id))
    }

    /// Relays a Yield. Returns `(caller, caller_request_id)` to send the
    /// Result to; the in-flight entry is dropped unless this is a
    /// progressive (non-final) yield.
    pub fn yield_(&mut self, callee: SessionHandle, invocation_id: ID, progress: bool) -> Option<(SessionHandle, ID)> {
        let entry = *self.calls.get(&invocation_id)?;
        if entry.callee != callee {
            return None;
        }
        if !progress {
            self.calls.remove(&invocation_id);
            self.calls_by_request.remove(&(entry.caller.raw_id(), entry.request_id));
        }
        Some((entry.caller, entry.request_id))
    }

    /// Relays a callee Error, always closing the in-flight entry.
    pub fn error_from_callee(&mut self, callee: SessionHandle, invocation_id: ID) -> Option<(SessionHandle, ID)> {
        let entry = self.calls.remove(&invocation_id)?;
        if entry.callee != callee {
            self.calls.insert(invocation_id, entry);
            return None;
        }
        self.calls_by_request.remove(&(entry.caller.raw_id(), entry.request_id));
        Some((entry.caller, entry.request_id))
    }

    /// A caller's explicit Cancel, per spec §4.5's mode table: `kill`
    /// keeps the entry alive awaiting the callee's eventual reply;
    /// `kill_no_wait`/`skip` close it immediately so any later Yield or
    /// Error from the callee is silently unroutable.
    pub fn cancel(&mut self, caller: SessionHandle, request_id: ID, mode: CancelMode) -> Option<CancelOutcome> {
        let invocation_id = *self.calls_by_request.get(&(caller.raw_id(), request_id))?;
        let entry = *self.calls.get(&invocation_id)?;
        if mode != CancelMode::Kill {
            self.calls.remove(&invocation_id);
            self.calls_by_request.remove(&(caller.raw_id(), request_id));
        }
        Some(CancelOutcome {
            callee: entry.callee,
            invocation_id,
            send_interrupt: mode != CancelMode::Skip,
        })
    }

    /// The callee an in-flight invocation was sent to, for the realm's
    /// own caller-timeout enforcement.
    pub fn callee_for(&self, invocation_id: ID) -> Option<SessionHandle> {
        self.calls.get(&invocation_id).map(|entry| entry.callee)
    }

    /// Drops every registration and in-flight call role belonging to
    /// `session`, for use when it leaves the realm. Returns the
    /// notifications the caller (this module's `Realm`) must still
    /// send: `(caller, request_id)` pairs owed a `canceled` Error
    /// because their callee just left, and `(callee, invocation_id)`
    /// pairs owed an Interrupt because their caller just left.
    pub fn purge_session(&mut self, session: SessionHandle) -> (Vec<(SessionHandle, ID)>, Vec<(SessionHandle, ID)>) {
        let mut caller_notifications = Vec::new();
        let mut callee_interrupts = Vec::new();
        let stale_calls: Vec<ID> = self.calls.keys().copied().collect();
        for invocation_id in stale_calls {
            let entry = match self.calls.get(&invocation_id).copied() {
                Some(entry) => entry,
                None => continue,
            };
            if entry.callee == session {
                caller_notifications.push((entry.caller, entry.request_id));
                self.calls.remove(&invocation_id);
                self.calls_by_request.remove(&(entry.caller.raw_id(), entry.request_id));
            } else if entry.caller == session {
                callee_interrupts.push((entry.callee, invocation_id));
                self.calls.remove(&invocation_id);
                self.calls_by_request.remove(&(entry.caller.raw_id(), entry.request_id));
            }
        }

        let stale_registrations: Vec<ID> = self.registration_ids.keys().copied().collect();
        for registration_id in stale_registrations {
            let (procedure, policy) = match self.registration_ids.get(&registration_id).cloned() {
                Some(entry) => entry,
                None => continue,
            };
            let key = procedure.split();
            let belongs_to_session = match policy {
                MatchingPolicy::Prefix => self.registrations.find_prefix(&key).map(|r| r.session == session),
                MatchingPolicy::Strict | MatchingPolicy::Wildcard => self.registrations.find(&key).map(|r| r.session == session),
            }
            .unwrap_or(false);
            if belongs_to_session {
                match policy {
                    MatchingPolicy::Prefix => {
                        self.registrations.erase_prefix(&key);
                    }
                    MatchingPolicy::Strict | MatchingPolicy::Wildcard => {
                        self.registrations.erase(&key);
                    }
                }
                self.registration_ids.remove(&registration_id);
            }
        }

        (caller_notifications, callee_interrupts)
    }

    fn next_id(&mut self) -> ID {
        loop {
            let id = rand::thread_rng().gen_range(1..(1u64 << 53));
            if !self.registration_ids.contains_key(&id) {
                return id;
            }
        }
    }

    fn next_invocation_id(&mut self) -> ID {
        loop {
            let id = rand::thread_rng().gen_range(1..(1u64 << 53));
            if !self.calls.contains_key(&id) {
                return id;
            }
        }
    }
}

impl Default for Dealer {
    fn default() -> Dealer {
        Dealer::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::uri::URI;

    // SessionHandle's fields are private outside `realm`; build one the
    // same way a connection task would, through a throwaway `Realm`.
    fn handle(session_id: ID) -> SessionHandle {
        let mut realm = crate::router::realm::Realm::new();
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        realm.join(session_id, tx)
    }

    #[test]
    fn call_without_registration_is_no_such_procedure() {
        let mut dealer = Dealer::new();
        let caller = handle(1);
        let err = dealer.call(caller, 100, &URI::new("ca.dal.rpc")).unwrap_err();
        assert_eq!(err, Reason::NoSuchProcedure);
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut dealer = Dealer::new();
        let callee = handle(2);
        dealer.register(callee, URI::new("ca.dal.rpc"), MatchingPolicy::Strict).unwrap();
        let err = dealer
            .register(callee, URI::new("ca.dal.rpc"), MatchingPolicy::Strict)
            .unwrap_err();
        assert_eq!(err, Reason::ProcedureAlreadyExists);
    }

    #[test]
    fn call_routes_to_registered_callee_and_relays_yield() {
        let mut dealer = Dealer::new();
        let callee = handle(2);
        let caller = handle(3);
        let registration_id = dealer.register(callee, URI::new("ca.dal.rpc"), MatchingPolicy::Strict).unwrap();
        let (routed_callee, routed_registration, invocation_id) =
            dealer.call(caller, 42, &URI::new("ca.dal.rpc")).unwrap();
        assert_eq!(routed_callee, callee);
        assert_eq!(routed_registration, registration_id);
        let (back_to_caller, request_id) = dealer.yield_(callee, invocation_id, false).unwrap();
        assert_eq!(back_to_caller, caller);
        assert_eq!(request_id, 42);
        assert!(dealer.yield_(callee, invocation_id, false).is_none());
    }

    #[test]
    fn kill_cancel_keeps_entry_alive_for_eventual_reply() {
        let mut dealer = Dealer::new();
        let callee = handle(2);
        let caller = handle(3);
        dealer.register(callee, URI::new("ca.dal.rpc"), MatchingPolicy::Strict).unwrap();
        let (_, _, invocation_id) = dealer.call(caller, 7, &URI::new("ca.dal.rpc")).unwrap();
        let outcome = dealer.cancel(caller, 7, CancelMode::Kill).unwrap();
        assert!(outcome.send_interrupt);
        assert!(dealer.yield_(callee, invocation_id, false).is_some());
    }

    #[test]
    fn skip_cancel_drops_entry_without_interrupt() {
        let mut dealer = Dealer::new();
        let callee = handle(2);
        let caller = handle(3);
        dealer.register(callee, URI::new("ca.dal.rpc"), MatchingPolicy::Strict).unwrap();
        let (_, _, invocation_id) = dealer.call(caller, 7, &URI::new("ca.dal.rpc")).unwrap();
        let outcome = dealer.cancel(caller, 7, CancelMode::Skip).unwrap();
        assert!(!outcome.send_interrupt);
        assert!(dealer.yield_(callee, invocation_id, false).is_none());
    }

    #[test]
    fn purge_notifies_caller_when_callee_leaves() {
        let mut dealer = Dealer::new();
        let callee = handle(2);
        let caller = handle(3);
        dealer.register(callee, URI::new("ca.dal.rpc"), MatchingPolicy::Strict).unwrap();
        dealer.call(caller, 9, &URI::new("ca.dal.rpc")).unwrap();
        let (caller_notifications, callee_interrupts) = dealer.purge_session(callee);
        assert_eq!(caller_notifications, vec![(caller, 9)]);
        assert!(callee_interrupts.is_empty());
    }

    #[test]
    fn purge_interrupts_callee_when_caller_leaves() {
        let mut dealer = Dealer::new();
        let callee = handle(2);
        let caller = handle(3);
        dealer.register(callee, URI::new("ca.dal.rpc"), MatchingPolicy::Strict).unwrap();
        let (_, _, invocation_id) = dealer.call(caller, 9, &URI::new("ca.dal.rpc")).unwrap();
        let (caller_notifications, callee_interrupts) = dealer.purge_session(caller);
        assert!(caller_notifications.is_empty());
        assert_eq!(callee_interrupts, vec![(callee, invocation_id)]);
    }
}
