//! The broker half of a realm (spec §4.7): a URI index from topic
//! patterns to subscriber sessions, plus publish-time fan-out.
//!
//! Matching policy decides which slot of the trie a subscription lives
//! in: `Prefix` goes in the prefix slot, `Strict`/`Wildcard` share the
//! exact slot (a wildcard pattern is just a pattern with one or more
//! empty labels, which `TokenTrie::match_range` already treats as
//! matching any single label at that position).

use std::collections::HashMap;

use rand::Rng;

use crate::messages::{EventDetails, MatchingPolicy, PublishOptions, URI};
use crate::trie::TokenTrie;
use crate::uri::SplitUri;
use crate::ID;

use super::realm::SessionHandle;

struct Subscriber {
    session: SessionHandle,
    subscription_id: ID,
}

/// One realm's subscription index and publication-id history.
pub struct Broker {
    subscriptions: TokenTrie<Vec<Subscriber>>,
    subscription_ids: HashMap<ID, (URI, MatchingPolicy)>,
    recent_publication_ids: Vec<ID>,
}

/// One session's worth of fan-out: who to send an Event to, and the
/// topic disclosure that subscription's matching policy requires.
pub struct Delivery {
    pub session: SessionHandle,
    pub subscription_id: ID,
    pub disclosed_topic: Option<URI>,
}

impl Broker {
    pub fn new() -> Broker {
        Broker {
            subscriptions: TokenTrie::new(),
            subscription_ids: HashMap::new(),
            recent_publication_ids: Vec::new(),
        }
    }

    /// Adds `session` as a subscriber of `topic` under `policy`,
    /// returning the freshly assigned subscription id.
    pub fn subscribe(&mut self, session: SessionHandle, topic: URI, policy: MatchingPolicy) -> ID {
        let subscription_id = self.next_id();
        let key = topic.split();
        let entry = Subscriber { session, subscription_id };
        let inserted = match policy {
            MatchingPolicy::Prefix => {
                if let Some(list) = self.subscriptions.find_prefix_mut(&key) {
                    list.push(entry);
                    true
                } else {
                    self.subscriptions.insert_prefix(&key, vec![entry])
                }
            }
            MatchingPolicy::Strict | MatchingPolicy::Wildcard => {
                if let Some(list) = self.subscriptions.find_mut(&key) {
                    list.push(entry);
                    true
                } else {
                    self.subscriptions.insert(&key, vec![entry])
                }
            }
        };
        debug_assert!(inserted);
        self.subscription_ids.insert(subscription_id, (topic, policy));
        subscription_id
    }

    /// Removes `session`'s subscription, identified by `subscription_id`.
    /// Returns `false` if no such subscription exists (for either this
    /// session or at all).
    pub fn unsubscribe(&mut self, session: SessionHandle, subscription_id: ID) -> bool {
        let (topic, policy) = match self.subscription_ids.remove(&subscription_id) {
            Some(entry) => entry,
            None => return false,
        };
        let key = topic.split();
        let list = match policy {
            MatchingPolicy::Prefix => self.subscriptions.find_prefix_mut(&key),
            MatchingPolicy::Strict | MatchingPolicy::Wildcard => self.subscriptions.find_mut(&key),
        };
        if let Some(list) = list {
            list.retain(|s| !(s.session == session && s.subscription_id == subscription_id));
        }
        true
    }

    /// Computes the full delivery list for a publish to `topic`,
    /// excluding `publisher` unless `options` asks otherwise.
    pub fn deliveries(&self, publisher: SessionHandle, topic: &URI, options: &PublishOptions) -> Vec<Delivery> {
        let key = topic.split();
        let mut out = Vec::new();
        for (_pattern, _kind, subscribers) in self.subscriptions.match_range(&key) {
            for sub in subscribers {
                if sub.session == publisher && !options.should_exclude_me() {
                    // fallthrough: exclude_me == false means the publisher
                    // still receives its own event, so don't skip it below
                } else if sub.session == publisher {
                    continue;
                }
                if options.excluded().contains(&sub.session.raw_id()) {
                    continue;
                }
                if let Some(eligible) = options.eligible() {
                    if !eligible.contains(&sub.session.raw_id()) {
                        continue;
                    }
                }
                let (_, policy) = &self.subscription_ids[&sub.subscription_id];
                let disclosed_topic = if *policy == MatchingPolicy::Strict {
                    None
                } else {
                    Some(topic.clone())
                };
                out.push(Delivery {
                    session: sub.session,
                    subscription_id: sub.subscription_id,
                    disclosed_topic,
                });
            }
        }
        out
    }

    pub fn event_details(topic: Option<URI>) -> EventDetails {
        match topic {
            Some(topic) => EventDetails::new_with_topic(topic),
            None => EventDetails::new(),
        }
    }

    /// Draws a publication id guaranteed unique against a short window
    /// of recently issued ids.
    pub fn next_publication_id(&mut self) -> ID {
        let id = loop {
            let candidate = rand::thread_rng().gen_range(1..(1u64 << 53));
            if !self.recent_publication_ids.contains(&candidate) {
                break candidate;
            }
        };
        self.recent_publication_ids.push(id);
        if self.recent_publication_ids.len() > 256 {
            self.recent_publication_ids.remove(0);
        }
        id
    }

    /// Drops every subscription belonging to `session`, for use when it
    /// leaves the realm.
    pub fn purge_session(&mut self, session: SessionHandle) {
        let stale: Vec<ID> = self.subscription_ids.keys().copied().collect();
        for subscription_id in stale {
            if let Some((topic, policy)) = self.subscription_ids.get(&subscription_id).cloned() {
                let key = topic.split();
                let list = match policy {
                    MatchingPolicy::Prefix => self.subscriptions.find_prefix_mut(&key),
                    MatchingPolicy::Strict | MatchingPolicy::Wildcard => self.subscriptions.find_mut(&key),
                };
                let had_session = list
                    .as_ref()
                    .map(|l| l.iter().any(|s| s.session == session))
                    .unwrap_or(false);
                if had_session {
                    if let Some(list) = list {
                        list.retain(|s| s.session != session);
                    }
                    self.subscription_ids.remove(&subscription_id);
                }
            }
        }
    }

    fn next_id(&mut self) -> ID {
        loop {
            let id = rand::thread_rng().gen_range(1..(1u64 << 53));
            if !self.subscription_ids.contains_key(&id) {
                return id;
            }
        }
    }
}

impl Default for Broker {
    fn default() -> Broker {
        Broker::new()
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
    fn publish_delivers_to_subscriber_but_not_the_publisher() {
        let mut broker = Broker::new();
        let publisher = handle(1);
        let subscriber = handle(2);
        broker.subscribe(subscriber, URI::new("ca.dal.topic"), MatchingPolicy::Strict);

        let deliveries = broker.deliveries(publisher, &URI::new("ca.dal.topic"), &PublishOptions::new(false));
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].session, subscriber);
    }

    #[test]
    fn exclude_me_false_still_delivers_to_the_publisher() {
        let mut broker = Broker::new();
        let publisher = handle(1);
        broker.subscribe(publisher, URI::new("ca.dal.topic"), MatchingPolicy::Strict);

        let options = PublishOptions::new(false).with_exclude_me(false);
        let deliveries = broker.deliveries(publisher, &URI::new("ca.dal.topic"), &options);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].session, publisher);
    }

    #[test]
    fn excluded_sessions_are_skipped() {
        let mut broker = Broker::new();
        let publisher = handle(1);
        let subscriber = handle(2);
        broker.subscribe(subscriber, URI::new("ca.dal.topic"), MatchingPolicy::Strict);

        let options = PublishOptions::new(false).with_excluded(vec![subscriber.raw_id()]);
        let deliveries = broker.deliveries(publisher, &URI::new("ca.dal.topic"), &options);
        assert!(deliveries.is_empty());
    }

    #[test]
    fn eligible_restricts_delivery_to_the_listed_sessions() {
        let mut broker = Broker::new();
        let publisher = handle(1);
        let eligible_subscriber = handle(2);
        let ineligible_subscriber = handle(3);
        broker.subscribe(eligible_subscriber, URI::new("ca.dal.topic"), MatchingPolicy::Strict);
        broker.subscribe(ineligible_subscriber, URI::new("ca.dal.topic"), MatchingPolicy::Strict);

        let options = PublishOptions::new(false).with_eligible(vec![eligible_subscriber.raw_id()]);
        let deliveries = broker.deliveries(publisher, &URI::new("ca.dal.topic"), &options);
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].session, eligible_subscriber);
    }

    #[test]
    fn wildcard_subscription_matches_and_discloses_the_concrete_topic() {
        let mut broker = Broker::new();
        let publisher = handle(1);
        let subscriber = handle(2);
        broker.subscribe(subscriber, URI::new("ca..topic"), MatchingPolicy::Wildcard);

        let deliveries = broker.deliveries(publisher, &URI::new("ca.dal.topic"), &PublishOptions::new(false));
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].disclosed_topic, Some(URI::new("ca.dal.topic")));
    }

    #[test]
    fn strict_subscription_discloses_no_topic() {
        let mut broker = Broker::new();
        let publisher = handle(1);
        let subscriber = handle(2);
        broker.subscribe(subscriber, URI::new("ca.dal.topic"), MatchingPolicy::Strict);

        let deliveries = broker.deliveries(publisher, &URI::new("ca.dal.topic"), &PublishOptions::new(false));
        assert_eq!(deliveries[0].disclosed_topic, None);
    }

    #[test]
    fn unsubscribe_removes_the_subscriber_from_future_deliveries() {
        let mut broker = Broker::new();
        let publisher = handle(1);
        let subscriber = handle(2);
        let subscription_id = broker.subscribe(subscriber, URI::new("ca.dal.topic"), MatchingPolicy::Strict);

        assert!(broker.unsubscribe(subscriber, subscription_id));
        assert!(!broker.unsubscribe(subscriber, subscription_id));
        let deliveries = broker.deliveries(publisher, &URI::new("ca.dal.topic"), &PublishOptions::new(false));
        assert!(deliveries.is_empty());
    }

    #[test]
    fn purge_session_drops_its_subscriptions() {
        let mut broker = Broker::new();
        let publisher = handle(1);
        let subscriber = handle(2);
        broker.subscribe(subscriber, URI::new("ca.dal.topic"), MatchingPolicy::Strict);

        broker.purge_session(subscriber);
        let deliveries = broker.deliveries(publisher, &URI::new("ca.dal.topic"), &PublishOptions::new(false));
        assert!(deliveries.is_empty());
    }

    #[test]
    fn publication_ids_are_unique_across_many_draws() {
        let mut broker = Broker::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            assert!(seen.insert(broker.next_publication_id()));
        }
    }
}
