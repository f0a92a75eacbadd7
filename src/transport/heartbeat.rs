//! Ping/pong liveness tracking (spec §4.3).
//!
//! The actual ticking lives in `transport::mod`'s select loop; this is
//! just the bookkeeping: what payload the outstanding ping carried, and
//! whether an incoming pong actually echoes it. A pong with the wrong
//! payload counts as no pong at all.

/// Tracks at most one outstanding ping at a time.
#[derive(Debug, Default)]
pub struct HeartbeatState {
    outstanding: Option<Vec<u8>>,
    counter: u64,
}

impl HeartbeatState {
    pub fn new() -> HeartbeatState {
        HeartbeatState {
            outstanding: None,
            counter: 0,
        }
    }

    /// Mints a fresh ping payload and marks it outstanding. Call sites
    /// should send this payload as a `Ping` frame immediately.
    pub fn issue_ping(&mut self) -> Vec<u8> {
        self.counter = self.counter.wrapping_add(1);
        let payload = self.counter.to_be_bytes().to_vec();
        self.outstanding = Some(payload.clone());
        payload
    }

    /// Records an incoming pong. Returns `true` if it matches the
    /// outstanding ping (clearing it), `false` otherwise — including
    /// when there was no outstanding ping at all.
    pub fn on_pong(&mut self, payload: &[u8]) -> bool {
        let matches = self.outstanding.as_deref() == Some(payload);
        if matches {
            self.outstanding = None;
        }
        matches
    }

    pub fn has_outstanding(&self) -> bool {
        self.outstanding.is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn matching_pong_clears_outstanding() {
        let mut hb = HeartbeatState::new();
        let payload = hb.issue_ping();
        assert!(hb.has_outstanding());
        assert!(hb.on_pong(&payload));
        assert!(!hb.has_outstanding());
    }

    #[test]
    fn bogus_pong_payload_does_not_clear_outstanding() {
        let mut hb = HeartbeatState::new();
        hb.issue_ping();
        assert!(!hb.on_pong(b"not it"));
        assert!(hb.has_outstanding());
    }

    #[test]
    fn pong_with_no_outstanding_ping_is_ignored() {
        let mut hb = HeartbeatState::new();
        assert!(!hb.on_pong(b"whatever"));
    }

    #[test]
    fn successive_pings_get_distinct_payloads() {
        let mut hb = HeartbeatState::new();
        let first = hb.issue_ping();
        hb.on_pong(&first);
        let second = hb.issue_ping();
        assert_ne!(first, second);
    }
}
