//! The call chit (spec §4.8): a small cancellable handle for an
//! in-flight CALL, returned to the caller alongside (or instead of) the
//! eventual result.
//!
//! A chit does not own the session; it posts a command onto the
//! session's lane and lets the session's own task look up the call by
//! request id when the command is processed. That keeps the session's
//! pending table as the single owner of call state, and makes a chit
//! outliving its session harmless: the send just finds no receiver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use crate::messages::CancelMode;
use crate::ID;

/// A command posted onto a session's lane from outside it.
#[derive(Debug, Clone, Copy)]
pub enum SessionCommand {
    Cancel(ID, CancelMode),
}

/// A cancellable handle to an outstanding CALL. Cloning a chit shares
/// the same cancellation flag, so cancelling any clone cancels the call
/// exactly once.
#[derive(Clone)]
pub struct CallChit {
    request_id: ID,
    sender: UnboundedSender<SessionCommand>,
    cancelled: Arc<AtomicBool>,
}

impl CallChit {
    pub fn new(request_id: ID, sender: UnboundedSender<SessionCommand>) -> CallChit {
        CallChit {
            request_id,
            sender,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn request_id(&self) -> ID {
        self.request_id
    }

    /// Requests cancellation of the call this chit refers to. Idempotent:
    /// the second and later calls are no-ops, even across clones. A
    /// cancel posted after the call has already finished is simply
    /// ignored by the session, since its pending entry is already gone.
    pub fn cancel(&self, mode: CancelMode) {
        if !self.cancelled.swap(true, Ordering::SeqCst) {
            let _ = self.sender.send(SessionCommand::Cancel(self.request_id, mode));
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cancel_is_idempotent() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let chit = CallChit::new(42, tx);
        chit.cancel(CancelMode::Kill);
        chit.cancel(CancelMode::Kill);
        assert!(chit.is_cancelled());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn clones_share_the_cancellation_flag() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let chit = CallChit::new(1, tx);
        let clone = chit.clone();
        chit.cancel(CancelMode::Skip);
        clone.cancel(CancelMode::Skip);
        assert!(clone.is_cancelled());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
