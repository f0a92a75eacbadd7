//! Completion delivery (spec §9 design note, replacing the teacher's
//! `eventual::Complete<T>` with a single trait that can be adapted to
//! whichever delivery style the caller wants).
//!
//! A pending request is resolved exactly once, with either a value or
//! an [`Error`]. [`CompletionHandler`] is the one thing a session needs
//! to know about a waiting caller; everything else — a plain callback,
//! a channel a caller can `.await`, a type implementing `Future` — is
//! an adapter built on top of it.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::error::{Error, MiscErrorKind};

/// Something that can be resolved with a request's outcome, exactly
/// once. Implementations consume `self` so double-completion is a type
/// error, not a runtime one.
pub trait CompletionHandler<T>: Send {
    fn complete(self: Box<Self>, result: Result<T, Error>);
}

/// Adapts a plain `FnOnce(Result<T, Error>)` closure into a
/// `CompletionHandler`.
pub struct CallbackCompletion<F> {
    callback: F,
}

impl<F> CallbackCompletion<F> {
    pub fn new(callback: F) -> CallbackCompletion<F> {
        CallbackCompletion { callback }
    }
}

impl<T, F> CompletionHandler<T> for CallbackCompletion<F>
where
    F: FnOnce(Result<T, Error>) + Send,
{
    fn complete(self: Box<Self>, result: Result<T, Error>) {
        (self.callback)(result)
    }
}

/// The sending half of a completion channel: a `CompletionHandler` that
/// delivers its result through a oneshot, for a [`CompletionFuture`] on
/// the other end to await.
pub struct ChannelCompletion<T> {
    sender: oneshot::Sender<Result<T, Error>>,
}

/// The receiving half; implements `Future` so a caller can simply
/// `.await` its call's outcome.
pub struct CompletionFuture<T> {
    receiver: oneshot::Receiver<Result<T, Error>>,
}

/// Builds a connected `ChannelCompletion`/`CompletionFuture` pair.
pub fn completion_channel<T>() -> (ChannelCompletion<T>, CompletionFuture<T>) {
    let (tx, rx) = oneshot::channel();
    (
        ChannelCompletion { sender: tx },
        CompletionFuture { receiver: rx },
    )
}

impl<T: Send> CompletionHandler<T> for ChannelCompletion<T> {
    fn complete(self: Box<Self>, result: Result<T, Error>) {
        let _ = self.sender.send(result);
    }
}

impl<T> Future for CompletionFuture<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::misc(MiscErrorKind::Abandoned))),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn callback_completion_invokes_closure() {
        let (tx, rx) = oneshot::channel();
        let handler: Box<dyn CompletionHandler<i64>> =
            Box::new(CallbackCompletion::new(move |result| {
                let _ = tx.send(result);
            }));
        handler.complete(Ok(42));
        assert_eq!(rx.await.unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn channel_completion_resolves_the_future() {
        let (completion, future) = completion_channel::<i64>();
        let handler: Box<dyn CompletionHandler<i64>> = Box::new(completion);
        handler.complete(Ok(7));
        assert_eq!(future.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn dropped_sender_yields_abandoned() {
        let (completion, future) = completion_channel::<i64>();
        drop(completion);
        let err = future.await.unwrap_err();
        assert_eq!(err.category(), crate::error::Category::Misc);
    }
}
