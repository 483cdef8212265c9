//! Request handles and callback delivery
//!
//! Every service call returns a [`Request`] that resolves exactly once. The
//! worker only fills the reply slot; callbacks run wherever the caller's
//! [`CallbackContext`] decides, never on the worker thread.

use super::cancel::CancellationToken;
use crate::error::{Error, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::oneshot::{self, error::TryRecvError};

/// Completion callback for a request
pub type Callback<T> = Box<dyn FnOnce(Result<T>) + Send + 'static>;

/// Pending result of a history operation.
///
/// Await it from async code, [`wait`](Self::wait) on it from a plain thread,
/// or hand it to a [`CallbackContext`] with [`then`](Self::then). A request
/// whose worker went away resolves with [`Error::ServiceUnavailable`].
#[must_use = "dropping a Request does not cancel it; keep it to observe the result"]
pub struct Request<T> {
    rx: oneshot::Receiver<Result<T>>,
    token: CancellationToken,
}

impl<T> Request<T> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<T>>, token: CancellationToken) -> Self {
        Self { rx, token }
    }

    /// Token the worker checks before running this request
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Skip the request if the worker has not started it yet
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Block the current thread until the request resolves.
    ///
    /// Must not be called from inside an async runtime; `.await` instead.
    pub fn wait(self) -> Result<T> {
        self.rx
            .blocking_recv()
            .unwrap_or(Err(Error::ServiceUnavailable))
    }

    /// Take the result if it is already available
    pub fn try_take(&mut self) -> Option<Result<T>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(Error::ServiceUnavailable)),
        }
    }

    /// Run `callback` with the result on the given context
    pub fn then<C, F>(self, context: &C, callback: F)
    where
        C: CallbackContext,
        T: Send + 'static,
        F: FnOnce(Result<T>) + Send + 'static,
    {
        context.deliver(self, Box::new(callback));
    }
}

impl<T> Future for Request<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.get_mut().rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(Error::ServiceUnavailable)))
    }
}

/// Where completion callbacks run.
pub trait CallbackContext {
    /// Arrange for `callback` to run with the request's result on this context
    fn deliver<T: Send + 'static>(&self, request: Request<T>, callback: Callback<T>);
}

/// Runs callbacks as tasks on a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioContext {
    handle: tokio::runtime::Handle,
}

impl TokioContext {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Context for the runtime the caller is running on.
    ///
    /// Panics outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(tokio::runtime::Handle::current())
    }
}

impl CallbackContext for TokioContext {
    fn deliver<T: Send + 'static>(&self, request: Request<T>, callback: Callback<T>) {
        self.handle.spawn(async move {
            callback(request.await);
        });
    }
}

type Poller = Box<dyn FnMut() -> bool + Send>;

/// Callbacks for an event loop that is not async.
///
/// The loop calls [`dispatch_pending`](Self::dispatch_pending) from its own
/// thread (for example from an idle handler) and every completed request's
/// callback runs right there.
#[derive(Default)]
pub struct IdleQueue {
    pending: Mutex<Vec<Poller>>,
}

impl IdleQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run the callbacks of every request that has resolved.
    ///
    /// Returns how many callbacks ran.
    pub fn dispatch_pending(&self) -> usize {
        // Callbacks may queue new requests here, so run them unlocked
        let mut pollers = std::mem::take(
            &mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner),
        );
        let before = pollers.len();
        pollers.retain_mut(|poll| !poll());
        let ran = before - pollers.len();

        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(pollers);
        ran
    }

    /// Number of callbacks still waiting on their request
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl CallbackContext for IdleQueue {
    fn deliver<T: Send + 'static>(&self, mut request: Request<T>, callback: Callback<T>) {
        let mut callback = Some(callback);
        let poller: Poller = Box::new(move || match request.try_take() {
            Some(result) => {
                if let Some(callback) = callback.take() {
                    callback(result);
                }
                true
            }
            None => false,
        });
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(poller);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn pair<T>() -> (oneshot::Sender<Result<T>>, Request<T>) {
        let (tx, rx) = oneshot::channel();
        (tx, Request::new(rx, CancellationToken::new()))
    }

    #[test]
    fn test_wait_receives_value() {
        let (tx, request) = pair();
        tx.send(Ok(5)).unwrap();
        assert_eq!(request.wait().unwrap(), 5);
    }

    #[test]
    fn test_dropped_sender_means_unavailable() {
        let (tx, mut request) = pair::<()>();
        assert!(request.try_take().is_none());
        drop(tx);
        assert!(matches!(
            request.try_take(),
            Some(Err(Error::ServiceUnavailable))
        ));
    }

    #[test]
    fn test_cancel_flags_token() {
        let (_tx, request) = pair::<()>();
        let token = request.token().clone();
        request.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn test_idle_queue_runs_callbacks_on_dispatch() {
        let queue = IdleQueue::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let (tx, request) = pair::<u32>();
        let seen = Arc::clone(&hits);
        request.then(&queue, move |result| {
            assert_eq!(result.unwrap(), 3);
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(queue.dispatch_pending(), 0);
        assert_eq!(queue.pending_count(), 1);

        tx.send(Ok(3)).unwrap();
        assert_eq!(queue.dispatch_pending(), 1);
        assert_eq!(queue.pending_count(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_request_is_awaitable() {
        let (tx, request) = pair();
        tx.send(Ok("done")).unwrap();
        assert_eq!(request.await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_tokio_context_delivers() {
        let (done_tx, done_rx) = oneshot::channel();
        let (tx, request) = pair::<i64>();
        request.then(&TokioContext::current(), move |result| {
            let _ = done_tx.send(result.unwrap());
        });
        tx.send(Ok(42)).unwrap();
        assert_eq!(done_rx.await.unwrap(), 42);
    }
}
