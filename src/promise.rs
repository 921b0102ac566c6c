//! The settle-once state machine behind [`Promise`] and [`Resolver`].
use crate::{conf, dispatcher::panic_message, Error};
use futures::executor::block_on;
use parking_lot::Mutex;
use std::{
    fmt,
    future::Future,
    panic::{self, AssertUnwindSafe},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};
use tracing::{debug, error, trace};

type Handler<T> = Box<dyn FnOnce(Result<T, Error>) + Send>;

/// A value that becomes available later, or a failure.
///
/// Promises are cheap handles: clones observe the same settlement. Chaining
/// operators live in [`chain`](crate::chain) and [`catch`](crate::catch).
///
/// # Examples
///
/// ```
/// use promise_lane::Promise;
/// use futures::executor::block_on;
/// use std::thread;
///
/// let (promise, resolver) = Promise::<String>::pending();
/// let task = thread::spawn(move || block_on(async {
///     println!("received {:?}", promise.await);
/// }));
/// resolver.fulfill("hi".into());
/// task.join().expect("the task thread has panicked");
/// ```
pub struct Promise<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

/// The write half of a [`Promise`]. Only the first settlement counts.
pub struct Resolver<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

struct Inner<T> {
    state: State<T>,
    /// Set once anything has looked at (or subscribed to) the outcome.
    observed: bool,
}

enum State<T> {
    Pending {
        handlers: Vec<Handler<T>>,
        wakers: Vec<Waker>,
    },
    Settled(Result<T, Error>),
}

impl<T> Inner<T> {
    fn settled(&self) -> Option<&Result<T, Error>> {
        match &self.state {
            State::Settled(result) => Some(result),
            State::Pending { .. } => None,
        }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        match &self.state {
            State::Settled(Err(err)) if !self.observed => conf::report_unhandled(err),
            State::Pending { handlers, .. } if !handlers.is_empty() => {
                debug!(continuations = handlers.len(), "pending promise dropped");
            }
            _ => {}
        }
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Resolver {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    /// A pending promise and the resolver that settles it.
    pub fn pending() -> (Promise<T>, Resolver<T>) {
        let inner = Arc::new(Mutex::new(Inner {
            state: State::Pending {
                handlers: Vec::new(),
                wakers: Vec::new(),
            },
            observed: false,
        }));
        (
            Promise {
                inner: inner.clone(),
            },
            Resolver { inner },
        )
    }

    /// Runs `body` immediately with the resolver of a new promise.
    pub fn new(body: impl FnOnce(Resolver<T>)) -> Promise<T> {
        let (promise, resolver) = Self::pending();
        body(resolver);
        promise
    }

    /// A promise born fulfilled. Continuations added later still go through
    /// the normal context selection.
    pub fn value(value: T) -> Promise<T> {
        Self::settled(Ok(value))
    }

    /// A promise born rejected.
    pub fn rejected(err: Error) -> Promise<T> {
        Self::settled(Err(err))
    }

    fn settled(result: Result<T, Error>) -> Promise<T> {
        Promise {
            inner: Arc::new(Mutex::new(Inner {
                state: State::Settled(result),
                observed: false,
            })),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.inner.lock().settled().is_none()
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.inner.lock().settled(), Some(Ok(_)))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.lock().settled(), Some(Err(_)))
    }

    /// The outcome, if settled. Counts as observing a rejection.
    pub fn result(&self) -> Option<Result<T, Error>> {
        let mut inner = self.inner.lock();
        inner.observed = true;
        inner.settled().cloned()
    }

    /// The value, if fulfilled.
    pub fn fulfilled(&self) -> Option<T> {
        self.result().and_then(Result::ok)
    }

    pub fn error(&self) -> Option<Error> {
        self.result().and_then(Result::err)
    }

    /// Blocks the calling thread until the promise settles.
    ///
    /// Never call this from the lane that has to run the continuation this
    /// promise is waiting on; that lane would wait on itself.
    pub fn wait(&self) -> Result<T, Error> {
        block_on(self.clone())
    }

    /// Registers `handler` to receive the outcome, inline, on whichever thread
    /// settles the promise, or right now if it already has.
    pub(crate) fn pipe(&self, handler: impl FnOnce(Result<T, Error>) + Send + 'static) {
        let result = {
            let mut inner = self.inner.lock();
            inner.observed = true;
            match &mut inner.state {
                State::Pending { handlers, .. } => {
                    handlers.push(Box::new(handler));
                    return;
                }
                State::Settled(result) => result.clone(),
            }
        };
        handler(result)
    }
}

impl<T> Resolver<T>
where
    T: Clone + Send + 'static,
{
    pub fn fulfill(&self, value: T) {
        self.resolve(Ok(value))
    }

    pub fn reject(&self, err: Error) {
        self.resolve(Err(err))
    }

    /// Settles the promise with `result`. Ignored if it already settled.
    pub fn resolve(&self, result: Result<T, Error>) {
        let (handlers, wakers) = {
            let mut inner = self.inner.lock();
            if inner.settled().is_some() {
                trace!("ignoring settlement of an already settled promise");
                return;
            }
            match std::mem::replace(&mut inner.state, State::Settled(result.clone())) {
                State::Pending { handlers, wakers } => (handlers, wakers),
                State::Settled(_) => return,
            }
        };
        for waker in wakers {
            waker.wake()
        }
        // Handlers run outside the lock, in registration order. One handler
        // panicking must not starve the ones after it.
        for handler in handlers {
            let result = result.clone();
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(move || handler(result))) {
                error!(panic = panic_message(panic.as_ref()), "promise handler panicked");
            }
        }
    }

    pub fn is_settled(&self) -> bool {
        self.inner.lock().settled().is_some()
    }
}

impl<T> Future for Promise<T>
where
    T: Clone + Send + 'static,
{
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.inner.lock();
        inner.observed = true;
        match &mut inner.state {
            State::Settled(result) => Poll::Ready(result.clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.inner.lock().settled() {
            None => "pending",
            Some(Ok(_)) => "fulfilled",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("Promise").field("state", &state).finish()
    }
}

impl<T> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let settled = self.inner.lock().settled().is_some();
        f.debug_struct("Resolver").field("settled", &settled).finish()
    }
}
