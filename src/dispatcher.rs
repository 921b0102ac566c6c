//! Execution contexts.
//!
//! A [`Dispatcher`] accepts a unit of [`Work`] and guarantees that it
//! eventually runs exactly once. [`Context`] is the value stored in the
//! configuration slots and passed to the `*_on` chaining operators; it is a
//! tagged variant so that serial lanes can be recovered from it without
//! downcasting.
use crate::{registry::LaneId, Error, Pool, Promise, SerialLane};
use std::{
    any::Any,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use tracing::error;

pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Execution flags attached to a submission.
///
/// Only meaningful to contexts that understand them; serial lanes ignore
/// `BARRIER` because every submission on them is already exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags {
    barrier: bool,
}

impl Flags {
    pub const NONE: Flags = Flags { barrier: false };
    /// Run exclusively: after everything submitted before it has finished and
    /// before anything submitted after it starts.
    pub const BARRIER: Flags = Flags { barrier: true };

    pub fn is_barrier(self) -> bool {
        self.barrier
    }
}

pub trait Dispatcher: Send + Sync {
    /// Accepts `work` and returns immediately. `work` must run exactly once.
    fn dispatch(&self, flags: Flags, work: Work);

    /// Identity of the lane this dispatcher submits to, used for
    /// [`same_lane`](crate::registry::same_lane) comparisons.
    fn lane(&self) -> Option<LaneId> {
        None
    }

    /// The serial lane behind this dispatcher, if it is one.
    fn as_lane(&self) -> Option<SerialLane> {
        None
    }
}

impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    fn dispatch(&self, flags: Flags, work: Work) {
        (**self).dispatch(flags, work)
    }

    fn lane(&self) -> Option<LaneId> {
        (**self).lane()
    }

    fn as_lane(&self) -> Option<SerialLane> {
        (**self).as_lane()
    }
}

pub trait DispatcherExt: Dispatcher {
    /// Runs `body` on this dispatcher and returns a promise of its result.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_lane::{DispatcherExt, Flags, SerialLane};
    /// use futures::executor::block_on;
    ///
    /// let lane = SerialLane::new("worker").unwrap();
    /// let answer = lane.promise(Flags::NONE, || Ok(6 * 7));
    /// assert_eq!(block_on(answer).unwrap(), 42);
    /// ```
    fn promise<U, F>(&self, flags: Flags, body: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce() -> Result<U, Error> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.dispatch(flags, Box::new(move || resolver.resolve(catching(body))));
        promise
    }
}

impl<D: Dispatcher + ?Sized> DispatcherExt for D {}

/// Where a continuation runs.
#[derive(Clone)]
pub enum Context {
    /// No dispatch: run synchronously on whichever thread settles the parent
    /// promise (or registers the continuation, if the parent already settled).
    Inline,
    Lane(SerialLane),
    Custom(Arc<dyn Dispatcher>),
}

impl Context {
    /// The process-wide main lane.
    pub fn main() -> Self {
        Context::Lane(SerialLane::main())
    }

    pub fn custom<D: Dispatcher + 'static>(dispatcher: D) -> Self {
        Context::Custom(Arc::new(dispatcher))
    }

    pub fn is_inline(&self) -> bool {
        matches!(self, Context::Inline)
    }
}

impl Dispatcher for Context {
    fn dispatch(&self, flags: Flags, work: Work) {
        match self {
            Context::Inline => work(),
            Context::Lane(lane) => lane.dispatch(flags, work),
            Context::Custom(dispatcher) => dispatcher.dispatch(flags, work),
        }
    }

    fn lane(&self) -> Option<LaneId> {
        match self {
            Context::Inline => None,
            Context::Lane(lane) => Some(lane.id()),
            Context::Custom(dispatcher) => dispatcher.lane(),
        }
    }

    fn as_lane(&self) -> Option<SerialLane> {
        match self {
            Context::Inline => None,
            Context::Lane(lane) => Some(lane.clone()),
            Context::Custom(dispatcher) => dispatcher.as_lane(),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Context::Inline => f.write_str("Inline"),
            Context::Lane(lane) => f.debug_tuple("Lane").field(lane).finish(),
            Context::Custom(dispatcher) => match dispatcher.lane() {
                Some(id) => write!(f, "Custom({id})"),
                None => f.write_str("Custom"),
            },
        }
    }
}

impl From<SerialLane> for Context {
    fn from(lane: SerialLane) -> Self {
        Context::Lane(lane)
    }
}

impl From<Pool> for Context {
    fn from(pool: Pool) -> Self {
        Context::custom(pool)
    }
}

impl<D: Dispatcher + 'static> From<Arc<D>> for Context {
    fn from(dispatcher: Arc<D>) -> Self {
        Context::Custom(dispatcher)
    }
}

/// Runs one unit of work on a lane worker, keeping the worker alive if the
/// work panics.
pub(crate) fn run_guarded(lane: LaneId, work: Work) {
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(work)) {
        error!(%lane, panic = panic_message(panic.as_ref()), "work panicked");
    }
}

/// Runs a continuation body, turning a panic into [`Error::Panicked`] so the
/// downstream promise still settles.
pub(crate) fn catching<R>(body: impl FnOnce() -> Result<R, Error>) -> Result<R, Error> {
    panic::catch_unwind(AssertUnwindSafe(body))
        .unwrap_or_else(|panic| Err(Error::Panicked(panic_message(panic.as_ref()).to_owned())))
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "non-string panic payload"
    }
}
