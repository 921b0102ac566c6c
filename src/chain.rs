//! Chaining operators and the context selection they share.
//!
//! Every operator comes in two forms: `op(body)` runs `body` on the context
//! configured for the operator's [`Slot`], and `op_on(context, flags, body)`
//! runs it on `context`. The choice is made when the parent settles, not when
//! the operator is called, so swapping the configuration affects links whose
//! parent is still pending.
//!
//! [`Context::Inline`] is the explicit "do not dispatch" choice: the body runs
//! on whatever lane settled the parent. Chains that stay on one lane by
//! passing `Context::Inline` never pay for a hop:
//!
//! ```
//! use promise_lane::{Context, Flags, LaneId, Promise, SerialLane};
//!
//! let lane = SerialLane::new("worker").unwrap();
//! let id = lane.id();
//! let (start, resolver) = Promise::pending();
//! let end = start
//!     .map_on(lane, Flags::NONE, |x: i32| Ok((x + 1, LaneId::current())))
//!     .map_on(Context::Inline, Flags::NONE, |(x, first)| {
//!         Ok((x * 2, first, LaneId::current()))
//!     });
//! resolver.fulfill(20);
//! assert_eq!(end.wait().unwrap(), (42, Some(id), Some(id)));
//! ```
use crate::{
    conf::{self, Slot},
    dispatcher::catching,
    Context, Dispatcher, Error, Flags, Promise,
};
use tracing::trace;

/// Picks the context for one continuation and submits `work` to it.
///
/// An explicit context wins; otherwise the configured context for `slot` is
/// read at this moment. `Context::Inline` runs `work` before returning.
pub(crate) fn submit(
    on: Option<Context>,
    flags: Flags,
    slot: Slot,
    work: impl FnOnce() + Send + 'static,
) {
    let context = match on {
        Some(context) => context,
        None => conf::context(slot),
    };
    trace!(?slot, ?context, barrier = flags.is_barrier(), "submitting continuation");
    context.dispatch(flags, Box::new(work));
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    /// Transforms the value. An `Err` from `body` rejects the result.
    pub fn map<U, F>(&self, body: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, Error> + Send + 'static,
    {
        self.map_with(None, Flags::NONE, body)
    }

    pub fn map_on<U, F>(&self, on: impl Into<Context>, flags: Flags, body: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, Error> + Send + 'static,
    {
        self.map_with(Some(on.into()), flags, body)
    }

    fn map_with<U, F>(&self, on: Option<Context>, flags: Flags, body: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<U, Error> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.pipe(move |result| match result {
            Ok(value) => submit(on, flags, Slot::Map, move || {
                resolver.resolve(catching(move || body(value)))
            }),
            Err(err) => resolver.reject(err),
        });
        promise
    }

    /// Like [`map`](Self::map), but `None` rejects with [`Error::CompactMap`].
    pub fn compact_map<U, F>(&self, body: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Option<U> + Send + 'static,
    {
        self.compact_map_with(None, Flags::NONE, body)
    }

    pub fn compact_map_on<U, F>(
        &self,
        on: impl Into<Context>,
        flags: Flags,
        body: F,
    ) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Option<U> + Send + 'static,
    {
        self.compact_map_with(Some(on.into()), flags, body)
    }

    fn compact_map_with<U, F>(&self, on: Option<Context>, flags: Flags, body: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Option<U> + Send + 'static,
    {
        self.map_with(on, flags, move |value| body(value).ok_or(Error::CompactMap))
    }

    /// Continues with another promise; its outcome becomes the outcome of the
    /// returned promise.
    pub fn then<U, F>(&self, body: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Promise<U>, Error> + Send + 'static,
    {
        self.then_with(None, Flags::NONE, body)
    }

    pub fn then_on<U, F>(&self, on: impl Into<Context>, flags: Flags, body: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Promise<U>, Error> + Send + 'static,
    {
        self.then_with(Some(on.into()), flags, body)
    }

    fn then_with<U, F>(&self, on: Option<Context>, flags: Flags, body: F) -> Promise<U>
    where
        U: Clone + Send + 'static,
        F: FnOnce(T) -> Result<Promise<U>, Error> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.pipe(move |result| match result {
            Ok(value) => submit(on, flags, Slot::Map, move || {
                match catching(move || body(value)) {
                    // Forwarding is inline: the outer promise settles on the
                    // lane that settled the inner one.
                    Ok(inner) => inner.pipe(move |result| resolver.resolve(result)),
                    Err(err) => resolver.reject(err),
                }
            }),
            Err(err) => resolver.reject(err),
        });
        promise
    }

    /// Consumes the value. The returned promise can still be caught.
    pub fn done<F>(&self, body: F) -> Promise<()>
    where
        F: FnOnce(T) -> Result<(), Error> + Send + 'static,
    {
        self.done_with(None, Flags::NONE, body)
    }

    pub fn done_on<F>(&self, on: impl Into<Context>, flags: Flags, body: F) -> Promise<()>
    where
        F: FnOnce(T) -> Result<(), Error> + Send + 'static,
    {
        self.done_with(Some(on.into()), flags, body)
    }

    fn done_with<F>(&self, on: Option<Context>, flags: Flags, body: F) -> Promise<()>
    where
        F: FnOnce(T) -> Result<(), Error> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.pipe(move |result| match result {
            Ok(value) => submit(on, flags, Slot::Done, move || {
                resolver.resolve(catching(move || body(value)))
            }),
            Err(err) => resolver.reject(err),
        });
        promise
    }

    /// Looks at the value without consuming it; the value passes through
    /// unless `body` fails.
    pub fn get<F>(&self, body: F) -> Promise<T>
    where
        F: FnOnce(&T) -> Result<(), Error> + Send + 'static,
    {
        self.get_with(None, Flags::NONE, body)
    }

    pub fn get_on<F>(&self, on: impl Into<Context>, flags: Flags, body: F) -> Promise<T>
    where
        F: FnOnce(&T) -> Result<(), Error> + Send + 'static,
    {
        self.get_with(Some(on.into()), flags, body)
    }

    fn get_with<F>(&self, on: Option<Context>, flags: Flags, body: F) -> Promise<T>
    where
        F: FnOnce(&T) -> Result<(), Error> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.pipe(move |result| match result {
            Ok(value) => submit(on, flags, Slot::Done, move || {
                resolver.resolve(catching(move || body(&value).map(|()| value)))
            }),
            Err(err) => resolver.reject(err),
        });
        promise
    }

    /// Replaces a rejection with the outcome of another promise. Fulfilled
    /// values pass through without a dispatch.
    pub fn recover<F>(&self, body: F) -> Promise<T>
    where
        F: FnOnce(Error) -> Result<Promise<T>, Error> + Send + 'static,
    {
        self.recover_with(None, Flags::NONE, body)
    }

    pub fn recover_on<F>(&self, on: impl Into<Context>, flags: Flags, body: F) -> Promise<T>
    where
        F: FnOnce(Error) -> Result<Promise<T>, Error> + Send + 'static,
    {
        self.recover_with(Some(on.into()), flags, body)
    }

    fn recover_with<F>(&self, on: Option<Context>, flags: Flags, body: F) -> Promise<T>
    where
        F: FnOnce(Error) -> Result<Promise<T>, Error> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.pipe(move |result| match result {
            Ok(value) => resolver.fulfill(value),
            Err(err) => submit(on, flags, Slot::Map, move || {
                match catching(move || body(err)) {
                    Ok(inner) => inner.pipe(move |result| resolver.resolve(result)),
                    Err(err) => resolver.reject(err),
                }
            }),
        });
        promise
    }

    /// Runs `body` whatever the outcome, then passes the outcome through.
    pub fn ensure<F>(&self, body: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_with(None, Flags::NONE, body)
    }

    pub fn ensure_on<F>(&self, on: impl Into<Context>, flags: Flags, body: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        self.ensure_with(Some(on.into()), flags, body)
    }

    fn ensure_with<F>(&self, on: Option<Context>, flags: Flags, body: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.pipe(move |result| {
            submit(on, flags, Slot::Done, move || {
                // A panicking body turns the outcome into a rejection.
                resolver.resolve(catching(move || {
                    body();
                    result
                }))
            })
        });
        promise
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LaneId, SerialLane};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc::channel,
        Arc,
    };

    #[test]
    fn test_map_then_done() {
        let (tx, rx) = channel();
        Promise::value(42)
            .map(|x| Ok(x + 10))
            .then(|x| Ok(Promise::value(x * 2)))
            .done(move |x| {
                tx.send(x).unwrap();
                Ok(())
            })
            .cauterize();
        assert_eq!(rx.recv().unwrap(), 104);
    }

    #[test]
    fn test_map_failure_rejects_downstream() {
        let failed = Promise::value(1).map(|_| -> Result<i32, Error> { Err(Error::BadInput) });
        assert!(matches!(failed.wait(), Err(Error::BadInput)));

        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        let skipped = failed.map_on(Context::Inline, Flags::NONE, move |x| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(x)
        });
        assert!(matches!(skipped.error(), Some(Error::BadInput)));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_then_flattens_pending_inner() {
        let (inner, inner_resolver) = Promise::<&str>::pending();
        let outer = Promise::value(()).then_on(Context::Inline, Flags::NONE, move |()| Ok(inner));
        assert!(outer.is_pending());
        inner_resolver.fulfill("late");
        assert_eq!(outer.fulfilled(), Some("late"));
    }

    #[test]
    fn test_then_inner_rejection_flows_through() {
        let outer = Promise::value(1).then_on(Context::Inline, Flags::NONE, |_| {
            Ok(Promise::<i32>::rejected(Error::Cancelled))
        });
        assert!(outer.error().unwrap().is_cancelled());
    }

    #[test]
    fn test_compact_map() {
        let parse = |s: &str| s.parse::<i32>().ok();
        let some = Promise::value("12").compact_map_on(Context::Inline, Flags::NONE, parse);
        assert_eq!(some.fulfilled(), Some(12));
        let none = Promise::value("x").compact_map_on(Context::Inline, Flags::NONE, parse);
        assert!(matches!(none.error(), Some(Error::CompactMap)));
    }

    #[test]
    fn test_get_passes_value_through() {
        let (tx, rx) = channel();
        let passed = Promise::value(5).get_on(Context::Inline, Flags::NONE, move |x| {
            tx.send(*x).unwrap();
            Ok(())
        });
        assert_eq!(rx.try_recv().unwrap(), 5);
        assert_eq!(passed.fulfilled(), Some(5));
    }

    #[test]
    fn test_recover_replaces_rejection() {
        let recovered = Promise::<i32>::rejected(Error::BadInput)
            .recover_on(Context::Inline, Flags::NONE, |_| Ok(Promise::value(9)));
        assert_eq!(recovered.fulfilled(), Some(9));

        let rethrown = Promise::<i32>::rejected(Error::BadInput)
            .recover_on(Context::Inline, Flags::NONE, |err| Err(err));
        assert!(matches!(rethrown.error(), Some(Error::BadInput)));

        let untouched =
            Promise::value(3).recover_on(Context::Inline, Flags::NONE, |_| Ok(Promise::value(0)));
        assert_eq!(untouched.fulfilled(), Some(3));
    }

    #[test]
    fn test_ensure_runs_on_both_outcomes() {
        let count = Arc::new(AtomicUsize::new(0));
        let a = count.clone();
        let b = count.clone();
        let ok = Promise::value(1).ensure_on(Context::Inline, Flags::NONE, move || {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let err = Promise::<i32>::rejected(Error::BadInput).ensure_on(
            Context::Inline,
            Flags::NONE,
            move || {
                b.fetch_add(1, Ordering::SeqCst);
            },
        );
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(ok.fulfilled(), Some(1));
        assert!(err.is_rejected());
        err.cauterize();
    }

    #[test]
    fn test_selection_happens_at_settlement() {
        let lane = SerialLane::new("chain-late").unwrap();
        let id = lane.id();
        let (start, resolver) = Promise::<i32>::pending();
        let seen = start.map_on(lane, Flags::NONE, |_| Ok(LaneId::current()));
        resolver.fulfill(0);
        assert_eq!(seen.wait().unwrap(), Some(id));
    }

    fn panic_text(err: Option<Error>) -> Option<String> {
        match err {
            Some(Error::Panicked(message)) => Some(message),
            _ => None,
        }
    }

    #[test]
    fn test_inline_panic_spares_sibling_continuations() {
        let lane = SerialLane::new("chain-siblings").unwrap();
        let (start, resolver) = Promise::<i32>::pending();
        let broken = start.map_on(Context::Inline, Flags::NONE, |_| -> Result<i32, Error> {
            panic!("first sibling")
        });
        let (tx, rx) = channel();
        let healthy = start.map_on(Context::Inline, Flags::NONE, move |x| {
            tx.send(x).unwrap();
            Ok(x + 1)
        });
        lane.dispatch(Flags::NONE, Box::new(move || resolver.fulfill(1)));
        assert_eq!(healthy.wait().unwrap(), 2);
        assert_eq!(rx.try_recv().unwrap(), 1);
        assert!(broken.wait().is_err());
        assert_eq!(panic_text(broken.error()).as_deref(), Some("first sibling"));
    }

    #[test]
    fn test_lane_panic_reaches_catch() {
        let lane = SerialLane::new("chain-panic").unwrap();
        let (tx, rx) = channel();
        Promise::value(1)
            .map_on(lane, Flags::NONE, |_| -> Result<i32, Error> { panic!("boom") })
            .catch_on(Context::Inline, Flags::NONE, crate::CatchPolicy::AllErrors, move |err| {
                tx.send(err).unwrap()
            })
            .finally_on(Context::Inline, Flags::NONE, || ());
        let caught = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(panic_text(Some(caught)).as_deref(), Some("boom"));
    }

    #[test]
    fn test_panics_reject_every_operator() {
        let done = Promise::value(1).done_on(Context::Inline, Flags::NONE, |_| panic!("done"));
        assert_eq!(panic_text(done.error()).as_deref(), Some("done"));

        let ensured =
            Promise::value(1).ensure_on(Context::Inline, Flags::NONE, || panic!("ensure"));
        assert_eq!(panic_text(ensured.error()).as_deref(), Some("ensure"));

        let got = Promise::value(1).get_on(Context::Inline, Flags::NONE, |_| panic!("get"));
        assert_eq!(panic_text(got.error()).as_deref(), Some("get"));

        let then = Promise::value(1)
            .then_on(Context::Inline, Flags::NONE, |_| -> Result<Promise<i32>, Error> {
                panic!("then")
            });
        assert_eq!(panic_text(then.error()).as_deref(), Some("then"));

        let recovered = Promise::<i32>::rejected(Error::BadInput)
            .recover_on(Context::Inline, Flags::NONE, |_| panic!("recover"));
        assert_eq!(panic_text(recovered.error()).as_deref(), Some("recover"));
    }
}
