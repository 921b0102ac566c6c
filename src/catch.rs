//! Terminating a chain: `catch`, `finally` and `cauterize`.
use crate::{
    chain::submit,
    conf::{self, Slot},
    dispatcher::catching,
    Context, Error, Flags, Promise,
};

/// Which rejections a `catch` handler sees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CatchPolicy {
    AllErrors,
    /// [`Error::Cancelled`] is swallowed without running the handler.
    #[default]
    AllErrorsExceptCancellation,
}

impl CatchPolicy {
    fn handles(self, err: &Error) -> bool {
        match self {
            CatchPolicy::AllErrors => true,
            CatchPolicy::AllErrorsExceptCancellation => !err.is_cancelled(),
        }
    }
}

/// The end of a caught chain. Settles once the catch handler (if it ran)
/// returned, or straight away when there was nothing to catch.
#[derive(Debug, Clone)]
#[must_use = "a finalizer does nothing unless `finally` is called or it is dropped deliberately"]
pub struct Finalizer {
    promise: Promise<()>,
}

impl Finalizer {
    /// Runs `body` after the chain ended, on the completion context.
    pub fn finally<F>(self, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.finally_with(None, Flags::NONE, body)
    }

    pub fn finally_on<F>(self, on: impl Into<Context>, flags: Flags, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.finally_with(Some(on.into()), flags, body)
    }

    fn finally_with<F>(self, on: Option<Context>, flags: Flags, body: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.promise
            .pipe(move |_| submit(on, flags, Slot::Done, move || run_terminal(body)));
    }

    /// Settles with `()` after the catch stage; never rejects.
    pub fn promise(&self) -> Promise<()> {
        self.promise.clone()
    }
}

impl<T> Promise<T>
where
    T: Clone + Send + 'static,
{
    /// Handles a rejection. Fulfilled values end the chain without a dispatch.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_lane::{Error, Promise};
    /// use std::sync::mpsc::channel;
    ///
    /// let (tx, rx) = channel();
    /// Promise::value(1)
    ///     .map(|_| -> Result<i32, Error> { Err(Error::BadInput) })
    ///     .catch(move |err| tx.send(err.to_string()).unwrap())
    ///     .finally(|| ());
    /// assert_eq!(rx.recv().unwrap(), "bad input");
    /// ```
    pub fn catch<F>(&self, body: F) -> Finalizer
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.catch_with(None, Flags::NONE, CatchPolicy::default(), body)
    }

    pub fn catch_on<F>(
        &self,
        on: impl Into<Context>,
        flags: Flags,
        policy: CatchPolicy,
        body: F,
    ) -> Finalizer
    where
        F: FnOnce(Error) + Send + 'static,
    {
        self.catch_with(Some(on.into()), flags, policy, body)
    }

    fn catch_with<F>(
        &self,
        on: Option<Context>,
        flags: Flags,
        policy: CatchPolicy,
        body: F,
    ) -> Finalizer
    where
        F: FnOnce(Error) + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        self.pipe(move |result| match result {
            Err(err) if policy.handles(&err) => submit(on, flags, Slot::Done, move || {
                run_terminal(move || body(err));
                resolver.fulfill(())
            }),
            _ => resolver.fulfill(()),
        });
        Finalizer { promise }
    }

    /// Ends the chain, sending any rejection (cancellation included) to the
    /// configured unhandled-failure hook instead of dropping it.
    pub fn cauterize(&self) {
        self.pipe(|result| {
            if let Err(err) = result {
                conf::report_unhandled(&err)
            }
        });
    }
}

/// Runs the body of a terminal stage. There is no later stage to reject, so
/// a panic goes to the unhandled-failure hook.
fn run_terminal(body: impl FnOnce()) {
    let outcome = catching(move || {
        body();
        Ok(())
    });
    if let Err(err) = outcome {
        conf::report_unhandled(&err)
    }
}
