//! Settle-once promises whose continuations run on pluggable execution lanes.
//!
//! A [`Promise`] is created together with its [`Resolver`]. Chaining
//! operators (`map`, `then`, `done`, `catch`, ...) return new promises and
//! each continuation body runs on an execution [`Context`]: either the one
//! given explicitly with the `*_on` variant of the operator, or the one
//! configured globally in [`conf`] for the operator's class.
//!
//! # Examples
//!
//! ```
//! use promise_lane::{Context, Promise};
//! use std::sync::mpsc::channel;
//!
//! let (tx, rx) = channel();
//! Promise::value(42)
//!     .map(|x| Ok(x + 10))
//!     .done(move |x| {
//!         tx.send(x).ok();
//!         Ok(())
//!     })
//!     .cauterize();
//! assert_eq!(rx.recv().unwrap(), 52);
//!
//! // Explicit `Context::Inline` never hops: the body runs on the settling thread.
//! let doubled = Promise::value(21).map_on(Context::Inline, Default::default(), |x| Ok(x * 2));
//! assert_eq!(doubled.fulfilled(), Some(42));
//! ```
use std::sync::Arc;

pub mod catch;
pub mod chain;
pub mod conf;
pub mod dispatcher;
pub mod lane;
pub mod pool;
pub mod promise;
pub mod registry;

pub use catch::{CatchPolicy, Finalizer};
pub use conf::{Conf, Slot};
pub use dispatcher::{Context, Dispatcher, DispatcherExt, Flags, Work};
pub use lane::SerialLane;
pub use pool::Pool;
pub use promise::{Promise, Resolver};
pub use registry::LaneId;

/// The failure channel of every promise.
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("bad input")]
    BadInput,
    #[error("the operation was cancelled")]
    Cancelled,
    #[error("compact_map body returned nothing")]
    CompactMap,
    /// A continuation body panicked; carries the panic message.
    #[error("continuation panicked: {0}")]
    Panicked(String),
    #[error(transparent)]
    Other(Arc<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps any error so it can travel down a promise chain.
    pub fn other<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Other(Arc::new(error))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
