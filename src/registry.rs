//! Lane identity.
//!
//! Every execution lane (a [`SerialLane`](crate::SerialLane) or a
//! [`Pool`](crate::Pool)) owns an opaque [`LaneId`]. Handles are compared by
//! that token, never by the address of the wrapper, so two distinct handles
//! (a clone, an `Arc<dyn Dispatcher>` around the same lane, a fresh
//! `SerialLane::main()` call) are recognised as the same lane.
use crate::Dispatcher;
use std::{
    cell::Cell,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: Cell<Option<LaneId>> = const { Cell::new(None) };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LaneId(u64);

impl LaneId {
    pub(crate) fn next() -> Self {
        LaneId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The lane whose worker is running the calling code, if any.
    ///
    /// Work executed with [`Context::Inline`](crate::Context::Inline) reports
    /// the lane of whoever invoked it.
    pub fn current() -> Option<LaneId> {
        CURRENT.with(Cell::get)
    }
}

impl fmt::Display for LaneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lane#{}", self.0)
    }
}

/// Marks the calling thread as running on `id` until the guard is dropped.
pub(crate) fn enter(id: LaneId) -> Entered {
    let previous = CURRENT.with(|current| current.replace(Some(id)));
    Entered { previous }
}

pub(crate) struct Entered {
    previous: Option<LaneId>,
}

impl Drop for Entered {
    fn drop(&mut self) {
        CURRENT.with(|current| current.set(self.previous));
    }
}

/// True when both handles denote the same physical lane.
///
/// Handles without a lane identity (`Context::Inline`, dispatchers that do
/// not report one) never compare equal.
pub fn same_lane(a: &dyn Dispatcher, b: &dyn Dispatcher) -> bool {
    matches!((a.lane(), b.lane()), (Some(a), Some(b)) if a == b)
}

/// True when the calling code is already running on `dispatcher`'s lane.
pub fn is_current(dispatcher: &dyn Dispatcher) -> bool {
    matches!((dispatcher.lane(), LaneId::current()), (Some(a), Some(b)) if a == b)
}
