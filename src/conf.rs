//! Process-wide defaults for where continuations run.
//!
//! Two slots: [`Slot::Map`] is used by transformation operators (`map`,
//! `compact_map`, `then`, `recover`) and [`Slot::Done`] by completion
//! operators (`done`, `get`, `catch`, `ensure`, `finally`) whenever the caller
//! does not name a context. Each slot can be read and written as a generic
//! [`Context`] or, narrowed, as a [`SerialLane`]; both views share storage.
//!
//! Changes are global. Code that changes the configuration temporarily should
//! hold a [`Scope`] from [`scoped`], which puts the previous configuration
//! back when dropped.
//!
//! ```
//! use promise_lane::{conf, SerialLane};
//!
//! let lane = SerialLane::new("ui").unwrap();
//! {
//!     let _scope = conf::scoped(|conf| conf.set_map_lane(lane.clone()));
//!     assert_eq!(conf::map_lane(), Some(lane.clone()));
//! }
//! assert_eq!(conf::map_lane(), Some(SerialLane::main()));
//! ```
use crate::{Context, Dispatcher, Error, SerialLane};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::{
    fmt,
    sync::{Arc, LazyLock},
};
use tracing::error;

pub type UnhandledHook = Arc<dyn Fn(&Error) + Send + Sync>;

static CONF: LazyLock<RwLock<Conf>> = LazyLock::new(|| RwLock::new(Conf::default()));
static SCOPE: Mutex<()> = Mutex::new(());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// Transformation continuations.
    Map,
    /// Completion continuations.
    Done,
}

#[derive(Clone)]
pub struct Conf {
    pub map: Context,
    pub done: Context,
    /// Receives rejections nobody handled.
    pub unhandled: UnhandledHook,
}

impl Default for Conf {
    fn default() -> Self {
        Conf {
            map: Context::main(),
            done: Context::main(),
            unhandled: Arc::new(log_unhandled),
        }
    }
}

fn log_unhandled(err: &Error) {
    error!(error = %err, "unhandled promise rejection");
}

impl Conf {
    pub fn slot(&self, slot: Slot) -> &Context {
        match slot {
            Slot::Map => &self.map,
            Slot::Done => &self.done,
        }
    }

    pub fn set_slot(&mut self, slot: Slot, context: impl Into<Context>) {
        let context = context.into();
        match slot {
            Slot::Map => self.map = context,
            Slot::Done => self.done = context,
        }
    }

    /// `None` when the slot holds something that is not a serial lane.
    pub fn slot_lane(&self, slot: Slot) -> Option<SerialLane> {
        self.slot(slot).as_lane()
    }

    pub fn set_map(&mut self, context: impl Into<Context>) {
        self.set_slot(Slot::Map, context)
    }

    pub fn set_done(&mut self, context: impl Into<Context>) {
        self.set_slot(Slot::Done, context)
    }

    pub fn map_lane(&self) -> Option<SerialLane> {
        self.slot_lane(Slot::Map)
    }

    pub fn done_lane(&self) -> Option<SerialLane> {
        self.slot_lane(Slot::Done)
    }

    pub fn set_map_lane(&mut self, lane: SerialLane) {
        self.map = Context::Lane(lane);
    }

    pub fn set_done_lane(&mut self, lane: SerialLane) {
        self.done = Context::Lane(lane);
    }
}

impl fmt::Debug for Conf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conf")
            .field("map", &self.map)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

/// A consistent snapshot of the current configuration.
pub fn get() -> Conf {
    CONF.read().clone()
}

pub fn set(conf: Conf) {
    replace(conf);
}

/// Installs `conf` and returns the configuration it replaced.
pub fn replace(conf: Conf) -> Conf {
    std::mem::replace(&mut *CONF.write(), conf)
}

/// Changes part of the configuration under a single write lock, so readers
/// see either the old or the new configuration, never a mix.
pub fn update(f: impl FnOnce(&mut Conf)) {
    f(&mut *CONF.write())
}

pub fn map() -> Context {
    context(Slot::Map)
}

pub fn done() -> Context {
    context(Slot::Done)
}

pub fn set_map(context: impl Into<Context>) {
    let context = context.into();
    update(|conf| conf.map = context)
}

pub fn set_done(context: impl Into<Context>) {
    let context = context.into();
    update(|conf| conf.done = context)
}

pub fn map_lane() -> Option<SerialLane> {
    CONF.read().map_lane()
}

pub fn done_lane() -> Option<SerialLane> {
    CONF.read().done_lane()
}

pub fn set_map_lane(lane: SerialLane) {
    update(|conf| conf.set_map_lane(lane))
}

pub fn set_done_lane(lane: SerialLane) {
    update(|conf| conf.set_done_lane(lane))
}

pub fn set_unhandled(hook: impl Fn(&Error) + Send + Sync + 'static) {
    let hook: UnhandledHook = Arc::new(hook);
    update(|conf| conf.unhandled = hook)
}

pub(crate) fn context(slot: Slot) -> Context {
    CONF.read().slot(slot).clone()
}

pub(crate) fn report_unhandled(err: &Error) {
    // Clone the hook out so it runs without the lock held.
    let hook = CONF.read().unhandled.clone();
    hook(err)
}

/// Restores the configuration captured by [`scoped`] when dropped.
#[must_use = "the previous configuration is restored as soon as the scope is dropped"]
pub struct Scope {
    previous: Option<Conf>,
    _serial: MutexGuard<'static, ()>,
}

/// Applies `f` to a copy of the current configuration, installs the copy and
/// returns a guard that restores the original on every exit path.
///
/// Scopes are serialized across threads: a second `scoped` call blocks until
/// the first scope is dropped. Do not nest scopes on one thread.
pub fn scoped(f: impl FnOnce(&mut Conf)) -> Scope {
    let serial = SCOPE.lock();
    let mut conf = get();
    f(&mut conf);
    let previous = replace(conf);
    Scope {
        previous: Some(previous),
        _serial: serial,
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            set(previous);
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope").field("previous", &self.previous).finish()
    }
}
