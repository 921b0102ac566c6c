//! A serial lane runs submitted work one item at a time, in submission
//! order, on a dedicated worker thread.
use crate::{
    dispatcher::{run_guarded, Dispatcher, Flags, Work},
    registry::{self, LaneId},
};
use std::{
    fmt, io,
    sync::{
        mpsc::{channel, Receiver, Sender},
        Arc, LazyLock,
    },
    thread,
};
use tracing::{debug, warn};

static MAIN: LazyLock<SerialLane> = LazyLock::new(|| {
    SerialLane::new("main").unwrap_or_else(|err| panic!("failed to spawn the main lane: {err}"))
});

/// Handle to a serial lane. Clones share the lane; the worker exits once the
/// last handle is dropped and the queued work has drained.
///
/// # Examples
///
/// ```
/// use promise_lane::{Dispatcher, Flags, LaneId, SerialLane};
/// use std::sync::mpsc::channel;
///
/// let lane = SerialLane::new("io").unwrap();
/// let (tx, rx) = channel();
/// for n in 0..3 {
///     let tx = tx.clone();
///     lane.dispatch(Flags::NONE, Box::new(move || tx.send((n, LaneId::current())).unwrap()));
/// }
/// let seen: Vec<_> = rx.iter().take(3).collect();
/// assert_eq!(seen, vec![(0, Some(lane.id())), (1, Some(lane.id())), (2, Some(lane.id()))]);
/// ```
#[derive(Clone)]
pub struct SerialLane {
    inner: Arc<Inner>,
}

struct Inner {
    id: LaneId,
    label: String,
    sender: Sender<Work>,
}

impl SerialLane {
    pub fn new(label: impl Into<String>) -> io::Result<Self> {
        let label = label.into();
        let id = LaneId::next();
        let (sender, receiver) = channel();
        thread::Builder::new()
            .name(label.clone())
            .spawn(move || run(id, receiver))?;
        debug!(lane = %id, %label, "spawned serial lane");
        Ok(SerialLane {
            inner: Arc::new(Inner { id, label, sender }),
        })
    }

    /// The process-wide main lane, spawned on first use.
    ///
    /// Every call returns a new handle to the same lane.
    ///
    /// # Panics
    ///
    /// If the operating system refuses to spawn the lane's worker thread.
    pub fn main() -> Self {
        MAIN.clone()
    }

    pub fn id(&self) -> LaneId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_main(&self) -> bool {
        self.id() == MAIN.id()
    }

    /// True when called from work running on this lane.
    pub fn is_current(&self) -> bool {
        LaneId::current() == Some(self.id())
    }
}

fn run(id: LaneId, receiver: Receiver<Work>) {
    let _entered = registry::enter(id);
    for work in receiver {
        run_guarded(id, work);
    }
    debug!(lane = %id, "serial lane closed");
}

impl Dispatcher for SerialLane {
    fn dispatch(&self, _flags: Flags, work: Work) {
        if self.inner.sender.send(work).is_err() {
            warn!(lane = %self.inner.id, "serial lane worker is gone, dropping work");
        }
    }

    fn lane(&self) -> Option<LaneId> {
        Some(self.inner.id)
    }

    fn as_lane(&self) -> Option<SerialLane> {
        Some(self.clone())
    }
}

impl PartialEq for SerialLane {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for SerialLane {}

impl fmt::Debug for SerialLane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialLane")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .finish()
    }
}
