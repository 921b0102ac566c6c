//! A concurrent pool: several workers pull work from one FIFO queue.
//!
//! Work submitted with [`Flags::BARRIER`] runs alone. It starts once all
//! work submitted before it has finished, and nothing submitted after it
//! starts until it returns.
use crate::{
    dispatcher::{run_guarded, Dispatcher, Flags, Work},
    registry::{self, LaneId},
};
use parking_lot::{Condvar, Mutex};
use std::{
    collections::VecDeque,
    fmt, io,
    num::NonZeroUsize,
    sync::{Arc, LazyLock},
    thread,
};
use tracing::debug;

static GLOBAL: LazyLock<Pool> = LazyLock::new(|| {
    let width = thread::available_parallelism().map_or(4, NonZeroUsize::get);
    Pool::new("global", width)
        .unwrap_or_else(|err| panic!("failed to spawn the global pool: {err}"))
});

#[derive(Clone)]
pub struct Pool {
    handle: Arc<Handle>,
}

/// Closes the queue when the last `Pool` handle goes away. Workers keep
/// `Shared` alive until they have drained it.
struct Handle {
    shared: Arc<Shared>,
}

struct Shared {
    id: LaneId,
    label: String,
    width: usize,
    queue: Mutex<Queue>,
    changed: Condvar,
}

#[derive(Default)]
struct Queue {
    jobs: VecDeque<(Flags, Work)>,
    running: usize,
    barrier: bool,
    closed: bool,
}

impl Queue {
    fn can_start(&self, flags: Flags) -> bool {
        if flags.is_barrier() {
            self.running == 0 && !self.barrier
        } else {
            !self.barrier
        }
    }

    fn start(&mut self, flags: Flags) {
        if flags.is_barrier() {
            self.barrier = true;
        } else {
            self.running += 1;
        }
    }

    fn finish(&mut self, flags: Flags) {
        if flags.is_barrier() {
            self.barrier = false;
        } else {
            self.running -= 1;
        }
    }
}

impl Pool {
    pub fn new(label: impl Into<String>, width: usize) -> io::Result<Self> {
        let label = label.into();
        let width = width.max(1);
        let shared = Arc::new(Shared {
            id: LaneId::next(),
            label,
            width,
            queue: Mutex::new(Queue::default()),
            changed: Condvar::new(),
        });
        for n in 0..width {
            let worker = shared.clone();
            thread::Builder::new()
                .name(format!("{}-{n}", shared.label))
                .spawn(move || run(worker))?;
        }
        debug!(lane = %shared.id, label = %shared.label, width, "spawned pool");
        Ok(Pool {
            handle: Arc::new(Handle { shared }),
        })
    }

    /// The process-wide background pool, one worker per available core.
    ///
    /// # Panics
    ///
    /// If the operating system refuses to spawn the pool's workers.
    pub fn global() -> Self {
        GLOBAL.clone()
    }

    pub fn id(&self) -> LaneId {
        self.handle.shared.id
    }

    pub fn label(&self) -> &str {
        &self.handle.shared.label
    }

    pub fn width(&self) -> usize {
        self.handle.shared.width
    }
}

fn run(shared: Arc<Shared>) {
    let _entered = registry::enter(shared.id);
    loop {
        let (flags, work) = {
            let mut queue = shared.queue.lock();
            loop {
                match queue.jobs.front().map(|(flags, _)| *flags) {
                    Some(flags) if queue.can_start(flags) => {
                        if let Some(job) = queue.jobs.pop_front() {
                            queue.start(flags);
                            break job;
                        }
                    }
                    None if queue.closed => return,
                    _ => shared.changed.wait(&mut queue),
                }
            }
        };
        run_guarded(shared.id, work);
        shared.queue.lock().finish(flags);
        shared.changed.notify_all();
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.shared.queue.lock().closed = true;
        self.shared.changed.notify_all();
        debug!(lane = %self.shared.id, "pool closed");
    }
}

impl Dispatcher for Pool {
    fn dispatch(&self, flags: Flags, work: Work) {
        let shared = &self.handle.shared;
        shared.queue.lock().jobs.push_back((flags, work));
        // A barrier at the front may be waiting on a different worker than
        // the one notify_one would pick.
        shared.changed.notify_all();
    }

    fn lane(&self) -> Option<LaneId> {
        Some(self.handle.shared.id)
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.id())
            .field("label", &self.label())
            .field("width", &self.width())
            .finish()
    }
}
