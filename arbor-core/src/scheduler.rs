//! Scheduling
//!
//! The runtime never spawns work on its own. Deferred flushes, the batch
//! safety net and retry timers all go through a [`Scheduler`], so the host
//! decides what "later" means.
//!
//! Two implementations ship with the crate:
//!
//! - [`ManualScheduler`]: a deterministic queue with a virtual clock. Tasks
//!   run only when the host calls [`ManualScheduler::run_pending`] or
//!   [`ManualScheduler::advance`]. This is what tests use.
//! - [`TokioScheduler`]: spawns onto a tokio runtime and uses
//!   `tokio::time::sleep` for timers.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// A unit of deferred work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Identifier of a scheduled timer, used for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Host hook for deferred work.
pub trait Scheduler: Send + Sync {
    /// Run `task` once the current synchronous unit of work is complete.
    fn schedule_flush(&self, task: Task);

    /// Run `task` after `delay`.
    fn schedule_after(&self, delay: Duration, task: Task) -> TimerId;

    /// Cancel a timer. Cancelling a fired or unknown timer is a no-op.
    fn cancel(&self, timer: TimerId);
}

// ----------------------------------------------------------------------------
// Manual scheduler
// ----------------------------------------------------------------------------

#[derive(Default)]
struct ManualState {
    queue: VecDeque<Task>,
    /// Timers ordered by (deadline, id) so equal deadlines fire in creation order.
    timers: BTreeMap<(Duration, TimerId), Task>,
    deadlines: HashMap<TimerId, Duration>,
    now: Duration,
}

/// A deterministic scheduler driven by the host.
#[derive(Default)]
pub struct ManualScheduler {
    state: Mutex<ManualState>,
}

impl ManualScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Run queued tasks until the queue is empty, including tasks queued by
    /// the tasks themselves. Returns the number of tasks run.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = self.state.lock().queue.pop_front();
            match task {
                Some(task) => {
                    task();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    /// Move the virtual clock forward, firing due timers in deadline order.
    /// Queued tasks are drained before and after each timer.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.lock().now + by;
        let mut ran = self.run_pending();

        loop {
            let due = {
                let mut state = self.state.lock();
                let next = state
                    .timers
                    .keys()
                    .next()
                    .copied()
                    .filter(|(deadline, _)| *deadline <= target);
                match next {
                    Some(key) => {
                        state.now = key.0;
                        state.deadlines.remove(&key.1);
                        state.timers.remove(&key)
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };

            match due {
                Some(task) => {
                    task();
                    ran += 1 + self.run_pending();
                }
                None => return ran,
            }
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.state.lock().now
    }

    pub fn pending_tasks(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn pending_timers(&self) -> usize {
        self.state.lock().timers.len()
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_flush(&self, task: Task) {
        self.state.lock().queue.push_back(task);
    }

    fn schedule_after(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId::next();
        let mut state = self.state.lock();
        let deadline = state.now + delay;
        state.deadlines.insert(id, deadline);
        state.timers.insert((deadline, id), task);
        id
    }

    fn cancel(&self, timer: TimerId) {
        let mut state = self.state.lock();
        if let Some(deadline) = state.deadlines.remove(&timer) {
            state.timers.remove(&(deadline, timer));
        }
    }
}

// ----------------------------------------------------------------------------
// Tokio scheduler
// ----------------------------------------------------------------------------

/// Scheduler backed by a tokio runtime.
pub struct TokioScheduler {
    handle: Handle,
    timers: Arc<Mutex<HashMap<TimerId, JoinHandle<()>>>>,
}

impl TokioScheduler {
    pub fn new(handle: Handle) -> Arc<Self> {
        Arc::new(Self {
            handle,
            timers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Use the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current() -> Arc<Self> {
        Self::new(Handle::current())
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_flush(&self, task: Task) {
        self.handle.spawn(async move { task() });
    }

    fn schedule_after(&self, delay: Duration, task: Task) -> TimerId {
        let id = TimerId::next();
        let timers = Arc::clone(&self.timers);
        // Hold the map lock across spawn so the task cannot remove its entry
        // before it has been inserted.
        let mut guard = self.timers.lock();
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            timers.lock().remove(&id);
            task();
        });
        guard.insert(id, join);
        id
    }

    fn cancel(&self, timer: TimerId) {
        if let Some(join) = self.timers.lock().remove(&timer) {
            join.abort();
        }
    }
}
