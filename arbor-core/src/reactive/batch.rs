//! Batching
//!
//! A batch is a re-entrant counter. Writes made while it is open are
//! accumulated per written node; when the outermost batch closes, the
//! accumulated writes are diffed once and fanned out to deferred listeners.
//!
//! # How a Flush Works
//!
//! 1. Take the pending writes. For every written node diff the first
//!    `prev` against the latest `value` and route the records.
//!
//! 2. Build listener calls under the lock, then release it and run them.
//!
//! 3. Listeners may write. Those writes land in a new pending map and the
//!    "flush again" flag makes the loop run one more pass instead of
//!    recursing.
//!
//! # Safety Net
//!
//! [`Runtime::begin_batch`] arms a task on the scheduler. If the batch is
//! still open when the task runs, it was abandoned (typically by an early
//! return or a panic between begin and end), so the task forces it closed and
//! flushes.

use std::collections::HashSet;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::thread;

use indexmap::{IndexMap, IndexSet};
use tracing::{trace, warn};

use super::activation::height;
use super::notify::{collect, fire, prepare_calls, ChangeSet};
use super::runtime::{Runtime, State};
use crate::config::FlushMode;
use crate::graph::diff::diff;
use crate::graph::NodeId;
use crate::value::{deep_equal, Value};

/// Writes to one node since the batch opened.
#[derive(Debug, Clone)]
pub(crate) struct PendingWrite {
    /// Value before the first write of the batch.
    pub prev: Value,
    /// Value after the latest write.
    pub value: Value,
}

#[derive(Debug, Default)]
pub(crate) struct BatchState {
    pub depth: usize,
    pub pending: IndexMap<NodeId, PendingWrite>,
    pub flushing: bool,
    pub flush_again: bool,
    /// Incremented every time the outermost batch closes.
    pub generation: u64,
    pub safety_net_armed: bool,
    /// An implicit batch opened by a write in deferred flush mode.
    pub implicit: bool,
    /// Activations whose dependencies changed and that have not re-run.
    pub stale: IndexSet<NodeId>,
}

impl BatchState {
    /// Fold a write into the pending map. A write that restores the value
    /// the batch started with cancels the entry.
    pub fn record(&mut self, node: NodeId, prev: Value, value: Value) {
        match self.pending.get_mut(&node) {
            Some(entry) => {
                entry.value = value;
                let reverted = deep_equal(&entry.prev, &entry.value)
                    && !matches!(entry.prev, Value::Array(_));
                if reverted {
                    self.pending.shift_remove(&node);
                }
            }
            None => {
                self.pending.insert(node, PendingWrite { prev, value });
            }
        }
    }
}

/// Keeps a batch open until dropped.
///
/// Dropping the guard during a panic still flushes, but listener panics from
/// that flush are swallowed so they cannot abort the unwinding thread.
#[must_use = "the batch ends when the guard is dropped"]
pub struct BatchGuard {
    runtime: Runtime,
    active: bool,
}

impl BatchGuard {
    pub(crate) fn new(runtime: &Runtime) -> Self {
        runtime.enter_batch();
        Self {
            runtime: runtime.clone(),
            active: true,
        }
    }

    /// End the batch now.
    pub fn end(mut self) {
        self.active = false;
        self.runtime.exit_batch();
    }
}

impl Drop for BatchGuard {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if thread::panicking() {
            let runtime = self.runtime.clone();
            let _ = panic::catch_unwind(AssertUnwindSafe(move || runtime.exit_batch()));
        } else {
            self.runtime.exit_batch();
        }
    }
}

impl Runtime {
    /// Open a batch that stays open until [`Runtime::end_batch`].
    ///
    /// Arms a safety-net task that force-closes the batch if it is still
    /// open when the scheduler runs deferred work.
    pub fn begin_batch(&self) {
        let arm = {
            let mut state = self.inner().state.lock();
            state.batch.depth += 1;
            if state.batch.safety_net_armed {
                None
            } else {
                state.batch.safety_net_armed = true;
                Some(state.batch.generation)
            }
        };

        if let Some(generation) = arm {
            let weak = self.downgrade();
            self.scheduler().schedule_flush(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Runtime::from_inner(inner).force_complete(generation);
                }
            }));
        }
    }

    /// Close a batch opened by [`Runtime::begin_batch`]. Closing the outermost
    /// batch flushes.
    ///
    /// # Panics
    ///
    /// Re-raises the first listener panic of the flush, after every other
    /// listener has run.
    pub fn end_batch(&self) {
        self.exit_batch();
    }

    /// Run `f` with notifications deferred until it returns.
    pub fn batch<T>(&self, f: impl FnOnce() -> T) -> T {
        let guard = BatchGuard::new(self);
        let value = f();
        guard.end();
        value
    }

    /// Open a batch scoped to the returned guard.
    pub fn batch_guard(&self) -> BatchGuard {
        BatchGuard::new(self)
    }

    pub fn in_batch(&self) -> bool {
        self.inner().state.lock().batch.depth > 0
    }

    pub(crate) fn enter_batch(&self) {
        self.inner().state.lock().batch.depth += 1;
    }

    pub(crate) fn exit_batch(&self) {
        let flush = {
            let mut state = self.inner().state.lock();
            if state.batch.depth == 0 {
                return;
            }
            state.batch.depth -= 1;
            if state.batch.depth == 0 {
                state.batch.generation += 1;
                state.batch.safety_net_armed = false;
                true
            } else {
                false
            }
        };

        if flush {
            self.flush();
        }
    }

    /// In deferred flush mode, open an implicit batch for a write made
    /// outside of any batch and schedule its end.
    pub(crate) fn open_implicit_batch(&self) {
        if self.config().flush_mode != FlushMode::Deferred {
            return;
        }

        let opened = {
            let mut state = self.inner().state.lock();
            let batch = &mut state.batch;
            if batch.depth == 0 && !batch.flushing && !batch.implicit {
                batch.depth += 1;
                batch.implicit = true;
                true
            } else {
                false
            }
        };

        if opened {
            let weak = self.downgrade();
            self.scheduler().schedule_flush(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Runtime::from_inner(inner).close_implicit_batch();
                }
            }));
        }
    }

    fn close_implicit_batch(&self) {
        let open = mem::take(&mut self.inner().state.lock().batch.implicit);
        if open {
            self.exit_batch();
        }
    }

    fn force_complete(&self, generation: u64) {
        let abandoned = {
            let mut state = self.inner().state.lock();
            let batch = &mut state.batch;
            if batch.generation != generation || batch.depth == 0 {
                false
            } else {
                warn!(depth = batch.depth, "batch was never ended; forcing it closed");
                batch.depth = 0;
                batch.implicit = false;
                batch.generation += 1;
                batch.safety_net_armed = false;
                true
            }
        };

        if abandoned {
            self.flush();
        }
    }

    /// Deliver pending writes to deferred listeners until none are left.
    pub(crate) fn flush(&self) {
        {
            let mut state = self.inner().state.lock();
            if state.batch.flushing {
                state.batch.flush_again = true;
                return;
            }
            state.batch.flushing = true;
        }

        let mut first_panic = None;
        loop {
            let calls = {
                let mut guard = self.inner().state.lock();
                let state = &mut *guard;
                let pending = mem::take(&mut state.batch.pending);
                state.batch.flush_again = false;
                trace!(writes = pending.len(), "flush pass");

                let mut set = ChangeSet::default();
                for (node, write) in &pending {
                    let changes = diff(&write.prev, &write.value, &self.config().id_fields);
                    collect(&state.graph, *node, &changes.changes, false, &mut set);
                }
                prepare_calls(&state.graph, set, false, &mut HashSet::new())
            };

            if let Some(payload) = fire(calls) {
                first_panic.get_or_insert(payload);
            }

            // Deliveries settle before any stale producer re-runs
            let stale = {
                let mut guard = self.inner().state.lock();
                let state = &mut *guard;
                if state.batch.flush_again || !state.batch.pending.is_empty() {
                    continue;
                }
                match next_stale(state) {
                    Some(node) => node,
                    None => {
                        state.batch.flushing = false;
                        break;
                    }
                }
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.rerun(stale))) {
                first_panic.get_or_insert(payload);
            }
        }

        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }
}

/// Remove and return the stale activation with the lowest height.
fn next_stale(state: &mut State) -> Option<NodeId> {
    let (index, _) = state
        .batch
        .stale
        .iter()
        .enumerate()
        .min_by_key(|(_, node)| height(&state.graph, **node))?;
    state.batch.stale.shift_remove_index(index)
}
