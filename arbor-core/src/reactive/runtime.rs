//! Reactive Runtime
//!
//! The runtime is the engine context that ties the node graph, the tracking
//! context and the batch pipeline together. Everything a node handle does
//! goes through the runtime that created it.
//!
//! # How It Works
//!
//! 1. All mutable engine state (the node arena, the current tracking frame,
//!    the batch counters) lives in one [`State`] behind a mutex.
//!
//! 2. The lock is only held for graph bookkeeping. Listeners, producers,
//!    setters and scheduler hooks always run after it is released, so any of
//!    them may call back into the runtime.
//!
//! 3. Deferred work (flushes, the batch safety net, retry timers) is handed
//!    to the runtime's [`Scheduler`].
//!
//! # Multiple Runtimes
//!
//! Runtimes are independent: nodes, batches and tracking frames never cross
//! between them. [`Runtime::global`] provides a shared default instance.

use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::trace;

use super::batch::BatchState;
use super::context::{TrackingFrame, TrackingMode, TrackingScope};
use super::handle::Node;
use super::subscriber::{ListenerEntry, ListenerId};
use crate::config::EngineConfig;
use crate::graph::store::Graph;
use crate::graph::NodeId;
use crate::scheduler::{ManualScheduler, Scheduler};
use crate::value::Value;

/// Mutable engine state.
pub(crate) struct State {
    pub graph: Graph,
    /// Frame of the innermost tracked evaluation, if any.
    pub tracking: Option<TrackingFrame>,
    pub batch: BatchState,
}

impl State {
    fn new(config: &EngineConfig) -> Self {
        Self {
            graph: Graph::new(config.max_link_depth),
            tracking: None,
            batch: BatchState::default(),
        }
    }

    pub fn record_read(&mut self, node: NodeId, mode: TrackingMode) {
        if let Some(frame) = self.tracking.as_mut() {
            frame.record(node, mode);
        }
    }

    pub fn add_listener(&mut self, node: NodeId, entry: ListenerEntry, immediate: bool) -> ListenerId {
        let id = entry.id;
        let record = self.graph.node_mut(node);
        if immediate {
            record.listeners_immediate.push(entry);
        } else {
            record.listeners.push(entry);
        }
        self.graph.adjust_listener_count(node, 1);
        id
    }

    pub fn remove_listener(&mut self, node: NodeId, id: ListenerId) -> bool {
        let record = self.graph.node_mut(node);
        let before = record.local_listener_count();
        record.listeners.retain(|entry| entry.id != id);
        record.listeners_immediate.retain(|entry| entry.id != id);
        let removed = before - record.local_listener_count();
        if removed > 0 {
            self.graph.adjust_listener_count(node, -(removed as isize));
        }
        removed > 0
    }
}

pub(crate) struct RuntimeInner {
    pub state: Mutex<State>,
    pub scheduler: Arc<dyn Scheduler>,
    pub config: EngineConfig,
}

/// Handle to a reactive engine. Cloning is cheap and shares the engine.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

/// A dependency discovered by [`Runtime::run_tracked`].
#[derive(Debug, Clone, PartialEq)]
pub struct Dependency {
    pub node: Node,
    pub mode: TrackingMode,
}

/// Result of a tracked evaluation.
#[derive(Debug)]
pub struct Tracked<T> {
    pub value: T,
    /// Nodes read during the evaluation, in first-read order.
    pub dependencies: Vec<Dependency>,
}

static GLOBAL: OnceLock<(Runtime, Arc<ManualScheduler>)> = OnceLock::new();

fn global_parts() -> &'static (Runtime, Arc<ManualScheduler>) {
    GLOBAL.get_or_init(|| {
        let scheduler = ManualScheduler::new();
        (Runtime::new(scheduler.clone()), scheduler)
    })
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new(scheduler: Arc<dyn Scheduler>) -> Self {
        Self::with_config(scheduler, EngineConfig::default())
    }

    pub fn with_config(scheduler: Arc<dyn Scheduler>, config: EngineConfig) -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                state: Mutex::new(State::new(&config)),
                scheduler,
                config,
            }),
        }
    }

    /// The process-wide default runtime.
    ///
    /// It runs on a [`ManualScheduler`], available through
    /// [`Runtime::global_scheduler`], which the host pumps to drive retry
    /// timers and the batch safety net.
    pub fn global() -> &'static Runtime {
        &global_parts().0
    }

    pub fn global_scheduler() -> Arc<ManualScheduler> {
        global_parts().1.clone()
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn inner(&self) -> &Arc<RuntimeInner> {
        &self.inner
    }

    pub(crate) fn downgrade(&self) -> Weak<RuntimeInner> {
        Arc::downgrade(&self.inner)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.inner.scheduler
    }

    /// Whether both handles refer to the same engine.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn node(&self, id: NodeId) -> Node {
        Node::new(self.clone(), id)
    }

    /// Build a root node over `value`.
    pub fn create_root(&self, value: impl Into<Value>) -> Node {
        let id = self.inner.state.lock().graph.create_root(value.into(), false);
        trace!(node = ?id, "root created");
        self.node(id)
    }

    /// Number of nodes created so far.
    pub fn node_count(&self) -> usize {
        self.inner.state.lock().graph.node_count()
    }

    /// Run `f` in a fresh tracking frame and report the nodes it read.
    pub fn run_tracked<T>(&self, f: impl FnOnce() -> T) -> Tracked<T> {
        let scope = TrackingScope::enter(self.inner.clone());
        let value = f();
        let frame = scope.finish();

        let dependencies = frame
            .iter()
            .map(|(id, read)| Dependency {
                node: self.node(id),
                mode: read.mode,
            })
            .collect();
        Tracked { value, dependencies }
    }

    /// Whether a tracked evaluation is running.
    pub fn is_tracking(&self) -> bool {
        self.inner.state.lock().tracking.is_some()
    }

    /// Undo one read of `node` in the current tracking frame.
    pub fn forget_read(&self, node: &Node) {
        if let Some(frame) = self.inner.state.lock().tracking.as_mut() {
            frame.forget(node.id());
        }
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("nodes", &self.node_count())
            .field("config", &self.inner.config)
            .finish()
    }
}
