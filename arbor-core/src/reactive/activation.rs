//! Computed and Linked Nodes
//!
//! An activation-backed node gets its value from a producer function instead
//! of direct writes.
//!
//! # How Activation Works
//!
//! 1. The node starts lazy. Nothing runs until the node (or a descendant,
//!    or a node linked to it) is read or gets its first listener.
//!
//! 2. Activating runs the producer inside a tracking scope. Every node it
//!    read gets a shared dependency listener that marks the node stale.
//!    Stale nodes re-run at the end of a flush pass, lowest height first,
//!    so a node that depends on another computed node runs once per change.
//!    Reading a stale node re-runs it on the spot.
//!
//! 3. The producer's result decides what happens next:
//!    - a value is stored in the node (state `Active`),
//!    - a node links this node to it, forwarding reads and writes,
//!    - a deferred value moves the node to `Loading` until it settles,
//!    - a failure (or a panic) moves the node to `Error` and consults the
//!      retry policy.
//!
//! 4. Each run bumps a generation counter. Results and retry timers that
//!    belong to an older run are ignored.
//!
//! # Two-Way Nodes
//!
//! A linked node with a setter never stores writes. A write to it, or to any
//! of its descendants, is turned into the would-be full value and handed to
//! the setter. Writes arriving while the node is still activating or loading
//! are queued and replayed once the run settles.

use std::collections::HashSet;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::context::TrackingScope;
use super::deferred::Deferred;
use super::handle::Node;
use super::retry::RetryPolicy;
use super::runtime::Runtime;
use super::subscriber::{ListenerEntry, ListenerFn, ListenerId};
use super::write::WriteOp;
use crate::error::ActivationError;
use crate::graph::store::Graph;
use crate::graph::{NodeId, NodeRecord};
use crate::scheduler::TimerId;
use crate::value::Value;

/// Lifecycle of an activation-backed node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    /// The producer has not run.
    Inactive,
    /// The producer is running.
    Activating,
    /// Waiting for a deferred result.
    Loading,
    /// A deferred result arrived.
    Loaded,
    /// A synchronous result (value or link) is in place.
    Active,
    /// The last run failed.
    Error,
}

/// Snapshot of an activation, for callers that render loading or error
/// states.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivationStatus {
    pub state: ActivationState,
    pub error: Option<ActivationError>,
    /// Consecutive failures since the last success or dependency change.
    pub failures: u32,
}

/// Arguments of a two-way setter.
#[derive(Debug, Clone, PartialEq)]
pub struct SetArgs {
    /// The full value the node would have after the write.
    pub value: Value,
    pub prev: Value,
}

/// What a producer returns.
pub enum Produced {
    Value(Value),
    /// Forward this node to another one.
    Link(Node),
    Pending(Deferred),
    Failed(ActivationError),
}

impl From<Value> for Produced {
    fn from(value: Value) -> Self {
        Produced::Value(value)
    }
}

impl From<Node> for Produced {
    fn from(node: Node) -> Self {
        Produced::Link(node)
    }
}

impl From<&Node> for Produced {
    fn from(node: &Node) -> Self {
        Produced::Link(node.clone())
    }
}

impl From<Deferred> for Produced {
    fn from(deferred: Deferred) -> Self {
        Produced::Pending(deferred)
    }
}

impl From<ActivationError> for Produced {
    fn from(error: ActivationError) -> Self {
        Produced::Failed(error)
    }
}

impl From<serde_json::Value> for Produced {
    fn from(json: serde_json::Value) -> Self {
        Produced::Value(json.into())
    }
}

impl<T: Into<Value>> From<Vec<T>> for Produced {
    fn from(items: Vec<T>) -> Self {
        Produced::Value(items.into())
    }
}

impl<T, E> From<Result<T, E>> for Produced
where
    T: Into<Produced>,
    E: Into<ActivationError>,
{
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => value.into(),
            Err(error) => Produced::Failed(error.into()),
        }
    }
}

macro_rules! impl_produced_scalar {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Produced {
                fn from(value: $ty) -> Self {
                    Produced::Value(value.into())
                }
            }
        )*
    };
}

impl_produced_scalar!(i32, i64, u32, u64, usize, f64, bool, String, &str);

pub(crate) type Producer = Arc<dyn Fn() -> Produced + Send + Sync>;
pub(crate) type Setter = Arc<dyn Fn(SetArgs) + Send + Sync>;

/// Options for [`Runtime::computed_with`].
#[derive(Debug, Clone, Default)]
pub struct ComputedOptions {
    pub retry: Option<RetryPolicy>,
}

impl ComputedOptions {
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// A getter with an optional setter, for [`Runtime::linked`].
pub struct LinkedOptions {
    get: Producer,
    set: Option<Setter>,
    retry: Option<RetryPolicy>,
}

impl LinkedOptions {
    pub fn new<F, R>(get: F) -> Self
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Into<Produced>,
    {
        Self {
            get: Arc::new(move || get().into()),
            set: None,
            retry: None,
        }
    }

    pub fn with_set<S>(mut self, set: S) -> Self
    where
        S: Fn(SetArgs) + Send + Sync + 'static,
    {
        self.set = Some(Arc::new(set));
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = Some(retry);
        self
    }
}

/// Activation record stored on the node.
pub(crate) struct Activation {
    pub producer: Producer,
    pub setter: Option<Setter>,
    pub state: ActivationState,
    pub error: Option<ActivationError>,
    pub retry: Option<RetryPolicy>,
    pub failures: u32,
    pub retry_timer: Option<TimerId>,
    /// Generation of the latest run.
    pub run: u64,
    /// One more than the highest activation this one read; 0 for none.
    pub height: u32,
    /// Dependency listeners registered by the latest run.
    pub deps: Vec<(NodeId, ListenerId)>,
    pub dep_listener: ListenerFn,
    pub pending_writes: Vec<(NodeId, WriteOp)>,
}

impl Activation {
    fn status(&self, lazy: bool) -> ActivationStatus {
        ActivationStatus {
            state: if lazy {
                ActivationState::Inactive
            } else {
                self.state
            },
            error: self.error.clone(),
            failures: self.failures,
        }
    }
}

/// Activations matching `wanted` that `start` reads through, following
/// ancestors and links, outermost first.
fn activations_behind(
    graph: &Graph,
    start: NodeId,
    wanted: impl Fn(NodeId, &NodeRecord) -> bool,
) -> Vec<NodeId> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    let mut todo = vec![start];

    while let Some(node) = todo.pop() {
        let mut current = Some(node);
        while let Some(id) = current {
            if !seen.insert(id) {
                break;
            }
            let record = graph.node(id);
            if record.activation.is_some() && wanted(id, record) {
                found.push(id);
            }
            if let Some(target) = record.linked_to {
                todo.push(target);
            }
            current = record.parent;
        }
    }

    found.reverse();
    found
}

/// Height of an activation node, 0 for plain nodes.
pub(crate) fn height(graph: &Graph, id: NodeId) -> u32 {
    graph
        .node(id)
        .activation
        .as_ref()
        .map_or(0, |activation| activation.height)
}

impl Runtime {
    /// A node whose value is produced by `producer`.
    ///
    /// The producer runs on first read or first subscription, then again
    /// whenever a node it read changes.
    pub fn computed<F, R>(&self, producer: F) -> Node
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Into<Produced>,
    {
        self.computed_with(producer, ComputedOptions::default())
    }

    pub fn computed_with<F, R>(&self, producer: F, options: ComputedOptions) -> Node
    where
        F: Fn() -> R + Send + Sync + 'static,
        R: Into<Produced>,
    {
        self.activation_node(Arc::new(move || producer().into()), None, options.retry)
    }

    /// A node produced by a getter, optionally writable through a setter.
    pub fn linked(&self, options: LinkedOptions) -> Node {
        self.activation_node(options.get, options.set, options.retry)
    }

    fn activation_node(&self, producer: Producer, setter: Option<Setter>, retry: Option<RetryPolicy>) -> Node {
        let weak = self.downgrade();
        let mut state = self.inner().state.lock();
        let id = state.graph.create_root(Value::Undefined, true);

        let dep_listener: ListenerFn = Arc::new(move |_| {
            if let Some(inner) = weak.upgrade() {
                Runtime::from_inner(inner).mark_stale(id);
            }
        });

        let record = state.graph.node_mut(id);
        record.lazy = true;
        record.activation = Some(Activation {
            producer,
            setter,
            state: ActivationState::Inactive,
            error: None,
            retry,
            failures: 0,
            retry_timer: None,
            run: 0,
            height: 0,
            deps: Vec::new(),
            dep_listener,
            pending_writes: Vec::new(),
        });
        drop(state);

        self.node(id)
    }

    pub(crate) fn status(&self, node: NodeId) -> Option<ActivationStatus> {
        let state = self.inner().state.lock();
        let record = state.graph.node(node);
        record.activation.as_ref().map(|a| a.status(record.lazy))
    }

    /// Activate every lazy node that `node` depends on for its value.
    pub(crate) fn ensure_active(&self, node: NodeId) {
        let mut activated = HashSet::new();
        loop {
            let lazy = {
                let state = self.inner().state.lock();
                activations_behind(&state.graph, node, |_, record| record.lazy)
            };
            let lazy: Vec<_> = lazy.into_iter().filter(|id| activated.insert(*id)).collect();
            if lazy.is_empty() {
                return;
            }
            for id in lazy {
                self.activate(id);
            }
        }
    }

    fn activate(&self, node: NodeId) {
        {
            let mut state = self.inner().state.lock();
            let record = state.graph.node_mut(node);
            if !record.lazy {
                return;
            }
            record.lazy = false;
            match record.activation.as_mut() {
                Some(activation) => activation.state = ActivationState::Activating,
                None => return,
            }
        }
        debug!(node = ?node, "activating");
        self.run_producer(node);
    }

    /// Queue a re-run after a dependency changed.
    fn mark_stale(&self, node: NodeId) {
        let flushing = {
            let mut state = self.inner().state.lock();
            let record = state.graph.node(node);
            if record.lazy || record.activation.is_none() {
                return;
            }
            state.batch.stale.insert(node);
            state.batch.flushing
        };
        if !flushing {
            self.refresh(node);
        }
    }

    /// Re-run stale activations `node` reads through, lowest height first.
    pub(crate) fn refresh(&self, node: NodeId) {
        loop {
            let next = {
                let mut guard = self.inner().state.lock();
                let state = &mut *guard;
                if state.batch.stale.is_empty() {
                    return;
                }
                let stale = &state.batch.stale;
                let behind = activations_behind(&state.graph, node, |id, _| stale.contains(&id));
                let Some(next) = behind
                    .into_iter()
                    .min_by_key(|&id| height(&state.graph, id))
                else {
                    return;
                };
                state.batch.stale.shift_remove(&next);
                next
            };
            self.rerun(next);
        }
    }

    /// Re-run after a dependency changed. Resets the failure count.
    pub(crate) fn rerun(&self, node: NodeId) {
        let timer = {
            let mut state = self.inner().state.lock();
            let Some(activation) = state.graph.node_mut(node).activation.as_mut() else {
                return;
            };
            activation.failures = 0;
            activation.state = ActivationState::Activating;
            activation.retry_timer.take()
        };
        if let Some(timer) = timer {
            self.scheduler().cancel(timer);
        }
        trace!(node = ?node, "re-running stale producer");
        self.run_producer(node);
    }

    fn retry(&self, node: NodeId, run: u64) {
        {
            let mut state = self.inner().state.lock();
            let Some(activation) = state.graph.node_mut(node).activation.as_mut() else {
                return;
            };
            if activation.run != run {
                return;
            }
            activation.retry_timer = None;
        }
        debug!(node = ?node, "retrying producer");
        self.run_producer(node);
    }

    fn run_producer(&self, node: NodeId) {
        let (producer, run) = {
            let mut state = self.inner().state.lock();
            let Some(activation) = state.graph.node_mut(node).activation.as_mut() else {
                return;
            };
            activation.run += 1;
            (activation.producer.clone(), activation.run)
        };

        let scope = TrackingScope::enter(self.inner().clone());
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| producer()));
        let frame = scope.finish();

        let produced = outcome.unwrap_or_else(|payload| {
            Produced::Failed(ActivationError::from_panic(payload.as_ref()))
        });

        {
            let mut guard = self.inner().state.lock();
            let state = &mut *guard;
            let Some(activation) = state.graph.node_mut(node).activation.as_mut() else {
                return;
            };
            if activation.run != run {
                return;
            }
            let previous = mem::take(&mut activation.deps);
            let listener = activation.dep_listener.clone();

            for (dep, id) in previous {
                state.remove_listener(dep, id);
            }
            let mut deps = Vec::with_capacity(frame.len());
            let mut node_height = 0;
            for (dep, read) in frame.iter() {
                if dep == node {
                    continue;
                }
                let source = state.graph.tree_root(dep);
                if source != node {
                    if let Some(upstream) = state.graph.node(source).activation.as_ref() {
                        node_height = node_height.max(upstream.height + 1);
                    }
                }
                let entry = ListenerEntry::new(listener.clone(), read.mode, true);
                deps.push((dep, state.add_listener(dep, entry, false)));
            }
            if let Some(activation) = state.graph.node_mut(node).activation.as_mut() {
                activation.deps = deps;
                activation.height = node_height;
            }
        }

        self.settle(node, run, produced);
    }

    /// Apply `f` to the activation if `run` is still current.
    fn with_current<T>(&self, node: NodeId, run: u64, f: impl FnOnce(&mut Activation) -> T) -> Option<T> {
        let mut state = self.inner().state.lock();
        let activation = state.graph.node_mut(node).activation.as_mut()?;
        (activation.run == run).then(|| f(activation))
    }

    fn settle(&self, node: NodeId, run: u64, produced: Produced) {
        match produced {
            Produced::Value(value) => self.store_result(node, run, value, ActivationState::Active),
            Produced::Link(target) => self.link_result(node, run, target),
            Produced::Pending(deferred) => {
                let current = self.with_current(node, run, |activation| {
                    activation.state = ActivationState::Loading;
                });
                if current.is_none() {
                    return;
                }
                debug!(node = ?node, "loading");

                let weak = self.downgrade();
                deferred.on_settle(move |result| {
                    let Some(inner) = weak.upgrade() else {
                        return;
                    };
                    let runtime = Runtime::from_inner(inner);
                    match result {
                        Ok(value) => runtime.store_result(node, run, value, ActivationState::Loaded),
                        Err(error) => runtime.fail(node, run, error),
                    }
                });
            }
            Produced::Failed(error) => self.fail(node, run, error),
        }
    }

    fn store_result(&self, node: NodeId, run: u64, value: Value, settled: ActivationState) {
        {
            let mut guard = self.inner().state.lock();
            let state = &mut *guard;
            let Some(activation) = state.graph.node_mut(node).activation.as_mut() else {
                return;
            };
            if activation.run != run {
                return;
            }
            activation.state = settled;
            activation.error = None;
            activation.failures = 0;

            // A previous run linked this node; keep the linked value as the
            // stored one so the write below diffs against what readers saw.
            if state.graph.node(node).linked_to.is_some() {
                let seen = state.graph.resolve(node);
                state.graph.unlink(node);
                if let Err(err) = state.graph.store(node, seen) {
                    warn!(error = %err, "could not keep the linked value");
                }
            }
        }
        debug!(node = ?node, state = ?settled, "activation settled");

        if let Err(err) = self.write_internal(node, WriteOp::Set(value)) {
            warn!(error = %err, "could not store produced value");
        }
        self.replay_pending(node);
    }

    fn link_result(&self, node: NodeId, run: u64, target: Node) {
        if !target.runtime().ptr_eq(self) {
            self.fail(node, run, ActivationError::new("linked node belongs to another runtime"));
            return;
        }
        self.ensure_active(target.id());

        let linked = {
            let mut guard = self.inner().state.lock();
            let state = &mut *guard;
            let Some(activation) = state.graph.node_mut(node).activation.as_mut() else {
                return;
            };
            if activation.run != run {
                return;
            }

            let prev = state.graph.resolve(node);
            state.graph.link(node, target.id());
            match state.graph.locate(node) {
                Ok(_) => {
                    if let Some(activation) = state.graph.node_mut(node).activation.as_mut() {
                        activation.state = ActivationState::Active;
                        activation.error = None;
                        activation.failures = 0;
                    }
                    Ok((prev, state.graph.resolve(node)))
                }
                Err(err) => {
                    state.graph.unlink(node);
                    Err(err)
                }
            }
        };

        match linked {
            Ok((prev, current)) => {
                debug!(node = ?node, target = ?target.id(), "linked");
                self.notify_replaced(node, prev, current);
                self.replay_pending(node);
            }
            Err(err) => {
                warn!(error = %err, "link rejected");
                self.fail(node, run, ActivationError::new(err.to_string()));
            }
        }
    }

    fn fail(&self, node: NodeId, run: u64, error: ActivationError) {
        let default_retry = self.config().default_retry.clone();
        let outcome = self.with_current(node, run, |activation| {
            activation.state = ActivationState::Error;
            activation.error = Some(error.clone());
            activation.failures += 1;
            let delay = activation
                .retry
                .as_ref()
                .or(default_retry.as_ref())
                .and_then(|policy| policy.next_delay(activation.failures));
            (activation.retry_timer.take(), delay, activation.failures)
        });
        let Some((stale_timer, delay, failures)) = outcome else {
            return;
        };

        debug!(node = ?node, failures, error = %error, "activation failed");
        if let Some(timer) = stale_timer {
            self.scheduler().cancel(timer);
        }

        if let Some(delay) = delay {
            debug!(node = ?node, ?delay, "scheduling retry");
            let weak = self.downgrade();
            let timer = self.scheduler().schedule_after(
                delay,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        Runtime::from_inner(inner).retry(node, run);
                    }
                }),
            );
            let kept = self.with_current(node, run, |activation| {
                activation.retry_timer = Some(timer);
            });
            if kept.is_none() {
                self.scheduler().cancel(timer);
            }
        }

        self.replay_pending(node);
    }

    fn replay_pending(&self, node: NodeId) {
        let writes = {
            let mut state = self.inner().state.lock();
            match state.graph.node_mut(node).activation.as_mut() {
                Some(activation) => mem::take(&mut activation.pending_writes),
                None => return,
            }
        };

        for (target, op) in writes {
            if let Err(err) = self.write(target, op) {
                warn!(error = %err, "replayed write failed");
            }
        }
    }
}
