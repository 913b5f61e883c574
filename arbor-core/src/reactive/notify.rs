//! Change Notification
//!
//! Turns the raw change records of a write into one event per listener.
//!
//! # How Delivery Works
//!
//! 1. Starting from the written node, descend through existing child nodes
//!    along the record's path. If the whole path exists and the record
//!    replaced a subtree, keep descending into listener-bearing children
//!    and compare their own slices of the old and new value.
//!
//! 2. Walk up from the deepest node reached. Every node with listeners for
//!    the current phase collects the record, re-rooted to its own path, at
//!    level `base + distance`.
//!
//! 3. At every node on the way, repeat the walk for nodes linked to it, so a
//!    change is seen through every alias.
//!
//! 4. Fan-out snapshots the listener lists, applies each listener's tracking
//!    filter and calls every callback at most once.
//!
//! Calls are ordered by node depth, deepest first. Listeners of one node
//! keep their registration order.

use std::any::Any;
use std::cmp::Reverse;
use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{error, trace};

use super::subscriber::ListenerFn;
use crate::graph::diff::RawChange;
use crate::graph::store::Graph;
use crate::graph::NodeId;
use crate::value::{deep_equal, format_path, Key, PathType, Value};

/// One leaf-level change, relative to the node that received it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    pub path: Vec<Key>,
    pub path_types: Vec<PathType>,
    pub value_at_path: Value,
    pub prev_at_path: Value,
}

/// What a listener receives.
#[derive(Debug)]
pub struct ChangeEvent {
    value: Value,
    changes: Vec<Change>,
    previous: OnceLock<Value>,
}

impl ChangeEvent {
    pub(crate) fn new(value: Value, changes: Vec<Change>) -> Self {
        Self {
            value,
            changes,
            previous: OnceLock::new(),
        }
    }

    /// The node's value after the changes.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Change records, empty for listeners that suppress arguments.
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// The node's value before the changes, rebuilt on first call.
    pub fn previous(&self) -> &Value {
        self.previous.get_or_init(|| {
            let mut previous = self.value.clone();
            for change in self.changes.iter().rev() {
                // Paths through values that no longer hold containers
                // cannot be rebuilt; keep what we have.
                if let Err(err) = previous.set_path(&change.path, change.prev_at_path.clone()) {
                    trace!(path = %format_path(&change.path), ?err, "previous value not rebuilt");
                }
            }
            previous
        })
    }
}

#[derive(Debug, Default)]
pub(crate) struct NodeChanges {
    pub level: i32,
    pub structural: bool,
    pub changes: Vec<Change>,
}

/// Changes collected per node for one notification phase.
#[derive(Debug, Default)]
pub(crate) struct ChangeSet {
    nodes: IndexMap<NodeId, NodeChanges>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    fn add(&mut self, node: NodeId, change: Change, level: i32, structural: bool) {
        let entry = self.nodes.entry(node).or_insert_with(|| NodeChanges {
            level,
            structural: false,
            changes: Vec::new(),
        });
        entry.level = entry.level.min(level);
        entry.structural |= structural && level <= 0;

        let covered = entry
            .changes
            .first()
            .is_some_and(|first| change.path.starts_with(&first.path));
        if !covered {
            entry.changes.push(change);
        }
    }
}

/// A record being routed through the graph.
struct Routed<'a> {
    value: &'a Value,
    prev: &'a Value,
    base_level: i32,
    structural: bool,
    descend: bool,
}

struct Collector<'g> {
    graph: &'g Graph,
    immediate: bool,
    out: &'g mut ChangeSet,
    visited: HashSet<NodeId>,
}

/// Route the records of a write at `anchor` to every interested node.
pub(crate) fn collect(
    graph: &Graph,
    anchor: NodeId,
    changes: &[RawChange],
    immediate: bool,
    out: &mut ChangeSet,
) {
    let root = graph.tree_root(anchor);
    if graph.node(root).num_listeners_recursive == 0 && !graph.has_links() {
        return;
    }

    for change in changes {
        let routed = Routed {
            value: &change.value,
            prev: &change.prev,
            base_level: change.base_level,
            structural: change.structural,
            descend: change.descend,
        };
        let mut collector = Collector {
            graph,
            immediate,
            out: &mut *out,
            visited: HashSet::new(),
        };
        collector.visited.insert(anchor);
        collector.deliver_from(anchor, &change.path, &change.path_types, &routed);
    }
}

impl Collector<'_> {
    fn deliver_from(&mut self, anchor: NodeId, path: &[Key], types: &[PathType], change: &Routed<'_>) {
        let (node, depth) = self.graph.deepest_existing(anchor, path);

        if depth == path.len() && change.descend {
            self.descend(node, change.value, change.prev);
        }

        let remaining = path.len() - depth;
        self.walk_up(
            node,
            path[depth..].to_vec(),
            types[depth..].to_vec(),
            change.base_level + remaining as i32,
            change,
        );
    }

    fn walk_up(
        &mut self,
        start: NodeId,
        mut path: Vec<Key>,
        mut types: Vec<PathType>,
        mut level: i32,
        change: &Routed<'_>,
    ) {
        let mut current = start;
        loop {
            let record = self.graph.node(current);

            if !record.listeners_for(self.immediate).is_empty() {
                self.out.add(
                    current,
                    Change {
                        path: path.clone(),
                        path_types: types.clone(),
                        value_at_path: change.value.clone(),
                        prev_at_path: change.prev.clone(),
                    },
                    level,
                    change.structural,
                );
            }

            for &alias in &record.linked_from {
                if self.visited.insert(alias) {
                    let aliased = Routed {
                        base_level: level - path.len() as i32,
                        ..*change
                    };
                    self.deliver_from(alias, &path, &types, &aliased);
                }
            }

            let (Some(parent), Some(key)) = (record.parent, record.key.clone()) else {
                return;
            };
            let kind = match key {
                Key::Index(_) => PathType::Array,
                Key::Field(_) => match self.graph.value_ref(parent) {
                    Value::Map(_) => PathType::Map,
                    _ => PathType::Object,
                },
            };
            path.insert(0, key);
            types.insert(0, kind);
            level += 1;
            current = parent;
        }
    }

    /// Compare the old and new slices of listener-bearing children of a
    /// replaced node.
    fn descend(&mut self, node: NodeId, value: &Value, prev: &Value) {
        let record = self.graph.node(node);
        for (key, &child) in &record.children {
            let child_record = self.graph.node(child);
            if child_record.num_listeners_recursive == 0 && child_record.linked_from.is_empty() {
                continue;
            }

            let child_value = value.get(key).unwrap_or(&Value::Undefined);
            let child_prev = prev.get(key).unwrap_or(&Value::Undefined);
            if deep_equal(child_value, child_prev) {
                continue;
            }

            self.descend(child, child_value, child_prev);

            let existence_changed = child_value.is_undefined() || child_prev.is_undefined();
            let level = if existence_changed { -1 } else { 0 };
            let structural = existence_changed || child_value.is_container() || child_prev.is_container();

            if !child_record.listeners_for(self.immediate).is_empty() {
                self.out.add(
                    child,
                    Change {
                        path: Vec::new(),
                        path_types: Vec::new(),
                        value_at_path: child_value.clone(),
                        prev_at_path: child_prev.clone(),
                    },
                    level,
                    structural,
                );
            }

            for &alias in &child_record.linked_from {
                if self.visited.insert(alias) {
                    let routed = Routed {
                        value: child_value,
                        prev: child_prev,
                        base_level: level,
                        structural,
                        descend: true,
                    };
                    self.deliver_from(alias, &[], &[], &routed);
                }
            }
        }
    }
}

/// A listener call ready to run outside the runtime lock.
pub(crate) struct ListenerCall {
    pub callback: ListenerFn,
    pub event: Arc<ChangeEvent>,
}

/// Snapshot listeners and build their events. Each callback appears at most
/// once; `seen` carries identities across change sets of the same pass.
pub(crate) fn prepare_calls(
    graph: &Graph,
    set: ChangeSet,
    immediate: bool,
    seen: &mut HashSet<*const ()>,
) -> Vec<ListenerCall> {
    let mut calls = Vec::new();

    // Records from different writes reach ancestors in any order
    let mut nodes: Vec<_> = set.nodes.into_iter().collect();
    nodes.sort_by_key(|(node, _)| Reverse(graph.depth(*node)));

    for (node, changes) in nodes {
        let record = graph.node(node);
        let listeners = record.listeners_for(immediate);
        if listeners.is_empty() {
            continue;
        }

        let value = graph.resolve(node);
        let mut full: Option<Arc<ChangeEvent>> = None;
        let mut bare: Option<Arc<ChangeEvent>> = None;

        for listener in listeners {
            if !listener.accepts(changes.level, changes.structural) {
                continue;
            }
            if !seen.insert(Arc::as_ptr(&listener.callback) as *const ()) {
                continue;
            }

            let event = if listener.suppress_args {
                bare.get_or_insert_with(|| Arc::new(ChangeEvent::new(value.clone(), Vec::new())))
            } else {
                full.get_or_insert_with(|| {
                    Arc::new(ChangeEvent::new(value.clone(), changes.changes.clone()))
                })
            };
            calls.push(ListenerCall {
                callback: listener.callback.clone(),
                event: event.clone(),
            });
        }
    }

    calls
}

/// Run listener calls, continuing past panics. Returns the first panic.
pub(crate) fn fire(calls: Vec<ListenerCall>) -> Option<Box<dyn Any + Send>> {
    let mut first_panic = None;

    for call in calls {
        let result = panic::catch_unwind(AssertUnwindSafe(|| (call.callback)(&call.event)));
        if let Err(payload) = result {
            if first_panic.is_none() {
                error!(
                    panic = %panic_message(payload.as_ref()),
                    "listener panicked; delivering to remaining listeners"
                );
                first_panic = Some(payload);
            }
        }
    }

    first_panic
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
