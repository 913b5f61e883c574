//! Node Handles
//!
//! A [`Node`] is the public handle for one path in a value tree. It is a
//! runtime plus an arena id, so it is cheap to clone and compares by
//! identity: two handles are equal when they address the same node.
//!
//! # Example
//!
//! ```rust,ignore
//! let runtime = Runtime::new(ManualScheduler::new());
//! let state = runtime.create_root(json!({"todos": [{"id": 1, "done": false}]}));
//!
//! let done = state.child("todos").index(0).child("done");
//! let _sub = done.subscribe(|event| println!("done: {:?}", event.value()), Default::default());
//!
//! done.set(true)?;
//! ```

use std::sync::Arc;

use tracing::trace;

use super::activation::ActivationStatus;
use super::context::TrackingMode;
use super::notify::{Change, ChangeEvent};
use super::runtime::Runtime;
use super::subscriber::{ListenerEntry, ListenerFn, SubscribeOptions, Subscription};
use super::write::WriteOp;
use crate::error::{Error, Result};
use crate::graph::NodeId;
use crate::value::{format_path, Key, Value};

/// Handle to one path in a value tree.
#[derive(Clone)]
pub struct Node {
    runtime: Runtime,
    id: NodeId,
}

impl Node {
    pub(crate) fn new(runtime: Runtime, id: NodeId) -> Self {
        Self { runtime, id }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    // ---- Addressing ----

    /// The child at `key`. Repeated calls return the same node.
    pub fn child(&self, key: impl Into<Key>) -> Node {
        let id = self
            .runtime
            .inner()
            .state
            .lock()
            .graph
            .child(self.id, key.into());
        Node::new(self.runtime.clone(), id)
    }

    pub fn index(&self, index: usize) -> Node {
        self.child(Key::Index(index))
    }

    /// Keys from the tree root to this node. Links are not followed.
    pub fn path(&self) -> Vec<Key> {
        self.runtime.inner().state.lock().graph.own_path(self.id)
    }

    pub fn key(&self) -> Option<Key> {
        self.runtime.inner().state.lock().graph.node(self.id).key.clone()
    }

    /// `None` for roots and detached nodes.
    pub fn parent(&self) -> Option<Node> {
        let parent = self.runtime.inner().state.lock().graph.node(self.id).parent;
        parent.map(|id| Node::new(self.runtime.clone(), id))
    }

    /// The node addressing the whole tree.
    pub fn root(&self) -> Node {
        let id = self.runtime.inner().state.lock().graph.tree_root(self.id);
        Node::new(self.runtime.clone(), id)
    }

    // ---- Reads ----

    /// Current value, recorded as a dependency when tracking.
    pub fn get(&self) -> Value {
        self.get_with(TrackingMode::Normal)
    }

    pub fn get_with(&self, mode: TrackingMode) -> Value {
        self.runtime.ensure_active(self.id);
        self.runtime.refresh(self.id);
        let mut state = self.runtime.inner().state.lock();
        state.record_read(self.id, mode);
        state.graph.resolve(self.id)
    }

    /// Current value without recording a dependency.
    ///
    /// A lazy computed node is still activated, so the value is real.
    pub fn peek(&self) -> Value {
        self.runtime.ensure_active(self.id);
        self.runtime.refresh(self.id);
        self.runtime.inner().state.lock().graph.resolve(self.id)
    }

    pub fn status(&self) -> Option<ActivationStatus> {
        self.runtime.status(self.id)
    }

    // ---- Writes ----

    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        self.runtime.write(self.id, WriteOp::Set(value.into()))
    }

    pub fn set_key(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        self.child(key).set(value)
    }

    /// Merge the keys of `partial` into this node as one batch.
    pub fn assign(&self, partial: impl Into<Value>) -> Result<()> {
        let entries = match partial.into() {
            Value::Object(map) | Value::Map(map) => map,
            _ => {
                return Err(Error::NotAContainer {
                    path: format_path(&self.path()),
                })
            }
        };

        self.runtime.batch(|| {
            entries
                .into_iter()
                .try_for_each(|(key, value)| self.set_key(key, value))
        })
    }

    /// Delete this node's key from its parent.
    pub fn remove(&self) -> Result<()> {
        self.runtime.write(self.id, WriteOp::Remove)
    }

    pub fn remove_key(&self, key: impl Into<Key>) -> Result<()> {
        self.child(key).remove()
    }

    // ---- Listeners ----

    /// Register `callback` for changes at or below this node.
    pub fn subscribe<F>(&self, callback: F, options: SubscribeOptions) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.runtime.ensure_active(self.id);

        let callback: ListenerFn = Arc::new(callback);
        let entry = ListenerEntry::new(callback.clone(), options.tracking, options.suppress_args);
        let (id, initial) = {
            let mut state = self.runtime.inner().state.lock();
            let id = state.add_listener(self.id, entry, options.immediate);
            let initial = options.fire_initially.then(|| state.graph.resolve(self.id));
            (id, initial)
        };
        trace!(node = ?self.id, listener = ?id, "subscribed");

        let subscription = Subscription::new(self.runtime.downgrade(), self.id, id);
        if let Some(value) = initial {
            let changes = if options.suppress_args {
                Vec::new()
            } else {
                vec![Change {
                    path: Vec::new(),
                    path_types: Vec::new(),
                    value_at_path: value.clone(),
                    prev_at_path: Value::Undefined,
                }]
            };
            callback(&ChangeEvent::new(value, changes));
        }
        subscription
    }

    /// Subscribe with default options.
    pub fn on_change<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe(callback, SubscribeOptions::default())
    }
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.runtime.ptr_eq(&other.runtime)
    }
}

impl Eq for Node {}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("path", &format_path(&self.path()))
            .finish()
    }
}
