//! Listener types for the reactive system.
//!
//! A listener is any callback attached to a node: user subscriptions,
//! effect re-runs and the dependency listeners of computed nodes all go
//! through the same registration path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::context::TrackingMode;
use super::notify::ChangeEvent;
use super::runtime::RuntimeInner;
use crate::graph::NodeId;

/// Callback invoked with the changes that reached a node.
pub type ListenerFn = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    /// Generate a new unique listener ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered listener.
#[derive(Clone)]
pub(crate) struct ListenerEntry {
    pub id: ListenerId,
    pub callback: ListenerFn,
    pub tracking: TrackingMode,
    /// Deliver an event without change records.
    pub suppress_args: bool,
}

impl ListenerEntry {
    pub fn new(callback: ListenerFn, tracking: TrackingMode, suppress_args: bool) -> Self {
        Self {
            id: ListenerId::new(),
            callback,
            tracking,
            suppress_args,
        }
    }

    /// Whether a change of `level` (and structural flag) passes this
    /// listener's filter.
    pub fn accepts(&self, level: i32, structural: bool) -> bool {
        match self.tracking {
            TrackingMode::Normal => true,
            TrackingMode::Shallow => level <= 0,
            TrackingMode::Optimized => level <= 0 && structural,
        }
    }
}

/// Options for [`Node::subscribe`](crate::reactive::Node::subscribe).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub tracking: TrackingMode,
    /// Fire during the write itself instead of at the end of the batch.
    pub immediate: bool,
    /// Fire once right away with the current value.
    pub fire_initially: bool,
    /// Deliver events without change records.
    pub suppress_args: bool,
}

impl SubscribeOptions {
    pub fn shallow() -> Self {
        Self {
            tracking: TrackingMode::Shallow,
            ..Self::default()
        }
    }

    pub fn optimized() -> Self {
        Self {
            tracking: TrackingMode::Optimized,
            ..Self::default()
        }
    }

    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }

    pub fn fire_initially(mut self) -> Self {
        self.fire_initially = true;
        self
    }

    pub fn suppress_args(mut self) -> Self {
        self.suppress_args = true;
        self
    }
}

/// Handle to a registered listener.
///
/// Dropping the handle unregisters the listener.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    runtime: Weak<RuntimeInner>,
    node: NodeId,
    id: ListenerId,
}

impl Subscription {
    pub(crate) fn new(runtime: Weak<RuntimeInner>, node: NodeId, id: ListenerId) -> Self {
        Self { runtime, node, id }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Unregister now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.state.lock().remove_listener(self.node, self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("node", &self.node)
            .field("id", &self.id)
            .finish()
    }
}
