//! Graph Nodes
//!
//! This module defines the records that live in the node arena. A node is a
//! stable address for one path in a value tree; it owns no value itself.

use indexmap::{IndexMap, IndexSet};

use crate::reactive::activation::Activation;
use crate::reactive::subscriber::ListenerEntry;
use crate::value::{Key, Value};

/// Index of a node in the runtime's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Position of the node in the arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a root container in the runtime's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RootId(pub(crate) u32);

/// A root container: the actual mutable value of one tree.
#[derive(Debug)]
pub(crate) struct RootRecord {
    pub value: Value,
    /// Locked roots reject writes that do not come from the pipeline itself.
    pub locked: bool,
    /// The node addressing the whole tree.
    pub node: NodeId,
}

/// Arena record for one node.
pub(crate) struct NodeRecord {
    pub root: RootId,
    pub parent: Option<NodeId>,
    pub key: Option<Key>,

    /// Children created so far. Kept for the node's lifetime so listener
    /// identity survives value replacement.
    pub children: IndexMap<Key, NodeId>,

    /// Listeners fired when the batch flushes.
    pub listeners: Vec<ListenerEntry>,
    /// Listeners fired synchronously during the write.
    pub listeners_immediate: Vec<ListenerEntry>,
    /// Listener count over the whole subtree, this node included.
    pub num_listeners_recursive: usize,

    /// Node whose value and writes this node forwards to.
    pub linked_to: Option<NodeId>,
    /// Nodes forwarding to this one. Non-owning.
    pub linked_from: IndexSet<NodeId>,

    pub activation: Option<Activation>,
    /// The activation has never run.
    pub lazy: bool,
    /// Displaced from its parent during array reconciliation.
    pub detached: bool,
}

impl NodeRecord {
    pub fn new(root: RootId, parent: Option<NodeId>, key: Option<Key>) -> Self {
        Self {
            root,
            parent,
            key,
            children: IndexMap::new(),
            listeners: Vec::new(),
            listeners_immediate: Vec::new(),
            num_listeners_recursive: 0,
            linked_to: None,
            linked_from: IndexSet::new(),
            activation: None,
            lazy: false,
            detached: false,
        }
    }

    /// Listeners for one notification phase.
    pub fn listeners_for(&self, immediate: bool) -> &[ListenerEntry] {
        if immediate {
            &self.listeners_immediate
        } else {
            &self.listeners
        }
    }

    pub fn local_listener_count(&self) -> usize {
        self.listeners.len() + self.listeners_immediate.len()
    }
}

impl std::fmt::Debug for NodeRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRecord")
            .field("parent", &self.parent)
            .field("key", &self.key)
            .field("children", &self.children.len())
            .field("listeners", &self.local_listener_count())
            .field("num_listeners_recursive", &self.num_listeners_recursive)
            .field("linked_to", &self.linked_to)
            .field("lazy", &self.lazy)
            .finish()
    }
}
