//! Node Arena
//!
//! The arena owns every node record and every root value of a runtime.
//! Nodes refer to each other by [`NodeId`]; links between nodes are plain ids,
//! so a link cycle is just data and never an ownership cycle.
//!
//! Resolution walks parent pointers to the root collecting keys, jumping
//! through `linked_to` at any level, then indexes the root value with the
//! accumulated key path.

use indexmap::IndexMap;
use smallvec::SmallVec;
use tracing::warn;

use super::diff::Move;
use super::node::{NodeId, NodeRecord, RootId, RootRecord};
use crate::error::{Error, Result};
use crate::value::{format_path, Key, Value, UNDEFINED};

pub(crate) type KeyPath = SmallVec<[Key; 8]>;

/// Where a node's value lives once links are followed.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Location {
    pub root: RootId,
    pub path: KeyPath,
}

pub(crate) struct Graph {
    nodes: Vec<NodeRecord>,
    roots: Vec<RootRecord>,
    /// Number of live links, used to skip work when the runtime has none.
    links: usize,
    max_link_depth: usize,
}

impl Graph {
    pub fn new(max_link_depth: usize) -> Self {
        Self {
            nodes: Vec::new(),
            roots: Vec::new(),
            links: 0,
            max_link_depth,
        }
    }

    pub fn node(&self, id: NodeId) -> &NodeRecord {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut NodeRecord {
        &mut self.nodes[id.index()]
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn has_links(&self) -> bool {
        self.links > 0
    }

    fn push_node(&mut self, record: NodeRecord) -> NodeId {
        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(record);
        id
    }

    /// Create a new tree and return the node addressing its root.
    pub fn create_root(&mut self, value: Value, locked: bool) -> NodeId {
        let root = RootId(self.roots.len() as u32);
        let node = self.push_node(NodeRecord::new(root, None, None));
        self.roots.push(RootRecord {
            value,
            locked,
            node,
        });
        node
    }

    pub fn root_record(&self, root: RootId) -> &RootRecord {
        &self.roots[root.0 as usize]
    }

    pub fn root_record_mut(&mut self, root: RootId) -> &mut RootRecord {
        &mut self.roots[root.0 as usize]
    }

    /// The node addressing the whole tree this node belongs to.
    pub fn tree_root(&self, id: NodeId) -> NodeId {
        self.root_record(self.node(id).root).node
    }

    /// Get or create the child of `parent` at `key`.
    ///
    /// A field key that parses as an index is stored as an index when the
    /// parent currently holds an array, so both spellings address one node.
    pub fn child(&mut self, parent: NodeId, key: Key) -> NodeId {
        let key = match &key {
            Key::Field(_) if matches!(self.value_ref(parent), Value::Array(_)) => {
                key.as_index().map(Key::Index).unwrap_or(key)
            }
            _ => key,
        };

        if let Some(&existing) = self.node(parent).children.get(&key) {
            return existing;
        }

        let root = self.node(parent).root;
        let id = self.push_node(NodeRecord::new(root, Some(parent), Some(key.clone())));
        self.node_mut(parent).children.insert(key, id);
        id
    }

    /// Walk down `path` from `anchor` through children that already exist.
    /// Returns the deepest node reached and how many keys were consumed.
    pub fn deepest_existing(&self, anchor: NodeId, path: &[Key]) -> (NodeId, usize) {
        let mut current = anchor;
        let mut depth = 0;
        for key in path {
            match self.node(current).children.get(key) {
                Some(&child) => {
                    current = child;
                    depth += 1;
                }
                None => break,
            }
        }
        (current, depth)
    }

    /// The node's own key path from its tree root, ignoring links.
    pub fn own_path(&self, id: NodeId) -> Vec<Key> {
        let mut path = Vec::new();
        let mut current = id;
        while let (Some(parent), Some(key)) = (self.node(current).parent, &self.node(current).key) {
            path.push(key.clone());
            current = parent;
        }
        path.reverse();
        path
    }

    /// Number of parent hops to the tree root.
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = id;
        while let Some(parent) = self.node(current).parent {
            depth += 1;
            current = parent;
        }
        depth
    }

    fn circular(&self, id: NodeId) -> Error {
        Error::CircularReference {
            path: format_path(&self.own_path(id)),
        }
    }

    /// Find the root and path holding this node's value, following links.
    /// `None` for detached nodes.
    pub fn locate(&self, id: NodeId) -> Result<Option<Location>> {
        let mut suffix = KeyPath::new();
        let mut current = id;
        let mut hops = 0;

        loop {
            let record = self.node(current);
            if record.detached {
                return Ok(None);
            }
            if let Some(target) = record.linked_to {
                hops += 1;
                if hops > self.max_link_depth {
                    return Err(self.circular(id));
                }
                current = target;
                continue;
            }
            match (record.parent, &record.key) {
                (Some(parent), Some(key)) => {
                    suffix.push(key.clone());
                    current = parent;
                }
                _ => {
                    suffix.reverse();
                    return Ok(Some(Location {
                        root: record.root,
                        path: suffix,
                    }));
                }
            }
        }
    }

    /// Borrow the current value of a node. Link cycles and detached nodes
    /// resolve to `Undefined`.
    pub fn value_ref(&self, id: NodeId) -> &Value {
        match self.locate(id) {
            Ok(Some(location)) => self
                .root_record(location.root)
                .value
                .get_path(&location.path),
            Ok(None) => &UNDEFINED,
            Err(err) => {
                warn!(error = %err, "unresolvable node");
                &UNDEFINED
            }
        }
    }

    pub fn resolve(&self, id: NodeId) -> Value {
        self.value_ref(id).clone()
    }

    /// The node a write to `id` lands on after following links at any level.
    pub fn effective(&mut self, id: NodeId) -> Result<NodeId> {
        let mut current = id;
        let mut hops = 0;

        'outer: loop {
            let mut keys = KeyPath::new();
            let mut walker = current;
            loop {
                let (linked_to, parent, key) = {
                    let record = self.node(walker);
                    (record.linked_to, record.parent, record.key.clone())
                };
                if let Some(target) = linked_to {
                    hops += 1;
                    if hops > self.max_link_depth {
                        return Err(self.circular(id));
                    }
                    let mut landed = target;
                    for key in keys.iter().rev() {
                        landed = self.child(landed, key.clone());
                    }
                    current = landed;
                    continue 'outer;
                }
                match (parent, key) {
                    (Some(parent), Some(key)) => {
                        keys.push(key);
                        walker = parent;
                    }
                    _ => return Ok(current),
                }
            }
        }
    }

    /// Whether the root holding this node's value is locked.
    pub fn is_locked(&self, id: NodeId) -> bool {
        self.root_record(self.node(id).root).locked
    }

    /// Store a value at a node that has no links above it. Returns the
    /// previous value, or `None` when the node is detached.
    pub fn store(&mut self, id: NodeId, value: Value) -> Result<Option<Value>> {
        let Some(location) = self.locate(id)? else {
            return Ok(None);
        };
        let root = self.root_record_mut(location.root);
        let prev = root.value.get_path(&location.path).clone();
        root.value
            .set_path(&location.path, value)
            .map_err(|err| err.into_error(&location.path))?;
        Ok(Some(prev))
    }

    /// Add `delta` to the recursive listener count of a node and its ancestors.
    pub fn adjust_listener_count(&mut self, id: NodeId, delta: isize) {
        let mut current = Some(id);
        while let Some(node) = current {
            let record = self.node_mut(node);
            record.num_listeners_recursive = record.num_listeners_recursive.saturating_add_signed(delta);
            current = record.parent;
        }
    }

    /// Remove a node from its parent's child map.
    fn detach(&mut self, id: NodeId) {
        let count = self.node(id).num_listeners_recursive;
        if let Some(parent) = self.node(id).parent {
            if count > 0 {
                self.adjust_listener_count(parent, -(count as isize));
            }
        }
        let record = self.node_mut(id);
        record.parent = None;
        record.key = None;
        record.detached = true;
    }

    /// Point `from` at `to`, replacing any previous link.
    pub fn link(&mut self, from: NodeId, to: NodeId) {
        if self.node(from).linked_to == Some(to) {
            return;
        }
        self.unlink(from);
        self.node_mut(from).linked_to = Some(to);
        self.node_mut(to).linked_from.insert(from);
        self.links += 1;
    }

    pub fn unlink(&mut self, from: NodeId) {
        if let Some(previous) = self.node_mut(from).linked_to.take() {
            self.node_mut(previous).linked_from.shift_remove(&from);
            self.links -= 1;
        }
    }

    /// Re-key child nodes of reconciled arrays below `anchor` so each node
    /// follows its element to the new index.
    pub fn apply_moves(&mut self, anchor: NodeId, moves: &[Move]) {
        let mut by_array: IndexMap<&[Key], Vec<(usize, usize)>> = IndexMap::new();
        for m in moves {
            by_array
                .entry(m.array_path.as_slice())
                .or_default()
                .push((m.from, m.to));
        }
        // Outer arrays first, so nested paths (expressed in new indices) match
        // the already re-keyed outer nodes.
        let mut groups: Vec<_> = by_array.into_iter().collect();
        groups.sort_by_key(|(path, _)| path.len());

        for (path, pairs) in groups {
            let (array_node, depth) = self.deepest_existing(anchor, path);
            if depth < path.len() {
                continue;
            }

            let mut moving = Vec::new();
            for (from, to) in pairs {
                if let Some(child) = self
                    .node_mut(array_node)
                    .children
                    .shift_remove(&Key::Index(from))
                {
                    moving.push((to, child));
                }
            }
            for (to, child) in moving {
                self.node_mut(child).key = Some(Key::Index(to));
                let displaced = self
                    .node_mut(array_node)
                    .children
                    .insert(Key::Index(to), child);
                if let Some(displaced) = displaced {
                    self.detach(displaced);
                }
            }
        }
    }
}
