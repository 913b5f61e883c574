//! Tracking Context
//!
//! The tracking context records which nodes a managed evaluation reads. The
//! recorded set becomes the dependency list of a computed node or an effect.
//!
//! # Implementation
//!
//! The current frame lives in the runtime state, not in a thread-local, so
//! independent runtimes never see each other's reads. Entering a scope swaps
//! in a fresh frame and keeps the saved one in a [`TrackingScope`] guard.
//! Finishing the scope (or dropping it, e.g. while unwinding from a panicking
//! producer) puts the saved frame back.
//!
//! Nested evaluations therefore never leak reads into the outer frame.

use std::mem;
use std::sync::Arc;

use indexmap::IndexMap;

use super::runtime::RuntimeInner;
use crate::graph::NodeId;

/// How much of a node's change a dependent cares about.
///
/// Modes escalate `Normal < Shallow < Optimized` when a node is read more
/// than once in the same frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TrackingMode {
    /// Any change at or below the node.
    #[default]
    Normal,
    /// The node's own value or key set changed.
    Shallow,
    /// Like `Shallow`, but only for structural changes (length, key set or
    /// order).
    Optimized,
}

/// One entry of a tracking frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedRead {
    pub mode: TrackingMode,
    pub reads: u32,
}

/// The reads recorded by one evaluation, in first-read order.
#[derive(Debug, Clone, Default)]
pub struct TrackingFrame {
    reads: IndexMap<NodeId, TrackedRead>,
}

impl TrackingFrame {
    /// Insert a read or upgrade an existing one.
    pub fn record(&mut self, node: NodeId, mode: TrackingMode) {
        let entry = self.reads.entry(node).or_insert(TrackedRead { mode, reads: 0 });
        entry.mode = entry.mode.max(mode);
        entry.reads += 1;
    }

    /// Undo one read, removing the node when its count reaches zero.
    pub fn forget(&mut self, node: NodeId) {
        if let Some(entry) = self.reads.get_mut(&node) {
            entry.reads = entry.reads.saturating_sub(1);
            if entry.reads == 0 {
                self.reads.shift_remove(&node);
            }
        }
    }

    pub fn get(&self, node: NodeId) -> Option<&TrackedRead> {
        self.reads.get(&node)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &TrackedRead)> {
        self.reads.iter().map(|(id, read)| (*id, read))
    }

    pub fn len(&self) -> usize {
        self.reads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }
}

/// Guard that restores the enclosing frame when dropped.
pub(crate) struct TrackingScope {
    runtime: Arc<RuntimeInner>,
    saved: Option<Option<TrackingFrame>>,
}

impl TrackingScope {
    /// Push a fresh frame.
    pub fn enter(runtime: Arc<RuntimeInner>) -> Self {
        let saved = runtime
            .state
            .lock()
            .tracking
            .replace(TrackingFrame::default());
        Self {
            runtime,
            saved: Some(saved),
        }
    }

    /// Restore the enclosing frame and return the one recorded by this scope.
    pub fn finish(mut self) -> TrackingFrame {
        self.restore().unwrap_or_default()
    }

    fn restore(&mut self) -> Option<TrackingFrame> {
        let saved = self.saved.take()?;
        let mut state = self.runtime.state.lock();
        mem::replace(&mut state.tracking, saved)
    }
}

impl Drop for TrackingScope {
    fn drop(&mut self) {
        self.restore();
    }
}
