//! Write Pipeline
//!
//! Every mutation of a value tree goes through [`Runtime::write`]:
//!
//! 1. Writes to (or below) a two-way linked node are handed to its setter
//!    with the would-be full value, or queued while its activation is still
//!    running.
//! 2. Links are followed to the node the write really lands on.
//! 3. Locked roots reject writes that do not come from the pipeline itself.
//! 4. The value is stored and diffed against the previous one; array moves
//!    re-key child nodes.
//! 5. Immediate listeners run now; the write is folded into the open batch
//!    for deferred listeners.

use std::any::Any;
use std::collections::HashSet;
use std::panic;

use tracing::trace;

use super::activation::{ActivationState, SetArgs};
use super::notify::{collect, fire, prepare_calls, ChangeSet, ListenerCall};
use super::runtime::{Runtime, State};
use crate::error::{Error, Result};
use crate::graph::diff::diff;
use crate::graph::NodeId;
use crate::value::{format_path, Value};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WriteOp {
    Set(Value),
    Remove,
}

impl WriteOp {
    fn into_value(self) -> Value {
        match self {
            WriteOp::Set(value) => value,
            WriteOp::Remove => Value::Undefined,
        }
    }
}

impl Runtime {
    pub(crate) fn write(&self, node: NodeId, op: WriteOp) -> Result<()> {
        self.write_with(node, op, false)
    }

    /// Write on behalf of the pipeline itself, bypassing root locks and
    /// setters.
    pub(crate) fn write_internal(&self, node: NodeId, op: WriteOp) -> Result<()> {
        self.write_with(node, op, true)
    }

    fn write_with(&self, node: NodeId, op: WriteOp, internal: bool) -> Result<()> {
        if !internal {
            self.ensure_active(node);
            if self.route_to_setter(node, &op)? {
                return Ok(());
            }
            self.open_implicit_batch();
        }

        self.enter_batch();
        let result = self.apply_write(node, op, internal);
        self.exit_batch();

        match result {
            Ok(Some(payload)) => panic::resume_unwind(payload),
            Ok(None) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Hand the write to the nearest two-way setter at or above `node`.
    /// Returns `false` when no setter owns the node.
    fn route_to_setter(&self, node: NodeId, op: &WriteOp) -> Result<bool> {
        let (setter, args) = {
            let mut guard = self.inner().state.lock();
            let graph = &mut guard.graph;

            let mut owner = Some(node);
            while let Some(candidate) = owner {
                let record = graph.node(candidate);
                let has_setter = record
                    .activation
                    .as_ref()
                    .is_some_and(|activation| activation.setter.is_some());
                if has_setter {
                    break;
                }
                owner = record.parent;
            }
            let Some(owner) = owner else {
                return Ok(false);
            };

            let prev = graph.resolve(owner);
            let owner_depth = graph.own_path(owner).len();
            let relative = graph.own_path(node).split_off(owner_depth);

            let Some(activation) = graph.node_mut(owner).activation.as_mut() else {
                return Ok(false);
            };
            if matches!(
                activation.state,
                ActivationState::Inactive | ActivationState::Activating | ActivationState::Loading
            ) {
                trace!(node = ?node, "write queued until activation settles");
                activation.pending_writes.push((node, op.clone()));
                return Ok(true);
            }
            let Some(setter) = activation.setter.clone() else {
                return Ok(false);
            };

            let mut value = prev.clone();
            value
                .set_path(&relative, op.clone().into_value())
                .map_err(|err| err.into_error(&relative))?;
            (setter, SetArgs { value, prev })
        };

        setter(args);
        Ok(true)
    }

    /// Store, diff and route one write. Returns the first panic raised by an
    /// immediate listener.
    fn apply_write(&self, node: NodeId, op: WriteOp, internal: bool) -> Result<Option<Box<dyn Any + Send>>> {
        let calls = {
            let mut guard = self.inner().state.lock();
            let state = &mut *guard;
            let target = state.graph.effective(node)?;

            if !internal && state.graph.is_locked(target) {
                return Err(Error::LockedWrite {
                    path: format_path(&state.graph.own_path(target)),
                });
            }

            let parent = state.graph.node(target).parent;
            let removing = op == WriteOp::Remove;
            let (anchor, prev) = match (removing, parent) {
                // Removal changes the parent's shape (arrays splice), so the
                // parent is diffed.
                (true, Some(parent)) => {
                    let prev = state.graph.resolve(parent);
                    if state.graph.store(target, Value::Undefined)?.is_none() {
                        return Ok(None);
                    }
                    (parent, prev)
                }
                _ => match state.graph.store(target, op.into_value())? {
                    Some(prev) => (target, prev),
                    None => return Ok(None),
                },
            };

            let current = state.graph.resolve(anchor);
            self.propagate(state, anchor, prev, current, true)
        };

        Ok(fire(calls))
    }

    /// Diff a node's old and new value, record it in the batch and build the
    /// immediate listener calls.
    pub(crate) fn propagate(
        &self,
        state: &mut State,
        anchor: NodeId,
        prev: Value,
        current: Value,
        apply_moves: bool,
    ) -> Vec<ListenerCall> {
        let changes = diff(&prev, &current, &self.config().id_fields);
        if changes.is_empty() {
            return Vec::new();
        }

        trace!(
            path = %format_path(&state.graph.own_path(anchor)),
            changes = changes.changes.len(),
            moves = changes.moves.len(),
            "write"
        );

        if apply_moves {
            state.graph.apply_moves(anchor, &changes.moves);
        }
        state.batch.record(anchor, prev, current);

        let mut set = ChangeSet::default();
        collect(&state.graph, anchor, &changes.changes, true, &mut set);
        if set.is_empty() {
            return Vec::new();
        }
        prepare_calls(&state.graph, set, true, &mut HashSet::new())
    }

    /// Announce that a node's resolved value changed without a store, for
    /// example because it was linked somewhere else.
    pub(crate) fn notify_replaced(&self, anchor: NodeId, prev: Value, current: Value) {
        self.enter_batch();
        let calls = {
            let mut guard = self.inner().state.lock();
            self.propagate(&mut guard, anchor, prev, current, false)
        };
        let panic = fire(calls);
        self.exit_batch();

        if let Some(payload) = panic {
            panic::resume_unwind(payload);
        }
    }
}
