//! Node Graph
//!
//! This module implements the addressable graph over value trees: every path
//! a caller has ever asked for gets a node, and nodes are what listeners and
//! dependencies attach to.
//!
//! # Overview
//!
//! - A *root* owns one mutable [`Value`](crate::value::Value) tree.
//! - A *node* addresses one path in a tree. It holds no value; reading it
//!   walks to the root and indexes the tree.
//! - Nodes may *link* to other nodes, forwarding reads and writes. Links are
//!   arena ids in both directions, so link cycles are plain data.
//!
//! # Design Decisions
//!
//! 1. Nodes live in an arena indexed by [`NodeId`] rather than in a tree of
//!    reference-counted cells. This keeps back-references non-owning and
//!    makes the whole graph sit behind one lock.
//!
//! 2. Children are never removed from the arena. A node that loses its place
//!    during array reconciliation is marked detached instead, so a stale
//!    handle resolves to `Undefined` rather than dangling.
//!
//! 3. Diffing is a pure function of two values. The graph applies the
//!    resulting moves; the notifier turns the change records into listener
//!    calls.

pub(crate) mod diff;
mod node;
pub(crate) mod store;

pub use node::NodeId;
pub(crate) use node::NodeRecord;
