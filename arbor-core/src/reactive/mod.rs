//! Reactive Engine
//!
//! This module implements the engine on top of the node graph: reading and
//! writing nodes, tracking dependencies, batching notifications and running
//! computed nodes.
//!
//! # Concepts
//!
//! ## Nodes
//!
//! A [`Node`] addresses one path in a value tree. Reading it inside a
//! tracked evaluation records it as a dependency; writing it diffs the old
//! and new value and notifies every listener the change reaches.
//!
//! ## Listeners
//!
//! [`Node::subscribe`] is the one registration primitive. A listener sees
//! changes at or below its node, filtered by its [`TrackingMode`]:
//! `Shallow` ignores changes deeper than the node's own keys, `Optimized`
//! additionally ignores anything that does not change the node's shape.
//!
//! ## Computed and Linked Nodes
//!
//! [`Runtime::computed`] and [`Runtime::linked`] create nodes whose value
//! comes from a producer. Producers are lazy, re-run when a dependency
//! changes, may return another node to link to, or a [`Deferred`] value that
//! settles later.
//!
//! ## Effects
//!
//! An [`Effect`] re-runs a side-effecting function whenever something it
//! read changes.
//!
//! # Implementation Notes
//!
//! Tracking frames, batch counters and the node arena all belong to a
//! [`Runtime`] rather than to globals, so independent runtimes coexist.

pub(crate) mod activation;
mod batch;
mod context;
mod deferred;
mod effect;
mod handle;
mod notify;
mod retry;
mod runtime;
pub(crate) mod subscriber;
mod write;

pub use activation::{
    ActivationState, ActivationStatus, ComputedOptions, LinkedOptions, Produced, SetArgs,
};
pub use batch::BatchGuard;
pub use context::{TrackedRead, TrackingFrame, TrackingMode};
pub use deferred::{Deferred, Resolver, Settled};
pub use effect::Effect;
pub use handle::Node;
pub use notify::{Change, ChangeEvent};
pub use retry::{Backoff, RetryPolicy};
pub use runtime::{Dependency, Runtime, Tracked};
pub use subscriber::{ListenerFn, ListenerId, SubscribeOptions, Subscription};
