//! Arbor Core
//!
//! This crate provides a fine-grained reactive state container: a mutable
//! value tree whose every sub-path can be read, written and observed on its
//! own. It implements:
//!
//! - An addressable node graph over arbitrary value trees
//! - Automatic dependency tracking for computed nodes and effects
//! - A diff-and-notify pipeline with batching and identity-aware array
//!   reconciliation
//! - Lazy computed and linked nodes with asynchronous results and retries
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `value`: The dynamically typed value stored in trees
//! - `graph`: Node arena, addressing and structural diffing
//! - `reactive`: Runtime, tracking, batching, notification and activation
//! - `scheduler`: Host hooks for deferred work
//! - `config`: Engine configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use arbor_core::{ManualScheduler, Runtime};
//! use serde_json::json;
//!
//! let runtime = Runtime::new(ManualScheduler::new());
//! let state = runtime.create_root(json!({"count": 0}));
//! let count = state.child("count");
//!
//! // A derived value
//! let count_for_doubled = count.clone();
//! let doubled = runtime.computed(move || count_for_doubled.get().as_f64().unwrap_or(0.0) * 2.0);
//!
//! // An effect
//! let _effect = runtime.effect(move || println!("doubled: {:?}", doubled.get()));
//!
//! // Update the count
//! count.set(5)?;
//! // Effect automatically runs, prints: "doubled: Number(10.0)"
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod scheduler;
pub mod value;

pub use config::{EngineConfig, FlushMode};
pub use error::{ActivationError, Error, Result};
pub use graph::NodeId;
pub use reactive::{
    ActivationState, ActivationStatus, BatchGuard, Change, ChangeEvent, ComputedOptions, Deferred,
    Effect, LinkedOptions, Node, Produced, RetryPolicy, Runtime, SetArgs, SubscribeOptions,
    Subscription, Tracked, TrackingMode,
};
pub use scheduler::{ManualScheduler, Scheduler, TimerId, TokioScheduler};
pub use value::{Key, PathType, Value};
