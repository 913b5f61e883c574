//! Effect Implementation
//!
//! An Effect is a side-effecting computation that re-runs whenever a node it
//! read changes.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately inside a
//!    tracking scope to discover its dependencies.
//!
//! 2. It subscribes one shared listener to every node it read, with the
//!    tracking mode of that read.
//!
//! 3. When a dependency changes, the listener re-runs the function, which
//!    replaces the subscriptions with the newly read set.
//!
//! # Differences from Computed Nodes
//!
//! - Computed nodes produce a value stored in the graph; effects do not.
//! - Computed nodes are lazy; effects run eagerly on creation.
//!
//! # Lifetime
//!
//! An effect stays subscribed while any clone of its handle is alive, or
//! until [`Effect::dispose`] is called.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;

use super::deferred::Deferred;
use super::runtime::{Runtime, RuntimeInner};
use super::subscriber::{ListenerEntry, ListenerFn, Subscription};
use crate::value::Value;

/// Counter for generating unique effect IDs.
static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_effect_id() -> u64 {
    EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct EffectInner {
    id: u64,
    runtime: Weak<RuntimeInner>,
    run: Box<dyn Fn() + Send + Sync>,
    /// Listener shared by all subscriptions of this effect.
    listener: OnceLock<ListenerFn>,
    subscriptions: Mutex<Vec<Subscription>>,
    disposed: AtomicBool,
    run_count: AtomicUsize,
}

impl EffectInner {
    fn execute(&self) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let Some(runtime) = self.runtime.upgrade().map(Runtime::from_inner) else {
            return;
        };
        let Some(listener) = self.listener.get().cloned() else {
            return;
        };

        let tracked = runtime.run_tracked(|| (self.run)());
        self.run_count.fetch_add(1, Ordering::SeqCst);

        // Build the new subscriptions before dropping the old ones so a
        // dependency kept across runs never sees a zero listener count.
        let mut fresh = Vec::with_capacity(tracked.dependencies.len());
        if !self.disposed.load(Ordering::SeqCst) {
            let mut state = runtime.inner().state.lock();
            for dependency in &tracked.dependencies {
                let node = dependency.node.id();
                let entry = ListenerEntry::new(listener.clone(), dependency.mode, true);
                let id = state.add_listener(node, entry, false);
                fresh.push(Subscription::new(runtime.downgrade(), node, id));
            }
        }

        let stale = std::mem::replace(&mut *self.subscriptions.lock(), fresh);
        drop(stale);
    }
}

/// A side-effecting computation that runs when its dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let state = runtime.create_root(json!({"count": 0}));
/// let count = state.child("count");
///
/// let effect = runtime.effect(move || {
///     println!("Count is: {}", count.get());
/// });
///
/// state.set_key("count", 5)?;  // Prints: "Count is: 5"
/// ```
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    fn new(runtime: &Runtime, run: Box<dyn Fn() + Send + Sync>) -> Self {
        let inner = Arc::new(EffectInner {
            id: next_effect_id(),
            runtime: runtime.downgrade(),
            run,
            listener: OnceLock::new(),
            subscriptions: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
            run_count: AtomicUsize::new(0),
        });

        let weak = Arc::downgrade(&inner);
        let listener: ListenerFn = Arc::new(move |_| {
            if let Some(inner) = weak.upgrade() {
                inner.execute();
            }
        });
        let _ = inner.listener.set(listener);

        inner.execute();
        Self { inner }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Run the effect function now.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Stop the effect and release its subscriptions.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        let subscriptions = std::mem::take(&mut *self.inner.subscriptions.lock());
        drop(subscriptions);
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    pub fn dependency_count(&self) -> usize {
        self.inner.subscriptions.lock().len()
    }
}

impl Clone for Effect {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Runtime {
    /// Run `f` now and again whenever a node it read changes.
    pub fn effect<F>(&self, f: F) -> Effect
    where
        F: Fn() + Send + Sync + 'static,
    {
        Effect::new(self, Box::new(f))
    }

    /// Settle with the first truthy value `predicate` returns, re-evaluating
    /// as its dependencies change.
    pub fn when<F, V>(&self, predicate: F) -> Deferred
    where
        F: Fn() -> V + Send + Sync + 'static,
        V: Into<Value>,
    {
        let (deferred, resolver) = Deferred::new();
        let resolver = Mutex::new(Some(resolver));
        let keep_alive: Arc<Mutex<Option<Effect>>> = Arc::new(Mutex::new(None));

        let slot = keep_alive.clone();
        let effect = self.effect(move || {
            let value = predicate().into();
            if !value.is_truthy() {
                return;
            }
            if let Some(resolver) = resolver.lock().take() {
                resolver.resolve(value);
            }
            if let Some(effect) = slot.lock().take() {
                effect.dispose();
            }
        });

        if deferred.is_settled() {
            effect.dispose();
        } else {
            *keep_alive.lock() = Some(effect);
        }
        deferred
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
