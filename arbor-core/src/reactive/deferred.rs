//! Deferred Values
//!
//! A [`Deferred`] is a value that settles later, returned by producers whose
//! result is asynchronous. It is a small shared cell: callbacks registered
//! before settlement run when it settles; callbacks registered afterwards run
//! right away. Callbacks always run outside the cell's lock.

use std::future::Future;
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::error::ActivationError;
use crate::value::Value;

/// Outcome of a deferred value.
pub type Settled = Result<Value, ActivationError>;

type Callback = Box<dyn FnOnce(Settled) + Send>;

enum DeferredState {
    Pending(Vec<Callback>),
    Settled(Settled),
}

/// A value that settles later.
#[derive(Clone)]
pub struct Deferred {
    state: Arc<Mutex<DeferredState>>,
}

/// The settling side of a [`Deferred`].
///
/// Dropping an unused resolver rejects the value, so a producer can never
/// leave its node loading forever by losing the resolver.
pub struct Resolver {
    state: Arc<Mutex<DeferredState>>,
}

impl Deferred {
    pub fn new() -> (Deferred, Resolver) {
        let state = Arc::new(Mutex::new(DeferredState::Pending(Vec::new())));
        (
            Deferred {
                state: state.clone(),
            },
            Resolver { state },
        )
    }

    pub fn resolved(value: impl Into<Value>) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeferredState::Settled(Ok(value.into())))),
        }
    }

    pub fn rejected(error: impl Into<ActivationError>) -> Self {
        Self {
            state: Arc::new(Mutex::new(DeferredState::Settled(Err(error.into())))),
        }
    }

    /// Settle with the output of a future spawned on `handle`.
    pub fn spawn<F>(handle: &Handle, future: F) -> Self
    where
        F: Future<Output = Settled> + Send + 'static,
    {
        let (deferred, resolver) = Self::new();
        handle.spawn(async move {
            resolver.settle(future.await);
        });
        deferred
    }

    /// Run `callback` once the value settles.
    pub fn on_settle(&self, callback: impl FnOnce(Settled) + Send + 'static) {
        let settled = {
            let mut state = self.state.lock();
            match &mut *state {
                DeferredState::Pending(callbacks) => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                DeferredState::Settled(result) => result.clone(),
            }
        };
        callback(settled);
    }

    pub fn is_settled(&self) -> bool {
        matches!(*self.state.lock(), DeferredState::Settled(_))
    }

    /// The outcome, if settled.
    pub fn result(&self) -> Option<Settled> {
        match &*self.state.lock() {
            DeferredState::Settled(result) => Some(result.clone()),
            DeferredState::Pending(_) => None,
        }
    }

    /// Wait for the outcome.
    pub async fn wait(&self) -> Settled {
        let (tx, rx) = oneshot::channel();
        self.on_settle(move |result| {
            let _ = tx.send(result);
        });
        rx.await
            .unwrap_or_else(|_| Err(ActivationError::new("deferred value was dropped")))
    }
}

impl Resolver {
    pub fn resolve(self, value: impl Into<Value>) {
        self.settle(Ok(value.into()));
    }

    pub fn reject(self, error: impl Into<ActivationError>) {
        self.settle(Err(error.into()));
    }

    fn settle(&self, result: Settled) {
        let callbacks = {
            let mut state = self.state.lock();
            match &mut *state {
                DeferredState::Pending(callbacks) => {
                    let callbacks = mem::take(callbacks);
                    *state = DeferredState::Settled(result.clone());
                    callbacks
                }
                DeferredState::Settled(_) => return,
            }
        };
        for callback in callbacks {
            callback(result.clone());
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        self.settle(Err(ActivationError::new("resolver dropped without settling")));
    }
}

impl std::fmt::Debug for Deferred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("result", &self.result())
            .finish()
    }
}
