//! Runtime Configuration
//!
//! Settings that shape how a [`Runtime`](crate::reactive::Runtime) batches
//! notifications and reconciles arrays. Every field has a default, so a
//! partial JSON document is a valid configuration.

use serde::{Deserialize, Serialize};

use crate::reactive::RetryPolicy;

/// When a write made outside of an explicit batch is delivered to
/// deferred listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// The write is a batch of one: listeners run before the write returns.
    #[default]
    Immediate,
    /// The write opens an implicit batch that the scheduler closes at the end
    /// of the current unit of work.
    Deferred,
}

/// Configuration for a [`Runtime`](crate::reactive::Runtime).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub flush_mode: FlushMode,

    /// Fields checked, in order, on the first element of an array to find the
    /// identity used for move detection.
    pub id_fields: Vec<String>,

    /// Maximum number of link hops followed while resolving a node.
    pub max_link_depth: usize,

    /// Retry policy for computed nodes created without their own.
    pub default_retry: Option<RetryPolicy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            flush_mode: FlushMode::Immediate,
            id_fields: vec!["id".to_owned(), "_id".to_owned(), "__id".to_owned()],
            max_link_depth: 64,
            default_retry: None,
        }
    }
}

impl EngineConfig {
    pub fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    pub fn with_id_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default_retry(mut self, retry: RetryPolicy) -> Self {
        self.default_retry = Some(retry);
        self
    }
}
