//! Error types for the reactive engine.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by node operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// The target belongs to a locked root (for example a computed value).
    #[error("cannot write to `{path}`: the root is locked")]
    LockedWrite { path: String },

    /// A link chain loops back on itself.
    #[error("circular reference detected at `{path}`")]
    CircularReference { path: String },

    /// A write needs to create a child under a primitive value.
    #[error("cannot create a child under `{path}`: the value is not a container")]
    NotAContainer { path: String },

    /// A write indexes an array too far past its end.
    #[error("index {index} is too far past the end of `{path}`")]
    IndexOutOfRange { path: String, index: usize },

    /// A producer function failed.
    #[error(transparent)]
    Activation(#[from] ActivationError),
}

/// Failure of a producer function, either a panic, an `Err` result, or a
/// rejected deferred value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("activation failed: {message}")]
pub struct ActivationError {
    message: String,
}

impl ActivationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Build an error from a caught panic payload.
    pub(crate) fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "producer panicked".to_owned());
        Self { message }
    }
}

impl From<&str> for ActivationError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ActivationError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_payloads_become_messages() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(ActivationError::from_panic(payload.as_ref()).message(), "boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(ActivationError::from_panic(payload.as_ref()).message(), "bang");

        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(
            ActivationError::from_panic(payload.as_ref()).message(),
            "producer panicked"
        );
    }

    #[test]
    fn display_includes_path() {
        let err = Error::LockedWrite {
            path: "a.b".to_owned(),
        };
        assert_eq!(err.to_string(), "cannot write to `a.b`: the root is locked");
    }
}
