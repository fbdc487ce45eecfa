//! Error types for bridge operations.

use std::sync::Arc;
use thiserror::Error;

/// A shareable, type-erased error.
///
/// Terminal errors are kept for introspection after being delivered, so they
/// are reference counted rather than boxed.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced downstream as the terminal signal, or reported to the
/// diagnostic sink when they cannot be delivered.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// The buffer rejected an item because it was full.
    #[error("buffer overflow: could not emit item due to lack of requests (capacity {capacity})")]
    Overflow {
        /// Capacity of the buffer that rejected the item.
        capacity: usize,
        /// Failure raised by the overflow handler while observing the item.
        #[source]
        cause: Option<HandlerFailure>,
    },

    /// Upstream signalled an error.
    #[error("upstream failed: {0}")]
    Upstream(#[source] SharedError),

    /// A credit request of zero was made.
    #[error("credit request must be positive")]
    InvalidRequest,

    /// Upstream activated the bridge more than once.
    #[error("bridge already has an upstream subscription")]
    DuplicateSubscription,
}

impl BridgeError {
    /// Wraps any upstream error.
    pub fn upstream<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Upstream(Arc::new(error))
    }

    /// Returns `true` if the buffer overflowed.
    #[inline]
    pub fn is_overflow(&self) -> bool {
        matches!(self, Self::Overflow { .. })
    }
}

/// Failure of an overflow handler, chained onto the overflow error.
#[derive(Debug, Clone, Error)]
pub enum HandlerFailure {
    /// The handler returned an error.
    #[error("overflow handler failed: {0}")]
    Failed(#[source] SharedError),

    /// The handler panicked.
    #[error("overflow handler panicked: {0}")]
    Panicked(String),
}

/// Errors raised while constructing a bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A bounded buffer cannot hold zero items.
    #[error("bounded buffer capacity must be at least 1")]
    ZeroCapacity,
}
