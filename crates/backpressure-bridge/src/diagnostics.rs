//! Reporting of signals the bridge cannot deliver.

use crate::BridgeError;

/// Receives signals that arrive after termination or break the protocol.
///
/// Injected at construction so each bridge can be observed in isolation.
/// None of these callbacks may block; they run on whichever thread produced
/// the signal.
pub trait DiagnosticSink<T>: Send + Sync {
    /// An item arrived after upstream had already terminated.
    fn item_dropped(&self, item: T);

    /// An error could not be delivered: upstream had already terminated, or
    /// the error describes a protocol violation (zero request, second
    /// upstream).
    fn error_dropped(&self, error: BridgeError);

    /// A completion arrived after upstream had already terminated.
    fn completion_dropped(&self) {}
}

/// Default sink: logs every dropped signal through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl<T> DiagnosticSink<T> for TracingSink {
    fn item_dropped(&self, _item: T) {
        tracing::warn!("item dropped: upstream already terminated");
    }

    fn error_dropped(&self, error: BridgeError) {
        tracing::warn!(%error, "error dropped");
    }

    fn completion_dropped(&self) {
        tracing::warn!("completion dropped: upstream already terminated");
    }
}
