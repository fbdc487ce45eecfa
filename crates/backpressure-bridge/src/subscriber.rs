//! Contracts between the bridge and its two collaborators.

use crate::{BridgeError, BufferedBridge};
use std::sync::Arc;

/// The producer side, as seen by the bridge.
///
/// The bridge requests unlimited items right after activation and only ever
/// calls `cancel` afterwards; it does all flow control itself.
pub trait Upstream: Send + Sync {
    /// Asks for `n` more items.
    fn request(&self, n: u64);

    /// Stops the flow of items. May be called more than once by a
    /// misbehaving caller, though the bridge itself calls it at most once.
    fn cancel(&self);
}

/// The consumer side.
///
/// Callbacks are serialized by the bridge's drain token: no two of them ever
/// run at the same time, though consecutive calls may come from different
/// threads. They may call back into the [`BridgeSubscription`] re-entrantly.
pub trait Subscriber<T>: Send {
    /// Activation. Called once, before any other callback; the natural place
    /// to [`negotiate`](BridgeSubscription::negotiate) fusion and make the
    /// first [`request`](BridgeSubscription::request).
    fn on_subscribe(&mut self, subscription: BridgeSubscription<T>);

    /// Regular delivery of one item.
    fn on_item(&mut self, item: T);

    /// Fused delivery: items may be available to
    /// [`poll`](BridgeSubscription::poll). Sent once per drain pass, whether
    /// or not the buffer actually holds anything.
    fn on_available(&mut self) {}

    /// Terminal failure. Nothing follows it.
    fn on_error(&mut self, error: BridgeError);

    /// Terminal success. Nothing follows it.
    fn on_complete(&mut self);
}

/// Delivery mode requested or granted during fusion negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FusionMode {
    /// Regular push delivery.
    #[default]
    None,
    /// Synchronous pull. Not supported by the bridge.
    Sync,
    /// Asynchronous pull: the subscriber drains the buffer on notification.
    Async,
    /// Either pull mode.
    Any,
}

impl FusionMode {
    /// Returns `true` if this mode allows asynchronous pull.
    #[inline]
    pub fn includes_async(self) -> bool {
        matches!(self, Self::Async | Self::Any)
    }
}

/// The subscriber's handle on its bridge.
///
/// Carries credit grants and cancellation upstream, and in fused mode gives
/// direct access to the buffer.
pub struct BridgeSubscription<T> {
    bridge: Arc<BufferedBridge<T>>,
}

impl<T> Clone for BridgeSubscription<T> {
    fn clone(&self) -> Self {
        Self {
            bridge: Arc::clone(&self.bridge),
        }
    }
}

impl<T: Send + 'static> BridgeSubscription<T> {
    pub(crate) fn new(bridge: Arc<BufferedBridge<T>>) -> Self {
        Self { bridge }
    }

    /// Grants `n` more items of credit.
    #[inline]
    pub fn request(&self, n: u64) {
        self.bridge.request(n);
    }

    /// Stops delivery and cancels upstream.
    #[inline]
    pub fn cancel(&self) {
        self.bridge.cancel();
    }

    /// One-shot fusion handshake. See [`BufferedBridge::negotiate`].
    #[inline]
    pub fn negotiate(&self, requested: FusionMode) -> FusionMode {
        self.bridge.negotiate(requested)
    }

    /// Fused mode: removes the oldest buffered item.
    #[inline]
    pub fn poll(&self) -> Option<T> {
        self.bridge.poll()
    }

    /// Fused mode: number of buffered items.
    #[inline]
    pub fn len(&self) -> usize {
        self.bridge.buffered()
    }

    /// Fused mode: returns `true` if nothing is buffered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bridge.is_empty()
    }

    /// Fused mode: drops every buffered item.
    #[inline]
    pub fn clear(&self) {
        self.bridge.clear();
    }

    /// The bridge behind this handle.
    pub fn bridge(&self) -> &Arc<BufferedBridge<T>> {
        &self.bridge
    }
}
