//! backpressure-bridge - Lock-Free Buffering Between Push and Pull
//!
//! A bridge between an upstream that emits items as fast as it likes and a
//! subscriber that only accepts as many items as it has granted credit for.
//! Items wait in a bounded or unbounded buffer; a lock-free drain loop hands
//! them over as credit arrives, never delivering more than was granted.
//!
//! # Key Features
//!
//! - Work-stealing drain loop: triggers never block, they either drain or
//!   hand their work to the thread already draining
//! - Delay-error policy: unbounded buffers (or buffers with an overflow
//!   handler) drain fully before surfacing a failure; bounded buffers fail
//!   fast and abandon buffered items
//! - Fused mode: the subscriber pulls straight from the buffer on a
//!   content-free "items may be available" notification
//! - At most one terminal signal, always after the items it must follow
//!
//! # Example
//!
//! ```
//! use backpressure_bridge::{
//!     BridgeConfig, BridgeError, BridgeSubscription, BufferedBridge, Subscriber, Upstream,
//! };
//! use std::sync::{Arc, Mutex};
//!
//! struct Collect {
//!     seen: Arc<Mutex<Vec<u64>>>,
//! }
//!
//! impl Subscriber<u64> for Collect {
//!     fn on_subscribe(&mut self, subscription: BridgeSubscription<u64>) {
//!         subscription.request(2);
//!     }
//!     fn on_item(&mut self, item: u64) {
//!         self.seen.lock().unwrap().push(item);
//!     }
//!     fn on_error(&mut self, _error: BridgeError) {}
//!     fn on_complete(&mut self) {}
//! }
//!
//! struct Source;
//!
//! impl Upstream for Source {
//!     fn request(&self, _n: u64) {}
//!     fn cancel(&self) {}
//! }
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let bridge = BufferedBridge::new(
//!     BridgeConfig::bounded(16),
//!     Collect { seen: Arc::clone(&seen) },
//! )
//! .unwrap();
//! bridge.on_subscribe(Arc::new(Source));
//!
//! for i in 0..5 {
//!     bridge.on_item(i);
//! }
//!
//! // Two credits: two items delivered, the rest wait
//! assert_eq!(*seen.lock().unwrap(), vec![0, 1]);
//! assert_eq!(bridge.buffered(), 3);
//! ```

mod bridge;
mod config;
mod credit;
mod diagnostics;
mod drain;
mod error;
mod invariants;
mod metrics;
mod queue;
mod ring;
mod subscriber;

pub use bridge::{BoxError, BridgeBuilder, BufferedBridge, OverflowHandler};
pub use config::{BridgeConfig, DEFAULT_CONFIG, SMALL_BUFFER_CONFIG};
pub use credit::UNBOUNDED;
pub use diagnostics::{DiagnosticSink, TracingSink};
pub use error::{BridgeError, ConfigError, HandlerFailure, SharedError};
pub use metrics::MetricsSnapshot;
pub use queue::{ItemQueue, LinkedQueue};
pub use ring::ArrayRing;
pub use subscriber::{BridgeSubscription, FusionMode, Subscriber, Upstream};
