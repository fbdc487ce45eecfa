#[cfg(debug_assertions)]
use crate::invariants::{
    debug_assert_error_implies_done, debug_assert_not_fused, debug_assert_within_credit,
};
use crate::credit::{Credit, UNBOUNDED};
use crate::invariants::debug_assert_single_error;
use crate::drain::DrainToken;
use crate::metrics::Metrics;
use crate::{
    ArrayRing, BridgeConfig, BridgeError, BridgeSubscription, ConfigError, DiagnosticSink,
    FusionMode, HandlerFailure, ItemQueue, LinkedQueue, MetricsSnapshot, Subscriber,
    TracingSink, Upstream,
};
use std::any::Any;
use std::cell::UnsafeCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{self, AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

/// Error type an overflow handler may return.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Callback observing each item the buffer rejects.
pub type OverflowHandler<T> = Arc<dyn Fn(T) -> Result<(), BoxError> + Send + Sync>;

// =============================================================================
// SHARED STATE & OWNERSHIP
// =============================================================================
//
// Three roles touch a bridge concurrently: upstream (`on_item`, `on_error`,
// `on_complete`, never concurrently with itself), the subscriber's handle
// (`request`, `cancel`, `negotiate`, fused `poll`), and whichever of them is
// currently the drainer.
//
// ## Single-Owner State
//
// - `downstream`: only touched while holding the drain token. The token is
//   created held, so activation (`on_subscribe`) owns it until its first
//   drain pass releases it. A drainer that delivers a terminal signal or
//   observes cancellation takes the subscriber out and never releases the
//   token, so the cell is never touched again.
//
// ## Publication Order
//
// `on_error` writes `error` before the Release store of `done`. Every reader
// loads `done` with Acquire before reading `error`, so a reader that sees
// `done == true` also sees the complete error.
//
// `terminating` is a separate first-caller-wins gate, so `done` is only ever
// published after the error slot has been settled.
//
// ## Cancellation vs. Intake
//
// `on_item` offers, then re-reads `cancelled`; whoever clears after a cancel
// first sets or observes `cancelled`, then clears. Both sides put a SeqCst
// fence between their write and their read, so at least one of them sees
// the other: either the clear removes the late item, or the producer sees
// the cancel and clears it itself.
//
// =============================================================================

const DELIVERY_UNDECIDED: u8 = 0;
const DELIVERY_REGULAR: u8 = 1;
const DELIVERY_FUSED: u8 = 2;

/// Delivery strategy, fixed once by negotiation or by the first drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Undecided,
    Regular,
    Fused,
}

impl Delivery {
    fn from_u8(raw: u8) -> Self {
        match raw {
            DELIVERY_REGULAR => Self::Regular,
            DELIVERY_FUSED => Self::Fused,
            _ => Self::Undecided,
        }
    }

    fn granted_mode(self) -> FusionMode {
        match self {
            Self::Fused => FusionMode::Async,
            Self::Regular | Self::Undecided => FusionMode::None,
        }
    }
}

type Downstream<T> = Option<Box<dyn Subscriber<T>>>;

/// Buffering bridge between an eager upstream and a credit-driven subscriber.
///
/// Upstream pushes through [`on_item`](Self::on_item),
/// [`on_error`](Self::on_error) and [`on_complete`](Self::on_complete). The
/// subscriber grants credit and cancels through its [`BridgeSubscription`].
/// Items wait in the buffer until credit allows delivery; in fused mode the
/// subscriber pulls them itself.
pub struct BufferedBridge<T> {
    queue: Box<dyn ItemQueue<T>>,
    upstream: OnceLock<Arc<dyn Upstream>>,
    overflow_handler: Option<OverflowHandler<T>>,
    diagnostics: Arc<dyn DiagnosticSink<T>>,
    delay_error: bool,
    capacity: usize,

    cancelled: AtomicBool,
    upstream_cancelled: AtomicBool,
    delivery: AtomicU8,

    terminating: AtomicBool,
    done: AtomicBool,
    error: OnceLock<BridgeError>,

    credit: Credit,
    drain: DrainToken,
    downstream: UnsafeCell<Downstream<T>>,

    metrics: Option<Metrics>,
}

// Safety: `downstream` is only accessed by the drain token holder (see above);
// every other field is Sync on its own.
unsafe impl<T: Send> Send for BufferedBridge<T> {}
unsafe impl<T: Send> Sync for BufferedBridge<T> {}

/// Builder for [`BufferedBridge`].
pub struct BridgeBuilder<T> {
    config: BridgeConfig,
    overflow_handler: Option<OverflowHandler<T>>,
    diagnostics: Option<Arc<dyn DiagnosticSink<T>>>,
}

impl<T: Send + 'static> BridgeBuilder<T> {
    /// Observes each rejected item. Turns on delay-error.
    pub fn overflow_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(T) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.overflow_handler = Some(Arc::new(handler));
        self
    }

    /// Where dropped signals are reported. Defaults to [`TracingSink`].
    pub fn diagnostics(mut self, sink: Arc<dyn DiagnosticSink<T>>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    /// Creates the bridge for `downstream`.
    ///
    /// The subscriber is activated when upstream calls
    /// [`BufferedBridge::on_subscribe`].
    pub fn build<S>(self, downstream: S) -> Result<Arc<BufferedBridge<T>>, ConfigError>
    where
        S: Subscriber<T> + 'static,
    {
        self.config.validate()?;

        let queue: Box<dyn ItemQueue<T>> = if self.config.unbounded {
            Box::new(LinkedQueue::new(self.config.capacity))
        } else {
            Box::new(ArrayRing::new(self.config.capacity)?)
        };
        let delay_error = self.config.unbounded || self.overflow_handler.is_some();
        let diagnostics = self
            .diagnostics
            .unwrap_or_else(|| Arc::new(TracingSink) as Arc<dyn DiagnosticSink<T>>);
        let downstream: Box<dyn Subscriber<T>> = Box::new(downstream);

        Ok(Arc::new(BufferedBridge {
            queue,
            upstream: OnceLock::new(),
            overflow_handler: self.overflow_handler,
            diagnostics,
            delay_error,
            capacity: self.config.capacity,
            cancelled: AtomicBool::new(false),
            upstream_cancelled: AtomicBool::new(false),
            delivery: AtomicU8::new(DELIVERY_UNDECIDED),
            terminating: AtomicBool::new(false),
            done: AtomicBool::new(false),
            error: OnceLock::new(),
            credit: Credit::new(),
            // Held until activation has run the subscriber's `on_subscribe`
            drain: DrainToken::new(true),
            downstream: UnsafeCell::new(Some(downstream)),
            metrics: self.config.enable_metrics.then(Metrics::new),
        }))
    }
}

impl<T: Send + 'static> BufferedBridge<T> {
    /// Starts building a bridge with the given configuration.
    pub fn builder(config: BridgeConfig) -> BridgeBuilder<T> {
        BridgeBuilder {
            config,
            overflow_handler: None,
            diagnostics: None,
        }
    }

    /// Builds a bridge with default diagnostics and no overflow handler.
    pub fn new<S>(config: BridgeConfig, downstream: S) -> Result<Arc<Self>, ConfigError>
    where
        S: Subscriber<T> + 'static,
    {
        Self::builder(config).build(downstream)
    }

    // ---------------------------------------------------------------------
    // UPSTREAM INTAKE
    // ---------------------------------------------------------------------

    /// Activation by upstream.
    ///
    /// Hands the subscriber its [`BridgeSubscription`], then requests
    /// unlimited items from upstream. A second activation is rejected: that
    /// upstream is cancelled and the event reported.
    pub fn on_subscribe(self: &Arc<Self>, upstream: Arc<dyn Upstream>) {
        if self.upstream.set(Arc::clone(&upstream)).is_err() {
            upstream.cancel();
            self.report_error(BridgeError::DuplicateSubscription);
            return;
        }
        tracing::debug!(
            capacity = self.capacity,
            delay_error = self.delay_error,
            "bridge activated"
        );

        // SAFETY: the drain token was created held and nobody has released
        // it yet, so this thread has exclusive access to `downstream`.
        // Re-entrant calls from `on_subscribe` only ever fail to enter.
        if let Some(downstream) = unsafe { (*self.downstream.get()).as_mut() } {
            downstream.on_subscribe(BridgeSubscription::new(Arc::clone(self)));
        }

        // Release the activation hold, picking up anything triggered meanwhile
        self.drain_loop(1);

        if self.cancelled.load(Ordering::Acquire) {
            self.cancel_upstream();
        } else {
            upstream.request(UNBOUNDED);
        }
    }

    /// An item from upstream.
    ///
    /// Buffers it and triggers delivery. If the buffer is full the stream
    /// fails with an overflow error; an item arriving after termination is
    /// reported to the diagnostic sink, one arriving after cancellation is
    /// discarded.
    pub fn on_item(&self, item: T) {
        if self.done.load(Ordering::Acquire) {
            self.report_item(item);
            return;
        }
        if self.cancelled.load(Ordering::Acquire) {
            // Upstream has not seen the cancel yet
            drop(item);
            return;
        }

        match self.queue.offer(item) {
            Ok(()) => {
                if let Some(m) = &self.metrics {
                    m.add_items_accepted(1);
                }
                atomic::fence(Ordering::SeqCst);
                if self.cancelled.load(Ordering::Acquire) {
                    // Raced a cancel that may already have cleared
                    self.queue.clear();
                    return;
                }
                self.drain();
            }
            Err(rejected) => self.overflow(rejected),
        }
    }

    /// Upstream failed. Only the first terminal signal counts.
    pub fn on_error(&self, error: BridgeError) {
        if self.terminating.swap(true, Ordering::AcqRel) {
            self.report_error(error);
            return;
        }
        tracing::debug!(%error, "upstream terminated with error");

        // Only the gate winner writes the slot
        let stored = self.error.set(error).is_ok();
        debug_assert_single_error!(stored);
        self.done.store(true, Ordering::Release);
        self.drain();
    }

    /// Upstream completed. Only the first terminal signal counts.
    pub fn on_complete(&self) {
        if self.terminating.swap(true, Ordering::AcqRel) {
            if let Some(m) = &self.metrics {
                m.add_signal_dropped();
            }
            self.diagnostics.completion_dropped();
            return;
        }
        tracing::debug!("upstream completed");

        self.done.store(true, Ordering::Release);
        self.drain();
    }

    fn overflow(&self, rejected: T) {
        if let Some(m) = &self.metrics {
            m.add_overflow();
        }
        tracing::warn!(capacity = self.capacity, "buffer overflow");

        // The stream is failing; stop upstream before anything else
        self.cancel_upstream();

        let cause = self
            .overflow_handler
            .as_ref()
            .and_then(|handler| observe_overflow(handler, rejected));

        self.on_error(BridgeError::Overflow {
            capacity: self.capacity,
            cause,
        });
    }

    // ---------------------------------------------------------------------
    // SUBSCRIBER ENTRY POINTS
    // ---------------------------------------------------------------------

    /// Grants `n` more items of credit (saturating at unlimited).
    pub fn request(&self, n: u64) {
        if n == 0 {
            self.report_error(BridgeError::InvalidRequest);
            return;
        }
        let prev = self.credit.add(n);
        tracing::trace!(n, prev, "credit granted");
        self.drain();
    }

    /// Stops delivery. Idempotent.
    ///
    /// Cancels upstream and releases the subscriber, either here when no
    /// drain is running or in the running drain's next pass. In regular mode
    /// the buffer is cleared too; in fused mode the subscriber is responsible
    /// for its own final `clear`.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        atomic::fence(Ordering::SeqCst);
        tracing::debug!("cancelled by subscriber");

        self.cancel_upstream();

        if self.drain.enter() {
            if self.delivery() != Delivery::Fused {
                self.queue.clear();
            }
            // SAFETY: entering the token makes us the drainer. It is never
            // released, so no later drain will touch `downstream`.
            drop(unsafe { (*self.downstream.get()).take() });
        }
    }

    /// One-shot fusion handshake.
    ///
    /// Grants [`FusionMode::Async`] if `requested` includes asynchronous pull,
    /// [`FusionMode::None`] otherwise. Once decided (by this call, or by the
    /// first drain pass when nobody negotiated) the answer never changes.
    pub fn negotiate(&self, requested: FusionMode) -> FusionMode {
        let target = if requested.includes_async() {
            DELIVERY_FUSED
        } else {
            DELIVERY_REGULAR
        };
        let decided = match self.delivery.compare_exchange(
            DELIVERY_UNDECIDED,
            target,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => target,
            Err(current) => current,
        };
        let granted = Delivery::from_u8(decided).granted_mode();
        tracing::debug!(?requested, ?granted, "fusion negotiated");
        granted
    }

    /// Fused mode: removes the oldest buffered item.
    #[inline]
    pub fn poll(&self) -> Option<T> {
        self.queue.poll()
    }

    /// Fused mode: drops every buffered item.
    #[inline]
    pub fn clear(&self) {
        self.queue.clear();
    }

    /// Returns `true` if nothing is buffered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    // ---------------------------------------------------------------------
    // DRAIN ENGINE
    // ---------------------------------------------------------------------

    /// Trigger: becomes the drainer, or leaves the work to the current one.
    #[inline]
    fn drain(&self) {
        if self.drain.enter() {
            self.drain_loop(1);
        }
    }

    fn drain_loop(&self, missed: usize) {
        debug_assert!(self.drain.is_held(), "INV-DRAIN-01 violated: draining without the token");
        if self.lock_delivery() == Delivery::Fused {
            self.drain_fused(missed);
        } else {
            self.drain_regular(missed);
        }
    }

    fn drain_regular(&self, mut missed: usize) {
        #[cfg(debug_assertions)]
        debug_assert_not_fused!(self.delivery() == Delivery::Fused);

        // SAFETY: only the drain token holder reaches this point.
        let downstream = unsafe { &mut *self.downstream.get() };

        loop {
            if let Some(m) = &self.metrics {
                m.add_drain_pass();
            }

            let requested = self.credit.get();
            tracing::trace!(missed, requested, "regular drain pass");
            let mut emitted = 0u64;

            while emitted != requested {
                let done = self.done.load(Ordering::Acquire);
                let item = self.queue.poll();
                let empty = item.is_none();

                if self.check_terminated(done, empty, downstream) {
                    return;
                }

                let Some(item) = item else {
                    break;
                };
                if let Some(d) = downstream.as_mut() {
                    d.on_item(item);
                }
                emitted += 1;
            }

            if emitted == requested
                && self.check_terminated(
                    self.done.load(Ordering::Acquire),
                    self.queue.is_empty(),
                    downstream,
                )
            {
                return;
            }

            // INV-CREDIT-01: never more than the snapshot allowed
            #[cfg(debug_assertions)]
            debug_assert_within_credit!(emitted, requested);

            if emitted != 0 {
                if let Some(m) = &self.metrics {
                    m.add_items_delivered(emitted);
                }
                if requested != UNBOUNDED {
                    self.credit.produced(emitted);
                }
            }

            missed = self.drain.leave(missed);
            if missed == 0 {
                break;
            }
        }
    }

    fn drain_fused(&self, mut missed: usize) {
        // SAFETY: only the drain token holder reaches this point.
        let downstream = unsafe { &mut *self.downstream.get() };

        loop {
            if let Some(m) = &self.metrics {
                m.add_drain_pass();
            }
            tracing::trace!(missed, "fused drain pass");

            if self.cancelled.load(Ordering::Acquire) {
                self.release_cancelled(downstream);
                return;
            }

            let done = self.done.load(Ordering::Acquire);

            if let Some(d) = downstream.as_mut() {
                d.on_available();
            }

            // The subscriber may have cancelled from inside the notification
            if self.cancelled.load(Ordering::Acquire) {
                self.release_cancelled(downstream);
                return;
            }

            if done {
                let error = self.error.get().cloned();
                self.emit_terminal(downstream, error);
                return;
            }

            missed = self.drain.leave(missed);
            if missed == 0 {
                break;
            }
        }
    }

    /// Decides whether the stream is over, delivering the terminal signal if
    /// so. Returns `true` when the caller must stop draining.
    fn check_terminated(&self, done: bool, empty: bool, downstream: &mut Downstream<T>) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            self.release_cancelled(downstream);
            return true;
        }
        if !done {
            return false;
        }

        let error = self.error.get();

        // INV-TERM-01: error is only ever visible together with done
        #[cfg(debug_assertions)]
        debug_assert_error_implies_done!(error.is_some(), done);

        if self.delay_error {
            if empty {
                self.emit_terminal(downstream, error.cloned());
                return true;
            }
        } else if let Some(error) = error {
            // Fail fast: buffered items are abandoned
            self.queue.clear();
            self.emit_terminal(downstream, Some(error.clone()));
            return true;
        } else if empty {
            self.emit_terminal(downstream, None);
            return true;
        }
        false
    }

    /// Delivers the single terminal signal and releases the subscriber.
    fn emit_terminal(&self, downstream: &mut Downstream<T>, error: Option<BridgeError>) {
        let Some(mut subscriber) = downstream.take() else {
            return;
        };
        match error {
            Some(error) => {
                tracing::debug!(%error, "delivering terminal error");
                subscriber.on_error(error);
            }
            None => {
                tracing::debug!("delivering completion");
                subscriber.on_complete();
            }
        }
    }

    fn release_cancelled(&self, downstream: &mut Downstream<T>) {
        self.cancel_upstream();
        atomic::fence(Ordering::SeqCst);
        self.queue.clear();
        drop(downstream.take());
    }

    fn cancel_upstream(&self) {
        if let Some(upstream) = self.upstream.get() {
            if !self.upstream_cancelled.swap(true, Ordering::AcqRel) {
                upstream.cancel();
            }
        }
    }

    fn lock_delivery(&self) -> Delivery {
        match self.delivery.compare_exchange(
            DELIVERY_UNDECIDED,
            DELIVERY_REGULAR,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => Delivery::Regular,
            Err(current) => Delivery::from_u8(current),
        }
    }

    #[inline]
    fn delivery(&self) -> Delivery {
        Delivery::from_u8(self.delivery.load(Ordering::Acquire))
    }

    // ---------------------------------------------------------------------
    // DIAGNOSTICS
    // ---------------------------------------------------------------------

    fn report_item(&self, item: T) {
        if let Some(m) = &self.metrics {
            m.add_signal_dropped();
        }
        self.diagnostics.item_dropped(item);
    }

    fn report_error(&self, error: BridgeError) {
        if let Some(m) = &self.metrics {
            m.add_signal_dropped();
        }
        self.diagnostics.error_dropped(error);
    }

    // ---------------------------------------------------------------------
    // INTROSPECTION
    // ---------------------------------------------------------------------

    /// Returns `true` once the subscriber has cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Returns `true` once upstream has activated the bridge.
    pub fn is_started(&self) -> bool {
        self.upstream.get().is_some()
    }

    /// Returns `true` once upstream has completed or failed.
    pub fn is_terminated(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// The terminal error, once upstream has failed.
    pub fn error(&self) -> Option<BridgeError> {
        if self.done.load(Ordering::Acquire) {
            self.error.get().cloned()
        } else {
            None
        }
    }

    /// Outstanding credit granted by the subscriber.
    pub fn requested(&self) -> u64 {
        self.credit.get()
    }

    /// Number of items waiting in the buffer.
    pub fn buffered(&self) -> usize {
        self.queue.len()
    }

    /// Buffer capacity, or `None` for an unbounded buffer.
    pub fn capacity(&self) -> Option<usize> {
        self.queue.capacity()
    }

    /// What the bridge asks of upstream: always unlimited.
    pub fn prefetch(&self) -> u64 {
        UNBOUNDED
    }

    /// Whether buffered items are drained before an error is surfaced.
    pub fn delay_error(&self) -> bool {
        self.delay_error
    }

    /// The negotiated delivery mode ([`FusionMode::None`] until decided).
    pub fn fusion_mode(&self) -> FusionMode {
        self.delivery().granted_mode()
    }

    /// Counter snapshot; all zeros unless metrics are enabled.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics
            .as_ref()
            .map(Metrics::snapshot)
            .unwrap_or_default()
    }
}

/// Runs the overflow handler, capturing an error or a panic as the cause.
fn observe_overflow<T>(handler: &OverflowHandler<T>, item: T) -> Option<HandlerFailure> {
    match panic::catch_unwind(AssertUnwindSafe(|| handler(item))) {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(HandlerFailure::Failed(Arc::from(err))),
        Err(payload) => Some(HandlerFailure::Panicked(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
