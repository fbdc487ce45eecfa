use std::sync::atomic::{AtomicU64, Ordering};

/// Optional counters for monitoring a bridge.
///
/// Updated with Relaxed atomics; only collected when
/// [`BridgeConfig::enable_metrics`](crate::BridgeConfig) is set.
#[derive(Debug, Default)]
pub(crate) struct Metrics {
    items_accepted: AtomicU64,
    items_delivered: AtomicU64,
    overflows: AtomicU64,
    signals_dropped: AtomicU64,
    drain_passes: AtomicU64,
}

impl Metrics {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn add_items_accepted(&self, n: u64) {
        self.items_accepted.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_items_delivered(&self, n: u64) {
        self.items_delivered.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_overflow(&self) {
        self.overflows.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_signal_dropped(&self) {
        self.signals_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn add_drain_pass(&self) {
        self.drain_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            items_accepted: self.items_accepted.load(Ordering::Relaxed),
            items_delivered: self.items_delivered.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
            signals_dropped: self.signals_dropped.load(Ordering::Relaxed),
            drain_passes: self.drain_passes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a bridge's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Items accepted into the buffer.
    pub items_accepted: u64,
    /// Items handed to the subscriber by regular delivery.
    pub items_delivered: u64,
    /// Items the buffer rejected.
    pub overflows: u64,
    /// Signals reported to the diagnostic sink instead of being delivered.
    pub signals_dropped: u64,
    /// Passes of the drain loop body.
    pub drain_passes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let m = Metrics::new();
        m.add_items_accepted(3);
        m.add_items_delivered(2);
        m.add_overflow();
        m.add_signal_dropped();
        m.add_drain_pass();
        m.add_drain_pass();

        let s = m.snapshot();
        assert_eq!(
            s,
            MetricsSnapshot {
                items_accepted: 3,
                items_delivered: 2,
                overflows: 1,
                signals_dropped: 1,
                drain_passes: 2,
            }
        );
    }
}
