use crate::invariants::debug_assert_credit_covers;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// The "no limit" credit sentinel.
///
/// Once the ledger reaches this value it stays there: grants saturate into it
/// and deliveries are no longer subtracted from it.
pub const UNBOUNDED: u64 = u64::MAX;

/// Credit Ledger - outstanding consumer-granted capacity.
///
/// The consumer adds to it from any thread; only the active drainer
/// subtracts from it, and only by the number of items it actually delivered.
#[derive(Debug, Default)]
pub(crate) struct Credit {
    requested: CachePadded<AtomicU64>,
}

impl Credit {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Current outstanding credit.
    #[inline]
    pub(crate) fn get(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    /// Adds `n` with saturation at [`UNBOUNDED`]. Returns the previous value.
    pub(crate) fn add(&self, n: u64) -> u64 {
        let mut current = self.requested.load(Ordering::Relaxed);
        loop {
            if current == UNBOUNDED {
                return UNBOUNDED;
            }
            let next = current.saturating_add(n);
            match self.requested.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(prev) => return prev,
                Err(actual) => current = actual,
            }
        }
    }

    /// Settles `n` delivered items against the ledger. Returns the new value.
    ///
    /// A ledger that has saturated to [`UNBOUNDED`] is left untouched, even if
    /// it saturated after the drainer took its snapshot.
    pub(crate) fn produced(&self, n: u64) -> u64 {
        let mut current = self.requested.load(Ordering::Relaxed);
        loop {
            if current == UNBOUNDED || n == 0 {
                return current;
            }
            debug_assert_credit_covers!(current, n);
            let next = current.saturating_sub(n);
            match self.requested.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_add_and_produce() {
        let credit = Credit::new();
        assert_eq!(credit.get(), 0);

        assert_eq!(credit.add(5), 0);
        assert_eq!(credit.add(3), 5);
        assert_eq!(credit.produced(6), 2);
        assert_eq!(credit.get(), 2);
    }

    #[test]
    fn test_add_saturates_at_unbounded() {
        let credit = Credit::new();
        credit.add(UNBOUNDED - 1);
        credit.add(10);
        assert_eq!(credit.get(), UNBOUNDED);

        // Saturated credit is sticky
        assert_eq!(credit.produced(1_000), UNBOUNDED);
        assert_eq!(credit.add(1), UNBOUNDED);
    }

    #[test]
    fn test_produced_zero_is_noop() {
        let credit = Credit::new();
        credit.add(4);
        assert_eq!(credit.produced(0), 4);
    }

    #[test]
    fn test_concurrent_grants_sum() {
        let credit = Arc::new(Credit::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let credit = Arc::clone(&credit);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        credit.add(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(credit.get(), 4_000);
    }
}
