//! Item Buffer contract and the unbounded implementation.
//!
//! The bounded implementation lives in [`crate::ArrayRing`].

use crossbeam_queue::SegQueue;

/// FIFO buffer holding items awaiting delivery.
///
/// All methods take `&self` and must be sound under concurrent callers: the
/// producer offers while the drainer (or, in fused mode, the subscriber)
/// polls, and a cancelling drainer may clear at any time.
pub trait ItemQueue<T>: Send + Sync {
    /// Inserts an item. A bounded buffer that is full hands the item back.
    fn offer(&self, item: T) -> Result<(), T>;

    /// Removes the oldest item, if any.
    fn poll(&self) -> Option<T>;

    /// Number of buffered items. May be stale under concurrent access.
    fn len(&self) -> usize;

    /// Returns `true` if no items are buffered.
    fn is_empty(&self) -> bool;

    /// Drops every buffered item.
    fn clear(&self) {
        while self.poll().is_some() {}
    }

    /// Maximum number of items held, or `None` if the buffer grows on demand.
    fn capacity(&self) -> Option<usize>;
}

/// Unbounded growable queue. Never rejects an offer.
pub struct LinkedQueue<T> {
    inner: SegQueue<T>,
    link_size: usize,
}

impl<T> LinkedQueue<T> {
    /// Creates an empty queue.
    ///
    /// `link_size` is the growth granularity requested by the configuration;
    /// it is kept for introspection only, since the segment size of the
    /// backing queue is fixed.
    pub fn new(link_size: usize) -> Self {
        Self {
            inner: SegQueue::new(),
            link_size,
        }
    }

    /// The link size this queue was configured with.
    pub fn link_size(&self) -> usize {
        self.link_size
    }
}

impl<T: Send> ItemQueue<T> for LinkedQueue<T> {
    #[inline]
    fn offer(&self, item: T) -> Result<(), T> {
        self.inner.push(item);
        Ok(())
    }

    #[inline]
    fn poll(&self) -> Option<T> {
        self.inner.pop()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    fn capacity(&self) -> Option<usize> {
        None
    }
}
