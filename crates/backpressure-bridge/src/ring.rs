use crate::{ConfigError, ItemQueue};
use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU64, Ordering};

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// The bridge uses this ring as its bounded Item Buffer. Regular delivery has
// exactly one consumer (the drainer), but fused delivery lets the downstream
// subscriber pull from its own thread while a cancelling drainer may clear
// the ring. The ring therefore tolerates any number of concurrent callers on
// either side.
//
// ## Sequence Numbers (ABA Prevention)
//
// `head` and `tail` are unbounded u64 positions. The slot for a position is
// `pos % capacity`; the capacity is exact, not rounded to a power of two.
//
// Each slot carries a `stamp`, twice the position plus a "written" bit:
// - `stamp == 2·pos`              → the slot is free for the producer at `pos`
// - `stamp == 2·pos + 1`          → the slot holds the item written at `pos`
// - `stamp == 2·(pos + capacity)` → the item at `pos` was consumed; the slot
//                                   is free for the producer one lap later
//
// Doubling keeps "written at pos" and "free for pos + 1" apart even for a
// single-slot ring.
//
// ## Memory Ordering Protocol
//
// **Offer (write path):**
// 1. Load `tail` with Relaxed
// 2. Load the slot stamp with Acquire (synchronizes with the consumer that freed it)
// 3. Claim the position by CAS on `tail`
// 4. Write the item into the slot
// 5. Store `stamp = 2·pos + 1` with Release (publishes the item)
//
// **Poll (read path):**
// 1. Load `head` with Relaxed
// 2. Load the slot stamp with Acquire (synchronizes with the producer's Release)
// 3. Claim the position by CAS on `head`
// 4. Move the item out of the slot
// 5. Store `stamp = 2·(pos + capacity)` with Release (publishes the free slot)
//
// A slot's value is only touched by the caller that won the CAS for its
// position, and only between the Acquire of its stamp and the Release that
// hands it to the other side.
//
// =============================================================================

#[inline]
const fn free_stamp(pos: u64) -> u64 {
    pos.wrapping_mul(2)
}

#[inline]
const fn written_stamp(pos: u64) -> u64 {
    pos.wrapping_mul(2).wrapping_add(1)
}

/// One buffer slot plus the stamp that says who may touch it.
struct Slot<T> {
    stamp: AtomicU64,
    value: UnsafeCell<MaybeUninit<T>>,
}

/// Bounded lock-free ring buffer.
///
/// Rejects an offer once `capacity` items are held, handing the item back.
pub struct ArrayRing<T> {
    /// Next position to write (claimed by producers)
    tail: CachePadded<AtomicU64>,
    /// Next position to read (claimed by consumers)
    head: CachePadded<AtomicU64>,
    /// Fixed-size slot storage; never grows or shrinks.
    slots: Box<[Slot<T>]>,
}

// Safety: values are moved in and out under the stamp protocol above, so the
// ring may be shared as long as the items themselves can cross threads.
unsafe impl<T: Send> Send for ArrayRing<T> {}
unsafe impl<T: Send> Sync for ArrayRing<T> {}

impl<T> ArrayRing<T> {
    /// Creates a ring holding at most `capacity` items.
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }

        let slots = (0..capacity as u64)
            .map(|pos| Slot {
                stamp: AtomicU64::new(free_stamp(pos)),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            tail: CachePadded::new(AtomicU64::new(0)),
            head: CachePadded::new(AtomicU64::new(0)),
            slots,
        })
    }

    #[inline]
    fn slot(&self, pos: u64) -> &Slot<T> {
        &self.slots[(pos % self.slots.len() as u64) as usize]
    }

    #[inline]
    fn lap(&self) -> u64 {
        self.slots.len() as u64
    }
}

impl<T: Send> ItemQueue<T> for ArrayRing<T> {
    fn offer(&self, item: T) -> Result<(), T> {
        let mut pos = self.tail.load(Ordering::Relaxed);

        loop {
            let slot = self.slot(pos);
            let stamp = slot.stamp.load(Ordering::Acquire);
            let diff = stamp.wrapping_sub(free_stamp(pos)) as i64;

            if diff == 0 {
                match self.tail.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: winning the CAS for `pos` grants exclusive
                        // write access to this slot until the stamp is bumped.
                        // The Acquire on the stamp synchronized with the
                        // consumer that moved the previous value out.
                        unsafe {
                            (*slot.value.get()).write(item);
                        }
                        slot.stamp.store(written_stamp(pos), Ordering::Release);
                        return Ok(());
                    }
                    Err(actual) => pos = actual,
                }
            } else if diff < 0 {
                // Slot still holds the item from the previous lap: full
                return Err(item);
            } else {
                pos = self.tail.load(Ordering::Relaxed);
            }
        }
    }

    fn poll(&self) -> Option<T> {
        let mut pos = self.head.load(Ordering::Relaxed);

        loop {
            let slot = self.slot(pos);
            let stamp = slot.stamp.load(Ordering::Acquire);
            let diff = stamp.wrapping_sub(written_stamp(pos)) as i64;

            if diff == 0 {
                match self.head.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        // SAFETY: the stamp says the producer at `pos` fully
                        // wrote this slot (published via Release), and winning
                        // the CAS makes us the only reader of it.
                        let item = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.stamp.store(
                            free_stamp(pos.wrapping_add(self.lap())),
                            Ordering::Release,
                        );
                        return Some(item);
                    }
                    Err(actual) => pos = actual,
                }
            } else if diff < 0 {
                // Slot not yet written for this lap: empty
                return None;
            } else {
                pos = self.head.load(Ordering::Relaxed);
            }
        }
    }

    fn len(&self) -> usize {
        // head first: tail is never behind a head observed earlier
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (tail.wrapping_sub(head) as usize).min(self.slots.len())
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn capacity(&self) -> Option<usize> {
        Some(self.slots.len())
    }
}

impl<T> Drop for ArrayRing<T> {
    fn drop(&mut self) {
        // With `&mut self` every claimed position has completed, so exactly
        // the positions in [head, tail) hold initialized items.
        let head = *self.head.get_mut();
        let tail = *self.tail.get_mut();
        let lap = self.slots.len() as u64;

        let mut pos = head;
        while pos != tail {
            let slot = &mut self.slots[(pos % lap) as usize];
            // SAFETY: positions in [head, tail) were written and not consumed.
            unsafe {
                slot.value.get_mut().assume_init_drop();
            }
            pos = pos.wrapping_add(1);
        }
    }
}
