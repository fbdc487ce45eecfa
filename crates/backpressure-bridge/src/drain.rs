use crate::invariants::debug_assert_token_held;
use crossbeam_utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};

// =============================================================================
// SERIALIZATION TOKEN
// =============================================================================
//
// The token is a work-in-progress counter. Every trigger increments it; only
// the caller that moved it from 0 to 1 becomes the drainer. Everyone else
// returns immediately, leaving their increment behind as a "missed" pass.
//
// The drainer runs one pass, then subtracts the number of increments it has
// accounted for. A non-zero remainder means another trigger arrived during
// the pass, so it loops again with the remainder as its new `missed` count.
//
// ## Memory Ordering Protocol
//
// - `enter()` uses AcqRel: the winning increment acquires everything released
//   by the previous drainer's final `leave()`, and a losing increment releases
//   the trigger's own writes (queued item, credit, flags) to the drainer.
// - `leave()` uses AcqRel: the drainer releases its delivery state and
//   acquires any writes published by increments it is now accounting for.
//
// A drainer that delivers a terminal signal never calls `leave()`. The token
// stays non-zero forever, so no later trigger can become a drainer.
//
// =============================================================================

/// Serialization Token for the drain loop.
#[derive(Debug)]
pub(crate) struct DrainToken {
    wip: CachePadded<AtomicUsize>,
}

impl DrainToken {
    /// Creates a token, optionally already held by the constructing thread.
    ///
    /// A held token's owner must eventually drain with `missed = 1`.
    pub(crate) fn new(held: bool) -> Self {
        Self {
            wip: CachePadded::new(AtomicUsize::new(usize::from(held))),
        }
    }

    /// Registers a trigger. Returns `true` if the caller is now the drainer.
    #[inline]
    pub(crate) fn enter(&self) -> bool {
        self.wip.fetch_add(1, Ordering::AcqRel) == 0
    }

    /// Accounts for `missed` triggers. Returns the triggers that arrived
    /// meanwhile; zero means the token has been released.
    #[inline]
    pub(crate) fn leave(&self, missed: usize) -> usize {
        let prev = self.wip.fetch_sub(missed, Ordering::AcqRel);
        debug_assert_token_held!(prev, missed);
        prev - missed
    }

    /// Returns `true` if some caller currently holds the token.
    #[inline]
    pub(crate) fn is_held(&self) -> bool {
        self.wip.load(Ordering::Acquire) != 0
    }
}
