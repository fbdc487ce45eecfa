//! Debug assertion macros for bridge invariants.
//!
//! These macros provide runtime checks for the invariants of the drain
//! protocol. They are only active in debug builds (`#[cfg(debug_assertions)]`),
//! so there is zero overhead in release builds.

// =============================================================================
// INV-CREDIT-01: Credit Conservation
// =============================================================================

/// Assert that a drain pass did not deliver more items than it had credit for.
///
/// **Invariant**: `emitted ≤ requested` for every pass of the regular loop
///
/// Used in: `BufferedBridge::drain_regular()` before settling the ledger
macro_rules! debug_assert_within_credit {
    ($emitted:expr, $requested:expr) => {
        debug_assert!(
            $emitted <= $requested,
            "INV-CREDIT-01 violated: emitted {} items with only {} credit",
            $emitted,
            $requested
        )
    };
}

/// Assert that settling delivered items never drives the ledger negative.
///
/// **Invariant**: `credit_before ≥ produced`
///
/// Used in: `Credit::produced()`
macro_rules! debug_assert_credit_covers {
    ($current:expr, $produced:expr) => {
        debug_assert!(
            $current >= $produced,
            "INV-CREDIT-01 violated: settling {} items against credit {}",
            $produced,
            $current
        )
    };
}

// =============================================================================
// INV-TERM-01: Error Implies Done
// =============================================================================

/// Assert that a recorded error is only ever observed together with `done`.
///
/// **Invariant**: `error.is_some() → done`
///
/// Used in: `BufferedBridge::check_terminated()`
macro_rules! debug_assert_error_implies_done {
    ($has_error:expr, $done:expr) => {
        debug_assert!(
            !$has_error || $done,
            "INV-TERM-01 violated: error recorded but done not published"
        )
    };
}

/// Assert that the terminal gate winner was the only writer of the error slot.
///
/// **Invariant**: the `terminating` gate admits exactly one `on_error`, so the
/// error slot is written at most once
///
/// Used in: `BufferedBridge::on_error()`
macro_rules! debug_assert_single_error {
    ($stored:expr) => {
        debug_assert!(
            $stored,
            "INV-TERM-01 violated: error slot written twice past the terminal gate"
        )
    };
}

// =============================================================================
// INV-DRAIN-01: Token Ownership
// =============================================================================

/// Assert that the drain token is held by the caller.
///
/// **Invariant**: the loop body only runs while `drain_token ≥ 1`
///
/// Used in: `DrainToken::leave()`
macro_rules! debug_assert_token_held {
    ($current:expr, $missed:expr) => {
        debug_assert!(
            $current >= $missed,
            "INV-DRAIN-01 violated: leaving with {} missed but token is {}",
            $missed,
            $current
        )
    };
}

// =============================================================================
// INV-FUSE-01: Fused Mode Never Pops
// =============================================================================

/// Assert that the regular loop is not running on a fused bridge.
///
/// **Invariant**: `fusion == Fused → drain_regular() never polls the buffer`
///
/// Used in: `BufferedBridge::drain_regular()`
macro_rules! debug_assert_not_fused {
    ($fused:expr) => {
        debug_assert!(
            !$fused,
            "INV-FUSE-01 violated: regular delivery polled a fused buffer"
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_credit_covers;
pub(crate) use debug_assert_error_implies_done;
pub(crate) use debug_assert_not_fused;
pub(crate) use debug_assert_single_error;
pub(crate) use debug_assert_token_held;
pub(crate) use debug_assert_within_credit;
