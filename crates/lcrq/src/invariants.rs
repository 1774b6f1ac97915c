//! Debug assertion macros for the ring invariants.
//!
//! Active only in debug builds, zero overhead in release.

/// Assert that a cell's index still belongs to its physical slot.
///
/// **Invariant**: `position(idx) mod N == slot`. Every index a cell ever
/// carries is congruent to its slot, whatever epoch it is in.
macro_rules! debug_assert_slot_owner {
    ($idx:expr, $slot:expr, $mask:expr) => {
        debug_assert!(
            ($idx & !crate::cell::FLAG_BIT) & $mask == $slot,
            "cell index {:#x} strayed from slot {}",
            $idx,
            $slot
        )
    };
}

/// Assert that a counter only moves forward.
macro_rules! debug_assert_monotonic {
    ($name:literal, $old:expr, $new:expr) => {
        debug_assert!(
            $new >= $old,
            "{} decreased from {} to {}",
            $name,
            $old,
            $new
        )
    };
}

/// Assert that a value headed for a cell is not the empty sentinel.
macro_rules! debug_assert_storable {
    ($value:expr) => {
        debug_assert!(
            $value != crate::cell::EMPTY,
            "the empty sentinel must never be stored as a value"
        )
    };
}

pub(crate) use debug_assert_monotonic;
pub(crate) use debug_assert_slot_owner;
pub(crate) use debug_assert_storable;
