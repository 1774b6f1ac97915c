//! Counters for rare structural events: ring closures, unsafe marks,
//! allocations and retirements. All recording is on cold paths; the hot
//! cell protocol never touches these.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug)]
pub(crate) struct Stats {
    enabled: bool,
    rings_closed: AtomicU64,
    unsafe_marks: AtomicU64,
    rings_allocated: AtomicU64,
    rings_retired: AtomicU64,
}

impl Stats {
    pub(crate) fn new(enabled: bool) -> Self {
        Self {
            enabled,
            rings_closed: AtomicU64::new(0),
            unsafe_marks: AtomicU64::new(0),
            rings_allocated: AtomicU64::new(0),
            rings_retired: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn record_close(&self) {
        if self.enabled {
            self.rings_closed.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_unsafe_mark(&self) {
        if self.enabled {
            self.unsafe_marks.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_ring_alloc(&self) {
        if self.enabled {
            self.rings_allocated.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_ring_retire(&self) {
        if self.enabled {
            self.rings_retired.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            rings_closed: self.rings_closed.load(Ordering::Relaxed),
            unsafe_marks: self.unsafe_marks.load(Ordering::Relaxed),
            rings_allocated: self.rings_allocated.load(Ordering::Relaxed),
            rings_retired: self.rings_retired.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the structural counters.
///
/// All zeros unless the queue was built with `enable_stats`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Rings transitioned to the closed state.
    pub rings_closed: u64,
    /// Cells poisoned by a consumer that found a stale occupant.
    pub unsafe_marks: u64,
    /// Rings allocated (the initial ring included; spare-cache hits not).
    pub rings_allocated: u64,
    /// Rings the head pointer swung past.
    pub rings_retired: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_stats_stay_zero() {
        let stats = Stats::new(false);
        stats.record_close();
        stats.record_unsafe_mark();
        stats.record_ring_alloc();
        stats.record_ring_retire();
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[test]
    fn test_enabled_stats_count() {
        let stats = Stats::new(true);
        stats.record_close();
        stats.record_close();
        stats.record_ring_alloc();
        let snap = stats.snapshot();
        assert_eq!(snap.rings_closed, 2);
        assert_eq!(snap.rings_allocated, 1);
        assert_eq!(snap.unsafe_marks, 0);
    }
}
