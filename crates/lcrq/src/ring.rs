use crate::cell::{self, Cell, EMPTY};
use crate::invariants::{debug_assert_monotonic, debug_assert_slot_owner, debug_assert_storable};
use crate::stats::Stats;
use crossbeam_utils::CachePadded;
use std::hint;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

// =============================================================================
// TICKET PROTOCOL & MEMORY ORDERING
// =============================================================================
//
// A ring is a fixed array of N = 2^k cells plus two 64-bit ticket counters.
// Producers and consumers never coordinate directly: each claims a monotone
// ticket with fetch-and-add on `tail` or `head` and then settles the cell at
// `ticket & (N - 1)` with a single 128-bit compare-exchange on its
// `(val, idx)` pair. The same physical cell serves logical positions
// p, p + N, p + 2N, … over time; `idx` records which epoch is current, and
// its top bit marks the cell unsafe for producers that fell behind.
//
// ## Ordering protocol
//
// - Ticket FAA on `head`/`tail`: AcqRel. Tickets form the per-counter total
//   order the linearization argument starts from.
// - Cell loads: Acquire (may observe another thread's published value).
//   Cell CAS: AcqRel on success (publishes the value to the claiming
//   consumer), Acquire on failure (the retry must see the winner's write).
// - Closure, `fix_state`, the saturation check in the enqueue slow path and
//   the empty-report read of `tail`: SeqCst. These are the cross-variable
//   decisions (head vs. tail) the empty-report soundness argument leans on,
//   and all of them sit off the hot path.
//
// ## Closed rings
//
// Bit 63 of `tail` is the terminal closed marker. Fetch-and-add keeps
// incrementing the low bits after closure; producers detect the marker in
// the ticket they got back and move on to the successor ring. The low bits
// would need 2^63 failed attempts to carry into the marker.
//
// =============================================================================

/// Cooperative close attempts (CAS) before falling back to a hard bit-set.
/// The CAS variant only succeeds while no other producer advances `tail`,
/// which livelocks under heavy contention; the bit-set always lands.
const COOPERATIVE_CLOSE_TRIES: u32 = 10;

/// Spin budget for a dequeuer waiting on the cell its ticket selected.
const WAIT_SPINS: u32 = 200_000;

/// The waiting dequeuer re-reads `tail` every 1024 spins.
const TAIL_POLL_MASK: u32 = (1 << 10) - 1;

/// Outcome of one enqueue attempt (one ticket) on a ring.
pub(crate) enum PushAttempt {
    /// Value installed.
    Done,
    /// The ring is closed (observed or just closed by us); link a successor.
    Closed,
    /// Transient failure; take a fresh ticket through the outer loop.
    Retry,
}

/// Outcome of one dequeue ticket on a ring.
pub(crate) enum PopAttempt {
    Value(u64),
    /// No value at or before our ticket; the ring may be exhausted.
    /// `fix_state` has already run. Check `next` before reporting empty.
    Drained,
    /// The ring still holds values ahead of us; take a fresh ticket.
    Retry,
}

/// One bounded lock-free ring of the linked queue.
pub(crate) struct Ring {
    head: CachePadded<AtomicU64>,
    tail: CachePadded<AtomicU64>,
    next: CachePadded<AtomicPtr<Ring>>,
    /// Link for the owning queue's deferred-free stack; written once at
    /// retirement, after the ring left the live list.
    free_next: AtomicPtr<Ring>,
    mask: u64,
    cells: Box<[Cell]>,
}

impl Ring {
    /// A fresh ring: every cell free in its first epoch, counters at zero.
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity.is_power_of_two(), "ring capacity must be 2^k");
        let cells: Box<[Cell]> = (0..capacity).map(|i| Cell::new(i as u64)).collect();
        Self {
            head: CachePadded::new(AtomicU64::new(0)),
            tail: CachePadded::new(AtomicU64::new(0)),
            next: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            free_next: AtomicPtr::new(ptr::null_mut()),
            mask: (capacity - 1) as u64,
            cells,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    fn size(&self) -> u64 {
        self.mask + 1
    }

    #[inline]
    pub(crate) fn next_ptr(&self, order: Ordering) -> *mut Ring {
        self.next.load(order)
    }

    /// Links `new` as the successor iff none was linked yet.
    #[inline]
    pub(crate) fn link_next(&self, new: *mut Ring) -> bool {
        self.next
            .compare_exchange(ptr::null_mut(), new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn set_free_next(&self, p: *mut Ring) {
        self.free_next.store(p, Ordering::Relaxed);
    }

    pub(crate) fn free_next(&self) -> *mut Ring {
        self.free_next.load(Ordering::Relaxed)
    }

    /// Solo-initializes position 0 of a ring no other thread can reach yet,
    /// so the link fast path publishes the ring with its first value already
    /// in place. The publishing `next` CAS releases these stores.
    pub(crate) fn install_first(&mut self, value: u64) {
        debug_assert_storable!(value);
        self.cells[0].set(value, 0);
        self.head.store(0, Ordering::Relaxed);
        self.tail.store(1, Ordering::Relaxed);
        self.next.store(ptr::null_mut(), Ordering::Relaxed);
    }

    /// One enqueue attempt: claim a ticket, try to settle its cell.
    ///
    /// `close_tries` persists across the caller's retries; it drives the
    /// cooperative-then-forced close escalation.
    pub(crate) fn try_enqueue(&self, value: u64, close_tries: &mut u32, stats: &Stats) -> PushAttempt {
        debug_assert_storable!(value);

        let t = self.tail.fetch_add(1, Ordering::AcqRel);
        if cell::is_closed(t) {
            return PushAttempt::Closed;
        }

        let slot = t & self.mask;
        let target = &self.cells[slot as usize];
        let (val, idx) = target.load(Ordering::Acquire);
        debug_assert_slot_owner!(idx, slot, self.mask);

        // A free cell takes our value if its epoch has not moved past our
        // ticket. A consumer-poisoned cell is still fair game once the
        // consumer frontier has fallen behind the ticket: the poisoning
        // consumer can no longer claim this position.
        if val == EMPTY
            && cell::position(idx) <= t
            && (cell::unsafe_flag(idx) == 0 || self.head.load(Ordering::SeqCst) < t)
            && target.cas((EMPTY, idx), (value, t))
        {
            return PushAttempt::Done;
        }

        let h = self.head.load(Ordering::SeqCst);
        if t.wrapping_sub(h) >= self.size() {
            *close_tries += 1;
            if self.close(t, *close_tries) {
                stats.record_close();
                return PushAttempt::Closed;
            }
        }
        PushAttempt::Retry
    }

    /// Claim one dequeue ticket and settle its cell.
    pub(crate) fn try_dequeue(&self, stats: &Stats) -> PopAttempt {
        let h = self.head.fetch_add(1, Ordering::AcqRel);
        let n = self.size();
        let target = &self.cells[(h & self.mask) as usize];

        let mut tt = 0u64;
        let mut spins = 0u32;
        loop {
            let (val, raw) = target.load(Ordering::Acquire);
            let mark = cell::unsafe_flag(raw);
            let idx = cell::position(raw);
            debug_assert_slot_owner!(raw, h & self.mask, self.mask);

            if idx > h {
                // The cell already serves a later epoch; our position is gone.
                break;
            }

            if val != EMPTY {
                if idx == h {
                    // Our value. Empty the cell and advance it one epoch.
                    if target.cas((val, raw), (EMPTY, mark | (h + n))) {
                        return PopAttempt::Value(val);
                    }
                } else if target.cas((val, raw), (val, cell::mark_unsafe(idx))) {
                    // Stale occupant from an earlier epoch: poison the cell so
                    // lagging producers keep out, but preserve the value for
                    // the consumer that owns it.
                    stats.record_unsafe_mark();
                    break;
                }
            } else {
                if spins & TAIL_POLL_MASK == 0 {
                    tt = self.tail.load(Ordering::SeqCst);
                }
                let closed = cell::is_closed(tt);
                let t = cell::tail_index(tt);

                if mark != 0 {
                    // Already poisoned; just advance the epoch past us.
                    if target.cas((val, raw), (val, mark | (h + n))) {
                        break;
                    }
                } else if t.wrapping_sub(1) <= h || spins > WAIT_SPINS || closed {
                    // No producer can still be headed for this position (or we
                    // are done waiting): advance the epoch without poisoning.
                    // `t - 1 <= h` is deliberately wrapping, matching the
                    // ticket arithmetic everywhere else; see `dequeue` docs.
                    if target.cas((val, idx), (val, h + n)) {
                        break;
                    }
                } else {
                    spins += 1;
                    hint::spin_loop();
                }
            }
        }

        if cell::tail_index(self.tail.load(Ordering::SeqCst)).wrapping_sub(1) <= h {
            self.fix_state();
            PopAttempt::Drained
        } else {
            PopAttempt::Retry
        }
    }

    /// Transition `tail` bit 63 from 0 to 1. Reports success only to the
    /// thread that flipped the bit, so exactly one closer proceeds to link.
    fn close(&self, t: u64, tries: u32) -> bool {
        if tries < COOPERATIVE_CLOSE_TRIES {
            self.tail
                .compare_exchange(
                    t + 1,
                    (t + 1) | cell::FLAG_BIT,
                    Ordering::SeqCst,
                    Ordering::Relaxed,
                )
                .is_ok()
        } else {
            self.tail.fetch_or(cell::FLAG_BIT, Ordering::SeqCst) & cell::FLAG_BIT == 0
        }
    }

    /// Restores `head <= tail` after enqueuers raced tickets past closure.
    /// Dequeuers rely on the restored bound to report empty soundly.
    pub(crate) fn fix_state(&self) {
        loop {
            let t = self.tail.load(Ordering::SeqCst);
            let h = self.head.load(Ordering::SeqCst);
            if self.tail.load(Ordering::SeqCst) != t {
                continue;
            }
            if h > t {
                debug_assert_monotonic!("tail", t, h);
                if self
                    .tail
                    .compare_exchange(t, h, Ordering::SeqCst, Ordering::Relaxed)
                    .is_ok()
                {
                    break;
                }
                continue;
            }
            break;
        }
    }
}
