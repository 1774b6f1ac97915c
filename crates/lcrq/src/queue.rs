use crate::cell::EMPTY;
use crate::config::Config;
use crate::ring::{PopAttempt, PushAttempt, Ring};
use crate::stats::{Stats, StatsSnapshot};
use crossbeam_utils::CachePadded;
use log::{debug, trace};
use std::cell::RefCell;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// The all-ones value doubles as the in-cell empty sentinel and is
/// therefore rejected by [`Queue::enqueue`].
pub const RESERVED_VALUE: u64 = EMPTY;

/// Error type for enqueue operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EnqueueError {
    /// The value collides with the in-cell empty sentinel.
    #[error("value {0:#x} is reserved as the empty sentinel")]
    ReservedValue(u64),
}

thread_local! {
    /// Spare ring kept by an enqueuer that lost a link race, so the next
    /// closure on this thread links without allocating. Revalidated against
    /// the queue's capacity before reuse (queues may differ in `ring_pow`).
    static SPARE_RING: RefCell<Option<Box<Ring>>> = const { RefCell::new(None) };
}

/// Unbounded linearizable MPMC FIFO queue over a linked list of lock-free
/// rings.
///
/// Enqueues land in the tail ring; dequeues drain the head ring. A ring
/// that fills (or suffers pathological contention) is closed, a successor
/// is linked behind it, and the global pointers are helped forward by
/// whichever thread gets there first. Handles are cheap clones of one
/// shared queue.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<QueueCore>,
}

impl Queue {
    /// Creates the queue with its first ring in place.
    pub fn new(config: Config) -> Self {
        let stats = Stats::new(config.enable_stats);
        stats.record_ring_alloc();
        let first = Box::into_raw(Box::new(Ring::new(config.capacity())));
        Self {
            inner: Arc::new(QueueCore {
                head_ring: CachePadded::new(AtomicPtr::new(first)),
                tail_ring: CachePadded::new(AtomicPtr::new(first)),
                retired: AtomicPtr::new(ptr::null_mut()),
                config,
                stats,
            }),
        }
    }

    /// Inserts `value` at the back of the queue. Lock-free; never blocks.
    ///
    /// The only rejected input is [`RESERVED_VALUE`], which the cell
    /// protocol uses as its empty sentinel.
    #[inline]
    pub fn enqueue(&self, value: u64) -> Result<(), EnqueueError> {
        self.inner.enqueue(value)
    }

    /// Removes and returns the oldest value, or `None` if the queue is
    /// observably empty.
    ///
    /// The empty report is linearizable: `None` means the queue really was
    /// empty at some instant during the call. One deliberate asymmetry
    /// carried over from the ticket arithmetic: a queue that has *never*
    /// seen an enqueue keeps its first ring's enqueue counter at zero, and
    /// a dequeuer on such a ring waits for a producer (spinning, bounded
    /// per ticket) instead of reporting empty. Any queue that has carried
    /// at least one value reports empty promptly forever after.
    #[inline]
    pub fn dequeue(&self) -> Option<u64> {
        self.inner.dequeue()
    }

    /// The configuration this queue was built with.
    pub fn config(&self) -> Config {
        self.inner.config
    }

    /// Snapshot of the structural counters (all zero unless the queue was
    /// built with `enable_stats`).
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}

struct QueueCore {
    head_ring: CachePadded<AtomicPtr<Ring>>,
    tail_ring: CachePadded<AtomicPtr<Ring>>,
    /// Deferred-free stack of retired rings, drained on drop. Late readers
    /// may still traverse a retired ring's `next`, so rings are parked here
    /// instead of freed at the retirement point.
    retired: AtomicPtr<Ring>,
    config: Config,
    stats: Stats,
}

// SAFETY: all shared state behind the raw ring pointers is owned by this
// core and mutated exclusively through atomics; rings are freed only in
// `drop`, when no other handle or in-flight operation can exist.
unsafe impl Send for QueueCore {}
unsafe impl Sync for QueueCore {}

impl QueueCore {
    fn enqueue(&self, value: u64) -> Result<(), EnqueueError> {
        if value == RESERVED_VALUE {
            return Err(EnqueueError::ReservedValue(value));
        }

        let mut close_tries = 0u32;
        loop {
            let rq_ptr = self.tail_ring.load(Ordering::Acquire);
            #[cfg(feature = "hazard")]
            {
                crate::hazard::publish(rq_ptr);
                if self.tail_ring.load(Ordering::SeqCst) != rq_ptr {
                    continue;
                }
            }
            // SAFETY: rings stay allocated until `drop`; `rq_ptr` came from
            // the live list (and, with the hazard feature, was re-validated
            // after publication).
            let rq = unsafe { &*rq_ptr };

            // Help a lagging tail pointer forward before trying a ticket.
            let next = rq.next_ptr(Ordering::Acquire);
            if !next.is_null() {
                let _ = self.tail_ring.compare_exchange(
                    rq_ptr,
                    next,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                );
                continue;
            }

            match rq.try_enqueue(value, &mut close_tries, &self.stats) {
                PushAttempt::Done => {
                    #[cfg(feature = "hazard")]
                    crate::hazard::clear();
                    return Ok(());
                }
                PushAttempt::Closed => {
                    if self.link_fresh_ring(rq, rq_ptr, value) {
                        #[cfg(feature = "hazard")]
                        crate::hazard::clear();
                        return Ok(());
                    }
                }
                PushAttempt::Retry => {}
            }
        }
    }

    fn dequeue(&self) -> Option<u64> {
        loop {
            let rq_ptr = self.head_ring.load(Ordering::Acquire);
            #[cfg(feature = "hazard")]
            {
                crate::hazard::publish(rq_ptr);
                if self.head_ring.load(Ordering::SeqCst) != rq_ptr {
                    continue;
                }
            }
            // SAFETY: as in `enqueue`.
            let rq = unsafe { &*rq_ptr };

            match rq.try_dequeue(&self.stats) {
                PopAttempt::Value(v) => {
                    #[cfg(feature = "hazard")]
                    crate::hazard::clear();
                    return Some(v);
                }
                PopAttempt::Retry => {}
                PopAttempt::Drained => {
                    let next = rq.next_ptr(Ordering::Acquire);
                    if next.is_null() {
                        #[cfg(feature = "hazard")]
                        crate::hazard::clear();
                        return None;
                    }
                    // The exhausted ring has a successor: advance the head
                    // pointer. Exactly one thread wins the swing and retires
                    // the old ring.
                    if self
                        .head_ring
                        .compare_exchange(rq_ptr, next, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        self.retire(rq_ptr);
                    }
                }
            }
        }
    }

    /// The CLOSED path: publish a ring carrying `value` at position 0
    /// behind `rq`. Returns `true` if our ring (and value) went in.
    fn link_fresh_ring(&self, rq: &Ring, rq_ptr: *mut Ring, value: u64) -> bool {
        let mut fresh = self.take_spare();
        fresh.install_first(value);
        let fresh_ptr = Box::into_raw(fresh);

        if rq.link_next(fresh_ptr) {
            let _ = self.tail_ring.compare_exchange(
                rq_ptr,
                fresh_ptr,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
            debug!(
                "linked a fresh ring behind a closed one (capacity {})",
                self.config.capacity()
            );
            true
        } else {
            // Another enqueuer linked first. Keep the ring for this
            // thread's next closure.
            // SAFETY: the link CAS failed, so `fresh_ptr` never became
            // visible to any other thread; we still own it exclusively.
            let fresh = unsafe { Box::from_raw(fresh_ptr) };
            SPARE_RING.with(|slot| *slot.borrow_mut() = Some(fresh));
            false
        }
    }

    fn take_spare(&self) -> Box<Ring> {
        let spare = SPARE_RING.with(|slot| slot.borrow_mut().take());
        match spare {
            Some(ring) if ring.capacity() == self.config.capacity() => ring,
            _ => {
                self.stats.record_ring_alloc();
                Box::new(Ring::new(self.config.capacity()))
            }
        }
    }

    /// Retirement point: `head_ring` has swung past `ring`. Late readers
    /// may still hold snapshots of it, so it goes on the deferred-free
    /// stack; an external hazard/epoch policy would hook in here instead.
    fn retire(&self, ring: *mut Ring) {
        self.stats.record_ring_retire();
        trace!("retired a drained ring");
        loop {
            let top = self.retired.load(Ordering::Acquire);
            // SAFETY: `ring` left the live list but is not freed until
            // `drop`; writing its free-link cannot race a reclamation.
            unsafe { (*ring).set_free_next(top) };
            if self
                .retired
                .compare_exchange(top, ring, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }
}

impl Drop for QueueCore {
    fn drop(&mut self) {
        // Exclusive access: the last handle is gone and no operation is in
        // flight. Reclaim the retired stack, then the live chain.
        let mut p = *self.retired.get_mut();
        while !p.is_null() {
            // SAFETY: every pointer on the retired stack came from
            // `Box::into_raw` and was pushed exactly once.
            let ring = unsafe { Box::from_raw(p) };
            p = ring.free_next();
        }

        let mut p = *self.head_ring.get_mut();
        while !p.is_null() {
            // SAFETY: the live chain from `head_ring` through `next` holds
            // the remaining rings, each allocated by `Box::into_raw` and
            // reachable exactly once.
            let ring = unsafe { Box::from_raw(p) };
            p = ring.next_ptr(Ordering::Relaxed);
        }
    }
}
