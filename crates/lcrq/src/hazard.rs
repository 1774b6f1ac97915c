//! Hazard publication hooks (`hazard` feature).
//!
//! The queue publishes the ring it is about to operate on *before* using
//! it and re-validates the global pointer afterwards; an external
//! reclamation policy can then [`scan`](is_protected) the registry and
//! defer freeing any ring a thread still references. Only the hook points
//! live here; the policy itself is the caller's.
//!
//! Slots are registered once per thread, leaked into a global list, and
//! recycled when the owning thread exits. A process therefore holds at
//! most as many slots as its peak live thread count.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

struct Slot {
    protected: AtomicPtr<()>,
    in_use: AtomicBool,
    next: AtomicPtr<Slot>,
}

static SLOTS: AtomicPtr<Slot> = AtomicPtr::new(ptr::null_mut());

fn acquire_slot() -> &'static Slot {
    // Recycle a slot from a departed thread if one is free.
    let mut p = SLOTS.load(Ordering::Acquire);
    while !p.is_null() {
        // SAFETY: slots are leaked; every pointer in the list stays valid
        // for the process lifetime.
        let slot = unsafe { &*p };
        if slot
            .in_use
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            return slot;
        }
        p = slot.next.load(Ordering::Relaxed);
    }

    // None free: push a fresh one.
    let slot: &'static Slot = Box::leak(Box::new(Slot {
        protected: AtomicPtr::new(ptr::null_mut()),
        in_use: AtomicBool::new(true),
        next: AtomicPtr::new(ptr::null_mut()),
    }));
    loop {
        let head = SLOTS.load(Ordering::Acquire);
        slot.next.store(head, Ordering::Relaxed);
        if SLOTS
            .compare_exchange(head, slot as *const Slot as *mut Slot, Ordering::Release, Ordering::Relaxed)
            .is_ok()
        {
            return slot;
        }
    }
}

struct SlotHandle(&'static Slot);

impl Drop for SlotHandle {
    fn drop(&mut self) {
        self.0.protected.store(ptr::null_mut(), Ordering::SeqCst);
        self.0.in_use.store(false, Ordering::Release);
    }
}

thread_local! {
    static MY_SLOT: SlotHandle = SlotHandle(acquire_slot());
}

/// Publishes the ring this thread is about to operate on. The caller must
/// re-read the global ring pointer afterwards and retry if it moved.
pub(crate) fn publish<T>(ring: *mut T) {
    MY_SLOT.with(|handle| handle.0.protected.store(ring.cast(), Ordering::SeqCst));
}

/// Clears this thread's publication once the operation completes.
pub(crate) fn clear() {
    MY_SLOT.with(|handle| handle.0.protected.store(ptr::null_mut(), Ordering::SeqCst));
}

/// True if any live thread currently publishes `ring`. A reclamation
/// policy calls this on retired rings before freeing them.
pub fn is_protected<T>(ring: *mut T) -> bool {
    let needle = ring.cast::<()>();
    let mut p = SLOTS.load(Ordering::Acquire);
    while !p.is_null() {
        // SAFETY: slots are leaked; see `acquire_slot`.
        let slot = unsafe { &*p };
        if slot.in_use.load(Ordering::Acquire) && slot.protected.load(Ordering::SeqCst) == needle {
            return true;
        }
        p = slot.next.load(Ordering::Relaxed);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_scan() {
        let target = Box::into_raw(Box::new(17u64));
        assert!(!is_protected(target));

        publish(target);
        assert!(is_protected(target));

        clear();
        assert!(!is_protected(target));

        // SAFETY: allocated above, never shared.
        drop(unsafe { Box::from_raw(target) });
    }

    #[test]
    fn test_slot_recycled_after_thread_exit() {
        let target = Box::into_raw(Box::new(0u64)) as usize;
        std::thread::spawn(move || publish(target as *mut u64))
            .join()
            .unwrap();
        // The exiting thread cleared its slot on the way out.
        assert!(!is_protected(target as *mut u64));
        // SAFETY: allocated above, the spawned thread only published it.
        drop(unsafe { Box::from_raw(target as *mut u64) });
    }
}
