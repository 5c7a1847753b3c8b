use crate::sync::atomic::{AtomicBool, AtomicPtr};
use std::sync::atomic::Ordering;

/// One cell of the domain's slot list.
///
/// The occupied flag arbitrates ownership: it goes false→true by a single
/// successful compare-and-set in [`try_acquire`](Self::try_acquire) and
/// true→false only in [`release`](Self::release), called by the occupying
/// thread. While occupied, `protected` is written by that thread alone;
/// scanners read it concurrently under acquire/release pairing. Slots are
/// never unlinked while the domain lives.
pub(crate) struct HazardSlot {
    protected: AtomicPtr<()>,
    occupied: AtomicBool,
    pub(crate) next: AtomicPtr<HazardSlot>,
}

impl HazardSlot {
    /// A fresh slot, already owned by the allocating thread.
    pub(crate) fn occupied() -> Self {
        Self {
            protected: AtomicPtr::new(std::ptr::null_mut()),
            occupied: AtomicBool::new(true),
            next: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    pub(crate) fn try_acquire(&self) -> bool {
        !self.is_occupied()
            && self
                .occupied
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
    }

    pub(crate) fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::Relaxed)
    }

    /// Returns the slot to the pool. Caller must be the occupant and must
    /// have no outstanding protected dereferences through this slot.
    pub(crate) fn release(&self) {
        self.occupied.store(false, Ordering::Release);
    }

    /// Publishes `ptr` as currently-dereferenced.
    ///
    /// Sequentially consistent, not merely release: the publication must
    /// be ordered against the reader's subsequent verify-load *and* the
    /// scanner's unlink-then-collect sequence. Release/acquire alone lets
    /// both sides read stale values (the store-buffer litmus); the
    /// matching full fence sits in the scan, before it collects hazards.
    pub(crate) fn protect(&self, ptr: *mut ()) {
        self.protected.store(ptr, Ordering::SeqCst);
    }

    pub(crate) fn reset(&self) {
        self.protected.store(std::ptr::null_mut(), Ordering::SeqCst);
    }

    /// The currently published pointer, as seen by a scanner.
    pub(crate) fn protected(&self) -> *mut () {
        self.protected.load(Ordering::Acquire)
    }
}
