use crate::domain::Domain;
use crate::slot::HazardSlot;
use crate::sync::atomic::AtomicPtr;
use std::ptr::NonNull;
use std::sync::atomic::Ordering;

/// An exclusively-held hazard slot, returned by [`Domain::acquire`].
///
/// One handle publishes one pointer at a time; re-publishing overwrites the
/// previous protection. Dropping the handle clears the publication and
/// returns the slot to the domain's pool, after which no pointer previously
/// protected through it may be dereferenced.
pub struct HazardPointer<'domain> {
    slot: &'domain HazardSlot,
}

impl<'domain> HazardPointer<'domain> {
    pub fn new(domain: &'domain Domain) -> Self {
        Self {
            slot: domain.acquire_slot(),
        }
    }

    /// Protects the pointer currently stored in `src` and returns it.
    ///
    /// This is the full protection protocol: load, publish, re-load, retry
    /// until the two loads agree. On return the pointer (when non-null) is
    /// safe to dereference until the handle is reset, re-published, or
    /// dropped, provided `src` is a location whose unlinked values are
    /// retired to the same domain, and provided unlinking a value changes
    /// `src` before the retire (true for the containers in this crate).
    pub fn protect_ptr<T>(&self, src: &AtomicPtr<T>) -> *mut T {
        let mut ptr = src.load(Ordering::Acquire);
        loop {
            self.slot.protect(ptr as *mut ());
            // SeqCst so the verify cannot be reordered before the
            // publication; see HazardSlot::protect.
            let verify = src.load(Ordering::SeqCst);
            if verify == ptr {
                return ptr;
            }
            ptr = verify;
        }
    }

    /// [`protect_ptr`](Self::protect_ptr), returning a shared reference.
    ///
    /// # Safety
    ///
    /// `src` must hold either null or a pointer to a live `T` whose
    /// unlink-then-retire goes through the domain this handle was acquired
    /// from, with the unlink changing `src` before the retire.
    pub unsafe fn protect<'l, T>(&'l self, src: &AtomicPtr<T>) -> Option<&'l T> {
        // SAFETY: non-null protected pointers are kept alive by the scan
        // guarantee; the caller vouches for everything else.
        NonNull::new(self.protect_ptr(src)).map(|p| unsafe { p.as_ref() })
    }

    /// Publishes `ptr` without verification. The caller is responsible for
    /// establishing that the publication happened in time, e.g. by
    /// re-checking a location that every unlinker must have changed.
    pub fn protect_raw(&self, ptr: *mut ()) {
        self.slot.protect(ptr);
    }

    /// Clears the publication without giving up the slot.
    pub fn reset(&self) {
        self.slot.reset();
    }
}

impl Drop for HazardPointer<'_> {
    fn drop(&mut self) {
        self.slot.reset();
        self.slot.release();
    }
}
