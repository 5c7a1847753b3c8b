use crate::deleter::{Deleter, Reclaim};
use crate::holder::HazardPointer;
use crate::slot::HazardSlot;
use crate::sync::atomic::{fence, AtomicPtr, AtomicUsize};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};
use std::ptr;
use std::sync::atomic::Ordering;

/// Retired pointers accumulate until this many are pending, then the
/// retiring thread runs a scan.
pub const DEFAULT_THRESHOLD: usize = 10_000;

/// A hazard-pointer reclamation domain.
///
/// The domain owns a set of hazard slots (one per active reader, acquired
/// through [`acquire`](Self::acquire)) and a list of retired pointers
/// awaiting deletion. A pointer handed to [`retire`](Self::retire) is freed
/// by a later scan, and only once no slot publishes its address. Readers
/// that follow the protection protocol (publish the pointer they loaded,
/// re-load the source location, retry on mismatch; see
/// [`HazardPointer::protect_ptr`]) therefore never dereference freed
/// memory, no matter how retires interleave.
///
/// Scans are triggered by the retiring thread whenever the pending count
/// reaches the configured threshold, and cost time linear in the pending
/// list plus the slot list. Threads that lose the scan handshake return
/// immediately, so no operation ever blocks.
pub struct Domain {
    slots: SlotList,
    retired: RetiredList,
    pending: AtomicUsize,
    threshold: AtomicUsize,
}

impl Domain {
    /// A domain with the default scan threshold.
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_THRESHOLD)
    }

    /// A domain that scans once `threshold` pointers are pending.
    pub fn with_threshold(threshold: usize) -> Self {
        assert!(threshold > 0, "scan threshold must be positive");
        Self {
            slots: SlotList {
                head: AtomicPtr::new(ptr::null_mut()),
                len: AtomicUsize::new(0),
            },
            retired: RetiredList {
                head: AtomicPtr::new(ptr::null_mut()),
            },
            pending: AtomicUsize::new(0),
            threshold: AtomicUsize::new(threshold),
        }
    }

    /// Acquires an exclusively-held hazard slot, wrapped in an RAII handle.
    pub fn acquire(&self) -> HazardPointer<'_> {
        HazardPointer::new(self)
    }

    /// Schedules `ptr` for deferred deletion via `deleter`.
    ///
    /// The pointer is freed by a later scan, once no hazard slot publishes
    /// it. If this retire brings the pending count to the threshold, the
    /// scan runs on the calling thread before returning.
    ///
    /// # Safety
    ///
    /// - `ptr` must be valid, unlinked from any shared location, and never
    ///   retired before; `deleter` must free it correctly.
    /// - After this call the owner must not access `ptr`; readers that
    ///   protected it beforehand may keep reading until they clear their
    ///   slot.
    pub unsafe fn retire(&self, ptr: *mut (dyn Reclaim + 'static), deleter: &'static dyn Deleter) {
        let entry = Box::into_raw(Box::new(Retired {
            ptr,
            deleter,
            next: ptr::null_mut(),
        }));
        // SAFETY: entry is a fresh heap allocation.
        unsafe { self.retired.push(entry) };
        let pending = self.pending.fetch_add(1, Ordering::Relaxed) + 1;
        if pending >= self.threshold.load(Ordering::Relaxed) {
            self.try_scan(pending);
        }
    }

    /// Runs a scan now, regardless of the threshold, and returns how many
    /// retired pointers were freed.
    pub fn reclaim(&self) -> usize {
        self.pending.swap(0, Ordering::AcqRel);
        self.scan()
    }

    /// The pending count at which a retire triggers a scan.
    pub fn threshold(&self) -> usize {
        self.threshold.load(Ordering::Relaxed)
    }

    pub fn set_threshold(&self, threshold: usize) {
        assert!(threshold > 0, "scan threshold must be positive");
        self.threshold.store(threshold, Ordering::Relaxed);
    }

    /// Number of hazard slots ever created in this domain.
    pub fn slot_count(&self) -> usize {
        self.slots.len.load(Ordering::Relaxed)
    }

    /// Approximate number of retired pointers not yet freed. Transiently
    /// over- or undercounts while retires and scans are in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Claims an unoccupied slot, or allocates and publishes a new one.
    /// Slots live until the domain is dropped, so the reference is valid
    /// for `'_`.
    pub(crate) fn acquire_slot(&self) -> &HazardSlot {
        let mut node = self.slots.head.load(Ordering::Acquire);
        while !node.is_null() {
            // SAFETY: slots are never freed while the domain lives.
            let slot = unsafe { &*node };
            if slot.try_acquire() {
                return slot;
            }
            node = slot.next.load(Ordering::Relaxed);
        }
        self.slots.allocate()
    }

    /// Scan handshake: only the thread whose compare-and-set resets the
    /// observed count gets to scan; everyone else backs off. Mutual
    /// exclusion here is cooperative, not required for safety, since the
    /// detach in `scan` is atomic either way.
    fn try_scan(&self, observed: usize) {
        if self
            .pending
            .compare_exchange(observed, 0, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.scan();
        }
    }

    fn scan(&self) -> usize {
        let mut entry = self.retired.detach();
        if entry.is_null() {
            return 0;
        }

        // Order the detach against every reader's publish-then-verify
        // sequence before collecting hazards; pairs with the SeqCst stores
        // in HazardSlot::protect.
        fence(Ordering::SeqCst);
        let hazards = self.slots.protected();
        // Pointer values freed earlier in this same scan: a duplicate
        // retire of one of these must not reach its deleter again.
        let mut freed_now: HashSet<*mut ()> = HashSet::new();
        // Still-protected entries, at most one per pointer value.
        let mut survivors: HashMap<*mut (), *mut Retired> = HashMap::new();
        let mut freed = 0usize;

        while !entry.is_null() {
            // SAFETY: the detached list is exclusively ours.
            let next = unsafe { (*entry).next };
            let key = unsafe { (*entry).ptr } as *mut ();
            if hazards.contains(&key) {
                if let Some(duplicate) = survivors.insert(key, entry) {
                    // Same pointer retired twice; keep one entry.
                    // SAFETY: duplicate came off the detached list.
                    drop(unsafe { Box::from_raw(duplicate) });
                }
            } else if freed_now.insert(key) {
                // SAFETY: entry came off the detached list; no hazard
                // published this pointer when the scan began.
                let entry = unsafe { Box::from_raw(entry) };
                unsafe { entry.deleter.delete(entry.ptr) };
                freed += 1;
            } else {
                // Duplicate of a pointer already freed above.
                // SAFETY: entry came off the detached list.
                drop(unsafe { Box::from_raw(entry) });
            }
            entry = next;
        }

        let kept = survivors.len();
        if kept > 0 {
            let mut chain = ptr::null_mut();
            for (_, entry) in survivors {
                // SAFETY: survivor entries are still exclusively ours.
                unsafe { (*entry).next = chain };
                chain = entry;
            }
            if self
                .retired
                .head
                .compare_exchange(ptr::null_mut(), chain, Ordering::AcqRel, Ordering::Relaxed)
                .is_err()
            {
                // Concurrent retires refilled the list; push survivors back
                // one at a time.
                let mut entry = chain;
                while !entry.is_null() {
                    // SAFETY: as above.
                    let next = unsafe { (*entry).next };
                    unsafe { self.retired.push(entry) };
                    self.pending.fetch_add(1, Ordering::Relaxed);
                    entry = next;
                }
            }
        }

        debug!("scan freed {freed} retired pointers, {kept} still protected");
        freed
    }
}

impl Default for Domain {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Domain {
    /// Frees everything unconditionally. The caller guarantees no readers
    /// and no outstanding slot handles remain; with that, nothing on the
    /// retired list can still be referenced.
    fn drop(&mut self) {
        let mut entry = self.retired.detach();
        let mut seen: HashSet<*mut ()> = HashSet::new();
        while !entry.is_null() {
            // SAFETY: the domain is being dropped, the list is ours.
            let entry_box = unsafe { Box::from_raw(entry) };
            entry = entry_box.next;
            if seen.insert(entry_box.ptr as *mut ()) {
                // SAFETY: retire's contract; first sighting of this pointer.
                unsafe { entry_box.deleter.delete(entry_box.ptr) };
            }
        }

        let mut node = self.slots.head.load(Ordering::Acquire);
        while !node.is_null() {
            // SAFETY: slots are owned by the domain and freed only here.
            let slot = unsafe { Box::from_raw(node) };
            if slot.is_occupied() {
                warn!("domain dropped while a hazard slot is still occupied");
            }
            node = slot.next.load(Ordering::Relaxed);
        }
    }
}

struct SlotList {
    head: AtomicPtr<HazardSlot>,
    len: AtomicUsize,
}

impl SlotList {
    /// Allocates an already-occupied slot and publishes it at the head.
    fn allocate(&self) -> &HazardSlot {
        let slot = Box::into_raw(Box::new(HazardSlot::occupied()));
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            // SAFETY: slot is not yet shared.
            unsafe { (*slot).next.store(head, Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(head, slot, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => {
                    self.len.fetch_add(1, Ordering::Relaxed);
                    // SAFETY: published slots live until the domain drops.
                    break unsafe { &*slot };
                }
                Err(now) => head = now,
            }
        }
    }

    /// The hazard set: every non-null pointer currently published in a
    /// slot, deduplicated.
    fn protected(&self) -> HashSet<*mut ()> {
        let mut protected = HashSet::new();
        let mut node = self.head.load(Ordering::Acquire);
        while !node.is_null() {
            // SAFETY: slots are never freed while the domain lives.
            let slot = unsafe { &*node };
            let ptr = slot.protected();
            if !ptr.is_null() {
                protected.insert(ptr);
            }
            node = slot.next.load(Ordering::Acquire);
        }
        protected
    }
}

struct Retired {
    ptr: *mut (dyn Reclaim + 'static),
    deleter: &'static dyn Deleter,
    next: *mut Retired,
}

struct RetiredList {
    head: AtomicPtr<Retired>,
}

impl RetiredList {
    /// # Safety
    ///
    /// `entry` must be a valid, exclusively-owned allocation.
    unsafe fn push(&self, entry: *mut Retired) {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            // SAFETY: entry is ours until the compare-exchange publishes it.
            unsafe { (*entry).next = head };
            match self
                .head
                .compare_exchange_weak(head, entry, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(now) => head = now,
            }
        }
    }

    /// Takes the whole list; the caller becomes its sole owner.
    fn detach(&self) -> *mut Retired {
        self.head.swap(ptr::null_mut(), Ordering::AcqRel)
    }
}
