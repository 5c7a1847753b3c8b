use hazmat::{deleter, Deleter, Domain, Reclaim};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

struct CountDrops(Arc<AtomicUsize>);
impl Drop for CountDrops {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Counts invocations without freeing, so tests can double-retire a
/// pointer and still clean it up themselves.
struct Tally(AtomicUsize);
impl Deleter for Tally {
    unsafe fn delete(&self, _ptr: *mut dyn Reclaim) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn released_slots_are_reused_before_allocating() {
    let domain = Domain::new();
    let a = domain.acquire();
    let b = domain.acquire();
    assert_eq!(2, domain.slot_count());

    drop(a);
    drop(b);
    let _c = domain.acquire();
    assert_eq!(2, domain.slot_count(), "no third slot should be allocated");
}

#[test]
fn protected_object_outlives_retire() {
    let drops = Arc::new(AtomicUsize::new(0));
    let domain = Domain::new();
    let x = AtomicPtr::new(Box::into_raw(Box::new((
        42usize,
        CountDrops(Arc::clone(&drops)),
    ))));

    // Reader side.
    let h = domain.acquire();
    let my_x = unsafe { h.protect(&x) }.unwrap();
    assert_eq!(42, my_x.0);

    h.reset();
    // No longer protected, but not retired either: still valid.
    let my_x = unsafe { h.protect(&x) }.unwrap();

    // Writer side: unlink, then retire.
    let drops_9001 = Arc::new(AtomicUsize::new(0));
    let old = x.swap(
        Box::into_raw(Box::new((9001usize, CountDrops(Arc::clone(&drops_9001))))),
        Ordering::SeqCst,
    );
    unsafe { domain.retire(old, &deleter::drop_box) };

    // The hazard is still standing, so a scan must not free the object.
    assert_eq!(0, domain.reclaim());
    assert_eq!(42, my_x.0);
    assert_eq!(0, drops.load(Ordering::SeqCst));

    drop(h);
    assert_eq!(1, domain.reclaim());
    assert_eq!(1, drops.load(Ordering::SeqCst));
    assert_eq!(0, drops_9001.load(Ordering::SeqCst));

    // Clean up the replacement value.
    let last = x.swap(std::ptr::null_mut(), Ordering::SeqCst);
    unsafe { domain.retire(last, &deleter::drop_box) };
    assert_eq!(1, domain.reclaim());
    assert_eq!(1, drops_9001.load(Ordering::SeqCst));
}

#[test]
fn threshold_bounds_scan_frequency() {
    static DELETES: AtomicUsize = AtomicUsize::new(0);
    unsafe fn counting_drop(ptr: *mut dyn Reclaim) {
        DELETES.fetch_add(1, Ordering::SeqCst);
        let _ = unsafe { Box::from_raw(ptr) };
    }
    static COUNTING: unsafe fn(*mut dyn Reclaim) = counting_drop;

    let domain = Domain::with_threshold(10);
    for i in 0..25usize {
        let ptr = Box::into_raw(Box::new(i));
        unsafe { domain.retire(ptr, &COUNTING) };
        assert!(
            domain.pending_count() < 10,
            "a retire that reaches the threshold must scan"
        );
    }
    // Scans fired at the 10th and 20th retire; 5 stragglers remain.
    assert_eq!(20, DELETES.load(Ordering::SeqCst));
    assert_eq!(5, domain.pending_count());

    drop(domain);
    assert_eq!(25, DELETES.load(Ordering::SeqCst), "teardown frees the rest");
}

#[test]
fn double_retire_invokes_deleter_once_per_scan() {
    static TALLY: Tally = Tally(AtomicUsize::new(0));

    let domain = Domain::new();
    let ptr = Box::into_raw(Box::new(1u8));
    unsafe { domain.retire(ptr, &TALLY) };
    unsafe { domain.retire(ptr, &TALLY) };
    assert_eq!(2, domain.pending_count());

    assert_eq!(1, domain.reclaim());
    assert_eq!(1, TALLY.0.load(Ordering::SeqCst));
    assert_eq!(0, domain.pending_count());

    // The deleter never freed it; we own it again.
    let _ = unsafe { Box::from_raw(ptr) };
}

#[test]
fn double_retire_of_protected_pointer_collapses_to_one_entry() {
    static TALLY: Tally = Tally(AtomicUsize::new(0));

    let domain = Domain::new();
    let ptr = Box::into_raw(Box::new(1u8));

    let h = domain.acquire();
    h.protect_raw(ptr as *mut ());
    unsafe { domain.retire(ptr, &TALLY) };
    unsafe { domain.retire(ptr, &TALLY) };

    // Both entries survive the scan as a single deduplicated record.
    assert_eq!(0, domain.reclaim());
    assert_eq!(0, TALLY.0.load(Ordering::SeqCst));

    drop(h);
    assert_eq!(1, domain.reclaim());
    assert_eq!(1, TALLY.0.load(Ordering::SeqCst));

    let _ = unsafe { Box::from_raw(ptr) };
}

#[test]
fn teardown_frees_pending_retires() {
    let drops = Arc::new(AtomicUsize::new(0));
    let domain = Domain::new();
    for i in 0..5usize {
        let ptr = Box::into_raw(Box::new((i, CountDrops(Arc::clone(&drops)))));
        unsafe { domain.retire(ptr, &deleter::drop_box) };
    }
    assert_eq!(5, domain.pending_count());
    assert_eq!(0, drops.load(Ordering::SeqCst));
    drop(domain);
    assert_eq!(5, drops.load(Ordering::SeqCst));
}

#[test]
fn protect_ptr_tracks_concurrent_replacement() {
    // Single-threaded version of the protocol: the verify re-load must
    // chase the location until it is stable.
    let domain = Domain::new();
    let first = Box::into_raw(Box::new(1usize));
    let x = AtomicPtr::new(first);

    let h = domain.acquire();
    let p = h.protect_ptr(&x);
    assert_eq!(first, p);

    // Replace and protect again through the same handle.
    let second = Box::into_raw(Box::new(2usize));
    let old = x.swap(second, Ordering::SeqCst);
    let p = h.protect_ptr(&x);
    assert_eq!(second, p);

    unsafe { domain.retire(old, &deleter::drop_box) };
    assert_eq!(1, domain.reclaim(), "old value is unprotected now");

    let last = x.swap(std::ptr::null_mut(), Ordering::SeqCst);
    unsafe { domain.retire(last, &deleter::drop_box) };
    drop(h);
}
