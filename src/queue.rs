use crate::deleter::{self, Reclaim};
use crate::domain::Domain;
use crate::holder::HazardPointer;
use crate::sync::atomic::{AtomicIsize, AtomicPtr};
use crossbeam_utils::{Backoff, CachePadded};
use std::ptr;
use std::sync::atomic::Ordering;

struct Node<T> {
    value: Option<T>,
    next: AtomicPtr<Node<T>>,
}

/// A multi-producer multi-consumer FIFO queue.
///
/// Michael–Scott with a permanent dummy at the head: `head` always points
/// at the most recently consumed node (or the original dummy), and the
/// first live value sits in `head->next`. Unlinked nodes are retired to
/// the queue's own hazard-pointer [`Domain`] and freed once no reader
/// protects them.
///
/// `pop` copies the value out and leaves the node in place as the new
/// dummy, so it requires `T: Clone`; the stored original is dropped when
/// the node is reclaimed.
pub struct Queue<T> {
    domain: Domain,
    head: CachePadded<AtomicPtr<Node<T>>>,
    tail: CachePadded<AtomicPtr<Node<T>>>,
    len: AtomicIsize,
}

// The queue moves values across threads and hands out shared references to
// them (pop clones, contains compares), hence the Sync bound on T.
unsafe impl<T: Send> Send for Queue<T> {}
unsafe impl<T: Send + Sync> Sync for Queue<T> {}

impl<T: 'static> Queue<T> {
    pub fn new() -> Self {
        Self::with_domain(Domain::new())
    }

    /// A queue retiring into `domain`, e.g. one built with
    /// [`Domain::with_threshold`].
    pub fn with_domain(domain: Domain) -> Self {
        let dummy = Box::into_raw(Box::new(Node {
            value: None,
            next: AtomicPtr::new(ptr::null_mut()),
        }));
        Self {
            domain,
            head: CachePadded::new(AtomicPtr::new(dummy)),
            tail: CachePadded::new(AtomicPtr::new(dummy)),
            len: AtomicIsize::new(0),
        }
    }

    /// The reclamation domain this queue retires into.
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Appends `value`. Linearizes at the compare-and-set that links the
    /// new node behind the protected tail.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value: Some(value),
            next: AtomicPtr::new(ptr::null_mut()),
        }));
        let hazard = HazardPointer::new(&self.domain);
        let backoff = Backoff::new();
        loop {
            let tail = hazard.protect_ptr(&self.tail);
            // SAFETY: tail is protect-verified, and a node still reachable
            // as tail is never retired (pop moves tail off a node before
            // unlinking it).
            let tail_ref = unsafe { &*tail };
            let next = tail_ref.next.load(Ordering::Acquire);
            if !next.is_null() {
                // Tail is lagging; help it forward rather than spin on it.
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
                continue;
            }
            if tail_ref
                .next
                .compare_exchange(ptr::null_mut(), node, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // Linked; the tail update is best-effort and repaired by
                // whoever notices the lag next.
                let _ = self
                    .tail
                    .compare_exchange(tail, node, Ordering::Release, Ordering::Relaxed);
                break;
            }
            backoff.spin();
        }
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    /// Removes the oldest value, or returns `None` when the queue is
    /// empty. Linearizes at the compare-and-set that advances `head`.
    pub fn pop(&self) -> Option<T>
    where
        T: Clone,
    {
        let head_hazard = HazardPointer::new(&self.domain);
        let next_hazard = HazardPointer::new(&self.domain);
        let backoff = Backoff::new();
        loop {
            let head = head_hazard.protect_ptr(&self.head);
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: head is protect-verified against self.head.
            let next = unsafe { (*head).next.load(Ordering::Acquire) };
            next_hazard.protect_raw(next as *mut ());
            // SeqCst: the validation must not be reordered before the
            // publication of next.
            if self.head.load(Ordering::SeqCst) != head {
                // A pop completed in between; the publication of next may
                // have come too late to be seen by a concurrent scan.
                backoff.spin();
                continue;
            }
            if next.is_null() {
                return None;
            }
            if head == tail {
                // A successor exists but tail still points at head; move
                // tail off the node before anyone unlinks and retires it.
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
                continue;
            }
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: next is protected and validated above; its value
                // was written before the node was published and is never
                // written again.
                let value = unsafe { (*next).value.clone() };
                debug_assert!(value.is_some());
                drop(head_hazard);
                drop(next_hazard);
                // SAFETY: head is unlinked and this thread is the only one
                // that unlinked it; readers that still hold it are exactly
                // what the domain's scan respects.
                unsafe { self.domain.retire(head as *mut dyn Reclaim, &deleter::drop_box) };
                self.len.fetch_sub(1, Ordering::Relaxed);
                return value;
            }
            backoff.spin();
        }
    }

    /// Best-effort membership test with no snapshot semantics: it reports
    /// whether a node equal to `value` was observed while walking, and may
    /// miss values inserted or removed during the walk.
    pub fn contains(&self, value: &T) -> bool
    where
        T: PartialEq,
    {
        let pin = HazardPointer::new(&self.domain);
        let walk = HazardPointer::new(&self.domain);
        'restart: loop {
            let head = pin.protect_ptr(&self.head);
            let mut cur = head;
            loop {
                // SAFETY: cur is protected, by pin while cur == head and
                // by walk once we advance.
                let next = unsafe { (*cur).next.load(Ordering::Acquire) };
                if next.is_null() {
                    return false;
                }
                walk.protect_raw(next as *mut ());
                if self.head.load(Ordering::SeqCst) != head {
                    // A pop completed; the walk hazard may have been
                    // published too late. The pinned head can't have been
                    // recycled, so this check is exact.
                    continue 'restart;
                }
                // SAFETY: head unchanged means no pop completed since the
                // walk began, so nothing on the chain has been retired and
                // the publication of next was in time.
                let node = unsafe { &*next };
                if node.value.as_ref() == Some(value) {
                    return true;
                }
                cur = next;
            }
        }
    }

    /// Whether the queue was empty at the instant `head->next` was read.
    /// The read is hazard-protected like any other dereference.
    pub fn is_empty(&self) -> bool {
        let hazard = HazardPointer::new(&self.domain);
        let head = hazard.protect_ptr(&self.head);
        // SAFETY: head is protect-verified.
        unsafe { (*head).next.load(Ordering::Acquire) }.is_null()
    }

    /// Advisory length: exact in quiescent states, approximate while
    /// operations are in flight.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).max(0) as usize
    }
}

impl<T: 'static> Default for Queue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Queue<T> {
    fn drop(&mut self) {
        // Exclusive access: free the remaining chain, dummy included.
        // Nodes that were popped earlier are on the domain's retired list,
        // not on this chain, and are freed when the domain drops.
        let mut node = self.head.load(Ordering::Relaxed);
        while !node.is_null() {
            // SAFETY: no other reference to the queue exists.
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next.load(Ordering::Relaxed);
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::Queue;

    #[test]
    fn fifo_order() {
        let queue = Queue::new();
        assert!(queue.is_empty());
        queue.push(1);
        queue.push(2);
        queue.push(3);
        assert_eq!(Some(1), queue.pop());
        assert_eq!(Some(2), queue.pop());
        assert_eq!(Some(3), queue.pop());
        assert_eq!(None, queue.pop());
        assert!(queue.is_empty());
    }

    #[test]
    fn contains_sees_live_values() {
        let queue = Queue::new();
        queue.push("a");
        queue.push("b");
        assert!(queue.contains(&"a"));
        assert!(queue.contains(&"b"));
        assert!(!queue.contains(&"c"));
        queue.pop();
        assert!(!queue.contains(&"a"));
    }

    #[test]
    fn len_tracks_quiescent_size() {
        let queue = Queue::new();
        assert_eq!(0, queue.len());
        for i in 0..10 {
            queue.push(i);
        }
        assert_eq!(10, queue.len());
        for _ in 0..4 {
            queue.pop();
        }
        assert_eq!(6, queue.len());
    }
}
