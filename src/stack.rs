use crate::deleter::{self, Reclaim};
use crate::domain::Domain;
use crate::holder::HazardPointer;
use crate::sync::atomic::{AtomicIsize, AtomicPtr};
use crossbeam_utils::{Backoff, CachePadded};
use std::ptr;
use std::sync::atomic::Ordering;

struct Node<T> {
    value: Option<T>,
    next: *mut Node<T>,
}

/// A multi-producer multi-consumer LIFO stack (Treiber).
///
/// `push` never dereferences shared memory and needs no hazard; `pop`
/// protects the head it is about to unlink, then retires it to the
/// stack's own [`Domain`]. The winning popper owns the unlinked node and
/// moves the value out, so there is no `Clone` bound.
pub struct Stack<T> {
    domain: Domain,
    head: CachePadded<AtomicPtr<Node<T>>>,
    len: AtomicIsize,
}

unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Send> Sync for Stack<T> {}

impl<T: 'static> Stack<T> {
    pub fn new() -> Self {
        Self::with_domain(Domain::new())
    }

    /// A stack retiring into `domain`, e.g. one built with
    /// [`Domain::with_threshold`].
    pub fn with_domain(domain: Domain) -> Self {
        Self {
            domain,
            head: CachePadded::new(AtomicPtr::new(ptr::null_mut())),
            len: AtomicIsize::new(0),
        }
    }

    /// The reclamation domain this stack retires into.
    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    /// Pushes `value`. Linearizes at the successful compare-and-set of
    /// `head`.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value: Some(value),
            next: ptr::null_mut(),
        }));
        let backoff = Backoff::new();
        let mut expected = self.head.load(Ordering::Relaxed);
        loop {
            // SAFETY: node is not yet shared.
            unsafe { (*node).next = expected };
            match self
                .head
                .compare_exchange_weak(expected, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(now) => {
                    expected = now;
                    backoff.spin();
                }
            }
        }
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    /// Pops the most recently pushed value, or `None` when the stack is
    /// empty. Linearizes at the successful compare-and-set of `head`.
    pub fn pop(&self) -> Option<T> {
        let hazard = HazardPointer::new(&self.domain);
        let backoff = Backoff::new();
        loop {
            let head = hazard.protect_ptr(&self.head);
            if head.is_null() {
                return None;
            }
            // SAFETY: head is protect-verified; next is written only
            // before the node was published.
            let next = unsafe { (*head).next };
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: the node is unlinked and this thread won the
                // compare-and-set, so the value slot is ours alone; other
                // protected readers only look at `next`.
                let value = unsafe { (*head).value.take() };
                debug_assert!(value.is_some());
                drop(hazard);
                // SAFETY: unlinked by this thread, never retired before.
                unsafe { self.domain.retire(head as *mut dyn Reclaim, &deleter::drop_box) };
                self.len.fetch_sub(1, Ordering::Relaxed);
                return value;
            }
            backoff.spin();
        }
    }

    /// Whether the stack was empty at the instant `head` was read. A pure
    /// pointer comparison; nothing is dereferenced.
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire).is_null()
    }

    /// Advisory length: exact in quiescent states, approximate while
    /// operations are in flight.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed).max(0) as usize
    }
}

impl<T: 'static> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Stack<T> {
    fn drop(&mut self) {
        // Exclusive access: free whatever is still linked. Popped nodes
        // are on the domain's retired list and freed when it drops.
        let mut node = self.head.load(Ordering::Relaxed);
        while !node.is_null() {
            // SAFETY: no other reference to the stack exists.
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next;
        }
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::Stack;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn lifo_order() {
        let stack = Stack::new();
        assert!(stack.is_empty());
        stack.push(1);
        stack.push(2);
        stack.push(3);
        assert_eq!(Some(3), stack.pop());
        assert_eq!(Some(2), stack.pop());
        assert_eq!(Some(1), stack.pop());
        assert_eq!(None, stack.pop());
        assert!(stack.is_empty());
    }

    #[test]
    fn len_tracks_quiescent_size() {
        let stack = Stack::new();
        for i in 0..10 {
            stack.push(i);
        }
        assert_eq!(10, stack.len());
        stack.pop();
        assert_eq!(9, stack.len());
    }

    #[test]
    fn unpopped_values_drop_with_the_stack() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let stack = Stack::new();
        for _ in 0..100 {
            stack.push(Counted);
        }
        for _ in 0..40 {
            drop(stack.pop());
        }
        assert_eq!(40, DROPS.load(Ordering::Relaxed));
        drop(stack);
        assert_eq!(100, DROPS.load(Ordering::Relaxed));
    }
}
