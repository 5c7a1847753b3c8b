//! Lock-free containers over hazard-pointer memory reclamation.
//!
//! The hard problem a lock-free container has to solve is not the
//! compare-and-set loop, it is freeing memory: a thread may unlink a node
//! while another thread is mid-dereference of it. A [hazard pointer]
//! advertises "I am currently dereferencing this address" so that deleters
//! defer the free until the advertisement is gone.
//!
//! [`Domain`] is the reclamation core: it hands out hazard slots to
//! readers and collects retired pointers, bulk-freeing the unprotected
//! ones once a configurable threshold of retires has accumulated.
//! [`Queue`] (Michael–Scott FIFO) and [`Stack`] (Treiber LIFO) are
//! containers built on it; each owns a domain and retires every node it
//! unlinks.
//!
//! The domain is usable on its own against any `AtomicPtr`-linked
//! structure:
//!
//! ```
//! use hazmat::{deleter, Domain};
//! use std::sync::atomic::{AtomicPtr, Ordering};
//!
//! let domain = Domain::new();
//! let shared = AtomicPtr::new(Box::into_raw(Box::new(42_u64)));
//!
//! // Reader: protect before dereferencing.
//! let hazard = domain.acquire();
//! let value = unsafe { hazard.protect(&shared) }.copied();
//! assert_eq!(Some(42), value);
//!
//! // Writer: unlink, then retire. The scan will not free the object
//! // while the reader's hazard stands.
//! let old = shared.swap(std::ptr::null_mut(), Ordering::AcqRel);
//! unsafe { domain.retire(old, &deleter::drop_box) };
//! assert_eq!(0, domain.reclaim());
//! drop(hazard);
//! assert_eq!(1, domain.reclaim());
//! ```
//!
//! All operations are lock-free, none are wait-free; nothing blocks,
//! nothing spawns threads. Built with `--cfg loom`, the whole crate runs
//! against the [loom] model for the concurrency tests in `tests/loom.rs`.
//!
//! [hazard pointer]: https://en.wikipedia.org/wiki/Hazard_pointer
//! [loom]: https://docs.rs/loom

#![deny(unsafe_op_in_unsafe_fn)]

pub mod deleter;
mod domain;
mod holder;
mod queue;
mod slot;
mod stack;
pub(crate) mod sync;

pub use deleter::{Deleter, Reclaim};
pub use domain::{Domain, DEFAULT_THRESHOLD};
pub use holder::HazardPointer;
pub use queue::Queue;
pub use stack::Stack;
