//! Type-erased destruction of retired objects.
//!
//! A [`Deleter`] knows how to free one object given only its type-erased
//! address. Retired entries carry a `&'static dyn Deleter` next to the raw
//! pointer; this is the only dynamic dispatch in the crate.

/// Marker for types that can be handed to [`Domain::retire`].
///
/// Blanket-implemented; it exists so retired pointers can be stored as
/// `*mut dyn Reclaim` without naming the concrete node type.
///
/// [`Domain::retire`]: crate::Domain::retire
pub trait Reclaim {}
impl<T> Reclaim for T {}

/// Frees a retired object.
pub trait Deleter {
    /// # Safety
    ///
    /// `ptr` must be the address passed to the matching `retire`, still
    /// allocated, and must not be used in any way after this call.
    unsafe fn delete(&self, ptr: *mut dyn Reclaim);
}

impl Deleter for unsafe fn(*mut dyn Reclaim) {
    unsafe fn delete(&self, ptr: *mut dyn Reclaim) {
        // SAFETY: forwarded contract.
        unsafe { (*self)(ptr) }
    }
}

unsafe fn _drop_box(ptr: *mut dyn Reclaim) {
    // SAFETY: caller promises ptr came from Box::into_raw and is unaliased.
    let _ = unsafe { Box::from_raw(ptr) };
}

/// Deleter for objects allocated with `Box::into_raw`.
///
/// # Safety
///
/// Only valid for pointers that originated from a `Box`.
#[allow(non_upper_case_globals)]
pub const drop_box: unsafe fn(*mut dyn Reclaim) = _drop_box;

unsafe fn _drop_in_place(ptr: *mut dyn Reclaim) {
    // SAFETY: caller promises ptr is valid for dropping.
    unsafe { std::ptr::drop_in_place(ptr) };
}

/// Deleter that runs the destructor without freeing the storage, for
/// objects whose allocation is managed elsewhere.
#[allow(non_upper_case_globals)]
pub const drop_in_place: unsafe fn(*mut dyn Reclaim) = _drop_in_place;
