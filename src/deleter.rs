// === Deleter === //

/// Destruction strategy for a raw allocation adopted by a strong handle.
///
/// The deleter is stored inside the control block and invoked exactly once,
/// when the last strong handle departs. Any `FnOnce(*mut T)` closure works;
/// [`BoxDeleter`] is the default for pointers obtained from
/// [`Box::into_raw`].
pub trait Deleter<T> {
    /// Destroys the adopted allocation.
    ///
    /// ## Safety
    ///
    /// `object` must be the pointer that was adopted alongside this deleter,
    /// and must not be accessed through the handle machinery afterwards.
    unsafe fn delete(self, object: *mut T);
}

impl<T, F: FnOnce(*mut T)> Deleter<T> for F {
    unsafe fn delete(self, object: *mut T) {
        self(object);
    }
}

// === BoxDeleter === //

/// Releases an adopted allocation by reconstituting the [`Box`] it came
/// from.
#[derive(Debug, Copy, Clone, Default)]
pub struct BoxDeleter;

impl<T> Deleter<T> for BoxDeleter {
    unsafe fn delete(self, object: *mut T) {
        // Safety: the pointer was produced by `Box::into_raw`, per the
        // adopting constructor's contract.
        drop(unsafe { Box::from_raw(object) });
    }
}
