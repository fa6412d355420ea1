use std::{
    fmt,
    marker::PhantomData,
    ops::Deref,
    ptr::{self, NonNull},
};

use derive_where::derive_where;

use crate::{
    AllocError, BlockAlloc, BoxDeleter, Deleter, Global, Weak,
    block::{EmbeddedBlock, RawHandle, RegularBlock},
};

// === Strong === //

/// An owning handle to a shared value.
///
/// Every clone of a `Strong` owns one share of the value's lifetime: the
/// value is destroyed exactly when the last strong handle departs. A handle
/// may also be *empty* ([`Strong::empty`]), referring to nothing at all.
///
/// ```
/// use tether::Strong;
///
/// let a = Strong::new(42);
/// let b = a.clone();
///
/// assert_eq!(*b, 42);
/// assert_eq!(a.use_count(), 2);
///
/// drop(a);
/// assert_eq!(b.use_count(), 1);
/// ```
///
/// Handles are single-threaded (`!Send`, `!Sync`); the reference counters
/// are plain integers.
#[derive_where(Default)]
pub struct Strong<T> {
    raw: Option<RawHandle<T>>,

    /// Each handle owns a share of a `T` for drop-check purposes.
    _owns: PhantomData<T>,
}

impl<T> Strong<T> {
    /// Creates an empty handle referring to nothing.
    pub const fn empty() -> Self {
        Self {
            raw: None,
            _owns: PhantomData,
        }
    }

    pub(crate) fn from_raw_handle(raw: RawHandle<T>) -> Self {
        Self {
            raw: Some(raw),
            _owns: PhantomData,
        }
    }

    /// Allocates a new shared value using the [`Global`] allocator.
    ///
    /// The value and its control block share a single allocation.
    ///
    /// # Panics
    ///
    /// Panics if the global allocator fails.
    #[track_caller]
    pub fn new(value: T) -> Self
    where
        T: 'static,
    {
        Self::new_in(value, Global)
    }

    /// Like [`Strong::new`], with an explicit block allocator.
    ///
    /// # Panics
    ///
    /// Panics if `alloc` fails to provide block storage.
    #[track_caller]
    pub fn new_in<A>(value: T, alloc: A) -> Self
    where
        T: 'static,
        A: BlockAlloc + 'static,
    {
        match Self::try_new_in(value, alloc) {
            Ok(handle) => handle,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible form of [`Strong::new_in`].
    pub fn try_new_in<A>(value: T, alloc: A) -> Result<Self, AllocError>
    where
        T: 'static,
        A: BlockAlloc + 'static,
    {
        Self::try_new_with_in(|| value, alloc)
    }

    /// Allocates a control block via `alloc` and constructs the shared value
    /// in place from `init`.
    ///
    /// This is the single-allocation factory path underlying all the `new`
    /// constructors. If `init` unwinds, the block storage is released before
    /// the panic escapes and no handle is published.
    pub fn try_new_with_in<A>(init: impl FnOnce() -> T, alloc: A) -> Result<Self, AllocError>
    where
        T: 'static,
        A: BlockAlloc + 'static,
    {
        let block = EmbeddedBlock::try_allocate(init, alloc)?;

        // Safety: `block` is the live allocation we just created.
        let object = unsafe { EmbeddedBlock::object_ptr(block) };

        // The block is born at `strong = 1`, already counting this handle.
        Ok(Self::from_raw_handle(RawHandle { block, object }))
    }

    /// Adopts an externally allocated object obtained from [`Box::into_raw`].
    ///
    /// The allocation is released through [`BoxDeleter`] when the last
    /// strong handle departs.
    ///
    /// ## Safety
    ///
    /// `object` must be non-null, obtained from `Box::into_raw`, and owned
    /// by no one else; the handle assumes sole responsibility for freeing
    /// it.
    pub unsafe fn from_raw(object: *mut T) -> Self
    where
        T: 'static,
    {
        unsafe { Self::from_raw_with(object, BoxDeleter) }
    }

    /// Adopts an externally allocated object together with the `deleter`
    /// that will destroy it.
    ///
    /// The deleter runs exactly once, with the original pointer, when the
    /// last strong handle departs. The value's own destructor is *not* run
    /// by this crate; that is the deleter's business.
    ///
    /// ## Safety
    ///
    /// `object` must be non-null and valid until the deleter consumes it,
    /// and no one else may free it.
    pub unsafe fn from_raw_with<D>(object: *mut T, deleter: D) -> Self
    where
        T: 'static,
        D: Deleter<T> + 'static,
    {
        unsafe { Self::from_raw_with_in(object, deleter, Global) }
    }

    /// Like [`Strong::from_raw_with`], with an explicit block allocator.
    ///
    /// # Panics
    ///
    /// Panics if `alloc` fails to provide block storage.
    ///
    /// ## Safety
    ///
    /// As [`Strong::from_raw_with`].
    #[track_caller]
    pub unsafe fn from_raw_with_in<D, A>(object: *mut T, deleter: D, alloc: A) -> Self
    where
        T: 'static,
        D: Deleter<T> + 'static,
        A: BlockAlloc + 'static,
    {
        match unsafe { Self::try_from_raw_with_in(object, deleter, alloc) } {
            Ok(handle) => handle,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible form of [`Strong::from_raw_with_in`].
    ///
    /// On error, ownership of `object` stays with the caller and the deleter
    /// is dropped unused.
    ///
    /// ## Safety
    ///
    /// As [`Strong::from_raw_with`].
    pub unsafe fn try_from_raw_with_in<D, A>(
        object: *mut T,
        deleter: D,
        alloc: A,
    ) -> Result<Self, AllocError>
    where
        T: 'static,
        D: Deleter<T> + 'static,
        A: BlockAlloc + 'static,
    {
        debug_assert!(!object.is_null());

        let block = RegularBlock::try_allocate(object, deleter, alloc)?;

        // Safety: non-null per the caller contract.
        let object = unsafe { NonNull::new_unchecked(object) };

        Ok(Self::from_raw_handle(RawHandle { block, object }))
    }

    /// References the shared value, or `None` if the handle is empty.
    pub fn get(&self) -> Option<&T> {
        // Safety: an engaged strong handle keeps `strong >= 1`, so the
        // object has not been destroyed.
        self.raw.as_ref().map(|raw| unsafe { raw.object.as_ref() })
    }

    /// Raw pointer to the shared value; null if the handle is empty.
    pub fn as_ptr(&self) -> *const T {
        self.raw
            .map_or(ptr::null(), |raw| raw.object.as_ptr().cast_const())
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    /// Number of live strong handles sharing the value, or 0 if the handle
    /// is empty.
    pub fn use_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().strong())
    }

    /// Number of live weak handles observing the value, or 0 if the handle
    /// is empty.
    pub fn weak_count(&self) -> usize {
        self.raw.map_or(0, |raw| raw.header().weak())
    }

    /// Drops this handle's share and becomes empty.
    ///
    /// If this was the last strong handle, the value is destroyed here. A
    /// no-op on an already-empty handle.
    pub fn reset(&mut self) {
        *self = Self::empty();
    }

    /// Creates a weak handle observing the same value.
    ///
    /// Does not change [`Strong::use_count`]. Downgrading an empty handle
    /// yields an empty weak handle.
    pub fn downgrade(&self) -> Weak<T> {
        if let Some(raw) = self.raw {
            raw.header().inc_weak();
        }

        Weak::from_raw_handle(self.raw)
    }
}

impl<T> Clone for Strong<T> {
    /// Shares ownership of the same value, incrementing the strong count.
    fn clone(&self) -> Self {
        if let Some(raw) = self.raw {
            raw.header().inc_strong();
        }

        Self {
            raw: self.raw,
            _owns: PhantomData,
        }
    }
}

impl<T> Drop for Strong<T> {
    fn drop(&mut self) {
        let Some(raw) = self.raw.take() else {
            return;
        };

        if raw.header().dec_strong() > 0 {
            return;
        }

        let mut block = raw.block;

        // Last owner: the value dies now. The block must stay addressable
        // while weak observers remain.
        //
        // Safety: this is the strong 1 -> 0 transition, and nothing
        // dereferences the object past this point.
        unsafe { block.as_mut().destroy_object() };

        if raw.header().weak() > 0 {
            return;
        }

        // Safety: both counters are zero and nothing points at the block
        // anymore.
        unsafe { block.as_mut().destroy_and_deallocate_block() };
    }
}

impl<T> Deref for Strong<T> {
    type Target = T;

    #[track_caller]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic!("attempted to dereference an empty handle"),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Strong<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => value.fmt(f),
            None => f.write_str("<empty>"),
        }
    }
}
