use std::{
    alloc::Layout,
    cell::Cell,
    mem::MaybeUninit,
    ptr::{self, NonNull},
};

use derive_where::derive_where;
use scopeguard::ScopeGuard;

use crate::{AllocError, BlockAlloc, Deleter};

// === BlockHeader === //

/// The counter prefix shared by every control block variant.
pub(crate) struct BlockHeader {
    /// Number of live strong handles pointing at this block.
    strong: Cell<usize>,

    /// Number of live weak handles pointing at this block. Weak handles are
    /// counted literally; there is no implicit extra count while strong
    /// handles exist.
    weak: Cell<usize>,
}

impl BlockHeader {
    /// A fresh block already counts the first strong handle.
    pub(crate) fn new() -> Self {
        Self {
            strong: Cell::new(1),
            weak: Cell::new(0),
        }
    }

    pub(crate) fn strong(&self) -> usize {
        self.strong.get()
    }

    pub(crate) fn weak(&self) -> usize {
        self.weak.get()
    }

    pub(crate) fn inc_strong(&self) {
        let strong = self.strong.get();

        // A live strong handle keeps this at least 1. Letting the counter
        // wrap would free the object while it is still referenced.
        if strong == 0 || strong == usize::MAX {
            panic!("strong counter out of range");
        }

        self.strong.set(strong + 1);
    }

    /// Returns the count remaining after this handle's departure.
    pub(crate) fn dec_strong(&self) -> usize {
        let strong = self.strong.get() - 1;
        self.strong.set(strong);
        strong
    }

    pub(crate) fn inc_weak(&self) {
        let weak = self.weak.get();

        if weak == usize::MAX {
            panic!("weak counter out of range");
        }

        self.weak.set(weak + 1);
    }

    /// Returns the count remaining after this handle's departure.
    pub(crate) fn dec_weak(&self) -> usize {
        let weak = self.weak.get() - 1;
        self.weak.set(weak);
        weak
    }
}

// === ControlBlock === //

/// Type-erased interface to a control block.
///
/// The deleter and allocator a block was built with live behind this trait's
/// vtable, so handles are parameterized by the managed type alone. The two
/// destruction operations run only at terminal counter transitions; the
/// per-handle hot path goes through [`BlockHeader`] directly.
pub(crate) trait ControlBlock {
    fn header(&self) -> &BlockHeader;

    /// Tears down the managed object. The block itself stays allocated so
    /// that weak handles can keep reading the counters.
    ///
    /// ## Safety
    ///
    /// Must be called exactly once, at the strong `1 -> 0` transition. The
    /// managed object must not be accessed afterwards.
    unsafe fn destroy_object(&mut self);

    /// Drops the block in place and returns its storage to the allocator
    /// that produced it.
    ///
    /// ## Safety
    ///
    /// Must be called exactly once, after both counters have reached zero
    /// and [`ControlBlock::destroy_object`] has run. The block must never be
    /// accessed again, through this reference or any other.
    unsafe fn destroy_and_deallocate_block(&mut self);
}

/// Drops a concrete block in place, then hands its storage back to `alloc`.
///
/// ## Safety
///
/// `block` must be valid, uniquely referenced, and allocated by a clone of
/// `alloc` with `Layout::new::<B>()`.
unsafe fn drop_and_release<B, A: BlockAlloc>(block: *mut B, alloc: A) {
    unsafe {
        ptr::drop_in_place(block);
        alloc.deallocate(NonNull::new_unchecked(block).cast(), Layout::new::<B>());
    }
}

// === RegularBlock === //

/// Control block for an externally allocated object adopted from a raw
/// pointer.
///
/// Destroying the object means running the stored deleter on the stored
/// pointer; the stored allocator only ever frees the block itself.
pub(crate) struct RegularBlock<T, D: Deleter<T>, A: BlockAlloc> {
    header: BlockHeader,
    object: *mut T,

    /// `Some` until `destroy_object` takes it.
    deleter: Option<D>,
    alloc: A,
}

impl<T, D: Deleter<T>, A: BlockAlloc> RegularBlock<T, D, A> {
    /// Allocates a block via `alloc`, adopting `object`.
    ///
    /// On error nothing has been constructed and `object` is untouched.
    pub(crate) fn try_allocate(
        object: *mut T,
        deleter: D,
        alloc: A,
    ) -> Result<NonNull<Self>, AllocError> {
        let block = alloc.allocate(Layout::new::<Self>())?.cast::<Self>();

        // Safety: freshly allocated for exactly one `Self`.
        unsafe {
            block.as_ptr().write(Self {
                header: BlockHeader::new(),
                object,
                deleter: Some(deleter),
                alloc,
            });
        }

        Ok(block)
    }
}

impl<T, D: Deleter<T>, A: BlockAlloc> ControlBlock for RegularBlock<T, D, A> {
    fn header(&self) -> &BlockHeader {
        &self.header
    }

    unsafe fn destroy_object(&mut self) {
        let deleter = self.deleter.take();
        debug_assert!(deleter.is_some(), "destroy_object ran twice");

        if let Some(deleter) = deleter {
            // Safety: `object` is the pointer adopted alongside `deleter`,
            // and this is the only call site that consumes it.
            unsafe { deleter.delete(self.object) };
        }
    }

    unsafe fn destroy_and_deallocate_block(&mut self) {
        let alloc = self.alloc.clone();

        // Safety: the caller promises both counters are zero and that the
        // block is never touched again.
        unsafe { drop_and_release(self, alloc) };
    }
}

// === EmbeddedBlock === //

/// Control block that co-locates the managed object with the counters in a
/// single allocation.
pub(crate) struct EmbeddedBlock<T, A: BlockAlloc> {
    header: BlockHeader,

    /// Initialized from construction until `destroy_object` runs. Kept as
    /// `MaybeUninit` so that dropping the block does not drop the object a
    /// second time.
    storage: MaybeUninit<T>,
    alloc: A,
}

impl<T, A: BlockAlloc> EmbeddedBlock<T, A> {
    /// Allocates a block via `alloc` and constructs the managed object in
    /// place from `init`.
    ///
    /// If `init` unwinds, the block storage is returned to the allocator
    /// before the panic escapes.
    pub(crate) fn try_allocate(
        init: impl FnOnce() -> T,
        alloc: A,
    ) -> Result<NonNull<Self>, AllocError> {
        let layout = Layout::new::<Self>();
        let block = alloc.allocate(layout)?.cast::<Self>();

        let guard = scopeguard::guard(alloc, |alloc| {
            // Nothing in the block has been initialized yet; only the raw
            // storage needs to be returned.
            unsafe { alloc.deallocate(block.cast(), layout) };
        });

        let value = init();
        let alloc = ScopeGuard::into_inner(guard);

        // Safety: freshly allocated for exactly one `Self`.
        unsafe {
            block.as_ptr().write(Self {
                header: BlockHeader::new(),
                storage: MaybeUninit::new(value),
                alloc,
            });
        }

        Ok(block)
    }

    /// Pointer to the in-place object.
    ///
    /// ## Safety
    ///
    /// `block` must point to a live allocation of `Self`.
    pub(crate) unsafe fn object_ptr(block: NonNull<Self>) -> NonNull<T> {
        // Safety: in-bounds projection into the block's storage field.
        unsafe { NonNull::new_unchecked((&raw mut (*block.as_ptr()).storage).cast::<T>()) }
    }
}

impl<T, A: BlockAlloc> ControlBlock for EmbeddedBlock<T, A> {
    fn header(&self) -> &BlockHeader {
        &self.header
    }

    unsafe fn destroy_object(&mut self) {
        // Safety: the storage is initialized until the first (and only)
        // `destroy_object` call.
        unsafe { self.storage.assume_init_drop() };
    }

    unsafe fn destroy_and_deallocate_block(&mut self) {
        let alloc = self.alloc.clone();

        // Safety: the caller promises both counters are zero and that the
        // block is never touched again.
        unsafe { drop_and_release(self, alloc) };
    }
}

// === RawHandle === //

/// The engaged state shared by both handle flavors: a type-erased control
/// block and the object it manages.
///
/// Handles store an `Option<RawHandle<T>>`, which encodes in the type system
/// that the block pointer and the object pointer are null or non-null
/// together.
#[derive_where(Copy, Clone)]
pub(crate) struct RawHandle<T> {
    pub(crate) block: NonNull<dyn ControlBlock>,
    pub(crate) object: NonNull<T>,
}

impl<T> RawHandle<T> {
    pub(crate) fn header(&self) -> &BlockHeader {
        // Safety: an engaged handle counts toward one of the block's
        // counters, which keeps the block allocated.
        unsafe { self.block.as_ref() }.header()
    }
}
