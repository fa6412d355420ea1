use std::{alloc, alloc::Layout, ptr::NonNull, rc::Rc};

use bumpalo::Bump;
use thiserror::Error;

// === AllocError === //

/// Failure to obtain storage for a control block.
///
/// Carries the [`Layout`] that could not be satisfied.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
#[error("failed to allocate {} bytes for a control block", .layout.size())]
pub struct AllocError {
    layout: Layout,
}

impl AllocError {
    pub(crate) fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// The layout the allocator could not satisfy.
    pub fn layout(&self) -> Layout {
        self.layout
    }
}

// === BlockAlloc === //

/// Source of storage for control blocks.
///
/// Implementations are stored by value inside the block they allocated and a
/// clone performs the matching [`deallocate`](BlockAlloc::deallocate) with
/// the same layout, so clones must be interchangeable with the original.
pub trait BlockAlloc: Clone {
    /// Obtains storage for `layout`.
    ///
    /// Control blocks are never zero-sized; implementations may reject
    /// zero-size layouts with an error.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Returns storage to the allocator.
    ///
    /// ## Safety
    ///
    /// `ptr` must have been returned by [`allocate`](BlockAlloc::allocate)
    /// on this allocator (or a clone of it) with the same `layout`, and must
    /// not be used afterwards.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

// === Global === //

/// The default block allocator, backed by [`std::alloc`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct Global;

impl BlockAlloc for Global {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            return Err(AllocError::new(layout));
        }

        // Safety: the layout is non-zero-sized.
        NonNull::new(unsafe { alloc::alloc(layout) }).ok_or(AllocError::new(layout))
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // Safety: `ptr` came from `alloc::alloc` with this layout, per the
        // trait contract.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

// === Bump arenas === //

/// Carves control blocks out of a shared [`Bump`] arena.
///
/// Deallocation is a no-op; the arena reclaims all of its storage at once
/// when the last `Rc<Bump>` clone is dropped. The clone stored inside each
/// block keeps the arena alive at least that long.
impl BlockAlloc for Rc<Bump> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.try_alloc_layout(layout)
            .map_err(|_| AllocError::new(layout))
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}
}
