use std::{
    alloc::Layout,
    cell::Cell,
    mem,
    panic::{self, AssertUnwindSafe},
    ptr::NonNull,
    rc::Rc,
};

use bumpalo::Bump;

use crate::{AllocError, BlockAlloc, Global, Strong, Weak};

// === Fixtures === //

struct Trace {
    drops: Rc<Cell<usize>>,
}

impl Trace {
    fn new() -> (Self, Rc<Cell<usize>>) {
        let drops = Rc::new(Cell::new(0));

        (
            Self {
                drops: drops.clone(),
            },
            drops,
        )
    }
}

impl Drop for Trace {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[derive(Clone, Default)]
struct CountingAlloc {
    stats: Rc<AllocStats>,
}

#[derive(Default)]
struct AllocStats {
    allocs: Cell<usize>,
    deallocs: Cell<usize>,
    last_layout: Cell<Option<Layout>>,
}

impl BlockAlloc for CountingAlloc {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.stats.allocs.set(self.stats.allocs.get() + 1);
        self.stats.last_layout.set(Some(layout));

        Global.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        self.stats.deallocs.set(self.stats.deallocs.get() + 1);

        unsafe { Global.deallocate(ptr, layout) };
    }
}

#[derive(Clone)]
struct FailingAlloc;

impl BlockAlloc for FailingAlloc {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        Err(AllocError::new(layout))
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {
        unreachable!("failing allocator never allocates");
    }
}

// === Strong handle === //

#[test]
fn new_and_deref() {
    let p = Strong::new(42);

    assert_eq!(*p, 42);
    assert_eq!(p.get(), Some(&42));
    assert!(!p.as_ptr().is_null());
    assert!(!p.is_empty());
    assert_eq!(p.use_count(), 1);
    assert_eq!(p.weak_count(), 0);
}

#[test]
fn empty_handle() {
    let mut p = Strong::<u32>::empty();

    assert!(p.is_empty());
    assert_eq!(p.get(), None);
    assert!(p.as_ptr().is_null());
    assert_eq!(p.use_count(), 0);
    assert_eq!(p.weak_count(), 0);

    // Resetting an empty handle is a no-op.
    p.reset();
    assert!(p.is_empty());

    assert!(Strong::<u32>::default().is_empty());
}

#[test]
fn clone_shares_and_drop_returns() {
    let (trace, drops) = Trace::new();

    let p = Strong::new(trace);
    let q = p.clone();
    let r = p.clone();

    assert_eq!(p.use_count(), 3);
    assert_eq!(q.use_count(), 3);
    assert_eq!(r.use_count(), 3);

    drop(q);
    assert_eq!(p.use_count(), 2);
    assert_eq!(drops.get(), 0);

    drop(r);
    assert_eq!(p.use_count(), 1);
    assert_eq!(drops.get(), 0);

    drop(p);
    assert_eq!(drops.get(), 1);
}

#[test]
fn move_preserves_address_and_count() {
    let p = Strong::new(7u32);
    let addr = p.as_ptr();

    let q = p;
    assert_eq!(q.as_ptr(), addr);
    assert_eq!(q.use_count(), 1);

    let p = q;
    assert_eq!(p.as_ptr(), addr);
    assert_eq!(p.use_count(), 1);
}

#[test]
fn reset_releases_share() {
    let (trace, drops) = Trace::new();

    let mut p = Strong::new(trace);
    let q = p.clone();

    p.reset();
    assert!(p.is_empty());
    assert_eq!(q.use_count(), 1);
    assert_eq!(drops.get(), 0);

    let mut q = q;
    q.reset();
    assert_eq!(drops.get(), 1);
}

#[test]
fn assign_replaces_share() {
    let (first, first_drops) = Trace::new();
    let (second, second_drops) = Trace::new();

    let mut a = Strong::new(first);
    let b = Strong::new(second);

    // Copy-assignment: the old share is released only after the new one is
    // in place.
    a = b.clone();
    assert_eq!(first_drops.get(), 1);
    assert_eq!(a.use_count(), 2);
    assert_eq!(b.use_count(), 2);

    // Self-assignment must be harmless.
    a = a.clone();
    assert_eq!(a.use_count(), 2);
    assert_eq!(second_drops.get(), 0);

    // Move-assignment releases the destination's share and leaves counters
    // otherwise untouched.
    a = b;
    assert_eq!(a.use_count(), 1);
    assert_eq!(second_drops.get(), 0);
}

#[test]
fn swap_keeps_counts() {
    let p = Strong::new(1u32);
    let mut a = p.clone();
    let mut b = Strong::new(2u32);

    mem::swap(&mut a, &mut b);

    assert_eq!(*a, 2);
    assert_eq!(*b, 1);
    assert_eq!(b.use_count(), 2);
    assert_eq!(a.use_count(), 1);
}

#[test]
#[should_panic = "attempted to dereference an empty handle"]
fn deref_empty_panics() {
    let p = Strong::<u32>::empty();
    let _value = *p;
}

// === Weak handle === //

#[test]
fn weak_observes_without_owning() {
    let (trace, drops) = Trace::new();

    let p = Strong::new(trace);
    let w = p.downgrade();

    // Downgrading must not change the strong count.
    assert_eq!(p.use_count(), 1);
    assert_eq!(p.weak_count(), 1);
    assert!(!w.expired());

    drop(p);

    // The value dies with its last owner, observers notwithstanding.
    assert_eq!(drops.get(), 1);
    assert!(w.expired());
    assert!(w.upgrade().is_none());
}

#[test]
fn weak_block_outlives_object() {
    let (trace, drops) = Trace::new();
    let alloc = CountingAlloc::default();
    let stats = alloc.stats.clone();

    let p = Strong::try_new_in(trace, alloc).unwrap();
    let w = p.downgrade();

    assert_eq!(stats.allocs.get(), 1);

    drop(p);

    // Object destroyed, block still allocated for the observer.
    assert_eq!(drops.get(), 1);
    assert_eq!(stats.deallocs.get(), 0);
    assert!(w.expired());

    drop(w);

    // Last observer gone: block deallocated exactly then.
    assert_eq!(stats.deallocs.get(), 1);
}

#[test]
fn upgrade_keeps_value_alive() {
    let (trace, drops) = Trace::new();

    let p = Strong::new(trace);
    let w = p.downgrade();

    let q = w.upgrade().unwrap();
    assert_eq!(q.use_count(), 2);

    drop(p);

    assert_eq!(drops.get(), 0);
    assert_eq!(q.use_count(), 1);
    assert!(!w.expired());

    drop(q);

    assert_eq!(drops.get(), 1);
    assert!(w.expired());
}

#[test]
fn lock_is_unchecked_upgrade() {
    let p = Strong::new(5u32);
    let w = p.downgrade();

    let q = unsafe { w.lock() };

    assert_eq!(*q, 5);
    assert_eq!(p.use_count(), 2);
}

#[test]
fn weak_clone_counts() {
    let p = Strong::new(0u32);

    let w1 = p.downgrade();
    let mut w2 = w1.clone();

    assert_eq!(p.weak_count(), 2);

    drop(w1);
    assert_eq!(p.weak_count(), 1);

    w2.reset();
    assert!(w2.is_empty());
    assert_eq!(p.weak_count(), 0);
}

#[test]
fn empty_weak() {
    let w = Weak::<u32>::empty();

    assert!(w.is_empty());
    assert!(w.expired());
    assert!(w.upgrade().is_none());

    let w2 = w.clone();
    assert!(w2.is_empty());

    assert!(Weak::<u32>::default().is_empty());
}

// === Deleters === //

#[test]
fn custom_deleter_runs_once_with_original_pointer() {
    let (trace, drops) = Trace::new();
    let calls = Rc::new(Cell::new(0));
    let object = Box::into_raw(Box::new(trace));

    let p = unsafe {
        Strong::from_raw_with(object, {
            let calls = calls.clone();
            move |ptr: *mut Trace| {
                assert_eq!(ptr, object);
                calls.set(calls.get() + 1);
            }
        })
    };

    assert_eq!(p.use_count(), 1);
    drop(p);

    // The deleter replaced destruction wholesale; the value itself was not
    // touched.
    assert_eq!(calls.get(), 1);
    assert_eq!(drops.get(), 0);

    drop(unsafe { Box::from_raw(object) });
    assert_eq!(drops.get(), 1);
}

#[test]
fn box_deleter_frees_adopted_allocation() {
    let (trace, drops) = Trace::new();
    let object = Box::into_raw(Box::new(trace));

    let p = unsafe { Strong::from_raw(object) };
    let q = p.clone();

    drop(p);
    assert_eq!(drops.get(), 0);

    drop(q);
    assert_eq!(drops.get(), 1);
}

// === Allocators === //

#[test]
fn factory_is_a_single_allocation() {
    let alloc = CountingAlloc::default();
    let stats = alloc.stats.clone();

    let p = Strong::try_new_in(9u64, alloc).unwrap();

    assert_eq!(stats.allocs.get(), 1);

    // The one allocation holds the value, both counters, and the allocator.
    let layout = stats.last_layout.get().unwrap();
    assert!(layout.size() >= size_of::<u64>() + 2 * size_of::<usize>());

    drop(p);
    assert_eq!(stats.deallocs.get(), 1);
}

#[test]
fn allocation_failure_leaves_no_trace() {
    let (trace, drops) = Trace::new();

    assert!(Strong::try_new_in(trace, FailingAlloc).is_err());

    // The moved-in value is dropped as an ordinary value, not leaked.
    assert_eq!(drops.get(), 1);
}

#[test]
fn alloc_error_reports_layout() {
    let err = Strong::try_new_in(0u32, FailingAlloc).unwrap_err();

    assert!(err.layout().size() >= size_of::<u32>());
    assert!(format!("{err}").contains("failed to allocate"));
}

#[test]
fn init_unwind_releases_block() {
    let alloc = CountingAlloc::default();
    let stats = alloc.stats.clone();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        Strong::<u32>::try_new_with_in(|| panic!("init failed"), alloc)
    }));

    assert!(result.is_err());
    assert_eq!(stats.allocs.get(), 1);
    assert_eq!(stats.deallocs.get(), 1);
}

#[test]
fn bump_arena_blocks() {
    let arena = Rc::new(Bump::new());

    let p = Strong::try_new_in(1u32, arena.clone()).unwrap();
    let q = Strong::try_new_in(2u32, arena.clone()).unwrap();
    let w = p.downgrade();

    assert_eq!(*p + *q, 3);

    drop(p);
    assert!(w.expired());

    drop(q);
    drop(w);

    // Every block has released its clone of the arena handle.
    assert_eq!(Rc::strong_count(&arena), 1);
}
