//! Shared ownership with deterministic destruction.
//!
//! This crate provides two cooperating handle types over heap-allocated
//! values: [`Strong`], which owns a share of the value's lifetime, and
//! [`Weak`], which observes the value without keeping it alive.
//!
//! ```
//! use tether::Strong;
//!
//! let first = Strong::new(vec![1, 2, 3]);
//! let second = first.clone();
//! let observer = first.downgrade();
//!
//! assert_eq!(first.use_count(), 2);
//! assert_eq!(second[0], 1);
//!
//! drop(first);
//! drop(second);
//!
//! // Both owners are gone: the vector has been destroyed.
//! assert!(observer.expired());
//! assert!(observer.upgrade().is_none());
//! ```
//!
//! # Lifecycle
//!
//! Every engaged handle points at a *control block* holding two counters:
//! the number of live strong handles and the number of live weak handles.
//! The block is created together with its first strong handle, already
//! counting it. From there:
//!
//! - Cloning a strong handle increments the strong count; cloning a weak
//!   handle increments the weak count. Moves change neither.
//! - When the strong count reaches zero, the managed value is destroyed
//!   immediately. The block itself stays allocated while weak handles
//!   remain, so [`Weak::expired`] and [`Weak::upgrade`] keep working.
//! - When both counts reach zero, the block is returned to the allocator it
//!   came from.
//!
//! Destroying the value and freeing the block are separate events; they
//! coincide only when no weak observer outlives the last owner.
//!
//! # Construction
//!
//! [`Strong::new`] (and its `_in`/`try_` variants) is the preferred path: it
//! places the value *inside* the control block, so the value, the counters,
//! and the destruction logic share a single allocation.
//!
//! Alternatively, an existing allocation can be adopted with
//! [`Strong::from_raw`] or [`Strong::from_raw_with`]. Adopted allocations
//! are destroyed by a [`Deleter`] ([`BoxDeleter`] by default, or any
//! `FnOnce(*mut T)` closure), which runs exactly once when the last strong
//! handle departs. The deleter and the allocator are erased into the control
//! block: `Strong<T>` is parameterized by the value type alone.
//!
//! # Allocators
//!
//! Control blocks are carved out of a [`BlockAlloc`]: [`Global`] by default,
//! or e.g. a [`bumpalo`] arena shared through an `Rc`:
//!
//! ```
//! use std::rc::Rc;
//!
//! use bumpalo::Bump;
//! use tether::Strong;
//!
//! let arena = Rc::new(Bump::new());
//! let value = Strong::try_new_in(7u32, arena.clone()).unwrap();
//!
//! assert_eq!(*value, 7);
//! ```
//!
//! # Single-threading
//!
//! The counters are plain integers and the handles hold raw pointers, so
//! `Strong` and `Weak` are `!Send` and `!Sync`. There is no atomic variant.

mod alloc;
pub use self::alloc::*;

mod block;

mod deleter;
pub use self::deleter::*;

mod strong;
pub use self::strong::*;

mod weak;
pub use self::weak::*;

#[cfg(test)]
mod tests;
