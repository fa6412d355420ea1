use std::fmt;

use derive_where::derive_where;

use crate::{Strong, block::RawHandle};

// === Weak === //

/// A non-owning handle observing a shared value.
///
/// Weak handles do not extend the value's lifetime: the value dies with its
/// last [`Strong`] handle regardless of how many weak handles remain. What a
/// weak handle does keep alive is the control block, so that
/// [`Weak::expired`] and [`Weak::upgrade`] stay answerable after the value
/// is gone.
///
/// ```
/// use tether::Strong;
///
/// let strong = Strong::new("shared");
/// let weak = strong.downgrade();
///
/// assert!(!weak.expired());
/// assert_eq!(*weak.upgrade().unwrap(), "shared");
///
/// drop(strong);
///
/// assert!(weak.expired());
/// assert!(weak.upgrade().is_none());
/// ```
#[derive_where(Default)]
pub struct Weak<T> {
    raw: Option<RawHandle<T>>,
}

impl<T> Weak<T> {
    /// Creates an empty handle observing nothing.
    ///
    /// [`Weak::expired`] reports `true` for it.
    pub const fn empty() -> Self {
        Self { raw: None }
    }

    pub(crate) fn from_raw_handle(raw: Option<RawHandle<T>>) -> Self {
        Self { raw }
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_none()
    }

    /// Whether the observed value has been destroyed. Empty handles report
    /// `true`.
    pub fn expired(&self) -> bool {
        self.raw.is_none_or(|raw| raw.header().strong() == 0)
    }

    /// Attempts to upgrade to an owning handle, returning `None` if the
    /// value has already been destroyed or the handle is empty.
    pub fn upgrade(&self) -> Option<Strong<T>> {
        let raw = self.raw?;

        if raw.header().strong() == 0 {
            return None;
        }

        raw.header().inc_strong();

        Some(Strong::from_raw_handle(raw))
    }

    /// Fabricates an owning handle, incrementing the strong count without
    /// checking [`Weak::expired`] first.
    ///
    /// Prefer [`Weak::upgrade`]; this exists for callers that can prove
    /// liveness and want to skip the check.
    ///
    /// ## Safety
    ///
    /// The handle must be engaged and the observed value must not have been
    /// destroyed: locking an expired handle would revive a dead object.
    #[track_caller]
    pub unsafe fn lock(&self) -> Strong<T> {
        debug_assert!(!self.expired(), "locked an expired weak handle");

        // Safety: engaged per the caller contract.
        let raw = unsafe { self.raw.unwrap_unchecked() };

        raw.header().inc_strong();

        Strong::from_raw_handle(raw)
    }

    /// Drops this handle's observation and becomes empty.
    ///
    /// If this was the last handle of any kind, the control block is freed
    /// here. A no-op on an already-empty handle.
    pub fn reset(&mut self) {
        *self = Self::empty();
    }
}

impl<T> Clone for Weak<T> {
    /// Observes the same value, incrementing the weak count.
    fn clone(&self) -> Self {
        if let Some(raw) = self.raw {
            raw.header().inc_weak();
        }

        Self { raw: self.raw }
    }
}

impl<T> Drop for Weak<T> {
    fn drop(&mut self) {
        let Some(raw) = self.raw.take() else {
            return;
        };

        if raw.header().dec_weak() > 0 {
            return;
        }

        if raw.header().strong() > 0 {
            return;
        }

        // Last observer of an already-destroyed value: the block goes too.
        let mut block = raw.block;

        // Safety: both counters are zero, and `destroy_object` already ran
        // when the strong count hit zero.
        unsafe { block.as_mut().destroy_and_deallocate_block() };
    }
}

impl<T> fmt::Debug for Weak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Weak").finish_non_exhaustive()
    }
}
