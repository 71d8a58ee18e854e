use std::{
  mem,
  sync::{Mutex, MutexGuard, PoisonError},
};

/// Locks `mutex`, recovering the guard if a previous holder panicked.
///
/// Every critical section in this crate leaves its data consistent before it
/// calls out, so a poisoned lock carries no torn state.
pub(crate) fn lock_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Short type name used in log records.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
  let full = std::any::type_name::<T>();
  let base = full.split('<').next().unwrap_or(full);
  base.rsplit("::").next().unwrap_or(base)
}

/// Address marking a sealed atomic pointer. Boxes stored in such pointers
/// are at least 2-aligned, so no live box can have it.
const SEALED: usize = 1;

/// The decoded state of an atomic pointer that owns a box: never set,
/// holding one, or sealed for good.
pub(crate) enum Tagged<T> {
  Empty,
  Holding(*mut T),
  Sealed,
}

impl<T> Tagged<T> {
  #[inline]
  pub(crate) fn decode(raw: *mut T) -> Self {
    debug_assert!(mem::align_of::<T>() > SEALED);
    if raw.is_null() {
      Tagged::Empty
    } else if raw as usize == SEALED {
      Tagged::Sealed
    } else {
      Tagged::Holding(raw)
    }
  }

  /// The raw value of [`Tagged::Sealed`].
  #[inline]
  pub(crate) fn sealed() -> *mut T { SEALED as *mut T }
}
