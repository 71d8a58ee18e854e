use std::{
  fmt, ptr,
  sync::atomic::{AtomicPtr, Ordering},
};

use super::{BoxedDisposable, Disposable};
use crate::{error::protocol_violation, util::Tagged};

/// Observable state of a [`DisposableSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
  Unset,
  Set,
  Disposed,
}

type Slot = Tagged<BoxedDisposable>;

/// A reference to at most one disposable, swapped atomically.
///
/// Once the slot is disposed it stays disposed: anything stored afterwards is
/// disposed immediately instead of being kept.
pub struct DisposableSlot {
  current: AtomicPtr<BoxedDisposable>,
}

impl DisposableSlot {
  pub const fn new() -> Self { Self { current: AtomicPtr::new(ptr::null_mut()) } }

  pub fn state(&self) -> SlotState {
    match Slot::decode(self.current.load(Ordering::Acquire)) {
      Slot::Empty => SlotState::Unset,
      Slot::Holding(_) => SlotState::Set,
      Slot::Sealed => SlotState::Disposed,
    }
  }

  /// Stores `d` if the slot was never set.
  ///
  /// Setting an already set slot is a protocol violation: `d` is disposed and
  /// the violation is logged. A disposed slot disposes `d` silently.
  pub fn set_once(&self, d: BoxedDisposable) -> bool {
    let raw = Box::into_raw(Box::new(d));
    match self.current.compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire) {
      Ok(_) => true,
      Err(current) => {
        // SAFETY: `raw` lost the race and was never published.
        unsafe { Box::from_raw(raw) }.dispose();
        if let Slot::Holding(_) = Slot::decode(current) {
          protocol_violation("disposable already set, the new one was disposed");
        }
        false
      }
    }
  }

  /// Stores `d` and disposes whatever was there before.
  pub fn set(&self, d: BoxedDisposable) -> bool { self.swap_in(d, true) }

  /// Stores `d` and drops whatever was there before without disposing it.
  pub fn replace(&self, d: BoxedDisposable) -> bool { self.swap_in(d, false) }

  /// Marks the slot disposed and forgets the current content without
  /// disposing it.
  pub fn weak_dispose(&self) -> bool {
    match self.seal() {
      Slot::Sealed => false,
      Slot::Empty => true,
      Slot::Holding(prev) => {
        // SAFETY: the seal moved ownership of `prev` to us.
        drop(unsafe { Box::from_raw(prev) });
        true
      }
    }
  }

  #[inline]
  fn seal(&self) -> Slot { Slot::decode(self.current.swap(Slot::sealed(), Ordering::AcqRel)) }

  fn swap_in(&self, d: BoxedDisposable, dispose_previous: bool) -> bool {
    let raw = Box::into_raw(Box::new(d));
    let mut current = self.current.load(Ordering::Acquire);
    loop {
      if let Slot::Sealed = Slot::decode(current) {
        // SAFETY: `raw` was never published.
        unsafe { Box::from_raw(raw) }.dispose();
        return false;
      }
      match self.current.compare_exchange_weak(current, raw, Ordering::AcqRel, Ordering::Acquire) {
        Ok(prev) => {
          if let Slot::Holding(prev) = Slot::decode(prev) {
            // SAFETY: the successful exchange moved ownership of `prev` to us.
            let prev = unsafe { Box::from_raw(prev) };
            if dispose_previous {
              prev.dispose();
            }
          }
          return true;
        }
        Err(actual) => current = actual,
      }
    }
  }
}

impl Default for DisposableSlot {
  fn default() -> Self { Self::new() }
}

impl Disposable for DisposableSlot {
  fn dispose(&self) {
    if let Slot::Holding(prev) = self.seal() {
      // SAFETY: the seal moved ownership of `prev` to us.
      unsafe { Box::from_raw(prev) }.dispose();
    }
  }

  #[inline]
  fn is_disposed(&self) -> bool { self.state() == SlotState::Disposed }
}

impl Drop for DisposableSlot {
  fn drop(&mut self) {
    if let Slot::Holding(current) = Slot::decode(*self.current.get_mut()) {
      // SAFETY: exclusive access through `&mut self`.
      drop(unsafe { Box::from_raw(current) });
    }
  }
}

impl fmt::Debug for DisposableSlot {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DisposableSlot").field("state", &self.state()).finish()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::disposable::BooleanDisposable;

  fn flag() -> (Arc<BooleanDisposable>, BoxedDisposable) {
    let d = Arc::new(BooleanDisposable::new());
    (d.clone(), Box::new(d))
  }

  #[rxcore_macro::test]
  fn set_once_rejects_second() {
    let slot = DisposableSlot::new();
    let (first, boxed) = flag();
    assert!(slot.set_once(boxed));
    assert_eq!(slot.state(), SlotState::Set);

    let (second, boxed) = flag();
    assert!(!slot.set_once(boxed));
    assert!(second.is_disposed());
    assert!(!first.is_disposed());
  }

  #[rxcore_macro::test]
  fn unset_slot_goes_straight_to_disposed() {
    let slot = DisposableSlot::new();
    assert_eq!(slot.state(), SlotState::Unset);
    assert!(slot.weak_dispose());
    assert_eq!(slot.state(), SlotState::Disposed);

    let (d, boxed) = flag();
    assert!(!slot.set_once(boxed));
    assert!(d.is_disposed());
    assert_eq!(slot.state(), SlotState::Disposed);
  }

  #[rxcore_macro::test]
  fn set_after_dispose_disposes_incoming() {
    let slot = DisposableSlot::new();
    slot.dispose();
    assert_eq!(slot.state(), SlotState::Disposed);

    let (d, boxed) = flag();
    assert!(!slot.set(boxed));
    assert!(d.is_disposed());
  }

  #[rxcore_macro::test]
  fn set_disposes_previous_replace_does_not() {
    let slot = DisposableSlot::new();
    let (a, boxed) = flag();
    slot.set(boxed);
    let (b, boxed) = flag();
    slot.set(boxed);
    assert!(a.is_disposed());

    let (c, boxed) = flag();
    slot.replace(boxed);
    assert!(!b.is_disposed());

    slot.dispose();
    assert!(c.is_disposed());
  }

  #[rxcore_macro::test]
  fn weak_dispose_leaves_content_alone() {
    let slot = DisposableSlot::new();
    let (d, boxed) = flag();
    slot.set(boxed);
    assert!(slot.weak_dispose());
    assert!(!slot.weak_dispose());
    assert!(slot.is_disposed());
    assert!(!d.is_disposed());
  }

  #[rxcore_macro::test]
  fn dispose_is_idempotent() {
    let slot = DisposableSlot::new();
    let (d, boxed) = flag();
    slot.set_once(boxed);
    slot.dispose();
    slot.dispose();
    assert!(d.is_disposed());
    assert!(slot.is_disposed());
  }
}
