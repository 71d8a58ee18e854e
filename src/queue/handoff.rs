use std::{
  ptr,
  sync::atomic::{AtomicPtr, Ordering},
};

/// A single-slot cell that transfers ownership of one value between threads.
///
/// `put` and `take` are a CAS and a swap on one pointer, so whichever side
/// wins the race owns the value and the loser sees `None`/`Err`. Operators
/// use it when the decision of who consumes a value (a fused downstream or
/// the operator's own drain loop) is made after the value already exists.
pub struct Handoff<T> {
  slot: AtomicPtr<T>,
}

impl<T> Handoff<T> {
  /// An empty cell.
  pub const fn empty() -> Self { Self { slot: AtomicPtr::new(ptr::null_mut()) } }

  /// A cell already holding `value`.
  pub fn new(value: T) -> Self { Self { slot: AtomicPtr::new(Box::into_raw(Box::new(value))) } }

  /// Stores `value` if the cell is empty, otherwise hands it back.
  pub fn put(&self, value: T) -> Result<(), T> {
    let raw = Box::into_raw(Box::new(value));
    match self.slot.compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire) {
      Ok(_) => Ok(()),
      // SAFETY: `raw` was never published, we still own it.
      Err(_) => Err(*unsafe { Box::from_raw(raw) }),
    }
  }

  /// Takes the value out, leaving the cell empty.
  pub fn take(&self) -> Option<T> {
    let raw = self.slot.swap(ptr::null_mut(), Ordering::AcqRel);
    if raw.is_null() {
      None
    } else {
      // SAFETY: the swap removed the pointer from the cell, nobody else can
      // observe it anymore.
      Some(*unsafe { Box::from_raw(raw) })
    }
  }

  pub fn is_empty(&self) -> bool { self.slot.load(Ordering::Acquire).is_null() }
}

impl<T> Default for Handoff<T> {
  fn default() -> Self { Self::empty() }
}

impl<T> Drop for Handoff<T> {
  fn drop(&mut self) {
    let raw = *self.slot.get_mut();
    if !raw.is_null() {
      // SAFETY: exclusive access through `&mut self`.
      drop(unsafe { Box::from_raw(raw) });
    }
  }
}

// SAFETY: the value only ever moves between threads as a whole, it is never
// shared, so `T: Send` is enough for both.
unsafe impl<T: Send> Send for Handoff<T> {}
unsafe impl<T: Send> Sync for Handoff<T> {}

#[cfg(test)]
mod tests {
  use std::{sync::Arc, thread};

  use super::*;

  #[rxcore_macro::test]
  fn put_then_take() {
    let cell = Handoff::empty();
    assert!(cell.is_empty());
    assert!(cell.put(1).is_ok());
    assert_eq!(cell.put(2), Err(2));
    assert_eq!(cell.take(), Some(1));
    assert_eq!(cell.take(), None);
  }

  #[rxcore_macro::test]
  fn drop_releases_value() {
    let value = Arc::new(());
    let cell = Handoff::new(value.clone());
    assert_eq!(Arc::strong_count(&value), 2);
    drop(cell);
    assert_eq!(Arc::strong_count(&value), 1);
  }

  #[rxcore_macro::test]
  fn only_one_taker_wins() {
    for _ in 0..100 {
      let cell = Arc::new(Handoff::new(7));
      let handles: Vec<_> = (0..4)
        .map(|_| {
          let cell = cell.clone();
          thread::spawn(move || cell.take())
        })
        .collect();
      let won: Vec<_> = handles.into_iter().filter_map(|h| h.join().unwrap()).collect();
      assert_eq!(won, vec![7]);
    }
  }
}
