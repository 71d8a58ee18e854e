//! Lock-free containers for the error an operator will eventually emit.
use std::{
  ptr,
  sync::atomic::{AtomicPtr, Ordering},
};

use crate::{
  error::{undeliverable, ErrorComposite},
  util::Tagged,
};

/// How an operator with several sources treats their errors.
pub enum ErrorMode<E> {
  /// The first error terminates everything.
  FirstWins,
  /// Errors are collected and folded with the function once all sources are
  /// done.
  Delay(fn(Vec<E>) -> E),
}

impl<E: ErrorComposite> ErrorMode<E> {
  pub fn delay() -> Self { ErrorMode::Delay(E::compose) }
}

impl<E> ErrorMode<E> {
  pub fn is_delay(&self) -> bool { matches!(self, ErrorMode::Delay(_)) }
}

impl<E> Clone for ErrorMode<E> {
  fn clone(&self) -> Self { *self }
}

impl<E> Copy for ErrorMode<E> {}

impl<E> Default for ErrorMode<E> {
  fn default() -> Self { ErrorMode::FirstWins }
}

/// Boxed error. The alignment keeps zero-sized and byte-sized errors clear
/// of the sealed tag.
#[repr(align(2))]
struct Held<E>(E);

/// A set-once error reference.
///
/// `terminate` takes the error out and seals the slot; later `try_set` calls
/// fail, so an error can be delivered at most once.
pub struct FirstError<E> {
  slot: AtomicPtr<Held<E>>,
}

impl<E> FirstError<E> {
  pub const fn new() -> Self { Self { slot: AtomicPtr::new(ptr::null_mut()) } }

  #[inline]
  fn load(&self) -> Tagged<Held<E>> { Tagged::decode(self.slot.load(Ordering::Acquire)) }

  /// Stores `error` if no error was stored and the slot is not terminated.
  pub fn try_set(&self, error: E) -> Result<(), E> {
    let raw = Box::into_raw(Box::new(Held(error)));
    match self.slot.compare_exchange(ptr::null_mut(), raw, Ordering::AcqRel, Ordering::Acquire) {
      Ok(_) => Ok(()),
      // SAFETY: `raw` was never published.
      Err(_) => Err(unsafe { Box::from_raw(raw) }.0),
    }
  }

  /// Seals the slot and returns the stored error, if any. Only the first
  /// call can observe it.
  pub fn terminate(&self) -> Option<E> {
    match Tagged::decode(self.slot.swap(Tagged::sealed(), Ordering::AcqRel)) {
      // SAFETY: the swap moved ownership to us.
      Tagged::Holding(prev) => Some(unsafe { Box::from_raw(prev) }.0),
      Tagged::Empty | Tagged::Sealed => None,
    }
  }

  pub fn has_error(&self) -> bool { matches!(self.load(), Tagged::Holding(_)) }

  pub fn is_terminated(&self) -> bool { matches!(self.load(), Tagged::Sealed) }
}

impl<E> Default for FirstError<E> {
  fn default() -> Self { Self::new() }
}

impl<E> Drop for FirstError<E> {
  fn drop(&mut self) {
    if let Tagged::Holding(current) = Tagged::decode(*self.slot.get_mut()) {
      // SAFETY: `&mut self`.
      drop(unsafe { Box::from_raw(current) });
    }
  }
}

// SAFETY: the error is only moved in and out whole.
unsafe impl<E: Send> Send for FirstError<E> {}
unsafe impl<E: Send> Sync for FirstError<E> {}

struct Node<E> {
  error: E,
  next: *mut Node<E>,
}

/// Collects every error pushed into it, lock free, until terminated.
pub struct ErrorAccumulator<E> {
  head: AtomicPtr<Node<E>>,
}

impl<E> ErrorAccumulator<E> {
  pub const fn new() -> Self { Self { head: AtomicPtr::new(ptr::null_mut()) } }

  #[inline]
  fn load(&self) -> Tagged<Node<E>> { Tagged::decode(self.head.load(Ordering::Acquire)) }

  /// Appends `error`, or hands it back once terminated.
  pub fn add(&self, error: E) -> Result<(), E> {
    let node = Box::into_raw(Box::new(Node { error, next: ptr::null_mut() }));
    let mut head = self.head.load(Ordering::Acquire);
    loop {
      if let Tagged::Sealed = Tagged::decode(head) {
        // SAFETY: `node` was never published.
        return Err(unsafe { Box::from_raw(node) }.error);
      }
      // SAFETY: `node` is still private to this thread.
      unsafe { (*node).next = head };
      match self.head.compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => return Ok(()),
        Err(actual) => head = actual,
      }
    }
  }

  /// Seals the accumulator and returns the errors in arrival order. Only the
  /// first call sees any.
  pub fn terminate(&self) -> Vec<E> {
    let mut node = match Tagged::decode(self.head.swap(Tagged::sealed(), Ordering::AcqRel)) {
      Tagged::Sealed | Tagged::Empty => return Vec::new(),
      Tagged::Holding(node) => node,
    };
    let mut errors = Vec::new();
    while !node.is_null() {
      // SAFETY: the swap detached the whole list, we own every node.
      let boxed = unsafe { Box::from_raw(node) };
      node = boxed.next;
      errors.push(boxed.error);
    }
    errors.reverse();
    errors
  }

  pub fn has_errors(&self) -> bool { matches!(self.load(), Tagged::Holding(_)) }

  pub fn is_terminated(&self) -> bool { matches!(self.load(), Tagged::Sealed) }
}

impl<E> Default for ErrorAccumulator<E> {
  fn default() -> Self { Self::new() }
}

impl<E> Drop for ErrorAccumulator<E> {
  fn drop(&mut self) { drop(self.terminate()); }
}

// SAFETY: nodes are owned by the list and only detached wholesale.
unsafe impl<E: Send> Send for ErrorAccumulator<E> {}
unsafe impl<E: Send> Sync for ErrorAccumulator<E> {}

/// The error state of a multi-source operator, per [`ErrorMode`].
pub enum ErrorSlot<E> {
  First(FirstError<E>),
  Accumulate { errors: ErrorAccumulator<E>, compose: fn(Vec<E>) -> E },
}

impl<E> ErrorSlot<E> {
  pub fn new(mode: ErrorMode<E>) -> Self {
    match mode {
      ErrorMode::FirstWins => ErrorSlot::First(FirstError::new()),
      ErrorMode::Delay(compose) => ErrorSlot::Accumulate { errors: ErrorAccumulator::new(), compose },
    }
  }

  pub fn is_delayed(&self) -> bool { matches!(self, ErrorSlot::Accumulate { .. }) }

  /// Records `error`. Returns `false` if it was dropped: a first-wins slot
  /// already holding an error, or a terminated slot (which is logged).
  pub fn add(&self, error: E) -> bool {
    match self {
      ErrorSlot::First(slot) => match slot.try_set(error) {
        Ok(()) => true,
        Err(error) => {
          if slot.is_terminated() {
            undeliverable(error);
          }
          false
        }
      },
      ErrorSlot::Accumulate { errors, .. } => match errors.add(error) {
        Ok(()) => true,
        Err(error) => {
          undeliverable(error);
          false
        }
      },
    }
  }

  pub fn has_error(&self) -> bool {
    match self {
      ErrorSlot::First(slot) => slot.has_error(),
      ErrorSlot::Accumulate { errors, .. } => errors.has_errors(),
    }
  }

  /// Seals the slot and returns the single error to emit, if any.
  pub fn terminate(&self) -> Option<E> {
    match self {
      ErrorSlot::First(slot) => slot.terminate(),
      ErrorSlot::Accumulate { errors, compose } => {
        let errors = errors.terminate();
        if errors.is_empty() {
          None
        } else {
          Some(compose(errors))
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{sync::Arc, thread};

  use super::*;
  use crate::error::RxError;

  #[rxcore_macro::test]
  fn first_error_wins() {
    let slot = FirstError::new();
    assert!(slot.try_set(1).is_ok());
    assert_eq!(slot.try_set(2), Err(2));
    assert!(slot.has_error());
    assert_eq!(slot.terminate(), Some(1));
    assert_eq!(slot.terminate(), None);
    assert_eq!(slot.try_set(3), Err(3));
    assert!(slot.is_terminated());
  }

  #[rxcore_macro::test]
  fn small_and_zero_sized_errors_are_held() {
    let unit = FirstError::new();
    assert!(unit.try_set(()).is_ok());
    assert!(unit.has_error());
    assert!(!unit.is_terminated());
    assert_eq!(unit.terminate(), Some(()));
    assert!(unit.is_terminated());

    let byte = FirstError::new();
    assert!(byte.try_set(1u8).is_ok());
    assert_eq!(byte.terminate(), Some(1u8));
  }

  #[rxcore_macro::test]
  fn concurrent_first_error_single_winner() {
    let slot = Arc::new(FirstError::new());
    let handles: Vec<_> = (0..8)
      .map(|i| {
        let slot = slot.clone();
        thread::spawn(move || slot.try_set(i).is_ok())
      })
      .collect();
    let winners = handles.into_iter().map(|h| h.join().unwrap()).filter(|w| *w);
    assert_eq!(winners.count(), 1);
  }

  #[rxcore_macro::test]
  fn accumulator_keeps_arrival_order() {
    let acc = ErrorAccumulator::new();
    (0..5).for_each(|i| acc.add(i).unwrap());
    assert!(acc.has_errors());
    assert_eq!(acc.terminate(), vec![0, 1, 2, 3, 4]);
    assert!(acc.terminate().is_empty());
    assert_eq!(acc.add(9), Err(9));
  }

  #[rxcore_macro::test]
  fn concurrent_accumulate_loses_nothing() {
    let acc = Arc::new(ErrorAccumulator::new());
    let handles: Vec<_> = (0..4)
      .map(|t| {
        let acc = acc.clone();
        thread::spawn(move || (0..1000).for_each(|i| acc.add(t * 1000 + i).unwrap()))
      })
      .collect();
    handles.into_iter().for_each(|h| h.join().unwrap());
    let mut all = acc.terminate();
    all.sort_unstable();
    assert_eq!(all, (0..4000).collect::<Vec<_>>());
  }

  #[rxcore_macro::test]
  fn delayed_slot_composes() {
    let slot = ErrorSlot::new(ErrorMode::<RxError>::delay());
    assert!(slot.terminate().is_none());

    let slot = ErrorSlot::new(ErrorMode::<RxError>::delay());
    slot.add("a".into());
    slot.add("b".into());
    match slot.terminate() {
      Some(RxError::Composite(c)) => assert_eq!(c.len(), 2),
      other => panic!("unexpected {other:?}"),
    }
  }

  #[rxcore_macro::test]
  fn first_wins_slot_drops_later() {
    let slot = ErrorSlot::new(ErrorMode::FirstWins);
    assert!(slot.add("first".to_string()));
    assert!(!slot.add("second".to_string()));
    assert_eq!(slot.terminate().as_deref(), Some("first"));
  }
}
