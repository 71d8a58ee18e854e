//! The cancellation protocol shared by every observable, operator and
//! subscription handle.
//!
//! A [`Disposable`] is idempotent and thread safe: calling `dispose` twice, or
//! from two threads at once, releases the underlying resource exactly once.
use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use crate::queue::Handoff;

mod composite;
mod slot;

pub use composite::CompositeDisposable;
pub use slot::{DisposableSlot, SlotState};

pub trait Disposable: Send + Sync {
  /// Releases the resource. Repeated calls are no-ops.
  fn dispose(&self);

  fn is_disposed(&self) -> bool;
}

pub type BoxedDisposable = Box<dyn Disposable>;

impl<T: Disposable + ?Sized> Disposable for Arc<T> {
  #[inline]
  fn dispose(&self) { (**self).dispose() }

  #[inline]
  fn is_disposed(&self) -> bool { (**self).is_disposed() }
}

impl<T: Disposable + ?Sized> Disposable for Box<T> {
  #[inline]
  fn dispose(&self) { (**self).dispose() }

  #[inline]
  fn is_disposed(&self) -> bool { (**self).is_disposed() }
}

/// The empty disposable, already in its terminal state.
impl Disposable for () {
  #[inline]
  fn dispose(&self) {}

  #[inline]
  fn is_disposed(&self) -> bool { true }
}

/// A disposable that only records whether it was disposed.
#[derive(Debug, Default)]
pub struct BooleanDisposable {
  disposed: AtomicBool,
}

impl BooleanDisposable {
  pub fn new() -> Self { Self::default() }
}

impl Disposable for BooleanDisposable {
  #[inline]
  fn dispose(&self) { self.disposed.store(true, Ordering::Release); }

  #[inline]
  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}

/// Runs a closure on the first `dispose` call.
pub struct ActionDisposable {
  action: Handoff<Box<dyn FnOnce() + Send>>,
}

impl ActionDisposable {
  pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
    Self { action: Handoff::new(Box::new(action)) }
  }
}

impl Disposable for ActionDisposable {
  fn dispose(&self) {
    if let Some(action) = self.action.take() {
      action();
    }
  }

  #[inline]
  fn is_disposed(&self) -> bool { self.action.is_empty() }
}

/// Shortcut for [`ActionDisposable::new`].
pub fn from_fn(action: impl FnOnce() + Send + 'static) -> ActionDisposable {
  ActionDisposable::new(action)
}

#[cfg(test)]
mod tests {
  use std::{
    sync::atomic::{AtomicUsize, Ordering},
    thread,
  };

  use super::*;

  #[rxcore_macro::test]
  fn boolean_disposable() {
    let d = BooleanDisposable::new();
    assert!(!d.is_disposed());
    d.dispose();
    d.dispose();
    assert!(d.is_disposed());
  }

  #[rxcore_macro::test]
  fn action_runs_once_across_threads() {
    let hits = Arc::new(AtomicUsize::new(0));
    let c_hits = hits.clone();
    let d = Arc::new(from_fn(move || {
      c_hits.fetch_add(1, Ordering::SeqCst);
    }));

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let d = d.clone();
        thread::spawn(move || d.dispose())
      })
      .collect();
    handles.into_iter().for_each(|h| h.join().unwrap());

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(d.is_disposed());
  }

  #[rxcore_macro::test]
  fn unit_is_disposed() { assert!(().is_disposed()); }
}
