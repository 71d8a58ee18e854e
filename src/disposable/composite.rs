use std::{
  fmt,
  sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
  },
};

use smallvec::SmallVec;

use super::{BoxedDisposable, Disposable};
use crate::util::lock_recover;

/// A keyed set of disposables disposed together.
///
/// Members are tracked by the key returned from [`add`](Self::add), so an
/// operator can drop a single finished member without touching the others.
/// Member `dispose` calls always run outside the internal lock.
pub struct CompositeDisposable {
  disposed: AtomicBool,
  members: Mutex<Members>,
}

#[derive(Default)]
struct Members {
  next_key: usize,
  items: SmallVec<[(usize, BoxedDisposable); 4]>,
}

impl CompositeDisposable {
  pub fn new() -> Self { Self { disposed: AtomicBool::new(false), members: Mutex::default() } }

  /// Adds `d` and returns its key, or disposes `d` and returns `None` when the
  /// composite is already disposed.
  pub fn add(&self, d: BoxedDisposable) -> Option<usize> {
    if !self.is_disposed() {
      let mut members = lock_recover(&self.members);
      // Re-checked under the lock: `dispose` flips the flag before draining.
      if !self.is_disposed() {
        let key = members.next_key;
        members.next_key += 1;
        members.items.push((key, d));
        return Some(key);
      }
    }
    d.dispose();
    None
  }

  /// Removes the member and disposes it.
  pub fn remove(&self, key: usize) -> bool {
    match self.delete(key) {
      Some(d) => {
        d.dispose();
        true
      }
      None => false,
    }
  }

  /// Removes the member without disposing it.
  pub fn delete(&self, key: usize) -> Option<BoxedDisposable> {
    let mut members = lock_recover(&self.members);
    let pos = members.items.iter().position(|(k, _)| *k == key)?;
    Some(members.items.remove(pos).1)
  }

  /// Disposes every current member but keeps accepting new ones.
  pub fn clear(&self) {
    let drained = std::mem::take(&mut lock_recover(&self.members).items);
    drained.into_iter().for_each(|(_, d)| d.dispose());
  }

  pub fn len(&self) -> usize { lock_recover(&self.members).items.len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl Default for CompositeDisposable {
  fn default() -> Self { Self::new() }
}

impl Disposable for CompositeDisposable {
  fn dispose(&self) {
    if self.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    let drained = std::mem::take(&mut lock_recover(&self.members).items);
    drained.into_iter().for_each(|(_, d)| d.dispose());
  }

  #[inline]
  fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }
}

impl fmt::Debug for CompositeDisposable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CompositeDisposable")
      .field("disposed", &self.is_disposed())
      .field("len", &self.len())
      .finish()
  }
}
