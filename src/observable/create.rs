use std::{marker::PhantomData, sync::Arc};

use crate::{
  disposable::{Disposable, DisposableSlot},
  error::undeliverable,
  observable::Observable,
  observer::{BoxedObserver, Observer, Upstream},
};

/// Builds a source from a closure that drives an [`Emitter`].
///
/// The emitter can be moved to another thread and kept for as long as the
/// source produces. Signals sent after the subscriber disposed are dropped.
pub fn create<F, Item, Err>(subscribe: F) -> Create<F, Item, Err>
where
  F: FnOnce(Emitter<Item, Err>),
{
  Create { subscribe, _p: PhantomData }
}

pub struct Create<F, Item, Err> {
  subscribe: F,
  _p: PhantomData<fn() -> (Item, Err)>,
}

impl<F, Item, Err> Observable for Create<F, Item, Err>
where
  F: FnOnce(Emitter<Item, Err>) + 'static,
  Item: Send + 'static,
  Err: Send + 'static,
{
  type Item = Item;
  type Err = Err;

  fn actual_subscribe<O>(self, mut observer: O)
  where
    O: Observer<Item, Err> + 'static,
  {
    let teardown = Arc::new(DisposableSlot::new());
    observer.on_subscribe(Upstream::new(teardown.clone()));
    (self.subscribe)(Emitter { observer: Box::new(observer), teardown });
  }
}

/// Producer handle passed to the [`create`] closure.
///
/// `error` and `complete` consume the emitter, so no signal can follow a
/// terminal one.
pub struct Emitter<Item, Err> {
  observer: BoxedObserver<Item, Err>,
  teardown: Arc<DisposableSlot>,
}

impl<Item, Err> Emitter<Item, Err> {
  pub fn next(&mut self, value: Item) {
    if !self.teardown.is_disposed() {
      self.observer.next(value);
    }
  }

  pub fn error(mut self, err: Err) {
    if self.teardown.is_disposed() {
      undeliverable(err);
    } else {
      self.observer.error(err);
      self.teardown.dispose();
    }
  }

  pub fn complete(mut self) {
    if !self.teardown.is_disposed() {
      self.observer.complete();
      self.teardown.dispose();
    }
  }

  /// Whether the subscriber went away; a long-running producer should stop.
  pub fn is_disposed(&self) -> bool { self.teardown.is_disposed() }

  /// Registers the resource to release on dispose or termination, disposing
  /// any previous one. Disposed right away if the subscriber is gone.
  pub fn set_disposable(&self, d: impl Disposable + 'static) { self.teardown.set(Box::new(d)); }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      atomic::{AtomicBool, Ordering},
      Arc,
    },
    thread,
    time::Duration,
  };

  use super::*;
  use crate::{disposable::from_fn, observable::ObservableExt};

  #[rxcore_macro::test]
  fn emits_and_tears_down_on_complete() {
    let released = Arc::new(AtomicBool::new(false));
    let c = released.clone();
    create::<_, i32, ()>(move |mut emitter| {
      emitter.set_disposable(from_fn(move || c.store(true, Ordering::SeqCst)));
      emitter.next(1);
      emitter.next(2);
      emitter.complete();
    })
    .test()
    .assert_values(&[1, 2])
    .assert_complete();
    assert!(released.load(Ordering::SeqCst));
  }

  #[rxcore_macro::test]
  fn emitter_on_other_thread() {
    let test = create::<_, i32, ()>(|mut emitter| {
      thread::spawn(move || {
        (0..10).for_each(|v| emitter.next(v));
        emitter.complete();
      });
    })
    .test();
    assert!(test.await_terminal(Duration::from_secs(5)));
    test.assert_values(&(0..10).collect::<Vec<_>>()).assert_complete();
  }

  #[rxcore_macro::test]
  fn dispose_runs_teardown_and_silences_emitter() {
    let released = Arc::new(AtomicBool::new(false));
    let c = released.clone();
    let (tx, rx) = std::sync::mpsc::channel();
    let test = create::<_, i32, ()>(move |emitter| {
      emitter.set_disposable(from_fn(move || c.store(true, Ordering::SeqCst)));
      tx.send(emitter).unwrap();
    })
    .test();

    let mut emitter = rx.recv().unwrap();
    test.dispose();
    assert!(released.load(Ordering::SeqCst));
    assert!(emitter.is_disposed());
    emitter.next(1);
    emitter.complete();
    test.assert_values(&[]).assert_not_complete();
  }
}
