//! A publish subject: an observer that rebroadcasts to its subscribers.
use std::{
  fmt,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, Weak,
  },
};

use smallvec::SmallVec;

use crate::{
  disposable::Disposable,
  error::undeliverable,
  observable::Observable,
  observer::{BoxedObserver, Observer, Upstream},
  util::lock_recover,
};

/// Broadcasts every signal it receives to the observers subscribed at that
/// moment. Subscribers arriving after termination get the terminal signal
/// right away.
///
/// Each subscriber is called under its own lock; the subscriber list lock is
/// never held while emitting.
pub struct Subject<Item, Err> {
  inner: Arc<SubjectInner<Item, Err>>,
}

struct SubjectInner<Item, Err> {
  state: Mutex<SubjectState<Item, Err>>,
}

struct SubjectState<Item, Err> {
  next_id: usize,
  observers: SmallVec<[(usize, Arc<Entry<Item, Err>>); 2]>,
  terminal: Option<Terminal<Err>>,
}

#[derive(Clone)]
enum Terminal<Err> {
  Complete,
  Error(Err),
}

struct Entry<Item, Err> {
  observer: Mutex<BoxedObserver<Item, Err>>,
  disposed: AtomicBool,
}

impl<Item, Err> Entry<Item, Err> {
  fn with(&self, f: impl FnOnce(&mut BoxedObserver<Item, Err>)) {
    if !self.disposed.load(Ordering::Acquire) {
      f(&mut lock_recover(&self.observer));
    }
  }
}

impl<Item, Err> Subject<Item, Err> {
  pub fn new() -> Self {
    Self {
      inner: Arc::new(SubjectInner {
        state: Mutex::new(SubjectState {
          next_id: 0,
          observers: SmallVec::new(),
          terminal: None,
        }),
      }),
    }
  }

  pub fn observer_count(&self) -> usize { lock_recover(&self.inner.state).observers.len() }

  pub fn is_terminated(&self) -> bool { lock_recover(&self.inner.state).terminal.is_some() }

  fn snapshot(&self) -> SmallVec<[Arc<Entry<Item, Err>>; 2]> {
    lock_recover(&self.inner.state).observers.iter().map(|(_, e)| e.clone()).collect()
  }

  /// Marks the subject terminated and detaches every subscriber.
  fn terminate(&self, terminal: Terminal<Err>) -> Option<SmallVec<[Arc<Entry<Item, Err>>; 2]>> {
    let mut state = lock_recover(&self.inner.state);
    if state.terminal.is_some() {
      return None;
    }
    state.terminal = Some(terminal);
    Some(state.observers.drain(..).map(|(_, e)| e).collect())
  }
}

impl<Item: Clone, Err: Clone> Subject<Item, Err> {
  pub fn next(&self, value: Item) {
    let entries = self.snapshot();
    let mut iter = entries.iter().peekable();
    while let Some(entry) = iter.next() {
      if iter.peek().is_some() {
        entry.with(|o| o.next(value.clone()));
      } else {
        entry.with(|o| o.next(value));
        break;
      }
    }
  }

  pub fn error(&self, err: Err) {
    match self.terminate(Terminal::Error(err.clone())) {
      Some(entries) => entries.iter().for_each(|e| e.with(|o| o.error(err.clone()))),
      None => undeliverable(err),
    }
  }

  pub fn complete(&self) {
    if let Some(entries) = self.terminate(Terminal::Complete) {
      entries.iter().for_each(|e| e.with(|o| o.complete()));
    }
  }
}

impl<Item, Err> Clone for Subject<Item, Err> {
  fn clone(&self) -> Self { Self { inner: self.inner.clone() } }
}

impl<Item, Err> Default for Subject<Item, Err> {
  fn default() -> Self { Self::new() }
}

impl<Item, Err> fmt::Debug for Subject<Item, Err> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Subject")
      .field("observers", &self.observer_count())
      .field("terminated", &self.is_terminated())
      .finish()
  }
}

struct SubjectSubscription<Item, Err> {
  subject: Weak<SubjectInner<Item, Err>>,
  id: usize,
  entry: Arc<Entry<Item, Err>>,
}

impl<Item: Send, Err: Send> Disposable for SubjectSubscription<Item, Err> {
  fn dispose(&self) {
    if self.entry.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(subject) = self.subject.upgrade() {
      let removed = {
        let mut state = lock_recover(&subject.state);
        let pos = state.observers.iter().position(|(id, _)| *id == self.id);
        pos.map(|pos| state.observers.remove(pos))
      };
      drop(removed);
    }
  }

  fn is_disposed(&self) -> bool { self.entry.disposed.load(Ordering::Acquire) }
}

impl<Item, Err> Observable for Subject<Item, Err>
where
  Item: Clone + Send + 'static,
  Err: Clone + Send + 'static,
{
  type Item = Item;
  type Err = Err;

  fn actual_subscribe<O>(self, observer: O)
  where
    O: Observer<Item, Err> + 'static,
  {
    let entry = Arc::new(Entry {
      observer: Mutex::new(Box::new(observer) as BoxedObserver<Item, Err>),
      disposed: AtomicBool::new(false),
    });
    // Held until `on_subscribe` returned, so no signal overtakes it.
    let mut observer = lock_recover(&entry.observer);

    let (id, terminal) = {
      let mut state = lock_recover(&self.inner.state);
      let id = state.next_id;
      state.next_id += 1;
      match state.terminal.clone() {
        Some(terminal) => (id, Some(terminal)),
        None => {
          state.observers.push((id, entry.clone()));
          (id, None)
        }
      }
    };

    let subscription = SubjectSubscription { subject: Arc::downgrade(&self.inner), id, entry: entry.clone() };
    observer.on_subscribe(Upstream::new(Arc::new(subscription)));
    match terminal {
      Some(Terminal::Complete) => observer.complete(),
      Some(Terminal::Error(err)) => observer.error(err),
      None => {}
    }
  }
}

impl<Item, Err> Observer<Item, Err> for Subject<Item, Err>
where
  Item: Clone + Send,
  Err: Clone + Send,
{
  fn on_subscribe(&mut self, upstream: Upstream<Item, Err>) {
    if self.is_terminated() {
      upstream.dispose();
    }
  }

  fn next(&mut self, value: Item) { Subject::next(self, value) }

  fn error(&mut self, err: Err) { Subject::error(self, err) }

  fn complete(&mut self) { Subject::complete(self) }
}

#[cfg(test)]
mod tests {
  use std::thread;

  use super::*;
  use crate::{
    fusion::FusionMode,
    observable::{from_iter, ObservableExt},
  };

  #[rxcore_macro::test]
  fn broadcasts_to_current_subscribers() {
    let subject = Subject::<i32, ()>::new();
    let a = subject.clone().test();
    subject.next(1);
    let b = subject.clone().test();
    subject.next(2);
    subject.complete();

    a.assert_values(&[1, 2]).assert_complete();
    b.assert_values(&[2]).assert_complete();
    assert_eq!(subject.observer_count(), 0);
  }

  #[rxcore_macro::test]
  fn late_subscriber_gets_terminal() {
    let subject = Subject::<i32, &'static str>::new();
    subject.error("gone");
    subject.error("again");
    subject.clone().test().assert_values(&[]).assert_error(|e| *e == "gone");
  }

  #[rxcore_macro::test]
  fn dispose_removes_subscriber() {
    let subject = Subject::<i32, ()>::new();
    let test = subject.clone().test();
    assert_eq!(subject.observer_count(), 1);
    test.dispose();
    assert_eq!(subject.observer_count(), 0);
    subject.next(1);
    test.assert_values(&[]);
  }

  #[rxcore_macro::test]
  fn subject_as_observer() {
    let subject = Subject::<i32, ()>::new();
    let test = subject.clone().test_fused(FusionMode::ANY);
    from_iter(vec![1, 2, 3]).actual_subscribe(subject.clone());
    test.assert_fusion_mode(FusionMode::NONE).assert_values(&[1, 2, 3]).assert_complete();
  }

  #[rxcore_macro::test]
  fn concurrent_next_stays_serialized_per_subscriber() {
    let subject = Subject::<usize, ()>::new();
    let test = subject.clone().test();
    let handles: Vec<_> = (0..4)
      .map(|_| {
        let subject = subject.clone();
        thread::spawn(move || (0..500).for_each(|v| subject.next(v)))
      })
      .collect();
    handles.into_iter().for_each(|h| h.join().unwrap());
    test.assert_value_count(2000).assert_serialized();
  }
}
